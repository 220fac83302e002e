//! Logging initialisation and operational counters

use anyhow::{Context, Result};
use opentelemetry::metrics::{Counter, MeterProvider};
use opentelemetry::KeyValue;
use opentelemetry_prometheus::exporter;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directives used when RUST_LOG is unset. Targets are module paths, so each
/// crate is named by its underscored lib name.
pub const DEFAULT_FILTER: &str = "info,airmon_core=debug,airmon_db=debug,airmon_ingest=debug,\
airmon_archive=debug,airmon_daemon=debug,airmond=debug";

/// Initialize logging.
/// - JSON logs, one object per line
/// - RUST_LOG respected; default to [`DEFAULT_FILTER`]
pub fn init(service_name: &str) {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string());

    tracing_subscriber::registry()
        .with(EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(service = %service_name, "Observability initialized");
}

/// Pipeline counters exported through a Prometheus registry
pub struct Metrics {
    registry: Registry,
    #[allow(dead_code)]
    provider: SdkMeterProvider,
    samples_accepted: Counter<u64>,
    samples_skipped: Counter<u64>,
    feed_failures: Counter<u64>,
    location_failures: Counter<u64>,
    buckets_written: Counter<u64>,
    aggregation_failures: Counter<u64>,
    records_expired: Counter<u64>,
}

impl Metrics {
    pub fn new(service_name: &'static str) -> Result<Self> {
        let registry = Registry::new();
        let reader = exporter()
            .with_registry(registry.clone())
            .build()
            .context("building prometheus exporter")?;
        let provider = SdkMeterProvider::builder().with_reader(reader).build();
        let meter = provider.meter(service_name);

        let counter = |name: &'static str, description: &'static str| {
            meter.u64_counter(name).with_description(description).init()
        };

        Ok(Self {
            samples_accepted: counter(
                "airmon_samples_accepted_total",
                "Samples that passed the write gate and were stored",
            ),
            samples_skipped: counter(
                "airmon_samples_skipped_total",
                "Samples rejected by the write gate",
            ),
            feed_failures: counter(
                "airmon_feed_failures_total",
                "Feed requests that failed or timed out",
            ),
            location_failures: counter(
                "airmon_location_failures_total",
                "Collection cycles that failed for a location",
            ),
            buckets_written: counter(
                "airmon_buckets_written_total",
                "Aggregate buckets written",
            ),
            aggregation_failures: counter(
                "airmon_aggregation_failures_total",
                "Aggregate buckets that failed to compute",
            ),
            records_expired: counter(
                "airmon_records_expired_total",
                "Records deleted by retention",
            ),
            registry,
            provider,
        })
    }

    pub fn sample_accepted(&self, reason: &'static str) {
        self.samples_accepted
            .add(1, &[KeyValue::new("reason", reason)]);
    }

    pub fn sample_skipped(&self) {
        self.samples_skipped.add(1, &[]);
    }

    pub fn feed_failed(&self, source: &str) {
        self.feed_failures
            .add(1, &[KeyValue::new("source", source.to_string())]);
    }

    pub fn location_failed(&self) {
        self.location_failures.add(1, &[]);
    }

    pub fn buckets_written(&self, n: u64) {
        self.buckets_written.add(n, &[]);
    }

    pub fn aggregation_failed(&self, n: u64) {
        self.aggregation_failures.add(n, &[]);
    }

    pub fn records_expired(&self, table: &'static str, n: u64) {
        self.records_expired
            .add(n, &[KeyValue::new("table", table)]);
    }

    /// Text exposition format for a scraper
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buf) {
            tracing::warn!(error=?e, "failed to encode metrics");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
