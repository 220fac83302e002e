//! Collection, aggregation, retention and forecast schedules

use crate::collector::Collector;
use airmon_archive::{RetentionManager, Rollup};
use airmon_core::{LocationRegistry, Timestamp};
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct Intervals {
    pub collection: Duration,
    pub aggregation: Duration,
    pub retention: Duration,
    pub forecast: Duration,
}

/// Scheduler owns the four periodic loops
pub struct Scheduler {
    collector: Collector,
    rollup: Rollup,
    retention: RetentionManager,
    registry: Arc<dyn LocationRegistry>,
    intervals: Intervals,
    metrics_textfile: Option<String>,
}

fn now() -> Timestamp {
    chrono::Utc::now().timestamp()
}

impl Scheduler {
    pub fn new(
        collector: Collector,
        rollup: Rollup,
        retention: RetentionManager,
        registry: Arc<dyn LocationRegistry>,
        intervals: Intervals,
    ) -> Self {
        Self {
            collector,
            rollup,
            retention,
            registry,
            intervals,
            metrics_textfile: None,
        }
    }

    pub fn with_metrics_textfile(mut self, path: Option<String>) -> Self {
        self.metrics_textfile = path;
        self
    }

    /// Run every loop until `shutdown` resolves
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(
            collection_secs = self.intervals.collection.as_secs(),
            aggregation_secs = self.intervals.aggregation.as_secs(),
            retention_secs = self.intervals.retention.as_secs(),
            forecast_secs = self.intervals.forecast.as_secs(),
            "Scheduler started"
        );

        tokio::select! {
            _ = async {
                tokio::join!(
                    self.collection_loop(),
                    self.aggregation_loop(),
                    self.retention_loop(),
                    self.forecast_loop(),
                )
            } => {}
            _ = shutdown => {
                info!("Shutdown signal received");
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }

    /// Cycles run as tasks so a slow cycle never delays the next tick;
    /// locations still busy are skipped by the collector
    async fn collection_loop(&self) {
        let mut ticker = interval(self.intervals.collection);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let collector = self.collector.clone();
                    cycles.spawn(async move { collector.run_cycle(now()).await });
                }
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    match joined {
                        Ok(Ok(report)) => debug!(?report, "cycle finished"),
                        Ok(Err(e)) => error!(error = %e, "collection cycle failed"),
                        Err(e) => error!(error = %e, "collection cycle aborted"),
                    }
                }
            }
        }
    }

    async fn aggregation_loop(&self) {
        let mut ticker = interval(self.intervals.aggregation);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let locations = match self.registry.list_active_locations().await {
                Ok(locations) => locations,
                Err(e) => {
                    warn!(error = %e, "cannot list locations for aggregation");
                    continue;
                }
            };
            let report = self.rollup.aggregate_due(now(), &locations).await;
            let metrics = self.collector.metrics();
            metrics.buckets_written(report.written);
            metrics.aggregation_failed(report.failed);
            self.write_metrics().await;
        }
    }

    async fn retention_loop(&self) {
        let mut ticker = interval(self.intervals.retention);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let report = self.retention.sweep(now()).await;
            for (table, n) in &report.deleted {
                self.collector.metrics().records_expired(*table, *n);
            }
        }
    }

    async fn forecast_loop(&self) {
        let mut ticker = interval(self.intervals.forecast);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let generated_at = now();
            let valid_until = generated_at + self.intervals.forecast.as_secs() as i64;
            if let Err(e) = self
                .collector
                .refresh_forecasts(generated_at, valid_until)
                .await
            {
                warn!(error = %e, "forecast refresh failed");
            }
        }
    }

    async fn write_metrics(&self) {
        let Some(path) = &self.metrics_textfile else {
            return;
        };
        let body = self.collector.metrics().render();
        if let Err(e) = tokio::fs::write(path, body).await {
            warn!(path = %path, error = %e, "failed to write metrics textfile");
        }
    }
}
