//! airmond - collection, rollup and retention daemon
//!
//! This binary coordinates:
//! - Collection from the measurement feeds for every active location
//! - Hourly, daily, weekly and monthly aggregation
//! - Retention sweeps and forecast refreshes

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use airmon_archive::{RetentionManager, Rollup};
use airmon_core::{LocationRegistry, SourceMerger, WriteGate};
use airmon_daemon::collector::Collector;
use airmon_daemon::scheduler::{Intervals, Scheduler};
use airmon_daemon::{config, setup};
use airmon_db::DbClient;
use airmon_obs::Metrics;

#[tokio::main]
async fn main() -> Result<()> {
    airmon_obs::init("airmond");

    info!("Starting airmon daemon");

    // Load configuration
    let config = config::load()?;
    info!(
        database = %config.database.url,
        locations = config.locations.len(),
        "Loaded configuration"
    );

    let (policy, schedule) = config::retention(&config);
    policy
        .validate(&schedule)
        .context("Retention policy would expire records before they are aggregated")?;

    // Initialize database connection
    let db = DbClient::new(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    db.init_schema().await.context("Failed to create schema")?;
    db.ping().await.context("Database ping failed")?;
    info!("Database connection verified");

    let seeded = setup::seed_locations(&config, &db).await?;
    info!(seeded, "Location registry ready");

    let feed_registry = setup::build_feed_registry(&config).await?;
    let feeds = setup::resolve_feeds(&config, &feed_registry).await?;
    let feed_names = feed_registry.list_feeds().await;
    info!(feeds = ?feed_names, "Feeds ready");

    let metrics = Arc::new(Metrics::new("airmond")?);
    let registry: Arc<dyn LocationRegistry> = Arc::new(db.clone());

    let collector = Collector::new(
        Arc::clone(&registry),
        db.clone(),
        feeds,
        SourceMerger::new(config.merge.clone()),
        WriteGate::new(config.gate.clone(), config.collection.gate_mode),
        metrics,
        Duration::from_secs(config.collection.feed_timeout_secs),
        config.collection.max_concurrency,
    );
    let mut rollup = Rollup::new(db.clone());
    if let Some(raw_window) = policy.raw {
        rollup = rollup.with_catch_up(raw_window);
    }
    let retention = RetentionManager::new(db.clone(), policy, &schedule)?;

    let intervals = Intervals {
        collection: Duration::from_secs(config.collection.interval_secs),
        aggregation: Duration::from_secs(config.schedule.aggregation_interval_secs),
        retention: Duration::from_secs(config.schedule.retention_interval_secs),
        forecast: Duration::from_secs(config.schedule.forecast_interval_secs),
    };
    let scheduler = Scheduler::new(collector, rollup, retention, registry, intervals)
        .with_metrics_textfile(config.metrics.textfile.clone());

    info!("Daemon running - press Ctrl+C to stop");
    scheduler.run(shutdown_signal()).await?;

    db.close().await;
    info!("airmon daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
