//! Construction of feeds and location seeds from configuration

use crate::collector::Feeds;
use airmon_config::{AppConfig, HttpFeedConfig};
use airmon_db::DbClient;
use airmon_ingest::{
    FeedClient, FeedRegistry, HttpFetcher, OpenWeatherClient, SimulatorFeed, WaqiClient,
    OPENWEATHER_BASE_URL, OPENWEATHER_SOURCE, WAQI_BASE_URL, WAQI_SOURCE,
};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// North offset of the simulated primary station, about 55 m
const SIMULATED_STATION_OFFSET_DEG: f64 = 0.0005;

/// Register every configured feed. With the simulator enabled, both roles
/// are served by simulated feeds instead.
pub async fn build_feed_registry(config: &AppConfig) -> Result<FeedRegistry> {
    let registry = FeedRegistry::new();
    let collection = &config.collection;

    if config.feeds.simulator.enabled {
        registry
            .register(
                collection.secondary_source.clone(),
                Arc::new(SimulatorFeed::new(collection.secondary_source.clone())),
            )
            .await;
        registry
            .register(
                collection.primary_source.clone(),
                Arc::new(
                    SimulatorFeed::new(collection.primary_source.clone())
                        .with_station_offset(SIMULATED_STATION_OFFSET_DEG, 120),
                ),
            )
            .await;
        info!("Simulated feeds registered");
        return Ok(registry);
    }

    let timeout = Duration::from_secs(config.collection.feed_timeout_secs);
    if let Some(feed) = with_key(config.feeds.openweather.as_ref(), OPENWEATHER_SOURCE) {
        let http = HttpFetcher::new(feed.max_retries, timeout)?;
        let base = feed.base_url.as_deref().unwrap_or(OPENWEATHER_BASE_URL);
        let key = feed.key.clone().unwrap_or_default();
        let client = OpenWeatherClient::new(http, base, key)?;
        registry.register(OPENWEATHER_SOURCE, Arc::new(client)).await;
    }
    if let Some(feed) = with_key(config.feeds.waqi.as_ref(), WAQI_SOURCE) {
        let http = HttpFetcher::new(feed.max_retries, timeout)?;
        let base = feed.base_url.as_deref().unwrap_or(WAQI_BASE_URL);
        let token = feed.key.clone().unwrap_or_default();
        let client = WaqiClient::new(http, base, token)?;
        registry.register(WAQI_SOURCE, Arc::new(client)).await;
    }

    Ok(registry)
}

fn with_key<'a>(feed: Option<&'a HttpFeedConfig>, name: &str) -> Option<&'a HttpFeedConfig> {
    match feed {
        Some(f) if f.key.as_deref().is_some_and(|k| !k.is_empty()) => Some(f),
        Some(_) => {
            warn!(feed = name, "feed configured without a key, disabled");
            None
        }
        None => None,
    }
}

/// Resolve the primary and secondary roles; at least one must exist
pub async fn resolve_feeds(config: &AppConfig, registry: &FeedRegistry) -> Result<Feeds> {
    let lookup = |name: String| async move {
        let feed: Option<Arc<dyn FeedClient>> = registry.get(&name).await.ok();
        if feed.is_none() {
            warn!(feed = %name, "feed role not available");
        }
        feed
    };
    let feeds = Feeds {
        primary: lookup(config.collection.primary_source.clone()).await,
        secondary: lookup(config.collection.secondary_source.clone()).await,
    };
    if feeds.primary.is_none() && feeds.secondary.is_none() {
        bail!("no feeds available; configure feed keys or enable the simulator");
    }
    Ok(feeds)
}

/// Upsert `[[locations]]` from the configuration into the registry table
pub async fn seed_locations(config: &AppConfig, db: &DbClient) -> Result<usize> {
    for seed in &config.locations {
        db.upsert_location(&seed.to_location(config.collection.interval_secs))
            .await
            .with_context(|| format!("Failed to seed location {}", seed.id))?;
    }
    Ok(config.locations.len())
}
