//! Daemon configuration: TOML file overlaid with environment variables

use airmon_archive::{AggregationSchedule, RetentionPolicy};
use airmon_config::{AppConfig, HttpFeedConfig};
use airmon_core::SECS_PER_HOUR;
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

/// Load the file named by AIRMON_CONFIG, then apply environment overrides
pub fn load() -> Result<AppConfig> {
    let mut config = AppConfig::load().context("Failed to load configuration file")?;
    apply_env(&mut config, |key| env::var(key).ok())?;
    config
        .validate()
        .context("Invalid configuration after environment overrides")?;
    Ok(config)
}

/// Apply overrides from `lookup`:
/// DATABASE_URL, COLLECTION_INTERVAL, MAX_CONCURRENCY, OPENWEATHER_API_KEY, WAQI_TOKEN
pub fn apply_env(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(url) = lookup("DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(raw) = lookup("COLLECTION_INTERVAL") {
        config.collection.interval_secs = parse(&raw, "COLLECTION_INTERVAL")?;
    }
    if let Some(raw) = lookup("MAX_CONCURRENCY") {
        config.collection.max_concurrency = parse(&raw, "MAX_CONCURRENCY")?;
    }
    if let Some(key) = lookup("OPENWEATHER_API_KEY") {
        feed_entry(&mut config.feeds.openweather).key = Some(key);
    }
    if let Some(token) = lookup("WAQI_TOKEN") {
        feed_entry(&mut config.feeds.waqi).key = Some(token);
    }
    Ok(())
}

fn parse<T>(raw: &str, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid {}", name))
}

fn feed_entry(slot: &mut Option<HttpFeedConfig>) -> &mut HttpFeedConfig {
    slot.get_or_insert_with(|| HttpFeedConfig {
        base_url: None,
        key: None,
        max_retries: 2,
    })
}

/// Retention windows and the aggregation cadence they are checked against
pub fn retention(config: &AppConfig) -> (RetentionPolicy, AggregationSchedule) {
    let r = &config.retention;
    let hours = |h: Option<i64>| h.map(|h| h * SECS_PER_HOUR);
    let policy = RetentionPolicy {
        raw: hours(r.raw_hours),
        hourly: hours(r.hourly_hours),
        daily: hours(r.daily_hours),
        weekly: hours(r.weekly_hours),
        monthly: hours(r.monthly_hours),
    };
    let schedule = AggregationSchedule {
        interval_secs: config.schedule.aggregation_interval_secs as i64,
        safety_buffer_secs: r.safety_buffer_hours * SECS_PER_HOUR,
    };
    (policy, schedule)
}
