use airmon_core::{GateMode, GateThresholds, Location, MergeConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "airmon.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://airmon.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectionConfig {
    pub interval_secs: u64,
    pub max_concurrency: usize,
    /// Upper bound for one feed call, retries included
    pub feed_timeout_secs: u64,
    pub gate_mode: GateMode,
    /// Feed whose pollutant values win on overlap
    pub primary_source: String,
    pub secondary_source: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            max_concurrency: 8,
            feed_timeout_secs: 12,
            gate_mode: GateMode::Enforce,
            primary_source: "waqi".to_string(),
            secondary_source: "openweather".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpFeedConfig {
    pub base_url: Option<String>,
    /// API key or token
    pub key: Option<String>,
    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

fn default_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Replace both real feeds with simulated ones
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct FeedsConfig {
    pub openweather: Option<HttpFeedConfig>,
    pub waqi: Option<HttpFeedConfig>,
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub aggregation_interval_secs: u64,
    pub retention_interval_secs: u64,
    pub forecast_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            aggregation_interval_secs: 3_600,
            retention_interval_secs: 6 * 3_600,
            forecast_interval_secs: 3 * 3_600,
        }
    }
}

/// Retention windows in hours; an absent window keeps records forever
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    pub raw_hours: Option<i64>,
    pub hourly_hours: Option<i64>,
    pub daily_hours: Option<i64>,
    pub weekly_hours: Option<i64>,
    pub monthly_hours: Option<i64>,
    pub safety_buffer_hours: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            raw_hours: Some(2 * 24),
            hourly_hours: Some(7 * 24),
            daily_hours: Some(90 * 24),
            weekly_hours: Some(730 * 24),
            monthly_hours: None,
            safety_buffer_hours: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus textfile rewritten after every aggregation pass
    pub textfile: Option<String>,
}

/// Location seed upserted into the registry at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationConfig {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_radius")]
    pub radius_m: f64,
    #[serde(default)]
    pub sources: Vec<String>,
    /// Overrides `collection.interval_secs` for this location
    #[serde(default)]
    pub collection_interval_secs: Option<u64>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_radius() -> f64 {
    1_000.0
}

fn default_active() -> bool {
    true
}

impl LocationConfig {
    pub fn to_location(&self, default_interval_secs: u64) -> Location {
        let interval = self.collection_interval_secs.unwrap_or(default_interval_secs);
        Location {
            id: self.id.clone(),
            name: self.name.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            radius_m: self.radius_m,
            sources: self.sources.clone(),
            collection_interval_secs: interval as i64,
            active: self.active,
            first_measurement: None,
            last_measurement: None,
            total_measurements: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub collection: CollectionConfig,
    pub feeds: FeedsConfig,
    pub merge: MergeConfig,
    pub gate: GateThresholds,
    pub schedule: ScheduleConfig,
    pub retention: RetentionConfig,
    pub metrics: MetricsConfig,
    pub locations: Vec<LocationConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid value: {0}")]
    Invalid(String),
}

impl AppConfig {
    /// Load configuration from AIRMON_CONFIG path (TOML) if present, with reasonable defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("AIRMON_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    /// Missing file means defaults
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let cfg = if path.exists() {
            let s = fs::read_to_string(path)?;
            toml::from_str::<AppConfig>(&s)?
        } else {
            AppConfig::default()
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection.interval_secs == 0 {
            return Err(ConfigError::Invalid("collection.interval_secs must be > 0".into()));
        }
        if self.collection.max_concurrency == 0 {
            return Err(ConfigError::Invalid("collection.max_concurrency must be > 0".into()));
        }
        let s = &self.schedule;
        if s.aggregation_interval_secs == 0
            || s.retention_interval_secs == 0
            || s.forecast_interval_secs == 0
        {
            return Err(ConfigError::Invalid("schedule intervals must be > 0".into()));
        }
        if self.collection.primary_source == self.collection.secondary_source {
            return Err(ConfigError::Invalid(
                "primary and secondary source must differ".into(),
            ));
        }
        let mut ids = std::collections::HashSet::new();
        for loc in &self.locations {
            if !ids.insert(loc.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate location id {}", loc.id)));
            }
            if loc.collection_interval_secs == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "location {} collection_interval_secs must be > 0",
                    loc.id
                )));
            }
            if !(-90.0..=90.0).contains(&loc.latitude) || !(-180.0..=180.0).contains(&loc.longitude)
            {
                return Err(ConfigError::Invalid(format!(
                    "location {} has invalid coordinates",
                    loc.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.collection.primary_source, "waqi");
        assert_eq!(cfg.retention.monthly_hours, None);
    }

    #[test]
    fn parses_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[database]
url = "sqlite:///var/lib/airmon/airmon.db"

[collection]
interval_secs = 600
gate_mode = "bypass"

[feeds.waqi]
key = "demo"

[merge]
same_location_m = 500.0

[gate]
temperature_delta = 1.5

[retention]
raw_hours = 72

[[locations]]
id = "hn-01"
name = "Hoan Kiem"
latitude = 21.0285
longitude = 105.8542
sources = ["waqi", "openweather"]

[[locations]]
id = "hn-02"
name = "Long Bien"
latitude = 21.0450
longitude = 105.8890
collection_interval_secs = 1800
"#
        )
        .unwrap();

        let cfg = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(cfg.collection.interval_secs, 600);
        assert_eq!(cfg.collection.max_concurrency, 8);
        assert_eq!(cfg.collection.gate_mode, GateMode::Bypass);
        assert_eq!(cfg.feeds.waqi.as_ref().unwrap().max_retries, 2);
        assert!(cfg.feeds.openweather.is_none());
        assert_eq!(cfg.merge.same_location_m, 500.0);
        assert_eq!(cfg.merge.same_time_secs, 600);
        assert_eq!(cfg.gate.temperature_delta, 1.5);
        assert_eq!(cfg.retention.raw_hours, Some(72));
        assert_eq!(cfg.retention.hourly_hours, Some(168));

        let loc = cfg.locations[0].to_location(600);
        assert_eq!(loc.radius_m, 1_000.0);
        assert!(loc.active);
        assert_eq!(loc.collection_interval_secs, 600);
        let slow = cfg.locations[1].to_location(600);
        assert_eq!(slow.collection_interval_secs, 1_800);
    }

    #[test]
    fn rejects_duplicate_locations() {
        let mut cfg = AppConfig::default();
        let loc = LocationConfig {
            id: "a".into(),
            name: "A".into(),
            latitude: 1.0,
            longitude: 2.0,
            radius_m: 100.0,
            sources: vec![],
            collection_interval_secs: None,
            active: true,
        };
        cfg.locations = vec![loc.clone(), loc.clone()];
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        cfg.locations = vec![LocationConfig {
            collection_interval_secs: Some(0),
            ..loc
        }];
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[collection\ninterval_secs = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(file.path()),
            Err(ConfigError::Toml(_))
        ));
    }
}
