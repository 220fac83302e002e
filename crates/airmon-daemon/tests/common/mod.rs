//! Shared fixtures for the daemon integration tests

#![allow(dead_code)]

use airmon_core::{
    ForecastMeasurement, GateMode, GateThresholds, Location, LocationRegistry, PollutantReading,
    RawMeasurement, SourceMerger, Timestamp, WeatherReading, WriteGate,
};
use airmon_daemon::collector::{Collector, Feeds};
use airmon_db::DbClient;
use airmon_ingest::{FeedClient, IngestError, IngestResult};
use airmon_obs::Metrics;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 2024-01-01T00:00:00Z, a Monday
pub const DAY: Timestamp = 1_704_067_200;

pub const HANOI: (f64, f64) = (21.0285, 105.8542);

/// Feed returning whatever reading the test put in it
pub struct FakeFeed {
    name: String,
    current: Mutex<Option<RawMeasurement>>,
    forecast: Mutex<Vec<ForecastMeasurement>>,
    delay: Duration,
    crash_latitude: Mutex<Option<f64>>,
}

impl FakeFeed {
    pub fn new(name: &str) -> Arc<Self> {
        Self::slow(name, Duration::ZERO)
    }

    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            current: Mutex::new(None),
            forecast: Mutex::new(Vec::new()),
            delay,
            crash_latitude: Mutex::new(None),
        })
    }

    pub fn set(&self, measurement: Option<RawMeasurement>) {
        *self.current.lock().unwrap() = measurement;
    }

    /// Panic when asked for this latitude
    pub fn crash_at(&self, latitude: f64) {
        *self.crash_latitude.lock().unwrap() = Some(latitude);
    }

    pub fn set_forecast(&self, points: Vec<ForecastMeasurement>) {
        *self.forecast.lock().unwrap() = points;
    }
}

#[async_trait::async_trait]
impl FeedClient for FakeFeed {
    fn source(&self) -> &str {
        &self.name
    }

    async fn fetch_current(&self, latitude: f64, _longitude: f64) -> IngestResult<RawMeasurement> {
        if *self.crash_latitude.lock().unwrap() == Some(latitude) {
            panic!("feed crashed");
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.current
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| IngestError::FeedError("no data".into()))
    }

    async fn fetch_forecast(
        &self,
        _latitude: f64,
        _longitude: f64,
    ) -> IngestResult<Vec<ForecastMeasurement>> {
        Ok(self.forecast.lock().unwrap().clone())
    }
}

/// Registry serving a fixed location list; counters go to the database
pub struct FixedRegistry {
    pub locations: Vec<Location>,
    pub db: DbClient,
}

#[async_trait::async_trait]
impl LocationRegistry for FixedRegistry {
    async fn list_active_locations(&self) -> anyhow::Result<Vec<Location>> {
        Ok(self.locations.clone())
    }

    async fn record_measurement(&self, location_id: &str, at: Timestamp) -> anyhow::Result<()> {
        Ok(self.db.increment_measurements(location_id, at).await?)
    }
}

pub fn location(id: &str) -> Location {
    Location {
        id: id.to_string(),
        name: id.to_uppercase(),
        latitude: HANOI.0,
        longitude: HANOI.1,
        radius_m: 1_000.0,
        sources: vec![],
        collection_interval_secs: 300,
        active: true,
        first_measurement: None,
        last_measurement: None,
        total_measurements: 0,
    }
}

pub fn pollutant_measurement(
    source: &str,
    lat: f64,
    lon: f64,
    observed_at: Timestamp,
    pm25: f64,
) -> RawMeasurement {
    RawMeasurement {
        source: source.to_string(),
        latitude: lat,
        longitude: lon,
        observed_at,
        weather: None,
        pollutants: Some(PollutantReading {
            pm25: Some(pm25),
            ..Default::default()
        }),
    }
}

pub fn weather_measurement(source: &str, observed_at: Timestamp, temp: f64) -> RawMeasurement {
    RawMeasurement {
        source: source.to_string(),
        latitude: HANOI.0,
        longitude: HANOI.1,
        observed_at,
        weather: Some(WeatherReading {
            temperature: Some(temp),
            condition: Some("clouds".into()),
            ..Default::default()
        }),
        pollutants: None,
    }
}

pub struct Harness {
    pub db: DbClient,
    pub primary: Arc<FakeFeed>,
    pub secondary: Arc<FakeFeed>,
    pub collector: Collector,
}

pub async fn harness(mode: GateMode, feed_timeout: Duration) -> Harness {
    harness_with(
        mode,
        feed_timeout,
        FakeFeed::new("waqi"),
        vec![location("hn-01")],
        vec![],
    )
    .await
}

/// `unseeded` locations are listed for collection but missing from the
/// database, so recording their counters fails
pub async fn harness_with(
    mode: GateMode,
    feed_timeout: Duration,
    primary: Arc<FakeFeed>,
    seeded: Vec<Location>,
    unseeded: Vec<Location>,
) -> Harness {
    let db = DbClient::in_memory().await.unwrap();
    for loc in &seeded {
        db.upsert_location(loc).await.unwrap();
    }
    let mut locations = seeded;
    locations.extend(unseeded);
    let secondary = FakeFeed::new("openweather");
    let registry = Arc::new(FixedRegistry {
        locations,
        db: db.clone(),
    });
    let feeds = Feeds {
        primary: Some(primary.clone() as Arc<dyn FeedClient>),
        secondary: Some(secondary.clone() as Arc<dyn FeedClient>),
    };
    let collector = Collector::new(
        registry,
        db.clone(),
        feeds,
        SourceMerger::default(),
        WriteGate::new(GateThresholds::default(), mode),
        Arc::new(Metrics::new("airmon-test").unwrap()),
        feed_timeout,
        4,
    );
    Harness {
        db,
        primary,
        secondary,
        collector,
    }
}
