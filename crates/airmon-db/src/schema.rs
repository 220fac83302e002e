//! Table layout and row types
//!
//! Raw samples keep one column per measured field so collaborators can query
//! them directly; aggregate statistics are stored as JSON documents next to
//! the bucket key and the columns needed for ranking.

use crate::{DbError, DbResult};
use airmon_core::{
    Aggregate, AirStats, AqiLevel, ForecastDailySummary, ForecastPoint, Location,
    PollutantReading, Provenance, RawSample, Resolution, WeatherReading, WeatherStats,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Table names
pub mod tables {
    use airmon_core::Resolution;

    pub const LOCATIONS: &str = "locations";
    pub const RAW_SAMPLES: &str = "raw_samples";
    pub const HOURLY: &str = "hourly_aggregates";
    pub const DAILY: &str = "daily_aggregates";
    pub const WEEKLY: &str = "weekly_aggregates";
    pub const MONTHLY: &str = "monthly_aggregates";
    pub const FORECAST_POINTS: &str = "forecast_points";
    pub const FORECAST_DAILY: &str = "forecast_daily";

    pub fn aggregate(resolution: Resolution) -> &'static str {
        match resolution {
            Resolution::Hourly => HOURLY,
            Resolution::Daily => DAILY,
            Resolution::Weekly => WEEKLY,
            Resolution::Monthly => MONTHLY,
        }
    }
}

/// DDL executed by `DbClient::init_schema`
pub fn schema_statements() -> Vec<String> {
    let mut statements = vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                radius_m REAL NOT NULL DEFAULT 1000,
                sources TEXT NOT NULL DEFAULT '[]',
                collection_interval_secs INTEGER NOT NULL DEFAULT 300,
                active INTEGER NOT NULL DEFAULT 1,
                first_measurement INTEGER,
                last_measurement INTEGER,
                total_measurements INTEGER NOT NULL DEFAULT 0
            )",
            tables::LOCATIONS
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                location_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                temperature REAL,
                humidity REAL,
                pressure REAL,
                wind_speed REAL,
                wind_direction REAL,
                rain REAL,
                weather_condition TEXT,
                aqi REAL,
                aqi_category INTEGER,
                aqi_level TEXT,
                pm25 REAL,
                pm10 REAL,
                co REAL,
                no2 REAL,
                o3 REAL,
                so2 REAL,
                nh3 REAL,
                match_kind TEXT NOT NULL,
                provenance TEXT NOT NULL,
                secondary TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL
            )",
            tables::RAW_SAMPLES
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_raw_location_time ON {} (location_id, timestamp)",
            tables::RAW_SAMPLES
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_raw_created ON {} (created_at)",
            tables::RAW_SAMPLES
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                location_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                weather TEXT,
                pollutants TEXT,
                generated_at INTEGER NOT NULL,
                valid_until INTEGER NOT NULL,
                PRIMARY KEY (location_id, timestamp)
            )",
            tables::FORECAST_POINTS
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                location_id TEXT NOT NULL,
                date TEXT NOT NULL,
                summary TEXT NOT NULL,
                PRIMARY KEY (location_id, date)
            )",
            tables::FORECAST_DAILY
        ),
    ];

    for resolution in Resolution::ALL {
        let table = tables::aggregate(resolution);
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {} (
                location_id TEXT NOT NULL,
                bucket_start INTEGER NOT NULL,
                sample_count INTEGER NOT NULL,
                source_count INTEGER NOT NULL,
                pm25_avg REAL,
                best_period INTEGER,
                worst_period INTEGER,
                weather TEXT NOT NULL,
                air TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (location_id, bucket_start)
            )",
            table
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_created ON {table} (created_at)"
        ));
    }

    statements
}

/// locations table record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LocationRow {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
    /// JSON array of source names
    pub sources: String,
    pub collection_interval_secs: i64,
    pub active: bool,
    pub first_measurement: Option<i64>,
    pub last_measurement: Option<i64>,
    pub total_measurements: i64,
}

impl TryFrom<LocationRow> for Location {
    type Error = DbError;

    fn try_from(row: LocationRow) -> DbResult<Self> {
        Ok(Location {
            sources: serde_json::from_str(&row.sources)?,
            id: row.id,
            name: row.name,
            latitude: row.latitude,
            longitude: row.longitude,
            radius_m: row.radius_m,
            collection_interval_secs: row.collection_interval_secs,
            active: row.active,
            first_measurement: row.first_measurement,
            last_measurement: row.last_measurement,
            total_measurements: row.total_measurements,
        })
    }
}

/// raw_samples table record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RawSampleRow {
    pub id: i64,
    pub location_id: String,
    pub timestamp: i64,

    // Weather fields
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    pub rain: Option<f64>,
    pub weather_condition: Option<String>,

    // Pollutant fields
    pub aqi: Option<f64>,
    pub aqi_category: Option<i64>,
    pub aqi_level: Option<String>,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub co: Option<f64>,
    pub no2: Option<f64>,
    pub o3: Option<f64>,
    pub so2: Option<f64>,
    pub nh3: Option<f64>,

    pub match_kind: String,
    /// JSON `Provenance`
    pub provenance: String,
    /// JSON array of `SecondaryObservation`
    pub secondary: String,
    pub created_at: i64,
}

impl TryFrom<RawSampleRow> for RawSample {
    type Error = DbError;

    fn try_from(row: RawSampleRow) -> DbResult<Self> {
        let provenance: Provenance = serde_json::from_str(&row.provenance)?;
        let aqi_level = match row.aqi_level.as_deref() {
            None => None,
            Some(s) => Some(
                AqiLevel::parse(s)
                    .ok_or_else(|| DbError::CorruptRow(format!("unknown aqi level {}", s)))?,
            ),
        };
        Ok(RawSample {
            location_id: row.location_id,
            timestamp: row.timestamp,
            weather: WeatherReading {
                temperature: row.temperature,
                humidity: row.humidity,
                pressure: row.pressure,
                wind_speed: row.wind_speed,
                wind_direction: row.wind_direction,
                rain: row.rain,
                condition: row.weather_condition,
            },
            pollutants: PollutantReading {
                aqi: row.aqi,
                aqi_category: row.aqi_category.and_then(|c| u8::try_from(c).ok()),
                pm25: row.pm25,
                pm10: row.pm10,
                co: row.co,
                no2: row.no2,
                o3: row.o3,
                so2: row.so2,
                nh3: row.nh3,
            },
            aqi_level,
            provenance,
            secondary: serde_json::from_str(&row.secondary)?,
            created_at: row.created_at,
        })
    }
}

/// Aggregate table record (same layout for all four resolutions)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AggregateRow {
    pub location_id: String,
    pub bucket_start: i64,
    pub sample_count: i64,
    pub source_count: i64,
    pub pm25_avg: Option<f64>,
    pub best_period: Option<i64>,
    pub worst_period: Option<i64>,
    /// JSON `WeatherStats`
    pub weather: String,
    /// JSON `AirStats`
    pub air: String,
    pub created_at: i64,
}

impl AggregateRow {
    pub fn into_aggregate(self, resolution: Resolution) -> DbResult<Aggregate> {
        let weather: WeatherStats = serde_json::from_str(&self.weather)?;
        let air: AirStats = serde_json::from_str(&self.air)?;
        Ok(Aggregate {
            location_id: self.location_id,
            resolution,
            bucket_start: self.bucket_start,
            weather,
            air,
            sample_count: self.sample_count,
            source_count: self.source_count,
            best_period: self.best_period,
            worst_period: self.worst_period,
            created_at: self.created_at,
        })
    }

    pub fn from_aggregate(agg: &Aggregate) -> DbResult<Self> {
        Ok(Self {
            location_id: agg.location_id.clone(),
            bucket_start: agg.bucket_start,
            sample_count: agg.sample_count,
            source_count: agg.source_count,
            pm25_avg: agg.pm25_avg(),
            best_period: agg.best_period,
            worst_period: agg.worst_period,
            weather: serde_json::to_string(&agg.weather)?,
            air: serde_json::to_string(&agg.air)?,
            created_at: agg.created_at,
        })
    }
}

/// forecast_points table record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ForecastPointRow {
    pub location_id: String,
    pub timestamp: i64,
    pub weather: Option<String>,
    pub pollutants: Option<String>,
    pub generated_at: i64,
    pub valid_until: i64,
}

impl TryFrom<ForecastPointRow> for ForecastPoint {
    type Error = DbError;

    fn try_from(row: ForecastPointRow) -> DbResult<Self> {
        let weather = row
            .weather
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let pollutants = row
            .pollutants
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(ForecastPoint {
            location_id: row.location_id,
            timestamp: row.timestamp,
            weather,
            pollutants,
            generated_at: row.generated_at,
            valid_until: row.valid_until,
        })
    }
}

/// forecast_daily table record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ForecastDailyRow {
    pub location_id: String,
    pub date: String,
    /// JSON `ForecastDailySummary`
    pub summary: String,
}

impl TryFrom<ForecastDailyRow> for ForecastDailySummary {
    type Error = DbError;

    fn try_from(row: ForecastDailyRow) -> DbResult<Self> {
        Ok(serde_json::from_str(&row.summary)?)
    }
}
