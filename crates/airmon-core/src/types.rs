//! Core data types for telemetry records

use crate::units::AqiLevel;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Timestamp type (Unix epoch seconds, UTC)
pub type Timestamp = i64;

pub const SECS_PER_MINUTE: i64 = 60;
pub const SECS_PER_HOUR: i64 = 3_600;
pub const SECS_PER_DAY: i64 = 86_400;

/// A monitoring location as supplied by the location registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,

    /// Monitoring radius in meters
    pub radius_m: f64,

    /// Names of the feeds enabled for this location
    pub sources: Vec<String>,

    /// Collection interval in seconds
    pub collection_interval_secs: i64,

    pub active: bool,
    pub first_measurement: Option<Timestamp>,
    pub last_measurement: Option<Timestamp>,
    pub total_measurements: i64,
}

impl Location {
    /// An empty source list means every configured feed is enabled
    pub fn uses_source(&self, source: &str) -> bool {
        self.sources.is_empty() || self.sources.iter().any(|s| s == source)
    }
}

/// Weather part of a measurement (metric units)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WeatherReading {
    /// Air temperature (°C)
    pub temperature: Option<f64>,
    /// Relative humidity (%)
    pub humidity: Option<f64>,
    /// Sea-level pressure (hPa)
    pub pressure: Option<f64>,
    /// Wind speed (m/s)
    pub wind_speed: Option<f64>,
    /// Wind direction (degrees)
    pub wind_direction: Option<f64>,
    /// Rainfall (mm)
    pub rain: Option<f64>,
    /// Lower-case condition code, e.g. "clear", "clouds", "rain"
    pub condition: Option<String>,
}

impl WeatherReading {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.humidity.is_none()
            && self.pressure.is_none()
            && self.wind_speed.is_none()
            && self.wind_direction.is_none()
            && self.rain.is_none()
            && self.condition.is_none()
    }

    /// Fill every missing field from `other`
    pub fn fill_from(&mut self, other: &WeatherReading) {
        fill(&mut self.temperature, other.temperature);
        fill(&mut self.humidity, other.humidity);
        fill(&mut self.pressure, other.pressure);
        fill(&mut self.wind_speed, other.wind_speed);
        fill(&mut self.wind_direction, other.wind_direction);
        fill(&mut self.rain, other.rain);
        if self.condition.is_none() {
            self.condition = other.condition.clone();
        }
    }
}

/// Pollutant part of a measurement
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PollutantReading {
    /// Numeric air quality index
    pub aqi: Option<f64>,
    /// Categorical index on a 1-5 scale (reported by OpenWeather only)
    pub aqi_category: Option<u8>,
    /// Concentrations in µg/m³
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub co: Option<f64>,
    pub no2: Option<f64>,
    pub o3: Option<f64>,
    pub so2: Option<f64>,
    pub nh3: Option<f64>,
}

impl PollutantReading {
    pub fn is_empty(&self) -> bool {
        self.aqi.is_none()
            && self.aqi_category.is_none()
            && self.pm25.is_none()
            && self.pm10.is_none()
            && self.co.is_none()
            && self.no2.is_none()
            && self.o3.is_none()
            && self.so2.is_none()
            && self.nh3.is_none()
    }

    /// Discrete AQI level: the numeric index when reported, otherwise the
    /// index derived from PM2.5, otherwise the 1-5 category.
    pub fn aqi_level(&self) -> Option<AqiLevel> {
        if let Some(aqi) = self.aqi {
            return Some(AqiLevel::from_index(aqi));
        }
        if let Some(pm25) = self.pm25 {
            return Some(AqiLevel::from_index(crate::units::pm25_to_aqi(pm25)));
        }
        self.aqi_category.and_then(AqiLevel::from_category)
    }
}

fn fill(slot: &mut Option<f64>, value: Option<f64>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// One reading as returned by a feed for a single location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawMeasurement {
    pub source: String,
    /// Coordinate reported by the source (station or grid cell)
    pub latitude: f64,
    pub longitude: f64,
    /// Observation time reported by the source
    pub observed_at: Timestamp,
    pub weather: Option<WeatherReading>,
    pub pollutants: Option<PollutantReading>,
}

/// One predicted point as returned by a feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastMeasurement {
    pub source: String,
    pub timestamp: Timestamp,
    pub weather: Option<WeatherReading>,
    pub pollutants: Option<PollutantReading>,
}

/// How the two feeds related to each other when a sample was merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    SingleSource,
    SameMeasurement,
    DistinctMeasurements,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::SingleSource => "single_source",
            MatchKind::SameMeasurement => "same_measurement",
            MatchKind::DistinctMeasurements => "distinct_measurements",
        }
    }
}

/// Where and when one source observed its reading
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceObservation {
    pub source: String,
    pub latitude: f64,
    pub longitude: f64,
    pub observed_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
    /// Every source that contributed, primary first
    pub sources: Vec<String>,
    pub kind: MatchKind,
    pub distance_m: Option<f64>,
    pub time_delta_secs: Option<i64>,
    pub observed: Vec<SourceObservation>,
}

/// Overlapping values of a non-primary source kept when the two sources
/// measured different things
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecondaryObservation {
    pub source: String,
    pub latitude: f64,
    pub longitude: f64,
    pub observed_at: Timestamp,
    pub pollutants: PollutantReading,
}

/// Accepted canonical sample, append-only
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawSample {
    pub location_id: String,
    /// Collection cycle time
    pub timestamp: Timestamp,
    pub weather: WeatherReading,
    pub pollutants: PollutantReading,
    pub aqi_level: Option<AqiLevel>,
    pub provenance: Provenance,
    pub secondary: Vec<SecondaryObservation>,
    pub created_at: Timestamp,
}

/// Aggregation granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Resolution {
    pub const ALL: [Resolution; 4] = [
        Resolution::Hourly,
        Resolution::Daily,
        Resolution::Weekly,
        Resolution::Monthly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Hourly => "hourly",
            Resolution::Daily => "daily",
            Resolution::Weekly => "weekly",
            Resolution::Monthly => "monthly",
        }
    }

    /// Resolution folded into this one; `None` means raw samples
    pub fn finer(&self) -> Option<Resolution> {
        match self {
            Resolution::Hourly => None,
            Resolution::Daily => Some(Resolution::Hourly),
            Resolution::Weekly | Resolution::Monthly => Some(Resolution::Daily),
        }
    }

    /// Whether distributions and best/worst periods are kept
    pub fn keeps_distribution(&self) -> bool {
        !matches!(self, Resolution::Hourly)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" | "hour" => Ok(Resolution::Hourly),
            "daily" | "day" => Ok(Resolution::Daily),
            "weekly" | "week" => Ok(Resolution::Weekly),
            "monthly" | "month" => Ok(Resolution::Monthly),
            other => Err(format!("unknown resolution: {}", other)),
        }
    }
}

/// Mean/min/max of one continuous field, with the number of values behind it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FieldStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WeatherStats {
    pub temperature: Option<FieldStats>,
    pub humidity: Option<FieldStats>,
    pub pressure: Option<FieldStats>,
    pub wind_speed: Option<FieldStats>,
    pub rain_total: Option<f64>,
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_distribution: Option<BTreeMap<String, i64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AirStats {
    pub aqi: Option<FieldStats>,
    pub aqi_level: Option<AqiLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aqi_level_distribution: Option<BTreeMap<String, i64>>,
    pub pm25: Option<FieldStats>,
    pub pm10: Option<FieldStats>,
    pub co: Option<FieldStats>,
    pub no2: Option<FieldStats>,
    pub o3: Option<FieldStats>,
    pub so2: Option<FieldStats>,
    pub nh3: Option<FieldStats>,
}

/// Rollup record for one (location, bucket) at one resolution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Aggregate {
    pub location_id: String,
    pub resolution: Resolution,
    pub bucket_start: Timestamp,
    pub weather: WeatherStats,
    pub air: AirStats,
    /// Raw samples underlying this bucket
    pub sample_count: i64,
    /// Finer-resolution records (or raw samples) folded into this bucket
    pub source_count: i64,
    /// Sub-bucket with the lowest PM2.5 average (daily and coarser)
    pub best_period: Option<Timestamp>,
    /// Sub-bucket with the highest PM2.5 average (daily and coarser)
    pub worst_period: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl Aggregate {
    /// Primary pollutant average, used to rank sub-periods
    pub fn pm25_avg(&self) -> Option<f64> {
        self.air.pm25.map(|s| s.avg)
    }
}

/// Forecast point after weather and pollutant series were aligned
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastPoint {
    pub location_id: String,
    pub timestamp: Timestamp,
    pub weather: Option<WeatherReading>,
    pub pollutants: Option<PollutantReading>,
    pub generated_at: Timestamp,
    pub valid_until: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastDailySummary {
    pub location_id: String,
    pub date: NaiveDate,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub temp_avg: Option<f64>,
    pub condition: Option<String>,
    pub rain_total: f64,
    pub will_rain: bool,
    pub aqi: Option<FieldStats>,
    pub pm25: Option<FieldStats>,
    pub pm10: Option<FieldStats>,
    pub o3: Option<FieldStats>,
    pub no2: Option<FieldStats>,
    pub point_count: i64,
}

/// Read-side view of a location's forecast
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ForecastView {
    pub summaries: Vec<ForecastDailySummary>,
    pub points: Vec<ForecastPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weather_fill_from_keeps_existing() {
        let mut primary = WeatherReading {
            temperature: Some(21.0),
            ..Default::default()
        };
        let other = WeatherReading {
            temperature: Some(25.0),
            humidity: Some(70.0),
            condition: Some("clouds".into()),
            ..Default::default()
        };
        primary.fill_from(&other);

        assert_eq!(primary.temperature, Some(21.0));
        assert_eq!(primary.humidity, Some(70.0));
        assert_eq!(primary.condition.as_deref(), Some("clouds"));
    }

    #[test]
    fn test_aqi_level_precedence() {
        let reading = PollutantReading {
            aqi: Some(160.0),
            pm25: Some(5.0),
            aqi_category: Some(1),
            ..Default::default()
        };
        assert_eq!(reading.aqi_level(), Some(AqiLevel::Unhealthy));

        let pm_only = PollutantReading {
            pm25: Some(5.0),
            ..Default::default()
        };
        assert_eq!(pm_only.aqi_level(), Some(AqiLevel::Good));

        let category_only = PollutantReading {
            aqi_category: Some(4),
            ..Default::default()
        };
        assert_eq!(category_only.aqi_level(), Some(AqiLevel::Unhealthy));

        assert_eq!(PollutantReading::default().aqi_level(), None);
    }

    #[test]
    fn test_resolution_parse_and_finer() {
        assert_eq!("daily".parse::<Resolution>(), Ok(Resolution::Daily));
        assert!("yearly".parse::<Resolution>().is_err());
        assert_eq!(Resolution::Hourly.finer(), None);
        assert_eq!(Resolution::Monthly.finer(), Some(Resolution::Daily));
        assert!(!Resolution::Hourly.keeps_distribution());
    }

    #[test]
    fn test_location_sources() {
        let mut loc = Location {
            id: "hn-01".into(),
            name: "Hoan Kiem".into(),
            latitude: 21.0285,
            longitude: 105.8542,
            radius_m: 2_000.0,
            sources: vec![],
            collection_interval_secs: 300,
            active: true,
            first_measurement: None,
            last_measurement: None,
            total_measurements: 0,
        };
        assert!(loc.uses_source("waqi"));
        loc.sources = vec!["openweather".into()];
        assert!(!loc.uses_source("waqi"));
        assert!(loc.uses_source("openweather"));
    }
}
