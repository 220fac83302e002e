//! Simulated feed for local runs and tests

use crate::{FeedClient, IngestResult};
use airmon_core::{
    ForecastMeasurement, PollutantReading, RawMeasurement, Timestamp, WeatherReading,
    SECS_PER_DAY, SECS_PER_HOUR,
};
use std::f64::consts::TAU;

/// Feed that synthesises a smooth diurnal cycle. Output depends only on
/// the coordinate and the clock, so a fixed clock gives fixed readings.
pub struct SimulatorFeed {
    name: String,
    /// Station displacement from the requested coordinate, in degrees
    offset_deg: f64,
    /// Reporting delay applied to the observation time
    lag_secs: i64,
    clock: Option<Timestamp>,
}

impl SimulatorFeed {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            offset_deg: 0.0,
            lag_secs: 0,
            clock: None,
        }
    }

    /// Report from a station displaced north by `offset_deg` and `lag_secs` late
    pub fn with_station_offset(mut self, offset_deg: f64, lag_secs: i64) -> Self {
        self.offset_deg = offset_deg;
        self.lag_secs = lag_secs;
        self
    }

    /// Freeze the clock
    pub fn at(mut self, now: Timestamp) -> Self {
        self.clock = Some(now);
        self
    }

    fn now(&self) -> Timestamp {
        self.clock
            .unwrap_or_else(|| chrono::Utc::now().timestamp())
    }

    fn weather_at(&self, latitude: f64, ts: Timestamp) -> WeatherReading {
        let phase = diurnal_phase(ts);
        let temperature = 30.0 - latitude.abs() * 0.2 + 4.0 * phase.sin();
        let rain = if (ts / (6 * SECS_PER_HOUR)) % 4 == 0 { 0.6 } else { 0.0 };
        WeatherReading {
            temperature: Some(round1(temperature)),
            humidity: Some(round1(70.0 - 10.0 * phase.sin())),
            pressure: Some(round1(1010.0 + 2.0 * phase.cos())),
            wind_speed: Some(round1(2.5 + phase.cos().abs())),
            wind_direction: Some(((ts / SECS_PER_HOUR) * 15 % 360) as f64),
            rain: Some(rain),
            condition: Some(if rain > 0.0 { "rain" } else { "clouds" }.to_string()),
        }
    }

    fn pollutants_at(&self, longitude: f64, ts: Timestamp) -> PollutantReading {
        let phase = diurnal_phase(ts);
        let pm25 = 35.0 + (longitude.abs() % 10.0) + 15.0 * phase.cos();
        PollutantReading {
            aqi: None,
            aqi_category: None,
            pm25: Some(round1(pm25)),
            pm10: Some(round1(pm25 * 1.6)),
            co: Some(round1(600.0 + 100.0 * phase.cos())),
            no2: Some(round1(25.0 + 10.0 * phase.cos())),
            o3: Some(round1(40.0 + 20.0 * phase.sin())),
            so2: Some(8.0),
            nh3: None,
        }
    }
}

fn diurnal_phase(ts: Timestamp) -> f64 {
    (ts.rem_euclid(SECS_PER_DAY) as f64 / SECS_PER_DAY as f64) * TAU
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[async_trait::async_trait]
impl FeedClient for SimulatorFeed {
    fn source(&self) -> &str {
        &self.name
    }

    async fn fetch_current(&self, latitude: f64, longitude: f64) -> IngestResult<RawMeasurement> {
        let observed_at = self.now() - self.lag_secs;
        Ok(RawMeasurement {
            source: self.name.clone(),
            latitude: latitude + self.offset_deg,
            longitude,
            observed_at,
            weather: Some(self.weather_at(latitude, observed_at)),
            pollutants: Some(self.pollutants_at(longitude, observed_at)),
        })
    }

    async fn fetch_forecast(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> IngestResult<Vec<ForecastMeasurement>> {
        let start = self.now() - self.now().rem_euclid(SECS_PER_HOUR) + SECS_PER_HOUR;
        Ok((0..40)
            .map(|i| {
                let ts = start + i * 3 * SECS_PER_HOUR;
                ForecastMeasurement {
                    source: self.name.clone(),
                    timestamp: ts,
                    weather: Some(self.weather_at(latitude, ts)),
                    pollutants: Some(self.pollutants_at(longitude, ts)),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_clock_is_deterministic() {
        let feed = SimulatorFeed::new("simulator").at(1_700_000_000);
        let a = feed.fetch_current(21.0, 105.8).await.unwrap();
        let b = feed.fetch_current(21.0, 105.8).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(a.observed_at, 1_700_000_000);
        assert_eq!(a.source, "simulator");
        assert!(a.weather.unwrap().temperature.is_some());
        assert!(a.pollutants.unwrap().pm25.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_station_offset() {
        let feed = SimulatorFeed::new("waqi")
            .with_station_offset(0.0005, 120)
            .at(1_700_000_000);
        let m = feed.fetch_current(21.0, 105.8).await.unwrap();
        assert_eq!(m.observed_at, 1_699_999_880);
        assert!((m.latitude - 21.0005).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_forecast_series() {
        let feed = SimulatorFeed::new("simulator").at(1_700_000_100);
        let points = feed.fetch_forecast(21.0, 105.8).await.unwrap();
        assert_eq!(points.len(), 40);
        assert_eq!(points[0].timestamp % SECS_PER_HOUR, 0);
        assert!(points[0].timestamp > 1_700_000_100);
        assert!(points.windows(2).all(|w| w[1].timestamp - w[0].timestamp == 10_800));
    }
}
