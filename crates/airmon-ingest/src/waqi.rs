//! WAQI adapter: nearest station pollutants and the daily pollutant forecast
//!
//! WAQI reports every pollutant as a US EPA sub-index rather than a
//! concentration. PM2.5 and PM10 are converted back to µg/m³ through the
//! breakpoint tables; gas sub-indices use per-station scales that do not map
//! onto OpenWeather's µg/m³ values and are not carried over.

use crate::http::{base_url, HttpFetcher};
use crate::{FeedClient, IngestError, IngestResult};
use airmon_core::{
    aqi_to_pm10, aqi_to_pm25, non_negative, valid_percent, valid_temperature,
    ForecastMeasurement, PollutantReading, RawMeasurement, Timestamp, WeatherReading,
    SECS_PER_HOUR,
};
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use url::Url;

pub const WAQI_SOURCE: &str = "waqi";
pub const WAQI_BASE_URL: &str = "https://api.waqi.info/";

pub struct WaqiClient {
    http: HttpFetcher,
    base: Url,
    token: String,
}

impl WaqiClient {
    pub fn new(http: HttpFetcher, base: &str, token: impl Into<String>) -> IngestResult<Self> {
        Ok(Self {
            http,
            base: base_url(base)?,
            token: token.into(),
        })
    }

    fn endpoint(&self, latitude: f64, longitude: f64) -> IngestResult<Url> {
        let mut url = self
            .base
            .join(&format!("feed/geo:{};{}/", latitude, longitude))
            .map_err(|e| IngestError::FeedError(e.to_string()))?;
        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url)
    }

    async fn fetch_feed(&self, latitude: f64, longitude: f64) -> IngestResult<FeedData> {
        let envelope: Envelope = self.http.get_json(self.endpoint(latitude, longitude)?).await?;
        envelope.into_data()
    }
}

#[async_trait::async_trait]
impl FeedClient for WaqiClient {
    fn source(&self) -> &str {
        WAQI_SOURCE
    }

    async fn fetch_current(&self, latitude: f64, longitude: f64) -> IngestResult<RawMeasurement> {
        current_measurement(self.fetch_feed(latitude, longitude).await?)
    }

    async fn fetch_forecast(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> IngestResult<Vec<ForecastMeasurement>> {
        Ok(daily_forecast(&self.fetch_feed(latitude, longitude).await?))
    }
}

/// `{"status": "ok", "data": {...}}`, or `{"status": "error", "data": "message"}`
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub status: String,
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn into_data(self) -> IngestResult<FeedData> {
        if self.status != "ok" {
            let message = self.data.as_str().unwrap_or("unknown error").to_string();
            return Err(IngestError::FeedError(format!("waqi: {}", message)));
        }
        Ok(serde_json::from_value(self.data)?)
    }
}

#[derive(Debug, Deserialize)]
pub struct FeedData {
    /// Overall index; WAQI sends "-" when the station has none
    #[serde(default)]
    pub aqi: serde_json::Value,
    pub city: City,
    pub time: StationTime,
    #[serde(default)]
    pub iaqi: HashMap<String, IaqiValue>,
    #[serde(default)]
    pub forecast: Option<Forecast>,
}

#[derive(Debug, Deserialize)]
pub struct City {
    /// `[lat, lon]` of the station
    #[serde(default)]
    pub geo: Vec<f64>,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct StationTime {
    /// Station-local wall clock encoded as epoch seconds
    pub v: Option<Timestamp>,
    /// RFC 3339 with the station offset
    pub iso: Option<String>,
}

impl StationTime {
    fn epoch(&self) -> Option<Timestamp> {
        self.iso
            .as_deref()
            .and_then(|iso| DateTime::parse_from_rfc3339(iso).ok())
            .map(|dt| dt.timestamp())
            .or(self.v)
    }
}

#[derive(Debug, Deserialize)]
pub struct IaqiValue {
    pub v: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct Forecast {
    #[serde(default)]
    pub daily: BTreeMap<String, Vec<DailyValue>>,
}

#[derive(Debug, Deserialize)]
pub struct DailyValue {
    pub avg: f64,
    pub day: String,
}

impl FeedData {
    fn iaqi(&self, key: &str) -> Option<f64> {
        self.iaqi.get(key).map(|v| v.v).filter(|v| v.is_finite())
    }
}

pub fn current_measurement(data: FeedData) -> IngestResult<RawMeasurement> {
    let (latitude, longitude) = match data.city.geo.as_slice() {
        [lat, lon, ..] => (*lat, *lon),
        _ => return Err(IngestError::InvalidPayload("station without coordinates".into())),
    };
    let observed_at = data
        .time
        .epoch()
        .ok_or_else(|| IngestError::InvalidPayload("station without time".into()))?;

    let pm25_index = non_negative(data.iaqi("pm25"));
    let pm10_index = non_negative(data.iaqi("pm10"));
    let pollutants = PollutantReading {
        aqi: non_negative(data.aqi.as_f64()),
        aqi_category: None,
        pm25: pm25_index.map(aqi_to_pm25),
        pm10: pm10_index.map(aqi_to_pm10),
        ..Default::default()
    };
    let weather = WeatherReading {
        temperature: valid_temperature(data.iaqi("t")),
        humidity: valid_percent(data.iaqi("h")),
        pressure: data.iaqi("p").filter(|p| *p > 0.0),
        wind_speed: non_negative(data.iaqi("w")),
        ..Default::default()
    };

    if pollutants.is_empty() && weather.is_empty() {
        return Err(IngestError::InvalidPayload(format!(
            "station {} reported no usable values",
            data.city.name
        )));
    }

    Ok(RawMeasurement {
        source: WAQI_SOURCE.to_string(),
        latitude,
        longitude,
        observed_at,
        weather: (!weather.is_empty()).then_some(weather),
        pollutants: (!pollutants.is_empty()).then_some(pollutants),
    })
}

/// One pollutant point per forecast day, stamped at 12:00 UTC
pub fn daily_forecast(data: &FeedData) -> Vec<ForecastMeasurement> {
    let Some(forecast) = data.forecast.as_ref() else {
        return Vec::new();
    };

    let mut days: BTreeMap<Timestamp, PollutantReading> = BTreeMap::new();
    for (key, values) in &forecast.daily {
        let convert: fn(f64) -> f64 = match key.as_str() {
            "pm25" => aqi_to_pm25,
            "pm10" => aqi_to_pm10,
            _ => continue,
        };
        for value in values {
            let Some(ts) = noon_utc(&value.day) else {
                debug!(day = %value.day, "unparseable forecast day");
                continue;
            };
            let Some(index) = non_negative(Some(value.avg)) else {
                continue;
            };
            let reading = days.entry(ts).or_default();
            let slot = if key == "pm25" {
                &mut reading.pm25
            } else {
                &mut reading.pm10
            };
            *slot = Some(convert(index));
            reading.aqi = Some(reading.aqi.map_or(index, |a: f64| a.max(index)));
        }
    }

    days.into_iter()
        .map(|(timestamp, pollutants)| ForecastMeasurement {
            source: WAQI_SOURCE.to_string(),
            timestamp,
            weather: None,
            pollutants: Some(pollutants),
        })
        .collect()
}

fn noon_utc(day: &str) -> Option<Timestamp> {
    let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp() + 12 * SECS_PER_HOUR)
}
