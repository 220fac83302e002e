//! OpenWeather adapter: current weather, air pollution and both forecasts

use crate::http::{base_url, HttpFetcher};
use crate::{FeedClient, IngestError, IngestResult};
use airmon_core::{
    kelvin_to_celsius, non_negative, valid_percent, valid_temperature, ForecastMeasurement,
    PollutantReading, RawMeasurement, Timestamp, WeatherReading,
};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

pub const OPENWEATHER_SOURCE: &str = "openweather";
pub const OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5/";

pub struct OpenWeatherClient {
    http: HttpFetcher,
    base: Url,
    api_key: String,
}

impl OpenWeatherClient {
    pub fn new(http: HttpFetcher, base: &str, api_key: impl Into<String>) -> IngestResult<Self> {
        Ok(Self {
            http,
            base: base_url(base)?,
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, path: &str, latitude: f64, longitude: f64) -> IngestResult<Url> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| IngestError::FeedError(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("lat", &latitude.to_string())
            .append_pair("lon", &longitude.to_string())
            .append_pair("appid", &self.api_key);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl FeedClient for OpenWeatherClient {
    fn source(&self) -> &str {
        OPENWEATHER_SOURCE
    }

    async fn fetch_current(&self, latitude: f64, longitude: f64) -> IngestResult<RawMeasurement> {
        let weather_url = self.endpoint("weather", latitude, longitude)?;
        let air_url = self.endpoint("air_pollution", latitude, longitude)?;
        let (weather, air) = tokio::join!(
            self.http.get_json::<CurrentWeather>(weather_url),
            self.http.get_json::<AirPollution>(air_url),
        );

        // Either half may be missing; only both failing is an error
        match (weather, air) {
            (Err(we), Err(ae)) => {
                debug!(error = %ae, "air pollution request failed");
                Err(we)
            }
            (weather, air) => {
                let weather = weather
                    .map_err(|e| warn!(error = %e, "openweather weather unavailable"))
                    .ok();
                let air = air
                    .map_err(|e| warn!(error = %e, "openweather air pollution unavailable"))
                    .ok();
                current_measurement(weather, air, latitude, longitude)
            }
        }
    }

    async fn fetch_forecast(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> IngestResult<Vec<ForecastMeasurement>> {
        let weather_url = self.endpoint("forecast", latitude, longitude)?;
        let air_url = self.endpoint("air_pollution/forecast", latitude, longitude)?;
        let (weather, air) = tokio::join!(
            self.http.get_json::<ForecastList>(weather_url),
            self.http.get_json::<ForecastList>(air_url),
        );

        let mut points = Vec::new();
        match weather {
            Ok(list) => points.extend(weather_forecast(list)),
            Err(e) => warn!(error = %e, "openweather forecast unavailable"),
        }
        match air {
            Ok(list) => points.extend(air_forecast(list)),
            Err(e) => warn!(error = %e, "openweather air pollution forecast unavailable"),
        }
        Ok(points)
    }
}

// Payloads. Every field is optional so one missing value never drops a record.

#[derive(Debug, Deserialize)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Deserialize)]
pub struct Condition {
    pub main: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MainBlock {
    /// Kelvin
    pub temp: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Wind {
    pub speed: Option<f64>,
    pub deg: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Rain {
    #[serde(rename = "1h")]
    pub one_hour: Option<f64>,
    #[serde(rename = "3h")]
    pub three_hours: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CurrentWeather {
    pub coord: Option<Coord>,
    pub dt: Timestamp,
    #[serde(default)]
    pub weather: Vec<Condition>,
    #[serde(default)]
    pub main: MainBlock,
    #[serde(default)]
    pub wind: Wind,
    #[serde(default)]
    pub rain: Rain,
}

#[derive(Debug, Deserialize)]
pub struct AqiCategory {
    pub aqi: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Components {
    pub co: Option<f64>,
    pub no2: Option<f64>,
    pub o3: Option<f64>,
    pub so2: Option<f64>,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub nh3: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct AirEntry {
    pub dt: Timestamp,
    pub main: Option<AqiCategory>,
    #[serde(default)]
    pub components: Components,
}

#[derive(Debug, Deserialize)]
pub struct AirPollution {
    pub coord: Option<Coord>,
    #[serde(default)]
    pub list: Vec<AirEntry>,
}

/// Entry of either forecast list, kept as raw JSON so a malformed entry
/// only loses itself
#[derive(Debug, Deserialize)]
pub struct ForecastList {
    #[serde(default)]
    pub list: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct WeatherForecastEntry {
    pub dt: Timestamp,
    #[serde(default)]
    pub weather: Vec<Condition>,
    #[serde(default)]
    pub main: MainBlock,
    #[serde(default)]
    pub wind: Wind,
    #[serde(default)]
    pub rain: Rain,
}

fn weather_reading(
    main: &MainBlock,
    wind: &Wind,
    rain: &Rain,
    conditions: &[Condition],
) -> WeatherReading {
    WeatherReading {
        temperature: valid_temperature(main.temp.map(kelvin_to_celsius)),
        humidity: valid_percent(main.humidity),
        pressure: main.pressure.filter(|p| p.is_finite() && *p > 0.0),
        wind_speed: non_negative(wind.speed),
        wind_direction: wind.deg.filter(|d| (0.0..=360.0).contains(d)),
        rain: non_negative(rain.one_hour.or(rain.three_hours)),
        condition: conditions.first().map(|c| c.main.to_lowercase()),
    }
}

fn pollutant_reading(entry: &AirEntry) -> PollutantReading {
    let c = &entry.components;
    PollutantReading {
        aqi: None,
        aqi_category: entry
            .main
            .as_ref()
            .and_then(|m| m.aqi)
            .filter(|a| (1..=5).contains(a)),
        pm25: non_negative(c.pm2_5),
        pm10: non_negative(c.pm10),
        co: non_negative(c.co),
        no2: non_negative(c.no2),
        o3: non_negative(c.o3),
        so2: non_negative(c.so2),
        nh3: non_negative(c.nh3),
    }
}

/// Combine the two current-conditions payloads into one measurement. The
/// weather payload supplies coordinate and time when present.
pub fn current_measurement(
    weather: Option<CurrentWeather>,
    air: Option<AirPollution>,
    latitude: f64,
    longitude: f64,
) -> IngestResult<RawMeasurement> {
    let air_entry = air.as_ref().and_then(|a| a.list.first());
    let (lat, lon) = weather
        .as_ref()
        .and_then(|w| w.coord.as_ref())
        .or_else(|| air.as_ref().and_then(|a| a.coord.as_ref()))
        .map_or((latitude, longitude), |c| (c.lat, c.lon));
    let observed_at = weather
        .as_ref()
        .map(|w| w.dt)
        .or_else(|| air_entry.map(|e| e.dt))
        .ok_or_else(|| IngestError::InvalidPayload("no observation time".into()))?;

    let weather = weather
        .map(|w| weather_reading(&w.main, &w.wind, &w.rain, &w.weather))
        .filter(|w| !w.is_empty());
    let pollutants = air_entry.map(pollutant_reading).filter(|p| !p.is_empty());
    if weather.is_none() && pollutants.is_none() {
        return Err(IngestError::InvalidPayload("no usable values".into()));
    }

    Ok(RawMeasurement {
        source: OPENWEATHER_SOURCE.to_string(),
        latitude: lat,
        longitude: lon,
        observed_at,
        weather,
        pollutants,
    })
}

pub fn weather_forecast(list: ForecastList) -> Vec<ForecastMeasurement> {
    let total = list.list.len();
    let points: Vec<_> = list
        .list
        .into_iter()
        .filter_map(|v| serde_json::from_value::<WeatherForecastEntry>(v).ok())
        .map(|e| ForecastMeasurement {
            source: OPENWEATHER_SOURCE.to_string(),
            timestamp: e.dt,
            weather: Some(weather_reading(&e.main, &e.wind, &e.rain, &e.weather)),
            pollutants: None,
        })
        .collect();
    if points.len() < total {
        debug!(dropped = total - points.len(), "malformed weather forecast entries");
    }
    points
}

pub fn air_forecast(list: ForecastList) -> Vec<ForecastMeasurement> {
    let total = list.list.len();
    let points: Vec<_> = list
        .list
        .into_iter()
        .filter_map(|v| serde_json::from_value::<AirEntry>(v).ok())
        .map(|e| ForecastMeasurement {
            source: OPENWEATHER_SOURCE.to_string(),
            timestamp: e.dt,
            pollutants: Some(pollutant_reading(&e)),
            weather: None,
        })
        .collect();
    if points.len() < total {
        debug!(dropped = total - points.len(), "malformed air forecast entries");
    }
    points
}
