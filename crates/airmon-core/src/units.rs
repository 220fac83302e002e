//! Air quality index levels and unit normalisation
//!
//! Breakpoints follow the US EPA tables for PM2.5 and PM10.

use serde::{Deserialize, Serialize};

/// Discrete AQI level (US EPA categories)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AqiLevel {
    Good,
    Moderate,
    UnhealthySensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiLevel {
    pub fn from_index(aqi: f64) -> Self {
        match aqi.round() as i64 {
            i64::MIN..=50 => AqiLevel::Good,
            51..=100 => AqiLevel::Moderate,
            101..=150 => AqiLevel::UnhealthySensitive,
            151..=200 => AqiLevel::Unhealthy,
            201..=300 => AqiLevel::VeryUnhealthy,
            _ => AqiLevel::Hazardous,
        }
    }

    /// Map a 1-5 category (Good, Fair, Moderate, Poor, Very Poor)
    pub fn from_category(category: u8) -> Option<Self> {
        match category {
            1 => Some(AqiLevel::Good),
            2 => Some(AqiLevel::Moderate),
            3 => Some(AqiLevel::UnhealthySensitive),
            4 => Some(AqiLevel::Unhealthy),
            5 => Some(AqiLevel::VeryUnhealthy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AqiLevel::Good => "good",
            AqiLevel::Moderate => "moderate",
            AqiLevel::UnhealthySensitive => "unhealthy_sensitive",
            AqiLevel::Unhealthy => "unhealthy",
            AqiLevel::VeryUnhealthy => "very_unhealthy",
            AqiLevel::Hazardous => "hazardous",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "good" => Some(AqiLevel::Good),
            "moderate" => Some(AqiLevel::Moderate),
            "unhealthy_sensitive" => Some(AqiLevel::UnhealthySensitive),
            "unhealthy" => Some(AqiLevel::Unhealthy),
            "very_unhealthy" => Some(AqiLevel::VeryUnhealthy),
            "hazardous" => Some(AqiLevel::Hazardous),
            _ => None,
        }
    }
}

/// (concentration low, concentration high, index low, index high)
type Breakpoint = (f64, f64, f64, f64);

const PM25_BREAKPOINTS: [Breakpoint; 7] = [
    (0.0, 12.0, 0.0, 50.0),
    (12.1, 35.4, 51.0, 100.0),
    (35.5, 55.4, 101.0, 150.0),
    (55.5, 150.4, 151.0, 200.0),
    (150.5, 250.4, 201.0, 300.0),
    (250.5, 350.4, 301.0, 400.0),
    (350.5, 500.4, 401.0, 500.0),
];

const PM10_BREAKPOINTS: [Breakpoint; 7] = [
    (0.0, 54.0, 0.0, 50.0),
    (55.0, 154.0, 51.0, 100.0),
    (155.0, 254.0, 101.0, 150.0),
    (255.0, 354.0, 151.0, 200.0),
    (355.0, 424.0, 201.0, 300.0),
    (425.0, 504.0, 301.0, 400.0),
    (505.0, 604.0, 401.0, 500.0),
];

fn concentration_to_index(c: f64, table: &[Breakpoint], precision: f64) -> f64 {
    let c = (c.max(0.0) * precision + 1e-9).floor() / precision;
    for &(c_lo, c_hi, i_lo, i_hi) in table {
        if c <= c_hi {
            let c = c.max(c_lo);
            return ((i_hi - i_lo) / (c_hi - c_lo) * (c - c_lo) + i_lo).round();
        }
    }
    500.0
}

fn index_to_concentration(index: f64, table: &[Breakpoint]) -> f64 {
    let index = index.max(0.0);
    for &(c_lo, c_hi, i_lo, i_hi) in table {
        if index <= i_hi {
            let index = index.max(i_lo);
            return (c_hi - c_lo) / (i_hi - i_lo) * (index - i_lo) + c_lo;
        }
    }
    table.last().map(|bp| bp.1).unwrap_or(0.0)
}

/// PM2.5 concentration (µg/m³) to AQI
pub fn pm25_to_aqi(concentration: f64) -> f64 {
    concentration_to_index(concentration, &PM25_BREAKPOINTS, 10.0)
}

/// PM2.5 sub-index to an approximate concentration (µg/m³)
pub fn aqi_to_pm25(index: f64) -> f64 {
    index_to_concentration(index, &PM25_BREAKPOINTS)
}

/// PM10 sub-index to an approximate concentration (µg/m³)
pub fn aqi_to_pm10(index: f64) -> f64 {
    index_to_concentration(index, &PM10_BREAKPOINTS)
}

pub fn kelvin_to_celsius(kelvin: f64) -> f64 {
    kelvin - 273.15
}

/// Relative humidity outside 0..=100 is discarded
pub fn valid_percent(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && (0.0..=100.0).contains(v))
}

/// Negative or non-finite concentrations/amounts are discarded
pub fn non_negative(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

/// Temperatures outside the plausible surface range are discarded
pub fn valid_temperature(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && (-90.0..=60.0).contains(v))
}
