//! Reconciliation of two feeds' readings into one canonical reading

use crate::geo::haversine_m;
use crate::types::{
    MatchKind, PollutantReading, Provenance, RawMeasurement, RawSample, SecondaryObservation,
    SourceObservation, Timestamp, WeatherReading,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MergeConfig {
    /// Readings closer than this are from the same place (meters)
    pub same_location_m: f64,
    /// Readings closer than this in time are simultaneous (seconds)
    pub same_time_secs: i64,
    /// Let the pollutant-primary source also win weather fields
    pub primary_wins_weather: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            same_location_m: 1_000.0,
            same_time_secs: 600,
            primary_wins_weather: false,
        }
    }
}

/// Merged reading for one location-cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalReading {
    pub weather: WeatherReading,
    pub pollutants: PollutantReading,
    pub provenance: Provenance,
    pub secondary: Vec<SecondaryObservation>,
}

impl CanonicalReading {
    pub fn into_sample(
        self,
        location_id: &str,
        timestamp: Timestamp,
        created_at: Timestamp,
    ) -> RawSample {
        let aqi_level = self.pollutants.aqi_level();
        RawSample {
            location_id: location_id.to_string(),
            timestamp,
            weather: self.weather,
            pollutants: self.pollutants,
            aqi_level,
            provenance: self.provenance,
            secondary: self.secondary,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceMerger {
    config: MergeConfig,
}

impl SourceMerger {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Classify two readings by distance and time offset
    pub fn classify(&self, a: &RawMeasurement, b: &RawMeasurement) -> (MatchKind, f64, i64) {
        let distance = haversine_m(a.latitude, a.longitude, b.latitude, b.longitude);
        let delta = (a.observed_at - b.observed_at).abs();
        let same_location = distance < self.config.same_location_m;
        let same_time = delta < self.config.same_time_secs;
        let kind = if same_location && same_time {
            MatchKind::SameMeasurement
        } else {
            MatchKind::DistinctMeasurements
        };
        (kind, distance, delta)
    }

    /// Merge the secondary (Source A) and primary (Source B) readings.
    ///
    /// The primary source wins every overlapping pollutant field. Returns
    /// `None` when neither source responded.
    pub fn merge(
        &self,
        secondary: Option<RawMeasurement>,
        primary: Option<RawMeasurement>,
    ) -> Option<CanonicalReading> {
        match (secondary, primary) {
            (None, None) => None,
            (Some(only), None) | (None, Some(only)) => Some(single_source(only)),
            (Some(a), Some(b)) => Some(self.merge_pair(a, b)),
        }
    }

    fn merge_pair(&self, a: RawMeasurement, b: RawMeasurement) -> CanonicalReading {
        let (kind, distance, delta) = self.classify(&a, &b);

        let a_pollutants = a.pollutants.clone().unwrap_or_default();
        let mut pollutants = b.pollutants.clone().unwrap_or_default();
        let overridden = overlay_pollutants(&mut pollutants, &a_pollutants);

        let (preferred, fallback) = if self.config.primary_wins_weather {
            (b.weather.as_ref(), a.weather.as_ref())
        } else {
            (a.weather.as_ref(), b.weather.as_ref())
        };
        let mut weather = preferred.cloned().unwrap_or_default();
        if let Some(other) = fallback {
            weather.fill_from(other);
        }

        let mut secondary = Vec::new();
        if kind == MatchKind::DistinctMeasurements && !overridden.is_empty() {
            secondary.push(SecondaryObservation {
                source: a.source.clone(),
                latitude: a.latitude,
                longitude: a.longitude,
                observed_at: a.observed_at,
                pollutants: overridden,
            });
        }

        CanonicalReading {
            weather,
            pollutants,
            provenance: Provenance {
                sources: vec![b.source.clone(), a.source.clone()],
                kind,
                distance_m: Some(distance),
                time_delta_secs: Some(delta),
                observed: vec![observation(&b), observation(&a)],
            },
            secondary,
        }
    }
}

fn observation(m: &RawMeasurement) -> SourceObservation {
    SourceObservation {
        source: m.source.clone(),
        latitude: m.latitude,
        longitude: m.longitude,
        observed_at: m.observed_at,
    }
}

fn single_source(m: RawMeasurement) -> CanonicalReading {
    let observed = observation(&m);
    CanonicalReading {
        weather: m.weather.unwrap_or_default(),
        pollutants: m.pollutants.unwrap_or_default(),
        provenance: Provenance {
            sources: vec![m.source],
            kind: MatchKind::SingleSource,
            distance_m: None,
            time_delta_secs: None,
            observed: vec![observed],
        },
        secondary: Vec::new(),
    }
}

/// Fill `primary`'s gaps from `other`; returns the `other` values that lost
/// to a primary value on an overlapping field.
fn overlay_pollutants(primary: &mut PollutantReading, other: &PollutantReading) -> PollutantReading {
    let mut lost = PollutantReading::default();
    overlay(&mut primary.aqi, other.aqi, &mut lost.aqi);
    overlay(&mut primary.pm25, other.pm25, &mut lost.pm25);
    overlay(&mut primary.pm10, other.pm10, &mut lost.pm10);
    overlay(&mut primary.co, other.co, &mut lost.co);
    overlay(&mut primary.no2, other.no2, &mut lost.no2);
    overlay(&mut primary.o3, other.o3, &mut lost.o3);
    overlay(&mut primary.so2, other.so2, &mut lost.so2);
    overlay(&mut primary.nh3, other.nh3, &mut lost.nh3);
    match (primary.aqi_category, other.aqi_category) {
        (None, c) => primary.aqi_category = c,
        (Some(_), Some(c)) => lost.aqi_category = Some(c),
        (Some(_), None) => {}
    }
    lost
}

fn overlay(slot: &mut Option<f64>, other: Option<f64>, lost: &mut Option<f64>) {
    match (*slot, other) {
        (None, v) => *slot = v,
        (Some(_), Some(v)) => *lost = Some(v),
        (Some(_), None) => {}
    }
}
