//! Change-detection filter in front of the raw store

use crate::types::{RawSample, SECS_PER_MINUTE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateThresholds {
    /// Accept unconditionally once this much time passed (seconds)
    pub max_silence_secs: i64,
    /// Absolute temperature change (°C)
    pub temperature_delta: f64,
    /// Relative PM2.5 change (0.10 = 10%)
    pub pm25_relative_delta: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            max_silence_secs: 30 * SECS_PER_MINUTE,
            temperature_delta: 2.0,
            pm25_relative_delta: 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    #[default]
    Enforce,
    /// Accept everything (bulk seeding, backfill)
    Bypass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptReason {
    Bypass,
    NoPrior,
    Stale,
    Temperature,
    Condition,
    RainTransition,
    AqiLevel,
    Pm25,
}

impl AcceptReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcceptReason::Bypass => "bypass",
            AcceptReason::NoPrior => "no_prior",
            AcceptReason::Stale => "stale",
            AcceptReason::Temperature => "temperature",
            AcceptReason::Condition => "condition",
            AcceptReason::RainTransition => "rain_transition",
            AcceptReason::AqiLevel => "aqi_level",
            AcceptReason::Pm25 => "pm25",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Accept(AcceptReason),
    Skip,
}

impl GateDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, GateDecision::Accept(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct WriteGate {
    thresholds: GateThresholds,
    mode: GateMode,
}

impl WriteGate {
    pub fn new(thresholds: GateThresholds, mode: GateMode) -> Self {
        Self { thresholds, mode }
    }

    pub fn mode(&self) -> GateMode {
        self.mode
    }

    /// Decide whether `candidate` differs enough from the last persisted
    /// sample to be stored. Field comparisons only apply when both samples
    /// carry the field.
    pub fn evaluate(&self, candidate: &RawSample, prior: Option<&RawSample>) -> GateDecision {
        if self.mode == GateMode::Bypass {
            return GateDecision::Accept(AcceptReason::Bypass);
        }
        let Some(prior) = prior else {
            return GateDecision::Accept(AcceptReason::NoPrior);
        };

        if candidate.timestamp - prior.timestamp > self.thresholds.max_silence_secs {
            return GateDecision::Accept(AcceptReason::Stale);
        }

        let (new_w, old_w) = (&candidate.weather, &prior.weather);
        if let (Some(new), Some(old)) = (new_w.temperature, old_w.temperature) {
            if (new - old).abs() > self.thresholds.temperature_delta {
                return GateDecision::Accept(AcceptReason::Temperature);
            }
        }
        if let (Some(new), Some(old)) = (&new_w.condition, &old_w.condition) {
            if new != old {
                return GateDecision::Accept(AcceptReason::Condition);
            }
        }
        let raining = |r: Option<f64>| r.unwrap_or(0.0) > 0.0;
        if raining(new_w.rain) != raining(old_w.rain) {
            return GateDecision::Accept(AcceptReason::RainTransition);
        }

        if let (Some(new), Some(old)) = (candidate.aqi_level, prior.aqi_level) {
            if new != old {
                return GateDecision::Accept(AcceptReason::AqiLevel);
            }
        }
        if let (Some(new), Some(old)) = (candidate.pollutants.pm25, prior.pollutants.pm25) {
            if self.pm25_changed(new, old) {
                return GateDecision::Accept(AcceptReason::Pm25);
            }
        }

        GateDecision::Skip
    }

    fn pm25_changed(&self, new: f64, old: f64) -> bool {
        if old.abs() < f64::EPSILON {
            return new.abs() >= f64::EPSILON;
        }
        ((new - old) / old).abs() > self.thresholds.pm25_relative_delta
    }
}
