//! Alignment of weather and pollutant forecast series, and per-day summaries

use crate::rollups::{Accumulator, ModeCounter};
use crate::types::{
    ForecastDailySummary, ForecastMeasurement, ForecastPoint, PollutantReading, Timestamp,
    WeatherReading, SECS_PER_HOUR,
};
use chrono::{DateTime, NaiveDate};
use std::collections::BTreeMap;

/// Weather point with the pollutant prediction matched to it, if any
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPoint {
    pub timestamp: Timestamp,
    pub weather: WeatherReading,
    pub pollutants: Option<PollutantReading>,
}

#[derive(Debug, Clone)]
pub struct ForecastOrganizer {
    tolerance_secs: i64,
}

impl Default for ForecastOrganizer {
    fn default() -> Self {
        Self {
            tolerance_secs: SECS_PER_HOUR,
        }
    }
}

impl ForecastOrganizer {
    pub fn new(tolerance_secs: i64) -> Self {
        Self { tolerance_secs }
    }

    /// Match every weather point to the pollutant point at the same
    /// timestamp, or to the closest one within the tolerance. Duplicate
    /// timestamps keep their first occurrence.
    pub fn align(
        &self,
        weather: &[ForecastMeasurement],
        pollutants: &[ForecastMeasurement],
    ) -> Vec<AlignedPoint> {
        let pollutant_series = dedup_series(pollutants, |m| m.pollutants.as_ref());
        let weather_series = dedup_series(weather, |m| m.weather.as_ref());

        weather_series
            .into_iter()
            .map(|(timestamp, reading)| AlignedPoint {
                timestamp,
                weather: reading.clone(),
                pollutants: self.closest(&pollutant_series, timestamp).cloned(),
            })
            .collect()
    }

    fn closest<'a>(
        &self,
        series: &'a [(Timestamp, &'a PollutantReading)],
        target: Timestamp,
    ) -> Option<&'a PollutantReading> {
        let idx = series.partition_point(|(ts, _)| *ts < target);
        if let Some((ts, reading)) = series.get(idx) {
            if *ts == target {
                return Some(*reading);
            }
        }
        let before = idx.checked_sub(1).and_then(|i| series.get(i));
        let after = series.get(idx);
        let candidate = match (before, after) {
            (Some(b), Some(a)) => {
                if target - b.0 <= a.0 - target {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (Some(b), None) => Some(b),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        }?;
        ((candidate.0 - target).abs() <= self.tolerance_secs).then_some(candidate.1)
    }

    /// Group aligned points by UTC calendar date and summarise each day
    pub fn summarize(&self, location_id: &str, points: &[AlignedPoint]) -> Vec<ForecastDailySummary> {
        let mut days: BTreeMap<NaiveDate, Vec<&AlignedPoint>> = BTreeMap::new();
        for point in points {
            if let Some(date) = utc_date(point.timestamp) {
                days.entry(date).or_default().push(point);
            }
        }

        days.into_iter()
            .map(|(date, day_points)| summarize_day(location_id, date, &day_points))
            .collect()
    }

    /// Align, then build the persisted points and summaries for a location
    pub fn organize(
        &self,
        location_id: &str,
        weather: &[ForecastMeasurement],
        pollutants: &[ForecastMeasurement],
        generated_at: Timestamp,
        valid_until: Timestamp,
    ) -> (Vec<ForecastPoint>, Vec<ForecastDailySummary>) {
        let aligned = self.align(weather, pollutants);
        let summaries = self.summarize(location_id, &aligned);
        let points = aligned
            .into_iter()
            .map(|p| ForecastPoint {
                location_id: location_id.to_string(),
                timestamp: p.timestamp,
                weather: Some(p.weather),
                pollutants: p.pollutants,
                generated_at,
                valid_until,
            })
            .collect();
        (points, summaries)
    }
}

fn dedup_series<'a, T>(
    series: &'a [ForecastMeasurement],
    part: impl Fn(&'a ForecastMeasurement) -> Option<&'a T>,
) -> Vec<(Timestamp, &'a T)> {
    let mut by_time: BTreeMap<Timestamp, &'a T> = BTreeMap::new();
    for m in series {
        if let Some(reading) = part(m) {
            by_time.entry(m.timestamp).or_insert(reading);
        }
    }
    by_time.into_iter().collect()
}

pub fn utc_date(ts: Timestamp) -> Option<NaiveDate> {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive())
}

fn summarize_day(location_id: &str, date: NaiveDate, points: &[&AlignedPoint]) -> ForecastDailySummary {
    let mut temp = Accumulator::new();
    let mut rain = Accumulator::new();
    let mut conditions = ModeCounter::new();
    let mut aqi = Accumulator::new();
    let mut pm25 = Accumulator::new();
    let mut pm10 = Accumulator::new();
    let mut o3 = Accumulator::new();
    let mut no2 = Accumulator::new();

    for point in points {
        temp.add_opt(point.weather.temperature);
        rain.add_opt(point.weather.rain);
        if let Some(c) = &point.weather.condition {
            conditions.add(c.clone());
        }
        if let Some(p) = &point.pollutants {
            aqi.add_opt(p.aqi);
            pm25.add_opt(p.pm25);
            pm10.add_opt(p.pm10);
            o3.add_opt(p.o3);
            no2.add_opt(p.no2);
        }
    }

    let temp_stats = temp.result();
    let rain_total = rain.sum().unwrap_or(0.0);
    ForecastDailySummary {
        location_id: location_id.to_string(),
        date,
        temp_min: temp_stats.map(|s| s.min),
        temp_max: temp_stats.map(|s| s.max),
        temp_avg: temp_stats.map(|s| s.avg),
        condition: conditions.mode(),
        rain_total,
        will_rain: rain_total > 0.0,
        aqi: aqi.result(),
        pm25: pm25.result(),
        pm10: pm10.result(),
        o3: o3.result(),
        no2: no2.result(),
        point_count: points.len() as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-03-01 00:00:00 UTC
    const DAY: Timestamp = 1_709_251_200;

    fn weather_at(ts: Timestamp, temp: f64, condition: &str, rain: f64) -> ForecastMeasurement {
        ForecastMeasurement {
            source: "openweather".into(),
            timestamp: ts,
            weather: Some(WeatherReading {
                temperature: Some(temp),
                condition: Some(condition.into()),
                rain: Some(rain),
                ..Default::default()
            }),
            pollutants: None,
        }
    }

    fn pm_at(ts: Timestamp, pm25: f64) -> ForecastMeasurement {
        ForecastMeasurement {
            source: "waqi".into(),
            timestamp: ts,
            weather: None,
            pollutants: Some(PollutantReading {
                pm25: Some(pm25),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_exact_match_preferred() {
        let organizer = ForecastOrganizer::default();
        let weather = vec![weather_at(DAY + 3 * 3600, 25.0, "clear", 0.0)];
        let pollutants = vec![
            pm_at(DAY + 3 * 3600 - 1800, 10.0),
            pm_at(DAY + 3 * 3600, 20.0),
        ];
        let aligned = organizer.align(&weather, &pollutants);
        assert_eq!(aligned.len(), 1);
        assert_eq!(aligned[0].pollutants.as_ref().unwrap().pm25, Some(20.0));
    }

    #[test]
    fn test_closest_within_tolerance() {
        let organizer = ForecastOrganizer::default();
        let weather = vec![weather_at(DAY + 6 * 3600, 25.0, "clear", 0.0)];
        let pollutants = vec![
            pm_at(DAY + 6 * 3600 - 2400, 10.0),
            pm_at(DAY + 6 * 3600 + 1200, 30.0),
        ];
        let aligned = organizer.align(&weather, &pollutants);
        assert_eq!(aligned[0].pollutants.as_ref().unwrap().pm25, Some(30.0));
    }

    #[test]
    fn test_equidistant_prefers_earlier() {
        let organizer = ForecastOrganizer::default();
        let weather = vec![weather_at(DAY + 6 * 3600, 25.0, "clear", 0.0)];
        let pollutants = vec![
            pm_at(DAY + 6 * 3600 - 1800, 10.0),
            pm_at(DAY + 6 * 3600 + 1800, 30.0),
        ];
        let aligned = organizer.align(&weather, &pollutants);
        assert_eq!(aligned[0].pollutants.as_ref().unwrap().pm25, Some(10.0));
    }

    #[test]
    fn test_unmatched_keeps_null_pollutants() {
        let organizer = ForecastOrganizer::default();
        let weather = vec![weather_at(DAY + 9 * 3600, 25.0, "clear", 0.0)];
        let pollutants = vec![pm_at(DAY + 9 * 3600 + 3601, 10.0)];
        let aligned = organizer.align(&weather, &pollutants);
        assert_eq!(aligned.len(), 1);
        assert!(aligned[0].pollutants.is_none());
    }

    #[test]
    fn test_daily_summary() {
        let organizer = ForecastOrganizer::default();
        let weather = vec![
            weather_at(DAY, 20.0, "clouds", 0.0),
            weather_at(DAY + 3 * 3600, 24.0, "rain", 1.5),
            weather_at(DAY + 6 * 3600, 28.0, "rain", 0.5),
            weather_at(DAY + 86_400, 30.0, "clear", 0.0),
        ];
        let pollutants = vec![pm_at(DAY, 10.0), pm_at(DAY + 3 * 3600, 30.0)];

        let (points, summaries) =
            organizer.organize("hn-01", &weather, &pollutants, DAY - 600, DAY + 6 * 3600);
        assert_eq!(points.len(), 4);
        assert!(points.iter().all(|p| p.generated_at == DAY - 600));
        assert_eq!(summaries.len(), 2);

        let first = &summaries[0];
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(first.temp_min, Some(20.0));
        assert_eq!(first.temp_max, Some(28.0));
        assert_eq!(first.temp_avg, Some(24.0));
        assert_eq!(first.condition.as_deref(), Some("rain"));
        assert_eq!(first.rain_total, 2.0);
        assert!(first.will_rain);
        assert_eq!(first.pm25.unwrap().avg, 20.0);
        assert_eq!(first.point_count, 3);

        let second = &summaries[1];
        assert!(!second.will_rain);
        assert!(second.pm25.is_none());
    }
}
