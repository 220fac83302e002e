//! Cascading rollups: raw → hourly → daily → weekly / monthly

use crate::bucket::{bucket_end, bucket_start, buckets_between, previous_bucket};
use crate::{ArchiveError, ArchiveResult};
use airmon_core::{
    best_and_worst, Accumulator, Aggregate, AirStats, AqiLevel, Location, ModeCounter, RawSample,
    Resolution, Timestamp, WeatherStats, SECS_PER_DAY,
};
use airmon_db::DbClient;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

/// Outcome of one scheduled aggregation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationReport {
    pub written: u64,
    pub empty: u64,
    pub failed: u64,
}

/// Single aggregation engine for every resolution. Each bucket is computed
/// from persisted data only and written with an upsert, so recomputing a
/// bucket any number of times leaves the same row.
#[derive(Clone)]
pub struct Rollup {
    db: DbClient,
    clock: fn() -> Timestamp,
    /// How far back the first scheduled pass reaches
    catch_up_secs: i64,
    /// Time of the last pass that finished without failures
    last_pass: Arc<Mutex<Option<Timestamp>>>,
}

fn wall_clock() -> Timestamp {
    chrono::Utc::now().timestamp()
}

impl Rollup {
    pub fn new(db: DbClient) -> Self {
        Self {
            db,
            clock: wall_clock,
            catch_up_secs: 2 * SECS_PER_DAY,
            last_pass: Arc::new(Mutex::new(None)),
        }
    }

    /// Set the look-back of the first scheduled pass. It should cover the
    /// raw retention window so a restart never leaves hours unaggregated.
    pub fn with_catch_up(mut self, secs: i64) -> Self {
        self.catch_up_secs = secs.max(0);
        self
    }

    /// Override the clock used for `created_at` of new rows
    pub fn with_clock(mut self, clock: fn() -> Timestamp) -> Self {
        self.clock = clock;
        self
    }

    /// Compute and store one bucket. Returns `None` without writing when
    /// the bucket has no inputs.
    #[instrument(skip(self))]
    pub async fn aggregate_bucket(
        &self,
        location_id: &str,
        resolution: Resolution,
        bucket_start: Timestamp,
    ) -> ArchiveResult<Option<Aggregate>> {
        self.rollup(location_id, resolution, bucket_start, (self.clock)())
            .await
    }

    async fn rollup(
        &self,
        location_id: &str,
        resolution: Resolution,
        start: Timestamp,
        created_at: Timestamp,
    ) -> ArchiveResult<Option<Aggregate>> {
        if bucket_start(resolution, start)? != start {
            return Err(ArchiveError::AggregationError(format!(
                "{} is not the start of a {} bucket",
                start, resolution
            )));
        }
        let end = bucket_end(resolution, start)?;

        let mut folder = Folder::default();
        match resolution.finer() {
            None => {
                let samples = self.db.get_raw_range(location_id, start, end).await?;
                samples.iter().for_each(|s| folder.add_sample(s));
            }
            Some(finer) => {
                let inputs = self.db.get_range(location_id, finer, start, end).await?;
                inputs.iter().for_each(|a| folder.add_aggregate(a));
            }
        }

        if folder.source_count == 0 {
            debug!(location = %location_id, %resolution, bucket = start, "empty bucket");
            return Ok(None);
        }

        let aggregate = folder.finish(location_id, resolution, start, created_at);
        self.db.upsert_aggregate(&aggregate).await?;
        Ok(Some(aggregate))
    }

    /// Recompute, for every location and resolution, each bucket touched
    /// since the last successful pass (at least the previous and current
    /// one), finest first so coarser buckets see fresh inputs. A failing
    /// bucket is logged and skipped, and the next pass retries it.
    #[instrument(skip(self, locations), fields(locations = locations.len()))]
    pub async fn aggregate_due(&self, now: Timestamp, locations: &[Location]) -> AggregationReport {
        let mut report = AggregationReport::default();
        let since = self.pass_start(now);

        for resolution in Resolution::ALL {
            let buckets = match due_buckets(resolution, since, now) {
                Ok(buckets) => buckets,
                Err(e) => {
                    warn!(%resolution, error = %e, "cannot compute due buckets");
                    report.failed += 1;
                    continue;
                }
            };

            for location in locations {
                for &start in &buckets {
                    match self.rollup(&location.id, resolution, start, now).await {
                        Ok(Some(_)) => report.written += 1,
                        Ok(None) => report.empty += 1,
                        Err(e) => {
                            warn!(
                                location = %location.id,
                                %resolution,
                                bucket = start,
                                error = %e,
                                "aggregation failed"
                            );
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        if report.failed == 0 {
            *self.last_pass.lock().unwrap_or_else(|p| p.into_inner()) = Some(now);
        }
        info!(
            written = report.written,
            empty = report.empty,
            failed = report.failed,
            since,
            "aggregation pass complete"
        );
        report
    }

    fn pass_start(&self, now: Timestamp) -> Timestamp {
        let last = *self.last_pass.lock().unwrap_or_else(|p| p.into_inner());
        last.unwrap_or(now - self.catch_up_secs).min(now)
    }

    /// Recompute every bucket overlapping `[start, end)` for one location.
    /// Returns the number of buckets written.
    #[instrument(skip(self))]
    pub async fn aggregate_range(
        &self,
        location_id: &str,
        resolution: Resolution,
        start: Timestamp,
        end: Timestamp,
    ) -> ArchiveResult<u64> {
        let created_at = (self.clock)();
        let mut written = 0;
        for bucket in buckets_between(resolution, start, end)? {
            if self
                .rollup(location_id, resolution, bucket, created_at)
                .await?
                .is_some()
            {
                written += 1;
            }
        }
        Ok(written)
    }
}

/// Buckets from the one containing `since`, or the one before `now` if
/// that is earlier, through the bucket containing `now`
fn due_buckets(
    resolution: Resolution,
    since: Timestamp,
    now: Timestamp,
) -> ArchiveResult<Vec<Timestamp>> {
    let from = previous_bucket(resolution, now)?.min(bucket_start(resolution, since)?);
    let current = bucket_start(resolution, now)?;
    buckets_between(resolution, from, bucket_end(resolution, current)?)
}

/// Running state for one bucket
#[derive(Default)]
struct Folder {
    temperature: Accumulator,
    humidity: Accumulator,
    pressure: Accumulator,
    wind_speed: Accumulator,
    rain: Accumulator,
    conditions: ModeCounter<String>,

    aqi: Accumulator,
    levels: ModeCounter<AqiLevel>,
    pm25: Accumulator,
    pm10: Accumulator,
    co: Accumulator,
    no2: Accumulator,
    o3: Accumulator,
    so2: Accumulator,
    nh3: Accumulator,

    sample_count: i64,
    source_count: i64,
    /// (sub-bucket start, PM2.5 average)
    periods: Vec<(Timestamp, f64)>,
}

impl Folder {
    fn add_sample(&mut self, sample: &RawSample) {
        let w = &sample.weather;
        self.temperature.add_opt(w.temperature);
        self.humidity.add_opt(w.humidity);
        self.pressure.add_opt(w.pressure);
        self.wind_speed.add_opt(w.wind_speed);
        self.rain.add_opt(w.rain);
        if let Some(condition) = &w.condition {
            self.conditions.add(condition.clone());
        }

        let p = &sample.pollutants;
        self.aqi.add_opt(p.aqi);
        self.pm25.add_opt(p.pm25);
        self.pm10.add_opt(p.pm10);
        self.co.add_opt(p.co);
        self.no2.add_opt(p.no2);
        self.o3.add_opt(p.o3);
        self.so2.add_opt(p.so2);
        self.nh3.add_opt(p.nh3);
        if let Some(level) = sample.aqi_level.or_else(|| p.aqi_level()) {
            self.levels.add(level);
        }

        self.sample_count += 1;
        self.source_count += 1;
    }

    /// Fold a finer aggregate. Hourly inputs contribute their modes;
    /// daily inputs contribute their whole distributions.
    fn add_aggregate(&mut self, agg: &Aggregate) {
        let w = &agg.weather;
        self.temperature.add_stats_opt(w.temperature.as_ref());
        self.humidity.add_stats_opt(w.humidity.as_ref());
        self.pressure.add_stats_opt(w.pressure.as_ref());
        self.wind_speed.add_stats_opt(w.wind_speed.as_ref());
        self.rain.add_opt(w.rain_total);
        match (&w.condition_distribution, &w.condition) {
            (Some(dist), _) => dist
                .iter()
                .for_each(|(k, n)| self.conditions.add_n(k.clone(), *n)),
            (None, Some(mode)) => self.conditions.add(mode.clone()),
            (None, None) => {}
        }

        let a = &agg.air;
        self.aqi.add_stats_opt(a.aqi.as_ref());
        self.pm25.add_stats_opt(a.pm25.as_ref());
        self.pm10.add_stats_opt(a.pm10.as_ref());
        self.co.add_stats_opt(a.co.as_ref());
        self.no2.add_stats_opt(a.no2.as_ref());
        self.o3.add_stats_opt(a.o3.as_ref());
        self.so2.add_stats_opt(a.so2.as_ref());
        self.nh3.add_stats_opt(a.nh3.as_ref());
        match (&a.aqi_level_distribution, a.aqi_level) {
            (Some(dist), _) => {
                for (key, n) in dist {
                    match AqiLevel::parse(key) {
                        Some(level) => self.levels.add_n(level, *n),
                        None => warn!(level = %key, "unknown aqi level in distribution"),
                    }
                }
            }
            (None, Some(level)) => self.levels.add(level),
            (None, None) => {}
        }

        if let Some(avg) = agg.pm25_avg() {
            self.periods.push((agg.bucket_start, avg));
        }
        self.sample_count += agg.sample_count;
        self.source_count += 1;
    }

    fn finish(
        self,
        location_id: &str,
        resolution: Resolution,
        bucket_start: Timestamp,
        created_at: Timestamp,
    ) -> Aggregate {
        let keep = resolution.keeps_distribution();
        let (best_period, worst_period) = if keep {
            best_and_worst(&self.periods)
        } else {
            (None, None)
        };

        let condition_distribution = (keep && !self.conditions.is_empty())
            .then(|| self.conditions.distribution().clone());
        let aqi_level_distribution = (keep && !self.levels.is_empty()).then(|| {
            self.levels
                .distribution()
                .iter()
                .map(|(level, n)| (level.as_str().to_string(), *n))
                .collect()
        });

        Aggregate {
            location_id: location_id.to_string(),
            resolution,
            bucket_start,
            weather: WeatherStats {
                temperature: self.temperature.result(),
                humidity: self.humidity.result(),
                pressure: self.pressure.result(),
                wind_speed: self.wind_speed.result(),
                rain_total: self.rain.sum(),
                condition: self.conditions.mode(),
                condition_distribution,
            },
            air: AirStats {
                aqi: self.aqi.result(),
                aqi_level: self.levels.mode(),
                aqi_level_distribution,
                pm25: self.pm25.result(),
                pm10: self.pm10.result(),
                co: self.co.result(),
                no2: self.no2.result(),
                o3: self.o3.result(),
                so2: self.so2.result(),
                nh3: self.nh3.result(),
            },
            sample_count: self.sample_count,
            source_count: self.source_count,
            best_period,
            worst_period,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airmon_core::{
        MatchKind, PollutantReading, Provenance, WeatherReading, SECS_PER_DAY, SECS_PER_HOUR,
    };

    // 2024-01-01T00:00:00Z, a Monday
    const DAY: i64 = 1_704_067_200;

    fn sample(ts: i64, pm25: f64, temp: f64, condition: &str) -> RawSample {
        let pollutants = PollutantReading {
            pm25: Some(pm25),
            ..Default::default()
        };
        RawSample {
            location_id: "hn-01".into(),
            timestamp: ts,
            weather: WeatherReading {
                temperature: Some(temp),
                rain: Some(if condition == "rain" { 0.5 } else { 0.0 }),
                condition: Some(condition.into()),
                ..Default::default()
            },
            aqi_level: pollutants.aqi_level(),
            pollutants,
            provenance: Provenance {
                sources: vec!["waqi".into()],
                kind: MatchKind::SingleSource,
                distance_m: None,
                time_delta_secs: None,
                observed: vec![],
            },
            secondary: vec![],
            created_at: ts,
        }
    }

    async fn rollup() -> (DbClient, Rollup) {
        let db = DbClient::in_memory().await.unwrap();
        let rollup = Rollup::new(db.clone()).with_clock(|| DAY);
        (db, rollup)
    }

    #[tokio::test]
    async fn test_hourly_from_raw() {
        let (db, rollup) = rollup().await;
        let samples = vec![
            sample(DAY + 60, 10.0, 20.0, "clouds"),
            sample(DAY + 1_200, 20.0, 22.0, "rain"),
            sample(DAY + 2_400, 30.0, 24.0, "rain"),
            sample(DAY + SECS_PER_HOUR, 99.0, 30.0, "clear"),
        ];
        db.insert_raw_batch(&samples).await.unwrap();

        let agg = rollup
            .aggregate_bucket("hn-01", Resolution::Hourly, DAY)
            .await
            .unwrap()
            .unwrap();
        let pm25 = agg.air.pm25.unwrap();
        assert_eq!((pm25.avg, pm25.min, pm25.max, pm25.count), (20.0, 10.0, 30.0, 3));
        assert_eq!(agg.weather.temperature.unwrap().avg, 22.0);
        assert_eq!(agg.weather.rain_total, Some(1.0));
        assert_eq!(agg.weather.condition.as_deref(), Some("rain"));
        assert_eq!(agg.weather.condition_distribution, None);
        assert_eq!(agg.sample_count, 3);
        assert_eq!(agg.best_period, None);

        let stored = db
            .get_aggregate("hn-01", Resolution::Hourly, DAY)
            .await
            .unwrap();
        assert_eq!(stored, Some(agg));
    }

    #[tokio::test]
    async fn test_empty_bucket_writes_nothing() {
        let (db, rollup) = rollup().await;
        let result = rollup
            .aggregate_bucket("hn-01", Resolution::Daily, DAY)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(db
            .get_range("hn-01", Resolution::Daily, 0, i64::MAX)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_misaligned_bucket_rejected() {
        let (_db, rollup) = rollup().await;
        assert!(matches!(
            rollup
                .aggregate_bucket("hn-01", Resolution::Hourly, DAY + 5)
                .await,
            Err(ArchiveError::AggregationError(_))
        ));
    }

    #[tokio::test]
    async fn test_daily_distribution_and_periods() {
        let (db, rollup) = rollup().await;
        // hour 0: two clouds samples, hour 1: one rain sample, hour 2: one rain
        let samples = vec![
            sample(DAY, 40.0, 20.0, "clouds"),
            sample(DAY + 600, 40.0, 20.0, "clouds"),
            sample(DAY + SECS_PER_HOUR, 8.0, 20.0, "rain"),
            sample(DAY + 2 * SECS_PER_HOUR, 8.0, 20.0, "rain"),
        ];
        db.insert_raw_batch(&samples).await.unwrap();
        rollup
            .aggregate_range("hn-01", Resolution::Hourly, DAY, DAY + SECS_PER_DAY)
            .await
            .unwrap();

        let daily = rollup
            .aggregate_bucket("hn-01", Resolution::Daily, DAY)
            .await
            .unwrap()
            .unwrap();
        let dist = daily.weather.condition_distribution.clone().unwrap();
        // counts hourly modes, not samples
        assert_eq!(dist.get("clouds"), Some(&1));
        assert_eq!(dist.get("rain"), Some(&2));
        assert_eq!(daily.weather.condition.as_deref(), Some("rain"));
        assert_eq!(daily.sample_count, 4);
        assert_eq!(daily.source_count, 3);
        // tie between hour 1 and hour 2 goes to the earlier
        assert_eq!(daily.best_period, Some(DAY + SECS_PER_HOUR));
        assert_eq!(daily.worst_period, Some(DAY));
        assert_eq!(daily.air.pm25.unwrap().avg, 24.0);
    }

    #[tokio::test]
    async fn test_weekly_sums_daily_distributions() {
        let (db, rollup) = rollup().await;
        let samples = vec![
            sample(DAY, 10.0, 20.0, "clouds"),
            sample(DAY + SECS_PER_HOUR, 10.0, 20.0, "clouds"),
            sample(DAY + SECS_PER_DAY, 50.0, 20.0, "rain"),
        ];
        db.insert_raw_batch(&samples).await.unwrap();

        let week_end = DAY + 7 * SECS_PER_DAY;
        for resolution in [Resolution::Hourly, Resolution::Daily] {
            rollup
                .aggregate_range("hn-01", resolution, DAY, week_end)
                .await
                .unwrap();
        }
        let weekly = rollup
            .aggregate_bucket("hn-01", Resolution::Weekly, DAY)
            .await
            .unwrap()
            .unwrap();

        let dist = weekly.weather.condition_distribution.unwrap();
        assert_eq!(dist.get("clouds"), Some(&2));
        assert_eq!(dist.get("rain"), Some(&1));
        assert_eq!(weekly.sample_count, 3);
        assert_eq!(weekly.source_count, 2);
        assert_eq!(weekly.best_period, Some(DAY));
        assert_eq!(weekly.worst_period, Some(DAY + SECS_PER_DAY));
        let levels = weekly.air.aqi_level_distribution.unwrap();
        assert_eq!(levels.values().sum::<i64>(), 3);
    }

    #[tokio::test]
    async fn test_aggregate_due_reports_work() {
        let (db, rollup) = rollup().await;
        db.insert_raw(&sample(DAY + 30, 12.0, 20.0, "clear"))
            .await
            .unwrap();
        let loc = Location {
            id: "hn-01".into(),
            name: "Hoan Kiem".into(),
            latitude: 21.0285,
            longitude: 105.8542,
            radius_m: 1_000.0,
            sources: vec![],
            collection_interval_secs: 300,
            active: true,
            first_measurement: None,
            last_measurement: None,
            total_measurements: 0,
        };

        let rollup = rollup.with_catch_up(0);
        let report = rollup.aggregate_due(DAY + 1_800, &[loc]).await;
        // current hour, day, week and month each hold the sample
        assert_eq!(report.written, 4);
        assert_eq!(report.empty, 4);
        assert_eq!(report.failed, 0);
    }

    fn location() -> Location {
        Location {
            id: "hn-01".into(),
            name: "Hoan Kiem".into(),
            latitude: 21.0285,
            longitude: 105.8542,
            radius_m: 1_000.0,
            sources: vec![],
            collection_interval_secs: 300,
            active: true,
            first_measurement: None,
            last_measurement: None,
            total_measurements: 0,
        }
    }

    #[tokio::test]
    async fn test_aggregate_due_catches_up_slow_cadence() {
        let (db, rollup) = rollup().await;
        let rollup = rollup.with_catch_up(0);
        let samples: Vec<_> = (0..6)
            .map(|h| sample(DAY + h * SECS_PER_HOUR + 60, 10.0 + h as f64, 20.0, "clear"))
            .collect();
        db.insert_raw_batch(&samples).await.unwrap();

        // passes three hours apart
        for pass in 0..4 {
            let report = rollup
                .aggregate_due(DAY + 1_800 + pass * 3 * SECS_PER_HOUR, &[location()])
                .await;
            assert_eq!(report.failed, 0);
        }

        let hourly = db
            .get_range("hn-01", Resolution::Hourly, DAY, DAY + SECS_PER_DAY)
            .await
            .unwrap();
        let starts: Vec<_> = hourly.iter().map(|a| (a.bucket_start - DAY) / SECS_PER_HOUR).collect();
        assert_eq!(starts, vec![0, 1, 2, 3, 4, 5]);
        let daily = db
            .get_aggregate("hn-01", Resolution::Daily, DAY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(daily.sample_count, 6);
    }

    #[tokio::test]
    async fn test_first_pass_reaches_back() {
        let (db, rollup) = rollup().await;
        let samples: Vec<_> = (0..6)
            .map(|h| sample(DAY + h * SECS_PER_HOUR, 10.0, 20.0, "clear"))
            .collect();
        db.insert_raw_batch(&samples).await.unwrap();

        // a day and a half of downtime before the first pass
        rollup
            .aggregate_due(DAY + 36 * SECS_PER_HOUR, &[location()])
            .await;

        let hourly = db
            .get_range("hn-01", Resolution::Hourly, DAY, DAY + SECS_PER_DAY)
            .await
            .unwrap();
        assert_eq!(hourly.len(), 6);
        let daily = db
            .get_aggregate("hn-01", Resolution::Daily, DAY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(daily.sample_count, 6);
    }

    #[test]
    fn test_due_buckets_span_since_last_pass() {
        let now = DAY + 5 * SECS_PER_HOUR + 10;
        let hours = due_buckets(Resolution::Hourly, DAY + 1_800, now).unwrap();
        assert_eq!(hours.len(), 6);
        assert_eq!(hours[0], DAY);
        // never fewer than the previous and current bucket
        let hours = due_buckets(Resolution::Hourly, now, now).unwrap();
        assert_eq!(hours, vec![DAY + 4 * SECS_PER_HOUR, DAY + 5 * SECS_PER_HOUR]);
    }
}
