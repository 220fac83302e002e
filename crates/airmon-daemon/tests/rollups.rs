mod common;

use airmon_archive::{AggregationSchedule, RetentionManager, RetentionPolicy, Rollup};
use airmon_core::{GateMode, Resolution, Timestamp, SECS_PER_DAY, SECS_PER_HOUR};
use airmon_daemon::collector::CollectOutcome;
use common::*;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn two_days_later() -> Timestamp {
    DAY + 2 * SECS_PER_DAY
}

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
}

/// Feed one pollutant value per call through the collector
async fn collect(h: &Harness, at: Timestamp, pm25: f64) {
    h.primary
        .set(Some(pollutant_measurement("waqi", HANOI.0, HANOI.1, at, pm25)));
    let outcome = h
        .collector
        .collect_location(&location("hn-01"), at)
        .await
        .unwrap();
    assert!(matches!(outcome, CollectOutcome::Stored(_)), "{:?}", outcome);
}

#[tokio::test]
async fn test_hourly_samples_roll_into_daily() {
    let h = harness(GateMode::Enforce, TIMEOUT).await;
    for i in 0..24 {
        collect(&h, DAY + i * SECS_PER_HOUR, 10.0 + i as f64).await;
    }

    let rollup = Rollup::new(h.db.clone()).with_clock(two_days_later);
    let hours = rollup
        .aggregate_range("hn-01", Resolution::Hourly, DAY, DAY + SECS_PER_DAY)
        .await
        .unwrap();
    assert_eq!(hours, 24);
    rollup
        .aggregate_range("hn-01", Resolution::Daily, DAY, DAY + SECS_PER_DAY)
        .await
        .unwrap();

    let daily = h
        .db
        .get_aggregate("hn-01", Resolution::Daily, DAY)
        .await
        .unwrap()
        .unwrap();
    let pm25 = daily.air.pm25.unwrap();
    assert_close(pm25.avg, 21.5);
    assert_eq!(pm25.min, 10.0);
    assert_eq!(pm25.max, 33.0);
    assert_eq!(daily.sample_count, 24);
    assert_eq!(daily.source_count, 24);
    assert_eq!(daily.best_period, Some(DAY));
    assert_eq!(daily.worst_period, Some(DAY + 23 * SECS_PER_HOUR));
    assert_eq!(daily.created_at, two_days_later());
}

#[tokio::test]
async fn test_sample_count_and_mean_conserved() {
    let h = harness(GateMode::Bypass, TIMEOUT).await;
    let mut values = Vec::new();
    for hour in 0..72 {
        for k in 0..(hour % 3 + 1) {
            let at = DAY + hour * SECS_PER_HOUR + k * 600;
            let pm25 = ((hour * 7 + k * 3) % 50) as f64 + 5.0;
            collect(&h, at, pm25).await;
            values.push(pm25);
        }
    }
    let raw_mean = values.iter().sum::<f64>() / values.len() as f64;
    let end = DAY + 3 * SECS_PER_DAY;

    let rollup = Rollup::new(h.db.clone()).with_clock(two_days_later);
    for resolution in Resolution::ALL {
        rollup
            .aggregate_range("hn-01", resolution, DAY, end)
            .await
            .unwrap();
    }

    for resolution in Resolution::ALL {
        let rows = h.db.get_range("hn-01", resolution, DAY, end).await.unwrap();
        let count: i64 = rows.iter().map(|a| a.sample_count).sum();
        assert_eq!(count, values.len() as i64, "{}", resolution);
    }

    for resolution in [Resolution::Weekly, Resolution::Monthly] {
        let agg = h
            .db
            .get_aggregate("hn-01", resolution, DAY)
            .await
            .unwrap()
            .unwrap();
        let pm25 = agg.air.pm25.unwrap();
        assert_close(pm25.avg, raw_mean);
        assert_eq!(pm25.count, values.len() as i64);
        assert_eq!(agg.source_count, 3);
        // one vote per hourly mode
        let levels: i64 = agg.air.aqi_level_distribution.unwrap().values().sum();
        assert_eq!(levels, 72);
    }
}

#[tokio::test]
async fn test_reaggregation_is_idempotent() {
    let h = harness(GateMode::Bypass, TIMEOUT).await;
    for i in 0..6 {
        collect(&h, DAY + i * 1200, 20.0 + i as f64).await;
    }
    let rollup = Rollup::new(h.db.clone()).with_clock(two_days_later);
    let end = DAY + SECS_PER_DAY;

    rollup
        .aggregate_range("hn-01", Resolution::Hourly, DAY, end)
        .await
        .unwrap();
    rollup
        .aggregate_range("hn-01", Resolution::Daily, DAY, end)
        .await
        .unwrap();
    let hourly = h.db.get_range("hn-01", Resolution::Hourly, DAY, end).await.unwrap();
    let daily = h.db.get_range("hn-01", Resolution::Daily, DAY, end).await.unwrap();

    for _ in 0..2 {
        rollup
            .aggregate_range("hn-01", Resolution::Hourly, DAY, end)
            .await
            .unwrap();
        rollup
            .aggregate_range("hn-01", Resolution::Daily, DAY, end)
            .await
            .unwrap();
    }

    assert_eq!(hourly.len(), 2);
    assert_eq!(
        h.db.get_range("hn-01", Resolution::Hourly, DAY, end).await.unwrap(),
        hourly
    );
    assert_eq!(
        h.db.get_range("hn-01", Resolution::Daily, DAY, end).await.unwrap(),
        daily
    );
}

#[tokio::test]
async fn test_raw_expires_only_after_rollup() {
    let h = harness(GateMode::Enforce, TIMEOUT).await;
    collect(&h, DAY + 1800, 42.0).await;

    let schedule = AggregationSchedule::default();
    let retention =
        RetentionManager::new(h.db.clone(), RetentionPolicy::default(), &schedule).unwrap();
    let rollup = Rollup::new(h.db.clone());
    let locations = vec![location("hn-01")];

    let mut expired_at = None;
    let mut now = DAY + SECS_PER_HOUR;
    while now <= DAY + 4 * SECS_PER_DAY {
        rollup.aggregate_due(now, &locations).await;
        retention.sweep(now).await;

        if expired_at.is_none() && h.db.count_raw("hn-01").await.unwrap() == 0 {
            expired_at = Some(now);
            let daily = h
                .db
                .get_aggregate("hn-01", Resolution::Daily, DAY)
                .await
                .unwrap()
                .expect("daily bucket written before raw expiry");
            assert_eq!(daily.sample_count, 1);
        }
        now += schedule.interval_secs;
    }

    assert_eq!(expired_at, Some(DAY + 2 * SECS_PER_DAY + SECS_PER_HOUR));
    for resolution in Resolution::ALL {
        let agg = h
            .db
            .get_aggregate("hn-01", resolution, DAY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(agg.sample_count, 1, "{}", resolution);
        assert_close(agg.pm25_avg().unwrap(), 42.0);
    }
}

#[tokio::test]
async fn test_slow_cadence_never_expires_unaggregated_raw() {
    let h = harness(GateMode::Bypass, TIMEOUT).await;
    for hour in 0..6 {
        collect(&h, DAY + hour * SECS_PER_HOUR, 10.0 + hour as f64).await;
    }

    let schedule = AggregationSchedule {
        interval_secs: 3 * SECS_PER_HOUR,
        safety_buffer_secs: SECS_PER_HOUR,
    };
    let retention =
        RetentionManager::new(h.db.clone(), RetentionPolicy::default(), &schedule).unwrap();
    let rollup = Rollup::new(h.db.clone());
    let locations = vec![location("hn-01")];

    let mut now = DAY + 3 * SECS_PER_HOUR;
    while now <= DAY + 4 * SECS_PER_DAY {
        let report = rollup.aggregate_due(now, &locations).await;
        assert_eq!(report.failed, 0);
        retention.sweep(now).await;
        now += schedule.interval_secs;
    }

    assert_eq!(h.db.count_raw("hn-01").await.unwrap(), 0);
    let hourly = h
        .db
        .get_range("hn-01", Resolution::Hourly, DAY, DAY + SECS_PER_DAY)
        .await
        .unwrap();
    assert_eq!(hourly.len(), 6);
    let daily = h
        .db
        .get_aggregate("hn-01", Resolution::Daily, DAY)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(daily.sample_count, 6);
}
