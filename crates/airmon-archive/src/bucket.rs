//! UTC bucket arithmetic

use crate::{ArchiveError, ArchiveResult};
use airmon_core::{Resolution, Timestamp, SECS_PER_DAY, SECS_PER_HOUR};
use chrono::{DateTime, Datelike, NaiveDate};

/// Start of the bucket containing `ts`. Weeks start on Monday.
pub fn bucket_start(resolution: Resolution, ts: Timestamp) -> ArchiveResult<Timestamp> {
    match resolution {
        Resolution::Hourly => Ok(ts - ts.rem_euclid(SECS_PER_HOUR)),
        Resolution::Daily => Ok(ts - ts.rem_euclid(SECS_PER_DAY)),
        Resolution::Weekly => {
            let date = date_of(ts)?;
            let monday = date - chrono::Duration::days(date.weekday().num_days_from_monday() as i64);
            Ok(midnight(monday))
        }
        Resolution::Monthly => {
            let date = date_of(ts)?;
            let first = date.with_day(1).ok_or(ArchiveError::InvalidTimestamp(ts))?;
            Ok(midnight(first))
        }
    }
}

/// Start of the bucket following the one starting at `start`
pub fn bucket_end(resolution: Resolution, start: Timestamp) -> ArchiveResult<Timestamp> {
    match resolution {
        Resolution::Hourly => Ok(start + SECS_PER_HOUR),
        Resolution::Daily => Ok(start + SECS_PER_DAY),
        Resolution::Weekly => Ok(start + 7 * SECS_PER_DAY),
        Resolution::Monthly => {
            let date = date_of(start)?;
            let (year, month) = if date.month() == 12 {
                (date.year() + 1, 1)
            } else {
                (date.year(), date.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1)
                .map(midnight)
                .ok_or(ArchiveError::InvalidTimestamp(start))
        }
    }
}

/// Start of the bucket preceding the one containing `ts`
pub fn previous_bucket(resolution: Resolution, ts: Timestamp) -> ArchiveResult<Timestamp> {
    let start = bucket_start(resolution, ts)?;
    bucket_start(resolution, start - 1)
}

/// Starts of every bucket overlapping `[start, end)`
pub fn buckets_between(
    resolution: Resolution,
    start: Timestamp,
    end: Timestamp,
) -> ArchiveResult<Vec<Timestamp>> {
    let mut buckets = Vec::new();
    let mut cursor = bucket_start(resolution, start)?;
    while cursor < end {
        buckets.push(cursor);
        cursor = bucket_end(resolution, cursor)?;
    }
    Ok(buckets)
}

/// Upper bound on bucket length, used for retention lag
pub fn max_bucket_secs(resolution: Resolution) -> i64 {
    match resolution {
        Resolution::Hourly => SECS_PER_HOUR,
        Resolution::Daily => SECS_PER_DAY,
        Resolution::Weekly => 7 * SECS_PER_DAY,
        Resolution::Monthly => 31 * SECS_PER_DAY,
    }
}

fn date_of(ts: Timestamp) -> ArchiveResult<NaiveDate> {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.date_naive())
        .ok_or(ArchiveError::InvalidTimestamp(ts))
}

fn midnight(date: NaiveDate) -> Timestamp {
    date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp()
}
