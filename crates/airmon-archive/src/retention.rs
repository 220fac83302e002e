//! Retention windows and expiry

use crate::bucket::max_bucket_secs;
use crate::{ArchiveError, ArchiveResult};
use airmon_core::{Resolution, Timestamp, SECS_PER_DAY, SECS_PER_HOUR};
use airmon_db::{tables, DbClient};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// How often aggregation runs, and how much slack retention must leave
/// beyond the worst-case consumption lag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSchedule {
    pub interval_secs: i64,
    pub safety_buffer_secs: i64,
}

impl Default for AggregationSchedule {
    fn default() -> Self {
        Self {
            interval_secs: SECS_PER_HOUR,
            safety_buffer_secs: SECS_PER_HOUR,
        }
    }
}

/// Per-tier retention windows in seconds, measured from each record's
/// `created_at`. `None` keeps records forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub raw: Option<i64>,
    pub hourly: Option<i64>,
    pub daily: Option<i64>,
    pub weekly: Option<i64>,
    pub monthly: Option<i64>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            raw: Some(2 * SECS_PER_DAY),
            hourly: Some(7 * SECS_PER_DAY),
            daily: Some(90 * SECS_PER_DAY),
            weekly: Some(730 * SECS_PER_DAY),
            monthly: None,
        }
    }
}

impl RetentionPolicy {
    pub fn window(&self, resolution: Resolution) -> Option<i64> {
        match resolution {
            Resolution::Hourly => self.hourly,
            Resolution::Daily => self.daily,
            Resolution::Weekly => self.weekly,
            Resolution::Monthly => self.monthly,
        }
    }

    /// Reject any window that could expire a record before the next-coarser
    /// aggregator has finished reading it.
    ///
    /// A record created at `t` belongs to a coarser bucket ending no later
    /// than `t + bucket length`, and the first aggregation pass after that
    /// end starts within one interval.
    pub fn validate(&self, schedule: &AggregationSchedule) -> ArchiveResult<()> {
        if schedule.interval_secs <= 0 || schedule.safety_buffer_secs < 0 {
            return Err(ArchiveError::InvalidPolicy(
                "aggregation interval must be positive and buffer non-negative".into(),
            ));
        }

        let tiers = [
            ("raw", self.raw, Some(Resolution::Hourly)),
            ("hourly", self.hourly, Some(Resolution::Daily)),
            // daily feeds both weekly and monthly; the month is longer
            ("daily", self.daily, Some(Resolution::Monthly)),
            ("weekly", self.weekly, None),
            ("monthly", self.monthly, None),
        ];

        for (name, window, consumer) in tiers {
            let Some(window) = window else { continue };
            if window <= 0 {
                return Err(ArchiveError::InvalidPolicy(format!(
                    "{} window must be positive",
                    name
                )));
            }
            if let Some(consumer) = consumer {
                let required =
                    max_bucket_secs(consumer) + schedule.interval_secs + schedule.safety_buffer_secs;
                if window <= required {
                    return Err(ArchiveError::InvalidPolicy(format!(
                        "{} window of {}s must exceed {}s so {} aggregation can consume it",
                        name, window, required, consumer
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Rows deleted per table by one sweep, plus the tables that failed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: BTreeMap<&'static str, u64>,
    pub failed: Vec<&'static str>,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.deleted.values().sum()
    }
}

pub struct RetentionManager {
    db: DbClient,
    policy: RetentionPolicy,
}

impl RetentionManager {
    /// Build a manager, refusing a policy that violates the schedule
    pub fn new(
        db: DbClient,
        policy: RetentionPolicy,
        schedule: &AggregationSchedule,
    ) -> ArchiveResult<Self> {
        policy.validate(schedule)?;
        Ok(Self { db, policy })
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Expire each tier independently
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: Timestamp) -> SweepReport {
        let mut report = SweepReport::default();

        if let Some(window) = self.policy.raw {
            match self.db.delete_raw_created_before(now - window).await {
                Ok(n) => {
                    report.deleted.insert(tables::RAW_SAMPLES, n);
                }
                Err(e) => {
                    warn!(table = tables::RAW_SAMPLES, error = %e, "retention sweep failed");
                    report.failed.push(tables::RAW_SAMPLES);
                }
            }
        }

        for resolution in Resolution::ALL {
            let Some(window) = self.policy.window(resolution) else {
                continue;
            };
            let table = tables::aggregate(resolution);
            match self
                .db
                .delete_aggregates_created_before(resolution, now - window)
                .await
            {
                Ok(n) => {
                    report.deleted.insert(table, n);
                }
                Err(e) => {
                    warn!(table, error = %e, "retention sweep failed");
                    report.failed.push(table);
                }
            }
        }

        info!(deleted = report.total(), failed = report.failed.len(), "retention sweep complete");
        report
    }
}
