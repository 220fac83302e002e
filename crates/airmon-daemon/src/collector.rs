//! Per-location collection pipeline: fetch → merge → gate → persist

use airmon_core::{
    AcceptReason, ForecastMeasurement, ForecastOrganizer, GateDecision, Location,
    LocationRegistry, RawMeasurement, SourceMerger, Timestamp, WriteGate,
};
use airmon_db::DbClient;
use airmon_ingest::FeedClient;
use airmon_obs::Metrics;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// What one location's collection produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectOutcome {
    Stored(AcceptReason),
    Skipped,
    NoData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub stored: u64,
    pub skipped: u64,
    pub no_data: u64,
    pub failed: u64,
    /// Locations still running from an earlier cycle
    pub busy: u64,
    /// Locations whose own collection interval has not elapsed
    pub not_due: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForecastReport {
    pub refreshed: u64,
    pub failed: u64,
}

/// Feed roles: the primary feed wins overlapping pollutant values
#[derive(Clone, Default)]
pub struct Feeds {
    pub primary: Option<Arc<dyn FeedClient>>,
    pub secondary: Option<Arc<dyn FeedClient>>,
}

#[derive(Clone)]
pub struct Collector {
    registry: Arc<dyn LocationRegistry>,
    db: DbClient,
    feeds: Feeds,
    merger: SourceMerger,
    gate: WriteGate,
    organizer: ForecastOrganizer,
    metrics: Arc<Metrics>,
    feed_timeout: Duration,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    /// Start time of each location's last collection attempt
    last_attempt: Arc<Mutex<HashMap<String, Timestamp>>>,
}

/// Tick jitter tolerated when deciding whether a location is due
const SCHEDULE_SLACK_SECS: i64 = 5;

/// Removes a location from the in-flight set when dropped, including when
/// the task unwinds
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<String>>>, id: &str) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.insert(id.to_string()).then(|| InFlightGuard {
            set: Arc::clone(set),
            id: id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut guard = self
            .set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.remove(&self.id);
    }
}

impl Collector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn LocationRegistry>,
        db: DbClient,
        feeds: Feeds,
        merger: SourceMerger,
        gate: WriteGate,
        metrics: Arc<Metrics>,
        feed_timeout: Duration,
        max_concurrency: usize,
    ) -> Self {
        Self {
            registry,
            db,
            feeds,
            merger,
            gate,
            organizer: ForecastOrganizer::default(),
            metrics,
            feed_timeout,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            last_attempt: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Collect every active location once. Locations run concurrently up
    /// to the permit count; a failure in one never affects the others.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self, now: Timestamp) -> Result<CycleReport> {
        let locations = self
            .registry
            .list_active_locations()
            .await
            .context("Failed to list active locations")?;

        let mut report = CycleReport::default();
        let mut tasks = JoinSet::new();

        for location in locations {
            if !self.is_due(&location, now) {
                report.not_due += 1;
                continue;
            }
            let Some(guard) = InFlightGuard::acquire(&self.in_flight, &location.id) else {
                debug!(location = %location.id, "still running from previous cycle");
                report.busy += 1;
                continue;
            };
            self.last_attempt
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(location.id.clone(), now);
            let collector = self.clone();
            tasks.spawn(async move {
                let _guard = guard;
                let _permit = collector.permits.clone().acquire_owned().await;
                let result = collector.collect_location(&location, now).await;
                (location.id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(CollectOutcome::Stored(_)))) => report.stored += 1,
                Ok((_, Ok(CollectOutcome::Skipped))) => report.skipped += 1,
                Ok((_, Ok(CollectOutcome::NoData))) => report.no_data += 1,
                Ok((id, Err(e))) => {
                    warn!(location = %id, error = %e, "collection failed");
                    self.metrics.location_failed();
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "collection task aborted");
                    self.metrics.location_failed();
                    report.failed += 1;
                }
            }
        }

        info!(
            stored = report.stored,
            skipped = report.skipped,
            no_data = report.no_data,
            failed = report.failed,
            busy = report.busy,
            not_due = report.not_due,
            "collection cycle complete"
        );
        Ok(report)
    }

    /// A location is due once its own interval has passed since its last
    /// attempt, whether or not that attempt stored a sample
    fn is_due(&self, location: &Location, now: Timestamp) -> bool {
        let attempts = self
            .last_attempt
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match attempts.get(&location.id) {
            Some(&last) => now - last >= location.collection_interval_secs - SCHEDULE_SLACK_SECS,
            None => true,
        }
    }

    /// One location, one cycle
    #[instrument(skip(self, location), fields(location = %location.id))]
    pub async fn collect_location(&self, location: &Location, now: Timestamp) -> Result<CollectOutcome> {
        let (primary, secondary) = tokio::join!(
            self.fetch_current(self.feeds.primary.as_ref(), location),
            self.fetch_current(self.feeds.secondary.as_ref(), location),
        );

        let Some(reading) = self.merger.merge(secondary, primary) else {
            debug!("no feed returned data");
            return Ok(CollectOutcome::NoData);
        };
        let sample = reading.into_sample(&location.id, now, now);

        let prior = self
            .db
            .get_latest(&location.id)
            .await
            .context("Failed to read latest sample")?;

        match self.gate.evaluate(&sample, prior.as_ref()) {
            GateDecision::Skip => {
                debug!("sample unchanged, skipped");
                self.metrics.sample_skipped();
                Ok(CollectOutcome::Skipped)
            }
            GateDecision::Accept(reason) => {
                self.db
                    .insert_raw(&sample)
                    .await
                    .context("Failed to store sample")?;
                // the sample is stored either way
                if let Err(e) = self.registry.record_measurement(&location.id, now).await {
                    warn!(error = %e, "failed to update location counters");
                }
                debug!(reason = reason.as_str(), kind = sample.provenance.kind.as_str(), "sample stored");
                self.metrics.sample_accepted(reason.as_str());
                Ok(CollectOutcome::Stored(reason))
            }
        }
    }

    /// A failing or slow feed contributes nothing
    async fn fetch_current(
        &self,
        feed: Option<&Arc<dyn FeedClient>>,
        location: &Location,
    ) -> Option<RawMeasurement> {
        let feed = feed.filter(|f| location.uses_source(f.source()))?;
        let call = feed.fetch_current(location.latitude, location.longitude);
        match tokio::time::timeout(self.feed_timeout, call).await {
            Ok(Ok(measurement)) => Some(measurement),
            Ok(Err(e)) => {
                warn!(source = feed.source(), error = %e, "feed unavailable");
                self.metrics.feed_failed(feed.source());
                None
            }
            Err(_) => {
                warn!(source = feed.source(), "feed timed out");
                self.metrics.feed_failed(feed.source());
                None
            }
        }
    }

    async fn fetch_forecast(
        &self,
        feed: Option<&Arc<dyn FeedClient>>,
        location: &Location,
    ) -> Vec<ForecastMeasurement> {
        let Some(feed) = feed.filter(|f| location.uses_source(f.source())) else {
            return Vec::new();
        };
        let call = feed.fetch_forecast(location.latitude, location.longitude);
        match tokio::time::timeout(self.feed_timeout, call).await {
            Ok(Ok(points)) => points,
            Ok(Err(e)) => {
                warn!(source = feed.source(), error = %e, "forecast unavailable");
                self.metrics.feed_failed(feed.source());
                Vec::new()
            }
            Err(_) => {
                warn!(source = feed.source(), "forecast timed out");
                self.metrics.feed_failed(feed.source());
                Vec::new()
            }
        }
    }

    /// Replace one location's forecast. Weather comes from the secondary
    /// feed first; pollutant points from the primary feed win over the
    /// secondary's at the same timestamp. Without any weather points the
    /// stored forecast is left alone.
    #[instrument(skip(self, location), fields(location = %location.id))]
    pub async fn refresh_forecast(
        &self,
        location: &Location,
        now: Timestamp,
        valid_until: Timestamp,
    ) -> Result<bool> {
        let (primary, secondary) = tokio::join!(
            self.fetch_forecast(self.feeds.primary.as_ref(), location),
            self.fetch_forecast(self.feeds.secondary.as_ref(), location),
        );

        let mut weather = Vec::new();
        let mut pollutants = Vec::new();
        for point in secondary.iter().chain(primary.iter()) {
            if point.weather.is_some() {
                weather.push(point.clone());
            }
        }
        for point in primary.iter().chain(secondary.iter()) {
            if point.pollutants.is_some() {
                pollutants.push(point.clone());
            }
        }

        if weather.is_empty() {
            debug!("no weather forecast, keeping stored forecast");
            return Ok(false);
        }

        let (points, summaries) =
            self.organizer
                .organize(&location.id, &weather, &pollutants, now, valid_until);
        self.db
            .replace_forecast(&location.id, &points, &summaries)
            .await
            .context("Failed to store forecast")?;
        Ok(true)
    }

    pub async fn refresh_forecasts(&self, now: Timestamp, valid_until: Timestamp) -> Result<ForecastReport> {
        let locations = self
            .registry
            .list_active_locations()
            .await
            .context("Failed to list active locations")?;

        let mut report = ForecastReport::default();
        for location in &locations {
            match self.refresh_forecast(location, now, valid_until).await {
                Ok(true) => report.refreshed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(location = %location.id, error = %e, "forecast refresh failed");
                    report.failed += 1;
                }
            }
        }
        info!(refreshed = report.refreshed, failed = report.failed, "forecast refresh complete");
        Ok(report)
    }
}
