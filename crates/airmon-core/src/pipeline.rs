use anyhow::Result;

use crate::{Location, Timestamp};

/// Source of active monitoring locations
#[async_trait::async_trait]
pub trait LocationRegistry: Send + Sync {
    async fn list_active_locations(&self) -> Result<Vec<Location>>;

    /// Bump the location's counters for one persisted sample
    async fn record_measurement(&self, location_id: &str, at: Timestamp) -> Result<()>;
}
