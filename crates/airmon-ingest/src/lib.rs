//! Feed adapters for external measurement providers
//!
//! Each provider is wrapped behind [`FeedClient`]. Payloads are validated
//! here, at the boundary: records that cannot be parsed are dropped and
//! out-of-range values become `None`, so everything past this crate works
//! with typed, plausible readings.

pub mod http;
pub mod openweather;
pub mod registry;
pub mod simulator;
pub mod waqi;

pub use http::*;
pub use openweather::*;
pub use registry::*;
pub use simulator::*;
pub use waqi::*;

use airmon_core::{ForecastMeasurement, RawMeasurement};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unexpected status {status} from {endpoint}")]
    Status { status: u16, endpoint: String },

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Feed error: {0}")]
    FeedError(String),
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IngestError::Timeout(err.url().map(|u| u.path().to_string()).unwrap_or_default())
        } else if err.is_decode() {
            IngestError::InvalidPayload(err.to_string())
        } else {
            IngestError::Http(err.without_url().to_string())
        }
    }
}

impl From<reqwest_middleware::Error> for IngestError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(e) => e.into(),
            reqwest_middleware::Error::Middleware(e) => IngestError::Http(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::InvalidPayload(err.to_string())
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

/// One external measurement provider
#[async_trait::async_trait]
pub trait FeedClient: Send + Sync {
    /// Source name recorded in provenance
    fn source(&self) -> &str;

    /// Current reading nearest to the coordinate
    async fn fetch_current(&self, latitude: f64, longitude: f64) -> IngestResult<RawMeasurement>;

    /// Predicted points for the coordinate; empty when the provider has none
    async fn fetch_forecast(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> IngestResult<Vec<ForecastMeasurement>>;
}
