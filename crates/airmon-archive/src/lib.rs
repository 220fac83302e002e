//! Rollups and retention
//!
//! Folds raw samples into hourly aggregates, hourly into daily, and daily
//! into weekly and monthly ones, then expires each tier on its own window.

pub mod aggregator;
pub mod bucket;
pub mod retention;

pub use aggregator::*;
pub use bucket::*;
pub use retention::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] airmon_db::DbError),

    #[error("Aggregation error: {0}")]
    AggregationError(String),

    #[error("Invalid retention policy: {0}")]
    InvalidPolicy(String),

    #[error("Timestamp out of range: {0}")]
    InvalidTimestamp(i64),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
