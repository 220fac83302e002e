//! Persistence layer for airmon
//!
//! SQLite through sqlx. The schema is created on startup with
//! `CREATE TABLE IF NOT EXISTS`; every aggregate write is an upsert keyed
//! by (location, bucket) so reruns are harmless.

pub mod client;
pub mod forecasts;
pub mod locations;
pub mod queries;
pub mod schema;

pub use client::*;
pub use schema::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found")]
    NotFound,

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

pub type DbResult<T> = Result<T, DbError>;
