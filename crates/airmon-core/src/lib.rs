//! Core data types and reconciliation logic for airmon
//!
//! This crate holds the typed record model shared by every other crate,
//! together with the pure, storage-free parts of the engine: the source
//! merger, the write gate, rollup accumulators and the forecast organizer.

pub mod forecast;
pub mod gate;
pub mod geo;
pub mod merge;
pub mod pipeline;
pub mod rollups;
pub mod types;
pub mod units;

pub use forecast::*;
pub use gate::*;
pub use geo::*;
pub use merge::*;
pub use pipeline::*;
pub use rollups::*;
pub use types::*;
pub use units::*;
