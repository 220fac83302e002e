//! airmon daemon: wiring for the collection pipeline and its schedules

pub mod collector;
pub mod config;
pub mod scheduler;
pub mod setup;

pub use collector::*;
pub use scheduler::*;
