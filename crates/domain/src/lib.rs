//! # Cadence Domain
//!
//! Domain types and models for the Cadence scheduler.
//!
//! This crate contains:
//! - Schedule and execution data types (`ScheduleEntry`, `ExecutionRecord`,
//!   statistics, filters)
//! - The `CadenceError` taxonomy and `Result` alias
//! - Configuration structures with defaults
//! - Domain constants
//!
//! ## Architecture
//! - No dependencies on other Cadence crates
//! - Pure data and state transitions, no I/O

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
