//! # Cadence Infrastructure
//!
//! Runtime pieces of the Cadence scheduler.
//!
//! This crate contains:
//! - The `WorkflowScheduler` (tick loop, worker pool, resilient dispatch)
//! - Configuration loading from files and the environment
//! - Tracing initialisation
//!
//! ## Architecture
//! - Drives the pure bookkeeping in `cadence-core`
//! - Owns every task it spawns and stops them on `stop()`

pub mod config;
pub mod observability;
pub mod scheduling;

// Re-export commonly used items
pub use observability::init_tracing;
pub use scheduling::{workflow_resource, SchedulerError, SchedulerResult, WorkflowScheduler};
