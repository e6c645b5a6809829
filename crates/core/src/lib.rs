//! # Cadence Core
//!
//! Scheduling logic with no runtime attached.
//!
//! This crate contains:
//! - Trigger compilation and next-fire evaluation
//! - The schedule registry and execution history
//! - The `WorkflowExecutor` port the scheduler dispatches to
//!
//! ## Architecture Principles
//! - Depends only on `cadence-common` and `cadence-domain`
//! - Callers pass `now` in; nothing here reads a clock or spawns a task
//! - Workflow execution stays behind a trait

pub mod ports;
pub mod scheduling;

pub use ports::{ExecutionError, ExecutionErrorKind, ExecutionRequest, WorkflowExecutor};
pub use scheduling::{CompiledTrigger, ExecutionHistory, ScheduleRegistry};
