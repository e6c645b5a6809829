//! Workflow scheduling runtime
//!
//! - [`WorkflowScheduler`]: registry, history, tick loop and worker pool
//!   behind an explicit `start`/`stop` lifecycle
//! - [`dispatch`]: retry and circuit breaker wiring around a single
//!   execution
//!
//! The tick loop is the only long-lived task. Executions run as tracked
//! tasks gated by a semaphore and are cancelled through
//! `tokio_util::sync::CancellationToken`.

pub mod dispatch;
pub mod error;
pub mod workflow_scheduler;

pub use dispatch::workflow_resource;
pub use error::{SchedulerError, SchedulerResult};
pub use workflow_scheduler::WorkflowScheduler;
