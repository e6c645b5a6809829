//! Domain types and models

pub mod execution;
pub mod schedule;
pub mod stats;

pub use execution::{
    ExecutionFilter, ExecutionId, ExecutionRecord, ExecutionStatus, ExecutionTrigger,
};
pub use schedule::{
    default_timeout, DeregisterOutcome, DeregisterPolicy, ExecutionTarget, RetryPolicy,
    ScheduleEntry, ScheduleId, ScheduleSpec, ScheduleState, ScheduleUpdate, TriggerKind,
};
pub use stats::ScheduleStats;
