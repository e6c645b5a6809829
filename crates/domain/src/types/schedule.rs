//! Schedule registration model

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::execution::ExecutionId;
use crate::constants::{
    DEFAULT_EXECUTION_TIMEOUT_SECS, DEFAULT_RETRY_BACKOFF_BASE_MS, DEFAULT_RETRY_BACKOFF_CAP_MS,
    DEFAULT_RETRY_MAX_ATTEMPTS,
};
use crate::{define_id, impl_domain_status_conversions, CadenceError, Result};

define_id!(
    /// Unique identifier of a registered schedule
    ScheduleId
);

/// Rule deciding when a schedule fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    /// Five- or six-field cron expression evaluated in the scheduler's zone
    Cron { expression: String },
    /// Fixed period between fires
    Interval { every: Duration },
    /// Fires only through an explicit manual trigger
    Manual,
    /// Fires once at `at`, then the schedule is disabled
    Once { at: DateTime<Utc> },
}

impl TriggerKind {
    pub fn cron(expression: impl Into<String>) -> Self {
        Self::Cron { expression: expression.into() }
    }

    pub fn interval(every: Duration) -> Self {
        Self::Interval { every }
    }

    pub fn once(at: DateTime<Utc>) -> Self {
        Self::Once { at }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Cron { .. } => "cron",
            Self::Interval { .. } => "interval",
            Self::Manual => "manual",
            Self::Once { .. } => "once",
        }
    }
}

/// Workflow invoked when a schedule fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTarget {
    pub workflow_id: String,
    /// Opaque to the scheduler; interpreted by the workflow executor
    #[serde(default)]
    pub inputs: serde_json::Value,
}

impl ExecutionTarget {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self { workflow_id: workflow_id.into(), inputs: serde_json::Value::Null }
    }

    pub fn with_inputs(mut self, inputs: serde_json::Value) -> Self {
        self.inputs = inputs;
        self
    }
}

/// Lifecycle state of a schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    #[default]
    Active,
    Paused,
    Disabled,
}

impl_domain_status_conversions!(ScheduleState {
    Active => "active",
    Paused => "paused",
    Disabled => "disabled",
});

/// Retry settings applied to each execution of a schedule
///
/// The delay before attempt `n + 1` is `backoff_base * 2^(n - 1)` capped at
/// `backoff_cap`, plus up to 20% jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(DEFAULT_RETRY_BACKOFF_BASE_MS),
            backoff_cap: Duration::from_millis(DEFAULT_RETRY_BACKOFF_CAP_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_cap: Duration) -> Self {
        Self { max_attempts, backoff_base, backoff_cap }
    }

    /// A single attempt with no retries
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, backoff_base: Duration::ZERO, backoff_cap: Duration::ZERO }
    }

    /// Delay after the `attempt`-th failure (1-based), before jitter
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.backoff_base.saturating_mul(1u32 << exponent).min(self.backoff_cap)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(CadenceError::Config("retry max_attempts must be at least 1".into()));
        }
        if self.backoff_cap < self.backoff_base {
            return Err(CadenceError::Config(format!(
                "retry backoff cap {:?} is below the base {:?}",
                self.backoff_cap, self.backoff_base
            )));
        }
        Ok(())
    }
}

/// A registered schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub schedule_id: ScheduleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub trigger_kind: TriggerKind,
    pub target: ExecutionTarget,
    pub state: ScheduleState,
    /// Absent while paused or disabled, and for manual triggers
    pub next_fire_time: Option<DateTime<Utc>>,
    pub retry_policy: RetryPolicy,
    /// Maximum run time of a single attempt
    pub timeout: Duration,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_fired_at: Option<DateTime<Utc>>,
    /// Deregistration is waiting for the run in flight to finish
    #[serde(default)]
    pub pending_removal: bool,
}

impl ScheduleEntry {
    pub fn is_active(&self) -> bool {
        self.state == ScheduleState::Active && !self.pending_removal
    }

    /// Whether the scheduler should fire this entry at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.next_fire_time.is_some_and(|at| at <= now)
    }

    /// Display label: the name if set, otherwise the identifier
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.schedule_id.to_string())
    }
}

/// Registration request
///
/// Missing retry policy and timeout fall back to the scheduler defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub trigger: TriggerKind,
    pub target: ExecutionTarget,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl ScheduleSpec {
    pub fn new(trigger: TriggerKind, target: ExecutionTarget) -> Self {
        Self { name: None, trigger, target, retry_policy: None, timeout: None }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Partial update of a registered schedule; `None` fields are left as is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    pub name: Option<String>,
    pub trigger: Option<TriggerKind>,
    pub target: Option<ExecutionTarget>,
    pub retry_policy: Option<RetryPolicy>,
    pub timeout: Option<Duration>,
}

impl ScheduleUpdate {
    pub fn trigger(mut self, trigger: TriggerKind) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn target(mut self, target: ExecutionTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// What deregistration does when the schedule has a run in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeregisterPolicy {
    /// Remove the schedule once the run reaches a terminal state
    #[default]
    Defer,
    /// Stop the run, then remove the schedule immediately
    ForceStop,
}

impl_domain_status_conversions!(DeregisterPolicy {
    Defer => "defer",
    ForceStop => "force_stop",
});

/// Result of a deregistration request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeregisterOutcome {
    Removed,
    /// Removal waits for `execution_id` to finish
    Deferred { execution_id: ExecutionId },
}

/// Default execution timeout
pub const fn default_timeout() -> Duration {
    Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS)
}
