//! Execution records and their state machine
//!
//! A record moves `pending -> running -> completed | failed | stopped`.
//! `failed` and `stopped` are also reachable straight from `pending`.
//! Terminal records never change again; every later transition is rejected
//! with [`CadenceError::InvalidState`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::schedule::ScheduleId;
use crate::{define_id, impl_domain_status_conversions, CadenceError, Result};

define_id!(
    /// Unique identifier of one execution of a schedule
    ExecutionId
);

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl_domain_status_conversions!(ExecutionStatus {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Stopped => "stopped",
});

impl ExecutionStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Pending or running
    pub const fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }
}

/// What started an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTrigger {
    Scheduled,
    Manual,
}

impl_domain_status_conversions!(ExecutionTrigger {
    Scheduled => "scheduled",
    Manual => "manual",
});

/// One execution of a schedule's workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    pub schedule_id: ScheduleId,
    pub workflow_id: String,
    pub trigger: ExecutionTrigger,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Time from start to the terminal transition
    pub duration: Option<Duration>,
    pub error: Option<String>,
    /// Invocations of the workflow executor so far
    pub attempt_count: u32,
    /// Value returned by the workflow executor on success
    pub outputs: Option<serde_json::Value>,
}

impl ExecutionRecord {
    /// New pending record
    pub fn new(
        schedule_id: ScheduleId,
        workflow_id: impl Into<String>,
        trigger: ExecutionTrigger,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            schedule_id,
            workflow_id: workflow_id.into(),
            trigger,
            status: ExecutionStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            duration: None,
            error: None,
            attempt_count: 0,
            outputs: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// A worker slot was acquired
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.expect_status(&[ExecutionStatus::Pending], ExecutionStatus::Running)?;
        self.status = ExecutionStatus::Running;
        self.started_at = Some(now);
        Ok(())
    }

    /// The executor is about to be invoked for the `attempt`-th time
    pub fn record_attempt(&mut self, attempt: u32) -> Result<()> {
        if self.status != ExecutionStatus::Running {
            return Err(self.invalid_transition("record an attempt"));
        }
        self.attempt_count = self.attempt_count.max(attempt);
        Ok(())
    }

    pub fn complete(&mut self, outputs: serde_json::Value, now: DateTime<Utc>) -> Result<()> {
        self.expect_status(&[ExecutionStatus::Running], ExecutionStatus::Completed)?;
        self.outputs = Some(outputs);
        self.finish(ExecutionStatus::Completed, now);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.expect_status(
            &[ExecutionStatus::Pending, ExecutionStatus::Running],
            ExecutionStatus::Failed,
        )?;
        self.error = Some(error.into());
        self.finish(ExecutionStatus::Failed, now);
        Ok(())
    }

    /// Force-stop; the executor's cancellation token is cancelled by the
    /// caller
    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.expect_status(
            &[ExecutionStatus::Pending, ExecutionStatus::Running],
            ExecutionStatus::Stopped,
        )?;
        self.finish(ExecutionStatus::Stopped, now);
        Ok(())
    }

    fn finish(&mut self, status: ExecutionStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
        self.duration = self.started_at.map(|started| (now - started).to_std().unwrap_or_default());
    }

    fn expect_status(&self, allowed: &[ExecutionStatus], target: ExecutionStatus) -> Result<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(self.invalid_transition(&format!("move to {target}")))
        }
    }

    fn invalid_transition(&self, action: &str) -> CadenceError {
        CadenceError::InvalidState(format!(
            "execution {} is {}, cannot {action}",
            self.execution_id, self.status
        ))
    }
}

/// Query over execution history; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFilter {
    pub schedule_id: Option<ScheduleId>,
    pub status: Option<ExecutionStatus>,
    /// Inclusive lower bound on `started_at`
    pub started_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `started_at`
    pub started_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ExecutionFilter {
    pub fn for_schedule(schedule_id: ScheduleId) -> Self {
        Self { schedule_id: Some(schedule_id), ..Self::default() }
    }

    pub fn status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn started_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.started_after = Some(from);
        self.started_before = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `record` passes every criterion except `limit`
    ///
    /// A record that never started fails any started-time bound.
    pub fn matches(&self, record: &ExecutionRecord) -> bool {
        if self.schedule_id.is_some_and(|id| id != record.schedule_id) {
            return false;
        }
        if self.status.is_some_and(|status| status != record.status) {
            return false;
        }
        if self.started_after.is_none() && self.started_before.is_none() {
            return true;
        }
        let Some(started) = record.started_at else {
            return false;
        };
        self.started_after.map_or(true, |from| started >= from)
            && self.started_before.map_or(true, |to| started < to)
    }
}
