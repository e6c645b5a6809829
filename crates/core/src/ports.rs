//! Port interfaces for workflow execution
//!
//! The scheduler knows nothing about what a workflow does. It hands an
//! [`ExecutionRequest`] and a cancellation token to a [`WorkflowExecutor`]
//! and records whatever comes back.

use async_trait::async_trait;
use cadence_common::resilience::ClassifyError;
use cadence_domain::{impl_domain_status_conversions, ExecutionId, ScheduleId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Invocation handed to the workflow executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub workflow_id: String,
    pub execution_id: ExecutionId,
    pub schedule_id: ScheduleId,
    /// 1-based attempt number within the execution
    pub attempt: u32,
    pub inputs: serde_json::Value,
}

/// Category of an execution failure; decides retryability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// Temporary fault such as a dropped connection
    Transient,
    /// A dependency is down or overloaded
    Unavailable,
    /// The request itself is wrong; retrying cannot help
    Invalid,
    /// The workflow ran and failed
    Failed,
    /// The execution timeout elapsed during the attempt
    Timeout,
    /// The attempt observed its cancellation token
    Cancelled,
}

impl_domain_status_conversions!(ExecutionErrorKind {
    Transient => "transient",
    Unavailable => "unavailable",
    Invalid => "invalid",
    Failed => "failed",
    Timeout => "timeout",
    Cancelled => "cancelled",
});

impl ExecutionErrorKind {
    /// Kinds the scheduler retries
    pub const RETRYABLE: [Self; 2] = [Self::Transient, Self::Unavailable];

    pub fn is_retryable(&self) -> bool {
        Self::RETRYABLE.contains(self)
    }
}

/// Failure reported by a workflow executor
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Transient, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Unavailable, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Invalid, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Failed, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ExecutionErrorKind::Cancelled, "cancelled")
    }
}

impl ClassifyError for ExecutionError {
    type Kind = ExecutionErrorKind;

    fn kind(&self) -> ExecutionErrorKind {
        self.kind
    }
}

/// Runs workflows on behalf of the scheduler
///
/// Implementations should watch `cancel` and return promptly once it fires;
/// the scheduler has already recorded the outcome by then.
#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    /// Execute one attempt of a workflow
    async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, ExecutionError>;
}
