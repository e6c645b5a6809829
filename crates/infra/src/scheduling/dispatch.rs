//! Resilient dispatch of a single execution
//!
//! Each execution runs under the circuit breaker of its workflow, with the
//! schedule's retry policy inside one breaker permit. The schedule's timeout
//! bounds the whole execution, backoff included. Every attempt runs on its
//! own task with a child of the execution's cancellation token, so a
//! panicking executor fails the attempt instead of the scheduler task.

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadence_common::resilience::policies::RetryableKinds;
use cadence_common::resilience::{
    CircuitBreaker, ProtectedCall, ResilienceError, RetryConfig, RetryExecutor,
};
use cadence_common::time::Clock;
use cadence_core::{ExecutionError, ExecutionErrorKind, ExecutionRequest, WorkflowExecutor};
use cadence_domain::constants::{TIMEOUT_ERROR, WORKFLOW_RESOURCE_PREFIX};
use cadence_domain::{CadenceError, ExecutionId, RetryPolicy, ScheduleEntry, ScheduleId};
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, warn};

/// Circuit breaker resource guarding `workflow_id`
pub fn workflow_resource(workflow_id: &str) -> String {
    format!("{WORKFLOW_RESOURCE_PREFIX}:{workflow_id}")
}

/// Snapshot of what a fire needs, taken while the registry is locked
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub schedule_id: ScheduleId,
    pub workflow_id: String,
    pub inputs: serde_json::Value,
    pub retry_policy: RetryPolicy,
    pub timeout: Duration,
}

impl Job {
    pub fn from_entry(entry: &ScheduleEntry) -> Self {
        Self {
            schedule_id: entry.schedule_id,
            workflow_id: entry.target.workflow_id.clone(),
            inputs: entry.target.inputs.clone(),
            retry_policy: entry.retry_policy,
            timeout: entry.timeout,
        }
    }
}

/// Final result of a dispatch, ready to be written to the record
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Completed(serde_json::Value),
    Failed(String),
}

/// Run `job` until it succeeds, exhausts its retries, is rejected by the
/// breaker or runs out of time
///
/// `on_attempt` is called with the 1-based attempt number before each
/// invocation of the executor. When `job.timeout` elapses the attempt in
/// progress is cancelled and the outcome is a failure with
/// [`TIMEOUT_ERROR`].
pub(crate) async fn dispatch<C, F>(
    executor: Arc<dyn WorkflowExecutor>,
    breaker: CircuitBreaker<C>,
    job: &Job,
    execution_id: ExecutionId,
    cancel: &CancellationToken,
    on_attempt: F,
) -> Outcome
where
    C: Clock,
    F: Fn(u32) + Send + Sync,
{
    let policy = job.retry_policy;
    let retry = RetryExecutor::new(
        RetryConfig::exponential(policy.max_attempts, policy.backoff_base, policy.backoff_cap),
        RetryableKinds::new(ExecutionErrorKind::RETRYABLE),
    );
    let call = ProtectedCall::new(breaker, retry);
    let attempts = AtomicU32::new(0);
    let scope = cancel.child_token();
    let deadline = Instant::now() + job.timeout;

    let calls = call.execute(|| {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        on_attempt(attempt);
        let request = ExecutionRequest {
            workflow_id: job.workflow_id.clone(),
            execution_id,
            schedule_id: job.schedule_id,
            attempt,
            inputs: job.inputs.clone(),
        };
        let token = scope.child_token();
        let executor = Arc::clone(&executor);
        async move {
            let task = AbortOnDropHandle::new(tokio::spawn({
                let token = token.clone();
                async move { executor.execute(request, token).await }
            }));
            // An attempt still running at the deadline fails inside the
            // breaker permit, so the breaker counts it.
            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_error)) => Err(attempt_aborted(execution_id, attempt, join_error)),
                Err(_) => {
                    warn!(%execution_id, attempt, "Execution timed out during attempt");
                    token.cancel();
                    Err(ExecutionError::new(ExecutionErrorKind::Timeout, TIMEOUT_ERROR))
                }
            }
        }
    });

    let Ok(result) = tokio::time::timeout_at(deadline, calls).await else {
        warn!(%execution_id, timeout = ?job.timeout, "Execution timed out between attempts");
        scope.cancel();
        return Outcome::Failed(TIMEOUT_ERROR.to_string());
    };

    match result {
        Ok(outputs) => Outcome::Completed(outputs),
        Err(ResilienceError::RetryExhausted { attempts, source }) => {
            debug!(%execution_id, attempts, "Retries exhausted");
            Outcome::Failed(source.to_string())
        }
        Err(ResilienceError::OperationFailed { source }) => Outcome::Failed(source.to_string()),
        Err(ResilienceError::CircuitOpen) => {
            let resource = call.breaker().name().to_string();
            Outcome::Failed(CadenceError::CircuitOpen { resource }.to_string())
        }
        Err(ResilienceError::Timeout { .. }) => Outcome::Failed(TIMEOUT_ERROR.to_string()),
        Err(ResilienceError::InvalidConfiguration { message }) => Outcome::Failed(message),
    }
}

/// Failure for an attempt whose task panicked or was aborted
fn attempt_aborted(execution_id: ExecutionId, attempt: u32, join_error: JoinError) -> ExecutionError {
    if !join_error.is_panic() {
        return ExecutionError::cancelled();
    }
    let message = panic_message(join_error.into_panic().as_ref());
    error!(%execution_id, attempt, panic = %message, "Workflow executor panicked");
    ExecutionError::failed(format!("panicked: {message}"))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
