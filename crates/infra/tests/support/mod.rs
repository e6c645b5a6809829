//! Workflow executors and helpers shared by the scheduler integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_common::testing::{poll_until, ScriptedOperation, TokioClock};
use cadence_core::{ExecutionError, ExecutionRequest, WorkflowExecutor};
use cadence_domain::{
    Config, ExecutionId, ExecutionStatus, ExecutionTarget, RetryPolicy, ScheduleId, TriggerKind,
};
use cadence_infra::WorkflowScheduler;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Replays a scripted sequence of results
pub struct ScriptedExecutor(pub ScriptedOperation<Value, ExecutionError>);

#[async_trait]
impl WorkflowExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _request: ExecutionRequest,
        _cancel: CancellationToken,
    ) -> Result<Value, ExecutionError> {
        self.0.call().await
    }
}

/// Blocks every attempt until the test opens the gate or the attempt is
/// cancelled
pub struct GatedExecutor {
    gate: Semaphore,
    pub tokens: Mutex<Vec<CancellationToken>>,
}

impl GatedExecutor {
    pub fn new() -> Self {
        Self { gate: Semaphore::new(0), tokens: Mutex::new(Vec::new()) }
    }

    /// Let one blocked (or future) attempt complete
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn attempts(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn token(&self, index: usize) -> CancellationToken {
        self.tokens.lock()[index].clone()
    }
}

#[async_trait]
impl WorkflowExecutor for GatedExecutor {
    async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<Value, ExecutionError> {
        self.tokens.lock().push(cancel.clone());
        tokio::select! {
            () = cancel.cancelled() => Err(ExecutionError::cancelled()),
            permit = self.gate.acquire() => {
                if let Ok(permit) = permit {
                    permit.forget();
                }
                Ok(serde_json::json!({ "workflow": request.workflow_id }))
            }
        }
    }
}

/// Never finishes on its own; keeps the tokens it was handed
#[derive(Default)]
pub struct HangingExecutor {
    pub tokens: Mutex<Vec<CancellationToken>>,
}

impl HangingExecutor {
    pub fn attempts(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn token(&self, index: usize) -> CancellationToken {
        self.tokens.lock()[index].clone()
    }
}

#[async_trait]
impl WorkflowExecutor for HangingExecutor {
    async fn execute(
        &self,
        _request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<Value, ExecutionError> {
        self.tokens.lock().push(cancel);
        std::future::pending().await
    }
}

/// Sleeps for `delay` on every attempt, then fails transiently
pub struct SlowTransientExecutor {
    delay: Duration,
    pub tokens: Mutex<Vec<CancellationToken>>,
}

impl SlowTransientExecutor {
    pub fn new(delay: Duration) -> Self {
        Self { delay, tokens: Mutex::new(Vec::new()) }
    }

    pub fn attempts(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn token(&self, index: usize) -> CancellationToken {
        self.tokens.lock()[index].clone()
    }
}

#[async_trait]
impl WorkflowExecutor for SlowTransientExecutor {
    async fn execute(
        &self,
        _request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<Value, ExecutionError> {
        self.tokens.lock().push(cancel.clone());
        tokio::select! {
            () = cancel.cancelled() => Err(ExecutionError::cancelled()),
            () = tokio::time::sleep(self.delay) => Err(ExecutionError::transient("slow")),
        }
    }
}

/// Panics on the first attempt of each execution, succeeds on later ones
#[derive(Default)]
pub struct PanickyExecutor {
    pub panics: AtomicUsize,
}

#[async_trait]
impl WorkflowExecutor for PanickyExecutor {
    async fn execute(
        &self,
        request: ExecutionRequest,
        _cancel: CancellationToken,
    ) -> Result<Value, ExecutionError> {
        if self.panics.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("executor for {} blew up", request.workflow_id);
        }
        Ok(serde_json::json!({ "workflow": request.workflow_id }))
    }
}

/// Clock starting at Monday 2024-06-03 09:00 UTC
pub fn clock() -> TokioClock {
    TokioClock::at(Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap())
}

pub fn scheduler(
    config: &Config,
    executor: Arc<dyn WorkflowExecutor>,
) -> (WorkflowScheduler<TokioClock>, TokioClock) {
    let clock = clock();
    let scheduler = WorkflowScheduler::with_clock(config, executor, clock)
        .expect("scheduler should build from a valid config");
    (scheduler, clock)
}

/// Register a manual schedule for `workflow_id`
pub fn manual(
    scheduler: &WorkflowScheduler<TokioClock>,
    workflow_id: &str,
    retry: RetryPolicy,
    timeout: Duration,
) -> ScheduleId {
    scheduler
        .register(TriggerKind::Manual, ExecutionTarget::new(workflow_id), retry, timeout)
        .expect("manual schedule should register")
}

/// Wait (in tokio time) until the execution reaches `status`
pub async fn wait_for_status(
    scheduler: &WorkflowScheduler<TokioClock>,
    execution_id: ExecutionId,
    status: ExecutionStatus,
) -> bool {
    poll_until(Duration::from_secs(120), Duration::from_millis(10), || async move {
        scheduler.get_execution(execution_id).is_ok_and(|record| record.status == status)
    })
    .await
}

/// Wait until `condition` holds, polling every 10ms of tokio time
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    poll_until(Duration::from_secs(120), Duration::from_millis(10), || {
        let ready = condition();
        async move { ready }
    })
    .await
}
