//! Integration tests for the workflow scheduler
//!
//! Every test runs on paused tokio time with a tokio-driven clock, so backoff
//! sleeps, execution timeouts and the tick loop advance deterministically.

mod support;

use std::sync::Arc;
use std::time::Duration;

use cadence_common::resilience::CircuitState;
use cadence_common::testing::ScriptedOperation;
use cadence_common::time::Clock;
use cadence_core::ExecutionError;
use cadence_domain::{
    CadenceError, Config, DeregisterOutcome, DeregisterPolicy, ExecutionFilter, ExecutionStatus,
    ExecutionTarget, ExecutionTrigger, RetryPolicy, ScheduleState, TriggerKind,
};
use cadence_infra::{workflow_resource, SchedulerError};
use support::{
    manual, scheduler, wait_for_status, wait_until, GatedExecutor, HangingExecutor,
    PanickyExecutor, ScriptedExecutor, SlowTransientExecutor,
};

fn retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(100), Duration::from_secs(1))
}

/// Validates that transient failures are retried with backoff until the
/// workflow succeeds.
///
/// # Test Steps
/// 1. Script two transient failures followed by a success
/// 2. Trigger the schedule manually with three attempts allowed
/// 3. Assert the record completed on the third attempt after both backoffs
#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_until_success() {
    let op = ScriptedOperation::failing_then(
        2,
        ExecutionError::transient("connection reset"),
        serde_json::json!({ "rows": 42 }),
    );
    let (scheduler, _clock) =
        scheduler(&Config::default(), Arc::new(ScriptedExecutor(op.clone())));
    let schedule_id = manual(&scheduler, "etl", retry(3), Duration::from_secs(30));

    let execution_id = scheduler.trigger_now(schedule_id).unwrap();
    assert!(wait_for_status(&scheduler, execution_id, ExecutionStatus::Completed).await);

    let record = scheduler.get_execution(execution_id).unwrap();
    assert_eq!(record.attempt_count, 3);
    assert_eq!(record.outputs, Some(serde_json::json!({ "rows": 42 })));
    assert!(record.error.is_none());
    assert!(record.duration.unwrap() >= Duration::from_millis(300));
    assert_eq!(op.calls(), 3);
}

/// Validates that an execution fails with the last error once every
/// attempt failed.
///
/// # Test Steps
/// 1. Script an executor that always fails transiently
/// 2. Trigger with two attempts allowed
/// 3. Assert the record failed after two attempts with the executor's error
#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_records_last_error() {
    let op = ScriptedOperation::always_failing(ExecutionError::transient("connection reset"));
    let (scheduler, _clock) =
        scheduler(&Config::default(), Arc::new(ScriptedExecutor(op.clone())));
    let schedule_id = manual(&scheduler, "etl", retry(2), Duration::from_secs(30));

    let execution_id = scheduler.trigger_now(schedule_id).unwrap();
    assert!(wait_for_status(&scheduler, execution_id, ExecutionStatus::Failed).await);

    let record = scheduler.get_execution(execution_id).unwrap();
    assert_eq!(record.attempt_count, 2);
    assert_eq!(record.error.as_deref(), Some("connection reset"));
    assert_eq!(op.calls(), 2);

    let stats = scheduler.schedule_stats(schedule_id).unwrap();
    assert_eq!(stats.failed, 1);
    assert!((stats.failure_rate - 1.0).abs() < f64::EPSILON);
}

/// Validates that an execution exceeding its timeout fails and
/// cancels the token handed to the executor.
///
/// # Test Steps
/// 1. Register a schedule with a 2s timeout on an executor that never returns
/// 2. Trigger it and wait for the outcome
/// 3. Assert the record failed with "timeout" after one attempt
/// 4. Assert the executor's token was cancelled
#[tokio::test(start_paused = true)]
async fn test_execution_timeout_fails_and_cancels() {
    let executor = Arc::new(HangingExecutor::default());
    let (scheduler, _clock) = scheduler(&Config::default(), executor.clone());
    let schedule_id = manual(&scheduler, "slow", retry(3), Duration::from_secs(2));

    let execution_id = scheduler.trigger_now(schedule_id).unwrap();
    assert!(wait_for_status(&scheduler, execution_id, ExecutionStatus::Failed).await);

    let record = scheduler.get_execution(execution_id).unwrap();
    assert_eq!(record.error.as_deref(), Some("timeout"));
    assert_eq!(record.attempt_count, 1);
    assert!(record.duration.unwrap() >= Duration::from_secs(2));
    assert_eq!(executor.attempts(), 1);
    assert!(executor.token(0).is_cancelled());
}

/// Validates that the timeout covers the whole execution, not each attempt.
///
/// # Test Steps
/// 1. Every attempt takes 4s and fails transiently; five attempts allowed
/// 2. Register with a 5s timeout and trigger
/// 3. Assert the record failed with "timeout" at 5s during the second attempt
/// 4. Assert the running attempt's token was cancelled
#[tokio::test(start_paused = true)]
async fn test_timeout_spans_all_attempts() {
    let executor = Arc::new(SlowTransientExecutor::new(Duration::from_secs(4)));
    let (scheduler, _clock) = scheduler(&Config::default(), executor.clone());
    let schedule_id = manual(&scheduler, "slow", retry(5), Duration::from_secs(5));

    let execution_id = scheduler.trigger_now(schedule_id).unwrap();
    assert!(wait_for_status(&scheduler, execution_id, ExecutionStatus::Failed).await);

    let record = scheduler.get_execution(execution_id).unwrap();
    assert_eq!(record.error.as_deref(), Some("timeout"));
    assert_eq!(record.attempt_count, 2);
    let duration = record.duration.unwrap();
    assert!(duration >= Duration::from_secs(5) && duration < Duration::from_secs(6));
    assert_eq!(executor.attempts(), 2);
    assert!(executor.token(1).is_cancelled());
}

/// Validates that a panicking executor fails the execution instead of
/// leaving it running.
///
/// # Test Steps
/// 1. Trigger a schedule whose executor panics on its first call
/// 2. Assert the record failed with the panic message
/// 3. Assert the schedule can be triggered again and that run completes
#[tokio::test(start_paused = true)]
async fn test_executor_panic_fails_execution() {
    let executor = Arc::new(PanickyExecutor::default());
    let (scheduler, _clock) = scheduler(&Config::default(), executor.clone());
    let schedule_id = manual(&scheduler, "fragile", retry(3), Duration::from_secs(30));

    let first = scheduler.trigger_now(schedule_id).unwrap();
    assert!(wait_for_status(&scheduler, first, ExecutionStatus::Failed).await);
    let record = scheduler.get_execution(first).unwrap();
    assert_eq!(record.error.as_deref(), Some("panicked: executor for fragile blew up"));
    assert_eq!(record.attempt_count, 1);

    let second = scheduler.trigger_now(schedule_id).unwrap();
    assert!(wait_for_status(&scheduler, second, ExecutionStatus::Completed).await);
    assert_eq!(scheduler.schedule_stats(schedule_id).unwrap().failed, 1);
}

/// Validates that the circuit breaker of a workflow opens after the
/// configured failures and rejects later executions without calling the
/// executor.
///
/// # Test Steps
/// 1. Configure a failure threshold of one
/// 2. Run a failing execution
/// 3. Run a second execution and assert it fails with the circuit-open error
#[tokio::test(start_paused = true)]
async fn test_open_breaker_rejects_executions() {
    let mut config = Config::default();
    config.breaker.failure_threshold = 1;
    let op = ScriptedOperation::always_failing(ExecutionError::unavailable("503 from upstream"));
    let (scheduler, _clock) = scheduler(&config, Arc::new(ScriptedExecutor(op.clone())));
    let schedule_id = manual(&scheduler, "wf", RetryPolicy::no_retry(), Duration::from_secs(30));

    let first = scheduler.trigger_now(schedule_id).unwrap();
    assert!(wait_for_status(&scheduler, first, ExecutionStatus::Failed).await);
    assert_eq!(
        scheduler.get_execution(first).unwrap().error.as_deref(),
        Some("503 from upstream")
    );

    let resource = workflow_resource("wf");
    assert_eq!(scheduler.breaker_metrics(&resource).unwrap().state, CircuitState::Open);

    let second = scheduler.trigger_now(schedule_id).unwrap();
    assert!(wait_for_status(&scheduler, second, ExecutionStatus::Failed).await);

    let record = scheduler.get_execution(second).unwrap();
    assert_eq!(record.error.as_deref(), Some("Circuit open for workflow:wf"));
    assert_eq!(record.attempt_count, 0);
    assert_eq!(op.calls(), 1);
    assert_eq!(scheduler.breaker_metrics(&resource).unwrap().rejected_calls, 1);
}

/// Validates that a fire falling due while the previous execution of the
/// same schedule is in flight is skipped, and the schedule keeps advancing.
///
/// # Test Steps
/// 1. Register a 1s interval schedule on a gated executor
/// 2. Tick at the first fire time and wait for the execution to run
/// 3. Tick at the second fire time and assert nothing is dispatched
/// 4. Release the execution and tick at the third fire time
#[tokio::test(start_paused = true)]
async fn test_overlapping_fire_is_skipped() {
    let executor = Arc::new(GatedExecutor::new());
    let (scheduler, _clock) = scheduler(&Config::default(), executor.clone());
    let schedule_id = scheduler
        .register(
            TriggerKind::interval(Duration::from_secs(1)),
            ExecutionTarget::new("sync"),
            retry(1),
            Duration::from_secs(30),
        )
        .unwrap();
    let first_fire = scheduler.get_schedule(schedule_id).unwrap().next_fire_time.unwrap();
    let second = chrono::Duration::seconds(1);

    let fired = scheduler.tick_at(first_fire);
    assert_eq!(fired.len(), 1);
    assert!(wait_for_status(&scheduler, fired[0], ExecutionStatus::Running).await);

    assert!(scheduler.tick_at(first_fire + second).is_empty());
    assert_eq!(
        scheduler.get_schedule(schedule_id).unwrap().next_fire_time,
        Some(first_fire + second * 2)
    );
    assert!(matches!(scheduler.trigger_now(schedule_id), Err(CadenceError::InvalidState(_))));

    executor.release();
    assert!(wait_for_status(&scheduler, fired[0], ExecutionStatus::Completed).await);

    let next = scheduler.tick_at(first_fire + second * 2);
    assert_eq!(next.len(), 1);
    executor.release();
    assert!(wait_for_status(&scheduler, next[0], ExecutionStatus::Completed).await);

    let records = scheduler.list_executions(&ExecutionFilter::for_schedule(schedule_id));
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.trigger == ExecutionTrigger::Scheduled));
}

/// Validates that pausing a schedule stops future fires without touching
/// the execution in flight, and that pause is idempotent.
///
/// # Test Steps
/// 1. Trigger a gated interval schedule and wait for it to run
/// 2. Pause twice; both succeed and the schedule has no next fire
/// 3. Release the execution and assert it completed
/// 4. Resume and assert the next fire is one interval from now
#[tokio::test(start_paused = true)]
async fn test_pause_leaves_running_execution() {
    let executor = Arc::new(GatedExecutor::new());
    let (scheduler, clock) = scheduler(&Config::default(), executor.clone());
    let schedule_id = scheduler
        .register(
            TriggerKind::interval(Duration::from_secs(60)),
            ExecutionTarget::new("report"),
            retry(1),
            Duration::from_secs(30),
        )
        .unwrap();

    let execution_id = scheduler.trigger_now(schedule_id).unwrap();
    assert!(wait_for_status(&scheduler, execution_id, ExecutionStatus::Running).await);

    scheduler.pause(schedule_id).unwrap();
    scheduler.pause(schedule_id).unwrap();
    let paused = scheduler.get_schedule(schedule_id).unwrap();
    assert_eq!(paused.state, ScheduleState::Paused);
    assert_eq!(paused.next_fire_time, None);
    assert!(scheduler.tick_at(clock.utc_now() + chrono::Duration::hours(1)).is_empty());
    assert_eq!(
        scheduler.get_execution(execution_id).unwrap().status,
        ExecutionStatus::Running
    );

    executor.release();
    assert!(wait_for_status(&scheduler, execution_id, ExecutionStatus::Completed).await);

    scheduler.resume(schedule_id).unwrap();
    let resumed = scheduler.get_schedule(schedule_id).unwrap();
    assert_eq!(resumed.state, ScheduleState::Active);
    assert_eq!(resumed.next_fire_time, Some(clock.utc_now() + chrono::Duration::seconds(60)));
}

/// Validates deferred deregistration: the schedule is removed only once its
/// execution settles, and cannot be fired meanwhile.
///
/// # Test Steps
/// 1. Trigger a gated schedule and wait for it to run
/// 2. Deregister with the default policy and assert the outcome is deferred
/// 3. Assert manual triggers are rejected while removal is pending
/// 4. Release the execution and wait for the schedule to disappear
#[tokio::test(start_paused = true)]
async fn test_deregister_defers_until_execution_settles() {
    let executor = Arc::new(GatedExecutor::new());
    let (scheduler, _clock) = scheduler(&Config::default(), executor.clone());
    let schedule_id = manual(&scheduler, "export", retry(1), Duration::from_secs(30));

    let execution_id = scheduler.trigger_now(schedule_id).unwrap();
    assert!(wait_for_status(&scheduler, execution_id, ExecutionStatus::Running).await);

    let outcome = scheduler.deregister(schedule_id).unwrap();
    assert_eq!(outcome, DeregisterOutcome::Deferred { execution_id });
    assert!(scheduler.get_schedule(schedule_id).unwrap().pending_removal);
    assert!(matches!(scheduler.trigger_now(schedule_id), Err(CadenceError::InvalidState(_))));

    executor.release();
    assert!(wait_until(|| scheduler.get_schedule(schedule_id).is_err()).await);
    assert_eq!(
        scheduler.get_execution(execution_id).unwrap().status,
        ExecutionStatus::Completed
    );
    assert_eq!(scheduler.schedule_stats(schedule_id).unwrap().completed, 1);
}

/// Validates forced deregistration: the execution is stopped, its token
/// cancelled and the schedule removed at once.
///
/// # Test Steps
/// 1. Trigger a schedule on an executor that never returns
/// 2. Deregister with `ForceStop`
/// 3. Assert the schedule is gone and the record stopped
#[tokio::test(start_paused = true)]
async fn test_deregister_force_stop() {
    let executor = Arc::new(HangingExecutor::default());
    let (scheduler, _clock) = scheduler(&Config::default(), executor.clone());
    let schedule_id = manual(&scheduler, "export", retry(1), Duration::from_secs(300));

    let execution_id = scheduler.trigger_now(schedule_id).unwrap();
    assert!(wait_until(|| executor.attempts() == 1).await);

    let outcome = scheduler.deregister_with(schedule_id, DeregisterPolicy::ForceStop).unwrap();
    assert_eq!(outcome, DeregisterOutcome::Removed);
    assert!(matches!(scheduler.get_schedule(schedule_id), Err(CadenceError::NotFound(_))));
    assert!(executor.token(0).is_cancelled());

    let record = scheduler.get_execution(execution_id).unwrap();
    assert_eq!(record.status, ExecutionStatus::Stopped);
    assert_eq!(scheduler.schedule_stats(schedule_id).unwrap().stopped, 1);
}

/// Validates that stopping an execution settles its record immediately and
/// that a settled execution cannot be stopped again.
#[tokio::test(start_paused = true)]
async fn test_stop_execution() {
    let executor = Arc::new(HangingExecutor::default());
    let (scheduler, _clock) = scheduler(&Config::default(), executor.clone());
    let schedule_id = manual(&scheduler, "crawl", retry(1), Duration::from_secs(300));

    let execution_id = scheduler.trigger_now(schedule_id).unwrap();
    assert!(wait_until(|| executor.attempts() == 1).await);

    scheduler.stop_execution(execution_id).unwrap();
    assert_eq!(
        scheduler.get_execution(execution_id).unwrap().status,
        ExecutionStatus::Stopped
    );
    assert!(executor.token(0).is_cancelled());
    assert!(matches!(
        scheduler.stop_execution(execution_id),
        Err(CadenceError::InvalidState(_))
    ));

    // The schedule is free to fire again
    let next = scheduler.trigger_now(schedule_id).unwrap();
    assert_ne!(next, execution_id);
}

/// Validates that the worker pool bounds concurrent executions; excess
/// executions wait as pending.
///
/// # Test Steps
/// 1. Configure a single worker and trigger two gated schedules
/// 2. Assert one runs while the other stays pending
/// 3. Release both and assert both complete
#[tokio::test(start_paused = true)]
async fn test_worker_pool_limits_concurrency() {
    let mut config = Config::default();
    config.scheduler.max_concurrent_executions = 1;
    let executor = Arc::new(GatedExecutor::new());
    let (scheduler, _clock) = scheduler(&config, executor.clone());
    let a = manual(&scheduler, "a", retry(1), Duration::from_secs(300));
    let b = manual(&scheduler, "b", retry(1), Duration::from_secs(300));

    let first = scheduler.trigger_now(a).unwrap();
    let second = scheduler.trigger_now(b).unwrap();
    assert!(wait_until(|| executor.attempts() == 1).await);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let statuses = [first, second].map(|id| scheduler.get_execution(id).unwrap().status);
    assert!(statuses.contains(&ExecutionStatus::Running));
    assert!(statuses.contains(&ExecutionStatus::Pending));
    assert_eq!(executor.attempts(), 1);

    executor.release();
    assert!(wait_until(|| executor.attempts() == 2).await);
    executor.release();
    assert!(wait_for_status(&scheduler, first, ExecutionStatus::Completed).await);
    assert!(wait_for_status(&scheduler, second, ExecutionStatus::Completed).await);
}

/// Validates the tick loop lifecycle: start, fires on schedule, and stop.
///
/// # Test Steps
/// 1. Start with a 100ms tick on a 1s interval schedule
/// 2. Assert a second start fails with `AlreadyRunning`
/// 3. Let 3.5s elapse and stop
/// 4. Assert three completed executions and `NotRunning` on a second stop
#[tokio::test(start_paused = true)]
async fn test_start_stop_lifecycle() {
    let mut config = Config::default();
    config.scheduler.tick_interval_ms = 100;
    let op = ScriptedOperation::new([Ok(serde_json::json!("ok"))]);
    let (scheduler, _clock) = scheduler(&config, Arc::new(ScriptedExecutor(op.clone())));
    let schedule_id = scheduler
        .register(
            TriggerKind::interval(Duration::from_secs(1)),
            ExecutionTarget::new("heartbeat"),
            retry(1),
            Duration::from_secs(30),
        )
        .unwrap();

    assert!(!scheduler.is_running());
    scheduler.start().await.unwrap();
    assert!(scheduler.is_running());
    assert!(matches!(scheduler.start().await, Err(SchedulerError::AlreadyRunning)));

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    scheduler.stop().await.unwrap();
    assert!(!scheduler.is_running());
    assert!(matches!(scheduler.stop().await, Err(SchedulerError::NotRunning)));

    let completed = scheduler.list_executions(
        &ExecutionFilter::for_schedule(schedule_id).status(ExecutionStatus::Completed),
    );
    assert_eq!(completed.len(), 3);
    assert_eq!(op.calls(), 3);
}

/// Validates that stopping the scheduler force-stops executions in flight.
#[tokio::test(start_paused = true)]
async fn test_stop_force_stops_in_flight() {
    let executor = Arc::new(HangingExecutor::default());
    let (scheduler, _clock) = scheduler(&Config::default(), executor.clone());
    let schedule_id = manual(&scheduler, "long", retry(1), Duration::from_secs(3_600));

    scheduler.start().await.unwrap();
    let execution_id = scheduler.trigger_now(schedule_id).unwrap();
    assert!(wait_until(|| executor.attempts() == 1).await);

    scheduler.stop().await.unwrap();
    assert_eq!(
        scheduler.get_execution(execution_id).unwrap().status,
        ExecutionStatus::Stopped
    );
    assert!(executor.token(0).is_cancelled());
}

/// Validates that a one-shot schedule fires once and is then disabled.
#[tokio::test(start_paused = true)]
async fn test_once_trigger_fires_once() {
    let op = ScriptedOperation::new([Ok(serde_json::json!(null))]);
    let (scheduler, clock) = scheduler(&Config::default(), Arc::new(ScriptedExecutor(op)));
    let at = clock.utc_now() + chrono::Duration::minutes(5);
    let schedule_id = scheduler
        .register(
            TriggerKind::once(at),
            ExecutionTarget::new("migration").with_inputs(serde_json::json!({ "dry_run": false })),
            retry(1),
            Duration::from_secs(30),
        )
        .unwrap();

    assert!(scheduler.tick_at(at - chrono::Duration::seconds(1)).is_empty());
    let fired = scheduler.tick_at(at);
    assert_eq!(fired.len(), 1);
    assert!(wait_for_status(&scheduler, fired[0], ExecutionStatus::Completed).await);

    let entry = scheduler.get_schedule(schedule_id).unwrap();
    assert_eq!(entry.state, ScheduleState::Disabled);
    assert_eq!(entry.next_fire_time, None);
    assert!(scheduler.tick_at(at + chrono::Duration::days(1)).is_empty());
}
