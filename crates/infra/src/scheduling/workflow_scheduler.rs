//! Workflow scheduler
//!
//! Owns the schedule registry and execution history, drives ticks from a
//! single background task and dispatches due executions onto a bounded
//! worker pool.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use cadence_domain::{Config, ExecutionTarget, RetryPolicy, TriggerKind};
//! use cadence_infra::scheduling::WorkflowScheduler;
//!
//! # async fn example(executor: Arc<dyn cadence_core::WorkflowExecutor>) -> anyhow::Result<()> {
//! let scheduler = WorkflowScheduler::new(&Config::default(), executor)?;
//! scheduler.register(
//!     TriggerKind::cron("0 2 * * *"),
//!     ExecutionTarget::new("nightly-report"),
//!     RetryPolicy::default(),
//!     Duration::from_secs(600),
//! )?;
//!
//! scheduler.start().await?;
//! // ... application runs ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadence_common::resilience::{
    CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerRegistry,
};
use cadence_common::time::{Clock, SystemClock};
use cadence_core::{ExecutionHistory, ScheduleRegistry, WorkflowExecutor};
use cadence_domain::{
    BreakerDefaults, CadenceError, Config, DeregisterOutcome, DeregisterPolicy, ExecutionFilter,
    ExecutionId, ExecutionRecord, ExecutionTarget, ExecutionTrigger, Result, RetryPolicy,
    ScheduleEntry, ScheduleId, ScheduleSpec, ScheduleStats, ScheduleUpdate, TriggerKind,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use super::dispatch::{dispatch, workflow_resource, Job, Outcome};
use super::error::{SchedulerError, SchedulerResult};

struct Driver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Type alias for the driver slot to avoid complexity warnings
type DriverSlot = Arc<tokio::sync::Mutex<Option<Driver>>>;

struct State {
    registry: ScheduleRegistry,
    history: ExecutionHistory,
}

struct Inner<C: Clock> {
    clock: C,
    executor: Arc<dyn WorkflowExecutor>,
    state: Mutex<State>,
    breakers: CircuitBreakerRegistry<C>,
    workers: Arc<Semaphore>,
    /// Cancellation tokens of executions that are pending or running
    tokens: DashMap<ExecutionId, CancellationToken>,
    tasks: TaskTracker,
    tick_interval: Duration,
    shutdown_timeout: Duration,
    deregister_policy: DeregisterPolicy,
}

/// Scheduler for registered workflow triggers
///
/// All control and query operations are synchronous and safe to call from
/// any task; only [`start`](Self::start) and [`stop`](Self::stop) await.
pub struct WorkflowScheduler<C: Clock + Clone = SystemClock> {
    inner: Arc<Inner<C>>,
    driver: DriverSlot,
    running: AtomicBool,
}

impl WorkflowScheduler<SystemClock> {
    /// Create a scheduler on the system clock
    ///
    /// # Errors
    /// Returns `CadenceError::Config` when `config` fails validation.
    pub fn new(config: &Config, executor: Arc<dyn WorkflowExecutor>) -> Result<Self> {
        Self::with_clock(config, executor, SystemClock)
    }
}

impl<C: Clock + Clone> WorkflowScheduler<C> {
    /// Create a scheduler reading time from `clock`
    ///
    /// # Errors
    /// Returns `CadenceError::Config` when `config` fails validation.
    pub fn with_clock(config: &Config, executor: Arc<dyn WorkflowExecutor>, clock: C) -> Result<Self> {
        config.validate()?;
        let timezone = config.scheduler.time_zone()?;
        let breakers = CircuitBreakerRegistry::with_clock(breaker_config(&config.breaker)?, clock.clone())
            .map_err(|e| CadenceError::Config(e.to_string()))?;

        let inner = Inner {
            clock,
            executor,
            state: Mutex::new(State {
                registry: ScheduleRegistry::new(
                    timezone,
                    config.retry.policy(),
                    config.scheduler.default_timeout(),
                ),
                history: ExecutionHistory::new(config.history.clone()),
            }),
            breakers,
            workers: Arc::new(Semaphore::new(config.scheduler.max_concurrent_executions)),
            tokens: DashMap::new(),
            tasks: TaskTracker::new(),
            tick_interval: config.scheduler.tick_interval(),
            shutdown_timeout: config.scheduler.shutdown_timeout(),
            deregister_policy: config.scheduler.deregister_policy,
        };

        Ok(Self {
            inner: Arc::new(inner),
            driver: Arc::new(tokio::sync::Mutex::new(None)),
            running: AtomicBool::new(false),
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the tick loop
    ///
    /// # Errors
    /// Returns `SchedulerError::AlreadyRunning` if the loop is running.
    #[instrument(skip(self))]
    pub async fn start(&self) -> SchedulerResult<()> {
        let mut driver = self.driver.lock().await;
        if driver.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(tick_interval = ?self.inner.tick_interval, "Starting workflow scheduler");

        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            inner.tick_loop(loop_cancel).await;
        });
        *driver = Some(Driver { cancel, handle });
        self.running.store(true, Ordering::Release);

        info!("Workflow scheduler started");
        Ok(())
    }

    /// Stop the tick loop and force-stop executions in flight
    ///
    /// Waits up to the configured shutdown timeout for the loop, then for
    /// the execution tasks to observe their cancellation.
    ///
    /// # Errors
    /// Returns `SchedulerError::NotRunning` if the loop is not running and
    /// `SchedulerError::Timeout` if it does not exit in time.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> SchedulerResult<()> {
        let Some(Driver { cancel, handle }) = self.driver.lock().await.take() else {
            return Err(SchedulerError::NotRunning);
        };
        self.running.store(false, Ordering::Release);

        info!("Stopping workflow scheduler");
        cancel.cancel();

        let join_timeout = self.inner.shutdown_timeout;
        tokio::time::timeout(join_timeout, handle)
            .await
            .map_err(|source| SchedulerError::Timeout { duration: join_timeout, source })??;

        let stopped = self.inner.stop_in_flight();
        self.inner.tasks.close();
        let drained = tokio::time::timeout(join_timeout, self.inner.tasks.wait()).await;
        self.inner.tasks.reopen();
        if drained.is_err() {
            warn!(?join_timeout, "Execution tasks still running after shutdown timeout");
        }

        info!(stopped, "Workflow scheduler stopped");
        Ok(())
    }

    /// Whether the tick loop is running
    ///
    /// True from a successful [`start`](Self::start) until
    /// [`stop`](Self::stop) begins shutting down; never blocks.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one tick at `now`
    ///
    /// The tick loop calls this with the clock's current time; tests call it
    /// directly to drive the scheduler deterministically. Returns the
    /// executions that were dispatched.
    pub fn tick_at(&self, now: DateTime<Utc>) -> Vec<ExecutionId> {
        self.inner.tick(now)
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a schedule
    ///
    /// # Errors
    /// Returns `CadenceError::InvalidTrigger` for an unparsable cron
    /// expression or a non-positive interval.
    pub fn register(
        &self,
        trigger: TriggerKind,
        target: ExecutionTarget,
        retry_policy: RetryPolicy,
        timeout: Duration,
    ) -> Result<ScheduleId> {
        self.register_spec(
            ScheduleSpec::new(trigger, target).with_retry_policy(retry_policy).with_timeout(timeout),
        )
    }

    /// Register a schedule, falling back to the configured defaults for a
    /// missing retry policy or timeout
    ///
    /// # Errors
    /// Same as [`register`](Self::register), plus `CadenceError::Config` for
    /// an invalid retry policy or a zero timeout.
    #[instrument(skip(self, spec), fields(workflow_id = %spec.target.workflow_id))]
    pub fn register_spec(&self, spec: ScheduleSpec) -> Result<ScheduleId> {
        let now = self.inner.clock.utc_now();
        let schedule_id = self.inner.state.lock().registry.register(spec, now)?;
        info!(%schedule_id, "Schedule registered");
        Ok(schedule_id)
    }

    /// Replace parts of a schedule
    ///
    /// # Errors
    /// `NotFound` for an unknown schedule; validation errors as for
    /// registration.
    #[instrument(skip(self, update))]
    pub fn update(&self, schedule_id: ScheduleId, update: ScheduleUpdate) -> Result<()> {
        let now = self.inner.clock.utc_now();
        self.inner.state.lock().registry.update(schedule_id, update, now)?;
        info!(%schedule_id, "Schedule updated");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    /// Stop future fires; an execution in flight keeps running
    ///
    /// # Errors
    /// Returns `CadenceError::NotFound` for an unknown schedule.
    #[instrument(skip(self))]
    pub fn pause(&self, schedule_id: ScheduleId) -> Result<()> {
        let now = self.inner.clock.utc_now();
        let changed = self.inner.state.lock().registry.pause(schedule_id, now)?;
        log_state_change(schedule_id, "paused", changed);
        Ok(())
    }

    /// Re-activate a paused or disabled schedule from now
    ///
    /// # Errors
    /// Returns `CadenceError::NotFound` for an unknown schedule.
    #[instrument(skip(self))]
    pub fn resume(&self, schedule_id: ScheduleId) -> Result<()> {
        let now = self.inner.clock.utc_now();
        let changed = self.inner.state.lock().registry.resume(schedule_id, now)?;
        log_state_change(schedule_id, "resumed", changed);
        Ok(())
    }

    /// Disable until resumed
    ///
    /// # Errors
    /// Returns `CadenceError::NotFound` for an unknown schedule.
    #[instrument(skip(self))]
    pub fn disable(&self, schedule_id: ScheduleId) -> Result<()> {
        let now = self.inner.clock.utc_now();
        let changed = self.inner.state.lock().registry.disable(schedule_id, now)?;
        log_state_change(schedule_id, "disabled", changed);
        Ok(())
    }

    /// Remove a schedule using the configured [`DeregisterPolicy`]
    ///
    /// # Errors
    /// Returns `CadenceError::NotFound` for an unknown schedule.
    pub fn deregister(&self, schedule_id: ScheduleId) -> Result<DeregisterOutcome> {
        self.deregister_with(schedule_id, self.inner.deregister_policy)
    }

    /// Remove a schedule
    ///
    /// Without an execution in flight the schedule is removed at once. With
    /// one, `Defer` removes it when the execution settles and `ForceStop`
    /// stops the execution first.
    ///
    /// # Errors
    /// Returns `CadenceError::NotFound` for an unknown schedule.
    #[instrument(skip(self))]
    pub fn deregister_with(
        &self,
        schedule_id: ScheduleId,
        policy: DeregisterPolicy,
    ) -> Result<DeregisterOutcome> {
        let now = self.inner.clock.utc_now();
        let mut state = self.inner.state.lock();
        if !state.registry.contains(schedule_id) {
            return Err(CadenceError::schedule_not_found(schedule_id));
        }

        match (state.history.in_flight(schedule_id), policy) {
            (None, _) => {
                state.registry.remove(schedule_id)?;
                info!(%schedule_id, "Schedule deregistered");
                Ok(DeregisterOutcome::Removed)
            }
            (Some(execution_id), DeregisterPolicy::Defer) => {
                state.registry.mark_pending_removal(schedule_id, now)?;
                info!(%schedule_id, %execution_id, "Deregistration deferred until execution settles");
                Ok(DeregisterOutcome::Deferred { execution_id })
            }
            (Some(execution_id), DeregisterPolicy::ForceStop) => {
                state.history.stop(execution_id, now)?;
                state.registry.remove(schedule_id)?;
                drop(state);
                self.inner.cancel_execution(execution_id);
                info!(%schedule_id, %execution_id, "Execution stopped and schedule deregistered");
                Ok(DeregisterOutcome::Removed)
            }
        }
    }

    /// Fire a schedule now, whatever its trigger or state
    ///
    /// # Errors
    /// `NotFound` for an unknown schedule; `InvalidState` while an execution
    /// of the schedule is in flight or the schedule awaits removal.
    #[instrument(skip(self))]
    pub fn trigger_now(&self, schedule_id: ScheduleId) -> Result<ExecutionId> {
        let now = self.inner.clock.utc_now();
        let mut state = self.inner.state.lock();
        let entry = state
            .registry
            .get(schedule_id)
            .ok_or_else(|| CadenceError::schedule_not_found(schedule_id))?;
        if entry.pending_removal {
            return Err(CadenceError::InvalidState(format!(
                "schedule {schedule_id} is being deregistered"
            )));
        }
        let job = Job::from_entry(entry);
        let execution_id =
            state.history.begin(schedule_id, &job.workflow_id, ExecutionTrigger::Manual, now)?;
        state.registry.record_manual_fire(schedule_id, now)?;
        drop(state);

        info!(%schedule_id, %execution_id, "Manual trigger");
        self.inner.spawn(execution_id, job);
        Ok(execution_id)
    }

    /// Force-stop an execution and cancel its token
    ///
    /// # Errors
    /// `NotFound` for an unknown execution; `InvalidState` if it already
    /// settled.
    #[instrument(skip(self))]
    pub fn stop_execution(&self, execution_id: ExecutionId) -> Result<()> {
        let now = self.inner.clock.utc_now();
        self.inner.state.lock().history.stop(execution_id, now)?;
        self.inner.cancel_execution(execution_id);
        info!(%execution_id, "Execution stopped");
        Ok(())
    }

    /// Use `config` for the circuit breaker of `workflow_id` instead of the
    /// defaults
    ///
    /// # Errors
    /// Returns `CadenceError::Config` for an invalid breaker configuration.
    pub fn set_breaker_override(&self, workflow_id: &str, config: CircuitBreakerConfig) -> Result<()> {
        self.inner
            .breakers
            .set_override(workflow_resource(workflow_id), config)
            .map_err(|e| CadenceError::Config(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Every registered schedule, including ones awaiting removal
    pub fn list_schedules(&self) -> Vec<ScheduleEntry> {
        self.inner.state.lock().registry.list()
    }

    /// One schedule by id
    ///
    /// # Errors
    /// Returns `CadenceError::NotFound` for an unknown schedule.
    pub fn get_schedule(&self, schedule_id: ScheduleId) -> Result<ScheduleEntry> {
        self.inner
            .state
            .lock()
            .registry
            .get(schedule_id)
            .cloned()
            .ok_or_else(|| CadenceError::schedule_not_found(schedule_id))
    }

    /// Executions matching `filter`, newest first
    pub fn list_executions(&self, filter: &ExecutionFilter) -> Vec<ExecutionRecord> {
        self.inner.state.lock().history.query(filter)
    }

    /// One execution record by id
    ///
    /// # Errors
    /// Returns `CadenceError::NotFound` for an unknown or pruned execution.
    pub fn get_execution(&self, execution_id: ExecutionId) -> Result<ExecutionRecord> {
        self.inner
            .state
            .lock()
            .history
            .get(execution_id)
            .cloned()
            .ok_or_else(|| CadenceError::execution_not_found(execution_id))
    }

    /// Statistics over the retained executions of a schedule
    ///
    /// Works for deregistered schedules while their history is retained.
    ///
    /// # Errors
    /// Returns `CadenceError::NotFound` when the schedule is unknown and has
    /// no retained executions.
    pub fn schedule_stats(&self, schedule_id: ScheduleId) -> Result<ScheduleStats> {
        let state = self.inner.state.lock();
        let stats = state.history.stats(schedule_id);
        if stats.total == 0 && !state.registry.contains(schedule_id) {
            return Err(CadenceError::schedule_not_found(schedule_id));
        }
        Ok(stats)
    }

    /// Metrics of the breaker guarding `resource`, if it has been used
    ///
    /// Workflow breakers are named by [`workflow_resource`].
    pub fn breaker_metrics(&self, resource: &str) -> Option<CircuitBreakerMetrics> {
        self.inner.breakers.metrics(resource)
    }
}

impl<C: Clock + Clone> Drop for WorkflowScheduler<C> {
    fn drop(&mut self) {
        if let Ok(guard) = self.driver.try_lock() {
            if let Some(driver) = guard.as_ref() {
                if !driver.cancel.is_cancelled() && !driver.handle.is_finished() {
                    warn!("WorkflowScheduler dropped while running; cancelling");
                    driver.cancel.cancel();
                }
            }
        }
    }
}

impl<C: Clock + Clone> Inner<C> {
    async fn tick_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Tick loop cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let dispatched = self.tick(self.clock.utc_now());
                    if !dispatched.is_empty() {
                        debug!(count = dispatched.len(), "Dispatched due executions");
                    }
                }
            }
        }
    }

    fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<ExecutionId> {
        let mut launched = Vec::new();
        {
            let mut guard = self.state.lock();
            let State { registry, history } = &mut *guard;

            for schedule_id in registry.due(now) {
                let Some(entry) = registry.get(schedule_id) else { continue };
                let fired = if let Some(running) = history.in_flight(schedule_id) {
                    debug!(%schedule_id, execution_id = %running, "Previous execution in flight; skipping fire");
                    false
                } else {
                    let job = Job::from_entry(entry);
                    match history.begin(schedule_id, &job.workflow_id, ExecutionTrigger::Scheduled, now)
                    {
                        Ok(execution_id) => {
                            launched.push((execution_id, job));
                            true
                        }
                        Err(err) => {
                            warn!(%schedule_id, error = %err, "Failed to begin execution");
                            false
                        }
                    }
                };
                if let Err(err) = registry.advance(schedule_id, now, fired) {
                    warn!(%schedule_id, error = %err, "Failed to advance schedule");
                }
            }

            history.prune(now);
        }

        launched
            .into_iter()
            .map(|(execution_id, job)| {
                self.spawn(execution_id, job);
                execution_id
            })
            .collect()
    }

    fn spawn(self: &Arc<Self>, execution_id: ExecutionId, job: Job) {
        let cancel = CancellationToken::new();
        self.tokens.insert(execution_id, cancel.clone());
        let inner = Arc::clone(self);
        self.tasks.spawn(async move {
            inner.run(execution_id, job, cancel).await;
        });
    }

    async fn run(self: Arc<Self>, execution_id: ExecutionId, job: Job, cancel: CancellationToken) {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.finish(execution_id, job.schedule_id);
                return;
            }
            permit = Arc::clone(&self.workers).acquire_owned() => permit,
        };
        let Ok(permit) = permit else {
            self.settle(execution_id, Outcome::Failed("worker pool closed".into()));
            self.finish(execution_id, job.schedule_id);
            return;
        };

        let started = self.state.lock().history.mark_running(execution_id, self.clock.utc_now());
        if let Err(err) = started {
            debug!(%execution_id, error = %err, "Execution settled before it started");
            self.finish(execution_id, job.schedule_id);
            return;
        }
        debug!(%execution_id, workflow_id = %job.workflow_id, "Execution running");

        let breaker = self.breakers.get_or_create(&workflow_resource(&job.workflow_id));
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            outcome = dispatch(
                Arc::clone(&self.executor),
                breaker,
                &job,
                execution_id,
                &cancel,
                |attempt| self.record_attempt(execution_id, attempt),
            ) => Some(outcome),
        };
        drop(permit);

        if let Some(outcome) = outcome {
            self.settle(execution_id, outcome);
        }
        self.finish(execution_id, job.schedule_id);
    }

    fn record_attempt(&self, execution_id: ExecutionId, attempt: u32) {
        if let Err(err) = self.state.lock().history.record_attempt(execution_id, attempt) {
            debug!(%execution_id, attempt, error = %err, "Attempt not recorded");
        }
    }

    fn settle(&self, execution_id: ExecutionId, outcome: Outcome) {
        let now = self.clock.utc_now();
        let mut state = self.state.lock();
        let result = match outcome {
            Outcome::Completed(outputs) => {
                let result = state.history.complete(execution_id, outputs, now);
                if result.is_ok() {
                    info!(%execution_id, "Execution completed");
                }
                result
            }
            Outcome::Failed(error) => {
                warn!(%execution_id, %error, "Execution failed");
                state.history.fail(execution_id, error, now)
            }
        };
        if let Err(err) = result {
            debug!(%execution_id, error = %err, "Outcome arrived after the execution settled");
        }
    }

    /// Release the execution's token and complete a deferred deregistration
    fn finish(&self, execution_id: ExecutionId, schedule_id: ScheduleId) {
        self.tokens.remove(&execution_id);

        let mut state = self.state.lock();
        let awaiting_removal =
            state.registry.get(schedule_id).is_some_and(|entry| entry.pending_removal);
        if awaiting_removal && state.history.in_flight(schedule_id).is_none() {
            if state.registry.remove(schedule_id).is_ok() {
                info!(%schedule_id, "Deferred deregistration completed");
            }
        }
    }

    fn cancel_execution(&self, execution_id: ExecutionId) {
        if let Some((_, token)) = self.tokens.remove(&execution_id) {
            token.cancel();
        }
    }

    /// Stop every execution in flight; returns how many were stopped
    fn stop_in_flight(&self) -> usize {
        let now = self.clock.utc_now();
        let stopped: Vec<ExecutionId> = {
            let mut state = self.state.lock();
            state
                .history
                .in_flight_ids()
                .into_iter()
                .filter(|id| state.history.stop(*id, now).is_ok())
                .collect()
        };
        for execution_id in &stopped {
            self.cancel_execution(*execution_id);
        }
        stopped.len()
    }
}

fn log_state_change(schedule_id: ScheduleId, action: &str, changed: bool) {
    if changed {
        info!(%schedule_id, "Schedule {action}");
    } else {
        debug!(%schedule_id, "Schedule already {action}; nothing to do");
    }
}

fn breaker_config(defaults: &BreakerDefaults) -> Result<CircuitBreakerConfig> {
    let mut builder = CircuitBreakerConfig::new()
        .failure_threshold(defaults.failure_threshold)
        .cooldown(defaults.cooldown());
    if let Some(multiplier) = defaults.cooldown_multiplier {
        builder = builder.exponential_cooldown(multiplier, defaults.max_cooldown());
    }
    builder.build().map_err(|e| CadenceError::Config(e.to_string()))
}
