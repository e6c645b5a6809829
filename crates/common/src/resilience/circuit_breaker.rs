//! Circuit breaker for calls to a failing dependency
//!
//! State machine:
//! - `Closed` -> `Open` after `failure_threshold` consecutive failures
//! - `Open` -> `HalfOpen` once the cool-down has elapsed and a caller asks
//!   for a permit
//! - `HalfOpen` -> `Closed` when the single probe succeeds
//! - `HalfOpen` -> `Open` when the probe fails, with a cool-down computed by
//!   the configured [`CooldownPolicy`]
//!
//! Admission is handed out as a [`CallPermit`]. Only one probe permit exists
//! while the breaker is half-open; a probe dropped without an outcome (for
//! example because the caller's future was cancelled) frees the slot again.
//! Rejected calls never count as failures.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
use crate::time::{Clock, SystemClock};

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        })
    }
}

/// How the cool-down grows when the breaker re-opens without recovering
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CooldownPolicy {
    /// Every open period lasts the configured cool-down
    #[default]
    Fixed,
    /// The n-th consecutive open lasts `cooldown * multiplier^(n-1)`,
    /// capped at `max`
    Exponential { multiplier: f64, max: Duration },
}

impl CooldownPolicy {
    /// Cool-down for the `consecutive_opens`-th open period in a row
    pub fn cooldown_for(&self, base: Duration, consecutive_opens: u32) -> Duration {
        let Self::Exponential { multiplier, max } = self else {
            return base;
        };
        let exponent = i32::try_from(consecutive_opens.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = base.as_secs_f64() * multiplier.powi(exponent);
        if secs.is_finite() && secs < max.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            *max
        }
    }
}

/// Thresholds and timings of a breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed breaker
    pub failure_threshold: u64,
    /// How long an open breaker rejects calls before admitting a probe
    pub cooldown: Duration,
    pub cooldown_policy: CooldownPolicy,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            cooldown_policy: CooldownPolicy::Fixed,
        }
    }
}

impl CircuitBreakerConfig {
    /// Start from the defaults and adjust with the builder
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::new("failure_threshold must be at least 1"));
        }
        if let CooldownPolicy::Exponential { multiplier, max } = &self.cooldown_policy {
            if !multiplier.is_finite() || *multiplier < 1.0 {
                return Err(ConfigError::new("cooldown multiplier must be at least 1.0"));
            }
            if *max < self.cooldown {
                return Err(ConfigError::new("max cooldown is shorter than the cooldown"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cooldown = cooldown;
        self
    }

    /// Grow the cool-down by `multiplier` per failed probe, up to `max`
    pub fn exponential_cooldown(mut self, multiplier: f64, max: Duration) -> Self {
        self.config.cooldown_policy = CooldownPolicy::Exponential { multiplier, max };
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    /// Consecutive failures since the breaker last closed or saw a success
    pub failure_count: u64,
    /// Open periods in a row without a successful probe
    pub consecutive_opens: u32,
    /// Calls that received a permit, probes included
    pub admitted_calls: u64,
    /// Calls refused while open or while the probe was taken
    pub rejected_calls: u64,
    pub successes: u64,
    pub failures: u64,
    /// When an open breaker will admit its next probe
    pub open_until: Option<Instant>,
    pub last_failure_time: Option<Instant>,
    pub last_transition: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen { probe_taken: bool },
}

impl Phase {
    fn state(self) -> CircuitState {
        match self {
            Self::Closed => CircuitState::Closed,
            Self::Open { .. } => CircuitState::Open,
            Self::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

#[derive(Debug)]
struct Shared {
    phase: Phase,
    failure_count: u64,
    consecutive_opens: u32,
    last_failure_time: Option<Instant>,
    last_transition: Instant,
}

impl Shared {
    fn new(now: Instant) -> Self {
        Self {
            phase: Phase::Closed,
            failure_count: 0,
            consecutive_opens: 0,
            last_failure_time: None,
            last_transition: now,
        }
    }

    fn enter(&mut self, phase: Phase, now: Instant) {
        self.phase = phase;
        self.last_transition = now;
    }
}

#[derive(Debug, Default)]
struct Tally {
    admitted: AtomicU64,
    rejected: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl Tally {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Admission to call the protected operation
///
/// Resolve it with [`CallPermit::record_success`] or
/// [`CallPermit::record_failure`]. Dropping it unresolved leaves the failure
/// count alone and frees the probe slot.
#[must_use = "resolve the permit with record_success or record_failure"]
pub struct CallPermit<C: Clock = SystemClock> {
    breaker: CircuitBreaker<C>,
    probe: bool,
    resolved: bool,
}

impl<C: Clock> CallPermit<C> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record_success(mut self) {
        self.resolved = true;
        self.breaker.succeeded(self.probe);
    }

    pub fn record_failure(mut self) {
        self.resolved = true;
        self.breaker.failed(self.probe);
    }
}

impl<C: Clock> fmt::Debug for CallPermit<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("resource", &self.breaker.name())
            .field("probe", &self.probe)
            .finish()
    }
}

impl<C: Clock> Drop for CallPermit<C> {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            self.breaker.probe_abandoned();
        }
    }
}

/// Breaker guarding one named resource
///
/// Clones share state, so the same breaker can be handed to every task that
/// calls the resource.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    shared: Arc<Mutex<Shared>>,
    tally: Arc<Tally>,
    clock: Arc<C>,
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            config: Arc::clone(&self.config),
            shared: Arc::clone(&self.shared),
            tally: Arc::clone(&self.tally),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker<SystemClock> {
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_validated(config, Arc::new(clock)))
    }

    pub(crate) fn from_validated(config: CircuitBreakerConfig, clock: Arc<C>) -> Self {
        Self {
            name: Arc::from("unnamed"),
            config: Arc::new(config),
            shared: Arc::new(Mutex::new(Shared::new(clock.now()))),
            tally: Arc::new(Tally::default()),
            clock,
        }
    }

    /// Set the resource name used in logs and rejection errors
    #[must_use]
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask for permission to call the protected operation
    ///
    /// Returns `None` while open and while the half-open probe is out. An
    /// open breaker past its cool-down turns half-open and hands out the
    /// probe.
    pub fn try_acquire(&self) -> Option<CallPermit<C>> {
        let now = self.clock.now();
        let probe = {
            let mut shared = self.shared.lock();
            match shared.phase {
                Phase::Closed => Some(false),
                Phase::Open { until } if now >= until => {
                    shared.enter(Phase::HalfOpen { probe_taken: true }, now);
                    info!(resource = %self.name, "Circuit half-open, admitting probe");
                    Some(true)
                }
                Phase::HalfOpen { probe_taken: false } => {
                    shared.phase = Phase::HalfOpen { probe_taken: true };
                    Some(true)
                }
                Phase::Open { .. } | Phase::HalfOpen { probe_taken: true } => None,
            }
        };

        if let Some(probe) = probe {
            Tally::bump(&self.tally.admitted);
            Some(CallPermit { breaker: self.clone(), probe, resolved: false })
        } else {
            Tally::bump(&self.tally.rejected);
            debug!(resource = %self.name, "Call rejected by open circuit");
            None
        }
    }

    /// Run `operation` if the breaker admits it and record the outcome
    #[instrument(skip(self, operation), fields(resource = %self.name))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.try_acquire().ok_or(ResilienceError::CircuitOpen)?;
        match operation().await {
            Ok(value) => {
                permit.record_success();
                Ok(value)
            }
            Err(source) => {
                permit.record_failure();
                debug!(error = %source, "Protected call failed");
                Err(ResilienceError::OperationFailed { source })
            }
        }
    }

    /// Current state; an open breaker past its cool-down still reports
    /// `Open` until the next caller asks for a permit
    pub fn state(&self) -> CircuitState {
        self.shared.lock().phase.state()
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let shared = self.shared.lock();
        CircuitBreakerMetrics {
            state: shared.phase.state(),
            failure_count: shared.failure_count,
            consecutive_opens: shared.consecutive_opens,
            admitted_calls: Tally::read(&self.tally.admitted),
            rejected_calls: Tally::read(&self.tally.rejected),
            successes: Tally::read(&self.tally.successes),
            failures: Tally::read(&self.tally.failures),
            open_until: match shared.phase {
                Phase::Open { until } => Some(until),
                Phase::Closed | Phase::HalfOpen { .. } => None,
            },
            last_failure_time: shared.last_failure_time,
            last_transition: shared.last_transition,
        }
    }

    fn succeeded(&self, probe: bool) {
        Tally::bump(&self.tally.successes);
        let now = self.clock.now();
        let mut shared = self.shared.lock();
        if probe {
            let opens = shared.consecutive_opens;
            *shared = Shared::new(now);
            info!(resource = %self.name, opens, "Circuit closed after successful probe");
        } else if shared.phase == Phase::Closed {
            shared.failure_count = 0;
        }
        // A call admitted before the breaker tripped cannot close it
    }

    fn failed(&self, probe: bool) {
        Tally::bump(&self.tally.failures);
        let now = self.clock.now();
        let mut shared = self.shared.lock();
        shared.last_failure_time = Some(now);

        if probe {
            self.open(&mut shared, now);
        } else if shared.phase == Phase::Closed {
            shared.failure_count += 1;
            if shared.failure_count >= self.config.failure_threshold {
                self.open(&mut shared, now);
            }
        }
    }

    fn probe_abandoned(&self) {
        let mut shared = self.shared.lock();
        if shared.phase == (Phase::HalfOpen { probe_taken: true }) {
            shared.phase = Phase::HalfOpen { probe_taken: false };
            debug!(resource = %self.name, "Probe dropped without outcome, slot released");
        }
    }

    fn open(&self, shared: &mut Shared, now: Instant) {
        shared.consecutive_opens = shared.consecutive_opens.saturating_add(1);
        let cooldown =
            self.config.cooldown_policy.cooldown_for(self.config.cooldown, shared.consecutive_opens);
        shared.enter(Phase::Open { until: now + cooldown }, now);
        warn!(
            resource = %self.name,
            failures = shared.failure_count,
            consecutive_opens = shared.consecutive_opens,
            ?cooldown,
            "Circuit opened"
        );
    }
}
