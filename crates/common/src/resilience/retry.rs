//! Retry with backoff
//!
//! [`RetryExecutor`] re-runs a fallible async operation according to a
//! [`RetryConfig`] (attempt limit, backoff, jitter, optional time budget)
//! and a [`RetryPolicy`] that decides which errors are worth another
//! attempt. Errors that report their own category implement
//! [`ClassifyError`] and are filtered with [`policies::RetryableKinds`].
//!
//! Delays are slept on tokio's timer, so tests can run on paused time.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Why a retried operation gave up
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every allowed attempt failed; `source` is the error of the last one
    #[error("All retry attempts exhausted after {attempts} tries")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The policy refused to retry `source`
    #[error("Operation failed with non-retryable error")]
    NonRetryable {
        #[source]
        source: E,
    },

    #[error("Invalid retry configuration: {message}")]
    InvalidConfiguration { message: String },

    /// The time budget ran out before another attempt could start
    #[error("Retry timeout exceeded after {elapsed:?}")]
    TimeoutExceeded { elapsed: Duration },
}

impl<E> RetryError<E> {
    /// Error returned by the last attempt, if any attempt ran
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source } => Some(source),
            Self::InvalidConfiguration { .. } | Self::TimeoutExceeded { .. } => None,
        }
    }

    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source } => Some(source),
            Self::InvalidConfiguration { .. } | Self::TimeoutExceeded { .. } => None,
        }
    }
}

pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Result of a retry run together with how it got there
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: RetryResult<T, E>,
    /// Times the operation was invoked
    pub attempts: u32,
    /// Time spent sleeping between attempts
    pub total_delay: Duration,
    /// Wall time from the first attempt to the result
    pub elapsed: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn into_result(self) -> RetryResult<T, E> {
        self.result
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.result, Err(RetryError::TimeoutExceeded { .. }))
    }
}

/// Decides whether a failed attempt is retried
///
/// `attempt` is the zero-based index of the attempt that produced `error`.
pub trait RetryPolicy<E> {
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Errors that know which category of failure they represent
pub trait ClassifyError {
    type Kind: Eq + Hash + Clone + fmt::Debug;

    fn kind(&self) -> Self::Kind;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the configured backoff
    Retry,
    /// Retry after the given delay instead of the backoff
    RetryAfter(Duration),
    Stop,
}

/// Delay before the next attempt, by zero-based index of the failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    Fixed(Duration),
    /// `initial_delay * factor^attempt`, capped at `max_delay`
    Exponential { initial_delay: Duration, factor: f64, max_delay: Duration },
}

impl BackoffStrategy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential { initial_delay, factor, max_delay } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let scaled = initial_delay.as_secs_f64() * factor.powi(exponent);
                if scaled.is_finite() && scaled < max_delay.as_secs_f64() {
                    Duration::from_secs_f64(scaled)
                } else {
                    *max_delay
                }
            }
        }
    }
}

/// Randomisation applied on top of the backoff delay
#[derive(Debug, Clone, PartialEq)]
pub enum Jitter {
    None,
    /// Uniform in `[0, delay]`
    Full,
    /// `delay * (1 + U[0, factor))`; never shortens the delay
    Proportional(f64),
}

impl Jitter {
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Self::None => delay,
            Self::Full => {
                let max = delay.as_nanos().min(u128::from(u64::MAX)) as u64;
                if max == 0 {
                    delay
                } else {
                    Duration::from_nanos(rand::thread_rng().gen_range(0..=max))
                }
            }
            Self::Proportional(factor) => {
                if !factor.is_finite() || *factor <= 0.0 {
                    return delay;
                }
                let extra: f64 = rand::thread_rng().gen_range(0.0..*factor);
                delay.mul_f64(1.0 + extra)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    pub jitter: Jitter,
    /// Stop starting new attempts once this much time has passed
    pub max_total_time: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(100), Duration::from_secs(30))
    }
}

impl RetryConfig {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Doubling backoff from `base` capped at `cap` with up to 20%
    /// proportional jitter and no time budget
    pub fn exponential(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::Exponential { initial_delay: base, factor: 2.0, max_delay: cap },
            jitter: Jitter::Proportional(0.2),
            max_total_time: None,
        }
    }

    /// Backoff plus jitter after the failed attempt with index `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.jitter.apply(self.backoff.delay_for(attempt))
    }

    pub fn validate(&self) -> Result<(), RetryError<()>> {
        let invalid = |message: &str| {
            Err(RetryError::InvalidConfiguration { message: message.to_string() })
        };
        if self.max_attempts == 0 {
            return invalid("max_attempts must be greater than 0");
        }
        if let BackoffStrategy::Exponential { factor, initial_delay, max_delay } = &self.backoff {
            if !factor.is_finite() || *factor < 1.0 {
                return invalid("exponential factor must be at least 1");
            }
            if max_delay < initial_delay {
                return invalid("max_delay must not be below initial_delay");
            }
        }
        if let Jitter::Proportional(factor) = self.jitter {
            if !factor.is_finite() || factor < 0.0 {
                return invalid("proportional jitter factor must be a non-negative number");
            }
        }
        Ok(())
    }
}

/// Fluent builder for [`RetryConfig`], starting from the defaults
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Fixed(delay);
        self
    }

    pub fn exponential_backoff(
        mut self,
        initial_delay: Duration,
        factor: f64,
        max_delay: Duration,
    ) -> Self {
        self.config.backoff = BackoffStrategy::Exponential { initial_delay, factor, max_delay };
        self
    }

    pub fn no_jitter(mut self) -> Self {
        self.config.jitter = Jitter::None;
        self
    }

    pub fn full_jitter(mut self) -> Self {
        self.config.jitter = Jitter::Full;
        self
    }

    pub fn proportional_jitter(mut self, factor: f64) -> Self {
        self.config.jitter = Jitter::Proportional(factor);
        self
    }

    pub fn max_total_time(mut self, budget: Duration) -> Self {
        self.config.max_total_time = Some(budget);
        self
    }

    pub fn build(self) -> Result<RetryConfig, RetryError<()>> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Runs operations under a [`RetryConfig`] and a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryExecutor<P> {
    config: RetryConfig,
    policy: P,
}

impl<P> RetryExecutor<P> {
    pub fn new(config: RetryConfig, policy: P) -> Self {
        Self { config, policy }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_outcome(operation).await.into_result()
    }

    /// Like [`execute`](Self::execute), also reporting attempts and delays
    ///
    /// The policy is consulted before the attempt limit, so a non-retryable
    /// error on the last attempt is reported as
    /// [`RetryError::NonRetryable`].
    #[instrument(skip(self, operation), fields(max_attempts = self.config.max_attempts))]
    pub async fn execute_with_outcome<F, Fut, T, E>(&self, mut operation: F) -> RetryOutcome<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let mut attempts = 0;
        let mut total_delay = Duration::ZERO;
        let finish = |result, attempts, total_delay| RetryOutcome {
            result,
            attempts,
            total_delay,
            elapsed: started.elapsed(),
        };

        if let Err(RetryError::InvalidConfiguration { message }) = self.config.validate() {
            return finish(Err(RetryError::InvalidConfiguration { message }), 0, total_delay);
        }

        loop {
            if let Some(budget) = self.config.max_total_time {
                let elapsed = started.elapsed();
                if attempts > 0 && elapsed >= budget {
                    warn!(?elapsed, attempts, "Retry time budget exhausted");
                    return finish(Err(RetryError::TimeoutExceeded { elapsed }), attempts, total_delay);
                }
            }

            let index = attempts;
            attempts += 1;
            let error = match operation().await {
                Ok(value) => {
                    if index > 0 {
                        debug!(attempts, "Operation succeeded after retrying");
                    }
                    return finish(Ok(value), attempts, total_delay);
                }
                Err(error) => error,
            };

            let delay = match self.policy.should_retry(&error, index) {
                RetryDecision::Stop => {
                    debug!(attempt = attempts, ?error, "Error is not retryable");
                    return finish(Err(RetryError::NonRetryable { source: error }), attempts, total_delay);
                }
                RetryDecision::Retry => self.config.delay_for(index),
                RetryDecision::RetryAfter(delay) => delay,
            };

            if attempts >= self.config.max_attempts {
                warn!(attempts, ?error, "Retry attempts exhausted");
                return finish(
                    Err(RetryError::Exhausted { attempts, source: error }),
                    attempts,
                    total_delay,
                );
            }

            debug!(attempt = attempts, ?delay, ?error, "Attempt failed; backing off");
            tokio::time::sleep(delay).await;
            total_delay += delay;
        }
    }
}

/// Run `operation` once with `config` and `policy`
pub async fn retry_with_policy<F, Fut, T, E, P>(
    config: RetryConfig,
    policy: P,
    operation: F,
) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: RetryPolicy<E>,
    E: fmt::Debug,
{
    RetryExecutor::new(config, policy).execute(operation).await
}

/// Retry `operation` with doubling backoff, retrying only errors whose kind
/// is listed in `retryable`
///
/// Sleeps `min(backoff_base * 2^(attempt-1), backoff_cap)` plus up to 20%
/// jitter between attempts.
pub async fn with_retry<F, Fut, T, E, K>(
    operation: F,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    retryable: K,
) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ClassifyError + fmt::Debug,
    K: IntoIterator<Item = E::Kind>,
{
    let config = RetryConfig::exponential(max_attempts, backoff_base, backoff_cap);
    retry_with_policy(config, policies::RetryableKinds::new(retryable), operation).await
}

pub mod policies {
    use std::collections::HashSet;
    use std::hash::Hash;

    use super::{ClassifyError, RetryDecision, RetryPolicy};

    /// Retries every error
    #[derive(Debug, Clone, Copy)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Retry
        }
    }

    /// Retries while `predicate(error, attempt)` holds
    #[derive(Debug, Clone)]
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E, u32) -> bool,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
            if (self.predicate)(error, attempt) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }

    /// Retries errors whose [`ClassifyError::kind`] is in a fixed set
    #[derive(Debug, Clone)]
    pub struct RetryableKinds<K> {
        kinds: HashSet<K>,
    }

    impl<K: Eq + Hash> RetryableKinds<K> {
        pub fn new(kinds: impl IntoIterator<Item = K>) -> Self {
            Self { kinds: kinds.into_iter().collect() }
        }

        pub fn contains(&self, kind: &K) -> bool {
            self.kinds.contains(kind)
        }
    }

    impl<E> RetryPolicy<E> for RetryableKinds<E::Kind>
    where
        E: ClassifyError,
    {
        fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
            if self.kinds.contains(&error.kind()) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }
}
