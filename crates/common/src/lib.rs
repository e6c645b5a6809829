//! Building blocks shared by the Cadence crates: time, resilience and test
//! support.
//!
//! Everything is behind cargo features so that lower layers stay light:
//! - `foundation`: the [`Clock`] abstraction and cron expressions
//! - `runtime`: retry, circuit breakers and the per-resource breaker
//!   registry (implies `foundation` and `observability`)
//! - `observability`: tracing instrumentation
//! - `test-utils`: scripted operations, a tokio-driven clock and polling
//!   helpers for tests

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

#[cfg(feature = "foundation")]
pub mod time;

#[cfg(feature = "runtime")]
pub mod resilience;

#[cfg(any(feature = "test-utils", all(test, feature = "runtime")))]
pub mod testing;

#[cfg(feature = "runtime")]
pub use resilience::{
    policies, retry_with_policy, with_retry, BackoffStrategy, CallPermit, CircuitBreaker,
    CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerRegistry, CircuitState,
    ClassifyError, ConfigError, CooldownPolicy, Jitter, ProtectedCall, ResilienceError,
    ResilienceResult, RetryConfig, RetryDecision, RetryError, RetryExecutor, RetryOutcome,
    RetryPolicy, RetryResult,
};
#[cfg(feature = "foundation")]
pub use time::{Clock, CronExpression, CronParseError, CronSchedule, MockClock, SystemClock};
