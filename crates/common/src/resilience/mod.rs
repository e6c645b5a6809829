//! Resilience patterns for fault tolerance and error handling
//!
//! This module provides **generic, reusable** resilience patterns:
//! - **Retry Logic**: configurable retry strategies with exponential backoff
//!   and jitter, filtered by policy or by error kind
//! - **Circuit Breaker**: stops calling a failing dependency for a cool-down
//!   and probes recovery with a single call
//! - **Registry**: one breaker per named resource with per-resource
//!   configuration
//! - **Protected Call**: a breaker wrapped around a retrying call
//!
//! The implementations are generic over the error type and take a
//! [`Clock`](crate::time::Clock) so cool-downs can be tested with
//! [`MockClock`](crate::time::MockClock).
//!
//! ```no_run
//! # async fn demo() {
//! use std::time::Duration;
//!
//! use cadence_common::resilience::policies::AlwaysRetry;
//! use cadence_common::resilience::{
//!     CircuitBreakerConfig, CircuitBreakerRegistry, ProtectedCall, RetryConfig, RetryExecutor,
//! };
//!
//! let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default()).unwrap();
//! let call = ProtectedCall::new(
//!     registry.get_or_create("billing-api"),
//!     RetryExecutor::new(
//!         RetryConfig::exponential(3, Duration::from_millis(100), Duration::from_secs(2)),
//!         AlwaysRetry,
//!     ),
//! );
//! let _ = call.execute(|| async { Ok::<_, std::io::Error>(()) }).await;
//! # }
//! ```

pub mod circuit_breaker;
pub mod error;
pub mod protected;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerMetrics, CircuitState, CooldownPolicy,
};
pub use error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
pub use protected::ProtectedCall;
pub use registry::CircuitBreakerRegistry;
pub use retry::{
    policies, retry_with_policy, with_retry, BackoffStrategy, ClassifyError, Jitter,
    RetryConfig, RetryConfigBuilder, RetryDecision, RetryError, RetryExecutor, RetryOutcome,
    RetryPolicy, RetryResult,
};
