//! Integration tests for resilience module
//!
//! Tests retry, circuit breaker, breaker registry and their composition
//! through the public API, driving time with paused tokio clocks and
//! `MockClock`.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadence_common::resilience::{
    policies, retry_with_policy, with_retry, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerRegistry, CircuitState, ClassifyError, CooldownPolicy, ProtectedCall,
    ResilienceError, RetryConfig, RetryError, RetryExecutor,
};
use cadence_common::time::MockClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FailureKind {
    Transient,
    Rejected,
}

/// Custom error type for testing
#[derive(Debug, Clone)]
struct TestError {
    kind: FailureKind,
    message: String,
}

impl TestError {
    fn transient(message: &str) -> Self {
        Self { kind: FailureKind::Transient, message: message.to_string() }
    }

    fn rejected(message: &str) -> Self {
        Self { kind: FailureKind::Rejected, message: message.to_string() }
    }
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TestError {}

impl ClassifyError for TestError {
    type Kind = FailureKind;

    fn kind(&self) -> FailureKind {
        self.kind
    }
}

/// Validates `with_retry` for the fail-twice-then-succeed scenario.
///
/// # Test Steps
/// 1. Retry up to 3 attempts with 100ms base backoff and a 1s cap
/// 2. Fail the first two attempts with a retryable kind
/// 3. Confirm the third attempt's value is returned
/// 4. Confirm at least 100ms + 200ms of backoff elapsed
#[tokio::test(start_paused = true)]
async fn test_with_retry_two_failures_then_success() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let started = tokio::time::Instant::now();

    let result = with_retry(
        || {
            let c = Arc::clone(&counter);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::transient("flaky"))
                } else {
                    Ok("done")
                }
            }
        },
        3,
        Duration::from_millis(100),
        Duration::from_secs(1),
        [FailureKind::Transient],
    )
    .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
    // Jitter adds at most 20% to each delay
    assert!(elapsed < Duration::from_millis(361), "elapsed {elapsed:?}");
}

/// Validates `with_retry` for the exhaustion scenario.
///
/// # Test Steps
/// 1. Fail every attempt with a retryable kind
/// 2. Confirm `Exhausted` reports every attempt and carries the last error
#[tokio::test(start_paused = true)]
async fn test_with_retry_exhaustion_surfaces_last_error() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let result: Result<(), _> = with_retry(
        || {
            let c = Arc::clone(&counter);
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                Err(TestError::transient(&format!("attempt {n}")))
            }
        },
        4,
        Duration::from_millis(10),
        Duration::from_millis(50),
        [FailureKind::Transient],
    )
    .await;

    match result {
        Err(RetryError::Exhausted { attempts, source }) => {
            assert_eq!(attempts, 4);
            assert_eq!(source.to_string(), "attempt 4");
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

/// Validates `with_retry` for the non-retryable kind scenario.
///
/// # Test Steps
/// 1. Fail with a kind outside the retryable set
/// 2. Confirm the error propagates after a single call with no delay
#[tokio::test(start_paused = true)]
async fn test_with_retry_non_retryable_kind_propagates() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let started = tokio::time::Instant::now();

    let result: Result<(), _> = with_retry(
        || {
            let c = Arc::clone(&counter);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(TestError::rejected("bad request"))
            }
        },
        5,
        Duration::from_millis(100),
        Duration::from_secs(1),
        [FailureKind::Transient],
    )
    .await;

    assert!(matches!(result, Err(RetryError::NonRetryable { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

/// Validates `RetryExecutor::execute_with_outcome` for the outcome
/// reporting scenario.
///
/// # Test Steps
/// 1. Use fixed 25ms backoff without jitter
/// 2. Fail twice, then succeed
/// 3. Confirm attempts and total delay in the outcome
#[tokio::test(start_paused = true)]
async fn test_retry_outcome_reports_attempts_and_delay() {
    let config = RetryConfig::new()
        .max_attempts(5)
        .fixed_backoff(Duration::from_millis(25))
        .no_jitter()
        .build()
        .unwrap();
    let executor = RetryExecutor::new(config, policies::AlwaysRetry);
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let outcome = executor
        .execute_with_outcome(|| {
            let c = Arc::clone(&counter);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::transient("busy"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.total_delay, Duration::from_millis(50));
    assert!(!outcome.timed_out());
    assert_eq!(outcome.into_result().unwrap(), 7);
}

/// Validates circuit breaker for the threshold-three scenario.
///
/// # Test Steps
/// 1. Record three consecutive failures
/// 2. Confirm the breaker opens and fails fast without invoking the call
/// 3. Advance past the cool-down
/// 4. Confirm exactly one probe is admitted and its success closes the
///    breaker
#[tokio::test]
async fn test_circuit_breaker_trip_and_probe() {
    let clock = MockClock::new();
    let registry = CircuitBreakerRegistry::with_clock(
        CircuitBreakerConfig::new()
            .failure_threshold(3)
            .cooldown(Duration::from_secs(10))
            .build()
            .unwrap(),
        clock.clone(),
    )
    .unwrap();
    let breaker = registry.get_or_create("inventory-api");

    for _ in 0..3 {
        let result = breaker.execute(|| async { Err::<(), _>(TestError::transient("down")) }).await;
        assert!(matches!(result, Err(ResilienceError::OperationFailed { .. })));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let invoked = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invoked);
    let result = breaker
        .execute(|| {
            let c = Arc::clone(&counter);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(())
            }
        })
        .await;
    assert!(matches!(result, Err(ResilienceError::CircuitOpen)));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    clock.advance(Duration::from_secs(10));
    let probe = breaker.try_acquire().expect("probe admitted after cool-down");
    assert!(probe.is_probe());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert!(breaker.try_acquire().is_none());
    probe.record_success();

    assert_eq!(breaker.state(), CircuitState::Closed);
    let metrics = registry.metrics("inventory-api").unwrap();
    assert_eq!(metrics.failure_count, 0);
    assert_eq!(metrics.rejected_calls, 2);
}

/// Validates exponential cool-down growth across failed probes.
///
/// # Test Steps
/// 1. Trip a breaker with a doubling cool-down capped at 4s
/// 2. Fail successive probes
/// 3. Confirm each open period doubles until the cap
#[test]
fn test_exponential_cooldown_across_failed_probes() {
    let clock = MockClock::new();
    let config = CircuitBreakerConfig::new()
        .failure_threshold(1)
        .cooldown(Duration::from_secs(1))
        .exponential_cooldown(2.0, Duration::from_secs(4))
        .build()
        .unwrap();
    let breaker = CircuitBreaker::with_clock(config, clock.clone()).unwrap();
    assert!(matches!(breaker.config().cooldown_policy, CooldownPolicy::Exponential { .. }));

    breaker.try_acquire().unwrap().record_failure();
    for expected in [1u64, 2, 4, 4] {
        clock.advance(Duration::from_millis(expected * 1000 - 1));
        assert!(breaker.try_acquire().is_none(), "still open before {expected}s");
        clock.advance(Duration::from_millis(1));
        breaker.try_acquire().expect("probe admitted").record_failure();
    }
    assert_eq!(breaker.metrics().consecutive_opens, 5);
}

/// Validates `ProtectedCall` for the retry-inside-breaker scenario.
///
/// # Test Steps
/// 1. Compose a threshold-2 breaker with a 3-attempt retry
/// 2. Exhaust retries twice
/// 3. Confirm six invocations, then fast failure
#[tokio::test(start_paused = true)]
async fn test_protected_call_composition() {
    let clock = MockClock::new();
    let registry = CircuitBreakerRegistry::with_clock(
        CircuitBreakerConfig::new().failure_threshold(2).build().unwrap(),
        clock,
    )
    .unwrap();
    let retry = RetryConfig::new()
        .max_attempts(3)
        .fixed_backoff(Duration::from_millis(5))
        .no_jitter()
        .build()
        .unwrap();
    let call = ProtectedCall::new(
        registry.get_or_create("ledger"),
        RetryExecutor::new(retry, policies::AlwaysRetry),
    );

    let calls = Arc::new(AtomicU32::new(0));
    for _ in 0..2 {
        let counter = Arc::clone(&calls);
        let result: Result<(), _> = call
            .execute(|| {
                let c = Arc::clone(&counter);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::transient("timeout talking to ledger"))
                }
            })
            .await;
        assert!(matches!(result, Err(ResilienceError::RetryExhausted { attempts: 3, .. })));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 6);

    let counter = Arc::clone(&calls);
    let result: Result<(), _> = call
        .execute(|| {
            let c = Arc::clone(&counter);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<(), TestError>(())
            }
        })
        .await;
    assert!(result.unwrap_err().is_circuit_open());
    assert_eq!(calls.load(Ordering::SeqCst), 6);
}

/// Validates `retry_with_policy` with a predicate policy.
///
/// # Test Steps
/// 1. Retry only after the first failure
/// 2. Confirm the predicate stops the sequence early
#[tokio::test(start_paused = true)]
async fn test_predicate_policy_stops_early() {
    let config = RetryConfig::new()
        .max_attempts(10)
        .fixed_backoff(Duration::from_millis(1))
        .no_jitter()
        .build()
        .unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let result: Result<(), _> = retry_with_policy(
        config,
        policies::PredicateRetry::new(|_: &TestError, attempt: u32| attempt == 0),
        || {
            let c = Arc::clone(&counter);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(TestError::transient("nope"))
            }
        },
    )
    .await;

    assert!(matches!(result, Err(RetryError::NonRetryable { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
