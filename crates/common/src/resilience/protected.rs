//! Circuit breaker wrapped around a retrying call
//!
//! The breaker admits the whole retry sequence with a single permit, so an
//! exhausted retry counts as one failure toward the breaker threshold rather
//! than one per attempt.

use std::fmt;
use std::future::Future;

use tracing::{debug, instrument};

use super::circuit_breaker::CircuitBreaker;
use super::error::{ResilienceError, ResilienceResult};
use super::retry::{RetryError, RetryExecutor, RetryPolicy};
use crate::time::{Clock, SystemClock};

/// `circuit_breaker(resource, with_retry(operation))` as a reusable value
pub struct ProtectedCall<P, C: Clock = SystemClock> {
    breaker: CircuitBreaker<C>,
    retry: RetryExecutor<P>,
}

impl<P: fmt::Debug, C: Clock> fmt::Debug for ProtectedCall<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectedCall")
            .field("resource", &self.breaker.name())
            .field("retry", &self.retry)
            .finish()
    }
}

impl<P, C: Clock> ProtectedCall<P, C> {
    pub fn new(breaker: CircuitBreaker<C>, retry: RetryExecutor<P>) -> Self {
        Self { breaker, retry }
    }

    pub fn breaker(&self) -> &CircuitBreaker<C> {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryExecutor<P> {
        &self.retry
    }

    /// Run `operation` under retry inside one breaker permit
    ///
    /// Fails fast with [`ResilienceError::CircuitOpen`] without invoking the
    /// operation when the breaker rejects the call.
    #[instrument(skip(self, operation), fields(resource = %self.breaker.name()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        P: RetryPolicy<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.breaker.try_acquire().ok_or(ResilienceError::CircuitOpen)?;

        match self.retry.execute(operation).await {
            Ok(value) => {
                permit.record_success();
                Ok(value)
            }
            Err(RetryError::Exhausted { attempts, source }) => {
                permit.record_failure();
                Err(ResilienceError::RetryExhausted { attempts, source })
            }
            Err(RetryError::NonRetryable { source }) => {
                permit.record_failure();
                Err(ResilienceError::OperationFailed { source })
            }
            Err(RetryError::TimeoutExceeded { elapsed }) => {
                permit.record_failure();
                Err(ResilienceError::Timeout { timeout: elapsed })
            }
            Err(RetryError::InvalidConfiguration { message }) => {
                debug!("Retry configuration rejected, releasing permit");
                drop(permit);
                Err(ResilienceError::InvalidConfiguration { message })
            }
        }
    }
}
