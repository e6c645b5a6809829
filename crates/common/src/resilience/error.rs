//! Errors shared by the resilience primitives

use std::time::Duration;

use thiserror::Error;

/// A breaker or retry configuration that failed validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid resilience configuration: {0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Failure of a call made through a breaker, a retry loop, or both
///
/// `E` is the protected operation's own error; variants that carry it keep
/// it as the error source.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The breaker refused the call; the operation did not run
    #[error("call rejected: circuit is open")]
    CircuitOpen,

    #[error("call exceeded its time budget of {timeout:?}")]
    Timeout { timeout: Duration },

    /// Every permitted attempt failed; `source` is the last failure
    #[error("gave up after {attempts} attempts")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The operation failed and was not retried
    #[error("protected operation failed")]
    OperationFailed {
        #[source]
        source: E,
    },

    #[error("invalid resilience configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Error returned by the operation itself, when it ran
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::RetryExhausted { source, .. } | Self::OperationFailed { source } => Some(source),
            Self::CircuitOpen | Self::Timeout { .. } | Self::InvalidConfiguration { .. } => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen)
    }
}

impl<E> From<ConfigError> for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: ConfigError) -> Self {
        Self::InvalidConfiguration { message: err.0 }
    }
}

pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;
