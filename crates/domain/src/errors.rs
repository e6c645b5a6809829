//! Error types used throughout Cadence

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Cadence
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details", rename_all = "snake_case")]
pub enum CadenceError {
    /// A cron expression failed to parse or an interval is not positive
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Every attempt allowed by the retry policy failed
    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// The circuit breaker protecting `resource` rejected the call
    #[error("Circuit open for {resource}")]
    CircuitOpen { resource: String },

    #[error("Timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Illegal state transition, or a manual trigger overlapping a run
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CadenceError {
    pub fn schedule_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("schedule {id}"))
    }

    pub fn execution_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("execution {id}"))
    }
}

/// Result type alias for Cadence operations
pub type Result<T> = std::result::Result<T, CadenceError>;
