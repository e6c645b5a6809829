//! Domain constants
//!
//! Defaults for scheduler, retry, breaker and retention configuration.

// Scheduler
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 16;
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

// Retry
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_BASE_MS: u64 = 1_000;
pub const DEFAULT_RETRY_BACKOFF_CAP_MS: u64 = 60_000;
/// Upper bound of the proportional jitter added to every backoff delay
pub const RETRY_JITTER_FACTOR: f64 = 0.2;

// Circuit breaker
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u64 = 5;
pub const DEFAULT_BREAKER_COOLDOWN_MS: u64 = 60_000;
/// Breakers guarding workflow executions are named `workflow:<workflow_id>`
pub const WORKFLOW_RESOURCE_PREFIX: &str = "workflow";

// Execution history
pub const DEFAULT_HISTORY_MAX_RECORDS: usize = 10_000;
pub const DEFAULT_HISTORY_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

/// Error recorded on an execution that exceeded its timeout
pub const TIMEOUT_ERROR: &str = "timeout";
