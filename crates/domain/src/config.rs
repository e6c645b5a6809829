//! Configuration management
//!
//! Every section has defaults, so a config file only needs the values it
//! changes. Loading from files and the environment lives in
//! `cadence_infra::config`.

use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BREAKER_COOLDOWN_MS, DEFAULT_BREAKER_FAILURE_THRESHOLD,
    DEFAULT_EXECUTION_TIMEOUT_SECS, DEFAULT_HISTORY_MAX_AGE_SECS, DEFAULT_HISTORY_MAX_RECORDS,
    DEFAULT_MAX_CONCURRENT_EXECUTIONS, DEFAULT_RETRY_BACKOFF_BASE_MS,
    DEFAULT_RETRY_BACKOFF_CAP_MS, DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
    DEFAULT_TICK_INTERVAL_MS, DEFAULT_TIMEZONE,
};
use crate::types::{DeregisterPolicy, RetryPolicy};
use crate::{impl_domain_status_conversions, CadenceError, Result};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub retry: RetryDefaults,
    pub breaker: BreakerDefaults,
    pub history: RetentionConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values the scheduler cannot run with
    ///
    /// # Errors
    /// Returns `CadenceError::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.retry.policy().validate()?;
        self.breaker.validate()?;
        self.history.validate()
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Resolution of the tick loop
    pub tick_interval_ms: u64,
    /// IANA zone cron expressions are evaluated in
    pub timezone: String,
    /// Worker pool size
    pub max_concurrent_executions: usize,
    pub deregister_policy: DeregisterPolicy,
    /// Execution timeout for schedules registered without one
    pub default_timeout_secs: u64,
    /// How long `stop()` waits for the tick loop to exit
    pub shutdown_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            timezone: DEFAULT_TIMEZONE.to_string(),
            max_concurrent_executions: DEFAULT_MAX_CONCURRENT_EXECUTIONS,
            deregister_policy: DeregisterPolicy::default(),
            default_timeout_secs: DEFAULT_EXECUTION_TIMEOUT_SECS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Parsed time zone
    ///
    /// # Errors
    /// Returns `CadenceError::Config` for names outside the IANA database.
    pub fn time_zone(&self) -> Result<Tz> {
        Tz::from_str(&self.timezone)
            .map_err(|_| CadenceError::Config(format!("Unknown time zone: {}", self.timezone)))
    }

    fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(CadenceError::Config("tick_interval_ms must be positive".into()));
        }
        if self.max_concurrent_executions == 0 {
            return Err(CadenceError::Config("max_concurrent_executions must be positive".into()));
        }
        if self.default_timeout_secs == 0 {
            return Err(CadenceError::Config("default_timeout_secs must be positive".into()));
        }
        self.time_zone().map(|_| ())
    }
}

/// Retry policy for schedules registered without one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryDefaults {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_RETRY_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_RETRY_BACKOFF_CAP_MS,
        }
    }
}

impl RetryDefaults {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
        )
    }
}

/// Circuit breaker settings shared by every workflow resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerDefaults {
    pub failure_threshold: u64,
    pub cooldown_ms: u64,
    /// Grow the cool-down by this factor after each failed probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_multiplier: Option<f64>,
    /// Upper bound for a grown cool-down; defaults to 32x the base
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cooldown_ms: Option<u64>,
}

impl Default for BreakerDefaults {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            cooldown_ms: DEFAULT_BREAKER_COOLDOWN_MS,
            cooldown_multiplier: None,
            max_cooldown_ms: None,
        }
    }
}

impl BreakerDefaults {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn max_cooldown(&self) -> Duration {
        self.max_cooldown_ms
            .map_or_else(|| self.cooldown().saturating_mul(32), Duration::from_millis)
    }

    fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(CadenceError::Config("breaker failure_threshold must be positive".into()));
        }
        if self.cooldown_ms == 0 {
            return Err(CadenceError::Config("breaker cooldown_ms must be positive".into()));
        }
        if let Some(multiplier) = self.cooldown_multiplier {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(CadenceError::Config(format!(
                    "breaker cooldown_multiplier must be at least 1, got {multiplier}"
                )));
            }
            if self.max_cooldown() < self.cooldown() {
                return Err(CadenceError::Config(
                    "breaker max_cooldown_ms is below cooldown_ms".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Bounded retention of terminal execution records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_records: usize,
    pub max_age_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { max_records: DEFAULT_HISTORY_MAX_RECORDS, max_age_secs: DEFAULT_HISTORY_MAX_AGE_SECS }
    }
}

impl RetentionConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.max_records == 0 {
            return Err(CadenceError::Config("history max_records must be positive".into()));
        }
        Ok(())
    }
}

/// Output format of the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl_domain_status_conversions!(LogFormat {
    Pretty => "pretty",
    Json => "json",
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.time_zone().unwrap(), Tz::UTC);
        assert_eq!(config.scheduler.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.retry.policy(), RetryPolicy::default());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.scheduler.tick_interval_ms = 0;
        assert!(matches!(config.validate(), Err(CadenceError::Config(_))));

        let mut config = Config::default();
        config.scheduler.max_concurrent_executions = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scheduler.timezone = "Mars/Olympus_Mons".into();
        assert!(config.validate().unwrap_err().to_string().contains("Mars/Olympus_Mons"));

        let mut config = Config::default();
        config.breaker.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.breaker.cooldown_multiplier = Some(0.5);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.history.max_records = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
[scheduler]
timezone = "Europe/Berlin"
deregister_policy = "force_stop"

[breaker]
failure_threshold = 2
cooldown_multiplier = 2.0

[logging]
format = "json"
"#,
        )
        .unwrap();

        assert_eq!(config.scheduler.time_zone().unwrap(), chrono_tz::Europe::Berlin);
        assert_eq!(config.scheduler.deregister_policy, DeregisterPolicy::ForceStop);
        assert_eq!(config.scheduler.tick_interval_ms, DEFAULT_TICK_INTERVAL_MS);
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.breaker.max_cooldown(), Duration::from_millis(DEFAULT_BREAKER_COOLDOWN_MS * 32));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.retry, RetryDefaults::default());
        assert!(config.validate().is_ok());
    }
}
