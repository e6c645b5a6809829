//! Configuration loader
//!
//! Loads application configuration from files and environment variables.
//!
//! ## Loading Strategy
//! 1. Probes the standard paths for a config file (JSON or TOML)
//! 2. Falls back to built-in defaults when none is found
//! 3. Applies `CADENCE_*` environment overrides on top
//! 4. Validates the result
//!
//! ## Environment Variables
//! - `CADENCE_TICK_INTERVAL_MS`: Tick resolution in milliseconds
//! - `CADENCE_TIMEZONE`: IANA zone cron expressions are evaluated in
//! - `CADENCE_MAX_CONCURRENT_EXECUTIONS`: Worker pool size
//! - `CADENCE_DEREGISTER_POLICY`: `defer` or `force_stop`
//! - `CADENCE_DEFAULT_TIMEOUT_SECS`: Default execution timeout
//! - `CADENCE_SHUTDOWN_TIMEOUT_SECS`: How long `stop()` waits
//! - `CADENCE_RETRY_MAX_ATTEMPTS`, `CADENCE_RETRY_BACKOFF_BASE_MS`,
//!   `CADENCE_RETRY_BACKOFF_CAP_MS`: Default retry policy
//! - `CADENCE_BREAKER_FAILURE_THRESHOLD`, `CADENCE_BREAKER_COOLDOWN_MS`,
//!   `CADENCE_BREAKER_COOLDOWN_MULTIPLIER`, `CADENCE_BREAKER_MAX_COOLDOWN_MS`:
//!   Circuit breaker defaults
//! - `CADENCE_HISTORY_MAX_RECORDS`, `CADENCE_HISTORY_MAX_AGE_SECS`: Retention
//! - `CADENCE_LOG_FORMAT`: `pretty` or `json`
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./cadence.toml`, `./cadence.json`, `./config.toml`, `./config.json`
//! 2. The same names in the parent and grandparent directories
//! 3. The same names next to the executable and its parents

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use cadence_domain::{CadenceError, Config, Result};

const CONFIG_FILE_NAMES: [&str; 4] = ["cadence.toml", "cadence.json", "config.toml", "config.json"];

/// Load configuration: file if one is found, else defaults, then the
/// environment
///
/// # Errors
/// Returns `CadenceError::Config` if:
/// - A config file exists but cannot be read or parsed
/// - An environment override has an invalid value
/// - The merged configuration fails validation
pub fn load() -> Result<Config> {
    let mut config = match probe_config_paths() {
        Some(path) => read_config(&path)?,
        None => {
            tracing::debug!("No config file found, using defaults");
            Config::default()
        }
    };
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from defaults and environment variables only
///
/// # Errors
/// Returns `CadenceError::Config` for invalid values.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();
    apply_env_overrides(&mut config)?;
    config.validate()?;
    tracing::info!("Configuration loaded from environment variables");
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations. The format is
/// detected by file extension. Environment overrides are not applied.
///
/// # Errors
/// Returns `CadenceError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid or the configuration fails validation
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(CadenceError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            CadenceError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    let config = read_config(&config_path)?;
    config.validate()?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<Config> {
    tracing::info!(path = %path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(path)
        .map_err(|e| CadenceError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
///
/// # Errors
/// Returns `CadenceError::Config` if format is invalid or parsing fails.
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| CadenceError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CadenceError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(CadenceError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe the standard locations for a configuration file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.extend([cwd.clone(), cwd.join(".."), cwd.join("../..")]);
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.extend([exe_dir.to_path_buf(), exe_dir.join(".."), exe_dir.join("../..")]);
        }
    }

    roots
        .iter()
        .flat_map(|root| CONFIG_FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

/// Apply `CADENCE_*` overrides to `config`
///
/// # Errors
/// Returns `CadenceError::Config` naming the first variable with an
/// unparsable value.
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    let scheduler = &mut config.scheduler;
    override_with(&mut scheduler.tick_interval_ms, "CADENCE_TICK_INTERVAL_MS")?;
    override_with(&mut scheduler.timezone, "CADENCE_TIMEZONE")?;
    override_with(&mut scheduler.max_concurrent_executions, "CADENCE_MAX_CONCURRENT_EXECUTIONS")?;
    override_with(&mut scheduler.deregister_policy, "CADENCE_DEREGISTER_POLICY")?;
    override_with(&mut scheduler.default_timeout_secs, "CADENCE_DEFAULT_TIMEOUT_SECS")?;
    override_with(&mut scheduler.shutdown_timeout_secs, "CADENCE_SHUTDOWN_TIMEOUT_SECS")?;

    let retry = &mut config.retry;
    override_with(&mut retry.max_attempts, "CADENCE_RETRY_MAX_ATTEMPTS")?;
    override_with(&mut retry.backoff_base_ms, "CADENCE_RETRY_BACKOFF_BASE_MS")?;
    override_with(&mut retry.backoff_cap_ms, "CADENCE_RETRY_BACKOFF_CAP_MS")?;

    let breaker = &mut config.breaker;
    override_with(&mut breaker.failure_threshold, "CADENCE_BREAKER_FAILURE_THRESHOLD")?;
    override_with(&mut breaker.cooldown_ms, "CADENCE_BREAKER_COOLDOWN_MS")?;
    if let Some(multiplier) = env_parse("CADENCE_BREAKER_COOLDOWN_MULTIPLIER")? {
        breaker.cooldown_multiplier = Some(multiplier);
    }
    if let Some(max) = env_parse("CADENCE_BREAKER_MAX_COOLDOWN_MS")? {
        breaker.max_cooldown_ms = Some(max);
    }

    override_with(&mut config.history.max_records, "CADENCE_HISTORY_MAX_RECORDS")?;
    override_with(&mut config.history.max_age_secs, "CADENCE_HISTORY_MAX_AGE_SECS")?;
    override_with(&mut config.logging.format, "CADENCE_LOG_FORMAT")?;
    Ok(())
}

fn override_with<T>(field: &mut T, key: &str) -> Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(value) = env_parse(key)? {
        *field = value;
    }
    Ok(())
}

/// Parse an optional environment variable
///
/// Unset and blank variables yield `None`.
///
/// # Errors
/// Returns `CadenceError::Config` if the variable is set but unparsable.
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let Ok(raw) = std::env::var(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| CadenceError::Config(format!("Invalid value for {key}: {e}")))
}
