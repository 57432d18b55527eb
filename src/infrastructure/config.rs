//! Application configuration.
//!
//! Loaded once at startup from the environment (after an optional `.env`
//! file). Every value has a default, so an empty environment yields a
//! working in-memory setup.
//!
//! # Example
//!
//! ```rust,ignore
//! use multiples_sync::infrastructure::AppConfig;
//!
//! let config = AppConfig::from_env()?;
//! println!("Fan-out workers: {}", config.fan_out_workers);
//! ```

use std::env;
use std::fmt::Display;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::application::{CaseScope, RetryPolicy};

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// The name of the environment variable.
        key: String,
        /// Why the value is invalid.
        message: String,
    },
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}', expected 'pretty' or 'json'")),
        }
    }
}

/// Application configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    /// Base URL of the case store API; `None` selects the in-memory store.
    pub case_store_url: Option<String>,
    /// Per-request timeout of the case store adapter.
    pub case_store_timeout: Duration,
    /// SQS endpoint override (e.g. `LocalStack`).
    pub sqs_endpoint: Option<String>,
    /// Durable update queue URL; `None` selects the in-memory queue.
    pub sqs_update_queue_url: Option<String>,
    /// Size of the process-wide fan-out pool.
    pub fan_out_workers: usize,
    /// Retry policy of every case write.
    pub retry: RetryPolicy,
    /// Maximum number of cases per update job.
    pub queue_batch_size: NonZeroUsize,
    /// Case types and jurisdiction.
    pub scope: CaseScope,
    /// HTTP server host address.
    pub app_host: String,
    /// HTTP server port.
    pub app_port: u16,
    /// Log line format.
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            case_store_url: None,
            case_store_timeout: Duration::from_millis(5000),
            sqs_endpoint: None,
            sqs_update_queue_url: None,
            fan_out_workers: num_cpus::get(),
            retry: RetryPolicy::default(),
            queue_batch_size: NonZeroUsize::new(50).unwrap_or(NonZeroUsize::MIN),
            scope: CaseScope::default(),
            app_host: "0.0.0.0".to_string(),
            app_port: 8081,
            log_format: LogFormat::Pretty,
        }
    }
}

impl AppConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CASE_STORE_URL`: case store base URL (optional, in-memory if unset)
    /// - `CASE_STORE_TIMEOUT_MS`: request timeout (optional, default: 5000)
    /// - `SQS_ENDPOINT`: SQS endpoint override (optional)
    /// - `SQS_UPDATE_QUEUE_URL`: update queue URL (optional, in-memory if unset)
    /// - `FAN_OUT_WORKERS`: fan-out pool size (optional, default: CPU count)
    /// - `FAN_OUT_MAX_ATTEMPTS`: attempts per case write (optional, default: 3)
    /// - `FAN_OUT_RETRY_BACKOFF_MS`: first retry delay (optional, default: 100)
    /// - `QUEUE_BATCH_SIZE`: cases per update job (optional, default: 50)
    /// - `SINGLE_CASE_TYPE_ID`, `MULTIPLE_CASE_TYPE_ID`, `JURISDICTION`
    /// - `APP_HOST` / `APP_PORT`: bind address (default: 0.0.0.0:8081)
    /// - `LOG_FORMAT`: `pretty` or `json` (default: pretty)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignores errors if file doesn't exist)
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a value is set but invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let fan_out_workers = positive(&lookup, "FAN_OUT_WORKERS", defaults.fan_out_workers)?;
        let max_attempts = positive(&lookup, "FAN_OUT_MAX_ATTEMPTS", defaults.retry.max_attempts)?;
        let backoff_ms: u64 = parsed(&lookup, "FAN_OUT_RETRY_BACKOFF_MS", 100)?;
        let batch_size = positive(&lookup, "QUEUE_BATCH_SIZE", defaults.queue_batch_size.get())?;
        let timeout_ms: u64 = parsed(&lookup, "CASE_STORE_TIMEOUT_MS", 5000)?;

        Ok(Self {
            case_store_url: non_empty(&lookup, "CASE_STORE_URL"),
            case_store_timeout: Duration::from_millis(timeout_ms),
            sqs_endpoint: non_empty(&lookup, "SQS_ENDPOINT"),
            sqs_update_queue_url: non_empty(&lookup, "SQS_UPDATE_QUEUE_URL"),
            fan_out_workers,
            retry: RetryPolicy {
                max_attempts,
                base_backoff: Duration::from_millis(backoff_ms),
            },
            queue_batch_size: NonZeroUsize::new(batch_size).unwrap_or(NonZeroUsize::MIN),
            scope: CaseScope {
                single_case_type_id: non_empty(&lookup, "SINGLE_CASE_TYPE_ID")
                    .unwrap_or(defaults.scope.single_case_type_id),
                multiple_case_type_id: non_empty(&lookup, "MULTIPLE_CASE_TYPE_ID")
                    .unwrap_or(defaults.scope.multiple_case_type_id),
                jurisdiction: non_empty(&lookup, "JURISDICTION")
                    .unwrap_or(defaults.scope.jurisdiction),
            },
            app_host: non_empty(&lookup, "APP_HOST").unwrap_or(defaults.app_host),
            app_port: parsed(&lookup, "APP_PORT", defaults.app_port)?,
            log_format: parsed(&lookup, "LOG_FORMAT", defaults.log_format)?,
        })
    }

    /// The `host:port` the HTTP server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.app_host, self.app_port)
    }
}

/// Gets an optional, non-blank variable.
fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|value| !value.trim().is_empty())
}

/// Gets an optional variable and parses it, with a default value.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` if the variable is set but cannot be parsed.
fn parsed<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    non_empty(lookup, key).map_or_else(
        || Ok(default),
        |value| {
            value
                .trim()
                .parse()
                .map_err(|error: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: error.to_string(),
                })
        },
    )
}

/// Like [`parsed`], rejecting zero.
fn positive<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Default + PartialEq,
    T::Err: Display,
{
    let value = parsed(lookup, key, default)?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than 0".to_string(),
        });
    }
    Ok(value)
}
