//! Process configuration read from environment variables.
//!
//! Every setting has a default, so an empty environment yields a runnable
//! in-memory deployment.

use std::time::Duration;

use fulfill_observability::LogFormat;

/// Default cap on a submission body (10 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub port: u16,
    /// Postgres connection string; unset means in-memory job storage.
    pub database_url: Option<String>,
    /// Redis connection string for the shared rate-limit window.
    pub redis_url: Option<String>,
    pub sync_vendor_url: String,
    pub async_vendor_url: String,
    pub worker_concurrency: usize,
    pub vendor_timeout: Duration,
    pub queue_max_attempts: u32,
    pub queue_backoff: Duration,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    pub max_payload_bytes: usize,
    pub log_format: LogFormat,
    pub queue_stats_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: None,
            redis_url: None,
            sync_vendor_url: "http://localhost:3001".to_string(),
            async_vendor_url: "http://localhost:3002".to_string(),
            worker_concurrency: 5,
            vendor_timeout: Duration::from_millis(30_000),
            queue_max_attempts: 3,
            queue_backoff: Duration::from_millis(1_000),
            rate_limit_requests: 10,
            rate_limit_window: Duration::from_millis(1_000),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            log_format: LogFormat::Json,
            queue_stats_interval: Duration::from_secs(30),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Settings::default();

        Ok(Self {
            port: parse(&get, "PORT")?.unwrap_or(defaults.port),
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            sync_vendor_url: get("SYNC_VENDOR_URL").unwrap_or(defaults.sync_vendor_url),
            async_vendor_url: get("ASYNC_VENDOR_URL").unwrap_or(defaults.async_vendor_url),
            worker_concurrency: positive(&get, "WORKER_CONCURRENCY")?
                .unwrap_or(defaults.worker_concurrency),
            vendor_timeout: positive(&get, "VENDOR_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.vendor_timeout),
            queue_max_attempts: positive(&get, "QUEUE_MAX_ATTEMPTS")?
                .unwrap_or(defaults.queue_max_attempts),
            queue_backoff: parse(&get, "QUEUE_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.queue_backoff),
            rate_limit_requests: positive(&get, "RATE_LIMIT_REQUESTS")?
                .unwrap_or(defaults.rate_limit_requests),
            rate_limit_window: positive(&get, "RATE_LIMIT_WINDOW_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.rate_limit_window),
            max_payload_bytes: positive(&get, "MAX_PAYLOAD_BYTES")?
                .unwrap_or(defaults.max_payload_bytes),
            log_format: parse(&get, "LOG_FORMAT")?.unwrap_or(defaults.log_format),
            queue_stats_interval: positive(&get, "QUEUE_STATS_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.queue_stats_interval),
        })
    }
}

fn parse<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(None),
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|err| ConfigError::Invalid {
                key,
                reason: err.to_string(),
                value,
            }),
    }
}

fn positive<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: core::str::FromStr + PartialEq + Default,
    T::Err: core::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match parse::<T, G>(get, key)? {
        Some(v) if v == T::default() => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        other => Ok(other),
    }
}
