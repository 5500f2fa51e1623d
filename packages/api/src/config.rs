//! Settings for the job system, read from the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use broker::BrokerConfig;
use queue_core::RetentionPolicy;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}={value}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Minimum level of log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err("expected debug|info|warn|error".to_string()),
        }
    }
}

/// Everything the job system needs to start.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerConfig,
    pub queue_name: String,
    pub worker_concurrency: usize,
    /// Run a worker inside this process. Turn off when workers run elsewhere.
    pub inprocess_worker: bool,
    pub worker_block_timeout: Duration,
    pub log_level: LogLevel,
    pub shutdown_timeout: Duration,
    pub retention: RetentionPolicy,
    pub demo_job_delay: Duration,
    pub admin_addr: SocketAddr,
    pub admin_token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            queue_name: Self::DEFAULT_QUEUE_NAME.to_string(),
            worker_concurrency: 2,
            inprocess_worker: true,
            worker_block_timeout: Duration::from_millis(1000),
            log_level: LogLevel::default(),
            shutdown_timeout: Duration::from_millis(5000),
            retention: RetentionPolicy::default(),
            demo_job_delay: Duration::from_millis(1000),
            admin_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            admin_token: None,
        }
    }
}

impl Settings {
    pub const DEFAULT_QUEUE_NAME: &'static str = "demo";

    /// Build settings from environment variables.
    ///
    /// Broker:
    /// - `REDIS_URL` (full connection string, wins over the fields below)
    /// - `REDIS_HOST`, `REDIS_PORT` (default: 6379), `REDIS_PASSWORD`
    /// - `REDIS_READY_CHECK` (`true`/`false`, default: true)
    /// - `QUEUE_PREFIX` (default: `bull`)
    ///
    /// Queue and worker:
    /// - `QUEUE_NAME` (default: `demo`)
    /// - `WORKER_CONCURRENCY` (default: 2)
    /// - `QUEUE_INPROCESS_WORKER` (`0`/`false` disables the embedded worker)
    /// - `WORKER_BLOCK_TIMEOUT_MS` (default: 1000)
    /// - `QUEUE_KEEP_COMPLETED`, `QUEUE_KEEP_FAILED` (default: 100 each)
    /// - `DEMO_JOB_DELAY_MS` (default: 1000)
    ///
    /// Process:
    /// - `WORKER_LOG_LEVEL` (`debug|info|warn|error`, default: info)
    /// - `SHUTDOWN_TIMEOUT_MS` (default: 5000)
    /// - `ADMIN_ADDR` (default: `0.0.0.0:8080`), `ADMIN_TOKEN`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(non_empty);
        let defaults = Self::default();

        let broker = BrokerConfig {
            connection_url: get("REDIS_URL"),
            host: get("REDIS_HOST"),
            port: parse_env(&get, "REDIS_PORT")?,
            password: get("REDIS_PASSWORD"),
            enable_ready_check: parse_bool_env(&get, "REDIS_READY_CHECK")?.unwrap_or(true),
            key_prefix: get("QUEUE_PREFIX").unwrap_or_else(|| BrokerConfig::DEFAULT_PREFIX.to_string()),
        };

        let worker_concurrency: usize =
            parse_env(&get, "WORKER_CONCURRENCY")?.unwrap_or(defaults.worker_concurrency);
        if worker_concurrency == 0 {
            return Err(ConfigError::invalid("WORKER_CONCURRENCY", "0", "must be at least 1"));
        }

        let retention = RetentionPolicy::new(
            parse_env(&get, "QUEUE_KEEP_COMPLETED")?.unwrap_or(RetentionPolicy::DEFAULT_KEEP),
            parse_env(&get, "QUEUE_KEEP_FAILED")?.unwrap_or(RetentionPolicy::DEFAULT_KEEP),
        );

        let log_level = match get("WORKER_LOG_LEVEL") {
            Some(raw) => raw
                .parse()
                .map_err(|reason: String| ConfigError::invalid("WORKER_LOG_LEVEL", &raw, reason))?,
            None => defaults.log_level,
        };

        Ok(Self {
            broker,
            queue_name: get("QUEUE_NAME").unwrap_or(defaults.queue_name),
            worker_concurrency,
            inprocess_worker: parse_bool_env(&get, "QUEUE_INPROCESS_WORKER")?
                .unwrap_or(defaults.inprocess_worker),
            worker_block_timeout: parse_millis(&get, "WORKER_BLOCK_TIMEOUT_MS")?
                .unwrap_or(defaults.worker_block_timeout),
            log_level,
            shutdown_timeout: parse_millis(&get, "SHUTDOWN_TIMEOUT_MS")?
                .unwrap_or(defaults.shutdown_timeout),
            retention,
            demo_job_delay: parse_millis(&get, "DEMO_JOB_DELAY_MS")?
                .unwrap_or(defaults.demo_job_delay),
            admin_addr: parse_env(&get, "ADMIN_ADDR")?.unwrap_or(defaults.admin_addr),
            admin_token: get("ADMIN_TOKEN"),
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_env<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ConfigError::invalid(key, &raw, e.to_string()))
        })
        .transpose()
}

fn parse_millis<G>(get: &G, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    Ok(parse_env::<u64, G>(get, key)?.map(Duration::from_millis))
}

fn parse_bool_env<G>(get: &G, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(Some(true)),
        "0" | "false" | "no" | "n" => Ok(Some(false)),
        _ => Err(ConfigError::invalid(key, &raw, "expected true/false")),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults_and_no_broker() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.broker.target().is_none());
        assert_eq!(settings.queue_name, "demo");
        assert_eq!(settings.retention, RetentionPolicy::new(100, 100));
    }

    #[test]
    fn reads_every_key() {
        let settings = settings(&[
            ("REDIS_HOST", "cache"),
            ("REDIS_PORT", "6380"),
            ("REDIS_PASSWORD", "pw"),
            ("REDIS_READY_CHECK", "false"),
            ("QUEUE_PREFIX", "jobs"),
            ("QUEUE_NAME", "emails"),
            ("WORKER_CONCURRENCY", "8"),
            ("QUEUE_INPROCESS_WORKER", "0"),
            ("WORKER_BLOCK_TIMEOUT_MS", "250"),
            ("WORKER_LOG_LEVEL", "WARN"),
            ("SHUTDOWN_TIMEOUT_MS", "1500"),
            ("QUEUE_KEEP_COMPLETED", "10"),
            ("QUEUE_KEEP_FAILED", "20"),
            ("DEMO_JOB_DELAY_MS", "5"),
            ("ADMIN_ADDR", "127.0.0.1:9000"),
            ("ADMIN_TOKEN", "s3cret"),
        ])
        .unwrap();

        assert_eq!(settings.broker.host.as_deref(), Some("cache"));
        assert_eq!(settings.broker.port, Some(6380));
        assert!(!settings.broker.enable_ready_check);
        assert_eq!(settings.broker.key_prefix, "jobs");
        assert_eq!(settings.queue_name, "emails");
        assert_eq!(settings.worker_concurrency, 8);
        assert!(!settings.inprocess_worker);
        assert_eq!(settings.worker_block_timeout, Duration::from_millis(250));
        assert_eq!(settings.log_level, LogLevel::Warn);
        assert_eq!(settings.shutdown_timeout, Duration::from_millis(1500));
        assert_eq!(settings.retention, RetentionPolicy::new(10, 20));
        assert_eq!(settings.demo_job_delay, Duration::from_millis(5));
        assert_eq!(settings.admin_addr.port(), 9000);
        assert_eq!(settings.admin_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let settings = settings(&[("REDIS_URL", "  "), ("QUEUE_NAME", "")]).unwrap();
        assert!(settings.broker.connection_url.is_none());
        assert_eq!(settings.queue_name, "demo");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            settings(&[("REDIS_PORT", "redis")]),
            Err(ConfigError::InvalidValue { key: "REDIS_PORT", .. })
        ));
        assert!(matches!(
            settings(&[("QUEUE_INPROCESS_WORKER", "maybe")]),
            Err(ConfigError::InvalidValue { key: "QUEUE_INPROCESS_WORKER", .. })
        ));
        assert!(matches!(
            settings(&[("WORKER_LOG_LEVEL", "verbose")]),
            Err(ConfigError::InvalidValue { key: "WORKER_LOG_LEVEL", .. })
        ));
        assert!(matches!(
            settings(&[("WORKER_CONCURRENCY", "0")]),
            Err(ConfigError::InvalidValue { key: "WORKER_CONCURRENCY", .. })
        ));
    }
}
