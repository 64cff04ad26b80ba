//! Engine configuration.
//!
//! [`ResilienceConfig`] gathers the settings of every component. It
//! deserializes from any serde format (missing fields take their defaults)
//! and, with the `env` feature, can be read from environment variables.

use crate::monitor::MonitorConfig;
use crate::timeout::{AdaptiveConfig, TimeoutConfig};
use serde::{Deserialize, Serialize};

#[cfg(feature = "env")]
use crate::error::{Error, Result};

/// Minimum emitted log level (`debug`, `info`, `warn`, `error`).
pub const ENV_LOG_LEVEL: &str = "EGRESS_LOG_LEVEL";
/// Whether metric counters are recorded (`true`/`false`/`1`/`0`).
pub const ENV_METRICS: &str = "EGRESS_METRICS";
/// Default retry budget.
pub const ENV_MAX_RETRIES: &str = "EGRESS_MAX_RETRIES";
/// Default-class timeout in milliseconds.
pub const ENV_DEFAULT_TIMEOUT_MS: &str = "EGRESS_DEFAULT_TIMEOUT_MS";
/// Navigation timeout in milliseconds.
pub const ENV_NAVIGATION_TIMEOUT_MS: &str = "EGRESS_NAVIGATION_TIMEOUT_MS";

/// Settings for a [`ResilienceContext`](crate::ResilienceContext).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Logging and metrics
    pub monitor: MonitorConfig,
    /// Timeout table, bounds and backoff
    pub timeouts: TimeoutConfig,
    /// Adaptive adjustment tuning
    pub adaptive: AdaptiveConfig,
}

impl ResilienceConfig {
    /// Defaults overridden by `EGRESS_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed values are rejected.
    #[cfg(feature = "env")]
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(level) = env_var(ENV_LOG_LEVEL) {
            config.monitor.log_level = level.parse()?;
        }

        if let Some(metrics) = env_var(ENV_METRICS) {
            config.monitor.enable_metrics = parse_bool(ENV_METRICS, &metrics)?;
        }

        if let Some(retries) = env_var(ENV_MAX_RETRIES) {
            config.timeouts.max_retries = parse_number(ENV_MAX_RETRIES, &retries)?;
        }

        if let Some(ms) = env_var(ENV_DEFAULT_TIMEOUT_MS) {
            config.timeouts.default_timeout_ms = parse_number(ENV_DEFAULT_TIMEOUT_MS, &ms)?;
        }

        if let Some(ms) = env_var(ENV_NAVIGATION_TIMEOUT_MS) {
            config.timeouts.navigation_timeout_ms = parse_number(ENV_NAVIGATION_TIMEOUT_MS, &ms)?;
        }

        Ok(config)
    }

    /// Load a `.env` file from the working directory (if any), then
    /// [`from_env`](Self::from_env).
    #[cfg(feature = "env")]
    pub fn from_dotenv() -> Result<Self> {
        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();
        Self::from_env()
    }
}

#[cfg(feature = "env")]
fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(feature = "env")]
fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConfig {
            key: key.to_string(),
            message: format!("expected a boolean, got '{}'", value),
        }),
    }
}

#[cfg(feature = "env")]
fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| Error::InvalidConfig {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::LogLevel;

    #[test]
    fn test_deserialize_partial_toml() {
        let config: ResilienceConfig = toml::from_str(
            r#"
            [monitor]
            log_level = "debug"

            [timeouts]
            navigation_timeout_ms = 90000
            jitter_enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.monitor.log_level, LogLevel::Debug);
        assert!(config.monitor.enable_metrics);
        assert_eq!(config.timeouts.navigation_timeout_ms, 90_000);
        assert_eq!(config.timeouts.element_timeout_ms, 30_000);
        assert!(!config.timeouts.jitter_enabled);
        assert_eq!(config.adaptive, AdaptiveConfig::default());
    }

    #[cfg(feature = "env")]
    #[test]
    fn test_from_env_overrides() {
        temp_env::with_vars(
            [
                (ENV_LOG_LEVEL, Some("warn")),
                (ENV_METRICS, Some("false")),
                (ENV_MAX_RETRIES, Some("5")),
                (ENV_DEFAULT_TIMEOUT_MS, Some("45000")),
                (ENV_NAVIGATION_TIMEOUT_MS, None),
            ],
            || {
                let config = ResilienceConfig::from_env().unwrap();
                assert_eq!(config.monitor.log_level, LogLevel::Warn);
                assert!(!config.monitor.enable_metrics);
                assert_eq!(config.timeouts.max_retries, 5);
                assert_eq!(config.timeouts.default_timeout_ms, 45_000);
                assert_eq!(config.timeouts.navigation_timeout_ms, 60_000);
            },
        );
    }

    #[cfg(feature = "env")]
    #[test]
    fn test_from_env_rejects_garbage() {
        temp_env::with_vars(
            [
                (ENV_LOG_LEVEL, None),
                (ENV_METRICS, None),
                (ENV_MAX_RETRIES, Some("lots")),
                (ENV_DEFAULT_TIMEOUT_MS, None),
                (ENV_NAVIGATION_TIMEOUT_MS, None),
            ],
            || {
                let err = ResilienceConfig::from_env().unwrap_err();
                assert!(err.to_string().contains(ENV_MAX_RETRIES));
            },
        );
    }

    #[cfg(feature = "env")]
    #[test]
    fn test_from_env_defaults_when_unset() {
        temp_env::with_vars(
            [
                (ENV_LOG_LEVEL, None::<&str>),
                (ENV_METRICS, None),
                (ENV_MAX_RETRIES, None),
                (ENV_DEFAULT_TIMEOUT_MS, None),
                (ENV_NAVIGATION_TIMEOUT_MS, None),
            ],
            || {
                assert_eq!(ResilienceConfig::from_env().unwrap(), ResilienceConfig::default());
            },
        );
    }
}
