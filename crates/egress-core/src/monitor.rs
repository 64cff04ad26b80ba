//! Leveled logging and in-memory metric counters.
//!
//! [`MonitorLogger`] is the single sink the retry, timeout and loop
//! components report through. Every line is emitted as a `tracing` event at
//! the matching level, with `component` and `subject` as structured fields.

use crate::classify::ErrorClass;
use crate::error::{Error, Result};
use crate::lock;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

/// Metric categories used by the built-in helpers.
pub mod categories {
    /// Operation outcomes recorded by adaptive timeouts
    pub const OPERATIONS: &str = "operations";
    /// Failures per error class
    pub const ERRORS: &str = "errors";
    /// Timeout adjustments
    pub const TIMEOUTS: &str = "timeouts";
    /// Retry attempts, successes and exhaustion
    pub const RETRIES: &str = "retries";
}

/// Deep copy of all counters: category → key → count.
pub type MetricsSnapshot = BTreeMap<String, BTreeMap<String, u64>>;

/// Log severity, ordered `Debug < Info < Warn < Error`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Diagnostic detail
    Debug,
    /// Normal progress
    #[default]
    Info,
    /// Recoverable problem
    Warn,
    /// Unrecoverable problem
    Error,
}

impl LogLevel {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(Error::InvalidConfig {
                key: "log_level".to_string(),
                message: format!("unknown log level '{}'", other),
            }),
        }
    }
}

/// Configuration for a [`MonitorLogger`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Minimum level that is emitted
    pub log_level: LogLevel,
    /// Whether counters are recorded at all
    pub enable_metrics: bool,
    /// Tag printed on every line
    pub component: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            enable_metrics: true,
            component: "RESILIENCE".to_string(),
        }
    }
}

/// Leveled logger with metric counters.
///
/// # Examples
///
/// ```rust
/// use egress_core::monitor::{LogLevel, MonitorLogger};
///
/// let monitor = MonitorLogger::default();
/// monitor.log("starting", LogLevel::Info, Some("acct-7"));
/// monitor.record_metric("operations", "navigation_success", 2);
///
/// let metrics = monitor.metrics();
/// assert_eq!(metrics["operations"]["navigation_success"], 2);
/// ```
#[derive(Debug)]
pub struct MonitorLogger {
    config: MonitorConfig,
    counters: Mutex<MetricsSnapshot>,
}

impl MonitorLogger {
    /// Create a logger.
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            counters: Mutex::new(MetricsSnapshot::new()),
        }
    }

    /// Minimum emitted level.
    pub fn level(&self) -> LogLevel {
        self.config.log_level
    }

    /// Whether counters are being recorded.
    pub fn metrics_enabled(&self) -> bool {
        self.config.enable_metrics
    }

    /// Whether a message at `level` would be emitted.
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.config.log_level
    }

    /// Emit `message` if `level` passes the configured minimum.
    pub fn log(&self, message: &str, level: LogLevel, subject_id: Option<&str>) {
        if !self.enabled(level) {
            return;
        }

        let line = self.format_line(message, subject_id);
        let component = self.config.component.as_str();
        let subject = subject_id.unwrap_or_default();
        match level {
            LogLevel::Debug => tracing::debug!(component, subject, "{}", line),
            LogLevel::Info => tracing::info!(component, subject, "{}", line),
            LogLevel::Warn => tracing::warn!(component, subject, "{}", line),
            LogLevel::Error => tracing::error!(component, subject, "{}", line),
        }
    }

    /// Add `delta` to the `(category, key)` counter. No-op when metrics are disabled.
    pub fn record_metric(&self, category: &str, key: &str, delta: u64) {
        if !self.config.enable_metrics {
            return;
        }
        let mut counters = lock(&self.counters);
        let slot = counters
            .entry(category.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert(0);
        *slot = slot.saturating_add(delta);
    }

    /// Independent copy of every counter.
    pub fn metrics(&self) -> MetricsSnapshot {
        lock(&self.counters).clone()
    }

    /// Single counter value, zero if never recorded.
    pub fn metric(&self, category: &str, key: &str) -> u64 {
        lock(&self.counters)
            .get(category)
            .and_then(|keys| keys.get(key))
            .copied()
            .unwrap_or(0)
    }

    /// Clear all counters.
    pub fn reset_metrics(&self) {
        lock(&self.counters).clear();
    }

    /// A retry of `class` is about to run.
    pub fn log_retry_attempt(
        &self,
        class: &str,
        attempt: u32,
        max_retries: u32,
        subject_id: Option<&str>,
    ) {
        if attempt > 0 {
            self.log(
                &format!("Retrying {} ({}/{})", class, attempt, max_retries),
                LogLevel::Info,
                subject_id,
            );
        }
        self.record_metric(categories::RETRIES, &format!("{}_attempts", class), 1);
    }

    /// `class` succeeded after `attempts` retries.
    pub fn log_retry_success(
        &self,
        class: &str,
        attempts: u32,
        elapsed: Duration,
        subject_id: Option<&str>,
    ) {
        self.log(
            &format!(
                "{} succeeded after {} retries in {}ms",
                class,
                attempts,
                elapsed.as_millis()
            ),
            LogLevel::Info,
            subject_id,
        );
        self.record_metric(categories::RETRIES, &format!("{}_success", class), 1);
    }

    /// Attempt `attempt` of `class` failed with `error_class`.
    pub fn log_retry_failure(
        &self,
        class: &str,
        attempt: u32,
        error_class: ErrorClass,
        message: &str,
        subject_id: Option<&str>,
    ) {
        self.log(
            &format!("{} attempt {} failed [{}]: {}", class, attempt, error_class, message),
            LogLevel::Warn,
            subject_id,
        );
        self.record_metric(categories::RETRIES, &format!("{}_failures", class), 1);
        self.record_metric(categories::ERRORS, error_class.as_str(), 1);
    }

    /// `class` gave up after `attempts` retries.
    pub fn log_retry_exhausted(
        &self,
        class: &str,
        attempts: u32,
        elapsed: Duration,
        subject_id: Option<&str>,
    ) {
        self.log(
            &format!(
                "{} still failing after {} retries, {}ms total",
                class,
                attempts,
                elapsed.as_millis()
            ),
            LogLevel::Error,
            subject_id,
        );
        self.record_metric(categories::RETRIES, &format!("{}_exhausted", class), 1);
    }

    /// Waiting `delay` before retrying `class`.
    pub fn log_retry_delay(&self, class: &str, delay: Duration, subject_id: Option<&str>) {
        self.log(
            &format!("{} retrying in {}ms", class, delay.as_millis()),
            LogLevel::Info,
            subject_id,
        );
    }

    /// The timeout for `class` moved from `old` to `new`.
    pub fn log_timeout_adjustment(
        &self,
        class: &str,
        old: Duration,
        new: Duration,
        subject_id: Option<&str>,
    ) {
        self.log(
            &format!(
                "{} timeout adjusted from {}ms to {}ms",
                class,
                old.as_millis(),
                new.as_millis()
            ),
            LogLevel::Info,
            subject_id,
        );
        self.record_metric(categories::TIMEOUTS, &format!("{}_adjustments", class), 1);
    }

    /// One observed execution of `class`.
    pub fn log_operation_performance(
        &self,
        class: &str,
        duration: Duration,
        success: bool,
        subject_id: Option<&str>,
    ) {
        let (outcome, level) = if success {
            ("success", LogLevel::Info)
        } else {
            ("failure", LogLevel::Warn)
        };
        self.log(
            &format!("{} {} in {}ms", class, outcome, duration.as_millis()),
            level,
            subject_id,
        );
        self.record_metric(categories::OPERATIONS, &format!("{}_{}", class, outcome), 1);
    }

    fn format_line(&self, message: &str, subject_id: Option<&str>) -> String {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        match subject_id {
            Some(subject) => format!(
                "[{}][{}] [{}] {}",
                timestamp, subject, self.config.component, message
            ),
            None => format!("[{}] [{}] {}", timestamp, self.config.component, message),
        }
    }
}

impl Default for MonitorLogger {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

/// Install a global `tracing` subscriber filtered at `level`.
///
/// `RUST_LOG` takes precedence when set. Returns `false` if a global
/// subscriber was already installed.
#[cfg(feature = "trace")]
pub fn init_tracing(level: LogLevel) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn monitor(level: LogLevel, metrics: bool) -> MonitorLogger {
        MonitorLogger::new(MonitorConfig {
            log_level: level,
            enable_metrics: metrics,
            component: "TEST".to_string(),
        })
    }

    #[rstest]
    #[case(LogLevel::Debug, LogLevel::Debug, true)]
    #[case(LogLevel::Info, LogLevel::Debug, false)]
    #[case(LogLevel::Info, LogLevel::Warn, true)]
    #[case(LogLevel::Warn, LogLevel::Info, false)]
    #[case(LogLevel::Error, LogLevel::Error, true)]
    #[case(LogLevel::Error, LogLevel::Warn, false)]
    fn test_level_gating(
        #[case] minimum: LogLevel,
        #[case] level: LogLevel,
        #[case] expected: bool,
    ) {
        assert_eq!(monitor(minimum, true).enabled(level), expected);
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(" debug ".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_format_line_with_and_without_subject() {
        let monitor = monitor(LogLevel::Info, true);
        let with = monitor.format_line("hello", Some("acct-1"));
        assert!(with.ends_with("[acct-1] [TEST] hello"));
        assert!(with.starts_with('['));

        let without = monitor.format_line("hello", None);
        assert!(without.ends_with("] [TEST] hello"));
        assert!(!without.contains("acct"));
    }

    #[test]
    fn test_metrics_accumulate() {
        let monitor = monitor(LogLevel::Info, true);
        monitor.record_metric("operations", "navigation_success", 1);
        monitor.record_metric("operations", "navigation_success", 2);
        assert_eq!(monitor.metric("operations", "navigation_success"), 3);
        assert_eq!(monitor.metric("operations", "missing"), 0);
    }

    #[test]
    fn test_metrics_disabled_is_noop() {
        let monitor = monitor(LogLevel::Info, false);
        monitor.record_metric("operations", "x", 5);
        assert!(monitor.metrics().is_empty());
    }

    #[test]
    fn test_snapshot_is_deep_copy() {
        let monitor = monitor(LogLevel::Info, true);
        monitor.record_metric("operations", "x", 5);

        let mut snapshot = monitor.metrics();
        snapshot
            .get_mut("operations")
            .unwrap()
            .insert("x".to_string(), 100);
        snapshot.insert("extra".to_string(), BTreeMap::new());

        assert_eq!(monitor.metric("operations", "x"), 5);
        assert!(!monitor.metrics().contains_key("extra"));
    }

    #[test]
    fn test_reset_metrics() {
        let monitor = monitor(LogLevel::Info, true);
        monitor.record_metric("operations", "x", 5);
        monitor.reset_metrics();
        assert!(monitor.metrics().is_empty());
    }

    #[test]
    fn test_helpers_record_expected_counters() {
        let monitor = monitor(LogLevel::Debug, true);
        monitor.log_retry_attempt("navigation", 1, 3, Some("acct"));
        monitor.log_retry_success("navigation", 2, Duration::from_secs(5), Some("acct"));
        monitor.log_retry_failure("navigation", 1, ErrorClass::Timeout, "Timeout occurred", None);
        monitor.log_retry_exhausted("navigation", 3, Duration::from_secs(15), None);
        monitor.log_retry_delay("navigation", Duration::from_secs(1), None);
        monitor.log_timeout_adjustment(
            "navigation",
            Duration::from_secs(60),
            Duration::from_secs(66),
            None,
        );
        monitor.log_operation_performance("navigation", Duration::from_millis(800), true, None);
        monitor.log_operation_performance("navigation", Duration::from_millis(800), false, None);

        assert_eq!(monitor.metric(categories::RETRIES, "navigation_attempts"), 1);
        assert_eq!(monitor.metric(categories::RETRIES, "navigation_success"), 1);
        assert_eq!(monitor.metric(categories::RETRIES, "navigation_failures"), 1);
        assert_eq!(monitor.metric(categories::RETRIES, "navigation_exhausted"), 1);
        assert_eq!(monitor.metric(categories::ERRORS, "timeout"), 1);
        assert_eq!(monitor.metric(categories::TIMEOUTS, "navigation_adjustments"), 1);
        assert_eq!(monitor.metric(categories::OPERATIONS, "navigation_success"), 1);
        assert_eq!(monitor.metric(categories::OPERATIONS, "navigation_failure"), 1);
    }
}
