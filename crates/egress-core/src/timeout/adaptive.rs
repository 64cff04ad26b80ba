//! Timeouts that follow observed performance.

use super::TimeoutManager;
use crate::lock;
use crate::monitor::MonitorLogger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Tuning knobs for [`AdaptiveTimeout`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Records kept per operation class
    pub max_history_size: usize,
    /// Most recent records considered when adjusting
    pub window: usize,
    /// Records required inside the window before adjusting
    pub min_samples: usize,
    /// Relative step applied on each adjustment
    pub adjustment_factor: f64,
    /// Below this success ratio the timeout grows
    pub low_success_rate: f64,
    /// Above this success ratio (and when fast) the timeout shrinks
    pub high_success_rate: f64,
    /// "Fast" means mean duration below this fraction of the current timeout
    pub fast_ratio: f64,
}

impl AdaptiveConfig {
    /// Largest step accepted; `1.0` would shrink a timeout to zero.
    pub const MAX_ADJUSTMENT_FACTOR: f64 = 0.9;

    /// Bring deserialized or hand-built values into the ranges the tuner needs.
    ///
    /// Non-finite factors fall back to the defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        self.max_history_size = self.max_history_size.max(1);
        self.window = self.window.clamp(1, self.max_history_size);
        self.adjustment_factor = if self.adjustment_factor.is_finite() {
            self.adjustment_factor.clamp(0.0, Self::MAX_ADJUSTMENT_FACTOR)
        } else {
            defaults.adjustment_factor
        };
        self.fast_ratio = if self.fast_ratio.is_finite() {
            self.fast_ratio.clamp(0.0, 1.0)
        } else {
            defaults.fast_ratio
        };
        self
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            max_history_size: 100,
            window: 10,
            min_samples: 5,
            adjustment_factor: 0.1,
            low_success_rate: 0.7,
            high_success_rate: 0.9,
            fast_ratio: 0.5,
        }
    }
}

/// One observed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Operation class the execution belongs to
    pub operation_class: String,
    /// Wall-clock duration
    pub duration: Duration,
    /// Whether it succeeded
    pub success: bool,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
    /// Subject (account, session) it ran for
    pub subject_id: Option<String>,
}

/// Aggregate view of a class's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    /// Records in history
    pub count: usize,
    /// Successful fraction, `0.0..=1.0`
    pub success_rate: f64,
    /// Mean duration
    pub avg_duration: Duration,
    /// Fastest execution
    pub min_duration: Duration,
    /// Slowest execution
    pub max_duration: Duration,
    /// Timeout currently configured for the class
    pub current_timeout: Duration,
}

/// Adjusts a [`TimeoutManager`]'s table from a bounded performance history.
///
/// # Examples
///
/// ```rust
/// use egress_core::monitor::MonitorLogger;
/// use egress_core::timeout::{classes, AdaptiveTimeout, TimeoutManager};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let timeouts = Arc::new(TimeoutManager::default());
/// let adaptive = AdaptiveTimeout::new(timeouts.clone(), Arc::new(MonitorLogger::default()));
///
/// for _ in 0..8 {
///     adaptive.record_performance(classes::NAVIGATION, Duration::from_millis(200), true, None);
/// }
/// assert!(timeouts.get_timeout(classes::NAVIGATION) < Duration::from_secs(60));
/// ```
#[derive(Debug)]
pub struct AdaptiveTimeout {
    config: AdaptiveConfig,
    timeouts: Arc<TimeoutManager>,
    monitor: Arc<MonitorLogger>,
    history: Mutex<HashMap<String, VecDeque<PerformanceRecord>>>,
}

impl AdaptiveTimeout {
    /// Adaptive layer with default tuning.
    pub fn new(timeouts: Arc<TimeoutManager>, monitor: Arc<MonitorLogger>) -> Self {
        Self::with_config(AdaptiveConfig::default(), timeouts, monitor)
    }

    /// Adaptive layer with explicit tuning.
    pub fn with_config(
        config: AdaptiveConfig,
        timeouts: Arc<TimeoutManager>,
        monitor: Arc<MonitorLogger>,
    ) -> Self {
        Self {
            config: config.sanitized(),
            timeouts,
            monitor,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// The tuning in effect.
    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Append an observation, then re-evaluate the class's timeout.
    pub fn record_performance(
        &self,
        class: &str,
        duration: Duration,
        success: bool,
        subject_id: Option<&str>,
    ) {
        {
            let mut history = lock(&self.history);
            let records = history.entry(class.to_string()).or_default();
            records.push_back(PerformanceRecord {
                operation_class: class.to_string(),
                duration,
                success,
                timestamp: Utc::now(),
                subject_id: subject_id.map(str::to_string),
            });
            while records.len() > self.config.max_history_size {
                records.pop_front();
            }
        }

        self.monitor
            .log_operation_performance(class, duration, success, subject_id);
        self.adjust_timeout(class, subject_id);
    }

    /// Re-evaluate the timeout for `class` from its recent window.
    ///
    /// Returns the new timeout if it changed.
    pub fn adjust_timeout(&self, class: &str, subject_id: Option<&str>) -> Option<Duration> {
        let (mean, success_rate) = {
            let history = lock(&self.history);
            let records = history.get(class)?;
            let recent: Vec<_> = records.iter().rev().take(self.config.window).collect();
            if recent.len() < self.config.min_samples {
                return None;
            }
            let total: Duration = recent.iter().map(|r| r.duration).sum();
            let successes = recent.iter().filter(|r| r.success).count();
            let n = recent.len();
            (total / n as u32, successes as f64 / n as f64)
        };

        let current = self.timeouts.get_timeout(class);
        let factor = self.config.adjustment_factor;
        let proposed = if success_rate < self.config.low_success_rate {
            current.mul_f64(1.0 + factor)
        } else if success_rate > self.config.high_success_rate
            && mean < current.mul_f64(self.config.fast_ratio)
        {
            current.mul_f64(1.0 - factor)
        } else {
            return None;
        };

        let stored = self.timeouts.set_timeout(class, proposed);
        if stored == current {
            return None;
        }

        tracing::debug!(
            class,
            success_rate,
            mean_ms = mean.as_millis() as u64,
            "adjusted timeout"
        );
        self.monitor
            .log_timeout_adjustment(class, current, stored, subject_id);
        Some(stored)
    }

    /// Aggregate statistics for `class`, `None` without history.
    pub fn get_performance_stats(&self, class: &str) -> Option<PerformanceStats> {
        let history = lock(&self.history);
        let records = history.get(class).filter(|r| !r.is_empty())?;

        let count = records.len();
        let total: Duration = records.iter().map(|r| r.duration).sum();
        let successes = records.iter().filter(|r| r.success).count();

        Some(PerformanceStats {
            count,
            success_rate: successes as f64 / count as f64,
            avg_duration: total / count as u32,
            min_duration: records.iter().map(|r| r.duration).min().unwrap_or_default(),
            max_duration: records.iter().map(|r| r.duration).max().unwrap_or_default(),
            current_timeout: self.timeouts.get_timeout(class),
        })
    }

    /// Records currently held for `class`.
    pub fn history_len(&self, class: &str) -> usize {
        lock(&self.history).get(class).map_or(0, VecDeque::len)
    }

    /// Copy of the history for `class`, oldest first.
    pub fn history(&self, class: &str) -> Vec<PerformanceRecord> {
        lock(&self.history)
            .get(class)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every record.
    pub fn clear_history(&self) {
        lock(&self.history).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::categories;
    use crate::timeout::classes;
    use rstest::rstest;

    fn setup() -> (Arc<TimeoutManager>, Arc<MonitorLogger>, AdaptiveTimeout) {
        let timeouts = Arc::new(TimeoutManager::default());
        let monitor = Arc::new(MonitorLogger::default());
        let adaptive = AdaptiveTimeout::new(timeouts.clone(), monitor.clone());
        (timeouts, monitor, adaptive)
    }

    #[test]
    fn test_fast_successes_decrease_timeout() {
        let (timeouts, monitor, adaptive) = setup();
        let before = timeouts.get_timeout(classes::NAVIGATION);

        for _ in 0..8 {
            adaptive.record_performance(
                classes::NAVIGATION,
                Duration::from_millis(500),
                true,
                None,
            );
        }

        let after = timeouts.get_timeout(classes::NAVIGATION);
        assert!(after < before, "{:?} should be below {:?}", after, before);
        assert_eq!(monitor.metric(categories::TIMEOUTS, "navigation_adjustments"), 4);
        assert_eq!(monitor.metric(categories::OPERATIONS, "navigation_success"), 8);
    }

    #[test]
    fn test_failures_increase_timeout() {
        let (timeouts, _, adaptive) = setup();
        let before = timeouts.get_timeout(classes::NAVIGATION);

        for _ in 0..8 {
            adaptive.record_performance(classes::NAVIGATION, Duration::from_secs(60), false, None);
        }

        assert!(timeouts.get_timeout(classes::NAVIGATION) > before);
    }

    #[test]
    fn test_no_adjustment_below_min_samples() {
        let (timeouts, _, adaptive) = setup();
        for _ in 0..4 {
            adaptive.record_performance(classes::ELEMENT, Duration::from_millis(10), true, None);
        }
        assert_eq!(timeouts.get_timeout(classes::ELEMENT), Duration::from_secs(30));
    }

    #[test]
    fn test_slow_successes_leave_timeout_alone() {
        let (timeouts, _, adaptive) = setup();
        for _ in 0..10 {
            adaptive.record_performance(classes::ELEMENT, Duration::from_secs(20), true, None);
        }
        assert_eq!(timeouts.get_timeout(classes::ELEMENT), Duration::from_secs(30));
    }

    #[test]
    fn test_adjustment_respects_bounds() {
        let (timeouts, _, adaptive) = setup();
        for _ in 0..200 {
            adaptive.record_performance(classes::NETWORK, Duration::from_millis(1), true, None);
        }
        assert_eq!(timeouts.get_timeout(classes::NETWORK), Duration::from_secs(5));

        for _ in 0..200 {
            adaptive.record_performance(classes::NETWORK, Duration::from_secs(1), false, None);
        }
        assert_eq!(timeouts.get_timeout(classes::NETWORK), Duration::from_secs(300));
    }

    #[test]
    fn test_history_is_bounded() {
        let timeouts = Arc::new(TimeoutManager::default());
        let adaptive = AdaptiveTimeout::with_config(
            AdaptiveConfig {
                max_history_size: 20,
                ..Default::default()
            },
            timeouts,
            Arc::new(MonitorLogger::default()),
        );

        for i in 0..50 {
            adaptive.record_performance("login", Duration::from_millis(i), true, Some("acct"));
            assert!(adaptive.history_len("login") <= 20);
        }

        let history = adaptive.history("login");
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].duration, Duration::from_millis(30));
        assert_eq!(history[0].subject_id.as_deref(), Some("acct"));
    }

    #[test]
    fn test_performance_stats() {
        let (_, _, adaptive) = setup();
        assert!(adaptive.get_performance_stats("login").is_none());

        adaptive.record_performance("login", Duration::from_millis(100), true, None);
        adaptive.record_performance("login", Duration::from_millis(300), false, None);

        let stats = adaptive.get_performance_stats("login").unwrap();
        assert_eq!(stats.count, 2);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.avg_duration, Duration::from_millis(200));
        assert_eq!(stats.min_duration, Duration::from_millis(100));
        assert_eq!(stats.max_duration, Duration::from_millis(300));
        assert_eq!(stats.current_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_clear_history() {
        let (_, _, adaptive) = setup();
        adaptive.record_performance("login", Duration::from_millis(100), true, None);
        adaptive.clear_history();
        assert_eq!(adaptive.history_len("login"), 0);
    }

    #[rstest]
    #[case(1.5, 0.9)]
    #[case(-0.3, 0.0)]
    #[case(f64::NAN, 0.1)]
    #[case(f64::INFINITY, 0.1)]
    fn test_adjustment_factor_is_sanitized(#[case] factor: f64, #[case] expected: f64) {
        let adaptive = AdaptiveTimeout::with_config(
            AdaptiveConfig {
                adjustment_factor: factor,
                ..Default::default()
            },
            Arc::new(TimeoutManager::default()),
            Arc::new(MonitorLogger::default()),
        );
        assert!((adaptive.config().adjustment_factor - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn test_oversized_factor_from_config_still_adjusts() {
        let config: AdaptiveConfig =
            serde_json::from_str(r#"{"adjustment_factor": 1.5, "fast_ratio": -2.0}"#).unwrap();
        let timeouts = Arc::new(TimeoutManager::default());
        let monitor = Arc::new(MonitorLogger::default());
        let adaptive = AdaptiveTimeout::with_config(config, timeouts.clone(), monitor);

        for _ in 0..8 {
            adaptive.record_performance(
                classes::NAVIGATION,
                Duration::from_millis(200),
                true,
                None,
            );
        }
        // fast_ratio clamps to 0, so nothing counts as fast
        assert_eq!(timeouts.get_timeout(classes::NAVIGATION), Duration::from_secs(60));

        for _ in 0..8 {
            adaptive.record_performance(classes::NAVIGATION, Duration::from_secs(70), false, None);
        }
        let grown = timeouts.get_timeout(classes::NAVIGATION);
        assert!(grown > Duration::from_secs(60));
        assert!(grown <= Duration::from_secs(300));
    }
}
