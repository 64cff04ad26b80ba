//! Per-operation-class timeout table and exponential backoff.

use crate::lock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

/// Well-known operation classes.
pub mod classes {
    /// Page navigation
    pub const NAVIGATION: &str = "navigation";
    /// Waiting for an element
    pub const ELEMENT: &str = "element";
    /// Plain network request
    pub const NETWORK: &str = "network";
    /// Fallback for everything else
    pub const DEFAULT: &str = "default";
}

/// Upper bound of the positive jitter added to a backoff delay.
const JITTER_FRACTION: f64 = 0.1;

/// Static configuration for a [`TimeoutManager`].
///
/// Durations are stored as milliseconds so the struct can be deserialized
/// straight from a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Timeout for the `default` class and any unknown class
    pub default_timeout_ms: u64,
    /// Timeout for the `navigation` class
    pub navigation_timeout_ms: u64,
    /// Timeout for the `element` class
    pub element_timeout_ms: u64,
    /// Timeout for the `network` class
    pub network_timeout_ms: u64,
    /// Lower policy bound
    pub min_timeout_ms: u64,
    /// Upper policy bound
    pub max_timeout_ms: u64,
    /// Default retry budget for `RetryManager`
    pub max_retries: u32,
    /// Exponential growth factor of the backoff
    pub backoff_multiplier: f64,
    /// Backoff cap
    pub max_backoff_ms: u64,
    /// Backoff for attempt 0
    pub base_delay_ms: u64,
    /// Add up to 10% positive jitter to backoff delays
    pub jitter_enabled: bool,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 60_000,
            navigation_timeout_ms: 60_000,
            element_timeout_ms: 30_000,
            network_timeout_ms: 30_000,
            min_timeout_ms: 5_000,
            max_timeout_ms: 300_000,
            max_retries: 3,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
            base_delay_ms: 1_000,
            jitter_enabled: true,
        }
    }
}

/// Mutable timeout policy plus backoff calculator.
///
/// Every stored timeout is kept within `[min_timeout, max_timeout]`.
///
/// # Examples
///
/// ```rust
/// use egress_core::timeout::{classes, TimeoutManager};
/// use std::time::Duration;
///
/// let manager = TimeoutManager::builder()
///     .jitter(false)
///     .max_backoff(Duration::from_secs(10))
///     .build();
///
/// assert_eq!(manager.get_timeout(classes::ELEMENT), Duration::from_secs(30));
/// assert_eq!(manager.calculate_backoff(2, Duration::from_secs(1)), Duration::from_secs(4));
/// ```
#[derive(Debug)]
pub struct TimeoutManager {
    config: TimeoutConfig,
    table: Mutex<HashMap<String, Duration>>,
}

impl TimeoutManager {
    /// Create a manager from configuration.
    pub fn new(config: TimeoutConfig) -> Self {
        let mut config = config;
        if config.max_timeout_ms < config.min_timeout_ms {
            std::mem::swap(&mut config.min_timeout_ms, &mut config.max_timeout_ms);
        }
        // A multiplier below 1.0 would make successive delays shrink.
        config.backoff_multiplier = if config.backoff_multiplier.is_finite() {
            config.backoff_multiplier.max(1.0)
        } else {
            TimeoutConfig::default().backoff_multiplier
        };
        let min = Duration::from_millis(config.min_timeout_ms);
        let max = Duration::from_millis(config.max_timeout_ms);
        let clamp = |ms: u64| Duration::from_millis(ms).clamp(min, max);

        let table = HashMap::from([
            (classes::DEFAULT.to_string(), clamp(config.default_timeout_ms)),
            (classes::NAVIGATION.to_string(), clamp(config.navigation_timeout_ms)),
            (classes::ELEMENT.to_string(), clamp(config.element_timeout_ms)),
            (classes::NETWORK.to_string(), clamp(config.network_timeout_ms)),
        ]);

        Self {
            config,
            table: Mutex::new(table),
        }
    }

    /// Start building a manager.
    pub fn builder() -> TimeoutManagerBuilder {
        TimeoutManagerBuilder::default()
    }

    /// The configuration this manager was built from.
    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Timeout for `class`, or the default-class timeout if unknown.
    pub fn get_timeout(&self, class: &str) -> Duration {
        let table = lock(&self.table);
        table
            .get(class)
            .or_else(|| table.get(classes::DEFAULT))
            .copied()
            .unwrap_or_else(|| self.clamp(Duration::from_millis(self.config.default_timeout_ms)))
    }

    /// Store a timeout for `class`, clamped to the policy bounds.
    ///
    /// Returns the value actually stored.
    pub fn set_timeout(&self, class: &str, timeout: Duration) -> Duration {
        let clamped = self.clamp(timeout);
        lock(&self.table).insert(class.to_string(), clamped);
        clamped
    }

    /// `(min, max)` policy bounds.
    pub fn bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.config.min_timeout_ms),
            Duration::from_millis(self.config.max_timeout_ms),
        )
    }

    /// Default retry budget.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Backoff before the retry following `attempt` (0-indexed).
    ///
    /// `min(base * multiplier^attempt, max_backoff)`, plus up to 10% jitter
    /// when enabled. The result never exceeds `max_backoff`; once the delay
    /// is too close to the cap for the full jitter window, the window is
    /// shifted down to end at the cap, so capped retries still spread out.
    pub fn calculate_backoff(&self, attempt: u32, base: Duration) -> Duration {
        let max = Duration::from_millis(self.config.max_backoff_ms).as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = (base.as_secs_f64() * self.config.backoff_multiplier.powi(exponent)).min(max);

        if !self.config.jitter_enabled {
            return Duration::from_secs_f64(delay);
        }

        let spread = JITTER_FRACTION * delay;
        let low = if delay + spread <= max { delay } else { max - spread };
        let jittered = low + rand::random::<f64>() * spread;

        Duration::from_secs_f64(jittered.clamp(0.0, max))
    }

    /// Backoff using the configured base delay.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.calculate_backoff(attempt, Duration::from_millis(self.config.base_delay_ms))
    }

    /// Copy of the current policy table.
    pub fn snapshot(&self) -> BTreeMap<String, Duration> {
        lock(&self.table)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    fn clamp(&self, timeout: Duration) -> Duration {
        let (min, max) = self.bounds();
        timeout.clamp(min, max)
    }
}

impl Default for TimeoutManager {
    fn default() -> Self {
        Self::new(TimeoutConfig::default())
    }
}

/// Builder for [`TimeoutManager`].
#[derive(Debug, Default)]
pub struct TimeoutManagerBuilder {
    config: TimeoutConfig,
}

impl TimeoutManagerBuilder {
    /// Timeout for the `default` class.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout_ms = as_millis(timeout);
        self
    }

    /// Timeout for the `navigation` class.
    pub fn navigation_timeout(mut self, timeout: Duration) -> Self {
        self.config.navigation_timeout_ms = as_millis(timeout);
        self
    }

    /// Timeout for the `element` class.
    pub fn element_timeout(mut self, timeout: Duration) -> Self {
        self.config.element_timeout_ms = as_millis(timeout);
        self
    }

    /// Timeout for the `network` class.
    pub fn network_timeout(mut self, timeout: Duration) -> Self {
        self.config.network_timeout_ms = as_millis(timeout);
        self
    }

    /// Policy bounds.
    pub fn bounds(mut self, min: Duration, max: Duration) -> Self {
        self.config.min_timeout_ms = as_millis(min);
        self.config.max_timeout_ms = as_millis(max);
        self
    }

    /// Default retry budget.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Exponential multiplier (values below 1.0 are raised to 1.0).
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Backoff cap.
    pub fn max_backoff(mut self, max: Duration) -> Self {
        self.config.max_backoff_ms = as_millis(max);
        self
    }

    /// Base delay for attempt 0.
    pub fn base_delay(mut self, base: Duration) -> Self {
        self.config.base_delay_ms = as_millis(base);
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.config.jitter_enabled = enabled;
        self
    }

    /// Build the manager.
    pub fn build(self) -> TimeoutManager {
        TimeoutManager::new(self.config)
    }
}

fn as_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
