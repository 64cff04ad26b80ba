//! Shared engine instance.

use crate::classify::ErrorClassifier;
use crate::config::ResilienceConfig;
use crate::monitor::MonitorLogger;
use crate::retry::RetryManager;
use crate::timeout::{AdaptiveTimeout, TimeoutManager};
use std::sync::Arc;

/// One wired-up set of engine components.
///
/// All components share the same [`MonitorLogger`] and [`TimeoutManager`],
/// so adaptive adjustments are seen by subsequent retries and every counter
/// lands in one place. Cloning is cheap and shares state.
///
/// # Examples
///
/// ```rust
/// use egress_core::ResilienceContext;
/// use egress_core::retry::RetryOptions;
///
/// # async fn example() -> Result<(), std::io::Error> {
/// let ctx = ResilienceContext::default();
/// let answer = ctx
///     .retry()
///     .execute_with_retry(|| async { Ok::<_, std::io::Error>(7) }, RetryOptions::new("network"))
///     .await?;
/// assert_eq!(answer, 7);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ResilienceContext {
    monitor: Arc<MonitorLogger>,
    classifier: Arc<ErrorClassifier>,
    timeouts: Arc<TimeoutManager>,
    retry: RetryManager,
    adaptive: Arc<AdaptiveTimeout>,
}

impl ResilienceContext {
    /// Build every component from `config`.
    pub fn new(config: ResilienceConfig) -> Self {
        Self::with_classifier(config, ErrorClassifier::new())
    }

    /// Build with a custom classifier (e.g. a different pattern table).
    pub fn with_classifier(config: ResilienceConfig, classifier: ErrorClassifier) -> Self {
        let ResilienceConfig {
            monitor,
            timeouts,
            adaptive,
        } = config;

        let monitor = Arc::new(MonitorLogger::new(monitor));
        let classifier = Arc::new(classifier);
        let timeouts = Arc::new(TimeoutManager::new(timeouts));
        let retry = RetryManager::new(classifier.clone(), timeouts.clone(), monitor.clone());
        let adaptive = Arc::new(AdaptiveTimeout::with_config(
            adaptive,
            timeouts.clone(),
            monitor.clone(),
        ));

        Self {
            monitor,
            classifier,
            timeouts,
            retry,
            adaptive,
        }
    }

    /// Build from `EGRESS_*` environment variables.
    #[cfg(feature = "env")]
    pub fn from_env() -> crate::error::Result<Self> {
        Ok(Self::new(ResilienceConfig::from_env()?))
    }

    /// The shared logger.
    pub fn monitor(&self) -> &Arc<MonitorLogger> {
        &self.monitor
    }

    /// The shared classifier.
    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    /// The shared timeout table.
    pub fn timeouts(&self) -> &Arc<TimeoutManager> {
        &self.timeouts
    }

    /// The retry manager.
    pub fn retry(&self) -> &RetryManager {
        &self.retry
    }

    /// The adaptive layer.
    pub fn adaptive(&self) -> &Arc<AdaptiveTimeout> {
        &self.adaptive
    }
}

impl Default for ResilienceContext {
    fn default() -> Self {
        Self::new(ResilienceConfig::default())
    }
}
