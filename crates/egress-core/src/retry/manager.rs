//! Classified retry with exponential backoff.

use super::{RetryContext, RetryOptions};
use crate::classify::{ErrorClass, ErrorClassifier};
use crate::monitor::MonitorLogger;
use crate::timeout::TimeoutManager;
use std::collections::BTreeSet;
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Classes retried by default. Everything else, `unknown` included, fails fast.
pub const RETRYABLE: [ErrorClass; 5] = [
    ErrorClass::Timeout,
    ErrorClass::NavigationTimeout,
    ErrorClass::NetworkError,
    ErrorClass::ConnectionRefused,
    ErrorClass::TemporaryFailure,
];

/// Runs async operations with classification-driven retries.
///
/// Backoff delays come from the shared [`TimeoutManager`]; every attempt,
/// failure and give-up is reported to the [`MonitorLogger`]. The caller's
/// error is returned untouched once retries stop.
///
/// # Examples
///
/// ```rust
/// use egress_core::retry::{RetryManager, RetryOptions};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), std::io::Error> {
/// let manager = RetryManager::default();
/// let attempts = Arc::new(AtomicU32::new(0));
///
/// let value = manager
///     .execute_with_retry(
///         || {
///             let attempts = Arc::clone(&attempts);
///             async move {
///                 if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
///                     Err(std::io::Error::other("connection refused"))
///                 } else {
///                     Ok(42)
///                 }
///             }
///         },
///         RetryOptions::new("network").max_retries(2),
///     )
///     .await?;
/// assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RetryManager {
    classifier: Arc<ErrorClassifier>,
    timeouts: Arc<TimeoutManager>,
    monitor: Arc<MonitorLogger>,
    retryable: BTreeSet<ErrorClass>,
}

impl RetryManager {
    /// Manager sharing the given components, retrying the default set.
    pub fn new(
        classifier: Arc<ErrorClassifier>,
        timeouts: Arc<TimeoutManager>,
        monitor: Arc<MonitorLogger>,
    ) -> Self {
        Self {
            classifier,
            timeouts,
            monitor,
            retryable: RETRYABLE.into_iter().collect(),
        }
    }

    /// Replace the retryable class set.
    pub fn with_retryable<I>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = ErrorClass>,
    {
        self.retryable = classes.into_iter().collect();
        self
    }

    /// Whether failures of `class` are retried at all.
    pub fn is_retryable(&self, class: ErrorClass) -> bool {
        self.retryable.contains(&class)
    }

    /// The classifier in use.
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Run `operation` until it succeeds, fails with a non-retryable class,
    /// or the retry budget is spent.
    ///
    /// `operation` is invoked at most `max_retries + 1` times.
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        mut operation: F,
        options: RetryOptions,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + 'static,
    {
        let RetryOptions {
            max_retries,
            operation_class,
            subject_id,
            mut context,
        } = options;
        let max_retries = max_retries.unwrap_or_else(|| self.timeouts.max_retries());
        let class = operation_class.as_str();
        let subject = subject_id.as_deref();
        let started = Instant::now();

        let mut attempt = 0;
        loop {
            self.monitor
                .log_retry_attempt(class, attempt, max_retries, subject);

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        self.monitor
                            .log_retry_success(class, attempt, started.elapsed(), subject);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let error_class = self.classifier.classify(&error);
            self.monitor
                .log_retry_failure(class, attempt, error_class, &error.to_string(), subject);

            if !self.should_retry(error_class, attempt, max_retries, context.as_ref()) {
                self.monitor
                    .log_retry_exhausted(class, attempt, started.elapsed(), subject);
                return Err(error);
            }

            if let Some(ctx) = context.as_mut() {
                ctx.advance(error_class);
            }

            let delay = self.timeouts.backoff_delay(attempt);
            self.monitor.log_retry_delay(class, delay, subject);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn should_retry(
        &self,
        class: ErrorClass,
        attempt: u32,
        max_retries: u32,
        context: Option<&RetryContext>,
    ) -> bool {
        attempt < max_retries
            && self.is_retryable(class)
            && context.is_none_or(|ctx| ctx.allows(class))
    }
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new(
            Arc::new(ErrorClassifier::new()),
            Arc::new(TimeoutManager::default()),
            Arc::new(MonitorLogger::default()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::categories;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn manager() -> (RetryManager, Arc<MonitorLogger>) {
        let monitor = Arc::new(MonitorLogger::default());
        let manager = RetryManager::new(
            Arc::new(ErrorClassifier::new()),
            Arc::new(TimeoutManager::builder().jitter(false).build()),
            monitor.clone(),
        );
        (manager, monitor)
    }

    async fn failing_then_ok(
        attempts: &AtomicU32,
        failures: u32,
        message: &'static str,
    ) -> Result<u32, std::io::Error> {
        let current = attempts.fetch_add(1, Ordering::SeqCst);
        if current < failures {
            Err(std::io::Error::other(message))
        } else {
            Ok(current)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success_calls_once() {
        let (manager, monitor) = manager();
        let attempts = AtomicU32::new(0);

        let result = manager
            .execute_with_retry(
                || failing_then_ok(&attempts, 0, "unused"),
                RetryOptions::new("navigation"),
            )
            .await;

        assert_eq!(result.unwrap(), 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.metric(categories::RETRIES, "navigation_success"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failures_then_success() {
        let (manager, monitor) = manager();
        let attempts = AtomicU32::new(0);

        let result = manager
            .execute_with_retry(
                || failing_then_ok(&attempts, 2, "Navigation timeout of 30000 ms exceeded"),
                RetryOptions::new("navigation").max_retries(2),
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(monitor.metric(categories::RETRIES, "navigation_success"), 1);
        assert_eq!(monitor.metric(categories::RETRIES, "navigation_failures"), 2);
        assert_eq!(monitor.metric(categories::ERRORS, "navigation_timeout"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_fails_fast() {
        let (manager, monitor) = manager();
        let attempts = AtomicU32::new(0);

        let err = manager
            .execute_with_retry(
                || failing_then_ok(&attempts, 10, "login failed: bad password"),
                RetryOptions::new("login").max_retries(3),
            )
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "login failed: bad password");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.metric(categories::RETRIES, "login_exhausted"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_errors_are_not_retried() {
        let (manager, _) = manager();
        let attempts = AtomicU32::new(0);

        let result = manager
            .execute_with_retry(
                || failing_then_ok(&attempts, 10, "something odd"),
                RetryOptions::default(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted_returns_original_error() {
        let (manager, _) = manager();
        let attempts = AtomicU32::new(0);

        let err = manager
            .execute_with_retry(
                || failing_then_ok(&attempts, 10, "connect ECONNREFUSED 127.0.0.1:1080"),
                RetryOptions::new("network").max_retries(2),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), std::io::ErrorKind::Other);
        assert_eq!(err.to_string(), "connect ECONNREFUSED 127.0.0.1:1080");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_budget_comes_from_timeout_manager() {
        let (manager, _) = manager();
        let attempts = AtomicU32::new(0);

        let _ = manager
            .execute_with_retry(
                || failing_then_ok(&attempts, 10, "operation timed out"),
                RetryOptions::new("network"),
            )
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_caps_matching_class() {
        let (manager, _) = manager();
        let attempts = AtomicU32::new(0);

        let _ = manager
            .execute_with_retry(
                || failing_then_ok(&attempts, 10, "Navigation timeout of 30000 ms exceeded"),
                RetryOptions::new("navigation")
                    .max_retries(5)
                    .context(RetryContext::new(ErrorClass::NavigationTimeout, 1)),
            )
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_ignores_other_classes() {
        let (manager, _) = manager();
        let attempts = AtomicU32::new(0);

        let _ = manager
            .execute_with_retry(
                || failing_then_ok(&attempts, 10, "operation timed out"),
                RetryOptions::new("navigation")
                    .max_retries(2)
                    .context(RetryContext::new(ErrorClass::NavigationTimeout, 0)),
            )
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let (manager, _) = manager();
        let attempts = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let _ = manager
            .execute_with_retry(
                || failing_then_ok(&attempts, 2, "operation timed out"),
                RetryOptions::new("network").max_retries(2),
            )
            .await;

        // 1s + 2s of backoff with jitter disabled.
        assert!(started.elapsed() >= std::time::Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_retryable_set() {
        let (manager, _) = manager();
        let manager = manager.with_retryable([ErrorClass::AuthenticationError]);
        let attempts = AtomicU32::new(0);

        let _ = manager
            .execute_with_retry(
                || failing_then_ok(&attempts, 10, "server answered 401"),
                RetryOptions::new("login").max_retries(1),
            )
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(!manager.is_retryable(ErrorClass::Timeout));
    }
}
