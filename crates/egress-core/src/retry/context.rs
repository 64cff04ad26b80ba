//! Per-call retry options.

use crate::classify::ErrorClass;
use crate::timeout::classes;

/// A narrower retry cap for one error class.
///
/// While the failure's class matches `class`, a retry is only allowed if
/// `count < limit`. The manager advances `count` each time it retries that
/// class, so a caller that already spent part of the budget elsewhere can
/// pass its running total in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    /// Class the cap applies to
    pub class: ErrorClass,
    /// Retries already spent on this class
    pub count: u32,
    /// Maximum retries for this class
    pub limit: u32,
}

impl RetryContext {
    /// Cap retries of `class` at `limit`, starting from zero.
    pub fn new(class: ErrorClass, limit: u32) -> Self {
        Self {
            class,
            count: 0,
            limit,
        }
    }

    /// Start from an already spent `count`.
    pub fn starting_at(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    /// Whether another retry of `class` is allowed.
    pub fn allows(&self, class: ErrorClass) -> bool {
        class != self.class || self.count < self.limit
    }

    /// Record a retry of `class`.
    pub(crate) fn advance(&mut self, class: ErrorClass) {
        if class == self.class {
            self.count = self.count.saturating_add(1);
        }
    }
}

/// Options for one [`execute_with_retry`](super::RetryManager::execute_with_retry) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOptions {
    /// Retry budget; `None` uses the timeout manager's default
    pub max_retries: Option<u32>,
    /// Operation class used for logging and metric keys
    pub operation_class: String,
    /// Subject the operation runs for
    pub subject_id: Option<String>,
    /// Optional per-class cap
    pub context: Option<RetryContext>,
}

impl RetryOptions {
    /// Options for `operation_class` with the default budget.
    pub fn new(operation_class: impl Into<String>) -> Self {
        Self {
            max_retries: None,
            operation_class: operation_class.into(),
            subject_id: None,
            context: None,
        }
    }

    /// Override the retry budget.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Tag logs with a subject.
    pub fn subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    /// Attach a per-class cap.
    pub fn context(mut self, context: RetryContext) -> Self {
        self.context = Some(context);
        self
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::new(classes::DEFAULT)
    }
}
