#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Resilience engine for flaky, long-running network tasks.
//!
//! This crate provides the pieces a scraping or automation job needs to
//! survive an unreliable network:
//!
//! - **Error classification** via [`ErrorClassifier`](classify::ErrorClassifier)
//!   - Closed [`ErrorClass`](classify::ErrorClass) taxonomy
//!   - Ordered, swappable pattern table
//! - **Retry with backoff** via [`RetryManager`](retry::RetryManager)
//! - **Timeout policy** via [`TimeoutManager`](timeout::TimeoutManager)
//!   and its [`AdaptiveTimeout`](timeout::AdaptiveTimeout) layer
//! - **Loop control** via [`LoopController`](control::LoopController)
//!   - Pause, resume and stop
//!   - Per-iteration timeouts with fresh cancellation scopes
//! - **Logging and metrics** via [`MonitorLogger`](monitor::MonitorLogger)
//!
//! # Examples
//!
//! Using the prelude for convenient imports:
//!
//! ```rust
//! use egress_core::prelude::*;
//!
//! # async fn example() -> Result<(), std::io::Error> {
//! let ctx = ResilienceContext::default();
//!
//! let body = ctx
//!     .retry()
//!     .execute_with_retry(
//!         || async { Ok::<_, std::io::Error>("ok") },
//!         RetryOptions::new("navigation").subject("acct-1"),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod classify;
pub mod config;
pub mod context;
pub mod control;
pub mod error;
pub mod monitor;
pub mod retry;
pub mod timeout;

pub use config::ResilienceConfig;
pub use context::ResilienceContext;
pub use error::{Error, LoopError, Result};

/// Convenient re-exports of commonly used items.
///
/// ```rust
/// use egress_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::classify::{ErrorClass, ErrorClassifier, PatternTable};
    pub use crate::control::{
        IterationContext, LoopConfig, LoopController, LoopOptions, LoopOutcome, LoopPhase,
    };
    pub use crate::monitor::{LogLevel, MonitorLogger};
    pub use crate::retry::{RetryContext, RetryManager, RetryOptions};
    pub use crate::timeout::{AdaptiveTimeout, TimeoutManager, classes};
    pub use crate::{LoopError, ResilienceConfig, ResilienceContext};
}

/// Lock a std mutex, recovering the data if a holder panicked.
///
/// Critical sections in this crate never leave data half-updated, so a
/// poisoned lock is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
