//! Retry with classification and exponential backoff.
//!
//! # Key Types
//!
//! - [`RetryManager`] - Runs an async operation, retrying retryable failures
//! - [`RetryOptions`] - Per-call budget, operation class and subject
//! - [`RetryContext`] - Optional narrower cap for one error class
//!
//! # Examples
//!
//! ```rust
//! use egress_core::classify::ErrorClass;
//! use egress_core::retry::{RetryContext, RetryManager, RetryOptions};
//!
//! # async fn example() -> Result<(), std::io::Error> {
//! let manager = RetryManager::default();
//! let options = RetryOptions::new("navigation")
//!     .max_retries(3)
//!     .subject("acct-42")
//!     .context(RetryContext::new(ErrorClass::NavigationTimeout, 1));
//!
//! let page = manager
//!     .execute_with_retry(|| async { Ok::<_, std::io::Error>("loaded") }, options)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod context;
mod manager;

pub use context::{RetryContext, RetryOptions};
pub use manager::{RETRYABLE, RetryManager};
