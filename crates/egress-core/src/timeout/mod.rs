//! Timeout policy, backoff calculation and adaptive adjustment.
//!
//! [`TimeoutManager`] owns the per-class timeout table and computes
//! exponential backoff delays. [`AdaptiveTimeout`] watches how operations
//! actually perform and nudges the table up or down within its bounds.

mod adaptive;
mod manager;

pub use adaptive::{AdaptiveConfig, AdaptiveTimeout, PerformanceRecord, PerformanceStats};
pub use manager::{TimeoutConfig, TimeoutManager, TimeoutManagerBuilder, classes};
