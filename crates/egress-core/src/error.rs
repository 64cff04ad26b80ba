//! Error types for the resilience engine.
//!
//! The engine never wraps the caller's error inside retries: `RetryManager`
//! hands the original error back untouched. Only the loop controller, which
//! adds failure modes of its own (iteration timeouts), wraps the caller's
//! error in [`LoopError`].

use std::time::Duration;
use thiserror::Error;

/// Result type alias for engine operations that fail with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the engine itself (configuration and bookkeeping).
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value could not be parsed.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig {
        /// Configuration key (environment variable or field name)
        key: String,
        /// What was wrong with it
        message: String,
    },

    /// A pattern in a classification table failed to compile.
    #[error("Invalid classification pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Regex compilation error
        #[source]
        source: regex::Error,
    },

    /// The loop controller was asked to run while already running.
    #[error("Loop controller is already running")]
    AlreadyRunning,
}

/// Errors surfaced by [`LoopController::execute`](crate::control::LoopController::execute).
///
/// `E` is the error type produced by the caller's unit of work.
#[derive(Debug, Error)]
pub enum LoopError<E> {
    /// An iteration did not finish within its time budget.
    #[error("Iteration {iteration} timeout after {}ms", .limit.as_millis())]
    IterationTimeout {
        /// 1-based iteration number that timed out
        iteration: u32,
        /// The configured per-iteration limit
        limit: Duration,
    },

    /// The unit of work failed and no error policy allowed continuing.
    #[error("Iteration {iteration} failed: {source}")]
    Operation {
        /// 1-based iteration number that failed
        iteration: u32,
        /// The caller's original error
        #[source]
        source: E,
    },

    /// An engine-level failure (e.g. concurrent `execute`).
    #[error(transparent)]
    Engine(#[from] Error),
}

impl<E> LoopError<E> {
    /// The iteration this error belongs to, if any.
    pub fn iteration(&self) -> Option<u32> {
        match self {
            Self::IterationTimeout { iteration, .. } | Self::Operation { iteration, .. } => {
                Some(*iteration)
            }
            Self::Engine(_) => None,
        }
    }

    /// Unwrap the caller's error, if this is an operation failure.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_timeout_message() {
        let err: LoopError<std::io::Error> = LoopError::IterationTimeout {
            iteration: 3,
            limit: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "Iteration 3 timeout after 1500ms");
        assert_eq!(err.iteration(), Some(3));
    }

    #[test]
    fn test_operation_error_preserves_source() {
        let err = LoopError::Operation {
            iteration: 2,
            source: std::io::Error::other("boom"),
        };
        assert!(err.to_string().contains("boom"));
        let inner = err.into_operation_error().unwrap();
        assert_eq!(inner.to_string(), "boom");
    }

    #[test]
    fn test_engine_error_has_no_iteration() {
        let err: LoopError<std::io::Error> = Error::AlreadyRunning.into();
        assert_eq!(err.iteration(), None);
    }
}
