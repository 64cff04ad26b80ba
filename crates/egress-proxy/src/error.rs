//! Supervisor error types

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors that can occur while supervising the proxy daemon
#[derive(Debug, Error)]
pub enum ProxyError {
    /// A configuration value is missing or malformed
    #[error("Invalid configuration value for {key}: {message}")]
    Config {
        /// Configuration key (environment variable or field name)
        key: String,
        /// What was wrong with it
        message: String,
    },

    /// The daemon executable failed validation or was not found
    #[error("Invalid daemon binary '{path}': {reason}")]
    InvalidBinary {
        /// The configured path or name
        path: String,
        /// Why it was rejected
        reason: String,
    },

    /// The config template does not exist
    #[error("Config template not found: {}", .0.display())]
    TemplateMissing(PathBuf),

    /// The secret environment variable is unset or empty
    #[error("Environment variable {0} is not set")]
    MissingSecret(String),

    /// The secret cannot be written into a line-based config
    #[error("Secret from {0} contains a line break")]
    InvalidSecret(String),

    /// The daemon could not be spawned
    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        /// Resolved executable
        binary: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The daemon never started listening
    #[error("Proxy did not start listening on {addr} within {}s", .timeout.as_secs())]
    StartupTimeout {
        /// `host:port` that was polled
        addr: String,
        /// The startup deadline
        timeout: Duration,
    },

    /// The daemon exited before it started listening
    #[error("Proxy process exited during startup ({status})")]
    ProcessExited {
        /// Exit status as reported by the OS
        status: String,
    },

    /// The daemon is listening but never passed a health check
    #[error("Proxy not ready after {attempts} health checks")]
    NotReady {
        /// Health checks attempted
        attempts: u32,
    },

    /// No IP-echo endpoint produced an answer
    #[error("Egress IP lookup failed: {0}")]
    EgressLookup(String),

    /// The IP-echo request did not finish in time
    #[error("Egress IP lookup timed out after {}ms", .0.as_millis())]
    EgressTimeout(Duration),

    /// The IP-echo endpoint answered with something unusable
    #[error("Invalid egress IP '{0}'")]
    InvalidIp(String),

    /// Rotation is disabled by configuration
    #[error("IP rotation is disabled")]
    Disabled,

    /// `start()` was called while a daemon is already supervised
    #[error("Proxy daemon is already running")]
    AlreadyRunning,

    /// I/O error (template, temp file, signals)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Shorthand for [`ProxyError::Config`].
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether the error came from the IP-echo lookup.
    pub fn is_egress_error(&self) -> bool {
        matches!(
            self,
            Self::EgressLookup(_) | Self::EgressTimeout(_) | Self::InvalidIp(_)
        )
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        Self::EgressLookup(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = ProxyError::StartupTimeout {
            addr: "127.0.0.1:1080".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(
            err.to_string(),
            "Proxy did not start listening on 127.0.0.1:1080 within 30s"
        );

        let err = ProxyError::MissingSecret("WARP_PRIVATE_KEY".to_string());
        assert_eq!(err.to_string(), "Environment variable WARP_PRIVATE_KEY is not set");
    }

    #[test]
    fn test_egress_errors() {
        assert!(ProxyError::InvalidIp("127.0.0.1".to_string()).is_egress_error());
        assert!(ProxyError::EgressTimeout(Duration::from_secs(15)).is_egress_error());
        assert!(!ProxyError::Disabled.is_egress_error());
    }

    #[test]
    fn test_io_conversion() {
        let err: ProxyError = std::io::Error::other("disk full").into();
        assert!(matches!(err, ProxyError::Io(_)));
    }
}
