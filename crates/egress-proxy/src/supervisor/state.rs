//! Supervision state and the snapshots handed to callers

use crate::subprocess::{DaemonProcess, RenderedConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

/// Where the supervisor is in the daemon's lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorPhase {
    /// No daemon
    #[default]
    Stopped,
    /// Daemon spawned, no health check has passed yet
    Starting,
    /// Last health check passed
    Healthy,
    /// Health checks are failing, below the restart threshold
    Degraded,
    /// Daemon is being replaced
    Restarting,
}

impl fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SupervisorPhase::Stopped => "stopped",
            SupervisorPhase::Starting => "starting",
            SupervisorPhase::Healthy => "healthy",
            SupervisorPhase::Degraded => "degraded",
            SupervisorPhase::Restarting => "restarting",
        })
    }
}

/// Mutable state owned by one supervisor.
///
/// `process` is `Some` exactly while the daemon is believed alive.
#[derive(Debug, Default)]
pub(crate) struct ProcessState {
    pub phase: SupervisorPhase,
    pub process: Option<DaemonProcess>,
    pub config_file: Option<RenderedConfig>,
    pub started_at: Option<Instant>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl ProcessState {
    /// Take ownership of the daemon and its config, leaving the state stopped.
    pub fn take_daemon(&mut self) -> (Option<DaemonProcess>, Option<RenderedConfig>) {
        self.phase = SupervisorPhase::Stopped;
        self.started_at = None;
        (self.process.take(), self.config_file.take())
    }

    /// Record a freshly started daemon.
    ///
    /// The phase stays `Starting` until a health check passes. Failures
    /// counted against the previous daemon are dropped.
    pub fn install(&mut self, process: DaemonProcess, config_file: RenderedConfig) {
        self.process = Some(process);
        self.config_file = Some(config_file);
        self.started_at = Some(Instant::now());
        self.phase = SupervisorPhase::Starting;
        self.consecutive_failures = 0;
    }
}

/// Point-in-time view of the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupervisorStatus {
    /// Rotation enabled by configuration
    pub enabled: bool,
    /// Lifecycle phase
    pub phase: SupervisorPhase,
    /// Whether a daemon is running
    pub running: bool,
    /// Daemon process id
    pub pid: Option<u32>,
    /// Time of the last passing health check
    pub last_health_check_at: Option<DateTime<Utc>>,
    /// Failed health checks since the last pass or restart
    pub consecutive_failures: u32,
    /// Whether the periodic health check is scheduled
    pub health_check_running: bool,
    /// SOCKS5 listen host
    pub host: String,
    /// SOCKS5 listen port
    pub port: u16,
    /// Config template path
    pub template_path: PathBuf,
    /// Configured daemon executable
    pub binary: String,
    /// Rendered config the daemon is running with
    pub rendered_config: Option<PathBuf>,
    /// How long the current daemon has been up
    pub uptime: Option<Duration>,
    /// Cached egress IP, if still fresh
    pub cached_ip: Option<IpAddr>,
}

/// Outcome of a successful [`rotate_ip`](super::ProxySupervisor::rotate_ip).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationResult {
    /// Egress IP before the restart, if it could be measured
    pub old_ip: Option<IpAddr>,
    /// Egress IP after the restart
    pub new_ip: IpAddr,
    /// `old_ip != new_ip`
    pub changed: bool,
    /// Wall time the rotation took
    pub duration: Duration,
    /// When the rotation finished
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_stopped() {
        let mut state = ProcessState::default();
        assert_eq!(state.phase, SupervisorPhase::Stopped);
        let (process, config) = state.take_daemon();
        assert!(process.is_none());
        assert!(config.is_none());
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SupervisorPhase::Restarting).unwrap(),
            "\"restarting\""
        );
        assert_eq!(SupervisorPhase::Degraded.to_string(), "degraded");
    }
}
