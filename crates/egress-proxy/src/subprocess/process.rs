//! Proxy daemon process handle

use crate::error::{ProxyError, Result};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

const STATUS_KEYWORDS: &[&str] = &["SOCKS5", "listening", "ready"];
const ERROR_KEYWORDS: &[&str] = &["error", "Error", "failed"];

/// A spawned proxy daemon, leader of its own process group.
///
/// Dropping the handle kills the daemon.
#[derive(Debug)]
pub struct DaemonProcess {
    child: Child,
    pid: u32,
    output: JoinHandle<()>,
}

impl DaemonProcess {
    /// Spawn `binary` with `args` in a new process group.
    ///
    /// `secret_var` is removed from the child's environment; the daemon reads
    /// its key from the rendered config file.
    pub fn spawn(binary: &Path, args: &[String], secret_var: &str) -> Result<Self> {
        let mut cmd = Command::new(binary);
        cmd.args(args)
            .env_remove(secret_var)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ProxyError::Spawn {
            binary: binary.display().to_string(),
            source,
        })?;

        let pid = child.id().ok_or_else(|| ProxyError::Spawn {
            binary: binary.display().to_string(),
            source: std::io::Error::other("process exited before its pid was read"),
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let output = tokio::spawn(async move {
            tokio::join!(
                drain(stdout, pid, StreamKind::Stdout),
                drain(stderr, pid, StreamKind::Stderr)
            );
        });

        tracing::info!(pid, binary = %binary.display(), "proxy daemon spawned");
        Ok(Self { child, pid, output })
    }

    /// OS process id (also the process group id)
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit status, if the daemon has already exited.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Whether the daemon is still running
    pub fn is_alive(&mut self) -> bool {
        self.exit_status().is_none()
    }

    /// Send SIGTERM to the group, then SIGKILL if it outlives `grace`.
    pub async fn terminate(mut self, grace: Duration) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }

        signal_group(self.pid, Signal::SIGTERM)?;
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                tracing::debug!(pid = self.pid, status = ?status.ok(), "proxy daemon exited");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    pid = self.pid,
                    grace_ms = grace.as_millis() as u64,
                    "proxy daemon ignored SIGTERM, killing"
                );
                self.force_kill().await
            }
        }
    }

    /// SIGKILL the group and reap the daemon.
    pub async fn force_kill(mut self) -> Result<()> {
        signal_group(self.pid, Signal::SIGKILL)?;
        // The group signal normally suffices; this covers a daemon that left its group.
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        tracing::debug!(pid = self.pid, "proxy daemon killed");
        Ok(())
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.output.abort();
    }
}

fn signal_group(pid: u32, signal: Signal) -> Result<()> {
    let pgid = i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| std::io::Error::other(format!("pid {} out of range", pid)))?;

    match killpg(pgid, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(std::io::Error::from(errno).into()),
    }
}

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

/// Read daemon output to completion, logging only status keywords.
///
/// Raw lines are never logged: the daemon may echo its configuration.
async fn drain<R>(stream: Option<R>, pid: u32, kind: StreamKind)
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else { return };
    let mut lines = BufReader::new(stream).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        match kind {
            StreamKind::Stdout if STATUS_KEYWORDS.iter().any(|k| line.contains(k)) => {
                tracing::debug!(pid, "proxy daemon reported status");
            }
            StreamKind::Stderr if ERROR_KEYWORDS.iter().any(|k| line.contains(k)) => {
                tracing::warn!(pid, "proxy daemon reported an error");
            }
            _ => {}
        }
    }
}
