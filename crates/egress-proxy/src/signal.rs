//! Cleanup on process termination

use crate::error::Result;
use crate::supervisor::ProxySupervisor;
use tokio::signal::unix::{SignalKind, signal};

/// Signals that trigger a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT (Ctrl-C)
    Interrupt,
    /// SIGTERM
    Terminate,
}

/// Wait for SIGINT or SIGTERM.
pub async fn wait_for_shutdown() -> Result<ShutdownSignal> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::select! {
        _ = interrupt.recv() => ShutdownSignal::Interrupt,
        _ = terminate.recv() => ShutdownSignal::Terminate,
    })
}

/// Wait for SIGINT or SIGTERM, then clean up `supervisor`.
///
/// The rendered config holds key material; this makes sure it does not
/// outlive the process. Typically spawned next to the application's main task:
///
/// ```rust,no_run
/// # use egress_proxy::{ProxyConfig, ProxySupervisor};
/// # async fn example(supervisor: ProxySupervisor) {
/// tokio::spawn(egress_proxy::signal::shutdown_on_signal(supervisor.clone()));
/// # }
/// ```
pub async fn shutdown_on_signal(supervisor: ProxySupervisor) -> Result<ShutdownSignal> {
    let received = wait_for_shutdown().await?;
    tracing::info!(signal = ?received, "shutdown signal received, cleaning up proxy daemon");
    supervisor.cleanup().await;
    Ok(received)
}
