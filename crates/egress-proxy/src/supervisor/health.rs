//! Periodic health checking with self-healing restarts

use super::{Inner, SupervisorPhase, metrics};
use egress_core::monitor::LogLevel;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running health-check task and its single-use cancellation scope.
pub(crate) struct HealthLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HealthLoop {
    /// The task holds only a weak reference, so it ends once the supervisor is gone.
    pub fn spawn(inner: &Arc<Inner>, subject_id: Option<String>) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(Arc::downgrade(inner), cancel.clone(), subject_id));
        Self { cancel, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task without waiting for it.
    pub fn cancel(self) {
        self.cancel.cancel();
    }

    /// Signal the task and wait for it to exit.
    ///
    /// A check already in progress runs to completion first.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// What the next tick does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Regular health check
    Checking,
    /// A self-heal failed; retry it on the slow cadence
    Recovering,
}

async fn run(weak: Weak<Inner>, cancel: CancellationToken, subject_id: Option<String>) {
    let subject = subject_id.as_deref();
    let mut mode = Mode::Checking;

    loop {
        let Some(wait) = weak.upgrade().map(|inner| match mode {
            Mode::Checking => inner.config.timings.health_interval,
            Mode::Recovering => inner.config.timings.slow_retry_interval,
        }) else {
            break;
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let Some(inner) = weak.upgrade() else { break };
        let _critical = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            guard = inner.critical.lock() => guard,
        };
        if cancel.is_cancelled() {
            break;
        }

        mode = match mode {
            Mode::Checking => check(&inner, subject).await,
            Mode::Recovering => self_heal(&inner, subject).await,
        };
    }

    tracing::debug!(subject = subject.unwrap_or("-"), "health loop exited");
}

async fn check(inner: &Inner, subject: Option<&str>) -> Mode {
    if inner.perform_health_check(subject).await {
        inner.count(metrics::HEALTH_PASSED);
        inner.mark_healthy().await;
        return Mode::Checking;
    }

    inner.count(metrics::HEALTH_FAILED);
    let threshold = inner.config.failure_threshold;
    let failures = {
        let mut state = inner.state.lock().await;
        state.consecutive_failures += 1;
        if state.process.is_some() {
            state.phase = SupervisorPhase::Degraded;
        }
        state.consecutive_failures
    };
    inner.log(
        &format!("Health check failed {}/{}", failures, threshold),
        LogLevel::Warn,
        subject,
    );

    if failures < threshold {
        return Mode::Checking;
    }

    inner.log(
        "Too many failed health checks, restarting proxy daemon",
        LogLevel::Warn,
        subject,
    );
    self_heal(inner, subject).await
}

async fn self_heal(inner: &Inner, subject: Option<&str>) -> Mode {
    match inner.restart(subject).await {
        Ok(()) => {
            inner.count(metrics::RESTARTS);
            inner.log("Proxy daemon recovered", LogLevel::Info, subject);
            Mode::Checking
        }
        Err(err) => {
            inner.count(metrics::RESTART_FAILURES);
            inner.log(
                &format!(
                    "Proxy daemon recovery failed, retrying in {}s: {}",
                    inner.config.timings.slow_retry_interval.as_secs(),
                    err
                ),
                LogLevel::Error,
                subject,
            );
            Mode::Recovering
        }
    }
}
