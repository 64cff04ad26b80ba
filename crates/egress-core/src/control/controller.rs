//! Pausable, stoppable loop with per-iteration timeouts.

use super::{IterationContext, LoopOutcome, LoopPhase, LoopStatus};
use crate::error::{Error, LoopError, Result};
use crate::lock;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Called with `(iteration, subject_id)` after each successful iteration.
pub type IterationHook = Box<dyn FnMut(u32, Option<&str>) + Send>;

/// Called once when a run ends without error.
pub type CompletionHook = Box<dyn FnOnce(&LoopOutcome) + Send>;

/// Decides whether the loop continues after a failed iteration.
pub type ErrorPolicy<E> = Box<dyn FnMut(&LoopError<E>) -> bool + Send>;

/// Static loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Iteration cap; `None` runs until stopped
    pub max_iterations: Option<u32>,
    /// Pause between iterations
    pub delay_between_iterations: Duration,
    /// Time budget per iteration; `None` disables the timer
    pub timeout_per_iteration: Option<Duration>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: None,
            delay_between_iterations: Duration::from_secs(1),
            timeout_per_iteration: Some(Duration::from_secs(30)),
        }
    }
}

/// Per-run subject and callbacks.
pub struct LoopOptions<E> {
    /// Subject passed to every iteration
    pub subject_id: Option<String>,
    /// Runs after each successful iteration
    pub on_iteration_complete: Option<IterationHook>,
    /// Runs once when the loop ends without error
    pub on_loop_complete: Option<CompletionHook>,
    /// `true` continues, `false` aborts; absent propagates the error
    pub on_error: Option<ErrorPolicy<E>>,
}

impl<E> LoopOptions<E> {
    /// No subject, no callbacks.
    pub fn new() -> Self {
        Self {
            subject_id: None,
            on_iteration_complete: None,
            on_loop_complete: None,
            on_error: None,
        }
    }

    /// Tag the run with a subject.
    pub fn subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    /// Callback after each successful iteration.
    pub fn on_iteration_complete<H>(mut self, hook: H) -> Self
    where
        H: FnMut(u32, Option<&str>) + Send + 'static,
    {
        self.on_iteration_complete = Some(Box::new(hook));
        self
    }

    /// Callback when the loop ends without error.
    pub fn on_loop_complete<H>(mut self, hook: H) -> Self
    where
        H: FnOnce(&LoopOutcome) + Send + 'static,
    {
        self.on_loop_complete = Some(Box::new(hook));
        self
    }

    /// Error policy for failed or timed-out iterations.
    pub fn on_error<P>(mut self, policy: P) -> Self
    where
        P: FnMut(&LoopError<E>) -> bool + Send + 'static,
    {
        self.on_error = Some(Box::new(policy));
        self
    }
}

impl<E> Default for LoopOptions<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for LoopOptions<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopOptions")
            .field("subject_id", &self.subject_id)
            .field("on_iteration_complete", &self.on_iteration_complete.is_some())
            .field("on_loop_complete", &self.on_loop_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
struct LoopState {
    phase: LoopPhase,
    paused: bool,
    current_iteration: u32,
    run: Option<CancellationToken>,
    scope: Option<CancellationToken>,
}

enum Step<T, E> {
    Finished(std::result::Result<T, E>),
    TimedOut(Duration),
    Stopped,
}

/// Drives a unit of work repeatedly.
///
/// Each iteration gets a fresh cancellation scope that is cancelled when the
/// iteration exceeds `timeout_per_iteration` or the loop is stopped, and torn
/// down when the iteration ends. `pause()` and `resume()` only gate the start
/// of the next iteration.
///
/// # Examples
///
/// ```rust
/// use egress_core::control::{LoopConfig, LoopController, LoopOptions, LoopPhase};
/// use std::time::Duration;
///
/// # async fn example() {
/// let controller = LoopController::new(LoopConfig {
///     max_iterations: Some(3),
///     delay_between_iterations: Duration::ZERO,
///     ..Default::default()
/// });
///
/// let outcome = controller
///     .execute(
///         |ctx| async move { Ok::<_, std::io::Error>(ctx.iteration) },
///         LoopOptions::new().subject("acct-1"),
///     )
///     .await
///     .unwrap();
/// assert_eq!(outcome.phase, LoopPhase::Completed);
/// assert_eq!(outcome.iterations, 3);
/// # }
/// ```
#[derive(Debug)]
pub struct LoopController {
    config: LoopConfig,
    state: Mutex<LoopState>,
    resume: Notify,
}

impl LoopController {
    /// Create an idle controller.
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LoopState::default()),
            resume: Notify::new(),
        }
    }

    /// The static settings.
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run `operation` until the iteration cap, `stop()`, or an unhandled error.
    ///
    /// Returns [`Error::AlreadyRunning`] (wrapped) if a run is in progress.
    pub async fn execute<F, Fut, T, E>(
        &self,
        mut operation: F,
        options: LoopOptions<E>,
    ) -> std::result::Result<LoopOutcome, LoopError<E>>
    where
        F: FnMut(IterationContext) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let LoopOptions {
            subject_id,
            mut on_iteration_complete,
            on_loop_complete,
            mut on_error,
        } = options;

        let run = self.begin()?;
        let _run_guard = RunGuard { controller: self };
        let subject = subject_id.as_deref();
        tracing::debug!(subject, max_iterations = ?self.config.max_iterations, "loop started");

        let phase = loop {
            if run.is_cancelled() {
                break LoopPhase::Stopped;
            }
            if self.limit_reached() {
                break LoopPhase::Completed;
            }
            if !self.wait_while_paused(&run).await {
                break LoopPhase::Stopped;
            }

            let (iteration, scope) = self.begin_iteration(&run);
            let scope_guard = ScopeGuard {
                controller: self,
                scope: scope.clone(),
            };
            let ctx = IterationContext {
                iteration,
                subject_id: subject_id.clone(),
                cancel: scope.clone(),
            };

            let failure = match self.run_iteration(operation(ctx), &run, &scope).await {
                Step::Stopped => break LoopPhase::Stopped,
                Step::Finished(Ok(_)) => {
                    if let Some(hook) = on_iteration_complete.as_mut() {
                        hook(iteration, subject);
                    }
                    None
                }
                Step::Finished(Err(source)) => Some(LoopError::Operation { iteration, source }),
                Step::TimedOut(limit) => Some(LoopError::IterationTimeout { iteration, limit }),
            };
            drop(scope_guard);

            if let Some(error) = failure {
                tracing::debug!(subject, iteration, error = %error, "loop iteration failed");
                match on_error.as_mut() {
                    Some(policy) => {
                        if !policy(&error) {
                            break LoopPhase::Aborted;
                        }
                    }
                    None => {
                        self.finish(LoopPhase::Failed);
                        return Err(error);
                    }
                }
            }

            let more = self.config.max_iterations.is_none_or(|max| iteration < max);
            let delay = self.config.delay_between_iterations;
            if more && !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = run.cancelled() => {}
                }
            }
        };

        let iterations = self.finish(phase);
        let outcome = LoopOutcome { phase, iterations };
        tracing::debug!(subject, ?phase, iterations, "loop finished");
        if let Some(hook) = on_loop_complete {
            hook(&outcome);
        }
        Ok(outcome)
    }

    /// Hold back the next iteration.
    pub fn pause(&self) {
        let mut state = lock(&self.state);
        if state.run.is_some() {
            state.paused = true;
            state.phase = LoopPhase::Paused;
        }
    }

    /// Let iterations start again.
    pub fn resume(&self) {
        {
            let mut state = lock(&self.state);
            state.paused = false;
            if state.run.is_some() {
                state.phase = LoopPhase::Running;
            }
        }
        self.resume.notify_waiters();
    }

    /// Cancel the in-flight iteration and end the run.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if let Some(run) = &state.run {
                run.cancel();
            }
            state.paused = false;
        }
        self.resume.notify_waiters();
    }

    /// Reinitialise counters and discard any leftover scope.
    ///
    /// Fails with [`Error::AlreadyRunning`] while a run is in progress.
    pub fn reset(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.run.is_some() {
            return Err(Error::AlreadyRunning);
        }
        if let Some(scope) = state.scope.take() {
            scope.cancel();
        }
        *state = LoopState::default();
        Ok(())
    }

    /// Snapshot of the current state.
    pub fn status(&self) -> LoopStatus {
        let state = lock(&self.state);
        let progress = match self.config.max_iterations {
            Some(max) if max > 0 => f64::from(state.current_iteration) / f64::from(max) * 100.0,
            _ => 0.0,
        };
        LoopStatus {
            phase: state.phase,
            running: state.phase.is_active(),
            paused: state.paused,
            current_iteration: state.current_iteration,
            max_iterations: self.config.max_iterations,
            progress,
        }
    }

    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        lock(&self.state).run.is_some()
    }

    /// Whether the next iteration is held back.
    pub fn is_paused(&self) -> bool {
        lock(&self.state).paused
    }

    /// Iterations started in the current (or last) run.
    pub fn current_iteration(&self) -> u32 {
        lock(&self.state).current_iteration
    }

    fn begin(&self) -> Result<CancellationToken> {
        let mut state = lock(&self.state);
        if state.run.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let run = CancellationToken::new();
        *state = LoopState {
            phase: LoopPhase::Running,
            paused: false,
            current_iteration: 0,
            run: Some(run.clone()),
            scope: None,
        };
        Ok(run)
    }

    fn begin_iteration(&self, run: &CancellationToken) -> (u32, CancellationToken) {
        let mut state = lock(&self.state);
        state.current_iteration += 1;
        let scope = run.child_token();
        state.scope = Some(scope.clone());
        (state.current_iteration, scope)
    }

    fn limit_reached(&self) -> bool {
        let current = self.current_iteration();
        self.config.max_iterations.is_some_and(|max| current >= max)
    }

    async fn wait_while_paused(&self, run: &CancellationToken) -> bool {
        loop {
            let resumed = self.resume.notified();
            if run.is_cancelled() {
                return false;
            }
            if !self.is_paused() {
                return true;
            }
            tokio::select! {
                _ = resumed => {}
                _ = run.cancelled() => return false,
            }
        }
    }

    async fn run_iteration<Fut, T, E>(
        &self,
        work: Fut,
        run: &CancellationToken,
        scope: &CancellationToken,
    ) -> Step<T, E>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let limit = self.config.timeout_per_iteration;
        tokio::select! {
            biased;
            _ = run.cancelled() => Step::Stopped,
            // An iteration that bails out because stop() cancelled its scope
            // is not a failure.
            result = work => match result {
                Err(_) if run.is_cancelled() => Step::Stopped,
                result => Step::Finished(result),
            },
            _ = tokio::time::sleep(limit.unwrap_or_default()), if limit.is_some() => {
                scope.cancel();
                Step::TimedOut(limit.unwrap_or_default())
            }
        }
    }

    fn finish(&self, phase: LoopPhase) -> u32 {
        let mut state = lock(&self.state);
        state.phase = phase;
        state.paused = false;
        state.run = None;
        if let Some(scope) = state.scope.take() {
            scope.cancel();
        }
        state.current_iteration
    }
}

impl Default for LoopController {
    fn default() -> Self {
        Self::new(LoopConfig::default())
    }
}

/// Tears down an iteration's scope when the iteration ends.
struct ScopeGuard<'a> {
    controller: &'a LoopController,
    scope: CancellationToken,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.scope.cancel();
        lock(&self.controller.state).scope = None;
    }
}

/// Marks the run stopped if `execute` is dropped before it returns.
struct RunGuard<'a> {
    controller: &'a LoopController,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.controller.is_running() {
            self.controller.finish(LoopPhase::Stopped);
        }
    }
}
