//! Loop phases, status snapshots and per-iteration context.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Lifecycle phase of a [`LoopController`](super::LoopController).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// Never run, or reset
    #[default]
    Idle,
    /// Iterating
    Running,
    /// Running, but the next iteration is held back
    Paused,
    /// Reached `max_iterations`
    Completed,
    /// Ended by `stop()`
    Stopped,
    /// Ended because the error policy declined to continue
    Aborted,
    /// Ended with an error propagated from `execute()`
    Failed,
}

impl LoopPhase {
    /// Whether a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, LoopPhase::Running | LoopPhase::Paused)
    }
}

/// Point-in-time view of a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopStatus {
    /// Current phase
    pub phase: LoopPhase,
    /// A run is in progress
    pub running: bool,
    /// The next iteration is held back
    pub paused: bool,
    /// Iterations started in the current (or last) run
    pub current_iteration: u32,
    /// Iteration cap, `None` when unbounded
    pub max_iterations: Option<u32>,
    /// Percent of `max_iterations` started, `0.0` when unbounded
    pub progress: f64,
}

/// How a run that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopOutcome {
    /// Terminal phase: completed, stopped or aborted
    pub phase: LoopPhase,
    /// Iterations started
    pub iterations: u32,
}

/// Handed to the unit of work on every iteration.
///
/// `cancel` is fresh for each iteration. It fires when the iteration times
/// out or the loop is stopped, and is torn down once the iteration returns.
#[derive(Debug, Clone)]
pub struct IterationContext {
    /// 1-based iteration number
    pub iteration: u32,
    /// Subject the loop runs for
    pub subject_id: Option<String>,
    /// Cancellation scope of this iteration
    pub cancel: CancellationToken,
}

impl IterationContext {
    /// Whether this iteration has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once this iteration is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}
