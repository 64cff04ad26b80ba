//! Loop control: run a unit of work repeatedly with pause, resume, stop and
//! per-iteration timeouts.

mod controller;
mod state;

pub use controller::{
    CompletionHook, ErrorPolicy, IterationHook, LoopConfig, LoopController, LoopOptions,
};
pub use state::{IterationContext, LoopOutcome, LoopPhase, LoopStatus};
