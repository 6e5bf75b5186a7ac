//! Process tracker: spawning, liveness, termination classification.
//!
//! Covers the child environment denylist, output sinks, PID/state
//! records and the [`ProcessTracker`] that ties them together.

pub mod env;
pub mod liveness;
pub mod output;
pub mod prelude;
pub mod state_store;
pub mod tracker;

pub use state_store::{PidRemoval, ProcessStateStore};
pub use tracker::{ExitOutcome, ProcessHandle, ProcessTracker, StopOutcome};
