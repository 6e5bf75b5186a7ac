//! Composite per-code state observed by the reconciler.

use serde::Serialize;

use super::process_state::TerminationReason;

/// One code's observed state as of the latest reconciliation tick.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CommandState {
    /// Command code.
    pub code: String,
    /// A live process is recorded for the code.
    pub alive: bool,
    /// Observed termination reason after normalization.
    pub termination_reason: TerminationReason,
    /// Reason as stored in the state record, before normalization.
    pub recorded_reason: TerminationReason,
    /// This instance holds an output sink for the code.
    pub has_output: bool,
    /// Some instance holds the code's lock.
    pub locked: bool,
    /// Workspace hash of the running process, if any.
    pub workspace_hash: Option<String>,
    /// The running process belongs to this instance's workspace.
    pub owned_by_workspace: bool,
    /// A matching debug session is registered for the code.
    pub debug_active: bool,
}

impl CommandState {
    /// Whether the fields observers redraw on differ from `previous`.
    #[must_use]
    pub fn differs_from(&self, previous: &Self) -> bool {
        self.alive != previous.alive
            || self.debug_active != previous.debug_active
            || self.termination_reason != previous.termination_reason
            || self.locked != previous.locked
    }
}
