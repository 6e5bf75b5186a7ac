//! Durable per-code process state record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a tracked process is no longer running.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Running, never started, or freshly respawned.
    #[default]
    None,
    /// Someone called `stop` before the process died.
    UserRequested,
    /// The process died without a preceding `stop`.
    Crashed,
}

impl TerminationReason {
    /// Stable lowercase label used in logs and CLI output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::UserRequested => "user_requested",
            Self::Crashed => "crashed",
        }
    }
}

/// Per-code metadata that outlives individual process runs.
///
/// Setters in the tracker always read, merge and write back this whole
/// record so unrelated fields survive.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ProcessStateRecord {
    /// Classification of the most recent termination.
    pub termination_reason: TerminationReason,
    /// Hash of the workspace that owns the running process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_hash: Option<String>,
    /// Environment variables stripped from the child on top of the denylist.
    pub additional_forbidden_vars: Vec<String>,
    /// Last write time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProcessStateRecord {
    /// Whether every field holds its default value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.termination_reason == TerminationReason::None
            && self.workspace_hash.is_none()
            && self.additional_forbidden_vars.is_empty()
    }
}
