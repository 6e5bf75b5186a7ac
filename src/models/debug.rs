//! Debug session handles registered by the debugger collaborator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of a debugger session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DebugSessionId(pub Uuid);

impl DebugSessionId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for DebugSessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A live debugger session attached to a tracked command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DebugSession {
    /// Session identifier used to unregister.
    pub id: DebugSessionId,
    /// Debug adapter type (e.g. `rdbg`).
    pub adapter_type: String,
    /// Human-readable session name, display only.
    pub name: String,
}

impl DebugSession {
    /// Construct a session with a generated identifier.
    #[must_use]
    pub fn new(adapter_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: DebugSessionId::new_v4(),
            adapter_type: adapter_type.into(),
            name: name.into(),
        }
    }
}
