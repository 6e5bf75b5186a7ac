//! In-memory registry of debugger sessions attached to commands.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::models::debug::{DebugSession, DebugSessionId};

/// Code → debug session map fed by the debugger collaborator.
///
/// Cloning shares the underlying map. Nothing is persisted: debugger
/// sessions never outlive the host that started them.
#[derive(Debug, Clone, Default)]
pub struct DebugRegistry {
    sessions: Arc<Mutex<HashMap<String, DebugSession>>>,
}

impl DebugRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `session` to `code`, returning any session it replaces.
    #[must_use]
    pub fn register(&self, code: &str, session: DebugSession) -> Option<DebugSession> {
        self.lock().insert(code.to_owned(), session)
    }

    /// Detach the session with `id`, returning the code it was attached to.
    #[must_use]
    pub fn unregister(&self, id: DebugSessionId) -> Option<String> {
        let mut sessions = self.lock();
        let code = sessions
            .iter()
            .find(|(_, session)| session.id == id)
            .map(|(code, _)| code.clone())?;
        sessions.remove(&code);
        Some(code)
    }

    /// Session attached to `code`.
    #[must_use]
    pub fn session(&self, code: &str) -> Option<DebugSession> {
        self.lock().get(code).cloned()
    }

    /// Whether `code` has a session of the expected adapter type.
    #[must_use]
    pub fn is_debug_active(&self, code: &str, adapter_type: &str) -> bool {
        self.lock()
            .get(code)
            .is_some_and(|session| session.adapter_type == adapter_type)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DebugSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
