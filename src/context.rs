//! Host context shared by the tracker, lock manager and reconciler.
//!
//! One context is built per host instance and handed to each component,
//! so nothing relies on process-wide globals and tests can run isolated
//! contexts side by side.

use std::sync::Arc;

use crate::alerts::{CrashNotifier, LogNotifier};
use crate::config::GlobalConfig;
use crate::lock::LockManager;
use crate::process::output::{LineProcessor, OutputSinks, Passthrough};
use crate::process::ProcessTracker;
use crate::reconcile::DebugRegistry;
use crate::storage::{CoordinationStore, FsStore};
use crate::workspace::WorkspaceIdentity;

/// Explicit context object for one host instance.
#[derive(Clone)]
pub struct HostContext {
    /// Validated configuration.
    pub config: Arc<GlobalConfig>,
    /// Coordination store shared with other instances.
    pub store: Arc<dyn CoordinationStore>,
    /// Output sinks owned by this instance.
    pub sinks: Arc<OutputSinks>,
    /// Workspace this instance serves.
    pub workspace: Arc<WorkspaceIdentity>,
    /// Crash notification collaborator.
    pub notifier: Arc<dyn CrashNotifier>,
    /// Output line processing collaborator.
    pub lines: Arc<dyn LineProcessor>,
    /// Debug sessions registered by the debugger collaborator.
    pub debug: DebugRegistry,
}

impl HostContext {
    /// Build a context backed by the filesystem store at the configured root.
    #[must_use]
    pub fn new(config: GlobalConfig) -> Self {
        let store: Arc<dyn CoordinationStore> = Arc::new(FsStore::new(config.storage_root()));
        let workspace = Arc::new(WorkspaceIdentity::new(&config.workspace_root));
        Self {
            config: Arc::new(config),
            store,
            sinks: Arc::new(OutputSinks::new()),
            workspace,
            notifier: Arc::new(LogNotifier),
            lines: Arc::new(Passthrough),
            debug: DebugRegistry::new(),
        }
    }

    /// Replace the coordination store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = store;
        self
    }

    /// Replace the crash notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn CrashNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the line processor.
    #[must_use]
    pub fn with_line_processor(mut self, lines: Arc<dyn LineProcessor>) -> Self {
        self.lines = lines;
        self
    }

    /// Process tracker bound to this context.
    #[must_use]
    pub fn tracker(&self) -> ProcessTracker {
        ProcessTracker::new(self.clone())
    }

    /// Lock manager using the configured timeouts.
    #[must_use]
    pub fn locks(&self) -> LockManager {
        LockManager::new(
            Arc::clone(&self.store),
            self.config.timeouts.lock(),
            self.config.timeouts.lock_retry(),
        )
    }
}
