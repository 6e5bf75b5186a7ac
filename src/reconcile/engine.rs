//! Periodic reconciliation of per-code state across host instances.
//!
//! Other instances change PID, state and lock records without telling
//! anyone, so each tick re-reads them for every configured code, diffs
//! the result against the previous tick and emits one [`StateChanged`]
//! covering every code that moved. Observers therefore see another
//! instance's changes within one poll interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use notify::RecommendedWatcher;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use super::registry::DebugRegistry;
use super::watcher;
use crate::context::HostContext;
use crate::lock::LockManager;
use crate::models::command_state::CommandState;
use crate::models::debug::{DebugSession, DebugSessionId};
use crate::models::process_state::TerminationReason;
use crate::process::output::OutputSinks;
use crate::process::ProcessTracker;
use crate::workspace::WorkspaceIdentity;

/// Capacity of the change notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Consolidated notification that one or more codes changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChanged {
    /// Codes whose observable state differs from the previous tick.
    pub codes: Vec<String>,
}

struct Inner {
    tracker: ProcessTracker,
    locks: LockManager,
    sinks: Arc<OutputSinks>,
    debug: DebugRegistry,
    workspace: Arc<WorkspaceIdentity>,
    adapter_type: String,
    codes: Vec<String>,
    states: RwLock<HashMap<String, CommandState>>,
    changes: broadcast::Sender<StateChanged>,
    disposed: AtomicBool,
}

impl Inner {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn tick(&self) -> Option<StateChanged> {
        if self.is_disposed() {
            return None;
        }

        let observed: Vec<CommandState> = self.codes.iter().map(|code| self.observe(code)).collect();

        let mut changed = Vec::new();
        {
            let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
            for state in observed {
                if states
                    .get(&state.code)
                    .is_none_or(|previous| state.differs_from(previous))
                {
                    changed.push(state.code.clone());
                }
                states.insert(state.code.clone(), state);
            }
        }

        if changed.is_empty() || self.is_disposed() {
            return None;
        }

        debug!(codes = ?changed, "reconciled state changed");
        let event = StateChanged { codes: changed };
        // Nobody listening is fine; queries still see the new snapshot.
        let _ = self.changes.send(event.clone());
        Some(event)
    }

    fn observe(&self, code: &str) -> CommandState {
        let alive = self.tracker.is_alive(code).unwrap_or_else(|err| {
            warn!(code, %err, "liveness check failed");
            false
        });
        let record = self.tracker.state().record(code);
        let has_output = self.sinks.contains(code);
        let locked = self.locks.is_locked(code).unwrap_or_else(|err| {
            warn!(code, %err, "lock check failed");
            false
        });

        let recorded_reason = record.termination_reason;
        // A crash indicator with no output to show is not surfaced.
        let termination_reason = if recorded_reason == TerminationReason::Crashed && !has_output {
            TerminationReason::None
        } else {
            recorded_reason
        };

        let owned_by_workspace = self.workspace.owns(record.workspace_hash.as_deref());
        CommandState {
            code: code.to_owned(),
            alive,
            termination_reason,
            recorded_reason,
            has_output,
            locked,
            workspace_hash: record.workspace_hash,
            owned_by_workspace,
            debug_active: self.debug.is_debug_active(code, &self.adapter_type),
        }
    }
}

/// Polling reconciliation engine for a fixed set of codes.
///
/// A UI refresh builds a new engine and disposes the old one. Dropping an
/// engine disposes it.
pub struct Reconciler {
    inner: Arc<Inner>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl Reconciler {
    /// Build an engine without starting its timer.
    ///
    /// Call [`refresh`](Self::refresh) to reconcile manually.
    #[must_use]
    pub fn new(ctx: &HostContext, codes: Vec<String>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let inner = Inner {
            tracker: ctx.tracker(),
            locks: ctx.locks(),
            sinks: Arc::clone(&ctx.sinks),
            debug: ctx.debug.clone(),
            workspace: Arc::clone(&ctx.workspace),
            adapter_type: ctx.config.debug_adapter_type.clone(),
            codes,
            states: RwLock::new(HashMap::new()),
            changes,
            disposed: AtomicBool::new(false),
        };
        Self {
            inner: Arc::new(inner),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            watcher: Mutex::new(None),
        }
    }

    /// Build an engine and start ticking every configured poll interval.
    ///
    /// The first tick runs immediately. When `watch_state_dir` is set,
    /// storage changes trigger extra ticks between timer ticks.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(ctx: &HostContext, codes: Vec<String>) -> Self {
        let engine = Self::new(ctx, codes);
        let wake = Arc::new(Notify::new());

        if ctx.config.watch_state_dir {
            if let Some(root) = ctx.store.location() {
                match watcher::watch_store(root, Arc::clone(&wake)) {
                    Ok(handle) => *lock(&engine.watcher) = Some(handle),
                    Err(err) => warn!(%err, "storage watcher unavailable, polling only"),
                }
            }
        }

        let task = tokio::spawn(
            run_timer(
                Arc::clone(&engine.inner),
                ctx.config.timeouts.poll_interval(),
                wake,
                engine.cancel.clone(),
            )
            .instrument(info_span!("reconciler")),
        );
        *lock(&engine.task) = Some(task);
        engine
    }

    /// Reconcile now, returning the change notification if one fired.
    #[allow(clippy::must_use_candidate)] // Subscribers already got the notification.
    pub fn refresh(&self) -> Option<StateChanged> {
        self.inner.tick()
    }

    /// Latest observed state of `code`.
    #[must_use]
    pub fn state(&self, code: &str) -> Option<CommandState> {
        self.inner
            .states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(code)
            .cloned()
    }

    /// Latest observed state of every code, in configuration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CommandState> {
        let states = self.inner.states.read().unwrap_or_else(PoisonError::into_inner);
        self.inner
            .codes
            .iter()
            .filter_map(|code| states.get(code).cloned())
            .collect()
    }

    /// Subscribe to consolidated change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateChanged> {
        self.inner.changes.subscribe()
    }

    /// Attach a debugger session to `code`.
    pub fn register_debug_session(&self, code: &str, session: DebugSession) {
        let id = session.id;
        if let Some(previous) = self.inner.debug.register(code, session) {
            debug!(code, %id, replaced = %previous.id, "debug session replaced");
        } else {
            debug!(code, %id, "debug session attached");
        }
    }

    /// Detach a debugger session.
    pub fn unregister_debug_session(&self, id: DebugSessionId) {
        match self.inner.debug.unregister(id) {
            Some(code) => debug!(code, %id, "debug session detached"),
            None => debug!(%id, "unknown debug session"),
        }
    }

    /// Whether [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Stop the timer and storage watcher. Safe to call repeatedly.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        lock(&self.watcher).take();
        debug!("reconciler disposed");
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run_timer(
    inner: Arc<Inner>,
    period: Duration,
    wake: Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
            () = wake.notified() => debug!("storage changed, reconciling early"),
        }
        inner.tick();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
