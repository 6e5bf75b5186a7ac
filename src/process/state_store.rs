//! PID and state records of tracked processes.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::models::process_state::{ProcessStateRecord, TerminationReason};
use crate::storage::{decode_pid, encode_pid, CoordinationStore, StoreArea};
use crate::Result;

/// Outcome of a conditional PID record removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidRemoval {
    /// The record named the expected PID and was deleted.
    Removed,
    /// No record existed.
    Absent,
    /// The record names a different, newer PID and was left in place.
    Superseded(u32),
}

/// Typed access to the `pids/` and `states/` areas of a coordination store.
///
/// State setters read the current record, apply one field change and write
/// the whole record back, so sibling fields set by other callers survive.
#[derive(Clone)]
pub struct ProcessStateStore {
    store: Arc<dyn CoordinationStore>,
}

impl ProcessStateStore {
    /// Wrap a coordination store.
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    // ── PID records ─────────────────────────────────────

    /// PID recorded for `code`.
    ///
    /// A malformed record is deleted and reported as absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the record cannot be read.
    pub fn pid(&self, code: &str) -> Result<Option<u32>> {
        let Some(raw) = self.store.read(StoreArea::Pids, code)? else {
            return Ok(None);
        };
        if let Some(pid) = decode_pid(&raw) {
            return Ok(Some(pid));
        }
        warn!(code, "discarding malformed pid record");
        self.store.delete(StoreArea::Pids, code)?;
        Ok(None)
    }

    /// Record `pid` as the running process for `code`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the record cannot be written.
    pub fn set_pid(&self, code: &str, pid: u32) -> Result<()> {
        self.store.write(StoreArea::Pids, code, &encode_pid(pid))
    }

    /// Delete the PID record only if it still names `pid`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the record cannot be read or removed.
    pub fn remove_pid_if(&self, code: &str, pid: u32) -> Result<PidRemoval> {
        loop {
            let Some(raw) = self.store.read(StoreArea::Pids, code)? else {
                return Ok(PidRemoval::Absent);
            };
            match decode_pid(&raw) {
                Some(current) if current != pid => return Ok(PidRemoval::Superseded(current)),
                Some(_) => {
                    if self.store.remove_if(StoreArea::Pids, code, &raw)? {
                        return Ok(PidRemoval::Removed);
                    }
                    // Rewritten since the read; look again.
                }
                None => {
                    warn!(code, "discarding malformed pid record");
                    self.store.remove_if(StoreArea::Pids, code, &raw)?;
                }
            }
        }
    }

    /// Codes with a PID record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the area cannot be listed.
    pub fn tracked_codes(&self) -> Result<Vec<String>> {
        self.store.list(StoreArea::Pids)
    }

    // ── State records ───────────────────────────────────

    /// Current state record for `code`.
    ///
    /// Missing, unreadable or malformed records yield defaults.
    #[must_use]
    pub fn record(&self, code: &str) -> ProcessStateRecord {
        match self.store.read(StoreArea::States, code) {
            Ok(Some(raw)) => serde_json::from_slice(&raw).unwrap_or_else(|err| {
                warn!(code, %err, "state record is malformed, using defaults");
                ProcessStateRecord::default()
            }),
            Ok(None) => ProcessStateRecord::default(),
            Err(err) => {
                warn!(code, %err, "state record is unreadable, using defaults");
                ProcessStateRecord::default()
            }
        }
    }

    /// Read-merge-write one change into the state record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the merged record cannot be written.
    pub fn update(
        &self,
        code: &str,
        change: impl FnOnce(&mut ProcessStateRecord),
    ) -> Result<ProcessStateRecord> {
        let mut record = self.record(code);
        change(&mut record);
        record.updated_at = Some(Utc::now());
        let raw = serde_json::to_vec(&record)?;
        self.store.write(StoreArea::States, code, &raw)?;
        debug!(
            code,
            reason = record.termination_reason.as_str(),
            "state record updated"
        );
        Ok(record)
    }

    /// Delete the whole state record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if an existing record cannot be removed.
    pub fn clear(&self, code: &str) -> Result<bool> {
        self.store.delete(StoreArea::States, code)
    }

    /// Recorded termination reason.
    #[must_use]
    pub fn termination_reason(&self, code: &str) -> TerminationReason {
        self.record(code).termination_reason
    }

    /// Set the termination reason, preserving other fields.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the record cannot be written.
    pub fn set_termination_reason(&self, code: &str, reason: TerminationReason) -> Result<()> {
        self.update(code, |record| record.termination_reason = reason)
            .map(|_| ())
    }

    /// Reset the termination reason to [`TerminationReason::None`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the record cannot be written.
    pub fn clear_termination_reason(&self, code: &str) -> Result<()> {
        self.set_termination_reason(code, TerminationReason::None)
    }

    /// Workspace hash of the process running under `code`.
    #[must_use]
    pub fn workspace_hash(&self, code: &str) -> Option<String> {
        self.record(code).workspace_hash
    }

    /// Associate `code` with a workspace hash, preserving other fields.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the record cannot be written.
    pub fn set_workspace_hash(&self, code: &str, hash: &str) -> Result<()> {
        self.update(code, |record| record.workspace_hash = Some(hash.to_owned()))
            .map(|_| ())
    }

    /// Drop the workspace association, preserving other fields.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the record cannot be written.
    pub fn clear_workspace_hash(&self, code: &str) -> Result<()> {
        self.update(code, |record| record.workspace_hash = None)
            .map(|_| ())
    }

    /// Extra environment variables stripped for `code`.
    #[must_use]
    pub fn additional_forbidden_vars(&self, code: &str) -> Vec<String> {
        self.record(code).additional_forbidden_vars
    }

    /// Replace the extra stripped variables, preserving other fields.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the record cannot be written.
    pub fn set_additional_forbidden_vars(&self, code: &str, vars: &[String]) -> Result<()> {
        self.update(code, |record| record.additional_forbidden_vars = vars.to_vec())
            .map(|_| ())
    }
}
