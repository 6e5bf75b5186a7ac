//! Durable coordination storage shared by every host instance on the machine.
//!
//! All cross-process state lives behind [`CoordinationStore`]: a small
//! key-value contract whose concurrency-safe primitives are
//! [`create_exclusive`](CoordinationStore::create_exclusive) and
//! [`remove_if`](CoordinationStore::remove_if). The
//! filesystem backend ([`FsStore`]) lays records out as
//!
//! ```text
//! <root>/pids/<code>     decimal PID of the tracked process
//! <root>/states/<code>   JSON process state record
//! <root>/locks/<code>    decimal PID of the lock holder
//! ```
//!
//! [`MemoryStore`] implements the same contract in-process.

pub mod fs_store;
pub mod memory;

pub use fs_store::FsStore;
pub use memory::MemoryStore;

use std::path::Path;

use crate::Result;

/// Record namespace within a coordination store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreArea {
    /// PID records of tracked processes.
    Pids,
    /// JSON state records.
    States,
    /// Lock records.
    Locks,
}

impl StoreArea {
    /// Directory name used by file-backed stores.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Pids => "pids",
            Self::States => "states",
            Self::Locks => "locks",
        }
    }
}

/// Key-value store with compare-and-swap by exclusive creation.
///
/// Implementations must make `create_exclusive` and `remove_if` atomic
/// with respect to every other process using the same store, and must
/// never expose a
/// partially written record to `read`.
pub trait CoordinationStore: Send + Sync {
    /// Create `key` holding `contents` only if it does not exist yet.
    ///
    /// Returns `Ok(false)` when the key is already present.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on any other storage failure.
    fn create_exclusive(&self, area: StoreArea, key: &str, contents: &[u8]) -> Result<bool>;

    /// Read a record, `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the record exists but cannot be read.
    fn read(&self, area: StoreArea, key: &str) -> Result<Option<Vec<u8>>>;

    /// Create or replace a record atomically.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the record cannot be written.
    fn write(&self, area: StoreArea, key: &str, contents: &[u8]) -> Result<()>;

    /// Delete a record. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if an existing record cannot be removed.
    fn delete(&self, area: StoreArea, key: &str) -> Result<bool>;

    /// Delete `key` only if it still holds exactly `expected`.
    ///
    /// The check and the removal are one step: a record written by someone
    /// else after `expected` was read is never removed. Returns whether the
    /// record was removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on storage failures.
    fn remove_if(&self, area: StoreArea, key: &str, expected: &[u8]) -> Result<bool>;

    /// Keys currently present in `area`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the area cannot be enumerated.
    fn list(&self, area: StoreArea) -> Result<Vec<String>>;

    /// Filesystem location backing the store, if any.
    fn location(&self) -> Option<&Path> {
        None
    }
}

/// Encode a PID the way pid and lock records store it.
#[must_use]
pub fn encode_pid(pid: u32) -> Vec<u8> {
    pid.to_string().into_bytes()
}

/// Decode a PID record; `None` for empty or malformed contents.
#[must_use]
pub fn decode_pid(raw: &[u8]) -> Option<u32> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.trim().parse::<u32>().ok())
        .filter(|pid| *pid > 0)
}
