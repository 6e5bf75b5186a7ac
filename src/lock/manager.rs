//! Named, timeout-bounded mutual exclusion across host instances.
//!
//! Exclusive creation of `locks/<code>` is the compare-and-swap primitive.
//! A lock record names its holder's PID; a record whose holder is no
//! longer alive is stale and is reclaimed by whoever next runs into it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

use crate::config::validate_code;
use crate::process::liveness;
use crate::storage::{decode_pid, encode_pid, CoordinationStore, StoreArea};
use crate::{AppError, Result};

/// Observed state of a lock record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockHolder {
    /// No lock record exists.
    Vacant,
    /// A live process holds the lock.
    Live(u32),
    /// The record was stale and has been deleted.
    Reclaimed,
}

/// Lock manager acting on behalf of the current process.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn CoordinationStore>,
    owner_pid: u32,
    timeout: Duration,
    retry_interval: Duration,
}

impl LockManager {
    /// Manager whose `with_lock` uses `timeout` and `retry_interval`.
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>, timeout: Duration, retry_interval: Duration) -> Self {
        Self {
            store,
            owner_pid: liveness::current_pid(),
            timeout,
            retry_interval,
        }
    }

    /// PID written into lock records created by this manager.
    #[must_use]
    pub fn owner_pid(&self) -> u32 {
        self.owner_pid
    }

    /// Acquire the lock for `code`.
    ///
    /// A stale record is deleted and creation retried immediately; a live
    /// holder makes the caller sleep `retry_interval` between attempts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LockTimeout` once more than `timeout` has elapsed
    /// without acquiring, and `AppError::Store` on storage failures.
    pub async fn acquire(&self, code: &str, timeout: Duration, retry_interval: Duration) -> Result<()> {
        validate_code(code)?;
        self.acquire_inner(code, timeout, retry_interval)
            .instrument(info_span!("acquire_lock", code))
            .await
    }

    async fn acquire_inner(&self, code: &str, timeout: Duration, retry_interval: Duration) -> Result<()> {
        let started = Instant::now();
        let record = encode_pid(self.owner_pid);

        loop {
            if self.store.create_exclusive(StoreArea::Locks, code, &record)? {
                debug!(waited = ?started.elapsed(), "lock acquired");
                return Ok(());
            }

            let holder = match self.holder_state(code)? {
                LockHolder::Live(pid) => pid,
                LockHolder::Vacant | LockHolder::Reclaimed => continue,
            };

            if started.elapsed() >= timeout {
                return Err(AppError::LockTimeout(format!(
                    "{code} still held by pid {holder} after {timeout:?}"
                )));
            }
            tokio::time::sleep(retry_interval).await;
        }
    }

    /// Release the lock for `code` if this process holds it.
    ///
    /// Returns whether a record was deleted. A lock held by another process
    /// is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the record cannot be read or deleted.
    pub fn release(&self, code: &str) -> Result<bool> {
        let Some(raw) = self.store.read(StoreArea::Locks, code)? else {
            return Ok(false);
        };
        match decode_pid(&raw) {
            Some(pid) if pid == self.owner_pid => {
                self.store.delete(StoreArea::Locks, code)?;
                debug!(code, "lock released");
                Ok(true)
            }
            holder => {
                warn!(code, ?holder, "refusing to release a lock held by another process");
                Ok(false)
            }
        }
    }

    /// Whether a live process holds the lock for `code`.
    ///
    /// A stale record is deleted as a side effect.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on storage failures.
    pub fn is_locked(&self, code: &str) -> Result<bool> {
        Ok(matches!(self.holder_state(code)?, LockHolder::Live(_)))
    }

    /// PID of the live holder of `code`'s lock.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on storage failures.
    pub fn holder(&self, code: &str) -> Result<Option<u32>> {
        Ok(match self.holder_state(code)? {
            LockHolder::Live(pid) => Some(pid),
            LockHolder::Vacant | LockHolder::Reclaimed => None,
        })
    }

    /// Inspect the lock record, reclaiming it when stale.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on storage failures.
    pub fn holder_state(&self, code: &str) -> Result<LockHolder> {
        let Some(raw) = self.store.read(StoreArea::Locks, code)? else {
            return Ok(LockHolder::Vacant);
        };
        let holder = decode_pid(&raw);
        if let Some(pid) = holder {
            if liveness::probe(pid) {
                return Ok(LockHolder::Live(pid));
            }
        }

        // A fresh holder may have replaced the record since it was read.
        if self.store.remove_if(StoreArea::Locks, code, &raw)? {
            debug!(code, ?holder, "reclaimed stale lock");
        }
        Ok(LockHolder::Reclaimed)
    }

    /// Run `body` while holding the lock for `code`.
    ///
    /// The lock is released on every exit path, including errors, panics
    /// and the returned future being dropped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LockTimeout` if the lock cannot be acquired, or
    /// whatever error `body` returns.
    pub async fn with_lock<T, F, Fut>(&self, code: &str, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.with_lock_notify(code, || {}, body).await
    }

    /// Like [`with_lock`](Self::with_lock), calling `on_acquired` as soon as
    /// the lock is held and before `body` starts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LockTimeout` if the lock cannot be acquired, or
    /// whatever error `body` returns.
    pub async fn with_lock_notify<T, A, F, Fut>(&self, code: &str, on_acquired: A, body: F) -> Result<T>
    where
        A: FnOnce(),
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire(code, self.timeout, self.retry_interval).await?;
        let _guard = ReleaseOnDrop {
            manager: self,
            code,
        };
        on_acquired();
        body().await
    }
}

struct ReleaseOnDrop<'a> {
    manager: &'a LockManager,
    code: &'a str,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.manager.release(self.code) {
            warn!(code = self.code, %err, "failed to release lock");
        }
    }
}
