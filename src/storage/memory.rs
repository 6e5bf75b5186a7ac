//! In-process coordination store.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{CoordinationStore, StoreArea};
use crate::{AppError, Result};

/// Mutex-guarded map implementing [`CoordinationStore`].
///
/// Only coordinates callers sharing the same instance, which is enough for
/// tests and single-host embeddings.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(StoreArea, String), Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_records<T>(
        &self,
        f: impl FnOnce(&mut HashMap<(StoreArea, String), Vec<u8>>) -> T,
    ) -> Result<T> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| AppError::Store("memory store mutex poisoned".into()))?;
        Ok(f(&mut guard))
    }
}

impl CoordinationStore for MemoryStore {
    fn create_exclusive(&self, area: StoreArea, key: &str, contents: &[u8]) -> Result<bool> {
        self.with_records(|records| {
            let slot = (area, key.to_owned());
            if records.contains_key(&slot) {
                false
            } else {
                records.insert(slot, contents.to_vec());
                true
            }
        })
    }

    fn read(&self, area: StoreArea, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_records(|records| records.get(&(area, key.to_owned())).cloned())
    }

    fn write(&self, area: StoreArea, key: &str, contents: &[u8]) -> Result<()> {
        self.with_records(|records| {
            records.insert((area, key.to_owned()), contents.to_vec());
        })
    }

    fn delete(&self, area: StoreArea, key: &str) -> Result<bool> {
        self.with_records(|records| records.remove(&(area, key.to_owned())).is_some())
    }

    fn remove_if(&self, area: StoreArea, key: &str, expected: &[u8]) -> Result<bool> {
        self.with_records(|records| {
            let slot = (area, key.to_owned());
            if records.get(&slot).is_some_and(|current| current.as_slice() == expected) {
                records.remove(&slot);
                true
            } else {
                false
            }
        })
    }

    fn list(&self, area: StoreArea) -> Result<Vec<String>> {
        self.with_records(|records| {
            let mut keys: Vec<String> = records
                .keys()
                .filter(|(a, _)| *a == area)
                .map(|(_, key)| key.clone())
                .collect();
            keys.sort();
            keys
        })
    }
}
