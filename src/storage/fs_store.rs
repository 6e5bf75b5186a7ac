//! Filesystem-backed coordination store.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{CoordinationStore, StoreArea};
use crate::{AppError, Result};

/// Age after which a reclaim guard is assumed to belong to a dead caller.
const ABANDONED_GUARD: Duration = Duration::from_secs(5);

/// Store rooted at a per-user directory with one subdirectory per area.
///
/// Every write goes through a temporary file in the target directory that
/// is then moved into place, so readers only ever see complete records.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Construct a store under `root`. Directories are created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a record, whether or not it exists.
    #[must_use]
    pub fn record_path(&self, area: StoreArea, key: &str) -> PathBuf {
        self.root.join(area.dir_name()).join(key)
    }

    fn area_dir(&self, area: StoreArea) -> Result<PathBuf> {
        let dir = self.root.join(area.dir_name());
        fs::create_dir_all(&dir).map_err(|err| {
            AppError::Store(format!("failed to create {}: {err}", dir.display()))
        })?;
        Ok(dir)
    }

    /// Create the reclaim guard, clearing one abandoned by a dead caller.
    fn take_guard(guard: &Path) -> Result<bool> {
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(guard) {
                Ok(_) => return Ok(true),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    let abandoned = fs::metadata(guard)
                        .and_then(|meta| meta.modified())
                        .ok()
                        .and_then(|modified| modified.elapsed().ok())
                        .is_some_and(|age| age >= ABANDONED_GUARD);
                    if !abandoned {
                        return Ok(false);
                    }
                    warn!(path = %guard.display(), "removing abandoned reclaim guard");
                    fs::remove_file(guard).ok();
                }
                Err(err) => {
                    return Err(AppError::Store(format!(
                        "failed to create {}: {err}",
                        guard.display()
                    )));
                }
            }
        }
        Ok(false)
    }

    fn staged(dir: &Path, contents: &[u8]) -> Result<NamedTempFile> {
        let mut staged = NamedTempFile::new_in(dir).map_err(|err| {
            AppError::Store(format!("failed to stage record in {}: {err}", dir.display()))
        })?;
        staged
            .write_all(contents)
            .and_then(|()| staged.flush())
            .map_err(|err| AppError::Store(format!("failed to write staged record: {err}")))?;
        Ok(staged)
    }
}

impl CoordinationStore for FsStore {
    fn create_exclusive(&self, area: StoreArea, key: &str, contents: &[u8]) -> Result<bool> {
        let dir = self.area_dir(area)?;
        let target = dir.join(key);
        let staged = Self::staged(&dir, contents)?;

        match staged.persist_noclobber(&target) {
            Ok(_) => Ok(true),
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(AppError::Store(format!(
                "failed to create {}: {}",
                target.display(),
                err.error
            ))),
        }
    }

    fn read(&self, area: StoreArea, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.record_path(area, key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(AppError::Store(format!(
                "failed to read {}: {err}",
                path.display()
            ))),
        }
    }

    fn write(&self, area: StoreArea, key: &str, contents: &[u8]) -> Result<()> {
        let dir = self.area_dir(area)?;
        let target = dir.join(key);
        let staged = Self::staged(&dir, contents)?;
        staged.persist(&target).map_err(|err| {
            AppError::Store(format!("failed to replace {}: {}", target.display(), err.error))
        })?;
        Ok(())
    }

    fn delete(&self, area: StoreArea, key: &str) -> Result<bool> {
        let path = self.record_path(area, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "record already gone");
                Ok(false)
            }
            Err(err) => Err(AppError::Store(format!(
                "failed to delete {}: {err}",
                path.display()
            ))),
        }
    }

    /// Compare and delete happen while holding `.<key>.reclaim`, created
    /// exclusively, so concurrent callers never remove a record replaced
    /// after their read. A caller that finds the guard taken gets `false`.
    fn remove_if(&self, area: StoreArea, key: &str, expected: &[u8]) -> Result<bool> {
        let dir = self.area_dir(area)?;
        let target = dir.join(key);
        let guard = dir.join(format!(".{key}.reclaim"));

        if !Self::take_guard(&guard)? {
            debug!(path = %target.display(), "record is being reclaimed elsewhere");
            return Ok(false);
        }

        let removed = match fs::read(&target) {
            Ok(contents) if contents == expected => fs::remove_file(&target).map(|()| true),
            Ok(_) => Ok(false),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        };
        if let Err(err) = fs::remove_file(&guard) {
            warn!(path = %guard.display(), %err, "failed to remove reclaim guard");
        }

        removed.map_err(|err| {
            AppError::Store(format!("failed to reclaim {}: {err}", target.display()))
        })
    }

    fn list(&self, area: StoreArea) -> Result<Vec<String>> {
        let dir = self.area_dir(area)?;
        let entries = fs::read_dir(&dir)
            .map_err(|err| AppError::Store(format!("failed to list {}: {err}", dir.display())))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| AppError::Store(err.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // Staged temporaries are dot-prefixed.
            if name.starts_with('.') {
                continue;
            }
            keys.push(name);
        }
        keys.sort();
        Ok(keys)
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.root)
    }
}
