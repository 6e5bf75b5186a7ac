//! Optional early-tick trigger driven by storage directory events.

use std::path::Path;
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::{AppError, Result};

fn is_record_change(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Watch `root` recursively and wake the reconciler on record changes.
///
/// Bursts of events collapse into one pending wake-up. Dropping the returned
/// watcher stops watching.
///
/// # Errors
///
/// Returns `AppError::Io` if `root` cannot be created and
/// `AppError::Store` if the OS watch cannot be established.
pub fn watch_store(root: &Path, wake: Arc<Notify>) -> Result<RecommendedWatcher> {
    std::fs::create_dir_all(root)?;

    let mut watcher = notify::recommended_watcher(
        move |result: std::result::Result<Event, notify::Error>| match result {
            Ok(event) if is_record_change(&event) => wake.notify_one(),
            Ok(_) => {}
            Err(err) => warn!(%err, "storage watch error"),
        },
    )
    .map_err(|err| AppError::Store(format!("failed to create storage watcher: {err}")))?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|err| AppError::Store(format!("failed to watch {}: {err}", root.display())))?;

    debug!(root = %root.display(), "watching storage for changes");
    Ok(watcher)
}
