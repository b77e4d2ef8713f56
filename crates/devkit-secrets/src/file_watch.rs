use std::ffi::OsString;
use std::path::Path;
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::file_store::FileStoreShared;

/// Keeps the filesystem watcher alive; dropping it stops notifications.
pub(crate) struct FileWatchHandle {
    _watcher: RecommendedWatcher,
}

/// Watches the store's parent directory. Atomic writes replace the file by
/// rename, so watching the file itself would lose track after the first write.
pub(crate) fn watch_store_file(shared: Arc<FileStoreShared>) -> Result<FileWatchHandle> {
    let path = shared.path().to_path_buf();
    let parent = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let file_name: OsString = path
        .file_name()
        .map(OsString::from)
        .with_context(|| format!("secret store path {} has no file name", path.display()))?;

    let weak: Weak<FileStoreShared> = Arc::downgrade(&shared);
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        let event = match result {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(%error, "secret store watcher reported an error");
                return;
            }
        };
        if !touches_store_file(&event, &file_name) {
            return;
        }
        let Some(shared) = weak.upgrade() else {
            return;
        };
        match shared.refresh_from_disk() {
            Ok(changed) if !changed.is_empty() => {
                tracing::debug!(
                    changed_keys = changed.len(),
                    "secret store changed outside this process"
                );
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(error = %format!("{error:#}"), "failed to reload secret store");
            }
        }
    })
    .context("failed to create secret store watcher")?;
    watcher
        .watch(&parent, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", parent.display()))?;

    tracing::debug!(secret_store = %path.display(), "watching secret store for external changes");
    Ok(FileWatchHandle { _watcher: watcher })
}

fn touches_store_file(event: &Event, file_name: &OsString) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|path| path.file_name() == Some(file_name.as_os_str()))
}
