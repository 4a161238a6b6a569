//! Watched-directory observer using the `notify` crate.
//!
//! Provides:
//! - `start_watcher()` -- debounced watcher over every watched directory
//! - `WatcherHandle` -- RAII handle that keeps the watcher alive
//! - `filter_events()` -- keeps new direct entries of watched directories
//! - `forward_events()` -- hands each new entry to `Controller::notify`

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ccp_core::controller::Controller;
use ccp_core::repository::Store;
use ccp_types::workflow::WatchedDirectory;
// notify types come through notify-debouncer-mini so both agree on the
// notify version.
use notify_debouncer_mini::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebounceEventResult, DebouncedEvent, Debouncer, new_debouncer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Debounce window applied to filesystem events.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FileWatchError {
    #[error("watcher creation failed: {0}")]
    WatcherCreation(String),

    #[error("failed to watch path '{path}': {reason}")]
    WatchPath { path: String, reason: String },
}

// ---------------------------------------------------------------------------
// WatchTarget
// ---------------------------------------------------------------------------

/// An absolute directory being watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub path: PathBuf,
    /// Ignore entries that are not directories.
    pub only_dirs: bool,
}

impl WatchTarget {
    pub fn resolve(root: &Path, wd: &WatchedDirectory) -> Self {
        Self {
            path: root.join(wd.path.trim_matches('/')),
            only_dirs: wd.only_dirs,
        }
    }
}

// ---------------------------------------------------------------------------
// WatcherHandle
// ---------------------------------------------------------------------------

/// RAII handle that keeps the watcher alive. Dropping it stops the watch.
pub struct WatcherHandle {
    _debouncer: Debouncer<RecommendedWatcher>,
    targets: Arc<Vec<WatchTarget>>,
}

impl WatcherHandle {
    pub fn targets(&self) -> &[WatchTarget] {
        &self.targets
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        tracing::debug!(count = self.targets.len(), "watched-directory observer dropped");
    }
}

// ---------------------------------------------------------------------------
// Event filtering
// ---------------------------------------------------------------------------

/// Keep events for entries that exist directly inside one of `targets`.
///
/// Entries removed before the debounce window closed are dropped, as are
/// files under directories that only accept directories.
pub fn filter_events(events: &[DebouncedEvent], targets: &[WatchTarget]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for event in events {
        let Some(parent) = event.path.parent() else {
            continue;
        };
        let Some(target) = targets.iter().find(|t| t.path == parent) else {
            continue;
        };
        let Ok(metadata) = std::fs::metadata(&event.path) else {
            continue;
        };
        if target.only_dirs && !metadata.is_dir() {
            tracing::debug!(path = %event.path.display(), "ignoring file in directory-only watched directory");
            continue;
        }
        if !paths.contains(&event.path) {
            paths.push(event.path.clone());
        }
    }
    paths
}

// ---------------------------------------------------------------------------
// Watcher lifecycle
// ---------------------------------------------------------------------------

/// Start a debounced watcher over `<root>/<wd.path>` for every watched
/// directory, creating missing directories first.
///
/// Returns the handle (keep it alive to maintain the watch) and a receiver
/// of new entry batches.
pub fn start_watcher(
    root: &Path,
    watched: &[WatchedDirectory],
    debounce: Duration,
) -> Result<(WatcherHandle, mpsc::Receiver<Vec<PathBuf>>), FileWatchError> {
    let targets: Arc<Vec<WatchTarget>> =
        Arc::new(watched.iter().map(|wd| WatchTarget::resolve(root, wd)).collect());
    let (tx, rx) = mpsc::channel::<Vec<PathBuf>>(64);

    let filter_targets = Arc::clone(&targets);
    let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| match result {
        Ok(events) => {
            let paths = filter_events(&events, &filter_targets);
            if paths.is_empty() {
                return;
            }
            tracing::debug!(count = paths.len(), "watched-directory entries detected");
            if tx.try_send(paths).is_err() {
                tracing::warn!("watched-directory channel full or closed, events dropped");
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "file watcher error");
        }
    })
    .map_err(|e| FileWatchError::WatcherCreation(e.to_string()))?;

    for target in targets.iter() {
        std::fs::create_dir_all(&target.path).map_err(|e| FileWatchError::WatchPath {
            path: target.path.display().to_string(),
            reason: e.to_string(),
        })?;
        debouncer
            .watcher()
            .watch(&target.path, RecursiveMode::NonRecursive)
            .map_err(|e| FileWatchError::WatchPath {
                path: target.path.display().to_string(),
                reason: e.to_string(),
            })?;
    }

    tracing::info!(root = %root.display(), count = targets.len(), "watched-directory observer started");

    let handle = WatcherHandle {
        _debouncer: debouncer,
        targets,
    };
    Ok((handle, rx))
}

/// Forward new entries to the controller until the channel closes.
///
/// An entry is forwarded once while it exists; a path that disappears and
/// comes back is forwarded again.
pub fn forward_events<S: Store + 'static>(
    mut rx: mpsc::Receiver<Vec<PathBuf>>,
    controller: Controller<S>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut seen: HashSet<PathBuf> = HashSet::new();
        while let Some(paths) = rx.recv().await {
            seen.retain(|p| p.exists());
            for path in paths {
                if !seen.insert(path.clone()) {
                    continue;
                }
                if let Err(e) = controller.notify(&path).await {
                    tracing::warn!(path = %path.display(), error = %e, "watched-directory event rejected");
                }
            }
        }
        tracing::debug!("watched-directory forwarder stopped");
    })
}
