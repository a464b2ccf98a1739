//! Polling file watcher.
//!
//! Walks the workspace on an interval, diffs modification times against the
//! previous walk, and pushes created/changed/deleted events into a
//! [`FileEventSink`]. The walk honours `.gitignore` through `ignore`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use ignore::WalkBuilder;
use lunalint_lsp::{Disposable, FileChangeKind, FileEvent, FileEventSink, WatchScope, disposable_fn};
use tokio::time::MissedTickBehavior;

/// Modification times of every in-scope file under a root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSnapshot {
    files: HashMap<PathBuf, SystemTime>,
}

impl FileSnapshot {
    /// Walk `root` and keep the files accepted by `filter`.
    pub fn scan(root: &Path, filter: impl Fn(&Path) -> bool) -> Self {
        let mut files = HashMap::new();
        let walker = WalkBuilder::new(root).hidden(false).build();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::trace!("Skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) || !filter(entry.path()) {
                continue;
            }
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.insert(entry.into_path(), modified);
        }
        Self { files }
    }

    #[must_use]
    pub fn paths(&self) -> Vec<&Path> {
        let mut paths: Vec<&Path> = self.files.keys().map(PathBuf::as_path).collect();
        paths.sort();
        paths
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Events that turn `previous` into `self`, sorted by path.
    #[must_use]
    pub fn changes_since(&self, previous: &Self) -> Vec<FileEvent> {
        let mut events: Vec<FileEvent> = self
            .files
            .iter()
            .filter_map(|(path, modified)| match previous.files.get(path) {
                None => Some(FileEvent::new(path.clone(), FileChangeKind::Created)),
                Some(before) if before != modified => {
                    Some(FileEvent::new(path.clone(), FileChangeKind::Changed))
                }
                Some(_) => None,
            })
            .chain(
                previous
                    .files
                    .keys()
                    .filter(|path| !self.files.contains_key(*path))
                    .map(|path| FileEvent::new(path.clone(), FileChangeKind::Deleted)),
            )
            .collect();
        events.sort_by(|a, b| a.path.cmp(&b.path));
        events
    }
}

async fn scan_scope(root: PathBuf, scope: WatchScope) -> FileSnapshot {
    let scanned =
        tokio::task::spawn_blocking(move || FileSnapshot::scan(&root, |p| scope.is_match(p)))
            .await;
    scanned.unwrap_or_else(|e| {
        tracing::warn!("Workspace scan failed: {e}");
        FileSnapshot::default()
    })
}

/// Start polling `root` for `sink`. Disposing the result stops the task.
///
/// The task also ends on its own once the sink's session is gone.
pub fn spawn(root: PathBuf, sink: FileEventSink, interval: Duration) -> Box<dyn Disposable> {
    let handle = tokio::spawn(async move {
        let scope = sink.scope().clone();
        let mut known = scan_scope(root.clone(), scope.clone()).await;
        tracing::debug!(
            root = %root.display(),
            patterns = ?scope.patterns(),
            files = known.len(),
            "File watcher started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if sink.is_closed() {
                break;
            }
            let current = scan_scope(root.clone(), scope.clone()).await;
            let events = current.changes_since(&known);
            known = current;
            if events.is_empty() {
                continue;
            }
            tracing::trace!(count = events.len(), "Forwarding file events");
            if sink.send(events).is_err() {
                break;
            }
        }
        tracing::debug!(root = %root.display(), "File watcher stopped");
    });
    disposable_fn(move || handle.abort())
}
