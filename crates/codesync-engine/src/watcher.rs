//! File watcher feeding the dirty queue during a live session

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::client::{relative_path, tracked_language};
use crate::dirty::DirtyQueue;
use crate::errors::{Result, SyncError};

pub struct ProjectWatcher {
    watcher: RecommendedWatcher,
    root: PathBuf,
}

impl ProjectWatcher {
    /// Create a watcher for `root`. Events arrive on the returned channel
    /// once [`ProjectWatcher::start`] was called.
    pub fn new(root: &Path) -> Result<(Self, mpsc::Receiver<Event>)> {
        let root = std::fs::canonicalize(root).map_err(|e| {
            SyncError::file_processing_error_with_source(root.display().to_string(), e)
        })?;

        let (tx, rx) = mpsc::channel(1024);
        let watcher = recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(e) = tx.blocking_send(event) {
                    error!("Failed to forward file event: {}", e);
                }
            }
            Err(e) => error!("File system watch error: {}", e),
        })
        .map_err(|e| SyncError::file_processing_error_with_source(root.display().to_string(), e))?;

        Ok((Self { watcher, root }, rx))
    }

    /// Canonical project root; event paths are relative to it
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn start(&mut self) -> Result<()> {
        self.watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| {
                SyncError::file_processing_error_with_source(self.root.display().to_string(), e)
            })?;
        info!("Watching {}", self.root.display());
        Ok(())
    }
}

/// Tracked paths an event touches
pub fn changed_paths(root: &Path, event: &Event) -> Vec<String> {
    if matches!(event.kind, EventKind::Access(_) | EventKind::Other) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter_map(|path| relative_path(root, path))
        .filter(|path| tracked_language(path).is_some())
        .collect()
}

/// Wait for the next burst of changes: the first relevant event, then
/// everything that follows until the channel stays quiet for `debounce`.
/// `None` once the channel is closed.
pub async fn next_burst(
    events: &mut mpsc::Receiver<Event>,
    root: &Path,
    debounce: Duration,
) -> Option<BTreeSet<String>> {
    let mut paths = BTreeSet::new();
    while paths.is_empty() {
        let event = events.recv().await?;
        paths.extend(changed_paths(root, &event));
    }
    loop {
        match tokio::time::timeout(debounce, events.recv()).await {
            Ok(Some(event)) => paths.extend(changed_paths(root, &event)),
            Ok(None) | Err(_) => {
                debug!(paths = paths.len(), "Change burst collected");
                return Some(paths);
            }
        }
    }
}

/// Record changed paths in the project's dirty queue; returns its new size
pub fn mark_dirty(project_root: &Path, paths: BTreeSet<String>) -> Result<usize> {
    let mut queue = DirtyQueue::load(project_root)?;
    queue.mark_many(paths)?;
    Ok(queue.len())
}

#[cfg(test)]
mod tests {
    use notify::event::{AccessKind, ModifyKind};
    use pretty_assertions::assert_eq;

    use super::*;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
    }

    #[test]
    fn test_changed_paths_filters_untracked() {
        let root = Path::new("/p");
        let fixture = event(
            EventKind::Modify(ModifyKind::Any),
            &["/p/src/lib.rs", "/p/.codesync/dirty.json", "/p/logo.png", "/q/other.rs"],
        );

        let actual = changed_paths(root, &fixture);

        assert_eq!(actual, vec!["src/lib.rs".to_string()]);
    }

    #[test]
    fn test_access_events_are_ignored() {
        let fixture = event(EventKind::Access(AccessKind::Any), &["/p/src/lib.rs"]);
        assert!(changed_paths(Path::new("/p"), &fixture).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_burst_collects_until_quiet() {
        let (tx, mut rx) = mpsc::channel(16);
        let root = Path::new("/p");
        tx.send(event(EventKind::Access(AccessKind::Any), &["/p/a.rs"])).await.unwrap();
        tx.send(event(EventKind::Modify(ModifyKind::Any), &["/p/b.rs"])).await.unwrap();
        tx.send(event(EventKind::Modify(ModifyKind::Any), &["/p/c.py", "/p/b.rs"])).await.unwrap();

        let actual = next_burst(&mut rx, root, Duration::from_millis(200)).await;
        let expected = BTreeSet::from(["b.rs".to_string(), "c.py".to_string()]);
        assert_eq!(actual, Some(expected));

        drop(tx);
        assert_eq!(next_burst(&mut rx, root, Duration::from_millis(200)).await, None);
    }

    #[test]
    fn test_mark_dirty_persists() {
        let dir = tempfile::tempdir().unwrap();

        let actual = mark_dirty(dir.path(), BTreeSet::from(["src/a.rs".to_string()])).unwrap();

        assert_eq!(actual, 1);
        assert!(DirtyQueue::load(dir.path()).unwrap().contains("src/a.rs"));
    }
}
