//! Filesystem watcher
//!
//! Watches a set of files and invokes a callback with the changed path.
//! Each file's parent directory is watched non-recursively so editors that
//! replace a file through rename are still observed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Callback invoked with the path that changed
pub type WatchCallback = Arc<dyn Fn(&Path) + Send + Sync>;

/// Watches files and reports changes
pub struct FileWatcher {
    paths: Vec<PathBuf>,
    callback: WatchCallback,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FileWatcher {
    /// Create a watcher for `paths`; nothing is watched until [`start`](Self::start)
    pub fn new(paths: Vec<PathBuf>, callback: WatchCallback) -> Self {
        Self {
            paths,
            callback,
            watcher: Mutex::new(None),
        }
    }

    /// Watched paths
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Check if the watcher is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.watcher.lock().is_some()
    }

    /// Start watching. Calling it on a running watcher is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Watch` if the platform watcher cannot be
    /// created or a parent directory cannot be watched.
    pub fn start(&self) -> Result<(), ProviderError> {
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return Ok(());
        }

        let paths = self.paths.clone();
        let callback = Arc::clone(&self.callback);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        return;
                    }
                    for changed in &event.paths {
                        if let Some(target) = paths.iter().find(|p| is_same_file(p, changed)) {
                            callback(target.as_path());
                        }
                    }
                }
                Err(e) => warn!("File watcher error: {}", e),
            }
        })
        .map_err(|e| ProviderError::Watch(format!("failed to create watcher: {e}")))?;

        for path in &self.paths {
            let dir = watch_dir(path);
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|e| ProviderError::Watch(format!("failed to watch {}: {e}", dir.display())))?;
            debug!("Watching {:?} for changes to {:?}", dir, path);
        }

        *slot = Some(watcher);
        Ok(())
    }

    /// Stop watching
    pub fn close(&self) {
        if self.watcher.lock().take().is_some() {
            debug!("Stopped watching {:?}", self.paths);
        }
    }
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("paths", &self.paths)
            .field("running", &self.is_running())
            .finish()
    }
}

fn watch_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Events may report the path through a different spelling of the same
/// directory (symlinked temp dirs), so compare the file name and fall back
/// to canonical parents.
fn is_same_file(watched: &Path, changed: &Path) -> bool {
    if watched == changed {
        return true;
    }
    if watched.file_name() != changed.file_name() {
        return false;
    }
    match (
        watch_dir(watched).canonicalize(),
        watch_dir(changed).canonicalize(),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_is_same_file() {
        let dir = TempDir::new().unwrap();
        let watched = dir.path().join("sub.json");
        assert!(is_same_file(&watched, &watched));
        assert!(!is_same_file(&watched, &dir.path().join("other.json")));
    }

    #[test]
    fn test_start_fails_for_missing_directory() {
        let watcher = FileWatcher::new(
            vec![PathBuf::from("/nonexistent/selector-router/sub.json")],
            Arc::new(|_: &Path| {}),
        );
        assert!(matches!(watcher.start(), Err(ProviderError::Watch(_))));
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_reports_modified_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub.json");
        std::fs::write(&path, "[]").unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let watcher = FileWatcher::new(
            vec![path.clone()],
            Arc::new(move |changed: &Path| {
                let _ = tx.send(changed.to_path_buf());
            }),
        );
        watcher.start().unwrap();
        assert!(watcher.is_running());

        std::fs::write(dir.path().join("unrelated.json"), "{}").unwrap();
        std::fs::write(&path, "[{}]").unwrap();

        let changed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watch event")
            .unwrap();
        assert_eq!(changed, path);

        watcher.close();
        assert!(!watcher.is_running());
    }
}
