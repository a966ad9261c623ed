//! JSON file selection store
//!
//! The whole map of group → selected tag is kept in memory and written back
//! on every change. Writes go to a sibling temp file which is then renamed
//! over the target, so a crash never leaves a truncated cache behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::SelectionStore;
use crate::error::StoreError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    selected: BTreeMap<String, String>,
}

/// Selection store backed by a JSON file
pub struct FileSelectionStore {
    path: PathBuf,
    cache: Mutex<CacheFile>,
}

impl FileSelectionStore {
    /// Open the store at `path`
    ///
    /// A missing file starts an empty store. An unreadable or corrupt file
    /// is logged and also starts empty; it is overwritten on the next write.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the parent directory cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let cache = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<CacheFile>(&content) {
                Ok(cache) => {
                    info!(
                        "Loaded {} persisted selections from {:?}",
                        cache.selected.len(),
                        path
                    );
                    cache
                }
                Err(e) => {
                    warn!("Ignoring corrupt selection cache {:?}: {}", path, e);
                    CacheFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Selection cache {:?} does not exist yet", path);
                CacheFile::default()
            }
            Err(e) => {
                warn!("Failed to read selection cache {:?}: {}", path, e);
                CacheFile::default()
            }
        };

        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, cache: &CacheFile) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(cache)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
        file.write_all(&content)
            .and_then(|()| file.sync_all())
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::io(&self.path, e))
    }
}

impl SelectionStore for FileSelectionStore {
    fn load_selected(&self, group: &str) -> Option<String> {
        self.cache.lock().selected.get(group).cloned()
    }

    fn store_selected(&self, group: &str, selected: &str) -> Result<(), StoreError> {
        let mut cache = self.cache.lock();
        if cache.selected.get(group).map(String::as_str) == Some(selected) {
            return Ok(());
        }
        cache
            .selected
            .insert(group.to_string(), selected.to_string());
        self.write(&cache)
    }
}

impl std::fmt::Debug for FileSelectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSelectionStore")
            .field("path", &self.path)
            .field("groups", &self.cache.lock().selected.len())
            .finish()
    }
}
