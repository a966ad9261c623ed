//! In-memory selection store

use dashmap::DashMap;

use super::SelectionStore;
use crate::error::StoreError;

/// Selection store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemorySelectionStore {
    selections: DashMap<String, String>,
}

impl MemorySelectionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of groups with a persisted selection
    #[must_use]
    pub fn len(&self) -> usize {
        self.selections.len()
    }

    /// Check if nothing has been persisted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }
}

impl SelectionStore for MemorySelectionStore {
    fn load_selected(&self, group: &str) -> Option<String> {
        self.selections.get(group).map(|r| r.value().clone())
    }

    fn store_selected(&self, group: &str, selected: &str) -> Result<(), StoreError> {
        self.selections
            .insert(group.to_string(), selected.to_string());
        Ok(())
    }
}
