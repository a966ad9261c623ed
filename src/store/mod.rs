//! Persisted group selections
//!
//! A [`SelectionStore`] remembers which member each selector group had
//! active so the choice survives restarts. Two implementations ship with
//! the crate:
//!
//! - [`MemorySelectionStore`]: process-local, for tests and embedding
//! - [`FileSelectionStore`]: a JSON file rewritten atomically on each change

mod file;
mod memory;

pub use file::FileSelectionStore;
pub use memory::MemorySelectionStore;

use crate::error::StoreError;

/// Storage for the active member of each selector group
pub trait SelectionStore: Send + Sync {
    /// Get the persisted selection for a group
    fn load_selected(&self, group: &str) -> Option<String>;

    /// Persist the selection for a group
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the selection could not be written.
    fn store_selected(&self, group: &str, selected: &str) -> Result<(), StoreError>;
}
