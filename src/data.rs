//! Per-shadow private data owned by filters.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::{FilterId, InterceptError, Result};

/// Filter-private value stored on a shadow object.
pub type PrivateData = Arc<dyn Any + Send + Sync>;

/// Mapping from owning filter to its private data on one shadow object.
///
/// Each filter owns at most one entry per shadow. Entries go away when the
/// owning filter detaches or when the shadow itself is torn down.
#[derive(Default)]
pub struct DataStore {
    entries: Vec<(FilterId, PrivateData)>,
}

impl DataStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `data` for `owner`.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::DataExists`] if `owner` already attached data here
    pub fn attach(&mut self, owner: FilterId, data: PrivateData) -> Result<()> {
        if self.entries.iter().any(|(id, _)| *id == owner) {
            return Err(InterceptError::DataExists { filter: owner });
        }
        self.entries.push((owner, data));
        Ok(())
    }

    /// Data attached by `owner`.
    pub fn lookup(&self, owner: FilterId) -> Option<PrivateData> {
        self.entries
            .iter()
            .find(|(id, _)| *id == owner)
            .map(|(_, data)| data.clone())
    }

    /// Data attached by `owner`, downcast to `T`.
    pub fn lookup_as<T: Any + Send + Sync>(&self, owner: FilterId) -> Option<Arc<T>> {
        self.lookup(owner).and_then(|data| data.downcast::<T>().ok())
    }

    /// Remove and return the data attached by `owner`.
    pub fn detach(&mut self, owner: FilterId) -> Option<PrivateData> {
        let pos = self.entries.iter().position(|(id, _)| *id == owner)?;
        Some(self.entries.remove(pos).1)
    }

    /// Remove every entry. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no filter attached data.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Owners with attached data, in attach order.
    pub fn owners(&self) -> Vec<FilterId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }
}

impl fmt::Debug for DataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStore")
            .field("owners", &self.owners())
            .finish()
    }
}
