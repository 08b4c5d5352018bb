//! # Opaque handle table
//!
//! Host objects that must not be copied across the boundary stay here; only
//! their [`HandleId`] crosses. The table holds one strong reference per
//! handle until it is released or the bridge is torn down.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use glueval::HandleId;

type Entry = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct HandleTable {
    entries: DashMap<HandleId, Entry>,
    next_id: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&self, object: T) -> HandleId {
        self.insert_arc(Arc::new(object))
    }

    pub fn insert_arc(&self, object: Entry) -> HandleId {
        let id = HandleId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.entries.insert(id, object);
        tracing::trace!(handle = %id, "handle issued");
        id
    }

    pub fn get(&self, id: HandleId) -> Option<Entry> {
        self.entries.get(&id).map(|e| e.value().clone())
    }

    /// Returns the object if it exists and has type `T`.
    pub fn downcast<T: Any + Send + Sync>(&self, id: HandleId) -> Option<Arc<T>> {
        self.get(id)?.downcast::<T>().ok()
    }

    /// Drops the table's reference. Returns false for an unknown handle.
    pub fn release(&self, id: HandleId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FileLike {
        path: String,
    }

    #[test]
    fn test_insert_downcast_release() {
        let table = HandleTable::new();
        let id = table.insert(FileLike { path: "/tmp/a".into() });

        let file = table.downcast::<FileLike>(id).unwrap();
        assert_eq!(file.path, "/tmp/a");
        assert!(table.downcast::<String>(id).is_none());

        assert!(table.release(id));
        assert!(!table.release(id));
        assert!(table.get(id).is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let table = HandleTable::new();
        let a = table.insert(1u32);
        let b = table.insert(1u32);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.clear(), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn test_release_keeps_outstanding_refs() {
        let table = HandleTable::new();
        let id = table.insert(String::from("kept"));
        let held = table.downcast::<String>(id).unwrap();
        table.release(id);
        assert_eq!(held.as_str(), "kept");
    }
}
