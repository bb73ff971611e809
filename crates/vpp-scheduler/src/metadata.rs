//! Descriptor-owned metadata index with an optional name→handle lookup.
//!
//! A descriptor that publishes runtime handles (e.g. the numeric interface
//! index returned by the dataplane) exposes a [`MetadataIndex`] through
//! `Descriptor::metadata_index`. The scheduler writes to it after every
//! successful Create/Update/Delete and after each resync retrieve, always from
//! its own serialized commit step. Other descriptors hold an `Arc` clone and
//! only read.
//!
//! Lookups never create entries: `lookup_by_name` returns `None` for unknown
//! names instead of a default.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use parking_lot::RwLock;

/// Extracts the numeric dataplane handle from a metadata value.
pub type HandleFn<M> = fn(&M) -> u32;

struct IndexInner<M> {
    by_name: BTreeMap<String, M>,
    by_handle: HashMap<u32, String>,
}

/// Read-concurrent map from item name (key label) to metadata.
pub struct MetadataIndex<M> {
    name: String,
    handle_of: Option<HandleFn<M>>,
    inner: RwLock<IndexInner<M>>,
}

impl<M: Clone> MetadataIndex<M> {
    /// Creates an index without a secondary handle lookup.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handle_of: None,
            inner: RwLock::new(IndexInner {
                by_name: BTreeMap::new(),
                by_handle: HashMap::new(),
            }),
        }
    }

    /// Creates an index that also maps numeric handles back to names.
    pub fn with_handles(name: impl Into<String>, handle_of: HandleFn<M>) -> Self {
        let mut index = Self::new(name);
        index.handle_of = Some(handle_of);
        index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_name.is_empty()
    }

    /// Returns the metadata stored under `name`.
    pub fn lookup_by_name(&self, name: &str) -> Option<M> {
        self.inner.read().by_name.get(name).cloned()
    }

    /// Returns the name and metadata owning `handle`.
    ///
    /// Always `None` for indexes created without a handle extractor.
    pub fn lookup_by_handle(&self, handle: u32) -> Option<(String, M)> {
        let inner = self.inner.read();
        let name = inner.by_handle.get(&handle)?;
        let metadata = inner.by_name.get(name)?;
        Some((name.clone(), metadata.clone()))
    }

    /// Returns all names in sorted order.
    pub fn list_names(&self) -> Vec<String> {
        self.inner.read().by_name.keys().cloned().collect()
    }

    /// Stores metadata under `name`, replacing the previous entry.
    ///
    /// Called by the scheduler; descriptors never write their own index.
    pub fn put(&self, name: impl Into<String>, metadata: M) {
        let name = name.into();
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if let Some(handle_of) = self.handle_of {
            if let Some(old) = inner.by_name.get(&name) {
                let old_handle = handle_of(old);
                inner.by_handle.remove(&old_handle);
            }
            inner.by_handle.insert(handle_of(&metadata), name.clone());
        }
        inner.by_name.insert(name, metadata);
    }

    /// Removes the entry for `name`.
    pub fn remove(&self, name: &str) -> Option<M> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let removed = inner.by_name.remove(name)?;
        if let Some(handle_of) = self.handle_of {
            let handle = handle_of(&removed);
            if inner.by_handle.get(&handle).map(String::as_str) == Some(name) {
                inner.by_handle.remove(&handle);
            }
        }
        Some(removed)
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_name.clear();
        inner.by_handle.clear();
    }
}

impl<M> fmt::Debug for MetadataIndex<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("MetadataIndex")
            .field("name", &self.name)
            .field("entries", &inner.by_name.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct IfMeta {
        sw_if_index: u32,
    }

    fn if_index() -> MetadataIndex<IfMeta> {
        MetadataIndex::with_handles("interfaces", |m| m.sw_if_index)
    }

    #[test]
    fn test_lookup_never_creates() {
        let index = if_index();
        assert!(index.lookup_by_name("missing").is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_put_and_lookup_both_ways() {
        let index = if_index();
        index.put("if1", IfMeta { sw_if_index: 1 });
        index.put("if2", IfMeta { sw_if_index: 2 });

        assert_eq!(index.lookup_by_name("if2"), Some(IfMeta { sw_if_index: 2 }));
        assert_eq!(
            index.lookup_by_handle(1),
            Some(("if1".to_string(), IfMeta { sw_if_index: 1 }))
        );
        assert_eq!(index.list_names(), vec!["if1", "if2"]);
    }

    #[test]
    fn test_replace_moves_handle() {
        let index = if_index();
        index.put("if1", IfMeta { sw_if_index: 1 });
        index.put("if1", IfMeta { sw_if_index: 5 });

        assert!(index.lookup_by_handle(1).is_none());
        assert_eq!(index.lookup_by_handle(5).map(|(n, _)| n), Some("if1".to_string()));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remove() {
        let index = if_index();
        index.put("if1", IfMeta { sw_if_index: 1 });
        assert_eq!(index.remove("if1"), Some(IfMeta { sw_if_index: 1 }));
        assert!(index.remove("if1").is_none());
        assert!(index.lookup_by_handle(1).is_none());
    }

    #[test]
    fn test_concurrent_readers() {
        let index = Arc::new(if_index());
        index.put("if1", IfMeta { sw_if_index: 1 });

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let index = index.clone();
                std::thread::spawn(move || index.lookup_by_name("if1"))
            })
            .collect();
        for reader in readers {
            assert_eq!(reader.join().unwrap(), Some(IfMeta { sw_if_index: 1 }));
        }
    }

    #[test]
    fn test_index_without_handles() {
        let index: MetadataIndex<u32> = MetadataIndex::new("plain");
        index.put("a", 7);
        assert!(index.lookup_by_handle(7).is_none());
        assert_eq!(index.lookup_by_name("a"), Some(7));
    }
}
