//! Desired (northbound) state with derived values expanded.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::warn;

use crate::descriptor::KvDescriptor;
use crate::kv::{AnyValue, Dependency, Key, KeyValuePair};
use crate::registry::Registry;

/// Derivation deeper than this is treated as a derivation loop.
const MAX_DERIVATION_DEPTH: usize = 8;

#[derive(Clone)]
pub(crate) struct DesiredEntry {
    pub value: AnyValue,
    /// Declaration order, kept across value changes.
    pub seq: u64,
    pub parent: Option<Key>,
    pub derived: Vec<Key>,
    /// `None` for properties.
    pub descriptor: Option<Arc<dyn KvDescriptor>>,
    pub dependencies: Vec<Dependency>,
}

impl DesiredEntry {
    /// Keys that must be available first, including the parent of a derived value.
    pub fn prerequisites(&self) -> impl Iterator<Item = &Key> {
        self.parent
            .iter()
            .chain(self.dependencies.iter().map(|d| &d.key))
    }
}

#[derive(Clone, Default)]
pub(crate) struct DesiredState {
    entries: BTreeMap<Key, DesiredEntry>,
    next_seq: u64,
}

impl DesiredState {
    pub fn get(&self, key: &str) -> Option<&DesiredEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &DesiredEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Top-level (non-derived) desired pairs.
    pub fn top_level(&self) -> Vec<KeyValuePair> {
        self.entries
            .iter()
            .filter(|(_, e)| e.parent.is_none())
            .map(|(k, e)| KeyValuePair {
                key: k.clone(),
                value: e.value.clone(),
            })
            .collect()
    }

    /// Desired entries claimed by `descriptor`.
    pub fn entries_of<'a>(
        &'a self,
        descriptor: &'a str,
    ) -> impl Iterator<Item = (&'a Key, &'a DesiredEntry)> + 'a {
        self.entries
            .iter()
            .filter(move |(_, e)| e.descriptor.as_ref().map(|d| d.name()) == Some(descriptor))
    }

    /// Sets a top-level value; returns every key whose desired value changed,
    /// appeared or disappeared (derived values included).
    pub fn put(&mut self, registry: &Registry, key: Key, value: AnyValue) -> BTreeSet<Key> {
        let mut changed = BTreeSet::new();
        if let Some(existing) = self.entries.get(&key) {
            if let Some(parent) = &existing.parent {
                warn!(key = %key, parent = %parent, "northbound value overrides a derived value");
                self.remove(&key, &mut changed);
            }
        }
        self.insert(registry, key, value, None, 0, &mut changed);
        changed
    }

    /// Removes a top-level value with everything derived from it.
    pub fn delete(&mut self, key: &str) -> BTreeSet<Key> {
        let mut changed = BTreeSet::new();
        self.remove(key, &mut changed);
        changed
    }

    /// Replaces the whole desired state, keeping declaration order of keys
    /// that survive.
    pub fn replace(&mut self, registry: &Registry, values: Vec<KeyValuePair>) {
        let previous = std::mem::take(&mut self.entries);
        for kv in values {
            let mut changed = BTreeSet::new();
            self.insert(registry, kv.key, kv.value, None, 0, &mut changed);
        }
        for (key, entry) in self.entries.iter_mut() {
            if let Some(old) = previous.get(key) {
                entry.seq = old.seq;
            }
        }
    }

    fn insert(
        &mut self,
        registry: &Registry,
        key: Key,
        value: AnyValue,
        parent: Option<Key>,
        depth: usize,
        changed: &mut BTreeSet<Key>,
    ) {
        if depth > MAX_DERIVATION_DEPTH {
            warn!(key = %key, "derivation too deep, derived value ignored");
            return;
        }

        let descriptor = registry.for_key(&key).cloned();
        let (dependencies, derived) = match &descriptor {
            Some(d) => (d.dependencies(&key, &value), d.derived_values(&key, &value)),
            None => (Vec::new(), Vec::new()),
        };

        let derived: Vec<KeyValuePair> = derived
            .into_iter()
            .filter(|kv| match self.entries.get(&kv.key) {
                Some(existing) if kv.key == key || existing.parent.as_ref() != Some(&key) => {
                    warn!(key = %kv.key, parent = %key, "derived key collides with another value, ignored");
                    false
                }
                _ => true,
            })
            .collect();

        let old = self.entries.remove(&key);
        let seq = match &old {
            Some(old) => old.seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        let derived_keys: Vec<Key> = derived.iter().map(|kv| kv.key.clone()).collect();
        if let Some(old) = old {
            for stale in old.derived.iter().filter(|k| !derived_keys.contains(k)) {
                self.remove(stale, changed);
            }
        }

        changed.insert(key.clone());
        self.entries.insert(
            key.clone(),
            DesiredEntry {
                value,
                seq,
                parent,
                derived: derived_keys,
                descriptor,
                dependencies,
            },
        );

        for kv in derived {
            self.insert(registry, kv.key, kv.value, Some(key.clone()), depth + 1, changed);
        }
    }

    fn remove(&mut self, key: &str, changed: &mut BTreeSet<Key>) {
        if let Some(entry) = self.entries.remove(key) {
            changed.insert(key.to_string());
            for derived in &entry.derived {
                self.remove(derived, changed);
            }
        }
    }
}
