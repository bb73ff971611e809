//! Tracks items parked on missing dependencies.
//!
//! Every parked key records the dependency keys it waits for, and a reverse
//! index maps a dependency key to its waiters. When a later transaction
//! touches a dependency, its waiters join that transaction's affected set
//! instead of the whole graph being replanned.

use std::collections::{BTreeSet, HashMap};

use crate::kv::Key;

#[derive(Debug, Default)]
pub(crate) struct PendingCache {
    /// Parked key -> keys it waits for.
    entries: HashMap<Key, BTreeSet<Key>>,
    /// Dependency key -> parked keys waiting on it.
    waiters: HashMap<Key, BTreeSet<Key>>,
}

impl PendingCache {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Parks `key` on `missing`, replacing any previous constraints.
    pub fn park(&mut self, key: &str, missing: impl IntoIterator<Item = Key>) {
        self.release(key);
        let missing: BTreeSet<Key> = missing.into_iter().collect();
        for dep in &missing {
            self.waiters
                .entry(dep.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.entries.insert(key.to_string(), missing);
    }

    /// Drops all constraints of `key`.
    pub fn release(&mut self, key: &str) {
        if let Some(missing) = self.entries.remove(key) {
            for dep in missing {
                if let Some(waiting) = self.waiters.get_mut(&dep) {
                    waiting.remove(key);
                    if waiting.is_empty() {
                        self.waiters.remove(&dep);
                    }
                }
            }
        }
    }

    /// Keys waiting on `dependency`.
    pub fn waiters_of(&self, dependency: &str) -> Vec<Key> {
        self.waiters
            .get(dependency)
            .map(|w| w.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Dependencies `key` waits for.
    pub fn missing(&self, key: &str) -> Vec<Key> {
        self.entries
            .get(key)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<Key> {
        self.entries.keys().cloned().collect()
    }
}
