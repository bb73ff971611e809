//! Refreshes the graph from descriptor dumps before a resync plan.
//!
//! Descriptors are retrieved group by group (see `Registry::retrieve_order`).
//! Descriptors of one group are dumped concurrently, and the metadata they
//! return reaches the indexes before the next group starts so that later
//! dumps can translate handles into names.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::{CachedDumpPolicy, ExternalItemPolicy, SchedulerConfig};
use crate::descriptor::{AnyItem, KvDescriptor};
use crate::desired::DesiredState;
use crate::error::{DescriptorError, PlanError};
use crate::graph::{Graph, Node, NodeState};
use crate::kv::{Key, Origin, RetrieveSource, RetrievedItem};
use crate::registry::Registry;

pub(crate) struct Refresh<'a> {
    pub graph: &'a mut Graph,
    pub desired: &'a DesiredState,
    pub registry: &'a Registry,
    pub config: &'a SchedulerConfig,
}

impl Refresh<'_> {
    /// Dumps every retrievable descriptor and merges the result into the
    /// graph. Returns the descriptors whose retrieve failed; their part of
    /// the graph is left as it was.
    pub async fn run(&mut self) -> Result<Vec<(String, DescriptorError)>, PlanError> {
        let mut errors = Vec::new();

        for group in self.registry.retrieve_order()? {
            let mut batch: Vec<(Arc<dyn KvDescriptor>, Vec<AnyItem>)> = Vec::new();
            for descriptor in group {
                match descriptor.retrieve_source() {
                    RetrieveSource::Unsupported => continue,
                    RetrieveSource::Cache if self.config.cached_dumps == CachedDumpPolicy::Reapply => {
                        debug!(descriptor = descriptor.name(), "cache-backed dump ignored, re-applying");
                        self.forget(descriptor.as_ref());
                        continue;
                    }
                    RetrieveSource::Cache => {
                        warn!(
                            descriptor = descriptor.name(),
                            "dump comes from the agent cache and may not reflect the dataplane"
                        );
                    }
                    RetrieveSource::Live => {}
                }
                let correlate = self.correlate(descriptor.name());
                batch.push((descriptor, correlate));
            }

            let results = join_all(
                batch
                    .iter()
                    .map(|(descriptor, correlate)| descriptor.retrieve(correlate.clone())),
            )
            .await;

            for ((descriptor, _), result) in batch.iter().zip(results) {
                match result {
                    Ok(items) => {
                        debug!(descriptor = descriptor.name(), items = items.len(), "retrieved");
                        self.merge(descriptor.as_ref(), items);
                    }
                    Err(err) => {
                        warn!(descriptor = descriptor.name(), error = %err, "retrieve failed, keeping last known state");
                        errors.push((descriptor.name().to_string(), err));
                    }
                }
            }
        }

        info!(nodes = self.graph.nodes().count(), failed = errors.len(), "dataplane state refreshed");
        Ok(errors)
    }

    fn correlate(&self, descriptor: &str) -> Vec<AnyItem> {
        self.desired
            .entries_of(descriptor)
            .map(|(key, entry)| RetrievedItem {
                key: key.clone(),
                value: entry.value.clone(),
                metadata: self.graph.get(key).and_then(|n| n.metadata.clone()),
                origin: Origin::FromNb,
            })
            .collect()
    }

    /// Drops what the graph believes about a descriptor's items.
    fn forget(&mut self, descriptor: &dyn KvDescriptor) {
        for key in self.graph.keys_of(descriptor.name()) {
            self.clear(descriptor, &key);
        }
    }

    fn clear(&mut self, descriptor: &dyn KvDescriptor, key: &str) {
        if let Some(node) = self.graph.get_mut(key) {
            if node.value.take().is_some() {
                descriptor.index_remove(key);
            }
            node.metadata = None;
            if node.state != NodeState::Failed {
                node.state = NodeState::Pending;
            }
        }
    }

    fn merge(&mut self, descriptor: &dyn KvDescriptor, items: Vec<AnyItem>) {
        let dumped: BTreeSet<Key> = items.iter().map(|i| i.key.clone()).collect();
        for key in self.graph.keys_of(descriptor.name()) {
            if !dumped.contains(&key) {
                self.clear(descriptor, &key);
            }
        }

        for item in items {
            if !descriptor.is_key_valid(&item.key) {
                warn!(descriptor = descriptor.name(), key = %item.key, "retrieved key outside descriptor selector, ignored");
                continue;
            }
            if let Some(metadata) = &item.metadata {
                descriptor.index_put(&item.key, metadata);
            }

            let dependencies = descriptor.dependencies(&item.key, &item.value);
            let derived = descriptor.derived_values(&item.key, &item.value);
            let (origin, state, adopted) = self.provenance(&item.key, item.origin);
            let parent = self.desired.get(&item.key).and_then(|e| e.parent.clone());

            let mut node = self
                .graph
                .remove(&item.key)
                .unwrap_or_else(|| Node::new(&item.key, origin, state, self.seq_of(&item.key)));
            node.value = Some(item.value);
            node.metadata = item.metadata;
            node.origin = origin;
            node.adopted = adopted;
            node.state = state;
            node.descriptor = Some(descriptor.name().to_string());
            node.dependencies = dependencies;
            node.derived_from = parent;
            node.last_error = None;
            self.graph.insert(node);

            for kv in derived {
                if self.registry.for_key(&kv.key).is_some() {
                    continue;
                }
                let (origin, state, adopted) = self.provenance(&kv.key, item.origin);
                let mut property = Node::new(&kv.key, origin, state, self.seq_of(&kv.key));
                property.adopted = adopted;
                property.value = Some(kv.value);
                property.derived_from = Some(item.key.clone());
                self.graph.insert(property);
            }
        }
    }

    /// Origin, state and adoption flag of a dumped item.
    fn provenance(&self, key: &str, reported: Origin) -> (Origin, NodeState, bool) {
        if self.desired.contains(key) || reported == Origin::FromNb {
            (Origin::FromNb, NodeState::Configured, false)
        } else if self.config.external_items == ExternalItemPolicy::Adopt {
            debug!(key, "external item adopted");
            (Origin::FromNb, NodeState::Configured, true)
        } else {
            (Origin::FromSb, NodeState::Discovered, false)
        }
    }

    fn seq_of(&self, key: &str) -> u64 {
        self.desired.get(key).map_or(u64::MAX, |e| e.seq)
    }
}
