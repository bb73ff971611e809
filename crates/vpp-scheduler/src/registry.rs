//! Descriptor catalog.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::descriptor::{Descriptor, DescriptorAdapter, KvDescriptor};
use crate::error::{PlanError, SchedulerError, SchedulerResult};

/// Registered descriptors, indexed by name, key prefix and value type.
///
/// Exactly one descriptor claims any key: registration is rejected when the
/// new key prefix is a prefix of an existing one or vice versa.
#[derive(Default)]
pub struct Registry {
    descriptors: Vec<Arc<dyn KvDescriptor>>,
    by_name: HashMap<String, usize>,
    by_value_type: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor.
    pub fn register<D: Descriptor>(&mut self, descriptor: D) -> SchedulerResult<()> {
        let adapter: Arc<dyn KvDescriptor> = Arc::new(DescriptorAdapter::new(descriptor));
        self.register_erased(adapter)
    }

    fn register_erased(&mut self, descriptor: Arc<dyn KvDescriptor>) -> SchedulerResult<()> {
        let name = descriptor.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(SchedulerError::DuplicateDescriptor { name });
        }

        let prefix = descriptor.key_prefix();
        if let Some(other) = self
            .descriptors
            .iter()
            .find(|d| d.key_prefix().starts_with(prefix) || prefix.starts_with(d.key_prefix()))
        {
            return Err(SchedulerError::OverlappingKeySelector {
                name,
                prefix: prefix.to_string(),
                other: other.name().to_string(),
            });
        }

        debug!(descriptor = %name, prefix = %prefix, "registering descriptor");
        let position = self.descriptors.len();
        self.by_value_type
            .insert(descriptor.value_type_name().to_string(), position);
        self.by_name.insert(name, position);
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptor names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.descriptors
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn KvDescriptor>> {
        self.by_name.get(name).map(|&i| &self.descriptors[i])
    }

    pub fn by_value_type(&self, value_type: &str) -> Option<&Arc<dyn KvDescriptor>> {
        self.by_value_type
            .get(value_type)
            .map(|&i| &self.descriptors[i])
    }

    /// Returns the descriptor whose key selector claims `key`.
    pub fn for_key(&self, key: &str) -> Option<&Arc<dyn KvDescriptor>> {
        let mut claims = self.descriptors.iter().filter(|d| d.is_key_valid(key));
        let first = claims.next()?;
        if let Some(second) = claims.next() {
            warn!(
                key,
                first = first.name(),
                second = second.name(),
                "key claimed by more than one descriptor"
            );
        }
        Some(first)
    }

    /// Groups descriptors so that each group only retrieves after the groups
    /// holding its retrieve dependencies.
    pub(crate) fn retrieve_order(&self) -> Result<Vec<Vec<Arc<dyn KvDescriptor>>>, PlanError> {
        let mut remaining: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for (i, descriptor) in self.descriptors.iter().enumerate() {
            let mut deps = BTreeSet::new();
            for dep in descriptor.retrieve_dependencies() {
                match self.by_name.get(&dep) {
                    Some(&j) if j != i => {
                        deps.insert(j);
                    }
                    Some(_) => {}
                    None => warn!(
                        descriptor = descriptor.name(),
                        dependency = %dep,
                        "unknown retrieve dependency ignored"
                    ),
                }
            }
            remaining.insert(i, deps);
        }

        let mut groups = Vec::new();
        while !remaining.is_empty() {
            let ready: Vec<usize> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(&i, _)| i)
                .collect();
            if ready.is_empty() {
                return Err(PlanError::RetrieveCycle {
                    descriptors: remaining
                        .keys()
                        .map(|&i| self.descriptors[i].name().to_string())
                        .collect(),
                });
            }
            for i in &ready {
                remaining.remove(i);
            }
            for deps in remaining.values_mut() {
                for i in &ready {
                    deps.remove(i);
                }
            }
            groups.push(
                ready
                    .into_iter()
                    .map(|i| self.descriptors[i].clone())
                    .collect(),
            );
        }
        Ok(groups)
    }
}
