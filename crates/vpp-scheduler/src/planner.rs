//! Transaction planning.
//!
//! The planner works on the subgraph affected by a transaction: the touched
//! keys, everything depending on them and every pending item waiting for one
//! of them. It detects dependency cycles, parks items whose dependencies are
//! unavailable, classifies the rest into create/update/recreate/delete steps
//! and orders them. Deletes come out dependents-first, applies
//! dependencies-first, ties broken by declaration order.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::descriptor::KvDescriptor;
use crate::desired::DesiredState;
use crate::error::PlanError;
use crate::graph::Graph;
use crate::kv::{AnyMetadata, AnyValue, Dependency, Key, Origin};
use crate::pending::PendingCache;
use crate::registry::Registry;

/// Keys a transaction starts from.
#[derive(Debug, Clone)]
pub(crate) enum Scope {
    Keys(BTreeSet<Key>),
    /// Every desired key and every graph node (resync).
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeleteReason {
    /// No longer desired.
    Removed,
    /// Value changed in a way the descriptor cannot update in place.
    Recreate,
    /// A dependency is being re-created.
    Cascade,
    /// Still desired, but a dependency is going away.
    Unconfigure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepKind {
    Create,
    Update,
    Delete(DeleteReason),
    /// Derived value without a descriptor: no dataplane call.
    Property,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Create => write!(f, "create"),
            StepKind::Update => write!(f, "update"),
            StepKind::Delete(DeleteReason::Removed) => write!(f, "delete"),
            StepKind::Delete(DeleteReason::Recreate) => write!(f, "delete (recreate)"),
            StepKind::Delete(DeleteReason::Cascade) => write!(f, "delete (cascade)"),
            StepKind::Delete(DeleteReason::Unconfigure) => write!(f, "delete (unconfigure)"),
            StepKind::Property => write!(f, "property"),
        }
    }
}

/// One planned operation.
#[derive(Debug, Clone)]
pub(crate) struct Step {
    pub key: Key,
    pub kind: StepKind,
    pub descriptor: Option<Arc<dyn KvDescriptor>>,
    /// New value for applies, current value for deletes.
    pub value: AnyValue,
    /// Current value for updates.
    pub old_value: Option<AnyValue>,
    pub metadata: Option<AnyMetadata>,
    pub seq: u64,
    pub parent: Option<Key>,
    pub dependencies: Vec<Dependency>,
    /// Keys of the same phase that must complete first.
    pub after: Vec<Key>,
}

impl Step {
    pub fn descriptor_name(&self) -> Option<&str> {
        self.descriptor.as_ref().map(|d| d.name())
    }
}

/// A desired item that cannot be applied yet.
#[derive(Debug, Clone)]
pub(crate) struct PendingItem {
    pub key: Key,
    pub missing: Vec<Key>,
    pub descriptor: Option<String>,
    pub seq: u64,
    pub parent: Option<Key>,
    pub dependencies: Vec<Dependency>,
}

/// A desired item already matching the dataplane.
#[derive(Debug, Clone)]
pub(crate) struct Retained {
    pub key: Key,
    pub descriptor: Option<String>,
    pub parent: Option<Key>,
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Default)]
pub(crate) struct Plan {
    pub deletes: Vec<Step>,
    pub applies: Vec<Step>,
    pub pending: Vec<PendingItem>,
    pub retained: Vec<Retained>,
    /// Nodes to forget without a dataplane call.
    pub dropped: Vec<Key>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.applies.is_empty() && self.pending.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Pending { unconfigure: bool },
    Unchanged,
    Create,
    Update,
    Recreate(DeleteReason),
    Property,
    Remove,
    Drop,
}

pub(crate) struct Planner<'a> {
    pub graph: &'a Graph,
    pub desired: &'a DesiredState,
    pub registry: &'a Registry,
    pub pending: &'a PendingCache,
}

impl Planner<'_> {
    pub fn plan(&self, scope: Scope) -> Result<Plan, PlanError> {
        let affected = self.affected(scope);
        let order = self.apply_order(&affected)?;
        let missing = self.unsatisfied(&affected, &order);
        let mut classes = self.classify(&affected, &order, &missing);
        self.cascade(&mut classes);
        let plan = self.build(&classes, &order, &missing);
        debug!(
            affected = affected.len(),
            deletes = plan.deletes.len(),
            applies = plan.applies.len(),
            pending = plan.pending.len(),
            "transaction planned"
        );
        Ok(plan)
    }

    fn affected(&self, scope: Scope) -> BTreeSet<Key> {
        let seeds = match scope {
            Scope::All => {
                return self
                    .desired
                    .keys()
                    .chain(self.graph.keys())
                    .cloned()
                    .collect()
            }
            Scope::Keys(keys) => keys,
        };

        let mut desired_dependents: HashMap<&str, Vec<&Key>> = HashMap::new();
        for (key, entry) in self.desired.iter() {
            for prerequisite in entry.prerequisites() {
                desired_dependents
                    .entry(prerequisite.as_str())
                    .or_default()
                    .push(key);
            }
        }

        let mut affected = BTreeSet::new();
        let mut queue: VecDeque<Key> = seeds.into_iter().collect();
        while let Some(key) = queue.pop_front() {
            if affected.contains(&key) {
                continue;
            }
            queue.extend(self.pending.waiters_of(&key));
            queue.extend(self.graph.dependents_of(&key));
            if let Some(dependents) = desired_dependents.get(key.as_str()) {
                queue.extend(dependents.iter().map(|k| (*k).clone()));
            }
            if let Some(entry) = self.desired.get(&key) {
                queue.extend(entry.derived.iter().cloned());
            }
            affected.insert(key);
        }
        affected
    }

    /// Kahn's algorithm over the affected desired keys.
    fn apply_order(&self, affected: &BTreeSet<Key>) -> Result<Vec<Key>, PlanError> {
        let mut indegree: BTreeMap<&Key, usize> = BTreeMap::new();
        let mut followers: HashMap<&Key, Vec<&Key>> = HashMap::new();

        for key in affected {
            let Some(entry) = self.desired.get(key) else {
                continue;
            };
            let mut degree = 0;
            for prerequisite in entry.prerequisites() {
                if affected.contains(prerequisite) && self.desired.contains(prerequisite) {
                    degree += 1;
                    followers.entry(prerequisite).or_default().push(key);
                }
            }
            indegree.insert(key, degree);
        }

        let mut ready: BinaryHeap<Reverse<(u64, &Key)>> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(key, _)| Reverse((self.seq_of(key), *key)))
            .collect();

        let mut order = Vec::with_capacity(indegree.len());
        while let Some(Reverse((_, key))) = ready.pop() {
            order.push(key.clone());
            for follower in followers.get(key).into_iter().flatten() {
                if let Some(degree) = indegree.get_mut(follower) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((self.seq_of(follower), *follower)));
                    }
                }
            }
        }

        if order.len() < indegree.len() {
            let keys: Vec<Key> = indegree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(key, _)| key.clone())
                .collect();
            return Err(PlanError::DependencyCycle { keys });
        }
        Ok(order)
    }

    /// Affected desired keys with the prerequisites they lack.
    fn unsatisfied(&self, affected: &BTreeSet<Key>, order: &[Key]) -> BTreeMap<Key, Vec<Key>> {
        let mut missing: BTreeMap<Key, Vec<Key>> = BTreeMap::new();
        for key in order {
            let Some(entry) = self.desired.get(key) else {
                continue;
            };
            let mut lacking: Vec<Key> = Vec::new();
            for prerequisite in entry.prerequisites() {
                let satisfied = if !affected.contains(prerequisite) {
                    self.graph.is_available(prerequisite)
                } else if self.desired.contains(prerequisite) {
                    !missing.contains_key(prerequisite)
                } else {
                    self.graph.is_available(prerequisite) && !self.will_remove(prerequisite)
                };
                if !satisfied && !lacking.contains(prerequisite) {
                    lacking.push(prerequisite.clone());
                }
            }
            if !lacking.is_empty() {
                missing.insert(key.clone(), lacking);
            }
        }
        missing
    }

    fn classify(
        &self,
        affected: &BTreeSet<Key>,
        order: &[Key],
        missing: &BTreeMap<Key, Vec<Key>>,
    ) -> BTreeMap<Key, Class> {
        let mut classes = BTreeMap::new();

        for key in order {
            let Some(entry) = self.desired.get(key) else {
                continue;
            };
            let node = self.graph.get(key);
            let current = node.and_then(|n| n.value.as_ref());

            let class = if missing.contains_key(key) {
                Class::Pending {
                    unconfigure: node
                        .map_or(false, |n| n.value.is_some() && n.origin == Origin::FromNb),
                }
            } else {
                match (current, &entry.descriptor) {
                    (_, None) => Class::Property,
                    (None, Some(_)) => Class::Create,
                    (Some(old), Some(descriptor)) => {
                        let metadata = node.and_then(|n| n.metadata.as_ref());
                        if descriptor.equivalent(key, old, &entry.value) {
                            Class::Unchanged
                        } else if descriptor.update_with_recreate(key, old, &entry.value, metadata)
                        {
                            Class::Recreate(DeleteReason::Recreate)
                        } else {
                            Class::Update
                        }
                    }
                }
            };
            classes.insert(key.clone(), class);
        }

        for key in affected.iter().filter(|k| !self.desired.contains(k)) {
            let Some(node) = self.graph.get(key) else {
                continue;
            };
            let class = if node.value.is_none() || node.descriptor.is_none() {
                Class::Drop
            } else if self.will_remove(key) {
                Class::Remove
            } else {
                continue;
            };
            classes.insert(key.clone(), class);
        }
        classes
    }

    /// A re-created node takes its configured dependents down with it.
    fn cascade(&self, classes: &mut BTreeMap<Key, Class>) {
        let mut queue: Vec<Key> = classes
            .iter()
            .filter(|(_, c)| matches!(c, Class::Recreate(_)))
            .map(|(k, _)| k.clone())
            .collect();

        while let Some(key) = queue.pop() {
            for dependent in self.graph.dependents_of(&key) {
                if let Some(class) = classes.get_mut(&dependent) {
                    if matches!(class, Class::Unchanged | Class::Update) {
                        debug!(key = %dependent, dependency = %key, "re-creating dependent");
                        *class = Class::Recreate(DeleteReason::Cascade);
                        queue.push(dependent);
                    }
                }
            }
        }
    }

    fn build(
        &self,
        classes: &BTreeMap<Key, Class>,
        order: &[Key],
        missing: &BTreeMap<Key, Vec<Key>>,
    ) -> Plan {
        let mut plan = Plan::default();

        let applying: BTreeSet<&Key> = order
            .iter()
            .filter(|k| {
                matches!(
                    classes.get(*k),
                    Some(Class::Create | Class::Update | Class::Recreate(_) | Class::Property)
                )
            })
            .collect();

        for key in order {
            let (Some(class), Some(entry)) = (classes.get(key), self.desired.get(key)) else {
                continue;
            };
            let node = self.graph.get(key);
            let kind = match class {
                Class::Create | Class::Recreate(_) => StepKind::Create,
                Class::Update => StepKind::Update,
                Class::Property => StepKind::Property,
                Class::Pending { .. } => {
                    plan.pending.push(PendingItem {
                        key: key.clone(),
                        missing: missing.get(key).cloned().unwrap_or_default(),
                        descriptor: entry.descriptor.as_ref().map(|d| d.name().to_string()),
                        seq: entry.seq,
                        parent: entry.parent.clone(),
                        dependencies: entry.dependencies.clone(),
                    });
                    continue;
                }
                Class::Unchanged => {
                    plan.retained.push(Retained {
                        key: key.clone(),
                        descriptor: entry.descriptor.as_ref().map(|d| d.name().to_string()),
                        parent: entry.parent.clone(),
                        dependencies: entry.dependencies.clone(),
                    });
                    continue;
                }
                Class::Remove | Class::Drop => continue,
            };

            let (old_value, metadata) = match kind {
                StepKind::Update => (
                    node.and_then(|n| n.value.clone()),
                    node.and_then(|n| n.metadata.clone()),
                ),
                _ => (None, None),
            };
            let after = entry
                .prerequisites()
                .filter(|p| applying.contains(p))
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            plan.applies.push(Step {
                key: key.clone(),
                kind,
                descriptor: entry.descriptor.clone(),
                value: entry.value.clone(),
                old_value,
                metadata,
                seq: entry.seq,
                parent: entry.parent.clone(),
                dependencies: entry.dependencies.clone(),
                after,
            });
        }

        let mut deletes = Vec::new();
        for (key, class) in classes {
            let reason = match class {
                Class::Pending { unconfigure: true } => DeleteReason::Unconfigure,
                Class::Recreate(reason) => *reason,
                Class::Remove => DeleteReason::Removed,
                Class::Drop => {
                    plan.dropped.push(key.clone());
                    continue;
                }
                _ => continue,
            };
            let Some(node) = self.graph.get(key) else {
                continue;
            };
            let (Some(value), Some(descriptor)) = (
                node.value.clone(),
                node.descriptor
                    .as_deref()
                    .and_then(|name| self.registry.by_name(name))
                    .cloned(),
            ) else {
                plan.dropped.push(key.clone());
                continue;
            };
            deletes.push(Step {
                key: key.clone(),
                kind: StepKind::Delete(reason),
                descriptor: Some(descriptor),
                value,
                old_value: None,
                metadata: node.metadata.clone(),
                seq: node.seq,
                parent: node.derived_from.clone(),
                dependencies: node.dependencies.clone(),
                after: Vec::new(),
            });
        }
        plan.deletes = self.order_deletes(deletes);
        plan
    }

    /// Dependents first; among independent deletes, latest declared first.
    fn order_deletes(&self, mut steps: Vec<Step>) -> Vec<Step> {
        let keys: BTreeSet<Key> = steps.iter().map(|s| s.key.clone()).collect();
        for step in steps.iter_mut() {
            step.after = keys
                .iter()
                .filter(|other| {
                    **other != step.key
                        && self
                            .graph
                            .get(other)
                            .map_or(false, |n| n.depends_on(&step.key))
                })
                .cloned()
                .collect();
        }

        let mut remaining: BTreeMap<Key, Step> =
            steps.into_iter().map(|s| (s.key.clone(), s)).collect();
        let mut ordered = Vec::with_capacity(remaining.len());
        let mut placed: BTreeSet<Key> = BTreeSet::new();

        loop {
            let next = remaining
                .values()
                .filter(|s| s.after.iter().all(|k| placed.contains(k)))
                .max_by_key(|s| (s.seq, Reverse(s.key.clone())))
                .map(|s| s.key.clone());
            let Some(key) = next else { break };
            if let Some(step) = remaining.remove(&key) {
                placed.insert(key);
                ordered.push(step);
            }
        }

        if !remaining.is_empty() {
            warn!(
                keys = ?remaining.keys().collect::<Vec<_>>(),
                "dependency cycle among deletes, ordering ignored"
            );
            let stuck: BTreeSet<Key> = remaining.keys().cloned().collect();
            for (_, mut step) in remaining {
                step.after.retain(|k| !stuck.contains(k));
                ordered.push(step);
            }
        }
        ordered
    }

    fn will_remove(&self, key: &str) -> bool {
        if self.desired.contains(key) {
            return false;
        }
        self.graph.get(key).map_or(false, |n| {
            n.value.is_some()
                && !n.adopted
                && (n.origin == Origin::FromNb || n.descriptor.is_none())
        })
    }

    fn seq_of(&self, key: &str) -> u64 {
        self.desired.get(key).map_or(u64::MAX, |e| e.seq)
    }
}
