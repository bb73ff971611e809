//! Runtime node graph: what the scheduler believes exists in the dataplane.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;
use crate::kv::{AnyMetadata, AnyValue, Dependency, Key, Origin};

/// Lifecycle state of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Found in the dataplane, not owned by desired state.
    Discovered,
    /// Desired but waiting for a dependency.
    Pending,
    /// Applied and stable.
    Configured,
    /// An operation is in flight.
    Updating,
    /// The last operation failed.
    Failed,
    /// Deleted from the dataplane.
    Removed,
}

impl NodeState {
    /// Whether dependents may rely on the node.
    pub fn is_available(&self) -> bool {
        matches!(self, NodeState::Configured | NodeState::Discovered)
    }
}

/// One configuration item as tracked by the scheduler.
#[derive(Debug, Clone)]
pub struct Node {
    pub key: Key,
    /// Value present in the dataplane, if any.
    pub value: Option<AnyValue>,
    pub metadata: Option<AnyMetadata>,
    pub origin: Origin,
    /// Discovered item taken over by the agent while no desired value
    /// claims it. Kept as it is, never removed by resync.
    pub adopted: bool,
    pub state: NodeState,
    /// `None` for properties (derived values without a descriptor).
    pub descriptor: Option<String>,
    pub derived_from: Option<Key>,
    pub dependencies: Vec<Dependency>,
    pub last_error: Option<DescriptorError>,
    /// Failed attempts since the value last changed.
    pub attempts: u32,
    pub(crate) seq: u64,
}

impl Node {
    pub(crate) fn new(key: impl Into<Key>, origin: Origin, state: NodeState, seq: u64) -> Self {
        Self {
            key: key.into(),
            value: None,
            metadata: None,
            origin,
            adopted: false,
            state,
            descriptor: None,
            derived_from: None,
            dependencies: Vec::new(),
            last_error: None,
            attempts: 0,
            seq,
        }
    }

    /// True when this node must wait for `key` (explicit or parent dependency).
    pub fn depends_on(&self, key: &str) -> bool {
        self.derived_from.as_deref() == Some(key)
            || self.dependencies.iter().any(|d| d.key == key)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Graph {
    nodes: BTreeMap<Key, Node>,
}

impl Graph {
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    pub fn insert(&mut self, node: Node) {
        self.nodes.insert(node.key.clone(), node);
    }

    pub fn remove(&mut self, key: &str) -> Option<Node> {
        self.nodes.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.nodes.keys()
    }

    pub fn is_available(&self, key: &str) -> bool {
        self.nodes
            .get(key)
            .map_or(false, |n| n.state.is_available() && n.value.is_some())
    }

    /// Keys of nodes that depend on `key`, including derived children.
    pub fn dependents_of(&self, key: &str) -> Vec<Key> {
        self.nodes
            .values()
            .filter(|n| n.key != key && n.depends_on(key))
            .map(|n| n.key.clone())
            .collect()
    }

    /// Keys of nodes owned by `descriptor`.
    pub fn keys_of(&self, descriptor: &str) -> Vec<Key> {
        self.nodes
            .values()
            .filter(|n| n.descriptor.as_deref() == Some(descriptor))
            .map(|n| n.key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependents_include_derived_children() {
        let mut graph = Graph::default();
        let mut parent = Node::new("if/a", Origin::FromNb, NodeState::Configured, 1);
        parent.descriptor = Some("interface".to_string());
        graph.insert(parent);

        let mut child = Node::new("if/a/addr", Origin::FromNb, NodeState::Configured, 2);
        child.derived_from = Some("if/a".to_string());
        graph.insert(child);

        let mut rule = Node::new("punt/x", Origin::FromNb, NodeState::Pending, 3);
        rule.dependencies = vec![Dependency::new("tx", "if/a")];
        graph.insert(rule);

        assert_eq!(graph.dependents_of("if/a"), vec!["if/a/addr", "punt/x"]);
        assert!(graph.dependents_of("punt/x").is_empty());
        assert_eq!(graph.keys_of("interface"), vec!["if/a"]);
    }

    #[test]
    fn test_availability_requires_value() {
        let mut graph = Graph::default();
        graph.insert(Node::new("k", Origin::FromNb, NodeState::Configured, 1));
        assert!(!graph.is_available("k"));
        assert!(!graph.is_available("missing"));
        assert!(NodeState::Discovered.is_available());
        assert!(!NodeState::Pending.is_available());
    }
}
