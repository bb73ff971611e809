//! Transactions and their per-node outcomes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::DescriptorError;
use crate::graph::NodeState;
use crate::kv::{AnyValue, Key, ProtoValue};

/// Why a transaction was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TxnKind {
    /// Changes submitted by a northbound client.
    Northbound,
    /// Resync replacing the desired state.
    FullResync,
    /// Resync against the stored desired state.
    DownstreamResync,
    /// Re-attempt of items that failed retriably.
    RetryFailed,
}

impl TxnKind {
    pub fn is_resync(&self) -> bool {
        matches!(self, TxnKind::FullResync | TxnKind::DownstreamResync)
    }
}

impl fmt::Display for TxnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxnKind::Northbound => "northbound",
            TxnKind::FullResync => "full-resync",
            TxnKind::DownstreamResync => "downstream-resync",
            TxnKind::RetryFailed => "retry-failed",
        };
        write!(f, "{}", s)
    }
}

/// An ordered list of desired mutations.
#[derive(Debug, Clone, Default)]
pub struct Txn {
    pub(crate) ops: Vec<(Key, Option<AnyValue>)>,
    pub(crate) description: Option<String>,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or modifies a value.
    pub fn put<V: ProtoValue>(mut self, key: impl Into<Key>, value: V) -> Self {
        self.ops.push((key.into(), Some(Arc::new(value) as AnyValue)));
        self
    }

    /// Removes a value.
    pub fn delete(mut self, key: impl Into<Key>) -> Self {
        self.ops.push((key.into(), None));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Dataplane operation applied to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// Delete followed by Create.
    Recreate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Recreate => "recreate",
        };
        write!(f, "{}", s)
    }
}

/// Result for one node of a transaction.
#[derive(Debug, Clone)]
pub enum Outcome {
    Applied { op: Operation },
    /// Parked as pending until the listed keys become available.
    SkippedUnsatisfiedDependency { missing: Vec<Key> },
    FailedTerminal { error: DescriptorError },
    /// Failed transiently; a later retry transaction will re-attempt it.
    FailedRetrying { error: DescriptorError, attempts: u32 },
    /// Rejected by validation, never applied.
    Invalid { error: DescriptorError },
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::FailedTerminal { .. } | Outcome::FailedRetrying { .. } | Outcome::Invalid { .. }
        )
    }

    pub fn error(&self) -> Option<&DescriptorError> {
        match self {
            Outcome::FailedTerminal { error }
            | Outcome::FailedRetrying { error, .. }
            | Outcome::Invalid { error } => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Applied { op } => write!(f, "applied ({})", op),
            Outcome::SkippedUnsatisfiedDependency { missing } => {
                write!(f, "pending on {}", missing.join(", "))
            }
            Outcome::FailedTerminal { error } => write!(f, "failed: {}", error),
            Outcome::FailedRetrying { error, attempts } => {
                write!(f, "failed after {} attempts, will retry: {}", attempts, error)
            }
            Outcome::Invalid { error } => write!(f, "invalid: {}", error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TxnEntry {
    pub key: Key,
    pub descriptor: Option<String>,
    pub outcome: Outcome,
    /// Node state once the transaction finished.
    pub state: NodeState,
}

/// Structured result of one transaction.
#[derive(Debug, Clone)]
pub struct TxnResult {
    pub seq: u64,
    pub kind: TxnKind,
    pub description: Option<String>,
    /// Entries in the order their outcome was first recorded.
    pub entries: Vec<TxnEntry>,
    /// Descriptors whose retrieve failed during a resync.
    pub retrieve_errors: Vec<(String, DescriptorError)>,
    pub duration: Duration,
}

impl TxnResult {
    pub fn outcome(&self, key: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| &e.outcome)
    }

    /// Number of applied dataplane operations.
    pub fn operations(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_applied()).count()
    }

    /// True when nothing failed and no retrieve errored.
    pub fn is_success(&self) -> bool {
        self.retrieve_errors.is_empty() && !self.entries.iter().any(|e| e.outcome.is_failure())
    }

    pub fn failed_keys(&self) -> Vec<&Key> {
        self.entries
            .iter()
            .filter(|e| e.outcome.is_failure())
            .map(|e| &e.key)
            .collect()
    }

    pub fn pending_keys(&self) -> Vec<&Key> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::SkippedUnsatisfiedDependency { .. }))
            .map(|e| &e.key)
            .collect()
    }
}

/// Collects outcomes while a transaction runs; later outcomes for the same
/// key replace earlier ones.
#[derive(Debug, Default)]
pub(crate) struct TxnRecorder {
    entries: Vec<TxnEntry>,
    index: HashMap<Key, usize>,
}

impl TxnRecorder {
    pub fn record(
        &mut self,
        key: &str,
        descriptor: Option<&str>,
        outcome: Outcome,
        state: NodeState,
    ) {
        let entry = TxnEntry {
            key: key.to_string(),
            descriptor: descriptor.map(str::to_string),
            outcome,
            state,
        };
        match self.index.get(key) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index.insert(key.to_string(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn into_entries(self) -> Vec<TxnEntry> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_recorder_replaces_outcome() {
        let mut recorder = TxnRecorder::default();
        recorder.record(
            "a",
            Some("d"),
            Outcome::Applied { op: Operation::Delete },
            NodeState::Pending,
        );
        recorder.record("b", None, Outcome::Applied { op: Operation::Create }, NodeState::Configured);
        recorder.record(
            "a",
            Some("d"),
            Outcome::Applied { op: Operation::Recreate },
            NodeState::Configured,
        );

        let entries = recorder.into_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "a");
        assert!(matches!(
            entries[0].outcome,
            Outcome::Applied { op: Operation::Recreate }
        ));
    }

    #[test]
    fn test_result_summary() {
        let result = TxnResult {
            seq: 1,
            kind: TxnKind::Northbound,
            description: None,
            entries: vec![
                TxnEntry {
                    key: "a".to_string(),
                    descriptor: None,
                    outcome: Outcome::Applied { op: Operation::Create },
                    state: NodeState::Configured,
                },
                TxnEntry {
                    key: "b".to_string(),
                    descriptor: None,
                    outcome: Outcome::SkippedUnsatisfiedDependency {
                        missing: vec!["c".to_string()],
                    },
                    state: NodeState::Pending,
                },
                TxnEntry {
                    key: "d".to_string(),
                    descriptor: None,
                    outcome: Outcome::FailedTerminal {
                        error: DescriptorError::terminal("rejected"),
                    },
                    state: NodeState::Failed,
                },
            ],
            retrieve_errors: Vec::new(),
            duration: Duration::ZERO,
        };

        assert_eq!(result.operations(), 1);
        assert!(!result.is_success());
        assert_eq!(result.failed_keys(), vec!["d"]);
        assert_eq!(result.pending_keys(), vec!["b"]);
        assert_eq!(
            result.outcome("b").map(|o| o.to_string()),
            Some("pending on c".to_string())
        );
    }

    #[test]
    fn test_txn_builder() {
        #[derive(Debug)]
        struct V;
        crate::impl_proto_value!(V);

        let txn = Txn::new().put("a", V).delete("b").with_description("test");
        assert_eq!(txn.len(), 2);
        assert!(txn.ops[1].1.is_none());
    }
}
