//! Audit trail for dataplane configuration changes.
//!
//! Every transaction, resync and handler version selection produces one
//! [`AuditRecord`]: a UTC timestamp, a category, the acting component, the
//! outcome and optional JSON details. Records are emitted through `tracing`
//! under the `audit` target so they can be routed separately from
//! operational logs; the JSON form is attached as the `audit_json` field.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use vpp_scheduler::{TxnKind, TxnResult};

/// Audit event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Northbound transaction or retry of failed items
    Transaction,
    /// Reconciliation against dumped dataplane state
    Resync,
    /// Protocol version chosen for an API module
    HandlerSelection,
    /// Desired-state file (re)loaded
    ConfigurationChange,
    /// Agent startup and shutdown
    SystemLifecycle,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditCategory::Transaction => write!(f, "TRANSACTION"),
            AuditCategory::Resync => write!(f, "RESYNC"),
            AuditCategory::HandlerSelection => write!(f, "HANDLER_SELECTION"),
            AuditCategory::ConfigurationChange => write!(f, "CONFIGURATION_CHANGE"),
            AuditCategory::SystemLifecycle => write!(f, "SYSTEM_LIFECYCLE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    /// Completed, but some items failed or wait for dependencies
    Partial,
    Failure,
    InProgress,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Partial => write!(f, "partial"),
            AuditOutcome::Failure => write!(f, "failure"),
            AuditOutcome::InProgress => write!(f, "in_progress"),
        }
    }
}

/// One structured audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub category: AuditCategory,
    /// Component that performed the action
    pub source: String,
    pub action: String,
    pub outcome: AuditOutcome,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Groups records of one transaction (its sequence number)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AuditRecord {
    /// Creates a record stamped now; the outcome starts as in-progress.
    pub fn new(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            details: None,
            error: None,
            correlation_id: None,
        }
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    pub fn with_object_type(mut self, obj_type: impl Into<String>) -> Self {
        self.object_type = Some(obj_type.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Sets the error message and marks the outcome as a failure.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.outcome = AuditOutcome::Failure;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }

    /// Summarizes a finished transaction.
    ///
    /// Failed keys and the errors behind them go into `details`; a
    /// transaction with failures is `Partial`, one with descriptors that
    /// could not be dumped is a `Failure`.
    pub fn from_txn(result: &TxnResult) -> Self {
        let category = if result.kind.is_resync() {
            AuditCategory::Resync
        } else {
            AuditCategory::Transaction
        };

        let failed: Vec<serde_json::Value> = result
            .entries
            .iter()
            .filter_map(|entry| {
                entry.outcome.error().map(|error| {
                    json!({
                        "key": entry.key,
                        "error": error.to_string(),
                    })
                })
            })
            .collect();
        let pending = result.pending_keys();

        let outcome = if !failed.is_empty() || !pending.is_empty() {
            AuditOutcome::Partial
        } else {
            AuditOutcome::Success
        };

        let mut record = AuditRecord::new(category, "scheduler", txn_action(result.kind))
            .with_outcome(outcome)
            .with_correlation_id(result.seq.to_string())
            .with_details(json!({
                "operations": result.operations(),
                "failed": failed,
                "pending": pending,
                "duration_ms": result.duration.as_millis() as u64,
            }));
        if let Some(description) = &result.description {
            record = record.with_object_id(description.clone());
        }
        if !result.retrieve_errors.is_empty() {
            let errors: Vec<String> = result
                .retrieve_errors
                .iter()
                .map(|(descriptor, err)| format!("{}: {}", descriptor, err))
                .collect();
            record = record.with_error(format!("retrieve failed: {}", errors.join("; ")));
        }
        record
    }

    /// Records the protocol version chosen for one API module.
    pub fn handler_selected(module: &str, version: &str) -> Self {
        AuditRecord::new(AuditCategory::HandlerSelection, "binapi", "select handler version")
            .with_outcome(AuditOutcome::Success)
            .with_object_type(module)
            .with_object_id(version)
    }
}

fn txn_action(kind: TxnKind) -> &'static str {
    match kind {
        TxnKind::Northbound => "commit transaction",
        TxnKind::FullResync => "full resync",
        TxnKind::DownstreamResync => "downstream resync",
        TxnKind::RetryFailed => "retry failed items",
    }
}

/// Emits an [`AuditRecord`] under the `audit` target.
///
/// Success is logged at info, in-progress at debug, partial and failure at
/// warn.
///
/// ```ignore
/// let record = AuditRecord::new(AuditCategory::SystemLifecycle, "vppagent", "start")
///     .with_outcome(AuditOutcome::Success);
/// audit_log!(record);
/// ```
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        let record = $record;
        match record.outcome {
            $crate::audit::AuditOutcome::Success => {
                tracing::info!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::InProgress => {
                tracing::debug!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::Partial | $crate::audit::AuditOutcome::Failure => {
                tracing::warn!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    error = record.error.as_deref().unwrap_or(""),
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use vpp_scheduler::{DescriptorError, NodeState, Operation, Outcome, TxnEntry};

    fn txn(kind: TxnKind, entries: Vec<TxnEntry>) -> TxnResult {
        TxnResult {
            seq: 7,
            kind,
            description: None,
            entries,
            retrieve_errors: Vec::new(),
            duration: Duration::from_millis(3),
        }
    }

    #[test]
    fn test_category_display() {
        assert_eq!(AuditCategory::HandlerSelection.to_string(), "HANDLER_SELECTION");
        assert_eq!(
            serde_json::to_string(&AuditCategory::SystemLifecycle).unwrap(),
            "\"SYSTEM_LIFECYCLE\""
        );
    }

    #[test]
    fn test_with_error_marks_failure() {
        let record = AuditRecord::new(AuditCategory::SystemLifecycle, "vppagent", "connect")
            .with_error("connection refused");
        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert_eq!(record.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_to_json_skips_empty_fields() {
        let record = AuditRecord::handler_selected("punt", "vpp2001");
        let json: serde_json::Value = serde_json::from_str(&record.to_json()).unwrap();
        assert_eq!(json["category"], "HANDLER_SELECTION");
        assert_eq!(json["object_type"], "punt");
        assert_eq!(json["object_id"], "vpp2001");
        assert_eq!(json["outcome"], "success");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_from_txn_success() {
        let result = txn(
            TxnKind::Northbound,
            vec![TxnEntry {
                key: "config/vpp/v2/interfaces/if1".into(),
                descriptor: Some("vpp-interface".into()),
                outcome: Outcome::Applied {
                    op: Operation::Create,
                },
                state: NodeState::Configured,
            }],
        );
        let record = AuditRecord::from_txn(&result);
        assert_eq!(record.category, AuditCategory::Transaction);
        assert_eq!(record.outcome, AuditOutcome::Success);
        assert_eq!(record.correlation_id.as_deref(), Some("7"));
        assert_eq!(record.details.as_ref().unwrap()["operations"], 1);
    }

    #[test]
    fn test_from_txn_partial() {
        let result = txn(
            TxnKind::DownstreamResync,
            vec![TxnEntry {
                key: "config/vpp/v2/punt/exception/bad".into(),
                descriptor: Some("vpp-punt-exception".into()),
                outcome: Outcome::FailedTerminal {
                    error: DescriptorError::terminal("punt reason \"bad\" not found"),
                },
                state: NodeState::Failed,
            }],
        );
        let record = AuditRecord::from_txn(&result);
        assert_eq!(record.category, AuditCategory::Resync);
        assert_eq!(record.outcome, AuditOutcome::Partial);
        assert_eq!(
            record.details.as_ref().unwrap()["failed"][0]["key"],
            "config/vpp/v2/punt/exception/bad"
        );
    }

    #[test]
    fn test_from_txn_retrieve_error() {
        let mut result = txn(TxnKind::FullResync, Vec::new());
        result.retrieve_errors = vec![(
            "vpp-interface".to_string(),
            DescriptorError::timeout("sw_interface_dump"),
        )];
        let record = AuditRecord::from_txn(&result);
        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert_eq!(
            record.error.as_deref(),
            Some("retrieve failed: vpp-interface: sw_interface_dump timed out")
        );
    }
}
