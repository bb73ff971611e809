//! Error types for descriptors, planning and scheduling.

use std::sync::Arc;

use thiserror::Error;

use crate::kv::Key;

/// Error returned by a descriptor callback.
///
/// Retriability is carried by the error itself; descriptors may still
/// override the classification through `Descriptor::is_retriable_failure`.
#[derive(Debug, Clone, Error)]
pub enum DescriptorError {
    /// The value is structurally or semantically invalid.
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    /// The dataplane rejected or could not complete an operation.
    #[error("{message}")]
    Failed { message: String, retriable: bool },

    /// A lower layer (RPC channel, codec) failed.
    #[error("{source}")]
    Dataplane {
        retriable: bool,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// The operation did not complete in time.
    #[error("{operation} timed out")]
    Timeout { operation: String },

    /// The descriptor does not implement the requested capability.
    #[error("descriptor {descriptor} does not support {operation}")]
    Unsupported {
        descriptor: String,
        operation: String,
    },

    /// The value handed to the descriptor has an unexpected type.
    #[error("value for {key} is not a {expected}")]
    ValueType { key: String, expected: String },

    /// A dependency of the item failed in the same transaction.
    #[error("dependency {key} failed")]
    DependencyFailed { key: String },

    /// Removal was blocked because a dependent item could not be removed.
    #[error("removal blocked by failed delete of {key}")]
    Blocked { key: String },
}

impl DescriptorError {
    /// Creates a validation error.
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        DescriptorError::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Creates a non-retriable operation failure.
    pub fn terminal(message: impl Into<String>) -> Self {
        DescriptorError::Failed {
            message: message.into(),
            retriable: false,
        }
    }

    /// Creates a transient operation failure.
    pub fn retriable(message: impl Into<String>) -> Self {
        DescriptorError::Failed {
            message: message.into(),
            retriable: true,
        }
    }

    /// Wraps a lower-layer error.
    pub fn dataplane<E>(source: E, retriable: bool) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DescriptorError::Dataplane {
            retriable,
            source: Arc::new(source),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        DescriptorError::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates an unsupported-capability error.
    pub fn unsupported(descriptor: impl Into<String>, operation: impl Into<String>) -> Self {
        DescriptorError::Unsupported {
            descriptor: descriptor.into(),
            operation: operation.into(),
        }
    }

    /// Default transient classification.
    pub fn is_retriable(&self) -> bool {
        match self {
            DescriptorError::Failed { retriable, .. } => *retriable,
            DescriptorError::Dataplane { retriable, .. } => *retriable,
            DescriptorError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Returns true for validation errors.
    pub fn is_invalid(&self) -> bool {
        matches!(self, DescriptorError::Invalid { .. })
    }
}

/// Fatal planning errors; the offending transaction is not executed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("dependency cycle among keys: {}", .keys.join(", "))]
    DependencyCycle { keys: Vec<Key> },

    #[error("retrieve dependencies form a cycle among descriptors: {}", .descriptors.join(", "))]
    RetrieveCycle { descriptors: Vec<String> },
}

/// Scheduler-level errors.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    #[error("descriptor {name} is already registered")]
    DuplicateDescriptor { name: String },

    #[error("descriptor {name} key prefix {prefix:?} overlaps with descriptor {other}")]
    OverlappingKeySelector {
        name: String,
        prefix: String,
        other: String,
    },

    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("invalid scheduler configuration: {0}")]
    Config(String),
}

/// Result alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_retriable_classification() {
        assert!(DescriptorError::retriable("busy").is_retriable());
        assert!(DescriptorError::timeout("create").is_retriable());
        assert!(!DescriptorError::terminal("rejected").is_retriable());
        assert!(!DescriptorError::invalid("k", "bad").is_retriable());

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(DescriptorError::dataplane(io, true).is_retriable());
    }

    #[test]
    fn test_error_display() {
        let err = DescriptorError::invalid("config/a", "missing port");
        assert_eq!(err.to_string(), "invalid value for config/a: missing port");

        let err = PlanError::DependencyCycle {
            keys: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "dependency cycle among keys: a, b");

        let err = SchedulerError::from(err);
        assert!(err.to_string().starts_with("planning failed"));
    }
}
