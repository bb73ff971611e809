//! Error types for the agent daemon

use std::path::PathBuf;

use thiserror::Error;
use vpp_binapi::{BinapiError, VppRetval};
use vpp_scheduler::DescriptorError;
use vpp_scheduler::SchedulerError;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The desired-state file could not be read or parsed
    #[error("Desired state {}: {reason}", .path.display())]
    Desired { path: PathBuf, reason: String },

    /// Binary API failure (connect, handler selection)
    #[error("VPP API error: {0}")]
    Binapi(#[from] BinapiError),

    /// Scheduler rejected a transaction or a descriptor
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Wraps a binary API failure for the scheduler, keeping its retriability.
pub(crate) fn dp_err(err: BinapiError) -> DescriptorError {
    let retriable = err.is_retryable();
    DescriptorError::dataplane(err, retriable)
}

/// The object a delete targets no longer exists.
pub(crate) fn is_gone(err: &BinapiError) -> bool {
    err.is_not_found()
}

/// VPP rejected the interface handle. It answers this both for a handle that
/// no longer exists and for an interface it refuses to touch.
pub(crate) fn is_bad_handle(err: &BinapiError) -> bool {
    matches!(
        err,
        BinapiError::Retval {
            code: VppRetval::InvalidSwIfIndex,
            ..
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::Config("resync_interval_secs must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: resync_interval_secs must be positive"
        );
    }

    #[test]
    fn test_error_desired() {
        let err = AgentError::Desired {
            path: PathBuf::from("/etc/vppagent/desired.yaml"),
            reason: "missing field `name`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Desired state /etc/vppagent/desired.yaml: missing field `name`"
        );
    }

    #[test]
    fn test_dataplane_error_classification() {
        assert!(dp_err(BinapiError::Disconnected).is_retriable());
        assert!(!dp_err(BinapiError::retval("create_loopback", -7)).is_retriable());
        assert!(dp_err(BinapiError::retval("ip_punt_redirect", -116)).is_retriable());

        assert!(!is_gone(&BinapiError::retval("delete_loopback", -2)));
        assert!(is_bad_handle(&BinapiError::retval("delete_loopback", -2)));
        assert!(is_gone(&BinapiError::retval("sw_interface_add_del_address", -6)));
        assert!(!is_gone(&BinapiError::retval("delete_loopback", -1)));
    }

    #[test]
    fn test_error_from_binapi() {
        let err = AgentError::from(BinapiError::Disconnected);
        assert_eq!(err.to_string(), "VPP API error: connection to VPP closed");
    }
}
