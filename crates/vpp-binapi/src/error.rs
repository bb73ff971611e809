//! Binary API error types and VPP return value handling.
//!
//! Replies carry a signed `retval`; zero is success and every negative value
//! is one of the dataplane's `VNET_API_ERROR_*` codes. Retval failures are kept
//! apart from transport failures so callers can tell "the dataplane said no"
//! from "the dataplane never answered".

use std::fmt;
use thiserror::Error;

/// Known VPP API return values.
///
/// Unknown negative values map to [`VppRetval::Unspecified`]; the raw value is
/// kept in [`BinapiError::Retval`].
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VppRetval {
    Ok = 0,
    Unspecified = -1,
    InvalidSwIfIndex = -2,
    NoSuchFib = -3,
    NoSuchEntry = -6,
    InvalidValue = -7,
    Unimplemented = -9,
    FeatureDisabled = -30,
    InvalidRegistration = -31,
    InstanceInUse = -54,
    EntryAlreadyExists = -81,
    TryAgain = -116,
}

impl VppRetval {
    /// Creates a VppRetval from a raw reply value.
    pub fn from_raw(retval: i32) -> Self {
        match retval {
            0 => VppRetval::Ok,
            -2 => VppRetval::InvalidSwIfIndex,
            -3 => VppRetval::NoSuchFib,
            -6 => VppRetval::NoSuchEntry,
            -7 => VppRetval::InvalidValue,
            -9 => VppRetval::Unimplemented,
            -30 => VppRetval::FeatureDisabled,
            -31 => VppRetval::InvalidRegistration,
            -54 => VppRetval::InstanceInUse,
            -81 => VppRetval::EntryAlreadyExists,
            -116 => VppRetval::TryAgain,
            _ => VppRetval::Unspecified,
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == VppRetval::Ok
    }

    /// Transient conditions worth retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, VppRetval::TryAgain | VppRetval::InstanceInUse)
    }
}

impl fmt::Display for VppRetval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VppRetval::Ok => "ok",
            VppRetval::Unspecified => "unspecified error",
            VppRetval::InvalidSwIfIndex => "invalid sw_if_index",
            VppRetval::NoSuchFib => "no such FIB / VRF",
            VppRetval::NoSuchEntry => "no such entry",
            VppRetval::InvalidValue => "invalid value",
            VppRetval::Unimplemented => "unimplemented",
            VppRetval::FeatureDisabled => "feature disabled by configuration",
            VppRetval::InvalidRegistration => "invalid registration",
            VppRetval::InstanceInUse => "instance in use",
            VppRetval::EntryAlreadyExists => "entry already exists",
            VppRetval::TryAgain => "try again",
        };
        write!(f, "{}", s)
    }
}

/// Error type for binary API operations.
#[derive(Debug, Clone, Error)]
pub enum BinapiError {
    /// The dataplane answered with a non-zero retval.
    #[error("{message} returned {retval} ({code})")]
    Retval {
        message: &'static str,
        retval: i32,
        code: VppRetval,
    },

    /// No reply arrived within the request timeout.
    #[error("{message} timed out after {timeout_ms} ms")]
    Timeout {
        message: &'static str,
        timeout_ms: u64,
    },

    /// Socket or framing failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection was closed while a request was outstanding.
    #[error("connection to VPP closed")]
    Disconnected,

    #[error("failed to decode {message}: {reason}")]
    Decode { message: String, reason: String },

    #[error("failed to encode {message}: {reason}")]
    Encode { message: String, reason: String },

    /// The peer does not know the message (name or CRC mismatch).
    #[error("message {0} is not supported by the connected VPP")]
    UnknownMessage(String),

    /// A reply of another type arrived for a pending request.
    #[error("unexpected reply {got} to {message}")]
    UnexpectedReply { message: &'static str, got: String },

    /// A named object the request refers to is unknown to the dataplane.
    #[error("{0}")]
    NotFound(String),

    /// No handler version of a module matches the connected VPP.
    #[error("no compatible {module} handler among versions [{}]", .tried.join(", "))]
    IncompatibleVersion { module: String, tried: Vec<String> },
}

impl BinapiError {
    pub fn retval(message: &'static str, retval: i32) -> Self {
        BinapiError::Retval {
            message,
            retval,
            code: VppRetval::from_raw(retval),
        }
    }

    pub fn decode(message: impl Into<String>, reason: impl fmt::Display) -> Self {
        BinapiError::Decode {
            message: message.into(),
            reason: reason.to_string(),
        }
    }

    pub fn encode(message: impl Into<String>, reason: impl fmt::Display) -> Self {
        BinapiError::Encode {
            message: message.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for failures a later attempt may not hit again.
    pub fn is_retryable(&self) -> bool {
        match self {
            BinapiError::Retval { code, .. } => code.is_transient(),
            BinapiError::Timeout { .. } | BinapiError::Transport(_) | BinapiError::Disconnected => {
                true
            }
            _ => false,
        }
    }

    /// Returns true when the dataplane reported the target as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BinapiError::NotFound(_)
                | BinapiError::Retval {
                    code: VppRetval::NoSuchEntry,
                    ..
                }
        )
    }
}

impl From<std::io::Error> for BinapiError {
    fn from(err: std::io::Error) -> Self {
        BinapiError::Transport(err.to_string())
    }
}

/// Result type for binary API operations.
pub type BinapiResult<T> = Result<T, BinapiError>;
