//! Federation Errors
//!
//! Every local-call failure of the membership and messaging layer is a
//! [`FederationError`]. Per-target failures inside a zone-wide synchronous send
//! are *not* raised: the dispatcher turns them into synthetic
//! `RemoteSystem` responses so partial results survive.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FederationError>;

/// Why a peer could not be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unreachable {
    /// No response arrived within the bound.
    Timeout(Duration),
    /// The failure detector suspected the peer while the call was outstanding,
    /// or the peer is no longer part of the view.
    Suspected,
}

impl std::fmt::Display for Unreachable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unreachable::Timeout(after) => write!(f, "timed out after {:?}", after),
            Unreachable::Suspected => write!(f, "suspected"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum FederationError {
    #[error("peer {target} unreachable: {cause}")]
    UnreachablePeer { target: String, cause: Unreachable },

    #[error("remote error from {runtime}: {message}")]
    RemoteError { runtime: String, message: String },

    #[error("controller not found in the current view")]
    ControllerNotFound,

    #[error("runtime {0} not found in the current view")]
    RuntimeNotFound(String),

    #[error("channel {0} is already open")]
    ChannelAlreadyOpen(String),

    #[error("channel {0} is not open")]
    ChannelNotFound(String),

    #[error("channel is not connected")]
    NotConnected,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("{operation} is not supported by the {role} role")]
    IllegalOperation { role: String, operation: &'static str },

    #[error("no view received within {0:?}")]
    JoinTimeout(Duration),

    #[error("invalid name {0:?}")]
    InvalidName(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("deployment failed: {0}")]
    Deployment(String),
}

impl FederationError {
    pub fn timeout(target: impl Into<String>, after: Duration) -> Self {
        FederationError::UnreachablePeer {
            target: target.into(),
            cause: Unreachable::Timeout(after),
        }
    }

    pub fn suspected(target: impl Into<String>) -> Self {
        FederationError::UnreachablePeer {
            target: target.into(),
            cause: Unreachable::Suspected,
        }
    }

    /// True only for the "no response at all" outcome.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FederationError::UnreachablePeer {
                cause: Unreachable::Timeout(_),
                ..
            }
        )
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, FederationError::UnreachablePeer { .. })
    }
}

impl From<std::io::Error> for FederationError {
    fn from(e: std::io::Error) -> Self {
        FederationError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_distinct_from_other_failures() {
        let timeout = FederationError::timeout("rt-1", Duration::from_millis(50));
        let suspected = FederationError::suspected("rt-1");
        let remote = FederationError::RemoteError {
            runtime: "rt-1".to_string(),
            message: "boom".to_string(),
        };

        assert!(timeout.is_timeout());
        assert!(timeout.is_unreachable());
        assert!(!suspected.is_timeout());
        assert!(suspected.is_unreachable());
        assert!(!remote.is_unreachable());
    }
}
