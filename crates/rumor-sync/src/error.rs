//! Error types for the sync module.

use thiserror::Error;

use crate::messages::ErrorCode;

/// Errors that can occur while gossiping.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Core state rejected the operation.
    #[error("state error: {0}")]
    Core(#[from] rumor_core::CoreError),

    /// Message validation failed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Peer answered with an error body.
    #[error("peer error ({code:?}): {message}")]
    PeerError { code: ErrorCode, message: String },

    /// Timeout waiting for peer.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Peer is not known to the transport.
    #[error("peer not connected: {0}")]
    PeerNotConnected(String),

    /// The inbound channel closed; no more requests will arrive.
    #[error("transport closed")]
    Closed,

    /// A configuration value could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Wire error code used when this error is reported to a caller.
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::InvalidMessage(_) => ErrorCode::MalformedRequest,
            SyncError::Timeout(_) => ErrorCode::Timeout,
            SyncError::PeerNotConnected(_) => ErrorCode::NodeNotFound,
            SyncError::PeerError { code, .. } => *code,
            SyncError::Core(rumor_core::CoreError::UnknownNeighbor(_)) => ErrorCode::Crash,
            SyncError::Core(rumor_core::CoreError::TopologyConflict { .. }) => ErrorCode::Abort,
            SyncError::Core(_) => ErrorCode::MalformedRequest,
            SyncError::TransportError(_) | SyncError::Closed => ErrorCode::TemporarilyUnavailable,
            SyncError::Config(_) => ErrorCode::Crash,
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rumor_core::{CoreError, NodeId};

    #[test]
    fn test_conflicting_topology_aborts() {
        let err = SyncError::Core(CoreError::TopologyConflict {
            node: NodeId::from("n1"),
            installed: vec![NodeId::from("n2")],
        });
        assert_eq!(err.code(), ErrorCode::Abort);
    }

    #[test]
    fn test_codes_for_request_problems() {
        assert_eq!(
            SyncError::InvalidMessage("bad".into()).code(),
            ErrorCode::MalformedRequest
        );
        assert_eq!(SyncError::Timeout("n2".into()).code(), ErrorCode::Timeout);
        assert_eq!(SyncError::Closed.code(), ErrorCode::TemporarilyUnavailable);
    }
}
