//! Error types for the node.

use rumor_core::CoreError;
use rumor_sync::SyncError;
use thiserror::Error;

/// Errors that can occur while running a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Gossip or transport error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Local state error.
    #[error("state error: {0}")]
    Core(#[from] CoreError),

    /// I/O error on the message channel.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The first message was not a valid `init`.
    #[error("not initialized: {0}")]
    NotInitialized(String),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
