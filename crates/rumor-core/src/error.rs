//! Error types for Rumor core state.

use thiserror::Error;

use crate::types::NodeId;

/// Errors that can occur while mutating gossip state.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A ledger operation named a peer that was never declared a neighbor.
    ///
    /// This is an internal invariant violation, never a peer's fault.
    #[error("no ledger entry for neighbor {0}")]
    UnknownNeighbor(NodeId),

    /// The installed topology does not mention the local node.
    #[error("topology does not list node {0}")]
    NodeNotInTopology(NodeId),

    /// A different topology was already installed.
    #[error("topology already installed for {node} with neighbors {installed:?}")]
    TopologyConflict {
        node: NodeId,
        installed: Vec<NodeId>,
    },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
