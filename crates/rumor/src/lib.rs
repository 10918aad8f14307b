//! # Rumor
//!
//! The unified API for the Rumor system: a broadcast node that converges
//! a grow-only set of values across a cluster by anti-entropy gossip.
//!
//! ## Overview
//!
//! A Rumor node provides:
//!
//! - **Broadcast**: clients submit values to any node
//! - **Read**: any node reports every value it has learned
//! - **Topology**: setup tells each node who its neighbors are
//! - **Gossip**: nodes push unacknowledged values to neighbors until every
//!   neighbor has confirmed them
//!
//! ## Key Concepts
//!
//! - **Value**: an opaque integer. Values are only ever added.
//! - **Ledger**: per neighbor, what that neighbor has confirmed it holds.
//! - **Diff**: what a neighbor still lacks; the only thing ever sent.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rumor::{Node, NodeConfig, StdioTransport};
//!
//! async fn example() -> rumor::Result<()> {
//!     let (transport, _members) = StdioTransport::from_stdio().await?;
//!     let node = Arc::new(Node::new(Arc::new(transport), NodeConfig::from_env()?));
//!     node.run().await
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `rumor::core` - State primitives (Value, ValueStore, NeighborLedger, etc.)
//! - `rumor::sync` - Gossip protocol, wire messages, transports

pub mod error;
pub mod node;
pub mod stdio;

// Re-export component crates
pub use rumor_core as core;
pub use rumor_sync as sync;

// Re-export main types for convenience
pub use error::{NodeError, Result};
pub use node::{Node, NodeConfig};
pub use stdio::{LineTransport, StdioTransport};

// Re-export commonly used core types
pub use rumor_core::{GossipState, NodeId, SetDigest, TopologyTable, Value};
pub use rumor_sync::{Body, Envelope, GossipConfig, Transport};
