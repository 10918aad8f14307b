//! # Rumor Sync
//!
//! Gossip protocol for converging value sets between nodes.
//!
//! ## Overview
//!
//! Each node pushes, to each of its neighbors, the values that neighbor
//! has not yet acknowledged (the anti-entropy diff). Neighbors merge the
//! batch, acknowledge it, and re-gossip anything new. With a connected
//! topology and no permanent partition every node ends up with the union
//! of all broadcast values.
//!
//! ## Key Properties
//!
//! - **Idempotent**: merging a batch twice is the same as once
//! - **Commutative**: delivery order doesn't affect the final set
//! - **Loss-tolerant**: a lost push or acknowledgment only delays
//!   convergence; the values stay in the diff until acknowledged
//! - **Quiet at rest**: once every neighbor has acknowledged everything,
//!   nothing is sent
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rumor_core::{GossipState, NodeId, Value};
//! use rumor_sync::{GossipConfig, InboundMerger, MemoryNetwork, Propagator};
//!
//! async fn example() {
//!     let network = MemoryNetwork::new();
//!     let transport = Arc::new(network.create_transport(NodeId::from("n1")).await);
//!     let state = Arc::new(GossipState::new(NodeId::from("n1")));
//!
//!     let propagator = Propagator::new(Arc::clone(&state), transport, GossipConfig::default());
//!     let merger = InboundMerger::new(Arc::clone(&state), propagator.trigger());
//!     let _worker = propagator.spawn();
//!
//!     merger.submit(Value(42));
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Client          Node A                         Node B
//!   |-- broadcast -->|                              |
//!   |<- broadcast_ok-|                              |
//!   |                |---- gossip {diff(B)} ------->|
//!   |                |<--- gossip_ok {acked} -------|
//!   |                |  ledger[B] += acked          |-- gossip to B's neighbors
//! ```

pub mod config;
pub mod convergence;
pub mod error;
pub mod merger;
pub mod messages;
pub mod propagator;
pub mod transport;

pub use config::GossipConfig;
pub use convergence::{compute_set_digest, verify_cluster, verify_convergence, ConvergenceResult};
pub use error::{Result, SyncError};
pub use merger::{InboundMerger, MergeOutcome};
pub use messages::{limits, Body, DecodeError, Envelope, ErrorCode, Payload};
pub use propagator::{PropagationReport, PropagationTrigger, Propagator};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, PendingReplies, Transport};
