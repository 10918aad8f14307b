//! # Rumor Core
//!
//! Pure state for the Rumor gossip broadcast engine: the replicated value
//! set, the per-neighbor acknowledgment ledger, and the static topology.
//!
//! This crate contains no I/O and no networking. It is set arithmetic
//! behind a lock.
//!
//! ## Key Types
//!
//! - [`Value`] - An opaque broadcast value
//! - [`NodeId`] - Name of a node or client
//! - [`ValueStore`] - Grow-only set of known values
//! - [`NeighborLedger`] - Values each neighbor is believed to hold
//! - [`TopologyTable`] - Static adjacency list
//! - [`GossipState`] - Store and ledger behind a single lock
//!
//! ## Anti-entropy
//!
//! For each neighbor `p`, the diff `store - ledger[p]` is exactly what `p`
//! is not yet known to hold. Pushing the diff and recording the
//! acknowledgment shrinks it to empty, at which point nothing more is sent
//! to `p` until a new value arrives.

pub mod digest;
pub mod error;
pub mod ledger;
pub mod state;
pub mod topology;
pub mod types;
pub mod value_store;

pub use digest::SetDigest;
pub use error::{CoreError, Result};
pub use ledger::NeighborLedger;
pub use state::{GossipState, PendingDiff};
pub use topology::TopologyTable;
pub use types::{NodeId, Value};
pub use value_store::ValueStore;
