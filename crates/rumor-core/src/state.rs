//! GossipState: the node's replicated set and neighbor ledger behind one lock.
//!
//! Every read or write of the value set or a ledger entry goes through a
//! method here, so each is atomic with respect to the others. Callers copy
//! what they need out (diffs, snapshots) and never hold the lock across a
//! network call.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::digest::SetDigest;
use crate::error::{CoreError, Result};
use crate::ledger::NeighborLedger;
use crate::topology::TopologyTable;
use crate::types::{NodeId, Value};
use crate::value_store::ValueStore;

/// Shared gossip state for one node.
///
/// Thread-safe via a single coarse `Mutex`; contention is low since every
/// critical section is a small set operation.
pub struct GossipState {
    node_id: NodeId,
    inner: Mutex<GossipStateInner>,
}

struct GossipStateInner {
    /// Values known locally.
    store: ValueStore,

    /// Values each neighbor is believed to hold.
    ledger: NeighborLedger,

    /// Neighbor order as installed; `None` until topology arrives.
    neighbors: Option<Vec<NodeId>>,
}

/// One neighbor's pending anti-entropy diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDiff {
    /// The neighbor to push to.
    pub neighbor: NodeId,
    /// Values it is not yet known to hold.
    pub values: BTreeSet<Value>,
}

impl GossipState {
    /// Create empty state for `node_id`.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            inner: Mutex::new(GossipStateInner {
                store: ValueStore::new(),
                ledger: NeighborLedger::new(),
                neighbors: None,
            }),
        }
    }

    /// The local node's ID.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    // The sets only ever grow, so whatever a panicking holder left behind
    // is still a valid state.
    fn lock(&self) -> MutexGuard<'_, GossipStateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Topology
    // ─────────────────────────────────────────────────────────────────────────

    /// Install this node's neighbors from `topology`.
    ///
    /// Creates an empty ledger entry per neighbor. Installing the same
    /// neighbor list again is a no-op; a different one is rejected.
    pub fn install_topology(&self, topology: &TopologyTable) -> Result<Vec<NodeId>> {
        let neighbors = topology.gossip_neighbors(&self.node_id)?;
        let mut inner = self.lock();

        if let Some(installed) = &inner.neighbors {
            if *installed == neighbors {
                return Ok(neighbors);
            }
            return Err(CoreError::TopologyConflict {
                node: self.node_id.clone(),
                installed: installed.clone(),
            });
        }

        if !topology.is_connected() {
            warn!(node = %self.node_id, "installed topology is not connected");
        }

        for neighbor in &neighbors {
            inner.ledger.register(neighbor.clone());
        }
        inner.neighbors = Some(neighbors.clone());

        debug!(node = %self.node_id, ?neighbors, "topology installed");
        Ok(neighbors)
    }

    /// Installed neighbors; empty before topology arrives.
    pub fn neighbors(&self) -> Vec<NodeId> {
        self.lock().neighbors.clone().unwrap_or_default()
    }

    /// Whether topology has been installed.
    pub fn has_topology(&self) -> bool {
        self.lock().neighbors.is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Value set
    // ─────────────────────────────────────────────────────────────────────────

    /// Add one value. Returns true if it was new.
    pub fn add(&self, value: Value) -> bool {
        self.lock().store.add(value)
    }

    /// Merge a batch. Returns how many values were new.
    pub fn add_all<I>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = Value>,
    {
        self.lock().store.add_all(values)
    }

    /// Copy of every known value.
    pub fn snapshot(&self) -> BTreeSet<Value> {
        self.lock().store.snapshot()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.lock().store.contains(value)
    }

    pub fn len(&self) -> usize {
        self.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().store.is_empty()
    }

    /// Length and digest of the value set, taken atomically.
    pub fn summary(&self) -> (usize, SetDigest) {
        let inner = self.lock();
        (inner.store.len(), inner.store.digest())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ledger
    // ─────────────────────────────────────────────────────────────────────────

    /// Anti-entropy diff for one neighbor.
    pub fn diff(&self, neighbor: &NodeId) -> Result<BTreeSet<Value>> {
        let inner = self.lock();
        inner.ledger.diff(neighbor, &inner.store)
    }

    /// Non-empty diffs for every installed neighbor, in installed order.
    ///
    /// All diffs are computed under one lock acquisition, so they reflect
    /// a single point in time.
    pub fn pending_diffs(&self) -> Result<Vec<PendingDiff>> {
        let inner = self.lock();
        let Some(neighbors) = &inner.neighbors else {
            return Ok(Vec::new());
        };

        let mut pending = Vec::new();
        for neighbor in neighbors {
            let values = inner.ledger.diff(neighbor, &inner.store)?;
            if !values.is_empty() {
                pending.push(PendingDiff {
                    neighbor: neighbor.clone(),
                    values,
                });
            }
        }
        Ok(pending)
    }

    /// Record values confirmed by `neighbor`. Returns how many were new.
    pub fn acknowledge<I>(&self, neighbor: &NodeId, values: I) -> Result<usize>
    where
        I: IntoIterator<Item = Value>,
    {
        self.lock().ledger.mark_acknowledged(neighbor, values)
    }

    /// Copy of what `neighbor` is believed to hold.
    pub fn acknowledged(&self, neighbor: &NodeId) -> Result<BTreeSet<Value>> {
        self.lock().ledger.acknowledged(neighbor).cloned()
    }
}

impl std::fmt::Debug for GossipState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("GossipState")
            .field("node_id", &self.node_id)
            .field("values", &inner.store.len())
            .field("neighbors", &inner.neighbors)
            .finish()
    }
}
