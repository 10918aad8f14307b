//! NeighborLedger: what each neighbor is believed to already hold.
//!
//! The ledger is a belief, not ground truth. A lost acknowledgment makes it
//! understate the neighbor's set, which only costs a redundant resend.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CoreError, Result};
use crate::types::{NodeId, Value};
use crate::value_store::ValueStore;

/// Per-neighbor acknowledged value sets.
#[derive(Debug, Clone, Default)]
pub struct NeighborLedger {
    acked: BTreeMap<NodeId, BTreeSet<Value>>,
}

impl NeighborLedger {
    /// Create an empty ledger with no neighbors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a neighbor. Existing entries are left untouched.
    pub fn register(&mut self, neighbor: NodeId) {
        self.acked.entry(neighbor).or_default();
    }

    /// Whether `neighbor` has an entry.
    pub fn is_registered(&self, neighbor: &NodeId) -> bool {
        self.acked.contains_key(neighbor)
    }

    /// Declared neighbors, in name order.
    pub fn neighbors(&self) -> impl Iterator<Item = &NodeId> {
        self.acked.keys()
    }

    /// Values `neighbor` is believed to hold.
    pub fn acknowledged(&self, neighbor: &NodeId) -> Result<&BTreeSet<Value>> {
        self.acked
            .get(neighbor)
            .ok_or_else(|| CoreError::UnknownNeighbor(neighbor.clone()))
    }

    /// The anti-entropy diff: values in `store` not yet acknowledged by
    /// `neighbor`.
    pub fn diff(&self, neighbor: &NodeId, store: &ValueStore) -> Result<BTreeSet<Value>> {
        let acked = self.acknowledged(neighbor)?;
        Ok(store.values().difference(acked).copied().collect())
    }

    /// Record that `neighbor` confirmed `values`.
    ///
    /// Idempotent. Returns how many values were newly recorded.
    pub fn mark_acknowledged<I>(&mut self, neighbor: &NodeId, values: I) -> Result<usize>
    where
        I: IntoIterator<Item = Value>,
    {
        let acked = self
            .acked
            .get_mut(neighbor)
            .ok_or_else(|| CoreError::UnknownNeighbor(neighbor.clone()))?;
        Ok(values.into_iter().filter(|value| acked.insert(*value)).count())
    }
}
