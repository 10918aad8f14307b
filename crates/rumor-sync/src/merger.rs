//! InboundMerger: where new values enter a node.
//!
//! Client broadcasts and peer gossip both land here. Whenever the local
//! set grows, a propagation round is requested; the caller's reply never
//! waits for that round.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use rumor_core::{GossipState, NodeId, TopologyTable, Value};

use crate::error::Result;
use crate::propagator::PropagationTrigger;

/// Result of merging a peer's gossip batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Values that were not known before.
    pub added: usize,
    /// What to acknowledge to the sender: the whole batch as received.
    pub acknowledged: Vec<Value>,
}

/// Entry points for inbound values.
#[derive(Debug, Clone)]
pub struct InboundMerger {
    state: Arc<GossipState>,
    trigger: PropagationTrigger,
}

impl InboundMerger {
    pub fn new(state: Arc<GossipState>, trigger: PropagationTrigger) -> Self {
        Self { state, trigger }
    }

    /// Accept a value from a client.
    ///
    /// Always requests propagation, even for a value already known: a
    /// client re-submitting is a cheap nudge for any stranded diff.
    /// Returns whether the value was new.
    pub fn submit(&self, value: Value) -> bool {
        let added = self.state.add(value);
        debug!(node = %self.state.node_id(), %value, added, "client broadcast");
        self.trigger.trigger();
        added
    }

    /// Merge a batch gossiped by `from`.
    ///
    /// Requests propagation only if something was new, so already-known
    /// data is not re-gossiped. The whole batch is acknowledged, duplicates
    /// included; acknowledging a value twice is harmless to the sender.
    pub fn receive(&self, from: &NodeId, batch: Vec<Value>) -> MergeOutcome {
        let added = self.state.add_all(batch.iter().copied());
        debug!(node = %self.state.node_id(), %from, received = batch.len(), added, "gossip merged");
        if added > 0 {
            self.trigger.trigger();
        }
        MergeOutcome {
            added,
            acknowledged: batch,
        }
    }

    /// Every value this node knows.
    pub fn read(&self) -> BTreeSet<Value> {
        self.state.snapshot()
    }

    /// Install this node's neighbors.
    ///
    /// Values accepted before the topology arrived are pushed right away.
    pub fn install_topology(&self, topology: &TopologyTable) -> Result<Vec<NodeId>> {
        let neighbors = self.state.install_topology(topology)?;
        if !self.state.is_empty() {
            self.trigger.trigger();
        }
        Ok(neighbors)
    }

    pub fn state(&self) -> &Arc<GossipState> {
        &self.state
    }
}
