//! Deterministic round simulator.
//!
//! Runs the gossip state machine without a runtime or a network: each
//! round, every node computes its pending diffs, and each push and each
//! acknowledgment independently survives or is lost according to a seeded
//! RNG and a set of cut links. Same seed, same run.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use rumor_core::{GossipState, NodeId, Result, TopologyTable, Value};
use rumor_sync::{verify_cluster, ConvergenceResult};

/// Message statistics for a simulation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimStats {
    /// Rounds run so far.
    pub rounds: usize,
    /// Gossip pushes attempted.
    pub pushes: usize,
    /// Values carried by pushes.
    pub values_sent: usize,
    /// Pushes or acknowledgments lost.
    pub dropped: usize,
}

/// A cluster of gossip states advanced in lockstep rounds.
pub struct Simulation {
    nodes: BTreeMap<NodeId, GossipState>,
    rng: StdRng,
    /// Probability in `[0, 1]` that a push or an ack is lost.
    drop_rate: f64,
    /// Directed links that lose everything.
    cut: BTreeSet<(NodeId, NodeId)>,
    stats: SimStats,
}

impl Simulation {
    /// Create a node per topology entry and install the topology on each.
    pub fn new(topology: &TopologyTable, seed: u64) -> Result<Self> {
        let mut nodes = BTreeMap::new();
        for id in topology.nodes() {
            let state = GossipState::new(id.clone());
            state.install_topology(topology)?;
            nodes.insert(id, state);
        }

        Ok(Self {
            nodes,
            rng: StdRng::seed_from_u64(seed),
            drop_rate: 0.0,
            cut: BTreeSet::new(),
            stats: SimStats::default(),
        })
    }

    /// Lose each push and each ack with probability `rate`.
    pub fn with_drop_rate(mut self, rate: f64) -> Self {
        self.drop_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn set_drop_rate(&mut self, rate: f64) {
        self.drop_rate = rate.clamp(0.0, 1.0);
    }

    /// Lose everything between `a` and `b`, both directions.
    pub fn cut(&mut self, a: &NodeId, b: &NodeId) {
        self.cut.insert((a.clone(), b.clone()));
        self.cut.insert((b.clone(), a.clone()));
    }

    /// Lose everything to or from `node`.
    pub fn isolate(&mut self, node: &NodeId) {
        let peers: Vec<NodeId> = self.nodes.keys().filter(|id| *id != node).cloned().collect();
        for peer in &peers {
            self.cut(node, peer);
        }
    }

    /// Remove every cut link.
    pub fn heal(&mut self) {
        self.cut.clear();
    }

    /// Client submission to `node`. Returns whether the value was new,
    /// or `None` if the node does not exist.
    pub fn submit(&mut self, node: &NodeId, value: Value) -> Option<bool> {
        self.nodes.get(node).map(|state| state.add(value))
    }

    pub fn node(&self, id: &NodeId) -> Option<&GossipState> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GossipState> {
        self.nodes.values()
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Every value submitted anywhere and still held somewhere.
    pub fn union(&self) -> BTreeSet<Value> {
        self.nodes.values().flat_map(GossipState::snapshot).collect()
    }

    /// Whether every node holds the same set.
    pub fn convergence(&self) -> ConvergenceResult {
        verify_cluster(self.nodes.values())
    }

    /// Whether no node has anything left to send.
    pub fn is_quiescent(&self) -> Result<bool> {
        for state in self.nodes.values() {
            if !state.pending_diffs()?.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run one round. Returns the number of pushes attempted.
    ///
    /// Diffs are taken from the state at the start of the round, so values
    /// travel at most one hop per round.
    pub fn step(&mut self) -> Result<usize> {
        let mut pushes = Vec::new();
        for (id, state) in &self.nodes {
            for diff in state.pending_diffs()? {
                pushes.push((id.clone(), diff.neighbor, diff.values));
            }
        }

        self.stats.rounds += 1;
        for (from, to, values) in &pushes {
            self.stats.pushes += 1;
            self.stats.values_sent += values.len();

            if self.lost(from, to) {
                trace!(%from, %to, "push lost");
                self.stats.dropped += 1;
                continue;
            }
            if let Some(receiver) = self.nodes.get(to) {
                receiver.add_all(values.iter().copied());
            }

            if self.lost(to, from) {
                trace!(%from, %to, "ack lost");
                self.stats.dropped += 1;
                continue;
            }
            if let Some(sender) = self.nodes.get(from) {
                sender.acknowledge(to, values.iter().copied())?;
            }
        }

        Ok(pushes.len())
    }

    /// Step until no node has anything to send, up to `max_rounds`.
    ///
    /// Returns the number of rounds it took, or `None` if still active.
    pub fn run_until_quiescent(&mut self, max_rounds: usize) -> Result<Option<usize>> {
        for round in 0..=max_rounds {
            if self.is_quiescent()? {
                return Ok(Some(round));
            }
            if round < max_rounds {
                self.step()?;
            }
        }
        Ok(None)
    }

    fn lost(&mut self, from: &NodeId, to: &NodeId) -> bool {
        if self.cut.contains(&(from.clone(), to.clone())) {
            return true;
        }
        self.drop_rate > 0.0 && self.rng.gen_bool(self.drop_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topologies::{line, ring};

    fn id(name: &str) -> NodeId {
        NodeId::from(name)
    }

    #[test]
    fn test_line_converges_one_hop_per_round() {
        let mut sim = Simulation::new(&line(4), 1).unwrap();
        sim.submit(&id("n1"), Value(9));

        for round in 1..=3 {
            sim.step().unwrap();
            let far = id(&format!("n{}", round + 1));
            assert!(sim.node(&far).unwrap().contains(&Value(9)));
        }
        // n4 still owes n3 an echo of 9.
        assert_eq!(sim.run_until_quiescent(10).unwrap(), Some(1));
        assert!(sim.convergence().is_converged());
    }

    #[test]
    fn test_quiet_cluster_sends_nothing() {
        let mut sim = Simulation::new(&ring(5), 1).unwrap();
        assert!(sim.is_quiescent().unwrap());
        assert_eq!(sim.step().unwrap(), 0);
        assert_eq!(sim.stats().pushes, 0);
    }

    #[test]
    fn test_same_seed_same_run() {
        let run = |seed| {
            let mut sim = Simulation::new(&ring(6), seed).unwrap().with_drop_rate(0.4);
            sim.submit(&id("n1"), Value(1));
            sim.submit(&id("n4"), Value(2));
            sim.run_until_quiescent(500).unwrap();
            sim.stats()
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_cut_link_holds_values_in_diff() {
        let mut sim = Simulation::new(&line(2), 1).unwrap();
        sim.cut(&id("n1"), &id("n2"));
        sim.submit(&id("n1"), Value(5));

        assert_eq!(sim.run_until_quiescent(5).unwrap(), None);
        let a = sim.node(&id("n1")).unwrap();
        assert!(a.diff(&id("n2")).unwrap().contains(&Value(5)));

        sim.heal();
        assert!(sim.run_until_quiescent(5).unwrap().is_some());
        assert!(sim.node(&id("n2")).unwrap().contains(&Value(5)));
    }
}
