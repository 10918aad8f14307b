//! Proptest generators for property-based testing.

use proptest::prelude::*;
use proptest::sample::Index;

use rumor_core::{NodeId, TopologyTable, Value};

use crate::topologies::node_ids;

/// Generate any value.
pub fn value() -> impl Strategy<Value = Value> {
    any::<i64>().prop_map(Value)
}

/// Generate a value from a small range, so batches overlap often.
pub fn small_value() -> impl Strategy<Value = Value> {
    (-50i64..50).prop_map(Value)
}

/// Generate a batch of up to `max_len` values, duplicates allowed.
pub fn value_batch(max_len: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(small_value(), 0..=max_len)
}

/// Generate a node ID of the `nN` form.
pub fn node_id() -> impl Strategy<Value = NodeId> {
    (1u32..1000).prop_map(|i| NodeId::new(format!("n{}", i)))
}

/// Generate a connected, undirected topology of `1..=max_nodes` nodes.
///
/// Built as a random spanning tree plus a few random extra edges.
pub fn connected_topology(max_nodes: usize) -> impl Strategy<Value = TopologyTable> {
    (1..=max_nodes.max(1))
        .prop_flat_map(|n| {
            (
                Just(n),
                prop::collection::vec(any::<Index>(), n - 1),
                prop::collection::vec((any::<Index>(), any::<Index>()), 0..=n),
            )
        })
        .prop_map(|(n, parents, extra)| {
            let ids = node_ids(n);
            let mut table = TopologyTable::new();
            for id in &ids {
                table.insert(id.clone(), Vec::new());
            }
            for (i, parent) in parents.iter().enumerate() {
                let child = i + 1;
                table.connect(&ids[child], &ids[parent.index(child)]);
            }
            for (a, b) in extra {
                let (a, b) = (a.index(n), b.index(n));
                if a != b {
                    table.connect(&ids[a], &ids[b]);
                }
            }
            table
        })
}

/// A topology plus client submissions to run against it.
#[derive(Debug, Clone)]
pub struct Workload {
    pub topology: TopologyTable,
    /// `(node, value)` pairs, in submission order.
    pub submissions: Vec<(NodeId, Value)>,
}

impl Arbitrary for Workload {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        connected_topology(8)
            .prop_flat_map(|topology| {
                let ids: Vec<NodeId> = topology.nodes().into_iter().collect();
                let submission = (prop::sample::select(ids), small_value());
                (Just(topology), prop::collection::vec(submission, 0..24))
            })
            .prop_map(|(topology, submissions)| Workload {
                topology,
                submissions,
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_topologies_are_connected(topology in connected_topology(12)) {
            prop_assert!(topology.is_connected());
            for (node, neighbors) in topology.iter() {
                prop_assert!(!neighbors.contains(node));
            }
        }

        #[test]
        fn workloads_submit_to_known_nodes(workload: Workload) {
            let nodes = workload.topology.nodes();
            for (node, _) in &workload.submissions {
                prop_assert!(nodes.contains(node));
            }
        }
    }
}
