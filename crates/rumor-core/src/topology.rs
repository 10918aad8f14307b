//! TopologyTable: who gossips with whom.
//!
//! The table is handed to every node once at cluster setup. It is not
//! necessarily symmetric and not necessarily a full mesh.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{CoreError, Result};
use crate::types::NodeId;

/// Static adjacency list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopologyTable {
    adjacency: BTreeMap<NodeId, Vec<NodeId>>,
}

impl TopologyTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an adjacency map.
    pub fn from_map(adjacency: BTreeMap<NodeId, Vec<NodeId>>) -> Self {
        Self { adjacency }
    }

    /// Set the neighbor list of `node`, replacing any previous list.
    pub fn insert(&mut self, node: NodeId, neighbors: Vec<NodeId>) {
        self.adjacency.insert(node, neighbors);
    }

    /// Add an undirected edge (both directions, no duplicates).
    pub fn connect(&mut self, a: &NodeId, b: &NodeId) {
        for (from, to) in [(a, b), (b, a)] {
            let list = self.adjacency.entry(from.clone()).or_default();
            if !list.contains(to) {
                list.push(to.clone());
            }
        }
    }

    /// Raw neighbor list of `node`, if the table mentions it.
    pub fn neighbors_of(&self, node: &NodeId) -> Option<&[NodeId]> {
        self.adjacency.get(node).map(Vec::as_slice)
    }

    /// Neighbor list of `node` with self-loops and duplicates removed,
    /// in first-seen order.
    pub fn gossip_neighbors(&self, node: &NodeId) -> Result<Vec<NodeId>> {
        let raw = self
            .neighbors_of(node)
            .ok_or_else(|| CoreError::NodeNotInTopology(node.clone()))?;

        let mut seen = BTreeSet::new();
        Ok(raw
            .iter()
            .filter(|peer| *peer != node && seen.insert((*peer).clone()))
            .cloned()
            .collect())
    }

    /// Every node named in the table, as a key or as a neighbor.
    pub fn nodes(&self) -> BTreeSet<NodeId> {
        self.adjacency
            .iter()
            .flat_map(|(node, neighbors)| std::iter::once(node).chain(neighbors.iter()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    /// Whether every node can reach every other node.
    ///
    /// Edges are treated as undirected: a gossip push to a neighbor is
    /// answered on the same link, and the neighbor re-gossips onward.
    pub fn is_connected(&self) -> bool {
        let nodes = self.nodes();
        let Some(start) = nodes.iter().next() else {
            return true;
        };

        let mut undirected: BTreeMap<&NodeId, BTreeSet<&NodeId>> = BTreeMap::new();
        for (node, neighbors) in &self.adjacency {
            for peer in neighbors {
                undirected.entry(node).or_default().insert(peer);
                undirected.entry(peer).or_default().insert(node);
            }
        }

        let mut visited = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for peer in undirected.get(node).into_iter().flatten() {
                if visited.insert(*peer) {
                    queue.push_back(*peer);
                }
            }
        }

        visited.len() == nodes.len()
    }

    /// Iterate over `(node, neighbors)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &[NodeId])> {
        self.adjacency
            .iter()
            .map(|(node, neighbors)| (node, neighbors.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|name| NodeId::from(*name)).collect()
    }

    #[test]
    fn test_gossip_neighbors_strip_self_and_duplicates() {
        let mut table = TopologyTable::new();
        table.insert(NodeId::from("n1"), ids(&["n2", "n1", "n3", "n2"]));

        let neighbors = table.gossip_neighbors(&NodeId::from("n1")).unwrap();
        assert_eq!(neighbors, ids(&["n2", "n3"]));
    }

    #[test]
    fn test_missing_node_is_an_error() {
        let table = TopologyTable::new();
        assert!(matches!(
            table.gossip_neighbors(&NodeId::from("n1")),
            Err(CoreError::NodeNotInTopology(_))
        ));
    }

    #[test]
    fn test_connectivity() {
        let mut table = TopologyTable::new();
        table.connect(&NodeId::from("n1"), &NodeId::from("n2"));
        table.connect(&NodeId::from("n2"), &NodeId::from("n3"));
        assert!(table.is_connected());

        table.insert(NodeId::from("n4"), Vec::new());
        assert!(!table.is_connected());
    }

    #[test]
    fn test_directed_edges_count_as_links() {
        let mut table = TopologyTable::new();
        table.insert(NodeId::from("n1"), ids(&["n2"]));
        table.insert(NodeId::from("n2"), Vec::new());
        assert!(table.is_connected());
    }

    #[test]
    fn test_deserializes_from_wire_shape() {
        let json = r#"{"n1":["n2","n3"],"n2":["n1"],"n3":["n1"]}"#;
        let table: TopologyTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.neighbors_of(&NodeId::from("n1")).unwrap(), ids(&["n2", "n3"]));
        assert_eq!(table.nodes().len(), 3);
    }
}
