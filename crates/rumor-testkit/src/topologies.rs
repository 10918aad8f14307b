//! Topology builders.
//!
//! Every builder names its nodes `n1..=nN` and returns an undirected
//! table: if `a` lists `b`, `b` lists `a`. Every node appears as a key,
//! even a lone node with no neighbors.

use rumor_core::{NodeId, TopologyTable};

/// IDs `n1..=nN`.
pub fn node_ids(n: usize) -> Vec<NodeId> {
    (1..=n).map(|i| NodeId::new(format!("n{}", i))).collect()
}

fn empty(ids: &[NodeId]) -> TopologyTable {
    let mut table = TopologyTable::new();
    for id in ids {
        table.insert(id.clone(), Vec::new());
    }
    table
}

/// `n1 - n2 - ... - nN`.
pub fn line(n: usize) -> TopologyTable {
    let ids = node_ids(n);
    let mut table = empty(&ids);
    for pair in ids.windows(2) {
        table.connect(&pair[0], &pair[1]);
    }
    table
}

/// A line closed back onto `n1`.
pub fn ring(n: usize) -> TopologyTable {
    let mut table = line(n);
    if n > 2 {
        table.connect(&NodeId::new(format!("n{}", n)), &NodeId::from("n1"));
    }
    table
}

/// `n1` in the middle, everything else a leaf.
pub fn star(n: usize) -> TopologyTable {
    let ids = node_ids(n);
    let mut table = empty(&ids);
    if let Some((hub, leaves)) = ids.split_first() {
        for leaf in leaves {
            table.connect(hub, leaf);
        }
    }
    table
}

/// A tree rooted at `n1` where each node has up to `fanout` children,
/// filled breadth first.
pub fn tree(n: usize, fanout: usize) -> TopologyTable {
    let ids = node_ids(n);
    let mut table = empty(&ids);
    let fanout = fanout.max(1);
    for (i, child) in ids.iter().enumerate().skip(1) {
        let parent = (i - 1) / fanout;
        table.connect(&ids[parent], child);
    }
    table
}

/// Every node connected to every other.
pub fn full_mesh(n: usize) -> TopologyTable {
    let ids = node_ids(n);
    let mut table = empty(&ids);
    for (i, a) in ids.iter().enumerate() {
        for b in &ids[i + 1..] {
            table.connect(a, b);
        }
    }
    table
}

/// A `rows` by `cols` grid, numbered row by row.
pub fn grid(rows: usize, cols: usize) -> TopologyTable {
    let ids = node_ids(rows * cols);
    let mut table = empty(&ids);
    for r in 0..rows {
        for c in 0..cols {
            let here = &ids[r * cols + c];
            if c + 1 < cols {
                table.connect(here, &ids[r * cols + c + 1]);
            }
            if r + 1 < rows {
                table.connect(here, &ids[(r + 1) * cols + c]);
            }
        }
    }
    table
}
