//! Test fixtures and helpers.
//!
//! A [`TestCluster`] runs real nodes, each with its own propagation
//! worker, on a shared in-memory network, and drives them through a client
//! endpoint the way a test harness drives separate processes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use rumor::{Node, NodeConfig};
use rumor_core::{GossipState, NodeId, TopologyTable, Value};
use rumor_sync::{
    verify_cluster, Body, ConvergenceResult, GossipConfig, MemoryNetwork, MemoryTransport,
    SyncError, Transport,
};

/// Client endpoint ID used by the fixture.
pub const CLIENT_ID: &str = "c1";

/// Timeout for fixture-issued client requests.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Gossip settings tuned for fast tests: short timeouts, frequent sync.
pub fn fast_config() -> NodeConfig {
    NodeConfig {
        gossip: GossipConfig {
            rpc_timeout: Duration::from_millis(100),
            sync_interval: Some(Duration::from_millis(25)),
            max_batch_size: 128,
        },
    }
}

/// A running cluster on an in-memory network.
pub struct TestCluster {
    network: Arc<MemoryNetwork>,
    client: MemoryTransport,
    nodes: BTreeMap<NodeId, Arc<Node<MemoryTransport>>>,
    tasks: Vec<JoinHandle<rumor::Result<()>>>,
}

impl TestCluster {
    /// Start a node for every ID, without installing any topology.
    pub async fn with_nodes<I>(ids: I, config: NodeConfig) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        let network = MemoryNetwork::new();
        let client = network.create_transport(NodeId::from(CLIENT_ID)).await;

        let mut nodes = BTreeMap::new();
        let mut tasks = Vec::new();
        for id in ids {
            let transport = Arc::new(network.create_transport(id.clone()).await);
            let node = Arc::new(Node::new(transport, config.clone()));
            tasks.push(tokio::spawn(Arc::clone(&node).run()));
            nodes.insert(id, node);
        }

        Self {
            network,
            client,
            nodes,
            tasks,
        }
    }

    /// Start a node for every topology entry and install the topology.
    pub async fn start(topology: &TopologyTable, config: NodeConfig) -> Result<Self, SyncError> {
        let cluster = Self::with_nodes(topology.nodes(), config).await;
        cluster.install(topology).await?;
        Ok(cluster)
    }

    /// Send `topology` to every node.
    pub async fn install(&self, topology: &TopologyTable) -> Result<(), SyncError> {
        for id in self.nodes.keys() {
            let body = Body::Topology {
                topology: topology.clone(),
            };
            match self.call(id, body).await? {
                Body::TopologyOk => {}
                other => return Err(unexpected(id, other)),
            }
        }
        debug!(nodes = self.nodes.len(), "topology installed");
        Ok(())
    }

    /// Client broadcast of `value` to `node`.
    pub async fn broadcast(&self, node: &NodeId, value: Value) -> Result<(), SyncError> {
        match self.call(node, Body::Broadcast { value }).await? {
            Body::BroadcastOk => Ok(()),
            other => Err(unexpected(node, other)),
        }
    }

    /// Client read from `node`.
    pub async fn read(&self, node: &NodeId) -> Result<BTreeSet<Value>, SyncError> {
        match self.call(node, Body::Read).await? {
            Body::ReadOk { values } => Ok(values.into_iter().collect()),
            other => Err(unexpected(node, other)),
        }
    }

    async fn call(&self, node: &NodeId, body: Body) -> Result<Body, SyncError> {
        self.client.rpc(node, body, CLIENT_TIMEOUT).await
    }

    pub fn network(&self) -> &Arc<MemoryNetwork> {
        &self.network
    }

    pub fn node(&self, id: &NodeId) -> Option<&Arc<Node<MemoryTransport>>> {
        self.nodes.get(id)
    }

    /// Gossip state of `id`, for direct inspection.
    pub fn state(&self, id: &NodeId) -> Option<&GossipState> {
        self.nodes.get(id).map(|node| node.state().as_ref())
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// Drop all traffic to and from `node`.
    pub fn isolate(&self, node: &NodeId) {
        self.network.isolate(node);
    }

    /// Reconnect `node`.
    pub fn heal(&self, node: &NodeId) {
        self.network.heal(node);
    }

    /// Whether every node holds the same set.
    pub fn convergence(&self) -> ConvergenceResult {
        verify_cluster(self.nodes.values().map(|node| node.state().as_ref()))
    }

    /// Poll until every node holds exactly `expected`.
    ///
    /// Returns false if that does not happen within `timeout`.
    pub async fn wait_converged(&self, expected: &BTreeSet<Value>, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let done = self
                .nodes
                .values()
                .all(|node| node.state().snapshot() == *expected);
            if done {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn unexpected(node: &NodeId, body: Body) -> SyncError {
    match body {
        Body::Error { code, text } => SyncError::PeerError {
            code,
            message: format!("{}: {}", node, text),
        },
        other => SyncError::InvalidMessage(format!("{} answered {}", node, other.kind())),
    }
}
