//! Propagator: pushes anti-entropy diffs to neighbors.
//!
//! A round computes every neighbor's diff under the state lock, releases
//! it, then pushes to all neighbors concurrently. A neighbor whose push
//! fails keeps its ledger entry unchanged, so the same values come up
//! again in its next diff. There is no retry inside a round.
//!
//! Only one push per neighbor is in flight at a time. A neighbor still
//! waiting on a slow push is passed over, so it never delays the others.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::task::{self, JoinError, JoinHandle, JoinSet};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, warn};

use rumor_core::{CoreError, GossipState, NodeId, PendingDiff, Value};

use crate::config::GossipConfig;
use crate::error::{Result, SyncError};
use crate::messages::Body;
use crate::transport::Transport;

/// Result of one propagation round.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PropagationReport {
    /// Neighbors that had a non-empty diff and were pushed to.
    pub contacted: usize,
    /// Neighbors with nothing to send, or with a push already running.
    pub skipped: usize,
    /// Values delivered and acknowledged, summed over neighbors.
    pub values_sent: usize,
    /// Ledger entries newly recorded from acknowledgments.
    pub acknowledged: usize,
    /// Neighbors whose push failed, with the reason.
    pub failures: Vec<(NodeId, String)>,
}

impl PropagationReport {
    /// Whether every contacted neighbor acknowledged its whole diff.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of pushing one neighbor's diff.
#[derive(Debug, Default)]
struct PushOutcome {
    sent: usize,
    acknowledged: usize,
}

/// Handle used to request a propagation round.
///
/// Requests coalesce: any number of triggers before the worker wakes up
/// produce one round.
#[derive(Debug, Clone, Default)]
pub struct PropagationTrigger {
    wake: Arc<Notify>,
}

impl PropagationTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a round. Never blocks.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Wait until a round has been asked for.
    pub async fn wait(&self) {
        self.wake.notified().await;
    }
}

/// Neighbors with a push in progress, shared by every clone of a
/// propagator. At most one push per neighbor runs at a time.
#[derive(Debug, Clone, Default)]
struct InFlight {
    neighbors: Arc<Mutex<HashSet<NodeId>>>,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashSet<NodeId>> {
        self.neighbors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `neighbor`, or `None` if a push to it is already running.
    fn claim(&self, neighbor: &NodeId) -> Option<Claim> {
        if !self.lock().insert(neighbor.clone()) {
            return None;
        }
        Some(Claim {
            in_flight: self.clone(),
            neighbor: neighbor.clone(),
        })
    }
}

/// Released on drop, so a push task that panics frees its neighbor too.
struct Claim {
    in_flight: InFlight,
    neighbor: NodeId,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.neighbor);
    }
}

type Joined = std::result::Result<Result<PushOutcome>, JoinError>;

/// Push tasks, each tagged with the neighbor it serves.
struct Pushes {
    tasks: JoinSet<Result<PushOutcome>>,
    targets: HashMap<task::Id, NodeId>,
}

impl Pushes {
    fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            targets: HashMap::new(),
        }
    }

    fn spawn<T: Transport + 'static>(
        &mut self,
        propagator: &Propagator<T>,
        diff: PendingDiff,
        claim: Claim,
    ) {
        let this = propagator.clone();
        let neighbor = diff.neighbor.clone();
        let handle = self.tasks.spawn(async move {
            let result = this.push(diff).await;
            drop(claim);
            result
        });
        self.targets.insert(handle.id(), neighbor);
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the next push to finish. A task that panicked still
    /// reports its neighbor.
    async fn join_next(&mut self) -> Option<(NodeId, Joined)> {
        let (id, joined) = match self.tasks.join_next_with_id().await? {
            Ok((id, result)) => (id, Ok(result)),
            Err(e) => (e.id(), Err(e)),
        };
        let neighbor = self.targets.remove(&id)?;
        Some((neighbor, joined))
    }
}

/// Pushes diffs from one node's [`GossipState`] to its neighbors.
pub struct Propagator<T: Transport> {
    state: Arc<GossipState>,
    transport: Arc<T>,
    config: GossipConfig,
    trigger: PropagationTrigger,
    in_flight: InFlight,
}

impl<T: Transport> Clone for Propagator<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            trigger: self.trigger.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<T: Transport + 'static> Propagator<T> {
    /// Create a propagator.
    pub fn new(state: Arc<GossipState>, transport: Arc<T>, config: GossipConfig) -> Self {
        Self {
            state,
            transport,
            config,
            trigger: PropagationTrigger::new(),
            in_flight: InFlight::default(),
        }
    }

    /// The handle that wakes this propagator's worker.
    pub fn trigger(&self) -> PropagationTrigger {
        self.trigger.clone()
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Run one round: push every non-empty diff, concurrently, and wait
    /// for all of them.
    ///
    /// Neighbors that already have a push running are counted as skipped.
    /// Push failures are collected in the report, not returned as errors.
    /// An error means local state is inconsistent.
    pub async fn propagate(&self) -> Result<PropagationReport> {
        let neighbors = self.state.neighbors().len();
        let mut pushes = Pushes::new();
        self.start_pushes(&mut pushes)?;

        let mut report = PropagationReport {
            contacted: pushes.len(),
            skipped: neighbors.saturating_sub(pushes.len()),
            ..PropagationReport::default()
        };
        if pushes.is_empty() {
            return Ok(report);
        }

        let mut invariant_violation = None;
        while let Some((neighbor, joined)) = pushes.join_next().await {
            if let Some(e) = self.record(&mut report, neighbor, joined) {
                invariant_violation = Some(e);
            }
        }

        if let Some(e) = invariant_violation {
            return Err(SyncError::Core(e));
        }

        debug!(
            node = %self.state.node_id(),
            contacted = report.contacted,
            skipped = report.skipped,
            values_sent = report.values_sent,
            failed = report.failures.len(),
            "propagation round finished"
        );
        Ok(report)
    }

    /// Spawn a push for every neighbor with a non-empty diff and no push
    /// already running. Returns without waiting for them.
    fn start_pushes(&self, pushes: &mut Pushes) -> Result<()> {
        for diff in self.state.pending_diffs()? {
            match self.in_flight.claim(&diff.neighbor) {
                Some(claim) => pushes.spawn(self, diff, claim),
                None => {
                    debug!(node = %self.state.node_id(), neighbor = %diff.neighbor, "push still in flight");
                }
            }
        }
        Ok(())
    }

    /// Fold one finished push into `report`. Returns the core error if the
    /// push found local state inconsistent.
    fn record(
        &self,
        report: &mut PropagationReport,
        neighbor: NodeId,
        joined: Joined,
    ) -> Option<CoreError> {
        match joined {
            Ok(Ok(outcome)) => {
                report.values_sent += outcome.sent;
                report.acknowledged += outcome.acknowledged;
                None
            }
            Ok(Err(SyncError::Core(e))) => {
                error!(node = %self.state.node_id(), %neighbor, "ledger update failed: {}", e);
                report.failures.push((neighbor, e.to_string()));
                Some(e)
            }
            Ok(Err(e)) => {
                warn!(node = %self.state.node_id(), %neighbor, "gossip push failed: {}", e);
                report.failures.push((neighbor, e.to_string()));
                None
            }
            Err(e) => {
                error!(node = %self.state.node_id(), %neighbor, "gossip push task died: {}", e);
                report.failures.push((neighbor, format!("push task died: {}", e)));
                None
            }
        }
    }

    /// Push one neighbor's diff, a chunk at a time.
    ///
    /// Each chunk is acknowledged on its own; the first failure stops the
    /// rest, leaving them for a later round.
    async fn push(&self, diff: PendingDiff) -> Result<PushOutcome> {
        let PendingDiff { neighbor, values } = diff;
        let values: Vec<Value> = values.into_iter().collect();
        let mut outcome = PushOutcome::default();

        for chunk in values.chunks(self.config.max_batch_size.max(1)) {
            debug!(node = %self.state.node_id(), %neighbor, count = chunk.len(), "pushing gossip");

            let reply = self
                .transport
                .rpc(
                    &neighbor,
                    Body::Gossip {
                        values: chunk.to_vec(),
                    },
                    self.config.rpc_timeout,
                )
                .await?;

            match reply {
                Body::GossipOk { acknowledged } => {
                    outcome.acknowledged += self.state.acknowledge(&neighbor, acknowledged)?;
                    outcome.sent += chunk.len();
                }
                Body::Error { code, text } => {
                    return Err(SyncError::PeerError {
                        code,
                        message: text,
                    });
                }
                other => {
                    return Err(SyncError::InvalidMessage(format!(
                        "expected gossip_ok from {}, got {}",
                        neighbor,
                        other.kind()
                    )));
                }
            }
        }

        Ok(outcome)
    }

    /// Spawn the background worker.
    ///
    /// The worker starts pushes whenever the trigger fires and, if
    /// `sync_interval` is set, on every tick of that interval so that
    /// values stranded by a failed push are retried even when nothing new
    /// arrives. It never waits on a push before starting others: a
    /// neighbor with a push still running is simply passed over until that
    /// push finishes. Abort the returned handle to stop the worker and
    /// every push it started.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = self.config.sync_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut pushes = Pushes::new();

        loop {
            tokio::select! {
                _ = self.trigger.wait() => {}
                _ = tick(&mut ticker) => {}
                Some((neighbor, joined)) = pushes.join_next(), if !pushes.is_empty() => {
                    let mut report = PropagationReport::default();
                    self.record(&mut report, neighbor.clone(), joined);
                    // Values that arrived while this push ran were passed
                    // over for this neighbor. A failed push waits for the
                    // next tick or trigger instead.
                    if !report.is_complete() || !self.has_pending(&neighbor) {
                        continue;
                    }
                }
            }

            if let Err(e) = self.start_pushes(&mut pushes) {
                error!(node = %self.state.node_id(), "propagation round aborted: {}", e);
            }
        }
    }

    fn has_pending(&self, neighbor: &NodeId) -> bool {
        matches!(self.state.diff(neighbor), Ok(rest) if !rest.is_empty())
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Envelope, ErrorCode};
    use crate::transport::memory::{MemoryNetwork, MemoryTransport};
    use rumor_core::TopologyTable;
    use std::time::Duration;

    fn id(name: &str) -> NodeId {
        NodeId::from(name)
    }

    fn config() -> GossipConfig {
        GossipConfig {
            rpc_timeout: Duration::from_millis(50),
            sync_interval: None,
            max_batch_size: 2,
        }
    }

    fn star(center: &str, leaves: &[&str]) -> TopologyTable {
        let mut table = TopologyTable::new();
        for leaf in leaves {
            table.connect(&id(center), &id(leaf));
        }
        table
    }

    /// Answer every gossip request with a full acknowledgment.
    fn echo_peer(transport: MemoryTransport) -> JoinHandle<Vec<Value>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Ok(request) = transport.recv().await {
                if let Body::Gossip { values } = request.body.body.clone() {
                    seen.extend(values.iter().copied());
                    transport
                        .reply(&request, Body::GossipOk { acknowledged: values })
                        .await
                        .unwrap();
                }
            }
            seen
        })
    }

    async fn propagator_for(
        network: &Arc<MemoryNetwork>,
        node: &str,
        topology: &TopologyTable,
    ) -> (Arc<GossipState>, Propagator<MemoryTransport>) {
        let state = Arc::new(GossipState::new(id(node)));
        state.install_topology(topology).unwrap();
        let transport = Arc::new(network.create_transport(id(node)).await);
        let propagator = Propagator::new(Arc::clone(&state), transport, config());
        (state, propagator)
    }

    #[tokio::test]
    async fn test_round_pushes_and_acknowledges() {
        let network = MemoryNetwork::new();
        let topology = star("n1", &["n2"]);
        let (state, propagator) = propagator_for(&network, "n1", &topology).await;
        let _peer = echo_peer(network.create_transport(id("n2")).await);

        state.add(Value(5));
        let report = propagator.propagate().await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.contacted, 1);
        assert_eq!(report.values_sent, 1);
        assert!(state.acknowledged(&id("n2")).unwrap().contains(&Value(5)));
    }

    #[tokio::test]
    async fn test_fixpoint_sends_nothing() {
        let network = MemoryNetwork::new();
        let topology = star("n1", &["n2"]);
        let (state, propagator) = propagator_for(&network, "n1", &topology).await;
        let _peer = echo_peer(network.create_transport(id("n2")).await);

        state.add(Value(1));
        propagator.propagate().await.unwrap();
        let report = propagator.propagate().await.unwrap();

        assert_eq!(report.contacted, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.values_sent, 0);
    }

    #[tokio::test]
    async fn test_large_diff_is_chunked() {
        let network = MemoryNetwork::new();
        let topology = star("n1", &["n2"]);
        let (state, propagator) = propagator_for(&network, "n1", &topology).await;
        let peer = echo_peer(network.create_transport(id("n2")).await);

        state.add_all((1..=5).map(Value));
        let report = propagator.propagate().await.unwrap();
        assert_eq!(report.values_sent, 5);
        assert_eq!(state.acknowledged(&id("n2")).unwrap().len(), 5);
        peer.abort();
    }

    #[tokio::test]
    async fn test_timeout_leaves_ledger_unchanged() {
        let network = MemoryNetwork::new();
        let topology = star("n1", &["n2"]);
        let (state, propagator) = propagator_for(&network, "n1", &topology).await;
        let _peer = echo_peer(network.create_transport(id("n2")).await);

        network.isolate(&id("n2"));
        state.add(Value(5));
        let report = propagator.propagate().await.unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.failures[0].0, id("n2"));
        assert!(state.diff(&id("n2")).unwrap().contains(&Value(5)));

        network.heal(&id("n2"));
        let report = propagator.propagate().await.unwrap();
        assert!(report.is_complete());
        assert!(state.diff(&id("n2")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_dead_neighbor_does_not_block_others() {
        let network = MemoryNetwork::new();
        let topology = star("n1", &["n2", "n3"]);
        let (state, propagator) = propagator_for(&network, "n1", &topology).await;
        let _n2 = echo_peer(network.create_transport(id("n2")).await);
        let _n3 = echo_peer(network.create_transport(id("n3")).await);

        network.isolate(&id("n2"));
        state.add(Value(8));
        let report = propagator.propagate().await.unwrap();

        assert_eq!(report.contacted, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(state.diff(&id("n3")).unwrap().is_empty());
        assert!(!state.diff(&id("n2")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_reply_is_a_failure() {
        let network = MemoryNetwork::new();
        let topology = star("n1", &["n2"]);
        let (state, propagator) = propagator_for(&network, "n1", &topology).await;
        let peer = network.create_transport(id("n2")).await;
        tokio::spawn(async move {
            while let Ok(request) = peer.recv().await {
                peer.reply(&request, Body::error(ErrorCode::Crash, "boom"))
                    .await
                    .unwrap();
            }
        });

        state.add(Value(1));
        let report = propagator.propagate().await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(state.acknowledged(&id("n2")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_runs_on_trigger() {
        let network = MemoryNetwork::new();
        let topology = star("n1", &["n2"]);
        let (state, propagator) = propagator_for(&network, "n1", &topology).await;
        let _peer = echo_peer(network.create_transport(id("n2")).await);

        let trigger = propagator.trigger();
        let worker = propagator.spawn();

        state.add(Value(3));
        trigger.trigger();

        let acked = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if state.diff(&id("n2")).unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(acked.is_ok());
        worker.abort();
    }
    #[tokio::test]
    async fn test_isolated_neighbor_does_not_delay_later_values() {
        let network = MemoryNetwork::new();
        let topology = star("n1", &["n2", "n3"]);
        let state = Arc::new(GossipState::new(id("n1")));
        state.install_topology(&topology).unwrap();
        let transport = Arc::new(network.create_transport(id("n1")).await);
        let config = GossipConfig {
            rpc_timeout: Duration::from_secs(1),
            ..config()
        };
        let propagator = Propagator::new(Arc::clone(&state), transport, config);
        let _n2 = echo_peer(network.create_transport(id("n2")).await);
        let _n3 = echo_peer(network.create_transport(id("n3")).await);
        network.isolate(&id("n2"));

        let trigger = propagator.trigger();
        let worker = propagator.spawn();

        state.add(Value(1));
        trigger.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        state.add(Value(2));
        trigger.trigger();

        // Well under the 1s timeout still pending on n2.
        let acked = tokio::time::timeout(Duration::from_millis(300), async {
            while !state.acknowledged(&id("n3")).unwrap().contains(&Value(2)) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(acked.is_ok(), "n3 waited behind the isolated n2");
        assert!(state.acknowledged(&id("n2")).unwrap().is_empty());
        worker.abort();
    }

    #[tokio::test]
    async fn test_round_passes_over_neighbor_with_push_in_flight() {
        let network = MemoryNetwork::new();
        let topology = star("n1", &["n2"]);
        let (state, propagator) = propagator_for(&network, "n1", &topology).await;
        let _peer = echo_peer(network.create_transport(id("n2")).await);
        network.isolate(&id("n2"));

        state.add(Value(4));
        let slow = {
            let propagator = propagator.clone();
            tokio::spawn(async move { propagator.propagate().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = propagator.propagate().await.unwrap();
        assert_eq!(report.contacted, 0);
        assert_eq!(report.skipped, 1);

        let report = slow.await.unwrap().unwrap();
        assert_eq!(report.failures.len(), 1);

        network.heal(&id("n2"));
        let report = propagator.propagate().await.unwrap();
        assert_eq!(report.contacted, 1);
        assert!(report.is_complete());
    }

    struct PanickingTransport;

    #[async_trait::async_trait]
    impl Transport for PanickingTransport {
        fn local_node_id(&self) -> NodeId {
            id("n1")
        }

        async fn send(&self, _peer: &NodeId, _body: Body) -> Result<()> {
            Ok(())
        }

        async fn rpc(&self, peer: &NodeId, _body: Body, _timeout: Duration) -> Result<Body> {
            panic!("no route to {}", peer)
        }

        async fn reply(&self, _request: &Envelope, _body: Body) -> Result<()> {
            Ok(())
        }

        async fn recv(&self) -> Result<Envelope> {
            Err(SyncError::Closed)
        }
    }

    #[tokio::test]
    async fn test_panicked_push_is_a_failure() {
        let topology = star("n1", &["n2"]);
        let state = Arc::new(GossipState::new(id("n1")));
        state.install_topology(&topology).unwrap();
        let propagator = Propagator::new(Arc::clone(&state), Arc::new(PanickingTransport), config());

        state.add(Value(6));
        let report = propagator.propagate().await.unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, id("n2"));
        assert!(state.diff(&id("n2")).unwrap().contains(&Value(6)));

        // The neighbor is free for the next round.
        let report = propagator.propagate().await.unwrap();
        assert_eq!(report.contacted, 1);
    }
}
