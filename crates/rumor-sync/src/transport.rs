//! Transport abstraction for gossip.
//!
//! The transport layer handles delivery and request/reply correlation.
//! The engine only needs three things from it: fire-and-forget send, a
//! request that awaits its correlated reply within a timeout, and a reply
//! to an inbound request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use rumor_core::NodeId;

use crate::error::{Result, SyncError};
use crate::messages::{Body, Envelope};

/// Transport trait for exchanging messages with peers and clients.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get the local node's identity.
    fn local_node_id(&self) -> NodeId;

    /// Send a message without waiting for any reply.
    async fn send(&self, peer: &NodeId, body: Body) -> Result<()>;

    /// Send a request and wait for its correlated reply.
    ///
    /// Returns `SyncError::Timeout` if no reply arrives within `timeout`.
    /// A late reply is discarded.
    async fn rpc(&self, peer: &NodeId, body: Body, timeout: Duration) -> Result<Body>;

    /// Reply to an inbound request.
    ///
    /// Requests sent without a `msg_id` expect no reply; replying to one
    /// is a no-op.
    async fn reply(&self, request: &Envelope, body: Body) -> Result<()>;

    /// Receive the next inbound request.
    ///
    /// Replies to our own RPCs are routed internally and never returned
    /// here. Returns `SyncError::Closed` once no more messages can arrive.
    async fn recv(&self) -> Result<Envelope>;
}

/// Outstanding RPCs awaiting replies, keyed by `msg_id`.
///
/// Shared by transport implementations so correlation works the same way
/// over every medium.
#[derive(Debug, Default)]
pub struct PendingReplies {
    next_msg_id: AtomicU64,
    waiting: Mutex<HashMap<u64, oneshot::Sender<Body>>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh `msg_id`. IDs start at 1.
    pub fn next_msg_id(&self) -> u64 {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Allocate a `msg_id` and a slot for its reply.
    pub fn register(&self) -> (u64, oneshot::Receiver<Body>) {
        let msg_id = self.next_msg_id();
        let (tx, rx) = oneshot::channel();
        self.lock().insert(msg_id, tx);
        (msg_id, rx)
    }

    /// Hand a reply to whoever is waiting on `in_reply_to`.
    ///
    /// Returns false if nobody is waiting (unknown ID, or already timed out).
    pub fn resolve(&self, in_reply_to: u64, body: Body) -> bool {
        match self.lock().remove(&in_reply_to) {
            Some(tx) => tx.send(body).is_ok(),
            None => false,
        }
    }

    /// Drop the slot for `msg_id` without resolving it.
    pub fn forget(&self, msg_id: u64) {
        self.lock().remove(&msg_id);
    }

    /// Number of RPCs still waiting.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the reply to `msg_id`, giving up after `timeout`.
    ///
    /// The slot is always released, whatever the outcome.
    pub async fn wait(
        &self,
        msg_id: u64,
        rx: oneshot::Receiver<Body>,
        peer: &NodeId,
        timeout: Duration,
    ) -> Result<Body> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => {
                self.forget(msg_id);
                Err(SyncError::TransportError(format!(
                    "reply slot for {} dropped",
                    peer
                )))
            }
            Err(_) => {
                self.forget(msg_id);
                Err(SyncError::Timeout(format!(
                    "no reply from {} to msg {} within {:?}",
                    peer, msg_id, timeout
                )))
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Body>>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An in-memory transport for tests and simulation.
///
/// Nodes share a [`MemoryNetwork`] that routes envelopes through channels.
/// Links can be cut, nodes isolated, and messages dropped at random to
/// exercise the engine's tolerance of loss.
pub mod memory {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, RwLock as StdRwLock};
    use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};

    use crate::messages::Payload;

    /// Routing entry for one attached node.
    struct Endpoint {
        inbox: mpsc::UnboundedSender<Envelope>,
        pending: Arc<PendingReplies>,
    }

    /// Fault-injection state.
    #[derive(Default)]
    struct Links {
        /// Nodes that can neither send nor receive.
        isolated: HashSet<NodeId>,
        /// Directed links that drop everything.
        cut: HashSet<(NodeId, NodeId)>,
        /// Probability in `[0, 1]` that any delivery is lost.
        drop_rate: f64,
    }

    /// Shared state for the memory transport network.
    pub struct MemoryNetwork {
        endpoints: RwLock<HashMap<NodeId, Endpoint>>,
        links: StdRwLock<Links>,
    }

    impl MemoryNetwork {
        /// Create a new, fully connected, lossless network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a transport attached to this network.
        ///
        /// Attaching the same ID twice replaces the earlier endpoint.
        pub async fn create_transport(self: &Arc<Self>, node_id: NodeId) -> MemoryTransport {
            let (tx, rx) = mpsc::unbounded_channel();
            let pending = Arc::new(PendingReplies::new());

            self.endpoints.write().await.insert(
                node_id.clone(),
                Endpoint {
                    inbox: tx,
                    pending: Arc::clone(&pending),
                },
            );

            MemoryTransport {
                node_id,
                network: Arc::clone(self),
                inbox: AsyncMutex::new(rx),
                pending,
            }
        }

        /// Drop every message to or from `node`.
        pub fn isolate(&self, node: &NodeId) {
            self.links_mut().isolated.insert(node.clone());
        }

        /// Undo [`isolate`](Self::isolate).
        pub fn heal(&self, node: &NodeId) {
            self.links_mut().isolated.remove(node);
        }

        /// Drop every message between `a` and `b`, both directions.
        pub fn cut(&self, a: &NodeId, b: &NodeId) {
            let mut links = self.links_mut();
            links.cut.insert((a.clone(), b.clone()));
            links.cut.insert((b.clone(), a.clone()));
        }

        /// Undo [`cut`](Self::cut).
        pub fn restore(&self, a: &NodeId, b: &NodeId) {
            let mut links = self.links_mut();
            links.cut.remove(&(a.clone(), b.clone()));
            links.cut.remove(&(b.clone(), a.clone()));
        }

        /// Remove every partition and stop random loss.
        pub fn heal_all(&self) {
            *self.links_mut() = Links::default();
        }

        /// Lose each delivery with probability `rate` (clamped to `[0, 1]`).
        pub fn set_drop_rate(&self, rate: f64) {
            self.links_mut().drop_rate = rate.clamp(0.0, 1.0);
        }

        fn links_mut(&self) -> std::sync::RwLockWriteGuard<'_, Links> {
            self.links.write().unwrap_or_else(PoisonError::into_inner)
        }

        fn should_drop(&self, from: &NodeId, to: &NodeId) -> bool {
            let links = self.links.read().unwrap_or_else(PoisonError::into_inner);
            if links.isolated.contains(from) || links.isolated.contains(to) {
                return true;
            }
            if links.cut.contains(&(from.clone(), to.clone())) {
                return true;
            }
            links.drop_rate > 0.0 && rand::Rng::gen_bool(&mut rand::thread_rng(), links.drop_rate)
        }

        /// Route one envelope.
        ///
        /// Lost messages vanish silently, as on a real network; only an
        /// unknown destination is reported.
        async fn deliver(&self, envelope: Envelope) -> Result<()> {
            let endpoints = self.endpoints.read().await;
            let endpoint = endpoints
                .get(&envelope.dest)
                .ok_or_else(|| SyncError::PeerNotConnected(envelope.dest.to_string()))?;

            if self.should_drop(&envelope.src, &envelope.dest) {
                tracing::trace!(
                    src = %envelope.src,
                    dest = %envelope.dest,
                    kind = envelope.body.body.kind(),
                    "message dropped"
                );
                return Ok(());
            }

            if let Some(in_reply_to) = envelope.body.in_reply_to {
                if !endpoint.pending.resolve(in_reply_to, envelope.body.body) {
                    tracing::debug!(dest = %envelope.dest, in_reply_to, "late or unsolicited reply discarded");
                }
                return Ok(());
            }

            endpoint
                .inbox
                .send(envelope)
                .map_err(|_| SyncError::TransportError("peer disconnected".into()))
        }
    }

    impl Default for MemoryNetwork {
        fn default() -> Self {
            Self {
                endpoints: RwLock::new(HashMap::new()),
                links: StdRwLock::new(Links::default()),
            }
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        node_id: NodeId,
        network: Arc<MemoryNetwork>,
        inbox: AsyncMutex<mpsc::UnboundedReceiver<Envelope>>,
        pending: Arc<PendingReplies>,
    }

    impl MemoryTransport {
        /// The network this transport is attached to.
        pub fn network(&self) -> &Arc<MemoryNetwork> {
            &self.network
        }

        /// RPCs still awaiting a reply.
        pub fn pending_rpcs(&self) -> usize {
            self.pending.len()
        }

        fn envelope(&self, dest: &NodeId, payload: Payload) -> Envelope {
            Envelope {
                src: self.node_id.clone(),
                dest: dest.clone(),
                body: payload,
            }
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        fn local_node_id(&self) -> NodeId {
            self.node_id.clone()
        }

        async fn send(&self, peer: &NodeId, body: Body) -> Result<()> {
            let envelope = self.envelope(peer, Payload::new(body));
            self.network.deliver(envelope).await
        }

        async fn rpc(&self, peer: &NodeId, body: Body, timeout: Duration) -> Result<Body> {
            let (msg_id, rx) = self.pending.register();
            let envelope = self.envelope(
                peer,
                Payload {
                    msg_id: Some(msg_id),
                    in_reply_to: None,
                    body,
                },
            );

            if let Err(e) = self.network.deliver(envelope).await {
                self.pending.forget(msg_id);
                return Err(e);
            }

            self.pending.wait(msg_id, rx, peer, timeout).await
        }

        async fn reply(&self, request: &Envelope, body: Body) -> Result<()> {
            let Some(in_reply_to) = request.body.msg_id else {
                tracing::trace!(to = %request.src, "request carried no msg_id; reply skipped");
                return Ok(());
            };
            let envelope = self.envelope(
                &request.src,
                Payload {
                    msg_id: Some(self.pending.next_msg_id()),
                    in_reply_to: Some(in_reply_to),
                    body,
                },
            );
            self.network.deliver(envelope).await
        }

        async fn recv(&self) -> Result<Envelope> {
            let mut rx = self.inbox.lock().await;
            rx.recv().await.ok_or(SyncError::Closed)
        }
    }
}
