//! The Node: request dispatch for one gossip participant.
//!
//! The Node ties a transport to the gossip engine. Every inbound request
//! is handled on its own task; replies go out as soon as local state is
//! updated, and propagation happens in the background.

use std::sync::Arc;

use tracing::{debug, info, warn};

use rumor_core::{GossipState, NodeId};
use rumor_sync::{Body, Envelope, GossipConfig, InboundMerger, Propagator, SyncError, Transport};

use crate::error::Result;

/// Configuration for a Node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeConfig {
    /// Gossip configuration.
    pub gossip: GossipConfig,
}

impl NodeConfig {
    /// Defaults overridden by `RUMOR_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            gossip: GossipConfig::from_env()?,
        })
    }
}

/// A gossip broadcast node.
///
/// Provides:
/// - Client broadcast and read
/// - Topology installation
/// - Peer gossip merge and acknowledgment
/// - A background propagation worker
pub struct Node<T: Transport> {
    /// This node's identity.
    id: NodeId,
    /// Value set and neighbor ledger.
    state: Arc<GossipState>,
    /// Message channel.
    transport: Arc<T>,
    /// Inbound value handling.
    merger: InboundMerger,
    /// Outbound diff pushing.
    propagator: Propagator<T>,
}

impl<T: Transport + 'static> Node<T> {
    /// Create a node on `transport`.
    pub fn new(transport: Arc<T>, config: NodeConfig) -> Self {
        let id = transport.local_node_id();
        let state = Arc::new(GossipState::new(id.clone()));
        let propagator = Propagator::new(Arc::clone(&state), Arc::clone(&transport), config.gossip);
        let merger = InboundMerger::new(Arc::clone(&state), propagator.trigger());

        Self {
            id,
            state,
            transport,
            merger,
            propagator,
        }
    }

    /// This node's ID.
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// The node's gossip state.
    pub fn state(&self) -> &Arc<GossipState> {
        &self.state
    }

    pub fn merger(&self) -> &InboundMerger {
        &self.merger
    }

    pub fn propagator(&self) -> &Propagator<T> {
        &self.propagator
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────────────────

    /// Handle one inbound request and send its reply, if any.
    pub async fn handle(&self, request: Envelope) -> Result<()> {
        if let Some(reply) = self.dispatch(&request) {
            self.transport.reply(&request, reply).await?;
        }
        Ok(())
    }

    /// Apply a request to local state and build its reply.
    ///
    /// Returns `None` for bodies that expect no answer (stray replies and
    /// error reports), so two nodes can never bounce errors back and forth.
    pub fn dispatch(&self, request: &Envelope) -> Option<Body> {
        match &request.body.body {
            Body::Broadcast { value } => {
                self.merger.submit(*value);
                Some(Body::BroadcastOk)
            }

            Body::Read => Some(Body::ReadOk {
                values: self.merger.read().into_iter().collect(),
            }),

            Body::Topology { topology } => match self.merger.install_topology(topology) {
                Ok(neighbors) => {
                    info!(node = %self.id, ?neighbors, "topology installed");
                    Some(Body::TopologyOk)
                }
                Err(e) => {
                    warn!(node = %self.id, from = %request.src, "topology rejected: {}", e);
                    Some(error_body(&e))
                }
            },

            Body::Gossip { values } => {
                let outcome = self.merger.receive(&request.src, values.clone());
                Some(Body::GossipOk {
                    acknowledged: outcome.acknowledged,
                })
            }

            Body::Init { node_id, .. } => {
                if node_id != &self.id {
                    warn!(node = %self.id, claimed = %node_id, "init for a different node ignored");
                }
                Some(Body::InitOk)
            }

            Body::Error { code, text } => {
                warn!(node = %self.id, from = %request.src, ?code, "peer reported error: {}", text);
                None
            }

            other => {
                debug!(node = %self.id, from = %request.src, kind = other.kind(), "uncorrelated reply dropped");
                None
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Run loop
    // ─────────────────────────────────────────────────────────────────────────

    /// Serve requests until the transport closes.
    ///
    /// Starts the propagation worker, then spawns one task per inbound
    /// request. Returns `Ok(())` when the transport reports it is closed.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let worker = self.propagator.clone().spawn();
        info!(node = %self.id, "node running");

        let result = loop {
            match self.transport.recv().await {
                Ok(request) => {
                    let node = Arc::clone(&self);
                    tokio::spawn(async move {
                        let kind = request.body.body.kind();
                        let from = request.src.clone();
                        if let Err(e) = node.handle(request).await {
                            warn!(node = %node.id, %from, kind, "failed to reply: {}", e);
                        }
                    });
                }
                Err(SyncError::Closed) => break Ok(()),
                Err(e) => break Err(e.into()),
            }
        };

        worker.abort();
        info!(node = %self.id, values = self.state.len(), "node stopped");
        result
    }
}

fn error_body(e: &SyncError) -> Body {
    Body::error(e.code(), e.to_string())
}
