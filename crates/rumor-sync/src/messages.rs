//! Wire message types.
//!
//! Every message is an envelope `{src, dest, body}`. Bodies form a closed
//! set tagged by their `"type"` field; anything else is rejected at decode
//! time as a malformed request rather than surfacing later as a fault.

use serde::{Deserialize, Serialize};

use rumor_core::{NodeId, TopologyTable, Value};

/// Message size limits.
pub mod limits {
    /// Max values in one `gossip` or `gossip_ok` body.
    pub const MAX_GOSSIP_BATCH: usize = 1024;
}

/// A message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Body {
    /// Bootstrap: tells a process which node it is.
    Init {
        node_id: NodeId,
        node_ids: Vec<NodeId>,
    },
    InitOk,

    /// Client submits a value.
    Broadcast {
        #[serde(rename = "message", alias = "value")]
        value: Value,
    },
    BroadcastOk,

    /// Client asks for every value this node knows.
    Read,
    ReadOk {
        #[serde(rename = "messages", alias = "values")]
        values: Vec<Value>,
    },

    /// Setup installs the gossip topology.
    Topology { topology: TopologyTable },
    TopologyOk,

    /// Node-to-node anti-entropy push.
    Gossip { values: Vec<Value> },
    /// Values the receiver confirms it now holds.
    GossipOk { acknowledged: Vec<Value> },

    /// Request-level failure.
    Error {
        code: ErrorCode,
        #[serde(default)]
        text: String,
    },
}

impl Body {
    /// The wire `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Body::Init { .. } => "init",
            Body::InitOk => "init_ok",
            Body::Broadcast { .. } => "broadcast",
            Body::BroadcastOk => "broadcast_ok",
            Body::Read => "read",
            Body::ReadOk { .. } => "read_ok",
            Body::Topology { .. } => "topology",
            Body::TopologyOk => "topology_ok",
            Body::Gossip { .. } => "gossip",
            Body::GossipOk { .. } => "gossip_ok",
            Body::Error { .. } => "error",
        }
    }

    /// Build an error body.
    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        Body::Error {
            code,
            text: text.into(),
        }
    }

    /// Check if this body respects size limits.
    pub fn validate_limits(&self) -> Result<(), &'static str> {
        match self {
            Body::Gossip { values } => {
                if values.len() > limits::MAX_GOSSIP_BATCH {
                    return Err("too many values in gossip batch");
                }
            }
            Body::GossipOk { acknowledged } => {
                if acknowledged.len() > limits::MAX_GOSSIP_BATCH {
                    return Err("too many acknowledged values");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// A body plus its correlation IDs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Sender-unique ID; present on anything expecting a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    /// Set on replies: the `msg_id` being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(flatten)]
    pub body: Body,
}

impl Payload {
    /// An uncorrelated payload.
    pub fn new(body: Body) -> Self {
        Self {
            msg_id: None,
            in_reply_to: None,
            body,
        }
    }
}

/// A routed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: Payload,
}

impl Envelope {
    /// Whether this envelope answers an earlier request.
    pub fn is_reply(&self) -> bool {
        self.body.in_reply_to.is_some()
    }

    /// Decode one line of JSON, validating shape and limits.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let raw: serde_json::Value = serde_json::from_str(line).map_err(|e| DecodeError {
            src: None,
            msg_id: None,
            reason: format!("not JSON: {}", e),
        })?;

        // Pull out enough to address an error reply before full validation.
        let src = raw
            .get("src")
            .and_then(serde_json::Value::as_str)
            .map(NodeId::from);
        let msg_id = raw
            .get("body")
            .and_then(|body| body.get("msg_id"))
            .and_then(serde_json::Value::as_u64);

        let envelope: Envelope = serde_json::from_value(raw).map_err(|e| DecodeError {
            src: src.clone(),
            msg_id,
            reason: e.to_string(),
        })?;

        envelope
            .body
            .body
            .validate_limits()
            .map_err(|reason| DecodeError {
                src,
                msg_id,
                reason: reason.to_string(),
            })?;

        Ok(envelope)
    }

    /// Encode as one line of JSON (no trailing newline).
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A line that could not be decoded into an [`Envelope`].
///
/// Carries whatever addressing could be salvaged so the caller can be told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub src: Option<NodeId>,
    pub msg_id: Option<u64>,
    pub reason: String,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed message: {}", self.reason)
    }
}

impl std::error::Error for DecodeError {}

/// Error codes carried in `error` bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum ErrorCode {
    /// The requested operation timed out.
    Timeout,
    /// The addressed node does not exist.
    NodeNotFound,
    /// The message type is not supported.
    NotSupported,
    /// Temporarily unable to serve; safe to retry.
    TemporarilyUnavailable,
    /// The request was malformed.
    MalformedRequest,
    /// Internal failure; state may be indeterminate.
    Crash,
    /// The operation was aborted.
    Abort,
    /// Any other code.
    Other(u16),
}

impl From<u16> for ErrorCode {
    fn from(code: u16) -> Self {
        match code {
            0 => ErrorCode::Timeout,
            1 => ErrorCode::NodeNotFound,
            10 => ErrorCode::NotSupported,
            11 => ErrorCode::TemporarilyUnavailable,
            12 => ErrorCode::MalformedRequest,
            13 => ErrorCode::Crash,
            14 => ErrorCode::Abort,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Timeout => 0,
            ErrorCode::NodeNotFound => 1,
            ErrorCode::NotSupported => 10,
            ErrorCode::TemporarilyUnavailable => 11,
            ErrorCode::MalformedRequest => 12,
            ErrorCode::Crash => 13,
            ErrorCode::Abort => 14,
            ErrorCode::Other(other) => other,
        }
    }
}
