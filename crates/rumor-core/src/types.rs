//! Strong type definitions for Rumor.
//!
//! Identifiers are newtypes so a node name can never be passed where a
//! broadcast value is expected (and vice versa).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A broadcast value.
///
/// Opaque beyond its identity: two values are the same value iff their
/// integers are equal. Serialized as a bare JSON number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Value(pub i64);

impl Value {
    /// Create a value from its integer form.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Get the integer form.
    pub const fn get(&self) -> i64 {
        self.0
    }

    /// Big-endian bytes, used for digests.
    pub const fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({})", self.0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Value {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl From<Value> for i64 {
    fn from(value: Value) -> Self {
        value.0
    }
}

/// Name of a node (or client) in the cluster, e.g. `"n1"` or `"c4"`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node ID from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this ID names a client rather than a cluster node.
    ///
    /// Clients are conventionally named `c<N>`.
    pub fn is_client(&self) -> bool {
        self.0.starts_with('c')
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for NodeId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
