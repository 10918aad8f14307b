//! ValueStore: the set of broadcast values this node knows about.

use std::collections::BTreeSet;

use crate::digest::SetDigest;
use crate::types::Value;

/// Grow-only set of broadcast values.
///
/// Values are never removed. Inserting a value that is already present is
/// a no-op, which is what makes gossip merges idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueStore {
    values: BTreeSet<Value>,
}

impl ValueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value. Returns true if it was not already present.
    pub fn add(&mut self, value: Value) -> bool {
        self.values.insert(value)
    }

    /// Insert many values. Returns how many were new.
    pub fn add_all<I>(&mut self, values: I) -> usize
    where
        I: IntoIterator<Item = Value>,
    {
        values
            .into_iter()
            .filter(|value| self.values.insert(*value))
            .count()
    }

    /// Copy of the full set.
    pub fn snapshot(&self) -> BTreeSet<Value> {
        self.values.clone()
    }

    /// Borrow the full set.
    pub fn values(&self) -> &BTreeSet<Value> {
        &self.values
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.values.contains(value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Digest of the current set.
    pub fn digest(&self) -> SetDigest {
        SetDigest::of_sorted(&self.values)
    }
}
