//! Set digests.
//!
//! Two nodes can compare a 32-byte digest instead of shipping their whole
//! value sets to check whether they have converged.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Value;

/// Domain prefix mixed into every digest.
pub const DIGEST_DOMAIN: &[u8] = b"rumor-set-v0:";

/// A BLAKE3 digest over a value set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetDigest(pub [u8; 32]);

impl SetDigest {
    /// Digest of a set of values.
    ///
    /// The iterator must yield values in ascending order with no
    /// duplicates (as a `BTreeSet` does); the digest depends on order.
    pub fn of_sorted<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DIGEST_DOMAIN);
        let mut count: u64 = 0;
        for value in values {
            hasher.update(&value.to_be_bytes());
            count += 1;
        }
        hasher.update(&count.to_be_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SetDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SetDigest({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for SetDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_equal_sets_equal_digests() {
        let a: BTreeSet<Value> = [3, 1, 2].into_iter().map(Value).collect();
        let b: BTreeSet<Value> = [2, 3, 1].into_iter().map(Value).collect();
        assert_eq!(SetDigest::of_sorted(&a), SetDigest::of_sorted(&b));
    }

    #[test]
    fn test_different_sets_differ() {
        let a: BTreeSet<Value> = [1, 2].into_iter().map(Value).collect();
        let b: BTreeSet<Value> = [1, 2, 3].into_iter().map(Value).collect();
        assert_ne!(SetDigest::of_sorted(&a), SetDigest::of_sorted(&b));
    }

    #[test]
    fn test_empty_set_digest_is_stable() {
        let empty = BTreeSet::<Value>::new();
        assert_eq!(SetDigest::of_sorted(&empty), SetDigest::of_sorted(&empty));
        assert!(format!("{:?}", SetDigest::of_sorted(&empty)).starts_with("SetDigest("));
    }
}
