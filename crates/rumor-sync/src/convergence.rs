//! Convergence verification.
//!
//! Nodes have converged when they hold identical value sets. Comparing
//! length plus digest avoids shipping the sets themselves.

use std::collections::BTreeSet;

use rumor_core::{GossipState, SetDigest, Value};

/// Compute the digest of a value set.
pub fn compute_set_digest(values: &BTreeSet<Value>) -> SetDigest {
    SetDigest::of_sorted(values)
}

/// Compare local state against a remote node's summary.
pub fn verify_convergence(
    local: &GossipState,
    remote_len: usize,
    remote_digest: &SetDigest,
) -> ConvergenceResult {
    let (local_len, local_digest) = local.summary();

    if local_len != remote_len {
        return ConvergenceResult::NotConverged {
            reason: format!(
                "{} holds {} values, remote holds {}",
                local.node_id(),
                local_len,
                remote_len
            ),
        };
    }

    if &local_digest != remote_digest {
        return ConvergenceResult::NotConverged {
            reason: format!(
                "{} digest {} differs from remote {}",
                local.node_id(),
                local_digest,
                remote_digest
            ),
        };
    }

    ConvergenceResult::Converged
}

/// Check that every node holds the same set as the first.
///
/// An empty cluster is trivially converged.
pub fn verify_cluster<'a, I>(states: I) -> ConvergenceResult
where
    I: IntoIterator<Item = &'a GossipState>,
{
    let mut states = states.into_iter();
    let Some(first) = states.next() else {
        return ConvergenceResult::Converged;
    };
    let (len, digest) = first.summary();

    for state in states {
        let result = verify_convergence(state, len, &digest);
        if !result.is_converged() {
            return result;
        }
    }
    ConvergenceResult::Converged
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both sides hold identical sets.
    Converged,
    /// Sets differ (more rounds may be needed).
    NotConverged { reason: String },
}

impl ConvergenceResult {
    /// Check if nodes have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}
