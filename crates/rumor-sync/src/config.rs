//! Gossip configuration.

use std::time::Duration;

use crate::error::{Result, SyncError};

/// Environment variable: RPC timeout in milliseconds.
pub const ENV_RPC_TIMEOUT_MS: &str = "RUMOR_RPC_TIMEOUT_MS";
/// Environment variable: periodic propagation interval in milliseconds (`0` disables).
pub const ENV_SYNC_INTERVAL_MS: &str = "RUMOR_SYNC_INTERVAL_MS";
/// Environment variable: maximum values per gossip message.
pub const ENV_MAX_BATCH: &str = "RUMOR_MAX_BATCH";

/// Configuration for gossip behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipConfig {
    /// How long a push waits for the neighbor's acknowledgment.
    pub rpc_timeout: Duration,
    /// Period of the background propagation pass. `None` means rounds
    /// only run when new values arrive.
    pub sync_interval: Option<Duration>,
    /// Maximum values carried by one gossip message. Larger diffs are
    /// split into several messages.
    pub max_batch_size: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(1),
            sync_interval: Some(Duration::from_millis(500)),
            max_batch_size: 512,
        }
    }
}

impl GossipConfig {
    /// Defaults overridden by `RUMOR_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_u64(&lookup, ENV_RPC_TIMEOUT_MS)? {
            if ms == 0 {
                return Err(SyncError::Config(format!("{} must be positive", ENV_RPC_TIMEOUT_MS)));
            }
            config.rpc_timeout = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_u64(&lookup, ENV_SYNC_INTERVAL_MS)? {
            config.sync_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }

        if let Some(max) = parse_u64(&lookup, ENV_MAX_BATCH)? {
            let max = usize::try_from(max)
                .map_err(|_| SyncError::Config(format!("{} out of range", ENV_MAX_BATCH)))?;
            config.max_batch_size = max;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 || self.max_batch_size > crate::messages::limits::MAX_GOSSIP_BATCH {
            return Err(SyncError::Config(format!(
                "max_batch_size must be in 1..={}, got {}",
                crate::messages::limits::MAX_GOSSIP_BATCH,
                self.max_batch_size
            )));
        }
        Ok(())
    }
}

fn parse_u64<F>(lookup: &F, key: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| SyncError::Config(format!("{}={:?}: {}", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_overrides() {
        let config = GossipConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, GossipConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_apply() {
        let config = GossipConfig::from_lookup(lookup(&[
            (ENV_RPC_TIMEOUT_MS, "250"),
            (ENV_SYNC_INTERVAL_MS, "100"),
            (ENV_MAX_BATCH, "64"),
        ]))
        .unwrap();

        assert_eq!(config.rpc_timeout, Duration::from_millis(250));
        assert_eq!(config.sync_interval, Some(Duration::from_millis(100)));
        assert_eq!(config.max_batch_size, 64);
    }

    #[test]
    fn test_zero_interval_disables_periodic_sync() {
        let config = GossipConfig::from_lookup(lookup(&[(ENV_SYNC_INTERVAL_MS, "0")])).unwrap();
        assert_eq!(config.sync_interval, None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(GossipConfig::from_lookup(lookup(&[(ENV_RPC_TIMEOUT_MS, "soon")])).is_err());
        assert!(GossipConfig::from_lookup(lookup(&[(ENV_RPC_TIMEOUT_MS, "0")])).is_err());
        assert!(GossipConfig::from_lookup(lookup(&[(ENV_MAX_BATCH, "0")])).is_err());
        assert!(GossipConfig::from_lookup(lookup(&[(ENV_MAX_BATCH, "100000")])).is_err());
    }
}
