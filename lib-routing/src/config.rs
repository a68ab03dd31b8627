//! K-bucket table configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default K-bucket capacity (standard Kademlia K value)
pub const DEFAULT_BUCKET_SIZE: usize = 20;

/// Default minimum peers cleanup must leave in a bucket
pub const DEFAULT_MIN_PEERS_PER_BUCKET: usize = 2;

/// Default per-bucket replacement cache capacity
pub const DEFAULT_MAX_REPLACEMENT_CACHE_SIZE: usize = 5;

/// Default consecutive failures before a peer turns Suspect
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default probe failures before eviction
pub const DEFAULT_PROBE_FAIL_THRESHOLD: u32 = 2;

/// Default bounded probe concurrency
pub const DEFAULT_PROBE_MAX_CONCURRENT: usize = 5;

/// Configuration for the K-bucket table and its health lifecycle.
///
/// Config keys map under `kbucket.*` (e.g. `kbucket.bucket_size`,
/// `kbucket.quarantine_duration`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KBucketConfig {
    /// Peers per bucket (K)
    pub bucket_size: usize,
    /// Floor cleanup may never go below while peers are available
    pub min_peers_per_bucket: usize,
    /// Per-bucket replacement cache capacity
    pub max_replacement_cache_size: usize,
    /// Consecutive failures before Active -> Suspect; twice this quarantines
    pub failure_threshold: u32,
    /// How long a quarantined peer stays quarantined
    pub quarantine_duration: Duration,
    /// Half-life for failure decay in health scoring
    pub health_decay_half_life: Duration,
    /// Health score at or below which a peer becomes a cleanup candidate
    pub low_health_threshold: f64,
    /// Peers younger than this are never cleanup candidates
    pub cleanup_grace_period: Duration,
    /// Peers with an address confirmed within this window are protected
    pub addr_protection_grace_period: Duration,
    /// A peer useful within this window is not replaceable on insert overflow
    pub usefulness_grace_period: Duration,
    /// Round-trip budget per probe
    pub probe_timeout: Duration,
    /// Global in-flight probe limit
    pub probe_max_concurrent: usize,
    /// Minimum spacing between probes of the same peer
    pub probe_interval_min: Duration,
    /// Probe failures before eviction
    pub probe_fail_threshold: u32,
    /// Maintenance loop tick interval
    pub maintenance_interval: Duration,
}

impl Default for KBucketConfig {
    fn default() -> Self {
        Self {
            bucket_size: DEFAULT_BUCKET_SIZE,
            min_peers_per_bucket: DEFAULT_MIN_PEERS_PER_BUCKET,
            max_replacement_cache_size: DEFAULT_MAX_REPLACEMENT_CACHE_SIZE,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            quarantine_duration: Duration::from_secs(60),
            health_decay_half_life: Duration::from_secs(300),
            low_health_threshold: 30.0,
            cleanup_grace_period: Duration::from_secs(120),
            addr_protection_grace_period: Duration::from_secs(60),
            usefulness_grace_period: Duration::from_secs(600),
            probe_timeout: Duration::from_secs(5),
            probe_max_concurrent: DEFAULT_PROBE_MAX_CONCURRENT,
            probe_interval_min: Duration::from_secs(30),
            probe_fail_threshold: DEFAULT_PROBE_FAIL_THRESHOLD,
            maintenance_interval: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = KBucketConfig::default();
        assert_eq!(config.bucket_size, 20);
        assert_eq!(config.min_peers_per_bucket, 2);
        assert_eq!(config.max_replacement_cache_size, 5);
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.quarantine_duration, Duration::from_secs(60));
        assert_eq!(config.health_decay_half_life, Duration::from_secs(300));
        assert_eq!(config.probe_max_concurrent, 5);
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
    }
}
