//! Node configuration
//!
//! Layered sources: built-in defaults, then an optional TOML file, then CLI
//! overrides. Durations are written as seconds in the file. Validation
//! collects every bad key before failing, so an operator fixes one pass,
//! not one key at a time.

pub mod validation;

use lib_consensus::{AggregatorConfig, SyncMode};
use lib_crypto::HashAlgorithm;
use lib_routing::KBucketConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete node configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub aggregator: AggregatorSection,
    #[serde(default)]
    pub kbucket: KBucketSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
}

/// Core node settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Data directory root (badger / files / temp live under it)
    #[serde(default = "default_data_root")]
    pub data_root: String,
    /// Hex-encoded 32-byte peer id; generated when absent
    #[serde(default)]
    pub peer_id: Option<String>,
    /// Hash algorithm for content addressing
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            peer_id: None,
            hash_algorithm: HashAlgorithm::default(),
        }
    }
}

fn default_data_root() -> String {
    "./weisyn-data".to_string()
}

/// `aggregator.*` keys (seconds for durations)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorSection {
    #[serde(default = "default_collection_timeout")]
    pub collection_timeout: u64,
    #[serde(default = "default_decision_timeout")]
    pub decision_timeout: u64,
    #[serde(default = "default_broadcast_timeout")]
    pub broadcast_timeout: u64,
    #[serde(default = "default_min_candidates")]
    pub min_candidates: usize,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_confirmation_threshold")]
    pub confirmation_threshold: usize,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,
    #[serde(default = "default_height_lookahead")]
    pub height_lookahead: u64,
}

impl Default for AggregatorSection {
    fn default() -> Self {
        Self {
            collection_timeout: default_collection_timeout(),
            decision_timeout: default_decision_timeout(),
            broadcast_timeout: default_broadcast_timeout(),
            min_candidates: default_min_candidates(),
            max_candidates: default_max_candidates(),
            confirmation_threshold: default_confirmation_threshold(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_interval: default_retry_interval(),
            height_lookahead: default_height_lookahead(),
        }
    }
}

fn default_collection_timeout() -> u64 {
    8
}
fn default_decision_timeout() -> u64 {
    5
}
fn default_broadcast_timeout() -> u64 {
    15
}
fn default_min_candidates() -> usize {
    1
}
fn default_max_candidates() -> usize {
    10
}
fn default_confirmation_threshold() -> usize {
    3
}
fn default_max_retry_attempts() -> u32 {
    3
}
fn default_retry_interval() -> u64 {
    2
}
fn default_height_lookahead() -> u64 {
    16
}

/// `kbucket.*` keys (seconds for durations)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KBucketSection {
    #[serde(default = "default_bucket_size")]
    pub bucket_size: usize,
    #[serde(default = "default_min_peers_per_bucket")]
    pub min_peers_per_bucket: usize,
    #[serde(default = "default_max_replacement_cache_size")]
    pub max_replacement_cache_size: usize,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_quarantine_duration")]
    pub quarantine_duration: u64,
    #[serde(default = "default_health_decay_half_life")]
    pub health_decay_half_life: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: u64,
    #[serde(default = "default_probe_max_concurrent")]
    pub probe_max_concurrent: usize,
    #[serde(default = "default_probe_interval_min")]
    pub probe_interval_min: u64,
    #[serde(default = "default_probe_fail_threshold")]
    pub probe_fail_threshold: u32,
}

impl Default for KBucketSection {
    fn default() -> Self {
        Self {
            bucket_size: default_bucket_size(),
            min_peers_per_bucket: default_min_peers_per_bucket(),
            max_replacement_cache_size: default_max_replacement_cache_size(),
            failure_threshold: default_failure_threshold(),
            quarantine_duration: default_quarantine_duration(),
            health_decay_half_life: default_health_decay_half_life(),
            probe_timeout: default_probe_timeout(),
            probe_max_concurrent: default_probe_max_concurrent(),
            probe_interval_min: default_probe_interval_min(),
            probe_fail_threshold: default_probe_fail_threshold(),
        }
    }
}

fn default_bucket_size() -> usize {
    20
}
fn default_min_peers_per_bucket() -> usize {
    2
}
fn default_max_replacement_cache_size() -> usize {
    5
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_quarantine_duration() -> u64 {
    60
}
fn default_health_decay_half_life() -> u64 {
    300
}
fn default_probe_timeout() -> u64 {
    5
}
fn default_probe_max_concurrent() -> usize {
    5
}
fn default_probe_interval_min() -> u64 {
    30
}
fn default_probe_fail_threshold() -> u32 {
    2
}

/// `runtime.*` keys
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeSection {
    #[serde(default)]
    pub sync_mode: SyncMode,
    /// Refuse submissions when set
    #[serde(default)]
    pub read_only: bool,
}

impl NodeConfig {
    /// Load configuration: defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let loaded: NodeConfig = builder
            .build()?
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("configuration parse failed: {e}"))?;

        validation::validate(&loaded)?;
        Ok(loaded)
    }

    /// Convert the aggregator section into the consensus-layer config
    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            collection_timeout: Duration::from_secs(self.aggregator.collection_timeout),
            decision_timeout: Duration::from_secs(self.aggregator.decision_timeout),
            broadcast_timeout: Duration::from_secs(self.aggregator.broadcast_timeout),
            min_candidates: self.aggregator.min_candidates,
            max_candidates: self.aggregator.max_candidates,
            confirmation_threshold: self.aggregator.confirmation_threshold,
            max_retry_attempts: self.aggregator.max_retry_attempts,
            retry_interval: Duration::from_secs(self.aggregator.retry_interval),
            height_lookahead: self.aggregator.height_lookahead,
            ..AggregatorConfig::default()
        }
    }

    /// Convert the kbucket section into the routing-layer config
    pub fn kbucket_config(&self) -> KBucketConfig {
        KBucketConfig {
            bucket_size: self.kbucket.bucket_size,
            min_peers_per_bucket: self.kbucket.min_peers_per_bucket,
            max_replacement_cache_size: self.kbucket.max_replacement_cache_size,
            failure_threshold: self.kbucket.failure_threshold,
            quarantine_duration: Duration::from_secs(self.kbucket.quarantine_duration),
            health_decay_half_life: Duration::from_secs(self.kbucket.health_decay_half_life),
            probe_timeout: Duration::from_secs(self.kbucket.probe_timeout),
            probe_max_concurrent: self.kbucket.probe_max_concurrent,
            probe_interval_min: Duration::from_secs(self.kbucket.probe_interval_min),
            probe_fail_threshold: self.kbucket.probe_fail_threshold,
            ..KBucketConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = NodeConfig::load(None).unwrap();
        assert_eq!(config.aggregator.collection_timeout, 8);
        assert_eq!(config.kbucket.bucket_size, 20);
        assert_eq!(config.runtime.sync_mode, SyncMode::Full);
        assert!(!config.runtime.read_only);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[aggregator]
collection_timeout = 12
max_candidates = 4

[kbucket]
bucket_size = 10

[runtime]
sync_mode = "pruned"
"#
        )
        .unwrap();

        let config = NodeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.aggregator.collection_timeout, 12);
        assert_eq!(config.aggregator.max_candidates, 4);
        // Untouched keys keep their defaults
        assert_eq!(config.aggregator.decision_timeout, 5);
        assert_eq!(config.kbucket.bucket_size, 10);
        assert_eq!(config.runtime.sync_mode, SyncMode::Pruned);
    }

    #[test]
    fn test_conversions_carry_values() {
        let config = NodeConfig::load(None).unwrap();
        let aggregator = config.aggregator_config();
        assert_eq!(aggregator.collection_timeout, Duration::from_secs(8));
        assert_eq!(aggregator.height_lookahead, 16);

        let kbucket = config.kbucket_config();
        assert_eq!(kbucket.bucket_size, 20);
        assert_eq!(kbucket.quarantine_duration, Duration::from_secs(60));
    }
}
