//! Configuration validation
//!
//! Checks every section and reports all problems at once.

use super::NodeConfig;
use lib_routing::PeerId;

/// Validate a loaded configuration, collecting every error
pub fn validate(config: &NodeConfig) -> anyhow::Result<()> {
    let mut errors: Vec<String> = Vec::new();

    // Aggregator section
    let aggregator = &config.aggregator;
    if aggregator.collection_timeout == 0 {
        errors.push("aggregator.collection_timeout must be positive".to_string());
    }
    if aggregator.max_candidates == 0 {
        errors.push("aggregator.max_candidates must be positive".to_string());
    }
    if aggregator.min_candidates > aggregator.max_candidates {
        errors.push(format!(
            "aggregator.min_candidates ({}) exceeds aggregator.max_candidates ({})",
            aggregator.min_candidates, aggregator.max_candidates
        ));
    }
    if aggregator.broadcast_timeout < aggregator.retry_interval {
        errors.push(format!(
            "aggregator.broadcast_timeout ({}) is shorter than aggregator.retry_interval ({})",
            aggregator.broadcast_timeout, aggregator.retry_interval
        ));
    }

    // K-bucket section
    let kbucket = &config.kbucket;
    if kbucket.bucket_size == 0 {
        errors.push("kbucket.bucket_size must be positive".to_string());
    }
    if kbucket.min_peers_per_bucket > kbucket.bucket_size {
        errors.push(format!(
            "kbucket.min_peers_per_bucket ({}) exceeds kbucket.bucket_size ({})",
            kbucket.min_peers_per_bucket, kbucket.bucket_size
        ));
    }
    if kbucket.failure_threshold == 0 {
        errors.push("kbucket.failure_threshold must be positive".to_string());
    }
    if kbucket.probe_max_concurrent == 0 {
        errors.push("kbucket.probe_max_concurrent must be positive".to_string());
    }
    if kbucket.health_decay_half_life == 0 {
        errors.push("kbucket.health_decay_half_life must be positive".to_string());
    }

    // Node section
    if let Some(peer_id) = &config.node.peer_id {
        match hex::decode(peer_id.trim_start_matches("0x")) {
            Ok(bytes) if PeerId::from_slice(&bytes).is_ok() => {}
            _ => errors.push(format!(
                "node.peer_id must be 32 hex-encoded bytes, got {peer_id:?}"
            )),
        }
    }
    if config.node.data_root.is_empty() {
        errors.push("node.data_root must not be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("invalid configuration:\n  - {}", errors.join("\n  - "))
    }
}
