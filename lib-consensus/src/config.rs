//! Aggregator configuration
//!
//! Keys map under `aggregator.*` (e.g. `aggregator.collection_timeout`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of candidates that closes a collection window early
pub const DEFAULT_MAX_CANDIDATES: usize = 10;

/// Default confirmations considered a settled broadcast
pub const DEFAULT_CONFIRMATION_THRESHOLD: usize = 3;

/// Default broadcast retry attempts
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Default submitter-side re-routing attempts before loopback fallback
pub const DEFAULT_MAX_SUBMISSION_ATTEMPTS: u32 = 10;

/// Default height lookahead tolerated before waiving a submission
pub const DEFAULT_HEIGHT_LOOKAHEAD: u64 = 16;

/// Aggregation round configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatorConfig {
    /// Candidate collection window per round
    pub collection_timeout: Duration,
    /// Budget for evaluation plus selection
    pub decision_timeout: Duration,
    /// Budget for broadcast confirmation
    pub broadcast_timeout: Duration,
    /// Minimum candidates for a decidable round
    pub min_candidates: usize,
    /// Candidates that close the window early; also the per-height pool bound
    pub max_candidates: usize,
    /// Confirmations after which a broadcast is settled
    pub confirmation_threshold: usize,
    /// Broadcast retry attempts while under the confirmation threshold
    pub max_retry_attempts: u32,
    /// Spacing between broadcast retries
    pub retry_interval: Duration,
    /// Submissions this far above the local tip are waived
    pub height_lookahead: u64,
    /// Submitter-side re-routing attempts before the loopback fallback
    pub max_submission_attempts: u32,
    /// How long pool contents outlive their round
    pub pool_ttl: Duration,
    /// Extra collection time granted after a Poor network-quality event
    pub poor_quality_window_extension: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            collection_timeout: Duration::from_secs(8),
            decision_timeout: Duration::from_secs(5),
            broadcast_timeout: Duration::from_secs(15),
            min_candidates: 1,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            confirmation_threshold: DEFAULT_CONFIRMATION_THRESHOLD,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            retry_interval: Duration::from_secs(2),
            height_lookahead: DEFAULT_HEIGHT_LOOKAHEAD,
            max_submission_attempts: DEFAULT_MAX_SUBMISSION_ATTEMPTS,
            pool_ttl: Duration::from_secs(60),
            poor_quality_window_extension: Duration::from_secs(4),
        }
    }
}
