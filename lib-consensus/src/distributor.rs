//! Result distributor
//!
//! Sequencing is apply-then-broadcast: the decided block must be applied to
//! the local chain before the result goes out, otherwise the aggregator
//! could fall behind its own consensus. After the first publish the
//! distributor tracks inbound confirmations (heartbeats carrying the new
//! height) and re-publishes a bounded number of times while the count sits
//! under the threshold.

use crate::config::AggregatorConfig;
use crate::types::{CandidateBlock, ConsensusOutcome, DistanceProof};
use crate::{ConsensusError, ConsensusResult};
use dashmap::DashMap;
use lib_blockchain::BlockProcessor;
use lib_routing::PeerId;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// Outbound publishing capability, implemented by the network layer over the
/// consensus-result pubsub topic.
#[async_trait::async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish_result(&self, outcome: &ConsensusOutcome) -> ConsensusResult<()>;
}

/// Snapshot of broadcast confirmation progress for one height
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationStatus {
    pub height: u64,
    pub confirmations: usize,
    pub threshold: usize,
    pub settled: bool,
    pub publish_attempts: u32,
}

/// Applies the winning block locally, then broadcasts the decision
pub struct ResultDistributor {
    processor: Arc<dyn BlockProcessor>,
    publisher: Arc<dyn ResultPublisher>,
    config: AggregatorConfig,
    confirmations: DashMap<u64, HashSet<PeerId>>,
    attempts: DashMap<u64, u32>,
}

impl ResultDistributor {
    pub fn new(
        processor: Arc<dyn BlockProcessor>,
        publisher: Arc<dyn ResultPublisher>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            processor,
            publisher,
            config,
            confirmations: DashMap::new(),
            attempts: DashMap::new(),
        }
    }

    /// Record a peer's acknowledgement of `height` (heartbeat observed the
    /// new tip). Idempotent per peer.
    pub fn record_confirmation(&self, peer: PeerId, height: u64) {
        self.confirmations.entry(height).or_default().insert(peer);
    }

    /// Confirmation progress for a height
    pub fn confirmation_status(&self, height: u64) -> ConfirmationStatus {
        let confirmations = self
            .confirmations
            .get(&height)
            .map(|set| set.len())
            .unwrap_or(0);
        ConfirmationStatus {
            height,
            confirmations,
            threshold: self.config.confirmation_threshold,
            settled: confirmations >= self.config.confirmation_threshold,
            publish_attempts: self.attempts.get(&height).map(|a| *a).unwrap_or(0),
        }
    }

    /// Drop confirmation bookkeeping for heights at or below `height`
    pub fn prune_below(&self, height: u64) {
        self.confirmations.retain(|h, _| *h > height);
        self.attempts.retain(|h, _| *h > height);
    }

    /// Apply the winning block and broadcast the decision.
    ///
    /// A local apply failure aborts the round as `Inconsistent` and nothing
    /// is broadcast. Publish failures are retried inside the confirmation
    /// window; an unsettled broadcast degrades, it does not fail the round.
    pub async fn distribute_selected_block(
        &self,
        winner: &CandidateBlock,
        proof: DistanceProof,
        aggregator_id: PeerId,
        mut cancel: watch::Receiver<bool>,
    ) -> ConsensusResult<ConsensusOutcome> {
        let height = winner.height();

        // Local apply first, and it must succeed.
        self.processor
            .process_block(&winner.block)
            .await
            .map_err(|err| {
                tracing::error!(
                    height,
                    hash = %winner.block_hash(),
                    error = %err,
                    "local apply of decided block failed; round aborts"
                );
                ConsensusError::Inconsistent(format!("local apply failed: {err}"))
            })?;

        let outcome = ConsensusOutcome {
            height,
            selected_hash: winner.block_hash(),
            final_block: winner.block.clone(),
            distance_proof: proof,
            aggregator_id,
            broadcast_ts: unix_now(),
        };

        self.publish_once(&outcome).await?;
        tracing::info!(
            height,
            hash = %outcome.selected_hash,
            "consensus result applied and broadcast"
        );

        // Confirmation window with bounded re-publishes.
        let deadline = Instant::now() + self.config.broadcast_timeout;
        let mut retries_left = self.config.max_retry_attempts;
        loop {
            let status = self.confirmation_status(height);
            if status.settled {
                tracing::debug!(height, confirmations = status.confirmations, "broadcast settled");
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    height,
                    confirmations = status.confirmations,
                    threshold = status.threshold,
                    "broadcast confirmation window closed under threshold"
                );
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_interval) => {
                    if retries_left > 0 && !self.confirmation_status(height).settled {
                        retries_left -= 1;
                        if let Err(err) = self.publish_once(&outcome).await {
                            tracing::warn!(height, error = %err, "broadcast retry failed");
                        }
                    }
                }
                result = cancel.changed() => {
                    if result.is_err() || *cancel.borrow() {
                        tracing::debug!(height, "confirmation wait cancelled");
                        break;
                    }
                }
            }
        }

        Ok(outcome)
    }

    async fn publish_once(&self, outcome: &ConsensusOutcome) -> ConsensusResult<()> {
        *self.attempts.entry(outcome.height).or_insert(0) += 1;
        self.publisher
            .publish_result(outcome)
            .await
            .map_err(|err| ConsensusError::Transient(format!("publish failed: {err}")))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
