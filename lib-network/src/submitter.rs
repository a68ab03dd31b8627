//! Submitter-side waiver re-routing
//!
//! A miner submits its candidate to the elected aggregator. Every waiver
//! response adds the responder to the waived set (exactly once) and bumps
//! the attempt counter; the next target is re-elected with the waived set
//! excluded. When the attempt budget runs out or no eligible aggregator
//! remains, the miner falls back to loopback: it runs the round locally as
//! its own aggregator.

use crate::constants::PROTOCOL_BLOCK_SUBMISSION;
use crate::messages::{
    decode, encode, unix_now, AggregatorBlockAcceptance, BaseMessage, MinerBlockSubmission,
};
use crate::transport::RequestTransport;
use crate::{NetworkError, NetworkResult};
use lib_blockchain::Block;
use lib_consensus::{AggregationController, CandidateBlock, ConsensusError, Election};
use lib_routing::PeerId;
use std::collections::HashSet;
use std::sync::Arc;

/// Where a submission ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// A remote aggregator accepted the candidate
    Accepted { aggregator: PeerId, attempts: u32 },
    /// Every route was exhausted; the round ran locally
    ProcessedLocally { attempts: u32 },
}

/// Routes miner submissions to the elected aggregator, following waivers
pub struct SubmissionRouter {
    self_id: PeerId,
    election: Arc<Election>,
    transport: Arc<dyn RequestTransport>,
    controller: Arc<AggregationController>,
    max_attempts: u32,
}

impl SubmissionRouter {
    pub fn new(
        self_id: PeerId,
        election: Arc<Election>,
        transport: Arc<dyn RequestTransport>,
        controller: Arc<AggregationController>,
        max_attempts: u32,
    ) -> Self {
        Self {
            self_id,
            election,
            transport,
            controller,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Submit a mined block, re-routing on waivers until it lands.
    pub async fn submit_block(
        &self,
        block: Block,
        miner_signature: Vec<u8>,
    ) -> NetworkResult<SubmissionOutcome> {
        let height = block.height();
        let mut waived: HashSet<PeerId> = HashSet::new();
        let mut retry_attempt: u32 = 0;
        let mut forced_target: Option<PeerId> = None;

        loop {
            if retry_attempt >= self.max_attempts {
                tracing::warn!(
                    height,
                    attempts = retry_attempt,
                    "submission attempts exhausted; falling back to local processing"
                );
                return self.process_locally(block, retry_attempt).await;
            }

            let target = match forced_target.take() {
                Some(peer) => peer,
                None => match self
                    .election
                    .aggregator_for_height_with_waivers(height, &waived)
                    .await
                {
                    Ok(peer) => peer,
                    Err(ConsensusError::NoEligibleAggregator(_)) => {
                        tracing::info!(height, "all aggregators waived; processing locally");
                        return self.process_locally(block, retry_attempt).await;
                    }
                    Err(err) => return Err(err.into()),
                },
            };

            if target == self.self_id {
                return self.process_locally(block, retry_attempt).await;
            }

            let submission = MinerBlockSubmission {
                base: BaseMessage::new(self.self_id),
                candidate_block: block.clone(),
                miner_signature: miner_signature.clone(),
                waived_aggregators: waived.iter().map(|p| p.to_vec()).collect(),
                retry_attempt,
            };
            let body = encode(&submission)?;

            let response = match self
                .transport
                .request(&target, PROTOCOL_BLOCK_SUBMISSION, body)
                .await
            {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::debug!(
                        height,
                        target = %target.short(),
                        error = %err,
                        "submission transport failure; excluding peer"
                    );
                    waived.insert(target);
                    retry_attempt += 1;
                    continue;
                }
            };
            let acceptance: AggregatorBlockAcceptance = decode(&response)?;

            if acceptance.waived {
                // Idempotent per peer; the attempt counter is monotonic
                waived.insert(target);
                retry_attempt += 1;
                tracing::debug!(
                    height,
                    target = %target.short(),
                    reason = acceptance.waiver_reason.as_wire_str(),
                    retry_attempt,
                    "aggregator waived; re-routing"
                );
                continue;
            }

            if !acceptance.accepted {
                return Err(NetworkError::MalformedMessage(format!(
                    "submission rejected by {}: {}",
                    target.short(),
                    acceptance.acceptance_reason
                )));
            }

            // Accepted but pointed elsewhere: follow the referral
            if let Some(suggested) = acceptance.suggested_aggregator() {
                if suggested != target && suggested != self.self_id {
                    retry_attempt += 1;
                    forced_target = Some(suggested);
                    tracing::debug!(
                        height,
                        from = %target.short(),
                        to = %suggested.short(),
                        "submission referred to the elected aggregator"
                    );
                    continue;
                }
                if suggested == self.self_id {
                    return self.process_locally(block, retry_attempt).await;
                }
            }

            tracing::info!(height, aggregator = %target.short(), "submission accepted");
            return Ok(SubmissionOutcome::Accepted {
                aggregator: target,
                attempts: retry_attempt,
            });
        }
    }

    /// Loopback fallback: run the aggregation round locally.
    async fn process_locally(
        &self,
        block: Block,
        attempts: u32,
    ) -> NetworkResult<SubmissionOutcome> {
        let candidate = CandidateBlock::new(block, self.self_id, unix_now());
        self.controller
            .process_aggregation_round(candidate)
            .await
            .map_err(NetworkError::ConsensusError)?;
        Ok(SubmissionOutcome::ProcessedLocally { attempts })
    }
}
