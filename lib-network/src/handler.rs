//! Consensus network handler
//!
//! Aggregator-side entry point for the three stream protocols and the
//! consensus-result topic. Internal failures never leak as transport errors:
//! submissions always get a structured acceptance, rejection, or waiver, and
//! broadcast handling logs and drops bad input.

use crate::constants::{
    PROTOCOL_BLOCK_SUBMISSION, PROTOCOL_HEARTBEAT, PROTOCOL_STATUS_QUERY,
};
use crate::messages::{
    decode, encode, unix_now, AggregatorBlockAcceptance, AggregatorStatusQuery,
    AggregatorStatusResponse, BaseMessage, ConsensusHeartbeat, ConsensusResultBroadcast,
    MinerBlockSubmission,
};
use crate::{NetworkError, NetworkResult};
use lib_blockchain::{BlockProcessor, BlockValidator, ChainQuery};
use lib_consensus::{
    AggregationController, AggregationState, AggregatorConfig, CandidateBlock, CandidatePool,
    DistanceSelector, Election, ResultDistributor, RuntimeState, StateManager, WaiverReason,
};
use lib_crypto::Hash;
use lib_routing::{BucketTable, PeerId};
use std::sync::Arc;

/// Dispatches inbound consensus RPCs and broadcasts
pub struct ConsensusNetworkHandler {
    self_id: PeerId,
    controller: Arc<AggregationController>,
    election: Arc<Election>,
    state: Arc<StateManager>,
    runtime: Arc<RuntimeState>,
    pool: Arc<CandidatePool>,
    chain: Arc<dyn ChainQuery>,
    validator: Arc<dyn BlockValidator>,
    processor: Arc<dyn BlockProcessor>,
    distributor: Arc<ResultDistributor>,
    table: Arc<BucketTable>,
    config: AggregatorConfig,
}

impl ConsensusNetworkHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_id: PeerId,
        controller: Arc<AggregationController>,
        election: Arc<Election>,
        state: Arc<StateManager>,
        runtime: Arc<RuntimeState>,
        pool: Arc<CandidatePool>,
        chain: Arc<dyn ChainQuery>,
        validator: Arc<dyn BlockValidator>,
        processor: Arc<dyn BlockProcessor>,
        distributor: Arc<ResultDistributor>,
        table: Arc<BucketTable>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            self_id,
            controller,
            election,
            state,
            runtime,
            pool,
            chain,
            validator,
            processor,
            distributor,
            table,
            config,
        }
    }

    /// Route an inbound stream request by protocol id
    pub async fn handle_request(
        &self,
        from: PeerId,
        protocol: &str,
        body: &[u8],
    ) -> NetworkResult<Vec<u8>> {
        match protocol {
            PROTOCOL_BLOCK_SUBMISSION => self.handle_block_submission(from, body).await,
            PROTOCOL_HEARTBEAT => self.handle_heartbeat(from, body).await,
            PROTOCOL_STATUS_QUERY => self.handle_status_query(from, body).await,
            other => Err(NetworkError::MalformedMessage(format!(
                "unknown protocol {other}"
            ))),
        }
    }

    /// Miner block submission: validate, walk the waiver ladder, then either
    /// run the round here or point the submitter at the elected aggregator.
    pub async fn handle_block_submission(
        &self,
        from: PeerId,
        body: &[u8],
    ) -> NetworkResult<Vec<u8>> {
        let submission: MinerBlockSubmission = match decode(body) {
            Ok(submission) => submission,
            Err(err) => {
                tracing::debug!(from = %from.short(), error = %err, "malformed submission");
                return encode(&self.rejection("", format!("malformed submission: {err}")));
            }
        };
        let request_id = submission.base.message_id.clone();
        let height = submission.candidate_block.height();
        self.note_peer(from);

        // Semantic validation through the external validator
        if let Err(err) = self.validator.validate(&submission.candidate_block).await {
            tracing::debug!(from = %from.short(), height, error = %err, "submission rejected");
            return encode(&self.rejection(&request_id, format!("invalid candidate: {err}")));
        }

        let local_height = self.chain.current_height().await.unwrap_or(0);

        // Waiver ladder: read-only, lookahead, busy with another height
        if self.runtime.is_read_only() {
            return encode(&self.waiver(&request_id, WaiverReason::ReadOnlyMode, local_height));
        }
        if height > local_height + self.config.height_lookahead {
            return encode(&self.waiver(
                &request_id,
                WaiverReason::HeightTooFarAhead,
                local_height,
            ));
        }
        let round_state = self.state.current();
        let round_busy = matches!(
            round_state,
            AggregationState::Collecting
                | AggregationState::Evaluating
                | AggregationState::Selecting
                | AggregationState::Distributing
        );
        if round_busy && self.state.current_height() != height {
            return encode(&self.waiver(
                &request_id,
                WaiverReason::AggregationInProgress,
                local_height,
            ));
        }

        let candidate = CandidateBlock::new(submission.candidate_block.clone(), from, unix_now());

        // A window already open for this height absorbs the candidate
        if round_state == AggregationState::Collecting && self.state.current_height() == height {
            return match self.controller.admit_candidate(candidate).await {
                Ok(_) => encode(&self.acceptance(&request_id, local_height, None)),
                Err(err) => encode(&self.rejection(&request_id, err.to_string())),
            };
        }

        // Election: run the round here or point the submitter at the winner
        match self.election.is_aggregator_for_height(height).await {
            Ok(true) => {
                let controller = Arc::clone(&self.controller);
                tokio::spawn(async move {
                    if let Err(err) = controller.process_aggregation_round(candidate).await {
                        tracing::warn!(height, error = %err, "spawned round failed");
                    }
                });
                encode(&self.acceptance(&request_id, local_height, None))
            }
            Ok(false) => {
                // Point the submitter at the winner, honoring the waivers it
                // already collected.
                let waived: std::collections::HashSet<_> =
                    submission.waived_peers().into_iter().collect();
                let aggregator = self
                    .election
                    .aggregator_for_height_with_waivers(height, &waived)
                    .await
                    .ok();
                encode(&self.acceptance(&request_id, local_height, aggregator))
            }
            Err(err) => {
                tracing::debug!(height, error = %err, "election failed for submission");
                encode(&self.rejection(&request_id, format!("election failed: {err}")))
            }
        }
    }

    /// Heartbeat: echo liveness and harvest broadcast confirmations.
    pub async fn handle_heartbeat(&self, from: PeerId, body: &[u8]) -> NetworkResult<Vec<u8>> {
        let heartbeat: ConsensusHeartbeat =
            decode(body).map_err(|e| NetworkError::MalformedMessage(e.to_string()))?;
        self.note_peer(from);

        // A heartbeat carrying a height confirms our broadcast of it
        self.distributor.record_confirmation(from, heartbeat.height);

        let local_height = self.chain.current_height().await.unwrap_or(0);
        encode(&ConsensusHeartbeat {
            base: BaseMessage::new(self.self_id),
            state: self.state.current(),
            height: local_height,
            timestamp: unix_now(),
        })
    }

    /// Status query: round state plus election result for the height.
    pub async fn handle_status_query(&self, from: PeerId, body: &[u8]) -> NetworkResult<Vec<u8>> {
        let query: AggregatorStatusQuery =
            decode(body).map_err(|e| NetworkError::MalformedMessage(e.to_string()))?;
        self.note_peer(from);

        let local_height = self.chain.current_height().await.unwrap_or(0);
        let height = if query.height == 0 {
            local_height + 1
        } else {
            query.height
        };
        let is_aggregator = self
            .election
            .is_aggregator_for_height(height)
            .await
            .unwrap_or(false);

        encode(&AggregatorStatusResponse {
            base: BaseMessage::new(self.self_id),
            state: self.state.current(),
            current_height: self.state.current_height(),
            candidate_count: self.pool.len(height) as u64,
            is_aggregator,
            timestamp: unix_now(),
        })
    }

    /// Consensus-result broadcast: verify the proof, validate the block,
    /// apply it, and advance the local chain. Errors are logged and dropped;
    /// a bad broadcast never disturbs local consensus state.
    pub async fn handle_result_broadcast(&self, from: PeerId, body: &[u8]) -> NetworkResult<()> {
        let broadcast: ConsensusResultBroadcast =
            decode(body).map_err(|e| NetworkError::MalformedMessage(e.to_string()))?;
        self.note_peer(from);

        let height = broadcast.final_block.height();
        let block_hash = broadcast.final_block.hash();

        let claimed = Hash::from_slice(&broadcast.selected_block_hash)
            .map_err(|e| NetworkError::MalformedMessage(format!("bad selected hash: {e}")))?;
        if claimed != block_hash {
            return Err(NetworkError::MalformedMessage(
                "selected hash does not match final block".to_string(),
            ));
        }

        // Our own broadcast: already applied before publish
        if broadcast.aggregator_peer_id == self.self_id.to_vec() {
            tracing::debug!(height, "ignoring own consensus broadcast");
            return Ok(());
        }

        DistanceSelector::verify_proof(&broadcast.decision_result)?;
        if broadcast.decision_result.selected_hash != block_hash {
            return Err(NetworkError::MalformedMessage(
                "proof covers a different block".to_string(),
            ));
        }

        self.validator
            .validate(&broadcast.final_block)
            .await
            .map_err(|e| NetworkError::MalformedMessage(format!("invalid final block: {e}")))?;

        self.processor
            .process_block(&broadcast.final_block)
            .await
            .map_err(|e| NetworkError::TransportFailure(format!("chain advance failed: {e}")))?;

        self.pool.clear_height(height);
        tracing::info!(
            height,
            hash = %block_hash,
            aggregator = %hex::encode(&broadcast.aggregator_peer_id[..4.min(broadcast.aggregator_peer_id.len())]),
            "consensus result applied from broadcast"
        );
        Ok(())
    }

    /// Track the peer and credit the interaction
    fn note_peer(&self, peer: PeerId) {
        if peer == self.self_id {
            return;
        }
        let _ = self.table.insert(peer);
        let _ = self.table.record_success(&peer);
    }

    fn acceptance(
        &self,
        request_id: &str,
        local_height: u64,
        forward_to: Option<PeerId>,
    ) -> AggregatorBlockAcceptance {
        let (reason, aggregator_bytes) = match forward_to {
            Some(peer) => (
                "not the aggregator for this height; re-route".to_string(),
                peer.to_vec(),
            ),
            None => ("accepted".to_string(), self.self_id.to_vec()),
        };
        AggregatorBlockAcceptance {
            base: BaseMessage::new(self.self_id),
            request_id: request_id.to_string(),
            accepted: true,
            acceptance_reason: reason,
            waived: false,
            waiver_reason: WaiverReason::None,
            local_height,
            aggregator_peer_id: aggregator_bytes,
            timestamp: unix_now(),
        }
    }

    fn waiver(
        &self,
        request_id: &str,
        reason: WaiverReason,
        local_height: u64,
    ) -> AggregatorBlockAcceptance {
        tracing::debug!(request_id, reason = reason.as_wire_str(), "submission waived");
        AggregatorBlockAcceptance {
            base: BaseMessage::new(self.self_id),
            request_id: request_id.to_string(),
            accepted: false,
            acceptance_reason: reason.as_wire_str().to_string(),
            waived: true,
            waiver_reason: reason,
            local_height,
            aggregator_peer_id: Vec::new(),
            timestamp: unix_now(),
        }
    }

    fn rejection(&self, request_id: &str, reason: String) -> AggregatorBlockAcceptance {
        AggregatorBlockAcceptance {
            base: BaseMessage::new(self.self_id),
            request_id: request_id.to_string(),
            accepted: false,
            acceptance_reason: reason,
            waived: false,
            waiver_reason: WaiverReason::None,
            local_height: 0,
            aggregator_peer_id: Vec::new(),
            timestamp: unix_now(),
        }
    }
}

#[async_trait::async_trait]
impl crate::testing::InboundRpc for ConsensusNetworkHandler {
    async fn handle(&self, from: PeerId, protocol: &str, body: &[u8]) -> NetworkResult<Vec<u8>> {
        self.handle_request(from, protocol, body).await
    }
}
