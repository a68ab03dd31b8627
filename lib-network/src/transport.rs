//! Transport capability traits and consensus adapters
//!
//! The consensus core talks to the wire through two narrow capabilities: a
//! request/response stream transport and a gossip publisher. Adapters in
//! this module bridge them to the routing and consensus crates: liveness
//! probes ride the heartbeat RPC, and the result distributor publishes
//! through the consensus-result topic.

use crate::constants::{PROTOCOL_HEARTBEAT, TOPIC_CONSENSUS_LATEST_BLOCK};
use crate::messages::{
    decode, encode, unix_now, BaseMessage, ConsensusHeartbeat, ConsensusResultBroadcast,
};
use crate::NetworkResult;
use async_trait::async_trait;
use lib_consensus::{ConsensusOutcome, ConsensusResult, ResultPublisher, StateManager};
use lib_routing::{PeerId, ProbePinger, RoutingError, RoutingResult};
use std::sync::Arc;

/// Length-prefixed request/response stream capability
#[async_trait]
pub trait RequestTransport: Send + Sync {
    /// Send `body` to `peer` on `protocol` and await the response body
    async fn request(&self, peer: &PeerId, protocol: &str, body: Vec<u8>) -> NetworkResult<Vec<u8>>;
}

/// Topic-based gossip capability
#[async_trait]
pub trait GossipPublisher: Send + Sync {
    /// Publish `body` on `topic`
    async fn publish(&self, topic: &str, body: Vec<u8>) -> NetworkResult<()>;
}

/// Liveness probing over the consensus-heartbeat RPC.
///
/// A probe is one heartbeat round-trip: any decodable heartbeat response
/// counts as alive.
pub struct HeartbeatPinger {
    transport: Arc<dyn RequestTransport>,
    state: Arc<StateManager>,
    self_id: PeerId,
}

impl HeartbeatPinger {
    pub fn new(
        transport: Arc<dyn RequestTransport>,
        state: Arc<StateManager>,
        self_id: PeerId,
    ) -> Self {
        Self {
            transport,
            state,
            self_id,
        }
    }
}

#[async_trait]
impl ProbePinger for HeartbeatPinger {
    async fn ping(&self, peer: &PeerId) -> RoutingResult<()> {
        let heartbeat = ConsensusHeartbeat {
            base: BaseMessage::new(self.self_id),
            state: self.state.current(),
            height: self.state.current_height(),
            timestamp: unix_now(),
        };
        let body = encode(&heartbeat)
            .map_err(|e| RoutingError::ProbeFailed(format!("encode failed: {e}")))?;

        let response = self
            .transport
            .request(peer, PROTOCOL_HEARTBEAT, body)
            .await
            .map_err(|e| RoutingError::ProbeFailed(e.to_string()))?;

        let _echo: ConsensusHeartbeat = decode(&response)
            .map_err(|e| RoutingError::ProbeFailed(format!("bad heartbeat echo: {e}")))?;
        Ok(())
    }
}

/// Publishes consensus outcomes on the result topic.
pub struct ResultBroadcaster {
    publisher: Arc<dyn GossipPublisher>,
    self_id: PeerId,
}

impl ResultBroadcaster {
    pub fn new(publisher: Arc<dyn GossipPublisher>, self_id: PeerId) -> Self {
        Self { publisher, self_id }
    }

    /// Build the wire broadcast for an outcome
    pub fn broadcast_for(&self, outcome: &ConsensusOutcome) -> ConsensusResultBroadcast {
        ConsensusResultBroadcast {
            base: BaseMessage::new(self.self_id),
            selected_block_hash: outcome.selected_hash.as_bytes().to_vec(),
            final_block: outcome.final_block.clone(),
            aggregator_peer_id: outcome.aggregator_id.to_vec(),
            decision_result: outcome.distance_proof.clone(),
            broadcast_timestamp: outcome.broadcast_ts,
        }
    }
}

#[async_trait]
impl ResultPublisher for ResultBroadcaster {
    async fn publish_result(&self, outcome: &ConsensusOutcome) -> ConsensusResult<()> {
        let broadcast = self.broadcast_for(outcome);
        let body = encode(&broadcast).map_err(|e| {
            lib_consensus::ConsensusError::Transient(format!("encode failed: {e}"))
        })?;
        self.publisher
            .publish(TOPIC_CONSENSUS_LATEST_BLOCK, body)
            .await
            .map_err(|e| lib_consensus::ConsensusError::Transient(e.to_string()))
    }
}

impl std::fmt::Debug for HeartbeatPinger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatPinger")
            .field("self_id", &self.self_id)
            .finish_non_exhaustive()
    }
}
