//! Consensus wire message schemas
//!
//! Field-exact schemas of the aggregator RPCs and the consensus-result
//! broadcast. Bodies are encoded with bincode behind [`encode`]/[`decode`];
//! length-prefix framing belongs to the transport.

use crate::constants::{MAX_MESSAGE_SIZE, MESSAGE_VERSION};
use crate::{NetworkError, NetworkResult};
use lib_blockchain::Block;
use lib_consensus::{AggregationState, DistanceProof, WaiverReason};
use lib_routing::PeerId;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Envelope fields common to every consensus message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BaseMessage {
    /// Unique message identifier
    pub message_id: String,
    /// Wire schema version
    pub version: String,
    /// Sender peer id bytes
    pub sender_id: Vec<u8>,
    /// Send time (Unix seconds)
    pub timestamp_unix: i64,
}

impl BaseMessage {
    pub fn new(sender: PeerId) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            version: MESSAGE_VERSION.to_string(),
            sender_id: sender.to_vec(),
            timestamp_unix: unix_now() as i64,
        }
    }

    /// Parse the sender id, failing on malformed bytes
    pub fn sender(&self) -> NetworkResult<PeerId> {
        PeerId::from_slice(&self.sender_id)
            .map_err(|e| NetworkError::MalformedMessage(format!("bad sender id: {e}")))
    }
}

/// Miner-to-aggregator candidate submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerBlockSubmission {
    pub base: BaseMessage,
    /// The proposed block
    pub candidate_block: Block,
    /// Miner signature over the block hash
    pub miner_signature: Vec<u8>,
    /// Aggregators that already waived this submission
    pub waived_aggregators: Vec<Vec<u8>>,
    /// Re-routing attempt counter
    pub retry_attempt: u32,
}

impl MinerBlockSubmission {
    /// Parse the waived-aggregator entries, dropping malformed ones
    pub fn waived_peers(&self) -> Vec<PeerId> {
        self.waived_aggregators
            .iter()
            .filter_map(|bytes| PeerId::from_slice(bytes).ok())
            .collect()
    }
}

/// Aggregator response to a block submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorBlockAcceptance {
    pub base: BaseMessage,
    /// Message id of the submission this answers
    pub request_id: String,
    /// Whether the candidate was accepted into a round
    pub accepted: bool,
    /// Human-readable acceptance or rejection detail
    pub acceptance_reason: String,
    /// Whether the aggregator waived the round
    pub waived: bool,
    /// Why the aggregator waived, when it did
    pub waiver_reason: WaiverReason,
    /// Responder's local tip height
    pub local_height: u64,
    /// The aggregator the submitter should route to, when known
    pub aggregator_peer_id: Vec<u8>,
    /// Response time (Unix seconds)
    pub timestamp: u64,
}

impl AggregatorBlockAcceptance {
    /// Parse the suggested aggregator, when present
    pub fn suggested_aggregator(&self) -> Option<PeerId> {
        if self.aggregator_peer_id.is_empty() {
            return None;
        }
        PeerId::from_slice(&self.aggregator_peer_id).ok()
    }
}

/// Liveness echo carrying consensus state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusHeartbeat {
    pub base: BaseMessage,
    /// Sender's aggregation state
    pub state: AggregationState,
    /// Sender's local tip height
    pub height: u64,
    /// Heartbeat time (Unix seconds)
    pub timestamp: u64,
}

/// Query for an aggregator's round status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorStatusQuery {
    pub base: BaseMessage,
    /// Height of interest; 0 queries the current round
    pub height: u64,
}

/// Status response: current round state and election result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorStatusResponse {
    pub base: BaseMessage,
    /// Responder's aggregation state
    pub state: AggregationState,
    /// Height of the round in flight (0 when idle)
    pub current_height: u64,
    /// Candidates collected for the queried height
    pub candidate_count: u64,
    /// Whether the responder is the aggregator for the queried height
    pub is_aggregator: bool,
    /// Response time (Unix seconds)
    pub timestamp: u64,
}

/// Decided-block announcement on the consensus-result topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResultBroadcast {
    pub base: BaseMessage,
    /// Hash of the selected block
    pub selected_block_hash: Vec<u8>,
    /// The decided block
    pub final_block: Block,
    /// The deciding aggregator
    pub aggregator_peer_id: Vec<u8>,
    /// Selection evidence
    pub decision_result: DistanceProof,
    /// Broadcast time (Unix seconds)
    pub broadcast_timestamp: u64,
}

/// Serialize a message body with bincode
pub fn encode<T: Serialize>(message: &T) -> NetworkResult<Vec<u8>> {
    let bytes = bincode::serialize(message)
        .map_err(|e| NetworkError::SerializationFailed(e.to_string()))?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(NetworkError::MessageTooLarge(bytes.len()));
    }
    Ok(bytes)
}

/// Deserialize a message body with bincode, bounding the input size
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> NetworkResult<T> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(NetworkError::MessageTooLarge(bytes.len()));
    }
    bincode::deserialize(bytes).map_err(|e| NetworkError::MalformedMessage(e.to_string()))
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_blockchain::block::test_support::test_block;
    use lib_crypto::Hash;

    fn pid(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 32])
    }

    #[test]
    fn test_base_message_sender_round_trip() {
        let base = BaseMessage::new(pid(7));
        assert_eq!(base.sender().unwrap(), pid(7));
        assert_eq!(base.version, MESSAGE_VERSION);
        assert!(!base.message_id.is_empty());
    }

    #[test]
    fn test_malformed_sender_rejected() {
        let mut base = BaseMessage::new(pid(7));
        base.sender_id = vec![1, 2, 3];
        assert!(matches!(
            base.sender(),
            Err(NetworkError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_submission_encode_decode() {
        let submission = MinerBlockSubmission {
            base: BaseMessage::new(pid(1)),
            candidate_block: test_block(5, Hash::from_bytes([2u8; 32]), 0),
            miner_signature: vec![0xAB; 64],
            waived_aggregators: vec![pid(3).to_vec()],
            retry_attempt: 2,
        };

        let bytes = encode(&submission).unwrap();
        let decoded: MinerBlockSubmission = decode(&bytes).unwrap();
        assert_eq!(decoded.retry_attempt, 2);
        assert_eq!(decoded.waived_peers(), vec![pid(3)]);
        assert_eq!(decoded.candidate_block.height(), 5);
    }

    #[test]
    fn test_garbage_bytes_are_malformed() {
        let result: NetworkResult<MinerBlockSubmission> = decode(&[0xFF; 16]);
        assert!(matches!(result, Err(NetworkError::MalformedMessage(_))));
    }

    #[test]
    fn test_oversize_input_rejected() {
        let huge = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let result: NetworkResult<ConsensusHeartbeat> = decode(&huge);
        assert!(matches!(result, Err(NetworkError::MessageTooLarge(_))));
    }

    #[test]
    fn test_acceptance_suggested_aggregator() {
        let mut acceptance = AggregatorBlockAcceptance {
            base: BaseMessage::new(pid(1)),
            request_id: "req".to_string(),
            accepted: true,
            acceptance_reason: String::new(),
            waived: false,
            waiver_reason: WaiverReason::None,
            local_height: 9,
            aggregator_peer_id: Vec::new(),
            timestamp: 0,
        };
        assert!(acceptance.suggested_aggregator().is_none());

        acceptance.aggregator_peer_id = pid(5).to_vec();
        assert_eq!(acceptance.suggested_aggregator(), Some(pid(5)));
    }
}
