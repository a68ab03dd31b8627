//! Core types for the aggregator consensus

use lib_blockchain::Block;
use lib_crypto::{hash_sha256_multiple, Hash};
use lib_routing::{Distance, PeerId};
use serde::{Deserialize, Serialize};

/// Identifier of the selection algorithm carried inside distance proofs
pub const DISTANCE_ALGORITHM_ID: &str = "xor_distance_v1";

/// Validation status of a candidate block
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValidationStatus {
    /// Admitted, awaiting batch re-validation
    Pending,
    /// Passed batch re-validation
    Valid,
    /// Failed re-validation; dropped before selection
    Invalid,
}

/// A candidate block inside a collection window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateBlock {
    /// The proposed block
    pub block: Block,
    /// Peer that submitted the candidate
    pub submitter_peer: PeerId,
    /// When the submission arrived (Unix seconds)
    pub received_at: u64,
    /// Validation status
    pub validation_status: ValidationStatus,
}

impl CandidateBlock {
    pub fn new(block: Block, submitter_peer: PeerId, received_at: u64) -> Self {
        Self {
            block,
            submitter_peer,
            received_at,
            validation_status: ValidationStatus::Pending,
        }
    }

    /// Hash of the candidate block
    pub fn block_hash(&self) -> Hash {
        self.block.hash()
    }

    /// Height of the candidate block
    pub fn height(&self) -> u64 {
        self.block.height()
    }
}

/// Per-candidate distance measurement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DistanceResult {
    /// Hash of the measured candidate
    pub candidate_hash: Hash,
    /// XOR distance to the parent hash
    pub distance: Distance,
}

/// Verifiable evidence that the chosen block is the XOR-closest candidate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DistanceProof {
    /// Hash of the selected block
    pub selected_hash: Hash,
    /// Parent hash the distances were measured against
    pub parent_hash: Hash,
    /// Distance of the selected block
    pub selected_distance: Distance,
    /// Digest over every `(candidate_hash, distance)` pair observed
    pub distance_summary: Hash,
    /// Selection algorithm identifier
    pub algorithm: String,
    /// Whether the lexicographic tie-break was applied
    pub tie_break_applied: bool,
    /// Hashes that tied on minimal distance, when a tie-break was applied
    pub tie_break_proof: Option<Vec<Hash>>,
    /// Digest over the fields above
    pub proof_hash: Hash,
}

impl DistanceProof {
    /// Recompute the digest over the proof fields
    pub fn compute_proof_hash(&self) -> Hash {
        let mut segments: Vec<Vec<u8>> = vec![
            self.selected_hash.as_bytes().to_vec(),
            self.parent_hash.as_bytes().to_vec(),
            self.selected_distance.as_bytes().to_vec(),
            self.distance_summary.as_bytes().to_vec(),
            self.algorithm.as_bytes().to_vec(),
            vec![self.tie_break_applied as u8],
        ];
        if let Some(tied) = &self.tie_break_proof {
            for hash in tied {
                segments.push(hash.as_bytes().to_vec());
            }
        }
        let views: Vec<&[u8]> = segments.iter().map(|s| s.as_slice()).collect();
        Hash::from_bytes(hash_sha256_multiple(&views))
    }
}

/// The decision produced by a completed round, as handed to the distributor
/// and (via the network layer) to the rest of the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    /// Decided height
    pub height: u64,
    /// Hash of the selected block
    pub selected_hash: Hash,
    /// The selected block itself
    pub final_block: Block,
    /// Evidence for the selection
    pub distance_proof: DistanceProof,
    /// The aggregator that decided the round
    pub aggregator_id: PeerId,
    /// When the decision was broadcast (Unix seconds)
    pub broadcast_ts: u64,
}

/// Reasons an elected aggregator declines a round
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum WaiverReason {
    /// Not waived
    #[default]
    None,
    /// Submission height is too far above the local tip
    HeightTooFarAhead,
    /// A round for a different height is already in flight
    AggregationInProgress,
    /// Node is in read-only mode
    ReadOnlyMode,
}

impl WaiverReason {
    /// Wire identifier, matching the acceptance message enum
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            WaiverReason::None => "WAIVER_NONE",
            WaiverReason::HeightTooFarAhead => "WAIVER_HEIGHT_TOO_FAR_AHEAD",
            WaiverReason::AggregationInProgress => "WAIVER_AGGREGATION_IN_PROGRESS",
            WaiverReason::ReadOnlyMode => "WAIVER_READ_ONLY_MODE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_blockchain::block::test_support::test_block;

    #[test]
    fn test_candidate_accessors() {
        let block = test_block(4, Hash::from_bytes([1u8; 32]), 0);
        let expected_hash = block.hash();
        let candidate = CandidateBlock::new(block, PeerId::from_bytes([9u8; 32]), 1234);

        assert_eq!(candidate.height(), 4);
        assert_eq!(candidate.block_hash(), expected_hash);
        assert_eq!(candidate.validation_status, ValidationStatus::Pending);
    }

    #[test]
    fn test_proof_hash_changes_with_fields() {
        let base = DistanceProof {
            selected_hash: Hash::from_bytes([1u8; 32]),
            parent_hash: Hash::from_bytes([2u8; 32]),
            selected_distance: Distance([3u8; 32]),
            distance_summary: Hash::from_bytes([4u8; 32]),
            algorithm: DISTANCE_ALGORITHM_ID.to_string(),
            tie_break_applied: false,
            tie_break_proof: None,
            proof_hash: Hash::default(),
        };
        let hash_a = base.compute_proof_hash();

        let mut changed = base.clone();
        changed.tie_break_applied = true;
        assert_ne!(hash_a, changed.compute_proof_hash());

        let mut with_ties = base.clone();
        with_ties.tie_break_proof = Some(vec![Hash::from_bytes([5u8; 32])]);
        assert_ne!(hash_a, with_ties.compute_proof_hash());
    }

    #[test]
    fn test_waiver_wire_strings() {
        assert_eq!(WaiverReason::None.as_wire_str(), "WAIVER_NONE");
        assert_eq!(
            WaiverReason::ReadOnlyMode.as_wire_str(),
            "WAIVER_READ_ONLY_MODE"
        );
    }
}
