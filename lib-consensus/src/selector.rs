//! Distance selector
//!
//! Pure selection: the winning candidate is the one whose block hash is
//! XOR-closest to the parent hash, with ties broken by the lexicographically
//! smallest block hash. Every selection produces a [`DistanceProof`] that
//! receiving nodes verify before applying the broadcast block.
//!
//! Note XOR against a single parent cannot produce equal distances for
//! distinct hashes, so the tie-break only ever fires on duplicate hashes;
//! it is still implemented and proven because verification demands it.

use crate::types::{
    CandidateBlock, DistanceProof, DistanceResult, DISTANCE_ALGORITHM_ID,
};
use crate::{ConsensusError, ConsensusResult};
use lib_crypto::{hash_sha256_multiple, Hash};
use lib_routing::xor_distance;

/// Stateless distance-based block selection
pub struct DistanceSelector;

impl DistanceSelector {
    /// Measure every hash against the parent, sorted by candidate hash so the
    /// measurement list is independent of input order.
    pub fn measure(hashes: &[Hash], parent_hash: &Hash) -> Vec<DistanceResult> {
        let mut results: Vec<DistanceResult> = hashes
            .iter()
            .map(|hash| DistanceResult {
                candidate_hash: *hash,
                distance: xor_distance(&hash.into_bytes(), &parent_hash.into_bytes()),
            })
            .collect();
        results.sort_by(|a, b| a.candidate_hash.cmp(&b.candidate_hash));
        results
    }

    /// Select the winning hash among `hashes` and build its proof.
    pub fn select_hash(hashes: &[Hash], parent_hash: &Hash) -> ConsensusResult<(Hash, DistanceProof)> {
        if hashes.is_empty() {
            return Err(ConsensusError::NoCandidates(0));
        }

        let measurements = Self::measure(hashes, parent_hash);
        let min_distance = measurements
            .iter()
            .map(|m| m.distance)
            .min()
            .unwrap_or_default();
        let tied: Vec<Hash> = measurements
            .iter()
            .filter(|m| m.distance == min_distance)
            .map(|m| m.candidate_hash)
            .collect();

        // `measure` sorts by hash, so the first tied entry is the smallest
        let tie_break_applied = tied.len() > 1;
        let winner = tied[0];

        let summary_segments: Vec<Vec<u8>> = measurements
            .iter()
            .flat_map(|m| {
                [
                    m.candidate_hash.as_bytes().to_vec(),
                    m.distance.to_string().into_bytes(),
                ]
            })
            .collect();
        let summary_views: Vec<&[u8]> = summary_segments.iter().map(|s| s.as_slice()).collect();
        let distance_summary = Hash::from_bytes(hash_sha256_multiple(&summary_views));

        let mut proof = DistanceProof {
            selected_hash: winner,
            parent_hash: *parent_hash,
            selected_distance: min_distance,
            distance_summary,
            algorithm: DISTANCE_ALGORITHM_ID.to_string(),
            tie_break_applied,
            tie_break_proof: tie_break_applied.then(|| tied.clone()),
            proof_hash: Hash::default(),
        };
        proof.proof_hash = proof.compute_proof_hash();
        Ok((winner, proof))
    }

    /// Checked variant over raw bytes; fails on a malformed parent hash.
    pub fn select_hash_checked(
        hashes: &[Hash],
        parent_bytes: &[u8],
    ) -> ConsensusResult<(Hash, DistanceProof)> {
        let parent = Hash::from_slice(parent_bytes)
            .map_err(|e| ConsensusError::BadInput(format!("bad parent hash: {e}")))?;
        Self::select_hash(hashes, &parent)
    }

    /// Select the winning candidate block for a round.
    pub fn select_closest_block(
        candidates: &[CandidateBlock],
        parent_hash: &Hash,
    ) -> ConsensusResult<(CandidateBlock, DistanceProof)> {
        if candidates.is_empty() {
            return Err(ConsensusError::NoCandidates(0));
        }
        let hashes: Vec<Hash> = candidates.iter().map(|c| c.block_hash()).collect();
        let (winner_hash, proof) = Self::select_hash(&hashes, parent_hash)?;

        let winner = candidates
            .iter()
            .find(|c| c.block_hash() == winner_hash)
            .cloned()
            .ok_or_else(|| {
                ConsensusError::Fatal("selected hash missing from candidate set".to_string())
            })?;
        Ok((winner, proof))
    }

    /// Verify a proof received alongside a consensus-result broadcast.
    ///
    /// Recomputes the selected distance, checks the proof digest, and when a
    /// tie-break was applied checks the selected hash is the least of the
    /// tied set.
    pub fn verify_proof(proof: &DistanceProof) -> ConsensusResult<()> {
        if proof.algorithm != DISTANCE_ALGORITHM_ID {
            return Err(ConsensusError::InvalidProof(format!(
                "unknown algorithm {}",
                proof.algorithm
            )));
        }

        let recomputed = xor_distance(
            &proof.selected_hash.into_bytes(),
            &proof.parent_hash.into_bytes(),
        );
        if recomputed != proof.selected_distance {
            return Err(ConsensusError::InvalidProof(format!(
                "selected distance mismatch: recomputed {recomputed}, proof claims {}",
                proof.selected_distance
            )));
        }

        if proof.proof_hash != proof.compute_proof_hash() {
            return Err(ConsensusError::InvalidProof(
                "proof digest mismatch".to_string(),
            ));
        }

        if proof.tie_break_applied {
            let tied = proof.tie_break_proof.as_ref().ok_or_else(|| {
                ConsensusError::InvalidProof("tie-break applied without tied hashes".to_string())
            })?;
            if !tied.contains(&proof.selected_hash) {
                return Err(ConsensusError::InvalidProof(
                    "selected hash not among tied hashes".to_string(),
                ));
            }
            if tied.iter().any(|h| h < &proof.selected_hash) {
                return Err(ConsensusError::InvalidProof(
                    "tie-break did not pick the lexicographically least hash".to_string(),
                ));
            }
        } else if proof.tie_break_proof.is_some() {
            return Err(ConsensusError::InvalidProof(
                "tied hashes present without tie-break flag".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValidationStatus;
    use lib_blockchain::block::test_support::test_block;
    use lib_routing::PeerId;

    fn hash(byte: u8) -> Hash {
        Hash::from_bytes([byte; 32])
    }

    #[test]
    fn test_single_candidate_acceptance() {
        // One candidate: it wins, no tie-break
        let parent = hash(0x55);
        let (winner, proof) = DistanceSelector::select_hash(&[hash(0xAA)], &parent).unwrap();
        assert_eq!(winner, hash(0xAA));
        assert!(!proof.tie_break_applied);
        assert!(proof.tie_break_proof.is_none());
        DistanceSelector::verify_proof(&proof).unwrap();
    }

    #[test]
    fn test_xor_closest_selection() {
        // Against a zero parent the distance equals the hash, so the
        // numerically smallest hash wins.
        let parent = Hash::default();
        let candidates = vec![hash(0x0F), hash(0x10), hash(0x01)];
        let (winner, proof) = DistanceSelector::select_hash(&candidates, &parent).unwrap();
        assert_eq!(winner, hash(0x01));
        DistanceSelector::verify_proof(&proof).unwrap();
    }

    #[test]
    fn test_smaller_hash_wins_against_zero_parent() {
        let parent = Hash::default();
        let mut high = [0u8; 32];
        high[0] = 0x01;
        let mut low = [0u8; 32];
        low[31] = 0x01;

        // 0x0100..00 vs 0x0000..01: the smaller hash is also the closer one
        let (winner, _) =
            DistanceSelector::select_hash(&[Hash::from_bytes(high), Hash::from_bytes(low)], &parent)
                .unwrap();
        assert_eq!(winner, Hash::from_bytes(low));
    }

    #[test]
    fn test_lexicographic_tie_break_on_duplicate_hashes() {
        // Distinct hashes cannot tie against one parent; duplicates can.
        let parent = hash(0x55);
        let candidates = vec![hash(0xAA), hash(0xAA)];
        let (winner, proof) = DistanceSelector::select_hash(&candidates, &parent).unwrap();
        assert_eq!(winner, hash(0xAA));
        assert!(proof.tie_break_applied);
        assert_eq!(proof.tie_break_proof.as_ref().unwrap().len(), 2);
        DistanceSelector::verify_proof(&proof).unwrap();
    }

    #[test]
    fn test_empty_candidates_rejected() {
        let err = DistanceSelector::select_hash(&[], &hash(0x55)).unwrap_err();
        assert!(matches!(err, ConsensusError::NoCandidates(_)));
    }

    #[test]
    fn test_malformed_parent_rejected() {
        let err =
            DistanceSelector::select_hash_checked(&[hash(0xAA)], &[0u8; 31]).unwrap_err();
        assert!(matches!(err, ConsensusError::BadInput(_)));
    }

    #[test]
    fn test_selection_is_deterministic_and_order_independent() {
        let parent = hash(0x3C);
        let a = vec![hash(0x11), hash(0x22), hash(0x33)];
        let b = vec![hash(0x33), hash(0x11), hash(0x22)];

        let (winner_a, proof_a) = DistanceSelector::select_hash(&a, &parent).unwrap();
        let (winner_b, proof_b) = DistanceSelector::select_hash(&b, &parent).unwrap();
        assert_eq!(winner_a, winner_b);
        assert_eq!(proof_a.proof_hash, proof_b.proof_hash);
    }

    #[test]
    fn test_proof_round_trip_over_blocks() {
        let parent = hash(0x42);
        let candidates: Vec<CandidateBlock> = (0..5)
            .map(|nonce| {
                CandidateBlock::new(
                    test_block(10, parent, nonce),
                    PeerId::from_bytes([nonce as u8 + 1; 32]),
                    1000,
                )
            })
            .collect();

        let (winner, proof) =
            DistanceSelector::select_closest_block(&candidates, &parent).unwrap();
        assert_eq!(proof.selected_hash, winner.block_hash());
        assert_eq!(winner.validation_status, ValidationStatus::Pending);
        DistanceSelector::verify_proof(&proof).unwrap();
    }

    #[test]
    fn test_tampered_proof_fails_verification() {
        let parent = hash(0x42);
        let (_, proof) = DistanceSelector::select_hash(&[hash(0x07), hash(0x08)], &parent).unwrap();

        let mut wrong_distance = proof.clone();
        wrong_distance.selected_hash = hash(0x09);
        assert!(DistanceSelector::verify_proof(&wrong_distance).is_err());

        let mut wrong_digest = proof.clone();
        wrong_digest.distance_summary = hash(0xFF);
        assert!(DistanceSelector::verify_proof(&wrong_digest).is_err());

        let mut phantom_ties = proof;
        phantom_ties.tie_break_proof = Some(vec![hash(0x07)]);
        assert!(DistanceSelector::verify_proof(&phantom_ties).is_err());
    }

    #[test]
    fn test_verify_rejects_wrong_tie_winner() {
        let parent = hash(0x55);
        let (_, mut proof) =
            DistanceSelector::select_hash(&[hash(0xAA), hash(0xAA)], &parent).unwrap();

        // Claim a tie set containing a smaller hash than the selected one
        proof.tie_break_proof = Some(vec![hash(0x01), hash(0xAA)]);
        proof.proof_hash = proof.compute_proof_hash();
        assert!(DistanceSelector::verify_proof(&proof).is_err());
    }
}
