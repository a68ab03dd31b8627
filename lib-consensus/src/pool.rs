//! Candidate pool
//!
//! Bounded, deduplicated store of valid candidate blocks keyed by height.
//! Heights are independent entries in a concurrent map, so admission for one
//! height never contends with another. Contents outlive their round by a
//! configured TTL and are dropped eagerly when a reorg invalidates them.

use crate::types::{CandidateBlock, ValidationStatus};
use crate::{ConsensusError, ConsensusResult};
use dashmap::DashMap;
use lib_blockchain::ChainReorgEvent;
use lib_crypto::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Pool statistics counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub heights_tracked: usize,
    pub total_candidates: usize,
    pub admitted_total: u64,
    pub duplicates_ignored: u64,
    pub rejected_stale_or_future: u64,
    pub rejected_bad_parent: u64,
    pub evicted_overflow: u64,
    pub cleared_on_reorg: u64,
}

#[derive(Debug)]
struct HeightEntry {
    /// Candidates in arrival order; front is the eviction victim
    candidates: Vec<CandidateBlock>,
    /// Set when the round for this height completed
    round_closed_at: Option<u64>,
}

/// Bounded per-height candidate store
pub struct CandidatePool {
    heights: DashMap<u64, HeightEntry>,
    max_candidates: usize,
    ttl: Duration,
    admitted_total: AtomicU64,
    duplicates_ignored: AtomicU64,
    rejected_stale_or_future: AtomicU64,
    rejected_bad_parent: AtomicU64,
    evicted_overflow: AtomicU64,
    cleared_on_reorg: AtomicU64,
}

impl CandidatePool {
    pub fn new(max_candidates: usize, ttl: Duration) -> Self {
        Self {
            heights: DashMap::new(),
            max_candidates: max_candidates.max(1),
            ttl,
            admitted_total: AtomicU64::new(0),
            duplicates_ignored: AtomicU64::new(0),
            rejected_stale_or_future: AtomicU64::new(0),
            rejected_bad_parent: AtomicU64::new(0),
            evicted_overflow: AtomicU64::new(0),
            cleared_on_reorg: AtomicU64::new(0),
        }
    }

    /// Admit a candidate after chain-linkage checks.
    ///
    /// `expected_height` is the current tip height plus one and
    /// `expected_parent` the current tip hash. Signature and proof-of-work
    /// pre-checks are the caller's job through the external validator.
    ///
    /// Returns `true` when the candidate entered the pool, `false` when it
    /// was a duplicate.
    pub fn admit(
        &self,
        candidate: CandidateBlock,
        expected_height: u64,
        expected_parent: Hash,
    ) -> ConsensusResult<bool> {
        if candidate.height() != expected_height {
            self.rejected_stale_or_future.fetch_add(1, Ordering::Relaxed);
            return Err(ConsensusError::Rejected(format!(
                "stale or future candidate: height {} while expecting {}",
                candidate.height(),
                expected_height
            )));
        }
        if candidate.block.parent_hash() != expected_parent {
            self.rejected_bad_parent.fetch_add(1, Ordering::Relaxed);
            return Err(ConsensusError::Rejected(format!(
                "bad parent: {} while tip is {}",
                candidate.block.parent_hash(),
                expected_parent
            )));
        }

        let hash = candidate.block_hash();
        let mut entry = self
            .heights
            .entry(candidate.height())
            .or_insert_with(|| HeightEntry {
                candidates: Vec::new(),
                round_closed_at: None,
            });

        if entry.candidates.iter().any(|c| c.block_hash() == hash) {
            self.duplicates_ignored.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }

        if entry.candidates.len() >= self.max_candidates {
            let evicted = entry.candidates.remove(0);
            self.evicted_overflow.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                height = evicted.height(),
                hash = %evicted.block_hash().short(),
                "pool overflow, oldest candidate evicted"
            );
        }

        tracing::debug!(
            height = candidate.height(),
            hash = %hash.short(),
            submitter = %candidate.submitter_peer.short(),
            "candidate admitted"
        );
        entry.candidates.push(candidate);
        self.admitted_total.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// All candidates collected for a height
    pub fn get(&self, height: u64) -> Vec<CandidateBlock> {
        self.heights
            .get(&height)
            .map(|entry| entry.candidates.clone())
            .unwrap_or_default()
    }

    /// Number of candidates collected for a height
    pub fn len(&self, height: u64) -> usize {
        self.heights
            .get(&height)
            .map(|entry| entry.candidates.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.heights.is_empty()
    }

    /// Update the validation status of one candidate
    pub fn set_status(&self, height: u64, hash: Hash, status: ValidationStatus) {
        if let Some(mut entry) = self.heights.get_mut(&height) {
            for candidate in entry.candidates.iter_mut() {
                if candidate.block_hash() == hash {
                    candidate.validation_status = status;
                }
            }
        }
    }

    /// Drop candidates that failed re-validation, returning survivors
    pub fn retain_valid(&self, height: u64) -> Vec<CandidateBlock> {
        if let Some(mut entry) = self.heights.get_mut(&height) {
            entry
                .candidates
                .retain(|c| c.validation_status != ValidationStatus::Invalid);
            entry.candidates.clone()
        } else {
            Vec::new()
        }
    }

    /// Record that the round for a height finished; TTL eviction starts now
    pub fn mark_round_complete(&self, height: u64, now: u64) {
        if let Some(mut entry) = self.heights.get_mut(&height) {
            entry.round_closed_at = Some(now);
        }
    }

    /// Drop heights whose round closed more than the TTL ago
    pub fn expire(&self, now: u64) -> usize {
        let ttl = self.ttl.as_secs();
        let expired: Vec<u64> = self
            .heights
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .round_closed_at
                    .is_some_and(|closed| now.saturating_sub(closed) > ttl)
            })
            .map(|entry| *entry.key())
            .collect();
        for height in &expired {
            self.heights.remove(height);
        }
        expired.len()
    }

    /// Drop every height the reorg invalidated
    pub fn apply_reorg(&self, event: &ChainReorgEvent) -> usize {
        let invalidated: Vec<u64> = self
            .heights
            .iter()
            .filter(|entry| event.invalidates(*entry.key()))
            .map(|entry| *entry.key())
            .collect();
        for height in &invalidated {
            self.heights.remove(height);
        }
        if !invalidated.is_empty() {
            self.cleared_on_reorg
                .fetch_add(invalidated.len() as u64, Ordering::Relaxed);
            tracing::info!(
                new_tip = event.new_tip_height,
                cleared = invalidated.len(),
                "pool heights cleared by reorg"
            );
        }
        invalidated.len()
    }

    /// Drop one height
    pub fn clear_height(&self, height: u64) {
        self.heights.remove(&height);
    }

    /// Drop everything
    pub fn clear(&self) {
        self.heights.clear();
    }

    /// Aggregate statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            heights_tracked: self.heights.len(),
            total_candidates: self.heights.iter().map(|e| e.candidates.len()).sum(),
            admitted_total: self.admitted_total.load(Ordering::Relaxed),
            duplicates_ignored: self.duplicates_ignored.load(Ordering::Relaxed),
            rejected_stale_or_future: self.rejected_stale_or_future.load(Ordering::Relaxed),
            rejected_bad_parent: self.rejected_bad_parent.load(Ordering::Relaxed),
            evicted_overflow: self.evicted_overflow.load(Ordering::Relaxed),
            cleared_on_reorg: self.cleared_on_reorg.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_blockchain::block::test_support::test_block;
    use lib_routing::PeerId;

    fn candidate(height: u64, parent: Hash, nonce: u64) -> CandidateBlock {
        CandidateBlock::new(
            test_block(height, parent, nonce),
            PeerId::from_bytes([7u8; 32]),
            1000,
        )
    }

    fn pool() -> CandidatePool {
        CandidatePool::new(3, Duration::from_secs(60))
    }

    #[test]
    fn test_admit_and_get() {
        let pool = pool();
        let parent = Hash::from_bytes([1u8; 32]);
        assert!(pool.admit(candidate(5, parent, 0), 5, parent).unwrap());
        assert_eq!(pool.len(5), 1);
        assert_eq!(pool.get(5).len(), 1);
    }

    #[test]
    fn test_wrong_height_rejected() {
        let pool = pool();
        let parent = Hash::from_bytes([1u8; 32]);
        let err = pool.admit(candidate(7, parent, 0), 5, parent).unwrap_err();
        assert!(matches!(err, ConsensusError::Rejected(_)));
        assert_eq!(pool.stats().rejected_stale_or_future, 1);
    }

    #[test]
    fn test_wrong_parent_rejected() {
        let pool = pool();
        let parent = Hash::from_bytes([1u8; 32]);
        let other = Hash::from_bytes([2u8; 32]);
        let err = pool.admit(candidate(5, other, 0), 5, parent).unwrap_err();
        assert!(matches!(err, ConsensusError::Rejected(_)));
        assert_eq!(pool.stats().rejected_bad_parent, 1);
    }

    #[test]
    fn test_duplicates_ignored() {
        let pool = pool();
        let parent = Hash::from_bytes([1u8; 32]);
        assert!(pool.admit(candidate(5, parent, 0), 5, parent).unwrap());
        assert!(!pool.admit(candidate(5, parent, 0), 5, parent).unwrap());
        assert_eq!(pool.len(5), 1);
        assert_eq!(pool.stats().duplicates_ignored, 1);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let pool = pool();
        let parent = Hash::from_bytes([1u8; 32]);
        for nonce in 0..4 {
            pool.admit(candidate(5, parent, nonce), 5, parent).unwrap();
        }
        assert_eq!(pool.len(5), 3);
        assert_eq!(pool.stats().evicted_overflow, 1);

        // The first candidate is gone
        let first_hash = candidate(5, parent, 0).block_hash();
        assert!(!pool.get(5).iter().any(|c| c.block_hash() == first_hash));
    }

    #[test]
    fn test_retain_valid_drops_invalid() {
        let pool = pool();
        let parent = Hash::from_bytes([1u8; 32]);
        let bad = candidate(5, parent, 0);
        let bad_hash = bad.block_hash();
        pool.admit(bad, 5, parent).unwrap();
        pool.admit(candidate(5, parent, 1), 5, parent).unwrap();

        pool.set_status(5, bad_hash, ValidationStatus::Invalid);
        let survivors = pool.retain_valid(5);
        assert_eq!(survivors.len(), 1);
        assert_ne!(survivors[0].block_hash(), bad_hash);
    }

    #[test]
    fn test_ttl_expiry() {
        let pool = CandidatePool::new(3, Duration::from_secs(10));
        let parent = Hash::from_bytes([1u8; 32]);
        pool.admit(candidate(5, parent, 0), 5, parent).unwrap();
        pool.mark_round_complete(5, 1000);

        assert_eq!(pool.expire(1005), 0);
        assert_eq!(pool.expire(1011), 1);
        assert_eq!(pool.len(5), 0);
    }

    #[test]
    fn test_reorg_clears_invalidated_heights() {
        let pool = pool();
        let parent = Hash::from_bytes([1u8; 32]);
        pool.admit(candidate(99, parent, 0), 99, parent).unwrap();
        pool.admit(candidate(100, parent, 0), 100, parent).unwrap();

        let cleared = pool.apply_reorg(&ChainReorgEvent {
            old_tip_height: 100,
            new_tip_height: 99,
        });
        assert_eq!(cleared, 1);
        assert_eq!(pool.len(100), 0);
        assert_eq!(pool.len(99), 1);
    }

    #[test]
    fn test_clear_everything() {
        let pool = pool();
        let parent = Hash::from_bytes([1u8; 32]);
        pool.admit(candidate(5, parent, 0), 5, parent).unwrap();
        pool.clear();
        assert!(pool.is_empty());
    }
}
