//! K-bucket peer table
//!
//! Peers are placed in the bucket matching the common prefix length between
//! their hashed identifier and the local one. Each bucket is bounded at K
//! entries ordered least- to most-recently-useful, with a bounded LRU
//! replacement cache behind it.
//!
//! Concurrency model: one table-wide read-write lock guards structure
//! (membership, ordering, caches); each entry's health fields sit behind a
//! per-peer mutex so success/failure bookkeeping contends only on that peer.

use crate::config::KBucketConfig;
use crate::distance::{self, cpl, Distance};
use crate::peer::{PeerEntry, PeerId, PeerState, ProbeStatus};
use crate::{RoutingError, RoutingResult};
use lib_crypto::HashAlgorithm;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of K-buckets for 256-bit hashed identifiers
pub const NUM_BUCKETS: usize = 256;

/// Maximum bucket index; a CPL of 256 (identical ids) is capped here
pub const MAX_BUCKET_INDEX: usize = NUM_BUCKETS - 1;

/// Result of an insert attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Peer was already tracked; moved to most-recently-useful position
    AlreadyPresent,
    /// Peer appended to its bucket
    Added,
    /// A stale peer was moved to the replacement cache to make room
    ReplacedStale(PeerId),
    /// Bucket full with no stale peer; new peer parked in the replacement cache
    CachedForLater,
}

/// Read-only view of a tracked peer
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub dht_id: [u8; 32],
    pub state: PeerState,
    pub health_score: f64,
    pub failure_count: u32,
    pub probe_status: ProbeStatus,
}

/// Outcome of a recorded probe failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// Below the failure threshold; peer retained quarantined
    Retained,
    /// Threshold crossed and the peer was removed
    Evicted,
    /// Threshold crossed but eviction deferred by the bucket floor
    Deferred,
}

/// Routing table statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingStats {
    pub total_peers: usize,
    pub active_peers: usize,
    pub suspect_peers: usize,
    pub quarantined_peers: usize,
    pub non_empty_buckets: usize,
    pub full_buckets: usize,
    pub replacement_cached: usize,
    pub average_health: f64,
}

struct Bucket {
    /// Peer ids ordered least- to most-recently-useful
    order: Vec<PeerId>,
    /// Bounded cache of peers waiting for a slot
    replacements: LruCache<PeerId, PeerEntry>,
}

impl Bucket {
    fn new(cache_size: usize) -> Self {
        let cap = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            order: Vec::new(),
            replacements: LruCache::new(cap),
        }
    }
}

struct TableInner {
    buckets: Vec<Bucket>,
    /// Primary index; a peer id appears here exactly once
    entries: HashMap<PeerId, Arc<Mutex<PeerEntry>>>,
}

/// K-bucket table keyed by common prefix length with the local DHT id
pub struct BucketTable {
    self_id: PeerId,
    self_dht_id: [u8; 32],
    algorithm: HashAlgorithm,
    config: KBucketConfig,
    inner: RwLock<TableInner>,
}

impl BucketTable {
    pub fn new(self_id: PeerId, algorithm: HashAlgorithm, config: KBucketConfig) -> Self {
        let self_dht_id = algorithm.digest(self_id.as_bytes()).into_bytes();
        let buckets = (0..NUM_BUCKETS)
            .map(|_| Bucket::new(config.max_replacement_cache_size))
            .collect();
        Self {
            self_id,
            self_dht_id,
            algorithm,
            config,
            inner: RwLock::new(TableInner {
                buckets,
                entries: HashMap::new(),
            }),
        }
    }

    pub fn self_id(&self) -> PeerId {
        self.self_id
    }

    pub fn self_dht_id(&self) -> [u8; 32] {
        self.self_dht_id
    }

    pub fn config(&self) -> &KBucketConfig {
        &self.config
    }

    /// Bucket index for a hashed peer identifier
    fn bucket_index(&self, dht_id: &[u8; 32]) -> usize {
        (cpl(&self.self_dht_id, dht_id) as usize).min(MAX_BUCKET_INDEX)
    }

    /// Insert a peer, following the standard bucket flow.
    pub fn insert(&self, peer: PeerId) -> RoutingResult<InsertOutcome> {
        self.insert_at(peer, now_ts())
    }

    /// Insert with an explicit timestamp (testable variant).
    pub fn insert_at(&self, peer: PeerId, now: u64) -> RoutingResult<InsertOutcome> {
        if peer == self.self_id {
            return Err(RoutingError::BadPeerId(
                "cannot insert the local peer".to_string(),
            ));
        }

        let dht_id = self.algorithm.digest(peer.as_bytes()).into_bytes();
        let bucket_idx = self.bucket_index(&dht_id);
        let mut inner = self.inner.write();

        // Already tracked: refresh recency
        if inner.entries.contains_key(&peer) {
            let bucket = &mut inner.buckets[bucket_idx];
            if let Some(pos) = bucket.order.iter().position(|p| *p == peer) {
                bucket.order.remove(pos);
                bucket.order.push(peer);
            }
            return Ok(InsertOutcome::AlreadyPresent);
        }

        let entry = Arc::new(Mutex::new(PeerEntry::new(peer, dht_id, now)));

        // Room in the bucket
        if inner.buckets[bucket_idx].order.len() < self.config.bucket_size {
            inner.buckets[bucket_idx].order.push(peer);
            inner.entries.insert(peer, entry);
            tracing::debug!(peer = %peer.short(), bucket = bucket_idx, "peer added");
            return Ok(InsertOutcome::Added);
        }

        // Full: look for the stalest replaceable peer
        let grace = self.config.usefulness_grace_period.as_secs();
        let stale = inner.buckets[bucket_idx]
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id).map(|e| (*id, e.lock().clone())))
            .filter(|(_, e)| e.is_replaceable(now, grace))
            .min_by_key(|(_, e)| e.last_useful_at)
            .map(|(id, _)| id);

        if let Some(stale_id) = stale {
            let removed = self.detach_locked(&mut inner, &stale_id);
            if let Some(mut old_entry) = removed {
                old_entry.replaceable = true;
                inner.buckets[bucket_idx].replacements.put(stale_id, old_entry);
            }
            inner.buckets[bucket_idx].order.push(peer);
            inner.entries.insert(peer, entry);
            tracing::debug!(
                peer = %peer.short(),
                replaced = %stale_id.short(),
                bucket = bucket_idx,
                "stale peer moved to replacement cache"
            );
            return Ok(InsertOutcome::ReplacedStale(stale_id));
        }

        // No room: park the newcomer in the replacement cache
        let parked = entry.lock().clone();
        inner.buckets[bucket_idx].replacements.put(peer, parked);
        Ok(InsertOutcome::CachedForLater)
    }

    /// Remove a peer from bucket order and the primary index.
    /// Caller holds the write lock.
    fn detach_locked(&self, inner: &mut TableInner, peer: &PeerId) -> Option<PeerEntry> {
        let entry = inner.entries.remove(peer)?;
        let snapshot = entry.lock().clone();
        let bucket_idx = self.bucket_index(&snapshot.dht_id);
        let bucket = &mut inner.buckets[bucket_idx];
        if let Some(pos) = bucket.order.iter().position(|p| p == peer) {
            bucket.order.remove(pos);
        }
        Some(snapshot)
    }

    /// Remove a peer entirely, backfilling the freed slot from the
    /// replacement cache when one is waiting.
    pub fn remove(&self, peer: &PeerId) -> Option<PeerEntry> {
        self.remove_at(peer, now_ts())
    }

    fn remove_at(&self, peer: &PeerId, now: u64) -> Option<PeerEntry> {
        let mut inner = self.inner.write();
        let removed = self.detach_locked(&mut inner, peer)?;
        let bucket_idx = self.bucket_index(&removed.dht_id);
        self.backfill_locked(&mut inner, bucket_idx, now);
        Some(removed)
    }

    /// Promote the most recent replacement-cache peer into a free slot.
    fn backfill_locked(&self, inner: &mut TableInner, bucket_idx: usize, now: u64) {
        if inner.buckets[bucket_idx].order.len() >= self.config.bucket_size {
            return;
        }
        if let Some((id, cached)) = inner.buckets[bucket_idx].replacements.pop_lru() {
            let mut fresh = PeerEntry::new(id, cached.dht_id, now);
            fresh.added_at = cached.added_at.min(now);
            inner.buckets[bucket_idx].order.push(id);
            inner.entries.insert(id, Arc::new(Mutex::new(fresh)));
            tracing::debug!(peer = %id.short(), bucket = bucket_idx, "promoted from replacement cache");
        }
    }

    fn entry_handle(&self, peer: &PeerId) -> RoutingResult<Arc<Mutex<PeerEntry>>> {
        self.inner
            .read()
            .entries
            .get(peer)
            .cloned()
            .ok_or(RoutingError::PeerNotFound(*peer))
    }

    /// Record a successful interaction with a peer
    pub fn record_success(&self, peer: &PeerId) -> RoutingResult<()> {
        self.record_success_at(peer, now_ts())
    }

    pub fn record_success_at(&self, peer: &PeerId, now: u64) -> RoutingResult<()> {
        let handle = self.entry_handle(peer)?;
        handle.lock().record_success(now);

        // Success refreshes recency
        let mut inner = self.inner.write();
        let bucket_idx = {
            let snapshot = handle.lock();
            self.bucket_index(&snapshot.dht_id)
        };
        let bucket = &mut inner.buckets[bucket_idx];
        if let Some(pos) = bucket.order.iter().position(|p| p == peer) {
            bucket.order.remove(pos);
            bucket.order.push(*peer);
        }
        Ok(())
    }

    /// Record a failed interaction with a peer
    pub fn record_failure(&self, peer: &PeerId) -> RoutingResult<()> {
        self.record_failure_at(peer, now_ts())
    }

    pub fn record_failure_at(&self, peer: &PeerId, now: u64) -> RoutingResult<()> {
        let handle = self.entry_handle(peer)?;
        handle.lock().record_failure(
            now,
            self.config.failure_threshold,
            self.config.quarantine_duration.as_secs(),
        );
        Ok(())
    }

    /// Record a confirmed reachable address for a peer
    pub fn record_address_confirmed(&self, peer: &PeerId) -> RoutingResult<()> {
        let handle = self.entry_handle(peer)?;
        handle.lock().record_address_confirmed(now_ts());
        Ok(())
    }

    /// Maintenance pass: decay failure damage on every peer
    pub fn decay_all(&self, now: u64) {
        let handles: Vec<_> = self.inner.read().entries.values().cloned().collect();
        let half_life = self.config.health_decay_half_life.as_secs();
        for handle in handles {
            handle.lock().decay_health(now, half_life);
        }
    }

    /// Maintenance pass: promote expired quarantines to Suspect
    pub fn expire_quarantines(&self, now: u64) -> usize {
        let handles: Vec<_> = self.inner.read().entries.values().cloned().collect();
        let mut promoted = 0;
        for handle in handles {
            if handle.lock().check_quarantine_expired(now) {
                promoted += 1;
            }
        }
        promoted
    }

    /// Peers eligible for a pre-cleanup probe right now
    pub fn cleanup_candidates(&self, now: u64) -> Vec<PeerId> {
        let handles: Vec<_> = self.inner.read().entries.values().cloned().collect();
        let min_interval = self.config.probe_interval_min.as_secs();
        let mut candidates = Vec::new();
        for handle in handles {
            let entry = handle.lock();
            if entry.probe_status == ProbeStatus::Pending {
                continue;
            }
            if let Some(last) = entry.last_probe_at {
                if now.saturating_sub(last) < min_interval {
                    continue;
                }
            }
            if entry.is_cleanup_candidate(
                now,
                self.config.low_health_threshold,
                self.config.cleanup_grace_period.as_secs(),
                self.config.addr_protection_grace_period.as_secs(),
            ) {
                candidates.push(entry.id);
            }
        }
        candidates
    }

    /// Mark a peer's probe as scheduled
    pub fn mark_probe_pending(&self, peer: &PeerId, now: u64) -> RoutingResult<()> {
        let handle = self.entry_handle(peer)?;
        let mut entry = handle.lock();
        entry.probe_status = ProbeStatus::Pending;
        entry.last_probe_at = Some(now);
        Ok(())
    }

    /// Probe succeeded: the peer stays, fully restored
    pub fn record_probe_success(&self, peer: &PeerId, now: u64) -> RoutingResult<()> {
        let handle = self.entry_handle(peer)?;
        {
            let mut entry = handle.lock();
            entry.probe_status = ProbeStatus::Success;
            entry.record_success(now);
        }
        tracing::debug!(peer = %peer.short(), "probe succeeded, peer retained");
        Ok(())
    }

    /// Probe failed: retain quarantined below the threshold, evict at it,
    /// unless eviction would break the bucket floor.
    pub fn record_probe_failure(&self, peer: &PeerId, now: u64) -> RoutingResult<ProbeVerdict> {
        let handle = self.entry_handle(peer)?;
        let (fail_count, bucket_idx) = {
            let mut entry = handle.lock();
            entry.probe_status = ProbeStatus::Failed;
            entry.probe_fail_count += 1;
            (entry.probe_fail_count, self.bucket_index(&entry.dht_id))
        };

        if fail_count < self.config.probe_fail_threshold {
            let mut entry = handle.lock();
            entry.state = PeerState::Quarantined;
            entry.quarantined_until = now + self.config.quarantine_duration.as_secs();
            return Ok(ProbeVerdict::Retained);
        }

        // Bucket floor: never clean below the configured minimum
        {
            let inner = self.inner.read();
            if inner.buckets[bucket_idx].order.len() <= self.config.min_peers_per_bucket {
                tracing::debug!(
                    peer = %peer.short(),
                    bucket = bucket_idx,
                    "eviction deferred by bucket floor"
                );
                let mut entry = handle.lock();
                entry.state = PeerState::Quarantined;
                entry.quarantined_until = now + self.config.quarantine_duration.as_secs();
                return Ok(ProbeVerdict::Deferred);
            }
        }

        {
            let mut entry = handle.lock();
            entry.state = PeerState::Evicted;
        }
        self.remove_at(peer, now);
        tracing::info!(peer = %peer.short(), "peer evicted after failed probes");
        Ok(ProbeVerdict::Evicted)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.inner.read().entries.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn bucket_len(&self, bucket_idx: usize) -> usize {
        if bucket_idx >= NUM_BUCKETS {
            return 0;
        }
        self.inner.read().buckets[bucket_idx].order.len()
    }

    /// Snapshot a single peer
    pub fn snapshot(&self, peer: &PeerId) -> Option<PeerSnapshot> {
        let handle = self.inner.read().entries.get(peer).cloned()?;
        let entry = handle.lock();
        Some(snapshot_of(&entry))
    }

    /// Snapshots of every tracked peer
    pub fn all_peers(&self) -> Vec<PeerSnapshot> {
        let handles: Vec<_> = self.inner.read().entries.values().cloned().collect();
        handles
            .iter()
            .map(|handle| snapshot_of(&handle.lock()))
            .collect()
    }

    /// `(peer_id, dht_id)` pairs for every electable (non-evicted) peer
    pub fn election_peers(&self) -> Vec<(PeerId, [u8; 32])> {
        self.all_peers()
            .into_iter()
            .filter(|p| p.state != PeerState::Evicted)
            .map(|p| (p.id, p.dht_id))
            .collect()
    }

    /// The K peers closest to `target`, ascending by XOR distance
    pub fn closest_peers(&self, target: &[u8; 32], k: usize) -> Vec<(PeerId, Distance)> {
        distance::closest_k(target, self.election_peers(), k)
    }

    /// Aggregate statistics over buckets and peers
    pub fn stats(&self) -> RoutingStats {
        let inner = self.inner.read();
        let mut stats = RoutingStats::default();
        let mut health_sum = 0.0;

        for bucket in &inner.buckets {
            if !bucket.order.is_empty() {
                stats.non_empty_buckets += 1;
            }
            if bucket.order.len() >= self.config.bucket_size {
                stats.full_buckets += 1;
            }
            stats.replacement_cached += bucket.replacements.len();
        }

        for handle in inner.entries.values() {
            let entry = handle.lock();
            stats.total_peers += 1;
            health_sum += entry.health_score;
            match entry.state {
                PeerState::Active => stats.active_peers += 1,
                PeerState::Suspect => stats.suspect_peers += 1,
                PeerState::Quarantined => stats.quarantined_peers += 1,
                PeerState::Evicted => {}
            }
        }

        if stats.total_peers > 0 {
            stats.average_health = health_sum / stats.total_peers as f64;
        }
        stats
    }
}

fn snapshot_of(entry: &PeerEntry) -> PeerSnapshot {
    PeerSnapshot {
        id: entry.id,
        dht_id: entry.dht_id,
        state: entry.state,
        health_score: entry.health_score,
        failure_count: entry.failure_count,
        probe_status: entry.probe_status,
    }
}

/// Current Unix time in seconds
pub(crate) fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
