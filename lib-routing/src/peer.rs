//! Peer identity and health lifecycle
//!
//! Every tracked peer carries a health score in `[0, 100]` and a lifecycle
//! state. Successes reset health to 100; each failure costs at least
//! [`HEALTH_FAILURE_PENALTY`] points; between failures the damage decays
//! exponentially with a configured half-life. All timestamps are Unix
//! seconds and passed in explicitly so the lifecycle is testable.

use crate::{RoutingError, RoutingResult};
use serde::{Deserialize, Serialize};

/// Health points removed per recorded failure
pub const HEALTH_FAILURE_PENALTY: f64 = 10.0;

/// Health score at which a Suspect peer is restored to Active
pub const HEALTH_RECOVERY_THRESHOLD: f64 = 70.0;

/// Opaque 32-byte peer identifier with a total order
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PeerId(bytes)
    }

    /// Create a peer id from a byte slice, failing when the length is not 32
    pub fn from_slice(bytes: &[u8]) -> RoutingResult<Self> {
        if bytes.len() != 32 {
            return Err(RoutingError::BadPeerId(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(bytes);
        Ok(PeerId(id))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Short hex prefix for log output
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({}..)", self.short())
    }
}

/// Peer lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PeerState {
    /// Healthy and routable
    Active,
    /// Accumulated failures past the threshold; still routable
    Suspect,
    /// Sidelined until `quarantined_until`
    Quarantined,
    /// Removed from routing decisions, pending drop
    Evicted,
}

/// Outcome tracking for the pre-cleanup probe protocol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ProbeStatus {
    /// No probe scheduled
    #[default]
    NotNeeded,
    /// Probe scheduled or in flight
    Pending,
    /// Last probe succeeded
    Success,
    /// Last probe failed
    Failed,
}

/// A peer tracked by the K-bucket table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Peer identifier
    pub id: PeerId,
    /// Hashed identifier used for bucket placement and distance
    pub dht_id: [u8; 32],
    /// Lifecycle state
    pub state: PeerState,
    /// Consecutive failure count since the last success
    pub failure_count: u32,
    /// Health score in [0, 100]
    pub health_score: f64,
    /// When the peer was added to the table
    pub added_at: u64,
    /// Last time the peer did something useful for us
    pub last_useful_at: u64,
    /// Last recorded failure
    pub last_failure_at: u64,
    /// Last time the health score was recomputed
    pub last_health_update_at: u64,
    /// Quarantine deadline; meaningful only in `Quarantined` state
    pub quarantined_until: u64,
    /// Last time an address for the peer was confirmed reachable
    pub last_addr_confirmed_at: u64,
    /// Probe protocol status
    pub probe_status: ProbeStatus,
    /// Consecutive failed probes
    pub probe_fail_count: u32,
    /// Last probe attempt, if any
    pub last_probe_at: Option<u64>,
    /// Eligible for replacement when its bucket overflows
    pub replaceable: bool,
}

impl PeerEntry {
    /// Create a fresh Active entry
    pub fn new(id: PeerId, dht_id: [u8; 32], now: u64) -> Self {
        Self {
            id,
            dht_id,
            state: PeerState::Active,
            failure_count: 0,
            health_score: 100.0,
            added_at: now,
            last_useful_at: now,
            last_failure_at: 0,
            last_health_update_at: now,
            quarantined_until: 0,
            last_addr_confirmed_at: now,
            probe_status: ProbeStatus::NotNeeded,
            probe_fail_count: 0,
            last_probe_at: None,
            replaceable: false,
        }
    }

    /// Record a successful interaction: full health restore.
    pub fn record_success(&mut self, now: u64) {
        self.state = PeerState::Active;
        self.failure_count = 0;
        self.health_score = 100.0;
        self.last_useful_at = now;
        self.last_health_update_at = now;
        self.quarantined_until = 0;
        self.probe_status = ProbeStatus::NotNeeded;
        self.probe_fail_count = 0;
        self.replaceable = false;
    }

    /// Record a failed interaction.
    ///
    /// Crossing `failure_threshold` turns an Active peer Suspect; crossing
    /// twice the threshold quarantines it. Failures while quarantined extend
    /// the deadline.
    pub fn record_failure(&mut self, now: u64, failure_threshold: u32, quarantine_secs: u64) {
        self.failure_count += 1;
        self.health_score = (self.health_score - HEALTH_FAILURE_PENALTY).max(0.0);
        self.last_failure_at = now;
        self.last_health_update_at = now;

        if self.failure_count >= failure_threshold.saturating_mul(2) {
            self.state = PeerState::Quarantined;
            self.quarantined_until = now + quarantine_secs;
        } else if self.failure_count >= failure_threshold && self.state == PeerState::Active {
            self.state = PeerState::Suspect;
        }
    }

    /// Decay accumulated failure damage with the configured half-life.
    ///
    /// Health never decreases here; a Suspect peer whose score recovers past
    /// [`HEALTH_RECOVERY_THRESHOLD`] is restored to Active.
    pub fn decay_health(&mut self, now: u64, half_life_secs: u64) {
        if now <= self.last_health_update_at || half_life_secs == 0 {
            return;
        }
        let elapsed = (now - self.last_health_update_at) as f64;
        let failure_portion = (100.0 - self.health_score).max(0.0);
        let decayed = failure_portion * 0.5_f64.powf(elapsed / half_life_secs as f64);
        self.health_score = (100.0 - decayed).clamp(0.0, 100.0);
        self.last_health_update_at = now;

        if self.state == PeerState::Suspect && self.health_score >= HEALTH_RECOVERY_THRESHOLD {
            self.state = PeerState::Active;
            self.failure_count = 0;
        }
    }

    /// Promote an expired quarantine to Suspect.
    /// Returns whether a transition happened.
    pub fn check_quarantine_expired(&mut self, now: u64) -> bool {
        if self.state == PeerState::Quarantined && now >= self.quarantined_until {
            self.state = PeerState::Suspect;
            self.quarantined_until = 0;
            return true;
        }
        false
    }

    /// Record a confirmed reachable address for the peer
    pub fn record_address_confirmed(&mut self, now: u64) {
        self.last_addr_confirmed_at = now;
    }

    /// Whether the peer can be swapped out when its bucket overflows
    pub fn is_replaceable(&self, now: u64, usefulness_grace_secs: u64) -> bool {
        now.saturating_sub(self.last_useful_at) > usefulness_grace_secs
    }

    /// Cleanup eligibility for the pre-cleanup probe protocol
    pub fn is_cleanup_candidate(
        &self,
        now: u64,
        low_health_threshold: f64,
        cleanup_grace_secs: u64,
        addr_protection_secs: u64,
    ) -> bool {
        let unhealthy = match self.state {
            PeerState::Suspect => true,
            PeerState::Quarantined => now >= self.quarantined_until,
            PeerState::Active => self.health_score <= low_health_threshold,
            PeerState::Evicted => false,
        } || self.health_score <= low_health_threshold;

        let past_grace = now.saturating_sub(self.added_at) > cleanup_grace_secs;
        let addr_protected = now.saturating_sub(self.last_addr_confirmed_at) <= addr_protection_secs;

        unhealthy && past_grace && !addr_protected && self.state != PeerState::Evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: u32 = 3;
    const QUARANTINE: u64 = 60;

    fn entry(now: u64) -> PeerEntry {
        PeerEntry::new(PeerId::from_bytes([1u8; 32]), [2u8; 32], now)
    }

    #[test]
    fn test_new_entry_is_healthy_active() {
        let peer = entry(1000);
        assert_eq!(peer.state, PeerState::Active);
        assert_eq!(peer.health_score, 100.0);
        assert_eq!(peer.failure_count, 0);
        assert_eq!(peer.probe_status, ProbeStatus::NotNeeded);
    }

    #[test]
    fn test_failure_penalty_and_suspect_transition() {
        let mut peer = entry(1000);
        for i in 0..THRESHOLD {
            peer.record_failure(1000 + i as u64, THRESHOLD, QUARANTINE);
        }
        assert_eq!(peer.state, PeerState::Suspect);
        assert_eq!(peer.health_score, 70.0);
        assert_eq!(peer.failure_count, 3);
    }

    #[test]
    fn test_quarantine_at_double_threshold() {
        let mut peer = entry(1000);
        for i in 0..(THRESHOLD * 2) {
            peer.record_failure(1000 + i as u64, THRESHOLD, QUARANTINE);
        }
        assert_eq!(peer.state, PeerState::Quarantined);
        assert_eq!(peer.quarantined_until, 1005 + QUARANTINE);
    }

    #[test]
    fn test_further_failures_extend_quarantine() {
        let mut peer = entry(1000);
        for i in 0..(THRESHOLD * 2) {
            peer.record_failure(1000 + i as u64, THRESHOLD, QUARANTINE);
        }
        let first_deadline = peer.quarantined_until;
        peer.record_failure(1050, THRESHOLD, QUARANTINE);
        assert!(peer.quarantined_until > first_deadline);
    }

    #[test]
    fn test_success_restores_full_health() {
        let mut peer = entry(1000);
        for i in 0..(THRESHOLD * 2) {
            peer.record_failure(1000 + i as u64, THRESHOLD, QUARANTINE);
        }
        peer.record_success(2000);
        assert_eq!(peer.state, PeerState::Active);
        assert_eq!(peer.health_score, 100.0);
        assert_eq!(peer.failure_count, 0);
        assert_eq!(peer.quarantined_until, 0);
    }

    #[test]
    fn test_health_bounds_hold_under_many_failures() {
        let mut peer = entry(1000);
        for i in 0..50 {
            peer.record_failure(1000 + i, THRESHOLD, QUARANTINE);
            assert!(peer.health_score >= 0.0);
            assert!(peer.health_score <= 100.0);
        }
        assert_eq!(peer.health_score, 0.0);
    }

    #[test]
    fn test_decay_recovers_health_over_time() {
        let mut peer = entry(1000);
        peer.record_failure(1000, THRESHOLD, QUARANTINE);
        peer.record_failure(1001, THRESHOLD, QUARANTINE);
        assert_eq!(peer.health_score, 80.0);

        // One half-life halves the damage
        peer.decay_health(1001 + 300, 300);
        assert!((peer.health_score - 90.0).abs() < 1e-9);

        // Decay never lowers health
        let before = peer.health_score;
        peer.decay_health(1001 + 600, 300);
        assert!(peer.health_score >= before);
    }

    #[test]
    fn test_decay_restores_suspect_to_active() {
        let mut peer = entry(1000);
        for i in 0..THRESHOLD {
            peer.record_failure(1000 + i as u64, THRESHOLD, QUARANTINE);
        }
        assert_eq!(peer.state, PeerState::Suspect);
        assert_eq!(peer.health_score, 70.0);

        // After one half-life health passes the recovery threshold
        peer.decay_health(1002 + 300, 300);
        assert!(peer.health_score >= HEALTH_RECOVERY_THRESHOLD);
        assert_eq!(peer.state, PeerState::Active);
    }

    #[test]
    fn test_quarantine_expiry_promotes_to_suspect() {
        let mut peer = entry(1000);
        for i in 0..(THRESHOLD * 2) {
            peer.record_failure(1000 + i as u64, THRESHOLD, QUARANTINE);
        }
        assert!(!peer.check_quarantine_expired(peer.quarantined_until - 1));
        assert_eq!(peer.state, PeerState::Quarantined);

        assert!(peer.check_quarantine_expired(peer.quarantined_until));
        assert_eq!(peer.state, PeerState::Suspect);
    }

    #[test]
    fn test_cleanup_candidate_respects_grace_periods() {
        let mut peer = entry(1000);
        for i in 0..THRESHOLD {
            peer.record_failure(1000 + i as u64, THRESHOLD, QUARANTINE);
        }
        // Too young and address recently confirmed
        assert!(!peer.is_cleanup_candidate(1010, 30.0, 120, 60));
        // Old enough, address stale
        assert!(peer.is_cleanup_candidate(1000 + 400, 30.0, 120, 60));
    }

    #[test]
    fn test_replaceable_after_usefulness_grace() {
        let peer = entry(1000);
        assert!(!peer.is_replaceable(1100, 600));
        assert!(peer.is_replaceable(1000 + 601, 600));
    }

    #[test]
    fn test_peer_id_from_slice_length_check() {
        assert!(PeerId::from_slice(&[0u8; 31]).is_err());
        assert!(PeerId::from_slice(&[0u8; 32]).is_ok());
    }
}
