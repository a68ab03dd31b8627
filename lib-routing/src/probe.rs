//! Pre-cleanup probe protocol
//!
//! Before the maintenance loop may evict an unhealthy peer, the peer gets a
//! short network round-trip (the consensus-heartbeat RPC) to prove it is
//! still alive. Probes are bounded by a global concurrency semaphore and a
//! per-peer minimum interval; a probe timeout counts as a probe failure.
//!
//! Probe failures stay confined to peer-health bookkeeping. Nothing in here
//! propagates into consensus state.

use crate::peer::PeerId;
use crate::table::{BucketTable, ProbeVerdict};
use crate::{RoutingError, RoutingResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;

/// Network round-trip capability used for liveness probes.
///
/// Implemented over the consensus-heartbeat RPC by the network layer; kept
/// as a trait here so routing never depends on the network crate.
#[async_trait]
pub trait ProbePinger: Send + Sync {
    /// One liveness round-trip to `peer`. An `Err` is a failed probe.
    async fn ping(&self, peer: &PeerId) -> RoutingResult<()>;
}

/// Result of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Peer answered; retained and restored
    Alive,
    /// Peer failed but stays quarantined below the eviction threshold
    FailedRetained,
    /// Peer failed past the threshold and was evicted
    FailedEvicted,
    /// Peer failed past the threshold but the bucket floor deferred eviction
    FailedDeferred,
}

/// Schedules and executes pre-cleanup probes against the bucket table
pub struct ProbeManager {
    table: Arc<BucketTable>,
    pinger: Arc<dyn ProbePinger>,
    permits: Arc<Semaphore>,
}

impl ProbeManager {
    pub fn new(table: Arc<BucketTable>, pinger: Arc<dyn ProbePinger>) -> Self {
        let max_concurrent = table.config().probe_max_concurrent.max(1);
        Self {
            table,
            pinger,
            permits: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Probe one peer under the concurrency limit.
    pub async fn probe_peer(&self, peer: PeerId) -> RoutingResult<ProbeOutcome> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| RoutingError::ProbeFailed("probe semaphore closed".to_string()))?;

        let now = unix_now();
        self.table.mark_probe_pending(&peer, now)?;

        let timeout = self.table.config().probe_timeout;
        let result = tokio::time::timeout(timeout, self.pinger.ping(&peer)).await;

        let now = unix_now();
        match result {
            Ok(Ok(())) => {
                self.table.record_probe_success(&peer, now)?;
                Ok(ProbeOutcome::Alive)
            }
            Ok(Err(err)) => {
                tracing::debug!(peer = %peer.short(), error = %err, "probe transport failure");
                self.verdict_to_outcome(peer, now)
            }
            Err(_) => {
                tracing::debug!(peer = %peer.short(), "probe timed out");
                self.verdict_to_outcome(peer, now)
            }
        }
    }

    fn verdict_to_outcome(&self, peer: PeerId, now: u64) -> RoutingResult<ProbeOutcome> {
        Ok(match self.table.record_probe_failure(&peer, now)? {
            ProbeVerdict::Retained => ProbeOutcome::FailedRetained,
            ProbeVerdict::Evicted => ProbeOutcome::FailedEvicted,
            ProbeVerdict::Deferred => ProbeOutcome::FailedDeferred,
        })
    }

    /// One full probe cycle: gather cleanup candidates and probe them all,
    /// bounded by the semaphore. Returns `(probed, evicted)` counts.
    pub async fn probe_cycle(&self) -> (usize, usize) {
        let candidates = self.table.cleanup_candidates(unix_now());
        if candidates.is_empty() {
            return (0, 0);
        }
        tracing::debug!(count = candidates.len(), "starting probe cycle");

        let mut handles = Vec::with_capacity(candidates.len());
        for peer in candidates {
            let table = Arc::clone(&self.table);
            let pinger = Arc::clone(&self.pinger);
            let permits = Arc::clone(&self.permits);
            handles.push(tokio::spawn(async move {
                let manager = ProbeManager {
                    table,
                    pinger,
                    permits,
                };
                manager.probe_peer(peer).await
            }));
        }

        let mut probed = 0;
        let mut evicted = 0;
        for handle in handles {
            match handle.await {
                Ok(Ok(outcome)) => {
                    probed += 1;
                    if outcome == ProbeOutcome::FailedEvicted {
                        evicted += 1;
                    }
                }
                Ok(Err(err)) => {
                    // Peer may have been removed mid-cycle; log and move on
                    tracing::debug!(error = %err, "probe skipped");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "probe task panicked");
                }
            }
        }
        (probed, evicted)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KBucketConfig;
    use crate::peer::PeerState;
    use lib_crypto::HashAlgorithm;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn pid(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 32])
    }

    struct ScriptedPinger {
        alive: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProbePinger for ScriptedPinger {
        async fn ping(&self, _peer: &PeerId) -> RoutingResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.alive {
                Ok(())
            } else {
                Err(RoutingError::ProbeFailed("unreachable".to_string()))
            }
        }
    }

    struct SlowPinger;

    #[async_trait]
    impl ProbePinger for SlowPinger {
        async fn ping(&self, _peer: &PeerId) -> RoutingResult<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn test_table(min_floor: usize) -> Arc<BucketTable> {
        let mut config = KBucketConfig::default();
        config.min_peers_per_bucket = min_floor;
        config.probe_timeout = Duration::from_millis(50);
        config.cleanup_grace_period = Duration::from_secs(0);
        config.addr_protection_grace_period = Duration::from_secs(0);
        Arc::new(BucketTable::new(
            pid(0),
            HashAlgorithm::Sha256,
            config,
        ))
    }

    #[tokio::test]
    async fn test_probe_success_restores_peer() {
        let table = test_table(0);
        table.insert_at(pid(1), 1000).unwrap();
        for _ in 0..3 {
            table.record_failure_at(&pid(1), 1000).unwrap();
        }
        assert_eq!(table.snapshot(&pid(1)).unwrap().state, PeerState::Suspect);

        let pinger = Arc::new(ScriptedPinger {
            alive: true,
            calls: AtomicUsize::new(0),
        });
        let manager = ProbeManager::new(Arc::clone(&table), pinger.clone());

        let outcome = manager.probe_peer(pid(1)).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::Alive);
        assert_eq!(pinger.calls.load(Ordering::SeqCst), 1);

        let snapshot = table.snapshot(&pid(1)).unwrap();
        assert_eq!(snapshot.state, PeerState::Active);
        assert_eq!(snapshot.health_score, 100.0);
    }

    #[tokio::test]
    async fn test_probe_failures_evict_past_threshold() {
        let table = test_table(0);
        table.insert_at(pid(1), 1000).unwrap();

        let pinger = Arc::new(ScriptedPinger {
            alive: false,
            calls: AtomicUsize::new(0),
        });
        let manager = ProbeManager::new(Arc::clone(&table), pinger);

        assert_eq!(
            manager.probe_peer(pid(1)).await.unwrap(),
            ProbeOutcome::FailedRetained
        );
        assert_eq!(
            manager.probe_peer(pid(1)).await.unwrap(),
            ProbeOutcome::FailedEvicted
        );
        assert!(!table.contains(&pid(1)));
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        let table = test_table(0);
        table.insert_at(pid(1), 1000).unwrap();

        let manager = ProbeManager::new(Arc::clone(&table), Arc::new(SlowPinger));
        let outcome = manager.probe_peer(pid(1)).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::FailedRetained);
        assert_eq!(
            table.snapshot(&pid(1)).unwrap().state,
            PeerState::Quarantined
        );
    }

    #[tokio::test]
    async fn test_probe_cycle_probes_unhealthy_peers() {
        let table = test_table(0);
        table.insert_at(pid(1), 0).unwrap();
        table.insert_at(pid(2), 0).unwrap();
        // Only peer 1 becomes unhealthy
        for _ in 0..3 {
            table.record_failure_at(&pid(1), 0).unwrap();
        }

        let pinger = Arc::new(ScriptedPinger {
            alive: true,
            calls: AtomicUsize::new(0),
        });
        let manager = ProbeManager::new(Arc::clone(&table), pinger.clone());

        let (probed, evicted) = manager.probe_cycle().await;
        assert_eq!(probed, 1);
        assert_eq!(evicted, 0);
        assert_eq!(pinger.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_per_peer_probe_interval_respected() {
        let table = test_table(0);
        table.insert_at(pid(1), 0).unwrap();
        for _ in 0..3 {
            table.record_failure_at(&pid(1), 0).unwrap();
        }

        let pinger = Arc::new(ScriptedPinger {
            alive: false,
            calls: AtomicUsize::new(0),
        });
        let manager = ProbeManager::new(Arc::clone(&table), pinger.clone());

        let (first, _) = manager.probe_cycle().await;
        assert_eq!(first, 1);
        // Immediately after, the peer is inside probe_interval_min
        let (second, _) = manager.probe_cycle().await;
        assert_eq!(second, 0);
        assert_eq!(pinger.calls.load(Ordering::SeqCst), 1);
    }
}
