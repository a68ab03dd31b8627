//! Routing table maintenance loop
//!
//! Periodic pass over the table: decay failure damage, promote expired
//! quarantines, then run a bounded probe cycle over cleanup candidates.
//! The loop observes a shutdown signal and exits promptly when it flips.

use crate::probe::ProbeManager;
use crate::table::BucketTable;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Background maintenance driver for a [`BucketTable`]
pub struct MaintenanceLoop {
    table: Arc<BucketTable>,
    probes: Arc<ProbeManager>,
}

impl MaintenanceLoop {
    pub fn new(table: Arc<BucketTable>, probes: Arc<ProbeManager>) -> Self {
        Self { table, probes }
    }

    /// Spawn the loop. It ticks at the configured maintenance interval and
    /// stops when `shutdown` observes `true`.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let interval = self.table.config().maintenance_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(interval_secs = interval.as_secs(), "routing maintenance started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    result = shutdown.changed() => {
                        if result.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("routing maintenance stopped");
        })
    }

    /// One maintenance pass: decay, quarantine expiry, probe cycle.
    pub async fn run_once(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        self.table.decay_all(now);
        let promoted = self.table.expire_quarantines(now);
        let (probed, evicted) = self.probes.probe_cycle().await;

        if promoted > 0 || probed > 0 {
            tracing::debug!(
                promoted,
                probed,
                evicted,
                peers = self.table.len(),
                "maintenance pass complete"
            );
        }
    }
}
