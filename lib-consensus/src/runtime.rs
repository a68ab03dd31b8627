//! Runtime-state gate
//!
//! A process-wide snapshot of sync mode and connectivity, consulted before
//! every round. Light nodes are never consensus eligible; a node that is
//! online but not fully synced proceeds in local mode with degraded
//! confirmation semantics.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Chain synchronization mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Headers-only; cannot aggregate
    Light,
    /// Recent state only
    Pruned,
    /// Complete current state
    #[default]
    Full,
    /// Complete history
    Archive,
}

impl std::str::FromStr for SyncMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(SyncMode::Light),
            "pruned" => Ok(SyncMode::Pruned),
            "full" => Ok(SyncMode::Full),
            "archive" => Ok(SyncMode::Archive),
            _ => Err(()),
        }
    }
}

/// Point-in-time view of the node's runtime state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeStateSnapshot {
    pub sync_mode: SyncMode,
    pub is_fully_synced: bool,
    pub is_online: bool,
}

impl RuntimeStateSnapshot {
    /// Consensus participation requires a non-light node that is online
    pub fn is_consensus_eligible(&self) -> bool {
        self.sync_mode != SyncMode::Light && self.is_online
    }
}

/// Thread-safe holder of the runtime state
pub struct RuntimeState {
    inner: RwLock<RuntimeStateSnapshot>,
    read_only: RwLock<bool>,
}

impl RuntimeState {
    pub fn new(sync_mode: SyncMode) -> Self {
        Self {
            inner: RwLock::new(RuntimeStateSnapshot {
                sync_mode,
                is_fully_synced: false,
                is_online: false,
            }),
            read_only: RwLock::new(false),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> RuntimeStateSnapshot {
        *self.inner.read()
    }

    /// Convenience mirror of [`RuntimeStateSnapshot::is_consensus_eligible`]
    pub fn is_consensus_eligible(&self) -> bool {
        self.snapshot().is_consensus_eligible()
    }

    /// Whether the node refuses submissions outright
    pub fn is_read_only(&self) -> bool {
        *self.read_only.read()
    }

    pub fn set_read_only(&self, read_only: bool) {
        *self.read_only.write() = read_only;
    }

    pub fn set_online(&self, online: bool) {
        self.inner.write().is_online = online;
    }

    pub fn set_fully_synced(&self, synced: bool) {
        self.inner.write().is_fully_synced = synced;
    }

    pub fn set_sync_mode(&self, mode: SyncMode) {
        self.inner.write().sync_mode = mode;
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new(SyncMode::Full)
    }
}
