//! Weisyn Routing Package
//!
//! Kademlia-style XOR-distance routing over 32-byte identifiers. Peers are
//! bucketed by common prefix length with the local DHT identifier, carry a
//! health lifecycle (Active / Suspect / Quarantined / Evicted), and are only
//! evicted after a pre-cleanup probe confirms they are gone.
//!
//! Aggregator election consumes this table through read-only snapshots; peer
//! health bookkeeping never propagates errors into consensus state.

pub mod config;
pub mod distance;
pub mod maintenance;
pub mod peer;
pub mod probe;
pub mod table;

pub use config::KBucketConfig;
pub use distance::{closest_k, cpl, xor_distance, xor_distance_checked, Distance};
pub use maintenance::MaintenanceLoop;
pub use peer::{PeerEntry, PeerId, PeerState, ProbeStatus};
pub use probe::{ProbeManager, ProbeOutcome, ProbePinger};
pub use table::{BucketTable, InsertOutcome, PeerSnapshot, ProbeVerdict, RoutingStats};

/// Result type alias for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Routing error types
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("Bad input: {0}")]
    BadInput(String),

    #[error("Bad peer id: {0}")]
    BadPeerId(String),

    #[error("Peer {0} not found in routing table")]
    PeerNotFound(PeerId),

    #[error("Bucket {0} is full")]
    BucketFull(usize),

    #[error("Probe timed out for peer {0}")]
    ProbeTimeout(PeerId),

    #[error("Probe transport failure: {0}")]
    ProbeFailed(String),
}
