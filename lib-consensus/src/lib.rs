//! Weisyn Consensus Package
//!
//! Unified Aggregator Consensus: for each block height one node, elected by
//! XOR distance to a per-height routing key, collects candidate blocks from
//! miners, picks the candidate closest to the parent hash, applies it
//! locally, and broadcasts the decision.
//!
//! The package is organized as a single [`AggregationController`] composing
//! six single-purpose services: election, candidate pool, distance selector,
//! result distributor, state manager, and the runtime-state gate. The state
//! manager is the one source of truth for the current round state and height;
//! everything else observes snapshots.

pub mod config;
pub mod controller;
pub mod distributor;
pub mod election;
pub mod events;
pub mod pool;
pub mod runtime;
pub mod selector;
pub mod state;
pub mod types;

pub use config::AggregatorConfig;
pub use controller::AggregationController;
pub use distributor::{ConfirmationStatus, ResultDistributor, ResultPublisher};
pub use election::{routing_key, Election, RoutingTableManager};
pub use events::{EventHandler, NetworkQuality, NetworkQualityEvent};
pub use pool::{CandidatePool, PoolStats};
pub use runtime::{RuntimeState, RuntimeStateSnapshot, SyncMode};
pub use selector::DistanceSelector;
pub use state::{AggregationState, StateManager};
pub use types::{
    CandidateBlock, ConsensusOutcome, DistanceProof, DistanceResult, ValidationStatus,
    WaiverReason, DISTANCE_ALGORITHM_ID,
};

/// Result type alias for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Consensus error taxonomy.
///
/// Kinds, not layers: handlers translate these into structured rejections or
/// waivers; the controller logs per-round failures and keeps serving.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// Malformed input; reply with rejection, do not retry
    #[error("Bad input: {0}")]
    BadInput(String),

    /// Semantically invalid candidate; drop and log at debug
    #[error("Candidate rejected: {0}")]
    Rejected(String),

    /// Handler unable but not broken; submitter should re-route
    #[error("Waived: {0:?}")]
    Waived(types::WaiverReason),

    /// Retry with bounded attempts and backoff
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Local apply of a decided block failed; round aborts, nothing broadcast
    #[error("Inconsistent local state: {0}")]
    Inconsistent(String),

    /// Unrecoverable for this round; recover to Idle and keep serving
    #[error("Fatal: {0}")]
    Fatal(String),

    /// Node is not eligible to take part in consensus
    #[error("Node is not consensus eligible (sync mode {0:?})")]
    NotConsensusEligible(runtime::SyncMode),

    /// Selector invoked with an empty candidate set
    #[error("No candidates available for height {0}")]
    NoCandidates(u64),

    /// Every reachable peer is waived
    #[error("No eligible aggregator for height {0}")]
    NoEligibleAggregator(u64),

    /// Transition not present in the state-machine table
    #[error("Illegal state transition: {from:?} -> {to:?}")]
    IllegalTransition {
        from: state::AggregationState,
        to: state::AggregationState,
    },

    /// Proof verification failure
    #[error("Distance proof invalid: {0}")]
    InvalidProof(String),

    /// Error from a chain collaborator
    #[error("Chain error: {0}")]
    ChainError(#[from] lib_blockchain::BlockchainError),
}

impl ConsensusError {
    /// Whether the submitter should re-route to another aggregator
    pub fn is_waiver(&self) -> bool {
        matches!(self, ConsensusError::Waived(_))
    }
}
