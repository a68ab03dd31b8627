//! Weisyn Networking Package
//!
//! Consensus-facing networking: the message schemas and protocol identifiers
//! of the aggregator RPCs and the consensus-result topic, the aggregator-side
//! handlers, and the submitter-side waiver re-routing. Stream framing and
//! gossip mechanics live below the [`transport`] traits; this package only
//! defines what goes over them.

pub mod constants;
pub mod handler;
pub mod messages;
pub mod submitter;
pub mod testing;
pub mod transport;

pub use constants::{
    PROTOCOL_BLOCK_SUBMISSION, PROTOCOL_HEARTBEAT, PROTOCOL_STATUS_QUERY,
    TOPIC_CONSENSUS_LATEST_BLOCK,
};
pub use handler::ConsensusNetworkHandler;
pub use messages::{
    AggregatorBlockAcceptance, AggregatorStatusQuery, AggregatorStatusResponse, BaseMessage,
    ConsensusHeartbeat, ConsensusResultBroadcast, MinerBlockSubmission,
};
pub use submitter::{SubmissionOutcome, SubmissionRouter};
pub use transport::{GossipPublisher, HeartbeatPinger, RequestTransport, ResultBroadcaster};

/// Result type alias for network operations
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Network error types
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Message exceeds maximum size ({0} bytes)")]
    MessageTooLarge(usize),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Peer {0} is unreachable")]
    PeerUnreachable(lib_routing::PeerId),

    #[error("Request timed out")]
    RequestTimeout,

    #[error("Consensus error: {0}")]
    ConsensusError(#[from] lib_consensus::ConsensusError),
}
