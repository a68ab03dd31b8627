//! Protocol constants for the consensus network layer
//!
//! Stream protocols are length-prefixed request/response pairs; the topic is
//! a gossip channel. Framing lives in the transport implementation, not here.

/// Miner block submission RPC
pub const PROTOCOL_BLOCK_SUBMISSION: &str = "/weisyn/consensus/block_submission/1.0.0";

/// Consensus heartbeat RPC, also used by K-bucket liveness probes
pub const PROTOCOL_HEARTBEAT: &str = "/weisyn/consensus/heartbeat/1.0.0";

/// Aggregator status query RPC
pub const PROTOCOL_STATUS_QUERY: &str = "/weisyn/consensus/status_query/1.0.0";

/// Pubsub topic carrying consensus-result broadcasts
pub const TOPIC_CONSENSUS_LATEST_BLOCK: &str = "weisyn.consensus.latest_block.v1";

/// Wire schema version carried in every base message
pub const MESSAGE_VERSION: &str = "1.0.0";

/// Maximum accepted message size (1 MiB)
pub const MAX_MESSAGE_SIZE: usize = 1_048_576;
