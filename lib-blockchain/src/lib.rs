//! Weisyn Blockchain Package
//!
//! Block data structures and the narrow chain interfaces the consensus core
//! consumes. Validation and execution live behind the [`BlockValidator`] and
//! [`BlockProcessor`] traits; this package defines the contracts, not the
//! engines.

pub mod block;
pub mod events;
pub mod memory;
pub mod providers;

pub use block::{Block, BlockBody, BlockHeader, Transaction};
pub use events::ChainReorgEvent;
pub use memory::MemoryChain;
pub use providers::{BlockProcessor, BlockValidator, ChainQuery, TempStore};

/// Result type alias for blockchain operations
pub type BlockchainResult<T> = Result<T, BlockchainError>;

/// Blockchain error types
#[derive(Debug, thiserror::Error)]
pub enum BlockchainError {
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Block height {got} does not extend tip {tip}")]
    HeightMismatch { got: u64, tip: u64 },

    #[error("Parent hash mismatch at height {height}: expected {expected}, got {got}")]
    ParentMismatch {
        height: u64,
        expected: lib_crypto::Hash,
        got: lib_crypto::Hash,
    },

    #[error("Unknown height {0}")]
    UnknownHeight(u64),

    #[error("Signature verification failed: {0}")]
    BadSignature(String),

    #[error("Proof-of-work check failed: {0}")]
    BadProofOfWork(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}
