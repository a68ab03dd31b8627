//! Chain collaborator interfaces
//!
//! The consensus core never imports a concrete chain implementation. It talks
//! to validation, execution, chain state, and scratch storage through these
//! capability traits, injected at wiring time.

use crate::{Block, BlockchainResult};
use async_trait::async_trait;
use lib_crypto::Hash;

/// Validates candidate blocks before they enter a consensus round.
///
/// Covers signature and proof-of-work pre-checks. Height and parent linkage
/// are checked by the candidate pool itself against [`ChainQuery`].
#[async_trait]
pub trait BlockValidator: Send + Sync {
    /// Full validity pre-check for a candidate block
    async fn validate(&self, block: &Block) -> BlockchainResult<()>;
}

/// Applies a decided block to the local chain.
#[async_trait]
pub trait BlockProcessor: Send + Sync {
    /// Execute and persist the block. Must succeed before the result is
    /// broadcast; failure aborts the round.
    async fn process_block(&self, block: &Block) -> BlockchainResult<()>;
}

/// Read access to local chain state.
#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// Height of the current tip
    async fn current_height(&self) -> BlockchainResult<u64>;

    /// Hash of the current tip block
    async fn current_tip_hash(&self) -> BlockchainResult<Hash>;

    /// Hash of the block at `height`, used to derive routing keys
    async fn block_hash_at(&self, height: u64) -> BlockchainResult<Hash>;
}

/// Scratch key/value storage for round-scoped caching.
#[async_trait]
pub trait TempStore: Send + Sync {
    /// Store a value under a key
    async fn put(&self, key: &str, value: Vec<u8>) -> BlockchainResult<()>;

    /// Fetch a value by key
    async fn get(&self, key: &str) -> BlockchainResult<Option<Vec<u8>>>;

    /// Remove a key, returning whether it existed
    async fn remove(&self, key: &str) -> BlockchainResult<bool>;
}
