//! In-memory chain backing
//!
//! A minimal chain used for local-mode operation and tests. Production
//! deployments inject engine-backed implementations of the provider traits;
//! the consensus core cannot tell the difference.

use crate::{
    Block, BlockProcessor, BlockValidator, BlockchainError, BlockchainResult, ChainQuery,
    TempStore,
};
use async_trait::async_trait;
use lib_crypto::{Hash, HashAlgorithm};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory block chain with a sealed genesis at height 0.
#[derive(Clone)]
pub struct MemoryChain {
    blocks: Arc<RwLock<Vec<Block>>>,
    algorithm: HashAlgorithm,
}

impl MemoryChain {
    /// Create a chain containing only the genesis block
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let genesis = Block::seal(
            crate::BlockHeader {
                version: 1,
                height: 0,
                parent_hash: Hash::default(),
                timestamp: 0,
                producer_pubkey: Vec::new(),
                body_root: Hash::default(),
                nonce: 0,
                block_hash: Hash::default(),
            },
            crate::BlockBody::default(),
            algorithm,
        );
        Self {
            blocks: Arc::new(RwLock::new(vec![genesis])),
            algorithm,
        }
    }

    /// Truncate the chain back to `new_tip_height`, dropping later blocks.
    /// Returns the number of blocks removed.
    pub async fn truncate_to(&self, new_tip_height: u64) -> usize {
        let mut blocks = self.blocks.write().await;
        let keep = (new_tip_height as usize + 1).min(blocks.len());
        let removed = blocks.len() - keep;
        blocks.truncate(keep);
        removed
    }

    /// Number of blocks stored, including genesis
    pub async fn len(&self) -> usize {
        self.blocks.read().await.len()
    }

    /// Whether only the genesis block exists
    pub async fn is_empty(&self) -> bool {
        self.blocks.read().await.len() <= 1
    }
}

#[async_trait]
impl ChainQuery for MemoryChain {
    async fn current_height(&self) -> BlockchainResult<u64> {
        let blocks = self.blocks.read().await;
        Ok(blocks.len() as u64 - 1)
    }

    async fn current_tip_hash(&self) -> BlockchainResult<Hash> {
        let blocks = self.blocks.read().await;
        blocks
            .last()
            .map(Block::hash)
            .ok_or_else(|| BlockchainError::UnknownHeight(0))
    }

    async fn block_hash_at(&self, height: u64) -> BlockchainResult<Hash> {
        let blocks = self.blocks.read().await;
        blocks
            .get(height as usize)
            .map(Block::hash)
            .ok_or(BlockchainError::UnknownHeight(height))
    }
}

#[async_trait]
impl BlockProcessor for MemoryChain {
    async fn process_block(&self, block: &Block) -> BlockchainResult<()> {
        let mut blocks = self.blocks.write().await;
        let tip = blocks
            .last()
            .ok_or(BlockchainError::UnknownHeight(0))?
            .clone();

        if block.height() != tip.height() + 1 {
            return Err(BlockchainError::HeightMismatch {
                got: block.height(),
                tip: tip.height(),
            });
        }
        if block.parent_hash() != tip.hash() {
            return Err(BlockchainError::ParentMismatch {
                height: block.height(),
                expected: tip.hash(),
                got: block.parent_hash(),
            });
        }
        if !block.verify_content_hash(self.algorithm) {
            return Err(BlockchainError::InvalidBlock(
                "content hash mismatch".to_string(),
            ));
        }

        blocks.push(block.clone());
        tracing::debug!(height = block.height(), hash = %block.hash(), "block applied");
        Ok(())
    }
}

#[async_trait]
impl BlockValidator for MemoryChain {
    async fn validate(&self, block: &Block) -> BlockchainResult<()> {
        if !block.verify_content_hash(self.algorithm) {
            return Err(BlockchainError::InvalidBlock(
                "content hash mismatch".to_string(),
            ));
        }
        if block.header.producer_pubkey.is_empty() {
            return Err(BlockchainError::BadSignature(
                "missing producer public key".to_string(),
            ));
        }
        Ok(())
    }
}

/// In-memory implementation of [`TempStore`]
#[derive(Clone, Default)]
pub struct MemoryTempStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryTempStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TempStore for MemoryTempStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> BlockchainResult<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> BlockchainResult<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> BlockchainResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}
