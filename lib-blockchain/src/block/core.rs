//! Core block structures
//!
//! Blocks are content-addressed: the block hash is the digest of the header
//! fields, computed once when the block is sealed and immutable afterwards.

use lib_crypto::{Hash, HashAlgorithm};
use serde::{Deserialize, Serialize};

/// Weisyn blockchain block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    /// Block header containing metadata
    pub header: BlockHeader,
    /// Block body
    pub body: BlockBody,
}

/// Block header with consensus and metadata information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block format version
    pub version: u32,
    /// Block height in the chain
    pub height: u64,
    /// Hash of the previous block
    pub parent_hash: Hash,
    /// Block creation timestamp (Unix seconds)
    pub timestamp: u64,
    /// Public key of the block producer
    pub producer_pubkey: Vec<u8>,
    /// Digest over the block body
    pub body_root: Hash,
    /// Producer nonce
    pub nonce: u64,
    /// Hash of the header (calculated at seal time)
    pub block_hash: Hash,
}

/// Block body
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockBody {
    /// Transactions carried by this block
    pub transactions: Vec<Transaction>,
}

/// Minimal transaction record
///
/// Transaction semantics are outside the consensus core; the body only needs
/// stable content for hashing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction identifier
    pub id: Hash,
    /// Opaque transaction payload
    pub payload: Vec<u8>,
}

impl BlockHeader {
    /// Compute the content digest of this header.
    ///
    /// The digest covers every field except `block_hash` itself, concatenated
    /// in declaration order with fixed-width big-endian integers.
    pub fn compute_hash(&self, algorithm: HashAlgorithm) -> Hash {
        algorithm.digest_multiple(&[
            &self.version.to_be_bytes(),
            &self.height.to_be_bytes(),
            self.parent_hash.as_bytes(),
            &self.timestamp.to_be_bytes(),
            &self.producer_pubkey,
            self.body_root.as_bytes(),
            &self.nonce.to_be_bytes(),
        ])
    }
}

impl BlockBody {
    /// Digest over the ordered transaction ids
    pub fn compute_root(&self, algorithm: HashAlgorithm) -> Hash {
        let segments: Vec<&[u8]> = self
            .transactions
            .iter()
            .map(|tx| tx.id.as_bytes())
            .collect();
        if segments.is_empty() {
            return Hash::default();
        }
        algorithm.digest_multiple(&segments)
    }
}

impl Block {
    /// Build and seal a block: fills in `body_root` and `block_hash`.
    pub fn seal(mut header: BlockHeader, body: BlockBody, algorithm: HashAlgorithm) -> Self {
        header.body_root = body.compute_root(algorithm);
        header.block_hash = header.compute_hash(algorithm);
        Self { header, body }
    }

    /// Get the block hash
    pub fn hash(&self) -> Hash {
        self.header.block_hash
    }

    /// Get the block height
    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Get the previous block hash
    pub fn parent_hash(&self) -> Hash {
        self.header.parent_hash
    }

    /// Get the timestamp
    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// Get the number of transactions
    pub fn transaction_count(&self) -> usize {
        self.body.transactions.len()
    }

    /// Get the serialized size of the block in bytes
    pub fn size(&self) -> usize {
        bincode::serialize(self).map(|data| data.len()).unwrap_or(0)
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.header.height == 0 && self.header.parent_hash.is_zero()
    }

    /// Verify the sealed hash and body root against the header contents
    pub fn verify_content_hash(&self, algorithm: HashAlgorithm) -> bool {
        let root_ok = self.body.compute_root(algorithm) == self.header.body_root;
        let hash_ok = self.header.compute_hash(algorithm) == self.header.block_hash;
        if !root_ok || !hash_ok {
            tracing::warn!(
                height = self.header.height,
                hash = %self.header.block_hash,
                root_ok,
                hash_ok,
                "block content hash mismatch"
            );
        }
        root_ok && hash_ok
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod test_support {
    use super::*;

    /// Build a sealed block for tests. The nonce perturbs the hash so tests
    /// can mint distinct candidates at the same height.
    pub fn test_block(height: u64, parent_hash: Hash, nonce: u64) -> Block {
        let header = BlockHeader {
            version: 1,
            height,
            parent_hash,
            timestamp: 1_700_000_000 + height,
            producer_pubkey: vec![0xEE; 32],
            body_root: Hash::default(),
            nonce,
            block_hash: Hash::default(),
        };
        Block::seal(header, BlockBody::default(), HashAlgorithm::Sha256)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_block;
    use super::*;

    #[test]
    fn test_seal_fills_hash_and_root() {
        let block = test_block(5, Hash::from_bytes([1u8; 32]), 0);
        assert!(!block.hash().is_zero());
        assert!(block.verify_content_hash(HashAlgorithm::Sha256));
    }

    #[test]
    fn test_hash_covers_header_fields() {
        let parent = Hash::from_bytes([1u8; 32]);
        let a = test_block(5, parent, 0);
        let b = test_block(5, parent, 1);
        assert_ne!(a.hash(), b.hash(), "nonce must perturb the block hash");

        let c = test_block(6, parent, 0);
        assert_ne!(a.hash(), c.hash(), "height must perturb the block hash");
    }

    #[test]
    fn test_hash_is_deterministic() {
        let parent = Hash::from_bytes([9u8; 32]);
        assert_eq!(test_block(3, parent, 7).hash(), test_block(3, parent, 7).hash());
    }

    #[test]
    fn test_tampered_block_fails_verification() {
        let mut block = test_block(2, Hash::from_bytes([4u8; 32]), 0);
        block.header.timestamp += 1;
        assert!(!block.verify_content_hash(HashAlgorithm::Sha256));
    }

    #[test]
    fn test_genesis_detection() {
        let genesis = test_block(0, Hash::default(), 0);
        assert!(genesis.is_genesis());
        let other = test_block(1, Hash::default(), 0);
        assert!(!other.is_genesis());
    }

    #[test]
    fn test_body_root_tracks_transactions() {
        let parent = Hash::from_bytes([2u8; 32]);
        let header = BlockHeader {
            version: 1,
            height: 1,
            parent_hash: parent,
            timestamp: 1_700_000_000,
            producer_pubkey: vec![0xEE; 32],
            body_root: Hash::default(),
            nonce: 0,
            block_hash: Hash::default(),
        };
        let body = BlockBody {
            transactions: vec![Transaction {
                id: Hash::from_bytes([3u8; 32]),
                payload: vec![1, 2, 3],
            }],
        };
        let block = Block::seal(header, body, HashAlgorithm::Sha256);
        assert!(!block.header.body_root.is_zero());
        assert_eq!(block.transaction_count(), 1);
    }
}
