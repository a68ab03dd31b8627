//! Weisyn Hashing Package
//!
//! Content addressing for blocks, peers, and routing keys. The network hashes
//! everything down to 32 bytes: block headers, peer identifiers, and the
//! per-height routing keys that anchor aggregator election.
//!
//! SHA-256 is the default digest; BLAKE3 is available as a configured
//! alternative for deployments that prefer it.

pub mod hashing;
pub mod types;

pub use hashing::{hash_blake3, hash_sha256, hash_sha256_multiple, HashAlgorithm};
pub use types::Hash;

/// Result type alias for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Crypto error types
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid digest length: expected 32 bytes, got {0}")]
    InvalidLength(usize),

    #[error("Invalid hex string: {0}")]
    InvalidHex(String),

    #[error("Unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
}
