//! Hashing module
//!
//! SHA-256 is the default digest for block hashes, DHT identifiers, and
//! routing keys. BLAKE3 is available as a configured alternative.

use crate::{CryptoError, CryptoResult, Hash};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Selectable hash algorithm
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256 (default)
    #[default]
    Sha256,
    /// BLAKE3
    Blake3,
}

impl HashAlgorithm {
    /// Digest a single byte slice
    pub fn digest(&self, data: &[u8]) -> Hash {
        match self {
            HashAlgorithm::Sha256 => Hash::from_bytes(hash_sha256(data)),
            HashAlgorithm::Blake3 => Hash::from_bytes(hash_blake3(data)),
        }
    }

    /// Digest multiple segments as one message
    pub fn digest_multiple(&self, segments: &[&[u8]]) -> Hash {
        match self {
            HashAlgorithm::Sha256 => Hash::from_bytes(hash_sha256_multiple(segments)),
            HashAlgorithm::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                for segment in segments {
                    hasher.update(segment);
                }
                Hash::from_bytes(hasher.finalize().into())
            }
        }
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "blake3" => Ok(HashAlgorithm::Blake3),
            other => Err(CryptoError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// SHA-256 hash function - primary hash function for weisyn
pub fn hash_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash multiple data segments as one SHA-256 message
pub fn hash_sha256_multiple(segments: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for segment in segments {
        hasher.update(segment);
    }
    hasher.finalize().into()
}

/// BLAKE3 hash function - alternative digest
pub fn hash_blake3(data: &[u8]) -> [u8; 32] {
    blake3::hash(data).into()
}
