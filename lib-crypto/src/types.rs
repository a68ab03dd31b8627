//! Hash wrapper type
//!
//! 32-byte digest used for block hashes, peer DHT identifiers, and routing
//! keys. Ordering is lexicographic over the bytes, which is the big-endian
//! unsigned interpretation used for tie-breaking.

use crate::{CryptoError, CryptoResult};
use serde::{Deserialize, Serialize};

/// 32-byte content digest
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Size of a hash in bytes
    pub const LEN: usize = 32;

    /// Create a hash from a fixed 32-byte array
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// Create a hash from a byte slice, failing when the length is not 32
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != Self::LEN {
            return Err(CryptoError::InvalidLength(bytes.len()));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(bytes);
        Ok(Hash(hash))
    }

    /// Get hash as a byte slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get hash as the underlying array
    pub fn into_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Create hash from a hex string (with or without `0x` prefix)
    pub fn from_hex(hex_str: &str) -> CryptoResult<Self> {
        let hex_str = hex_str.trim_start_matches("0x");
        let bytes = hex::decode(hex_str).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// True when every byte is zero (the genesis parent)
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Short hex prefix for log output
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}
