//! XOR distance over 32-byte identifiers
//!
//! Pure functions, no state. Distances are 256-bit unsigned values compared
//! big-endian, which is exact for 32-byte inputs.

use crate::peer::PeerId;
use crate::{RoutingError, RoutingResult};
use serde::{Deserialize, Serialize};

/// 256-bit XOR distance, ordered as a big-endian unsigned integer
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Distance(pub [u8; 32]);

impl Distance {
    /// The zero distance (identical inputs)
    pub const ZERO: Distance = Distance([0u8; 32]);

    /// Maximum representable distance
    pub const MAX: Distance = Distance([0xFF; 32]);

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Number of leading zero bits; 256 for the zero distance
    pub fn leading_zeros(&self) -> u32 {
        let mut zeros = 0u32;
        for byte in &self.0 {
            if *byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for Distance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Distance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Distance({})", hex::encode(self.0))
    }
}

/// XOR distance between two 32-byte identifiers
pub fn xor_distance(a: &[u8; 32], b: &[u8; 32]) -> Distance {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    Distance(out)
}

/// XOR distance over byte slices, failing when either input is not 32 bytes
pub fn xor_distance_checked(a: &[u8], b: &[u8]) -> RoutingResult<Distance> {
    if a.len() != 32 {
        return Err(RoutingError::BadInput(format!(
            "left operand is {} bytes, expected 32",
            a.len()
        )));
    }
    if b.len() != 32 {
        return Err(RoutingError::BadInput(format!(
            "right operand is {} bytes, expected 32",
            b.len()
        )));
    }
    let mut left = [0u8; 32];
    let mut right = [0u8; 32];
    left.copy_from_slice(a);
    right.copy_from_slice(b);
    Ok(xor_distance(&left, &right))
}

/// Common prefix length: number of leading equal bits of `a` and `b`.
/// Identical inputs yield 256.
pub fn cpl(a: &[u8; 32], b: &[u8; 32]) -> u32 {
    xor_distance(a, b).leading_zeros()
}

/// Select the `k` peers whose hashed identifiers are XOR-closest to `target`,
/// sorted ascending by distance. Ties break by lexicographic peer id.
///
/// `peers` supplies `(peer_id, dht_id)` pairs where `dht_id` is the hashed
/// identifier the table maintains for each peer.
pub fn closest_k(
    target: &[u8; 32],
    peers: impl IntoIterator<Item = (PeerId, [u8; 32])>,
    k: usize,
) -> Vec<(PeerId, Distance)> {
    let mut scored: Vec<(PeerId, Distance)> = peers
        .into_iter()
        .map(|(id, dht_id)| (id, xor_distance(&dht_id, target)))
        .collect();

    scored.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 32])
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let id = [0xAB; 32];
        assert_eq!(xor_distance(&id, &id), Distance::ZERO);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = [0x0F; 32];
        let b = [0xF0; 32];
        assert_eq!(xor_distance(&a, &b), xor_distance(&b, &a));
        assert_eq!(xor_distance(&a, &b), Distance([0xFF; 32]));
    }

    #[test]
    fn test_distance_ordering_is_big_endian() {
        let zero = [0u8; 32];
        let mut low = [0u8; 32];
        low[31] = 0x01;
        let mut high = [0u8; 32];
        high[0] = 0x01;

        let d_low = xor_distance(&zero, &low);
        let d_high = xor_distance(&zero, &high);
        assert!(d_low < d_high);
    }

    #[test]
    fn test_checked_rejects_bad_lengths() {
        let ok = [0u8; 32];
        assert!(xor_distance_checked(&ok, &[0u8; 31]).is_err());
        assert!(xor_distance_checked(&[0u8; 16], &ok).is_err());
        assert!(xor_distance_checked(&ok, &ok).is_ok());
    }

    #[test]
    fn test_cpl_counts_leading_equal_bits() {
        let a = [0u8; 32];
        assert_eq!(cpl(&a, &a), 256);

        let mut b = [0u8; 32];
        b[0] = 0b1000_0000;
        assert_eq!(cpl(&a, &b), 0);

        let mut c = [0u8; 32];
        c[0] = 0b0000_0001;
        assert_eq!(cpl(&a, &c), 7);

        let mut d = [0u8; 32];
        d[1] = 0b0100_0000;
        assert_eq!(cpl(&a, &d), 9);
    }

    #[test]
    fn test_closest_k_sorts_and_truncates() {
        let target = [0u8; 32];
        let peers = vec![
            (pid(1), {
                let mut b = [0u8; 32];
                b[0] = 0x10;
                b
            }),
            (pid(2), {
                let mut b = [0u8; 32];
                b[0] = 0x01;
                b
            }),
            (pid(3), {
                let mut b = [0u8; 32];
                b[0] = 0x0F;
                b
            }),
        ];

        let closest = closest_k(&target, peers, 2);
        assert_eq!(closest.len(), 2);
        assert_eq!(closest[0].0, pid(2));
        assert_eq!(closest[1].0, pid(3));
    }

    #[test]
    fn test_closest_k_tie_breaks_by_peer_id() {
        let target = [0u8; 32];
        let shared_dht_id = [0x42; 32];
        // Two peers with identical hashed ids tie on distance
        let peers = vec![(pid(9), shared_dht_id), (pid(1), shared_dht_id)];

        let closest = closest_k(&target, peers, 2);
        assert_eq!(closest[0].0, pid(1));
        assert_eq!(closest[1].0, pid(9));
    }

    #[test]
    fn test_leading_zeros_of_zero_distance() {
        assert_eq!(Distance::ZERO.leading_zeros(), 256);
        assert_eq!(Distance::MAX.leading_zeros(), 0);
    }
}
