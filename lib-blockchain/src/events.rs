//! Chain lifecycle events consumed by the consensus core

use serde::{Deserialize, Serialize};

/// Emitted when the local chain switches to a different branch.
///
/// Heights strictly above `new_tip_height` are no longer canonical; any
/// consensus round or cached candidate at such a height must be dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainReorgEvent {
    /// Tip height before the reorganization
    pub old_tip_height: u64,
    /// Tip height after the reorganization
    pub new_tip_height: u64,
}

impl ChainReorgEvent {
    /// Whether the reorg invalidates work at the given height
    pub fn invalidates(&self, height: u64) -> bool {
        height > self.new_tip_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidation_boundary() {
        let event = ChainReorgEvent {
            old_tip_height: 100,
            new_tip_height: 99,
        };
        assert!(event.invalidates(100));
        assert!(event.invalidates(101));
        assert!(!event.invalidates(99));
        assert!(!event.invalidates(50));
    }
}
