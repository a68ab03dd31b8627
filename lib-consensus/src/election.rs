//! Aggregator election
//!
//! For height H the routing key is `SHA-256(parent_hash(H-1) || H_be)`. The
//! aggregator is the peer whose hashed identifier is XOR-closest to that key,
//! excluding peers the submitter has collected waivers from. The local node
//! takes part in its own election; determinism across nodes follows from the
//! shared key and the shared tie-break (lexicographic peer id).

use crate::{ConsensusError, ConsensusResult};
use lib_blockchain::ChainQuery;
use lib_crypto::{hash_sha256_multiple, Hash};
use lib_routing::{xor_distance, BucketTable, PeerId};
use std::collections::HashSet;
use std::sync::Arc;

/// Routing key anchoring election and candidate distances for a height
pub fn routing_key(parent_hash: &Hash, height: u64) -> [u8; 32] {
    hash_sha256_multiple(&[parent_hash.as_bytes(), &height.to_be_bytes()])
}

/// Capability the election needs from the routing layer
pub trait RoutingTableManager: Send + Sync {
    /// `(peer_id, dht_id)` pairs of every electable peer
    fn election_peers(&self) -> Vec<(PeerId, [u8; 32])>;

    /// The local peer id
    fn self_id(&self) -> PeerId;

    /// The local hashed identifier
    fn self_dht_id(&self) -> [u8; 32];
}

impl RoutingTableManager for BucketTable {
    fn election_peers(&self) -> Vec<(PeerId, [u8; 32])> {
        BucketTable::election_peers(self)
    }

    fn self_id(&self) -> PeerId {
        BucketTable::self_id(self)
    }

    fn self_dht_id(&self) -> [u8; 32] {
        BucketTable::self_dht_id(self)
    }
}

/// Pure election over a fixed peer set. Exposed for determinism tests.
///
/// `peers` must include the local node if it is electable. Returns the peer
/// minimizing XOR distance to `key`; ties break by lexicographic peer id.
pub fn elect_from(
    key: &[u8; 32],
    peers: impl IntoIterator<Item = (PeerId, [u8; 32])>,
    waivers: &HashSet<PeerId>,
) -> Option<PeerId> {
    peers
        .into_iter()
        .filter(|(id, _)| !waivers.contains(id))
        .map(|(id, dht_id)| (id, xor_distance(&dht_id, key)))
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
        .map(|(id, _)| id)
}

/// Waiver-aware XOR election bound to the routing table and local chain
pub struct Election {
    table: Arc<dyn RoutingTableManager>,
    chain: Arc<dyn ChainQuery>,
}

impl Election {
    pub fn new(table: Arc<dyn RoutingTableManager>, chain: Arc<dyn ChainQuery>) -> Self {
        Self { table, chain }
    }

    /// The local peer id
    pub fn self_id(&self) -> PeerId {
        self.table.self_id()
    }

    /// The routing key for `height`, derived from the parent block hash
    pub async fn routing_key_for(&self, height: u64) -> ConsensusResult<[u8; 32]> {
        if height == 0 {
            return Err(ConsensusError::BadInput(
                "height 0 has no parent to elect against".to_string(),
            ));
        }
        let parent = self.chain.block_hash_at(height - 1).await?;
        Ok(routing_key(&parent, height))
    }

    /// The aggregator for `height` with no waivers
    pub async fn aggregator_for_height(&self, height: u64) -> ConsensusResult<PeerId> {
        self.aggregator_for_height_with_waivers(height, &HashSet::new())
            .await
    }

    /// The aggregator for `height`, skipping peers in the waiver set
    pub async fn aggregator_for_height_with_waivers(
        &self,
        height: u64,
        waivers: &HashSet<PeerId>,
    ) -> ConsensusResult<PeerId> {
        let key = self.routing_key_for(height).await?;

        let mut peers = self.table.election_peers();
        peers.push((self.table.self_id(), self.table.self_dht_id()));

        elect_from(&key, peers, waivers)
            .ok_or(ConsensusError::NoEligibleAggregator(height))
    }

    /// Whether the local node is the aggregator for `height`
    pub async fn is_aggregator_for_height(&self, height: u64) -> ConsensusResult<bool> {
        let winner = self.aggregator_for_height(height).await?;
        Ok(winner == self.table.self_id())
    }
}
