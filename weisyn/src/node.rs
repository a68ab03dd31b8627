//! Node wiring
//!
//! Builds the routing table, the aggregator consensus stack, and the network
//! handler from a [`NodeConfig`], and owns the background loops (state
//! watchdog, routing maintenance, pool janitor). Transport and gossip are
//! injected; [`WeisynNode::start_local`] wires the offline stand-ins used
//! for single-node local mode.

use crate::config::NodeConfig;
use anyhow::Context;
use lib_blockchain::{ChainQuery, MemoryChain};
use lib_consensus::{
    AggregationController, CandidatePool, Election, EventHandler, ResultDistributor,
    RoutingTableManager, RuntimeState, StateManager,
};
use lib_network::testing::RecordingGossip;
use lib_network::transport::{GossipPublisher, RequestTransport};
use lib_network::{ConsensusNetworkHandler, HeartbeatPinger, NetworkError, ResultBroadcaster};
use lib_routing::{BucketTable, MaintenanceLoop, PeerId, ProbeManager};
use rand::RngCore;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Pool janitor tick interval
const POOL_JANITOR_INTERVAL: Duration = Duration::from_secs(15);

/// A running weisyn node
pub struct WeisynNode {
    pub self_id: PeerId,
    pub table: Arc<BucketTable>,
    pub chain: Arc<MemoryChain>,
    pub state: Arc<StateManager>,
    pub pool: Arc<CandidatePool>,
    pub runtime: Arc<RuntimeState>,
    pub controller: Arc<AggregationController>,
    pub handler: Arc<ConsensusNetworkHandler>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WeisynNode {
    /// Build and start the node with injected transport and gossip.
    pub fn start(
        config: &NodeConfig,
        transport: Arc<dyn RequestTransport>,
        gossip: Arc<dyn GossipPublisher>,
    ) -> anyhow::Result<Self> {
        let self_id = resolve_peer_id(config).context("resolving node.peer_id")?;
        let algorithm = config.node.hash_algorithm;
        let aggregator_config = config.aggregator_config();
        let kbucket_config = config.kbucket_config();

        let table = Arc::new(BucketTable::new(self_id, algorithm, kbucket_config));
        let chain = Arc::new(MemoryChain::new(algorithm));
        let state = Arc::new(StateManager::new());
        let pool = Arc::new(CandidatePool::new(
            aggregator_config.max_candidates,
            aggregator_config.pool_ttl,
        ));
        let runtime = Arc::new(RuntimeState::new(config.runtime.sync_mode));
        runtime.set_online(true);
        runtime.set_read_only(config.runtime.read_only);

        let election = Arc::new(Election::new(
            Arc::clone(&table) as Arc<dyn RoutingTableManager>,
            Arc::clone(&chain) as Arc<dyn ChainQuery>,
        ));
        let broadcaster = Arc::new(ResultBroadcaster::new(gossip, self_id));
        let distributor = Arc::new(ResultDistributor::new(
            Arc::clone(&chain) as _,
            broadcaster,
            aggregator_config.clone(),
        ));
        let events = Arc::new(EventHandler::new(Arc::clone(&state), Arc::clone(&pool)));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let controller = Arc::new(AggregationController::new(
            Arc::clone(&state),
            Arc::clone(&runtime),
            Arc::clone(&pool),
            Arc::clone(&election),
            Arc::clone(&distributor),
            Arc::clone(&events),
            Arc::clone(&chain) as _,
            Arc::clone(&chain) as _,
            aggregator_config.clone(),
            shutdown_rx.clone(),
        ));

        let handler = Arc::new(ConsensusNetworkHandler::new(
            self_id,
            Arc::clone(&controller),
            Arc::clone(&election),
            Arc::clone(&state),
            Arc::clone(&runtime),
            Arc::clone(&pool),
            Arc::clone(&chain) as _,
            Arc::clone(&chain) as _,
            Arc::clone(&chain) as _,
            Arc::clone(&distributor),
            Arc::clone(&table),
            aggregator_config,
        ));

        // Background loops
        let mut tasks = Vec::new();
        tasks.push(Arc::clone(&state).spawn_watchdog(shutdown_rx.clone()));

        let pinger = Arc::new(HeartbeatPinger::new(transport, Arc::clone(&state), self_id));
        let probes = Arc::new(ProbeManager::new(Arc::clone(&table), pinger));
        tasks.push(
            MaintenanceLoop::new(Arc::clone(&table), probes).spawn(shutdown_rx.clone()),
        );
        tasks.push(spawn_pool_janitor(Arc::clone(&pool), shutdown_rx));

        tracing::info!(peer = %self_id, "weisyn node started");
        Ok(Self {
            self_id,
            table,
            chain,
            state,
            pool,
            runtime,
            controller,
            handler,
            shutdown_tx,
            tasks,
        })
    }

    /// Start in local mode: no reachable peers, gossip recorded in memory.
    /// Single-node operation is a supported degraded mode.
    pub fn start_local(config: &NodeConfig) -> anyhow::Result<Self> {
        let node = Self::start(config, Arc::new(OfflineTransport), RecordingGossip::new())?;
        tracing::warn!("running in local mode: no transport attached, confirmations degraded");
        Ok(node)
    }

    /// Signal every background loop and wait for them to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "background task ended abnormally");
            }
        }
        tracing::info!("weisyn node stopped");
    }
}

/// Pool TTL sweeper
fn spawn_pool_janitor(
    pool: Arc<CandidatePool>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(POOL_JANITOR_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs();
                    let expired = pool.expire(now);
                    if expired > 0 {
                        tracing::debug!(expired, "candidate pool heights expired");
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// Peer id from config, or freshly generated
fn resolve_peer_id(config: &NodeConfig) -> anyhow::Result<PeerId> {
    match &config.node.peer_id {
        Some(encoded) => {
            let bytes = hex::decode(encoded.trim_start_matches("0x"))?;
            PeerId::from_slice(&bytes).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => {
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            let id = PeerId::from_bytes(bytes);
            tracing::info!(peer = %id, "generated fresh peer id");
            Ok(id)
        }
    }
}

/// Transport stand-in for local mode: every peer is unreachable.
pub struct OfflineTransport;

#[async_trait::async_trait]
impl RequestTransport for OfflineTransport {
    async fn request(
        &self,
        peer: &PeerId,
        _protocol: &str,
        _body: Vec<u8>,
    ) -> Result<Vec<u8>, NetworkError> {
        Err(NetworkError::PeerUnreachable(*peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_blockchain::block::test_support::test_block;
    use lib_consensus::CandidateBlock;

    #[tokio::test]
    async fn test_local_node_starts_and_stops() {
        let config = NodeConfig::default();
        let node = WeisynNode::start_local(&config).unwrap();
        assert_eq!(node.chain.current_height().await.unwrap(), 0);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_local_node_runs_a_round() {
        let mut config = NodeConfig::default();
        config.aggregator.collection_timeout = 1;
        config.aggregator.broadcast_timeout = 1;
        config.aggregator.confirmation_threshold = 0;
        let node = WeisynNode::start_local(&config).unwrap();

        let tip = node.chain.current_tip_hash().await.unwrap();
        let candidate = CandidateBlock::new(test_block(1, tip, 0), node.self_id, 1000);
        let outcome = node
            .controller
            .process_aggregation_round(candidate)
            .await
            .unwrap();

        assert_eq!(outcome.height, 1);
        assert_eq!(node.chain.current_height().await.unwrap(), 1);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_configured_peer_id_is_used() {
        let mut config = NodeConfig::default();
        config.node.peer_id = Some("ab".repeat(32));
        let node = WeisynNode::start_local(&config).unwrap();
        assert_eq!(node.self_id, PeerId::from_bytes([0xAB; 32]));
        node.shutdown().await;
    }
}
