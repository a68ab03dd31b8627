//! Integration tests for the aggregation controller
//!
//! Drives full rounds against an in-memory chain with a recording publisher.

use async_trait::async_trait;
use lib_blockchain::block::test_support::test_block;
use lib_blockchain::{ChainQuery, ChainReorgEvent, MemoryChain};
use lib_consensus::{
    AggregationController, AggregationState, AggregatorConfig, CandidatePool, CandidateBlock,
    ConsensusError, ConsensusOutcome, ConsensusResult, Election, EventHandler, ResultDistributor,
    ResultPublisher, RoutingTableManager, RuntimeState, StateManager, SyncMode, WaiverReason,
};
use lib_crypto::HashAlgorithm;
use lib_routing::{BucketTable, KBucketConfig, PeerId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct RecordingPublisher {
    outcomes: Mutex<Vec<ConsensusOutcome>>,
}

#[async_trait]
impl ResultPublisher for RecordingPublisher {
    async fn publish_result(&self, outcome: &ConsensusOutcome) -> ConsensusResult<()> {
        self.outcomes.lock().push(outcome.clone());
        Ok(())
    }
}

struct Harness {
    controller: Arc<AggregationController>,
    chain: Arc<MemoryChain>,
    pool: Arc<CandidatePool>,
    state: Arc<StateManager>,
    events: Arc<EventHandler>,
    publisher: Arc<RecordingPublisher>,
    runtime: Arc<RuntimeState>,
    self_id: PeerId,
    _shutdown_tx: watch::Sender<bool>,
}

fn harness_with(config: AggregatorConfig, sync_mode: SyncMode) -> Harness {
    let self_id = PeerId::from_bytes([0xA0; 32]);
    let table = Arc::new(BucketTable::new(
        self_id,
        HashAlgorithm::Sha256,
        KBucketConfig::default(),
    ));
    let chain = Arc::new(MemoryChain::new(HashAlgorithm::Sha256));
    let state = Arc::new(StateManager::new());
    let pool = Arc::new(CandidatePool::new(config.max_candidates, config.pool_ttl));
    let runtime = Arc::new(RuntimeState::new(sync_mode));
    runtime.set_online(true);
    runtime.set_fully_synced(true);

    let election = Arc::new(Election::new(
        Arc::clone(&table) as Arc<dyn RoutingTableManager>,
        Arc::clone(&chain) as Arc<dyn ChainQuery>,
    ));
    let publisher = Arc::new(RecordingPublisher {
        outcomes: Mutex::new(Vec::new()),
    });
    let distributor = Arc::new(ResultDistributor::new(
        Arc::clone(&chain) as _,
        Arc::clone(&publisher) as _,
        config.clone(),
    ));
    let events = Arc::new(EventHandler::new(Arc::clone(&state), Arc::clone(&pool)));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let controller = Arc::new(AggregationController::new(
        Arc::clone(&state),
        Arc::clone(&runtime),
        Arc::clone(&pool),
        election,
        distributor,
        Arc::clone(&events),
        Arc::clone(&chain) as _,
        Arc::clone(&chain) as _,
        config,
        shutdown_rx,
    ));

    Harness {
        controller,
        chain,
        pool,
        state,
        events,
        publisher,
        runtime,
        self_id,
        _shutdown_tx: shutdown_tx,
    }
}

fn fast_config() -> AggregatorConfig {
    AggregatorConfig {
        collection_timeout: Duration::from_millis(200),
        decision_timeout: Duration::from_secs(2),
        broadcast_timeout: Duration::from_millis(100),
        retry_interval: Duration::from_millis(30),
        confirmation_threshold: 0,
        ..AggregatorConfig::default()
    }
}

async fn candidate_at_tip(harness: &Harness, nonce: u64) -> CandidateBlock {
    let tip_height = harness.chain.current_height().await.unwrap();
    let tip_hash = harness.chain.current_tip_hash().await.unwrap();
    CandidateBlock::new(
        test_block(tip_height + 1, tip_hash, nonce),
        PeerId::from_bytes([0x33; 32]),
        1000,
    )
}

#[tokio::test]
async fn test_full_round_applies_and_broadcasts() {
    let harness = harness_with(fast_config(), SyncMode::Full);
    let candidate = candidate_at_tip(&harness, 0).await;
    let expected_hash = candidate.block_hash();

    let outcome = harness
        .controller
        .process_aggregation_round(candidate)
        .await
        .unwrap();

    assert_eq!(outcome.height, 1);
    assert_eq!(outcome.selected_hash, expected_hash);
    assert_eq!(outcome.aggregator_id, harness.self_id);

    // Apply-before-broadcast: chain advanced to the decided height
    assert_eq!(harness.chain.current_height().await.unwrap(), 1);
    assert_eq!(harness.publisher.outcomes.lock().len(), 1);

    // Round ended cleanly
    assert_eq!(harness.state.current(), AggregationState::Idle);
}

#[tokio::test]
async fn test_round_picks_closest_of_many() {
    let harness = harness_with(fast_config(), SyncMode::Full);
    let parent = harness.chain.current_tip_hash().await.unwrap();

    // Seed additional candidates while the round collects
    let trigger = candidate_at_tip(&harness, 0).await;
    let controller = Arc::clone(&harness.controller);
    let round = tokio::spawn(async move { controller.process_aggregation_round(trigger).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    for nonce in 1..5u64 {
        let candidate = CandidateBlock::new(
            test_block(1, parent, nonce),
            PeerId::from_bytes([0x44; 32]),
            1000,
        );
        harness.controller.admit_candidate(candidate).await.unwrap();
    }

    let outcome = round.await.unwrap().unwrap();

    // The winner must be the XOR-closest hash among all five candidates
    let mut best: Option<(lib_routing::Distance, lib_crypto::Hash)> = None;
    for nonce in 0..5u64 {
        let hash = test_block(1, parent, nonce).hash();
        let distance = lib_routing::xor_distance(&hash.into_bytes(), &parent.into_bytes());
        if best.as_ref().map_or(true, |(d, _)| distance < *d) {
            best = Some((distance, hash));
        }
    }
    assert_eq!(outcome.selected_hash, best.unwrap().1);
}

#[tokio::test]
async fn test_concurrent_round_is_waived() {
    let mut config = fast_config();
    config.collection_timeout = Duration::from_secs(1);
    let harness = harness_with(config, SyncMode::Full);

    let first = candidate_at_tip(&harness, 0).await;
    let second = candidate_at_tip(&harness, 1).await;

    let controller = Arc::clone(&harness.controller);
    let round = tokio::spawn(async move { controller.process_aggregation_round(first).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = harness
        .controller
        .process_aggregation_round(second)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConsensusError::Waived(WaiverReason::AggregationInProgress)
    ));

    round.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_light_node_fails_round() {
    let harness = harness_with(fast_config(), SyncMode::Light);
    let candidate = candidate_at_tip(&harness, 0).await;

    let err = harness
        .controller
        .process_aggregation_round(candidate)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsensusError::NotConsensusEligible(_)));
}

#[tokio::test]
async fn test_unsynced_node_continues_in_local_mode() {
    let harness = harness_with(fast_config(), SyncMode::Full);
    harness.runtime.set_fully_synced(false);
    let candidate = candidate_at_tip(&harness, 0).await;

    // Degraded confirmations, but the round still completes
    let outcome = harness
        .controller
        .process_aggregation_round(candidate)
        .await
        .unwrap();
    assert_eq!(outcome.height, 1);
}

#[tokio::test]
async fn test_reorg_aborts_collecting_round() {
    let mut config = fast_config();
    config.collection_timeout = Duration::from_secs(3);
    let harness = harness_with(config, SyncMode::Full);

    let candidate = candidate_at_tip(&harness, 0).await;
    let controller = Arc::clone(&harness.controller);
    let round = tokio::spawn(async move { controller.process_aggregation_round(candidate).await });

    // Wait until the round reaches Collecting, then reorg away its height
    for _ in 0..50 {
        if harness.state.current() == AggregationState::Collecting {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(harness.state.current(), AggregationState::Collecting);

    harness.events.on_chain_reorganized(&ChainReorgEvent {
        old_tip_height: 1,
        new_tip_height: 0,
    });

    let err = round.await.unwrap().unwrap_err();
    assert!(matches!(err, ConsensusError::Transient(_)));
    assert_eq!(harness.state.current(), AggregationState::Idle);
    assert_eq!(harness.pool.len(1), 0);
    assert!(harness.publisher.outcomes.lock().is_empty());
}

#[tokio::test]
async fn test_window_extension_consumed_by_next_round() {
    let mut config = fast_config();
    config.poor_quality_window_extension = Duration::from_secs(1);
    let harness = harness_with(config, SyncMode::Full);

    harness.events.on_network_quality_changed(
        &lib_consensus::NetworkQualityEvent {
            quality: lib_consensus::NetworkQuality::Poor,
            rtt_ms: Some(800),
        },
        1,
    );

    let started = std::time::Instant::now();
    let candidate = candidate_at_tip(&harness, 0).await;
    harness
        .controller
        .process_aggregation_round(candidate)
        .await
        .unwrap();

    // 200ms base window plus the 1s extension
    assert!(started.elapsed() >= Duration::from_millis(1100));
}

#[tokio::test]
async fn test_stale_candidate_rejected_on_admission() {
    let harness = harness_with(fast_config(), SyncMode::Full);
    let tip_hash = harness.chain.current_tip_hash().await.unwrap();
    let stale = CandidateBlock::new(
        test_block(9, tip_hash, 0),
        PeerId::from_bytes([0x33; 32]),
        1000,
    );

    let err = harness.controller.admit_candidate(stale).await.unwrap_err();
    assert!(matches!(err, ConsensusError::Rejected(_)));
}
