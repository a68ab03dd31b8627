//! Aggregation controller
//!
//! Orchestrates one full round per height: open the collection window,
//! close it, re-validate the survivors, run the distance selection, and
//! distribute the result. Rounds are serialized by a controller-wide gate;
//! a second caller for any height observes the round in flight and receives
//! a waiver. Per-round failures are contained: the machine recovers to Idle
//! and the controller keeps serving new heights.

use crate::config::AggregatorConfig;
use crate::distributor::ResultDistributor;
use crate::election::Election;
use crate::events::EventHandler;
use crate::pool::CandidatePool;
use crate::runtime::{RuntimeState, SyncMode};
use crate::selector::DistanceSelector;
use crate::state::{AggregationState, StateManager};
use crate::types::{CandidateBlock, ConsensusOutcome, ValidationStatus, WaiverReason};
use crate::{ConsensusError, ConsensusResult};
use lib_blockchain::{BlockValidator, ChainQuery};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, Mutex};

/// Poll granularity inside blocking waits; keeps cancellation under 100 ms
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Orchestrates aggregation rounds end to end
pub struct AggregationController {
    state: Arc<StateManager>,
    runtime: Arc<RuntimeState>,
    pool: Arc<CandidatePool>,
    election: Arc<Election>,
    distributor: Arc<ResultDistributor>,
    events: Arc<EventHandler>,
    chain: Arc<dyn ChainQuery>,
    validator: Arc<dyn BlockValidator>,
    config: AggregatorConfig,
    round_gate: Mutex<()>,
    shutdown: watch::Receiver<bool>,
}

impl AggregationController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<StateManager>,
        runtime: Arc<RuntimeState>,
        pool: Arc<CandidatePool>,
        election: Arc<Election>,
        distributor: Arc<ResultDistributor>,
        events: Arc<EventHandler>,
        chain: Arc<dyn ChainQuery>,
        validator: Arc<dyn BlockValidator>,
        config: AggregatorConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            state,
            runtime,
            pool,
            election,
            distributor,
            events,
            chain,
            validator,
            config,
            round_gate: Mutex::new(()),
            shutdown,
        }
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn pool(&self) -> &Arc<CandidatePool> {
        &self.pool
    }

    pub fn distributor(&self) -> &Arc<ResultDistributor> {
        &self.distributor
    }

    /// Validate and admit a candidate into the pool for its height.
    /// Used for the triggering candidate and for every later arrival while
    /// the collection window is open.
    pub async fn admit_candidate(&self, candidate: CandidateBlock) -> ConsensusResult<bool> {
        self.validator
            .validate(&candidate.block)
            .await
            .map_err(|err| ConsensusError::Rejected(format!("validator refused: {err}")))?;

        let tip_height = self.chain.current_height().await?;
        let tip_hash = self.chain.current_tip_hash().await?;
        self.pool.admit(candidate, tip_height + 1, tip_hash)
    }

    /// Run the full aggregation round triggered by `candidate`.
    ///
    /// The caller has already established that this node is the aggregator
    /// for the candidate's height (or deliberately fell back to loopback
    /// processing).
    pub async fn process_aggregation_round(
        &self,
        candidate: CandidateBlock,
    ) -> ConsensusResult<ConsensusOutcome> {
        let height = candidate.height();

        // Runtime-state gate
        let snapshot = self.runtime.snapshot();
        if snapshot.sync_mode == SyncMode::Light {
            return Err(ConsensusError::NotConsensusEligible(snapshot.sync_mode));
        }
        if !snapshot.is_fully_synced {
            tracing::warn!(
                height,
                "node not fully synced; continuing round in local mode with degraded confirmations"
            );
        }

        // Round exclusivity: a second caller observes the round in flight
        let _gate = match self.round_gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!(height, "round already in flight; waiving");
                return Err(ConsensusError::Waived(WaiverReason::AggregationInProgress));
            }
        };

        let result = self.run_round(height, candidate).await;
        match &result {
            Ok(outcome) => {
                tracing::info!(
                    height,
                    winner = %outcome.selected_hash,
                    "aggregation round complete"
                );
            }
            Err(err) => {
                tracing::warn!(height, error = %err, "aggregation round failed");
                let _ = self.state.transition_to(AggregationState::Error);
                if let Err(recover) = self.state.ensure_idle() {
                    tracing::error!(error = %recover, "post-round recovery failed");
                }
            }
        }
        self.pool.mark_round_complete(height, unix_now());
        result
    }

    async fn run_round(
        &self,
        height: u64,
        candidate: CandidateBlock,
    ) -> ConsensusResult<ConsensusOutcome> {
        self.state.ensure_idle()?;
        self.state.set_height(height);
        self.state.transition_to(AggregationState::Listening)?;

        // The triggering candidate opens the pool for this height
        self.admit_candidate(candidate).await?;

        // Collection window
        self.state.transition_to(AggregationState::Collecting)?;
        self.collect_candidates(height).await?;

        // Batch re-validation under the decision budget
        self.state.transition_to(AggregationState::Evaluating)?;
        let survivors = tokio::time::timeout(
            self.config.decision_timeout,
            self.revalidate_candidates(height),
        )
        .await
        .map_err(|_| ConsensusError::Transient("decision timed out".to_string()))??;

        if survivors.len() < self.config.min_candidates {
            return Err(ConsensusError::NoCandidates(height));
        }

        // Selection
        self.state.transition_to(AggregationState::Selecting)?;
        let parent_hash = self.chain.current_tip_hash().await?;
        let (winner, proof) = DistanceSelector::select_closest_block(&survivors, &parent_hash)?;
        tracing::debug!(
            height,
            winner = %winner.block_hash(),
            candidates = survivors.len(),
            tie_break = proof.tie_break_applied,
            "closest candidate selected"
        );

        // Distribution
        self.state.transition_to(AggregationState::Distributing)?;
        let outcome = self
            .distributor
            .distribute_selected_block(
                &winner,
                proof,
                self.election.self_id(),
                self.shutdown.clone(),
            )
            .await?;

        self.state.transition_to(AggregationState::Idle)?;
        Ok(outcome)
    }

    /// Wait for the collection window: closes early when the pool hits
    /// `max_candidates`, aborts when the round is cancelled or externally
    /// driven out of Collecting (reorg).
    async fn collect_candidates(&self, height: u64) -> ConsensusResult<()> {
        let extension = Duration::from_secs(self.events.take_window_extension_secs());
        let window = self.config.collection_timeout + extension;
        let deadline = Instant::now() + window;
        if !extension.is_zero() {
            tracing::info!(height, extra_secs = extension.as_secs(), "collection window extended");
        }

        let mut shutdown = self.shutdown.clone();
        loop {
            if self.pool.len(height) >= self.config.max_candidates {
                tracing::debug!(height, "collection window closed early: pool full");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            if self.state.current() != AggregationState::Collecting {
                return Err(ConsensusError::Transient(
                    "round aborted during collection".to_string(),
                ));
            }
            tokio::select! {
                _ = tokio::time::sleep(WAIT_SLICE) => {}
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        return Err(ConsensusError::Transient("shutdown during collection".to_string()));
                    }
                }
            }
        }
    }

    /// Re-validate every collected candidate, dropping failures.
    async fn revalidate_candidates(&self, height: u64) -> ConsensusResult<Vec<CandidateBlock>> {
        let candidates = self.pool.get(height);
        for candidate in &candidates {
            let status = match self.validator.validate(&candidate.block).await {
                Ok(()) => ValidationStatus::Valid,
                Err(err) => {
                    tracing::debug!(
                        height,
                        hash = %candidate.block_hash().short(),
                        error = %err,
                        "candidate dropped in re-validation"
                    );
                    ValidationStatus::Invalid
                }
            };
            self.pool.set_status(height, candidate.block_hash(), status);
        }
        Ok(self.pool.retain_valid(height))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
