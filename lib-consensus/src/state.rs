//! Aggregation state machine
//!
//! A single atomic word holds the round state; the current height sits in an
//! atomic alongside it. Transitions go through compare-and-swap so exactly
//! one contender wins any race; losers re-check and decide. The transition
//! graph is closed: anything not listed is rejected.

use crate::{ConsensusError, ConsensusResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// CAS attempts before a transition is declared fatal
const MAX_CAS_RETRIES: usize = 8;

/// Watchdog tick interval
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

/// Aggregation round state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum AggregationState {
    /// No round in flight
    Idle = 0,
    /// Round opened, waiting for the first candidate
    Listening = 1,
    /// Collection window open
    Collecting = 2,
    /// Batch re-validation of collected candidates
    Evaluating = 3,
    /// Running the distance selection
    Selecting = 4,
    /// Applying and broadcasting the decision
    Distributing = 5,
    /// Round suspended
    Paused = 6,
    /// Round failed; recovery returns to Idle
    Error = 7,
}

impl AggregationState {
    fn from_u8(value: u8) -> AggregationState {
        match value {
            0 => AggregationState::Idle,
            1 => AggregationState::Listening,
            2 => AggregationState::Collecting,
            3 => AggregationState::Evaluating,
            4 => AggregationState::Selecting,
            5 => AggregationState::Distributing,
            6 => AggregationState::Paused,
            _ => AggregationState::Error,
        }
    }

    /// Whether `self -> target` is in the transition table
    pub fn can_transition_to(&self, target: AggregationState) -> bool {
        use AggregationState::*;
        matches!(
            (self, target),
            (Idle, Listening)
                | (Idle, Error)
                | (Listening, Collecting)
                | (Listening, Idle)
                | (Listening, Paused)
                | (Listening, Error)
                | (Collecting, Evaluating)
                | (Collecting, Paused)
                | (Collecting, Error)
                | (Evaluating, Selecting)
                | (Evaluating, Error)
                | (Selecting, Distributing)
                | (Selecting, Error)
                | (Distributing, Idle)
                | (Distributing, Error)
                | (Paused, Listening)
                | (Paused, Collecting)
                | (Paused, Idle)
                | (Paused, Error)
                | (Error, Idle)
                | (Error, Listening)
        )
    }

    /// Per-state timeout enforced by the watchdog
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            AggregationState::Listening => Some(Duration::from_secs(300)),
            AggregationState::Collecting => Some(Duration::from_secs(180)),
            AggregationState::Evaluating => Some(Duration::from_secs(120)),
            AggregationState::Selecting => Some(Duration::from_secs(60)),
            AggregationState::Distributing => Some(Duration::from_secs(120)),
            _ => None,
        }
    }
}

/// Atomic holder of the round state and current height
pub struct StateManager {
    state: AtomicU8,
    current_height: AtomicU64,
    last_transition: Mutex<Instant>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(AggregationState::Idle as u8),
            current_height: AtomicU64::new(0),
            last_transition: Mutex::new(Instant::now()),
        }
    }

    /// Current state snapshot
    pub fn current(&self) -> AggregationState {
        AggregationState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Height of the round in flight (0 when idle)
    pub fn current_height(&self) -> u64 {
        self.current_height.load(Ordering::SeqCst)
    }

    pub fn set_height(&self, height: u64) {
        self.current_height.store(height, Ordering::SeqCst);
    }

    /// CAS-protected transition. Idempotent when already in `target`;
    /// rejects transitions outside the table; fatal after repeated CAS loss
    /// against contenders.
    pub fn transition_to(&self, target: AggregationState) -> ConsensusResult<()> {
        for _ in 0..MAX_CAS_RETRIES {
            let current = self.current();
            if current == target {
                return Ok(());
            }
            if !current.can_transition_to(target) {
                return Err(ConsensusError::IllegalTransition {
                    from: current,
                    to: target,
                });
            }
            if self
                .state
                .compare_exchange(
                    current as u8,
                    target as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                *self.last_transition.lock() = Instant::now();
                tracing::debug!(from = ?current, to = ?target, height = self.current_height(), "state transition");
                return Ok(());
            }
            // Lost the race: re-check and decide again
        }
        Err(ConsensusError::Fatal(format!(
            "state transition to {target:?} lost {MAX_CAS_RETRIES} CAS races"
        )))
    }

    /// Idempotent success when already in `target`, else a normal transition
    pub fn ensure_state(&self, target: AggregationState) -> ConsensusResult<()> {
        if self.current() == target {
            return Ok(());
        }
        self.transition_to(target)
    }

    /// Drive the machine back to Idle, routing through Error when the
    /// current state has no direct edge to Idle. Used for error recovery,
    /// waiver responses, and reorg reactions.
    pub fn ensure_idle(&self) -> ConsensusResult<()> {
        match self.ensure_state(AggregationState::Idle) {
            Ok(()) => Ok(()),
            Err(ConsensusError::IllegalTransition { .. }) => {
                self.transition_to(AggregationState::Error)?;
                self.transition_to(AggregationState::Idle)
            }
            Err(err) => Err(err),
        }
    }

    /// Seconds the machine has sat in the current state
    pub fn time_in_state(&self) -> Duration {
        self.last_transition.lock().elapsed()
    }

    /// Move to Error when the current state has overstayed its timeout.
    /// Returns the state that timed out, if any.
    pub fn check_timeout(&self) -> Option<AggregationState> {
        let current = self.current();
        let timeout = current.timeout()?;
        if self.time_in_state() <= timeout {
            return None;
        }
        tracing::warn!(
            state = ?current,
            height = self.current_height(),
            timeout_secs = timeout.as_secs(),
            "aggregation state timed out"
        );
        // A racing transition is fine; the watchdog re-checks next tick
        let _ = self.transition_to(AggregationState::Error);
        Some(current)
    }

    /// Error-recovery watchdog: times out stuck states and walks Error back
    /// to Idle. Stops when `shutdown` observes `true`.
    pub fn spawn_watchdog(
        self: std::sync::Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WATCHDOG_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.check_timeout();
                        if self.current() == AggregationState::Error {
                            if let Err(err) = self.ensure_idle() {
                                tracing::error!(error = %err, "state recovery failed");
                            } else {
                                tracing::info!("recovered from Error to Idle");
                            }
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
}
