//! Chain and network event handling
//!
//! Reacts to chain reorganizations and network-quality changes. Event
//! handling failures are logged and suppressed; they never cascade into
//! consensus state beyond the deliberate round abort on reorg.

use crate::pool::CandidatePool;
use crate::state::{AggregationState, StateManager};
use lib_blockchain::ChainReorgEvent;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Coarse network quality classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NetworkQuality {
    Good,
    Poor,
    Critical,
}

/// Emitted by the transport layer when measured quality shifts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkQualityEvent {
    pub quality: NetworkQuality,
    /// Measured round-trip estimate, when available (milliseconds)
    pub rtt_ms: Option<u64>,
}

/// Consensus-side event reactions
pub struct EventHandler {
    state: Arc<StateManager>,
    pool: Arc<CandidatePool>,
    /// Extra collection-window time (seconds) granted to the next round
    window_extension_secs: AtomicU64,
}

impl EventHandler {
    pub fn new(state: Arc<StateManager>, pool: Arc<CandidatePool>) -> Self {
        Self {
            state,
            pool,
            window_extension_secs: AtomicU64::new(0),
        }
    }

    /// Abort the in-flight round if the reorg invalidates its height and
    /// clear every invalidated pool height.
    pub fn on_chain_reorganized(&self, event: &ChainReorgEvent) {
        let cleared = self.pool.apply_reorg(event);

        let round_height = self.state.current_height();
        let round_state = self.state.current();
        let round_affected =
            round_state != AggregationState::Idle && event.invalidates(round_height);

        if round_affected {
            tracing::warn!(
                round_height,
                new_tip = event.new_tip_height,
                ?round_state,
                "reorg invalidated the active round; aborting"
            );
            if let Err(err) = self.state.ensure_idle() {
                // Suppressed: the watchdog finishes the recovery
                tracing::error!(error = %err, "round abort failed");
            }
        } else if cleared > 0 {
            tracing::debug!(cleared, "reorg cleared pool heights; no round affected");
        }
    }

    /// Critical quality only logs; Poor extends the next collection window.
    pub fn on_network_quality_changed(&self, event: &NetworkQualityEvent, extension_secs: u64) {
        match event.quality {
            NetworkQuality::Critical => {
                tracing::warn!(
                    rtt_ms = event.rtt_ms,
                    "network quality critical; round continues on its own judgement"
                );
            }
            NetworkQuality::Poor => {
                self.window_extension_secs
                    .store(extension_secs, Ordering::SeqCst);
                tracing::info!(
                    rtt_ms = event.rtt_ms,
                    extension_secs,
                    "network quality poor; next collection window extended"
                );
            }
            NetworkQuality::Good => {
                self.window_extension_secs.store(0, Ordering::SeqCst);
            }
        }
    }

    /// Consume the pending window extension (applies to one round)
    pub fn take_window_extension_secs(&self) -> u64 {
        self.window_extension_secs.swap(0, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CandidateBlock;
    use lib_blockchain::block::test_support::test_block;
    use lib_crypto::Hash;
    use lib_routing::PeerId;
    use std::time::Duration;

    fn handler() -> (Arc<StateManager>, Arc<CandidatePool>, EventHandler) {
        let state = Arc::new(StateManager::new());
        let pool = Arc::new(CandidatePool::new(10, Duration::from_secs(60)));
        let events = EventHandler::new(Arc::clone(&state), Arc::clone(&pool));
        (state, pool, events)
    }

    #[test]
    fn test_reorg_aborts_affected_round() {
        let (state, pool, events) = handler();

        // Round collecting at height 100
        state.set_height(100);
        state.transition_to(AggregationState::Listening).unwrap();
        state.transition_to(AggregationState::Collecting).unwrap();
        let parent = Hash::from_bytes([1u8; 32]);
        pool.admit(
            CandidateBlock::new(test_block(100, parent, 0), PeerId::from_bytes([2u8; 32]), 0),
            100,
            parent,
        )
        .unwrap();

        events.on_chain_reorganized(&ChainReorgEvent {
            old_tip_height: 100,
            new_tip_height: 99,
        });

        assert_eq!(state.current(), AggregationState::Idle);
        assert_eq!(pool.len(100), 0);
    }

    #[test]
    fn test_reorg_below_round_height_leaves_round_alone() {
        let (state, _pool, events) = handler();
        state.set_height(100);
        state.transition_to(AggregationState::Listening).unwrap();

        events.on_chain_reorganized(&ChainReorgEvent {
            old_tip_height: 100,
            new_tip_height: 100,
        });
        assert_eq!(state.current(), AggregationState::Listening);
    }

    #[test]
    fn test_poor_quality_extends_next_window_once() {
        let (_state, _pool, events) = handler();
        events.on_network_quality_changed(
            &NetworkQualityEvent {
                quality: NetworkQuality::Poor,
                rtt_ms: Some(900),
            },
            4,
        );
        assert_eq!(events.take_window_extension_secs(), 4);
        // Consumed: next round gets no extension
        assert_eq!(events.take_window_extension_secs(), 0);
    }

    #[test]
    fn test_critical_quality_does_not_force_state_change() {
        let (state, _pool, events) = handler();
        state.transition_to(AggregationState::Listening).unwrap();
        events.on_network_quality_changed(
            &NetworkQualityEvent {
                quality: NetworkQuality::Critical,
                rtt_ms: None,
            },
            4,
        );
        assert_eq!(state.current(), AggregationState::Listening);
        assert_eq!(events.take_window_extension_secs(), 0);
    }
}
