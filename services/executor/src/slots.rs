//! Per-pair execution slots.
//!
//! The slot is the engine's at-most-once guard: an ordered pool pair can
//! carry one in-flight execution, ever. Claims are atomic under a single
//! mutex; ties between same-tick claimants are resolved by the caller
//! (higher net profit claims first because the queue is ranked).

use parking_lot::Mutex;
use std::collections::HashMap;
use types::{ExecutionId, PoolPair};

/// Atomic claim table for ordered pool pairs.
#[derive(Default)]
pub struct SlotManager {
    claimed: Mutex<HashMap<PoolPair, ExecutionId>>,
}

impl SlotManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the pair for an execution. Returns false if already held.
    pub fn try_claim(&self, pair: &PoolPair, execution: ExecutionId) -> bool {
        let mut claimed = self.claimed.lock();
        if claimed.contains_key(pair) {
            return false;
        }
        claimed.insert(pair.clone(), execution);
        true
    }

    /// Release a claim. Only the holder releases; a mismatched release is a
    /// logic error and is ignored with the claim left intact.
    pub fn release(&self, pair: &PoolPair, execution: ExecutionId) {
        let mut claimed = self.claimed.lock();
        match claimed.get(pair) {
            Some(holder) if *holder == execution => {
                claimed.remove(pair);
            }
            _ => {
                tracing::error!(
                    %pair,
                    %execution,
                    "slot release by non-holder ignored"
                );
            }
        }
    }

    /// Restore a claim during ledger replay.
    pub fn restore(&self, pair: PoolPair, execution: ExecutionId) {
        self.claimed.lock().insert(pair, execution);
    }

    pub fn in_flight(&self) -> usize {
        self.claimed.lock().len()
    }

    pub fn is_claimed(&self, pair: &PoolPair) -> bool {
        self.claimed.lock().contains_key(pair)
    }
}
