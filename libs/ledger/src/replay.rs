//! Ledger replay.
//!
//! Folds the event stream into the state the engine needs to resume:
//! executions that never reached a terminal event, bridge transfers still in
//! flight or parked in the reclaim queue, reserve balances, cooldown windows
//! and the id high-water marks. Replay is pure: the same file always folds
//! to the same state, which is what makes restart reconciliation testable.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use types::{
    BridgeStatus, BridgeTransfer, EventKind, ExecutionId, LedgerEvent, NetworkId, OpportunityId,
    PoolId, PoolPair, TransferId, TxHash,
};

/// An execution reconstructed from `ExecutionReserved` + `LegSubmitted`
/// events with no terminal event following. Must be reconciled against
/// on-chain state before the engine resumes it.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenExecution {
    pub execution_id: ExecutionId,
    pub opportunity_id: OpportunityId,
    pub pair: PoolPair,
    pub trade_size: Decimal,
    pub reserved_at_ns: u64,
    /// (leg index, network, tx hash) for every submitted leg.
    pub submitted_legs: Vec<(usize, NetworkId, TxHash)>,
}

/// State folded out of a full ledger replay.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReplayState {
    pub last_seq: u64,
    pub open_executions: BTreeMap<ExecutionId, OpenExecution>,
    /// Transfers still pending delivery.
    pub open_transfers: BTreeMap<TransferId, BridgeTransfer>,
    /// Timed-out transfers parked for potential late reclaim.
    pub reclaim_transfers: BTreeMap<TransferId, BridgeTransfer>,
    pub reserve_balances: BTreeMap<PoolId, Decimal>,
    pub last_injection_ns: BTreeMap<PoolId, u64>,
    /// Most recent execution activity per pair, for cooldown restoration.
    pub cooldowns: BTreeMap<PoolPair, u64>,
    /// (ts_ns, realized profit) per completed execution, for loss budgets.
    pub completed_profits: Vec<(u64, Decimal)>,
    pub emergency_stopped: bool,
    pub max_execution_id: u64,
    pub max_transfer_id: u64,
    pub max_opportunity_id: u64,
}

impl ReplayState {
    /// Fold one event into the state. Errors are corruption: events that
    /// violate the ledger's own invariants (sequence gaps, negative reserve
    /// balances, terminal events for unknown executions are tolerated as
    /// late arrivals but a reserve underflow is not).
    pub fn apply(&mut self, event: &LedgerEvent) -> Result<(), String> {
        if event.seq != self.last_seq + 1 {
            return Err(format!(
                "sequence gap: expected {}, found {}",
                self.last_seq + 1,
                event.seq
            ));
        }
        self.last_seq = event.seq;

        match &event.kind {
            EventKind::PriceSnapshot { .. } => {}

            EventKind::OpportunityDetected { opportunity } => {
                self.max_opportunity_id = self.max_opportunity_id.max(opportunity.id.0);
            }

            EventKind::ExecutionReserved { execution_id, opportunity_id, pair, trade_size } => {
                self.max_execution_id = self.max_execution_id.max(execution_id.0);
                self.max_opportunity_id = self.max_opportunity_id.max(opportunity_id.0);
                self.cooldowns.insert(pair.clone(), event.ts_ns);
                self.open_executions.insert(
                    *execution_id,
                    OpenExecution {
                        execution_id: *execution_id,
                        opportunity_id: *opportunity_id,
                        pair: pair.clone(),
                        trade_size: *trade_size,
                        reserved_at_ns: event.ts_ns,
                        submitted_legs: Vec::new(),
                    },
                );
            }

            EventKind::LegSubmitted { execution_id, leg_index, network, tx_hash } => {
                if let Some(open) = self.open_executions.get_mut(execution_id) {
                    open.submitted_legs.push((*leg_index, network.clone(), *tx_hash));
                }
            }

            EventKind::LegConfirmed { .. } => {}

            EventKind::ExecutionCompleted { execution_id, pair, realized_profit } => {
                self.open_executions.remove(execution_id);
                self.cooldowns.insert(pair.clone(), event.ts_ns);
                self.completed_profits.push((event.ts_ns, *realized_profit));
            }

            EventKind::ExecutionFailed { execution_id, pair, .. } => {
                self.open_executions.remove(execution_id);
                self.cooldowns.insert(pair.clone(), event.ts_ns);
            }

            EventKind::BridgeStarted { transfer } => {
                self.max_transfer_id = self.max_transfer_id.max(transfer.id.0);
                self.open_transfers.insert(transfer.id, transfer.clone());
            }

            EventKind::BridgeConfirmed { transfer_id, .. } => {
                if let Some(mut transfer) = self
                    .open_transfers
                    .remove(transfer_id)
                    .or_else(|| self.reclaim_transfers.remove(transfer_id))
                {
                    transfer.status = BridgeStatus::Confirmed;
                }
            }

            EventKind::BridgeTimeout { transfer_id, .. } => {
                if let Some(mut transfer) = self.open_transfers.remove(transfer_id) {
                    transfer.status = BridgeStatus::TimedOut;
                    self.reclaim_transfers.insert(*transfer_id, transfer);
                }
            }

            EventKind::StrandedAsset { .. } => {}

            EventKind::ReserveAllocated { pool_id, amount, .. } => {
                let balance = self.reserve_balances.entry(pool_id.clone()).or_default();
                *balance += *amount;
                if *balance < Decimal::ZERO {
                    return Err(format!("reserve balance for {pool_id} went negative"));
                }
            }

            EventKind::ReserveInjected { pool_id, .. } => {
                self.reserve_balances.insert(pool_id.clone(), Decimal::ZERO);
                self.last_injection_ns.insert(pool_id.clone(), event.ts_ns);
            }

            EventKind::HealthDegraded { .. } | EventKind::HealthRestored { .. } => {}

            EventKind::EmergencyStop { .. } => {
                self.emergency_stopped = true;
            }

            EventKind::Cancelled { .. } => {}
        }

        Ok(())
    }
}
