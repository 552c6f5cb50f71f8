//! Ledger event vocabulary.
//!
//! Every state-changing action in the engine appends exactly one of these
//! events before the new state becomes observable. The ledger crate owns
//! persistence and replay; the kinds live here so any component can construct
//! them without a ledger dependency.

use crate::execution::{BridgeTransfer, ExecutionOutcome, Opportunity, PoolPair};
use crate::identifiers::{ExecutionId, NetworkId, OpportunityId, PoolId, TransferId, TxHash};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Where a reserve credit came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReserveSource {
    /// Profit share from a completed execution.
    ExecutionProfit { execution_id: ExecutionId },
    /// External deposit from the fund-source collaborator.
    Deposit,
    /// A timed-out bridge transfer whose asset later arrived.
    BridgeReclaim { transfer_id: TransferId },
    /// Balance restored after an injection was capped below the full
    /// reserve by the pool-liquidity limit.
    InjectionRemainder,
}

/// One append-only ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub seq: u64,
    pub ts_ns: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// The event payload, tagged by `kind` in the serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum EventKind {
    PriceSnapshot {
        pool_id: PoolId,
        block_number: u64,
        quote: Decimal,
    },
    OpportunityDetected {
        opportunity: Opportunity,
    },
    ExecutionReserved {
        execution_id: ExecutionId,
        opportunity_id: OpportunityId,
        pair: PoolPair,
        trade_size: Decimal,
    },
    LegSubmitted {
        execution_id: ExecutionId,
        leg_index: usize,
        network: NetworkId,
        tx_hash: TxHash,
    },
    LegConfirmed {
        execution_id: ExecutionId,
        leg_index: usize,
        tx_hash: TxHash,
        block_number: u64,
        gas_used: u64,
    },
    ExecutionCompleted {
        execution_id: ExecutionId,
        pair: PoolPair,
        realized_profit: Decimal,
    },
    ExecutionFailed {
        execution_id: ExecutionId,
        pair: PoolPair,
        outcome: ExecutionOutcome,
        reason: String,
    },
    BridgeStarted {
        transfer: BridgeTransfer,
    },
    BridgeConfirmed {
        transfer_id: TransferId,
        execution_id: ExecutionId,
        target_tx_hash: TxHash,
    },
    BridgeTimeout {
        transfer_id: TransferId,
        execution_id: ExecutionId,
    },
    StrandedAsset {
        transfer_id: TransferId,
        execution_id: ExecutionId,
        token: String,
        amount: Decimal,
    },
    ReserveAllocated {
        pool_id: PoolId,
        amount: Decimal,
        source: ReserveSource,
    },
    ReserveInjected {
        pool_id: PoolId,
        cqt_amount: Decimal,
        paired_amount: Decimal,
        tx_hash: TxHash,
    },
    HealthDegraded {
        network: NetworkId,
    },
    HealthRestored {
        network: NetworkId,
    },
    EmergencyStop {
        reason: String,
    },
    Cancelled {
        scope: String,
    },
}

impl EventKind {
    /// Stable tag used in logs and the control surface.
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::PriceSnapshot { .. } => "PriceSnapshot",
            EventKind::OpportunityDetected { .. } => "OpportunityDetected",
            EventKind::ExecutionReserved { .. } => "ExecutionReserved",
            EventKind::LegSubmitted { .. } => "LegSubmitted",
            EventKind::LegConfirmed { .. } => "LegConfirmed",
            EventKind::ExecutionCompleted { .. } => "ExecutionCompleted",
            EventKind::ExecutionFailed { .. } => "ExecutionFailed",
            EventKind::BridgeStarted { .. } => "BridgeStarted",
            EventKind::BridgeConfirmed { .. } => "BridgeConfirmed",
            EventKind::BridgeTimeout { .. } => "BridgeTimeout",
            EventKind::StrandedAsset { .. } => "StrandedAsset",
            EventKind::ReserveAllocated { .. } => "ReserveAllocated",
            EventKind::ReserveInjected { .. } => "ReserveInjected",
            EventKind::HealthDegraded { .. } => "HealthDegraded",
            EventKind::HealthRestored { .. } => "HealthRestored",
            EventKind::EmergencyStop { .. } => "EmergencyStop",
            EventKind::Cancelled { .. } => "Cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn events_round_trip_through_json() {
        let event = LedgerEvent {
            seq: 42,
            ts_ns: 1_700_000_000_000_000_000,
            kind: EventKind::ReserveAllocated {
                pool_id: PoolId::new("polygon-cqt-weth"),
                amount: dec!(12.5),
                source: ReserveSource::ExecutionProfit { execution_id: ExecutionId(7) },
            },
        };
        let line = serde_json::to_string(&event).unwrap();
        let back: LedgerEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn kind_tag_is_stable() {
        let kind = EventKind::EmergencyStop { reason: "operator".to_string() };
        assert_eq!(kind.tag(), "EmergencyStop");
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("\"kind\":\"EmergencyStop\""));
    }
}
