//! Execution-domain records: opportunities, executions and their legs, and
//! cross-chain bridge transfers.
//!
//! State transition rules live with the types so every component observes the
//! same lifecycle: an [`ExecutionState`] only advances along the documented
//! edges and a [`BridgeStatus`] never leaves a terminal state.

use crate::identifiers::{ExecutionId, NetworkId, OpportunityId, PoolId, TransferId, TxHash};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("illegal execution transition {from:?} -> {to:?}")]
    IllegalExecution { from: ExecutionState, to: ExecutionState },

    #[error("bridge transfer already terminal in state {0:?}")]
    BridgeAlreadyTerminal(BridgeStatus),
}

/// Ordered (source, target) pool pair. The executor's exclusivity slot is
/// keyed by this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolPair {
    pub source: PoolId,
    pub target: PoolId,
}

impl PoolPair {
    pub fn new(source: impl Into<PoolId>, target: impl Into<PoolId>) -> Self {
        Self { source: source.into(), target: target.into() }
    }
}

impl fmt::Display for PoolPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.target)
    }
}

/// Lifecycle of a detected opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    Detected,
    Admitted,
    Rejected { reason: String },
    Executed { execution_id: ExecutionId },
    Expired,
}

/// A scored arbitrage candidate produced by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: OpportunityId,
    pub pair: PoolPair,
    pub source_network: NetworkId,
    pub target_network: NetworkId,
    /// Token the trade starts and ends in.
    pub direction_token: String,
    pub gross_edge_bps: Decimal,
    pub trade_size: Decimal,
    /// Expected paired-token proceeds of the source leg, for slippage bounds
    /// and bridge sizing.
    pub paired_amount: Decimal,
    pub est_gas_cost: Decimal,
    pub est_bridge_cost: Decimal,
    pub net_profit: Decimal,
    /// Combined confidence in [0, 1].
    pub confidence: Decimal,
    pub detected_at_ns: u64,
    pub status: OpportunityStatus,
}

impl Opportunity {
    pub fn is_cross_network(&self) -> bool {
        self.source_network != self.target_network
    }
}

/// Per-execution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Detected,
    Reserved,
    Submitting,
    Submitted,
    Confirming,
    Completed,
    Failed,
    Superseded,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Superseded
        )
    }

    /// Whether `self -> to` is a legal edge of the state machine.
    ///
    /// `Superseded` is reachable from any non-terminal state (emergency stop
    /// or preemption); everything else advances strictly forward.
    pub fn can_advance_to(&self, to: ExecutionState) -> bool {
        use ExecutionState::*;
        if self.is_terminal() {
            return false;
        }
        if to == Superseded {
            return true;
        }
        matches!(
            (self, to),
            (Detected, Reserved)
                | (Reserved, Submitting)
                | (Submitting, Submitted)
                | (Submitting, Failed)
                | (Submitted, Confirming)
                | (Submitted, Failed)
                | (Confirming, Completed)
                | (Confirming, Failed)
        )
    }
}

/// Terminal classification of an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionOutcome {
    Success,
    Reverted,
    BridgeTimeout,
    Superseded,
    GasDrift,
    SlippageExceeded,
    RpcFailure,
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::Reverted => "reverted",
            ExecutionOutcome::BridgeTimeout => "bridge-timeout",
            ExecutionOutcome::Superseded => "superseded",
            ExecutionOutcome::GasDrift => "gas-drift",
            ExecutionOutcome::SlippageExceeded => "slippage-exceeded",
            ExecutionOutcome::RpcFailure => "rpc-failure",
        };
        f.write_str(tag)
    }
}

/// What a single leg does on-chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegKind {
    Swap { network: NetworkId, pool: PoolId },
    Bridge { source_network: NetworkId, target_network: NetworkId },
    AddLiquidity { network: NetworkId, pool: PoolId },
}

/// One on-chain transaction forming part of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub kind: LegKind,
    pub amount_in: Decimal,
    pub tx_hash: Option<TxHash>,
    pub submitted_at_ns: Option<u64>,
    pub confirmed_at_ns: Option<u64>,
    pub gas_used: Option<u64>,
}

impl Leg {
    pub fn new(kind: LegKind, amount_in: Decimal) -> Self {
        Self {
            kind,
            amount_in,
            tx_hash: None,
            submitted_at_ns: None,
            confirmed_at_ns: None,
            gas_used: None,
        }
    }

    pub fn network(&self) -> &NetworkId {
        match &self.kind {
            LegKind::Swap { network, .. } | LegKind::AddLiquidity { network, .. } => network,
            LegKind::Bridge { source_network, .. } => source_network,
        }
    }
}

/// A dispatched arbitrage execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub opportunity_id: OpportunityId,
    pub pair: PoolPair,
    pub legs: Vec<Leg>,
    pub state: ExecutionState,
    pub submitted_at_ns: Option<u64>,
    pub confirmed_at_ns: Option<u64>,
    pub realized_profit: Option<Decimal>,
    pub outcome: Option<ExecutionOutcome>,
}

impl Execution {
    pub fn new(id: ExecutionId, opportunity: &Opportunity, legs: Vec<Leg>) -> Self {
        Self {
            id,
            opportunity_id: opportunity.id,
            pair: opportunity.pair.clone(),
            legs,
            state: ExecutionState::Detected,
            submitted_at_ns: None,
            confirmed_at_ns: None,
            realized_profit: None,
            outcome: None,
        }
    }

    /// Advance the state machine, rejecting illegal edges.
    pub fn advance(&mut self, to: ExecutionState) -> Result<(), TransitionError> {
        if !self.state.can_advance_to(to) {
            return Err(TransitionError::IllegalExecution { from: self.state, to });
        }
        self.state = to;
        Ok(())
    }
}

/// Status of an asset in flight across a bridge.
///
/// Progresses only `Pending -> Confirmed` or `Pending -> Failed | TimedOut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeStatus {
    Pending,
    Confirmed,
    Failed,
    TimedOut,
}

impl BridgeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BridgeStatus::Pending)
    }
}

/// An asset in flight between networks, tracked until terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeTransfer {
    pub id: TransferId,
    pub execution_id: ExecutionId,
    pub source_network: NetworkId,
    pub target_network: NetworkId,
    pub token: String,
    pub amount: Decimal,
    pub source_tx_hash: TxHash,
    pub target_tx_hash: Option<TxHash>,
    pub deadline_ns: u64,
    pub status: BridgeStatus,
}

impl BridgeTransfer {
    /// Resolve the transfer, enforcing the one-way lifecycle.
    pub fn resolve(&mut self, status: BridgeStatus) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::BridgeAlreadyTerminal(self.status));
        }
        self.status = status;
        Ok(())
    }
}
