//! Thin control surface.
//!
//! Every exposed operation maps to a single internal message; the transport
//! (dashboard, CLI, whatever) lives outside the core and is handed a
//! [`ControlHandle`].

use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use types::{Execution, NetworkStatus, Opportunity, ReserveEntry};

/// Aggregated engine status for operators.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub networks: Vec<NetworkStatus>,
    pub monitored_pools: usize,
    pub fresh_pools: usize,
    pub in_flight_executions: usize,
    pub open_bridge_transfers: usize,
    pub reclaim_queue_depth: usize,
    pub reserves: Vec<ReserveEntry>,
    pub daily_loss: Decimal,
    pub emergency_stopped: bool,
    pub auto_execute: bool,
    pub ledger_next_seq: u64,
}

/// One message per exposed operation.
#[derive(Debug)]
pub enum ControlCommand {
    Status { reply: oneshot::Sender<StatusSnapshot> },
    ListOpportunities { reply: oneshot::Sender<Vec<Opportunity>> },
    ListExecutions { reply: oneshot::Sender<Vec<Execution>> },
    EmergencyStop { reason: String },
    TriggerInjection,
    SetAutoExecute { enabled: bool },
}

/// Cloneable sender half handed to external surfaces.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlCommand>,
}

impl ControlHandle {
    pub fn new(tx: mpsc::Sender<ControlCommand>) -> Self {
        Self { tx }
    }

    pub async fn status(&self) -> Option<StatusSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(ControlCommand::Status { reply }).await.ok()?;
        rx.await.ok()
    }

    pub async fn list_opportunities(&self) -> Option<Vec<Opportunity>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControlCommand::ListOpportunities { reply })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn list_executions(&self) -> Option<Vec<Execution>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControlCommand::ListExecutions { reply })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn emergency_stop(&self, reason: impl Into<String>) -> bool {
        self.tx
            .send(ControlCommand::EmergencyStop { reason: reason.into() })
            .await
            .is_ok()
    }

    pub async fn trigger_injection(&self) -> bool {
        self.tx.send(ControlCommand::TriggerInjection).await.is_ok()
    }

    pub async fn set_auto_execute(&self, enabled: bool) -> bool {
        self.tx
            .send(ControlCommand::SetAutoExecute { enabled })
            .await
            .is_ok()
    }
}
