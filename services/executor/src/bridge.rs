//! Cross-chain bridge coordination.
//!
//! Every bridge transfer is tracked from source-side deposit to a terminal
//! resolution: the target-side delivery event, a source-side refund, or a
//! timeout. Timed-out transfers are never forgotten: they move to a
//! low-priority reclaim queue that keeps polling indefinitely, and an asset
//! that arrives late is credited to the liquidity reserve rather than
//! resumed as a trade.
//!
//! The bridge contracts themselves are external; each target network plugs
//! in through an opaque [`BridgeAdapter`].

use async_trait::async_trait;
use dashmap::DashMap;
use ledger::Ledger;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::{BridgeStatus, BridgeTransfer, EventKind, NetworkId, PoolId, TransferId, TxHash};

use chain_gateway::GatewayError;

/// Target-side view of one bridge, keyed by source transaction hash.
#[async_trait]
pub trait BridgeAdapter: Send + Sync {
    fn network(&self) -> &NetworkId;

    /// Target-side delivery transaction, if the transfer has landed.
    async fn check_delivery(&self, source_tx: TxHash) -> Result<Option<TxHash>, GatewayError>;

    /// Whether the source side has refunded the deposit.
    async fn check_refund(&self, source_tx: TxHash) -> Result<bool, GatewayError>;
}

/// Terminal resolution of a tracked transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeResolution {
    Confirmed { target_tx: TxHash },
    Failed,
    TimedOut,
}

/// A late-arriving asset credit destined for the reserve.
#[derive(Debug, Clone, PartialEq)]
pub struct ReclaimCredit {
    pub transfer_id: TransferId,
    pub pool_id: PoolId,
    pub amount: Decimal,
}

struct ParkedTransfer {
    transfer: BridgeTransfer,
    credit_pool: PoolId,
}

/// Tracks open bridge transfers across networks.
pub struct BridgeCoordinator {
    adapters: HashMap<NetworkId, Arc<dyn BridgeAdapter>>,
    ledger: Arc<Ledger>,
    /// Poll cadence per target network (bridge block time × 2).
    poll_intervals: HashMap<NetworkId, Duration>,
    confirmation_timeout: Duration,
    open: DashMap<TxHash, TransferId>,
    reclaim: Mutex<Vec<ParkedTransfer>>,
    reclaim_credits: mpsc::UnboundedSender<ReclaimCredit>,
}

impl BridgeCoordinator {
    pub fn new(
        adapters: HashMap<NetworkId, Arc<dyn BridgeAdapter>>,
        poll_intervals: HashMap<NetworkId, Duration>,
        confirmation_timeout: Duration,
        ledger: Arc<Ledger>,
        reclaim_credits: mpsc::UnboundedSender<ReclaimCredit>,
    ) -> Self {
        Self {
            adapters,
            ledger,
            poll_intervals,
            confirmation_timeout,
            open: DashMap::new(),
            reclaim: Mutex::new(Vec::new()),
            reclaim_credits,
        }
    }

    /// Track a transfer to a terminal resolution. `resume` skips the
    /// `BridgeStarted` event when re-tracking after a restart.
    ///
    /// On timeout the transfer is parked in the reclaim queue with
    /// `credit_pool` as the destination for a late arrival.
    pub async fn track(
        &self,
        mut transfer: BridgeTransfer,
        credit_pool: PoolId,
        resume: bool,
    ) -> Result<BridgeResolution, ledger::LedgerError> {
        let adapter = match self.adapters.get(&transfer.target_network) {
            Some(adapter) => adapter.clone(),
            None => {
                warn!(
                    network = %transfer.target_network,
                    "no bridge adapter for target network; failing transfer"
                );
                return Ok(BridgeResolution::Failed);
            }
        };

        if !resume {
            self.ledger
                .append(EventKind::BridgeStarted { transfer: transfer.clone() })?;
        }
        self.open.insert(transfer.source_tx_hash, transfer.id);

        let poll = self
            .poll_intervals
            .get(&transfer.target_network)
            .copied()
            .unwrap_or(Duration::from_secs(4));
        let deadline = tokio::time::Instant::now() + self.confirmation_timeout;

        let resolution = loop {
            match adapter.check_delivery(transfer.source_tx_hash).await {
                Ok(Some(target_tx)) => break BridgeResolution::Confirmed { target_tx },
                Ok(None) => {}
                Err(e) => {
                    debug!(transfer = %transfer.id, error = %e, "delivery check failed, will retry");
                }
            }

            match adapter.check_refund(transfer.source_tx_hash).await {
                Ok(true) => break BridgeResolution::Failed,
                Ok(false) => {}
                Err(e) => {
                    debug!(transfer = %transfer.id, error = %e, "refund check failed, will retry");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                break BridgeResolution::TimedOut;
            }
            tokio::time::sleep(poll).await;
        };

        self.open.remove(&transfer.source_tx_hash);

        match &resolution {
            BridgeResolution::Confirmed { target_tx } => {
                transfer.status = BridgeStatus::Confirmed;
                transfer.target_tx_hash = Some(*target_tx);
                self.ledger.append(EventKind::BridgeConfirmed {
                    transfer_id: transfer.id,
                    execution_id: transfer.execution_id,
                    target_tx_hash: *target_tx,
                })?;
                info!(transfer = %transfer.id, "bridge transfer confirmed");
            }
            BridgeResolution::Failed => {
                transfer.status = BridgeStatus::Failed;
                warn!(transfer = %transfer.id, "bridge transfer refunded on source side");
            }
            BridgeResolution::TimedOut => {
                transfer.status = BridgeStatus::TimedOut;
                self.ledger.append(EventKind::BridgeTimeout {
                    transfer_id: transfer.id,
                    execution_id: transfer.execution_id,
                })?;
                warn!(
                    transfer = %transfer.id,
                    timeout_secs = self.confirmation_timeout.as_secs(),
                    "bridge transfer timed out; parking in reclaim queue"
                );
                self.reclaim
                    .lock()
                    .push(ParkedTransfer { transfer: transfer.clone(), credit_pool });
            }
        }

        Ok(resolution)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn reclaim_count(&self) -> usize {
        self.reclaim.lock().len()
    }

    /// Restore a timed-out transfer into the reclaim queue during replay.
    pub fn restore_reclaim(&self, transfer: BridgeTransfer, credit_pool: PoolId) {
        self.reclaim.lock().push(ParkedTransfer { transfer, credit_pool });
    }

    /// One pass over the reclaim queue: late deliveries are credited to the
    /// reserve and leave the queue; everything else stays parked.
    pub async fn reclaim_pass(&self) -> Result<usize, ledger::LedgerError> {
        let parked: Vec<ParkedTransfer> = {
            let mut queue = self.reclaim.lock();
            std::mem::take(&mut *queue)
        };
        if parked.is_empty() {
            return Ok(0);
        }

        let mut reclaimed = 0usize;
        let mut still_parked = Vec::new();

        for entry in parked {
            let Some(adapter) = self.adapters.get(&entry.transfer.target_network) else {
                still_parked.push(entry);
                continue;
            };
            match adapter.check_delivery(entry.transfer.source_tx_hash).await {
                Ok(Some(target_tx)) => {
                    self.ledger.append(EventKind::BridgeConfirmed {
                        transfer_id: entry.transfer.id,
                        execution_id: entry.transfer.execution_id,
                        target_tx_hash: target_tx,
                    })?;
                    info!(
                        transfer = %entry.transfer.id,
                        pool = %entry.credit_pool,
                        amount = %entry.transfer.amount,
                        "late bridge arrival reclaimed for the reserve"
                    );
                    let _ = self.reclaim_credits.send(ReclaimCredit {
                        transfer_id: entry.transfer.id,
                        pool_id: entry.credit_pool.clone(),
                        amount: entry.transfer.amount,
                    });
                    reclaimed += 1;
                }
                _ => still_parked.push(entry),
            }
        }

        self.reclaim.lock().extend(still_parked);
        Ok(reclaimed)
    }

    /// Spawn the low-priority reclaim worker.
    pub fn spawn_reclaim_worker(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = self.reclaim_pass().await {
                    warn!(error = %e, "reclaim pass failed");
                }
            }
        })
    }
}

/// Scripted adapter for tests and simulation.
pub struct MockBridgeAdapter {
    network: NetworkId,
    deliveries: DashMap<TxHash, TxHash>,
    refunds: DashMap<TxHash, ()>,
    deliver_all: parking_lot::RwLock<Option<TxHash>>,
}

impl MockBridgeAdapter {
    pub fn new(network: NetworkId) -> Self {
        Self {
            network,
            deliveries: DashMap::new(),
            refunds: DashMap::new(),
            deliver_all: parking_lot::RwLock::new(None),
        }
    }

    /// Mark a source transaction as delivered on the target side.
    pub fn deliver(&self, source_tx: TxHash, target_tx: TxHash) {
        self.deliveries.insert(source_tx, target_tx);
    }

    /// Deliver every transfer with the given target transaction.
    pub fn deliver_everything(&self, target_tx: TxHash) {
        *self.deliver_all.write() = Some(target_tx);
    }

    /// Mark a source transaction as refunded.
    pub fn refund(&self, source_tx: TxHash) {
        self.refunds.insert(source_tx, ());
    }
}

#[async_trait]
impl BridgeAdapter for MockBridgeAdapter {
    fn network(&self) -> &NetworkId {
        &self.network
    }

    async fn check_delivery(&self, source_tx: TxHash) -> Result<Option<TxHash>, GatewayError> {
        if let Some(target) = self.deliveries.get(&source_tx) {
            return Ok(Some(*target.value()));
        }
        Ok(*self.deliver_all.read())
    }

    async fn check_refund(&self, source_tx: TxHash) -> Result<bool, GatewayError> {
        Ok(self.refunds.contains_key(&source_tx))
    }
}
