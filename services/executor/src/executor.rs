//! The execution state machine driver.

use cqt_amm::{SwapMath, SwapPool};
use chain_gateway::{ChainGateway, GatewayError, TxCall, TxRequest};
use config::{EngineConfig, PoolConfig};
use ledger::{Ledger, LedgerError};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use types::{
    time, BridgeStatus, BridgeTransfer, EventKind, Execution, ExecutionId, ExecutionOutcome,
    ExecutionState, Leg, LegKind, NetworkId, Opportunity, PoolPair, PriceSnapshot, Receipt,
    TransferId,
};

use crate::bridge::{BridgeCoordinator, BridgeResolution};
use crate::slots::SlotManager;

/// Observed gas may exceed the detection-time estimate by at most this
/// factor before the execution aborts.
const GAS_DRIFT_FACTOR: Decimal = dec!(1.2);

/// Rolling window for the consecutive-failure tripwire.
const FAILURE_WINDOW_SECS: u64 = 3600;

/// Retained terminal executions for the control surface.
const RECENT_CAPACITY: usize = 256;

/// Realized-profit notification for the reserve manager. The executor and
/// reserve manager share no state; this message and the ledger are the only
/// couplings.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfitEvent {
    pub execution_id: ExecutionId,
    pub pair: PoolPair,
    pub realized_profit: Decimal,
}

/// Consumes the admitted-opportunity queue and drives each execution through
/// the state machine.
pub struct Executor {
    config: Arc<EngineConfig>,
    gateways: HashMap<NetworkId, Arc<dyn ChainGateway>>,
    ledger: Arc<Ledger>,
    bridge: Arc<BridgeCoordinator>,
    slots: Arc<SlotManager>,
    concurrency: Arc<Semaphore>,
    emergency_stop: Arc<AtomicBool>,
    profit_tx: mpsc::UnboundedSender<ProfitEvent>,
    next_execution_id: AtomicU64,
    next_transfer_id: AtomicU64,
    cooldowns: Mutex<HashMap<PoolPair, u64>>,
    failure_window: Mutex<VecDeque<u64>>,
    daily_results: Mutex<VecDeque<(u64, Decimal)>>,
    recent: Mutex<VecDeque<Execution>>,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<EngineConfig>,
        gateways: HashMap<NetworkId, Arc<dyn ChainGateway>>,
        ledger: Arc<Ledger>,
        bridge: Arc<BridgeCoordinator>,
        slots: Arc<SlotManager>,
        emergency_stop: Arc<AtomicBool>,
        profit_tx: mpsc::UnboundedSender<ProfitEvent>,
        first_execution_id: u64,
        first_transfer_id: u64,
    ) -> Self {
        let max_concurrent = config.arbitrage.max_concurrent_arbitrages;
        Self {
            config,
            gateways,
            ledger,
            bridge,
            slots,
            concurrency: Arc::new(Semaphore::new(max_concurrent)),
            emergency_stop,
            profit_tx,
            next_execution_id: AtomicU64::new(first_execution_id.max(1)),
            next_transfer_id: AtomicU64::new(first_transfer_id.max(1)),
            cooldowns: Mutex::new(HashMap::new()),
            failure_window: Mutex::new(VecDeque::new()),
            daily_results: Mutex::new(VecDeque::new()),
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Seed cooldowns and daily results from ledger replay.
    pub fn restore(&self, cooldowns: HashMap<PoolPair, u64>, results: Vec<(u64, Decimal)>) {
        *self.cooldowns.lock() = cooldowns;
        *self.daily_results.lock() = results.into();
    }

    pub fn in_flight(&self) -> usize {
        self.slots.in_flight()
    }

    pub fn cooldowns(&self) -> HashMap<PoolPair, u64> {
        self.cooldowns.lock().clone()
    }

    /// Cumulative realized loss over the trailing day (positive = loss).
    pub fn daily_loss(&self, now_ns: u64) -> Decimal {
        let day_ago = now_ns.saturating_sub(time::secs_to_ns(86_400));
        self.daily_results
            .lock()
            .iter()
            .filter(|(ts, profit)| *ts >= day_ago && *profit < Decimal::ZERO)
            .map(|(_, profit)| -*profit)
            .sum()
    }

    pub fn emergency_stopped(&self) -> bool {
        self.emergency_stop.load(Ordering::SeqCst)
    }

    /// Engage the emergency stop. The event is ledgered before the flag
    /// becomes observable; a concurrent double-engage at worst duplicates
    /// the event, which replay tolerates.
    pub fn engage_emergency_stop(&self, reason: &str) -> Result<(), LedgerError> {
        if self.emergency_stop.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.ledger
            .append(EventKind::EmergencyStop { reason: reason.to_string() })?;
        self.emergency_stop.store(true, Ordering::SeqCst);
        warn!(%reason, "emergency stop engaged");
        Ok(())
    }

    pub fn recent_executions(&self) -> Vec<Execution> {
        self.recent.lock().iter().cloned().collect()
    }

    /// Spawn the worker loop consuming the admitted queue.
    pub fn spawn_workers(
        self: Arc<Self>,
        mut queue: mpsc::Receiver<Opportunity>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    next = queue.recv() => {
                        let Some(opportunity) = next else { break };
                        let executor = self.clone();
                        tasks.spawn(async move {
                            if let Err(e) = executor.execute(opportunity).await {
                                warn!(error = %e, "execution aborted on ledger failure");
                            }
                        });
                    }
                }
            }
            // Drain in-flight executions before reporting stopped.
            while tasks.join_next().await.is_some() {}
            debug!("executor workers drained");
        })
    }

    /// Drive one opportunity through the full state machine.
    pub async fn execute(&self, opportunity: Opportunity) -> Result<Execution, LedgerError> {
        let now_ns = time::now_ns();
        let id = ExecutionId(self.next_execution_id.fetch_add(1, Ordering::Relaxed));
        let pair = opportunity.pair.clone();

        let legs = match self.build_legs(&opportunity) {
            Ok(legs) => legs,
            Err(reason) => {
                warn!(%pair, %reason, "cannot build legs; dropping opportunity");
                let execution = Execution::new(id, &opportunity, Vec::new());
                return self.supersede(execution, &reason);
            }
        };
        let mut execution = Execution::new(id, &opportunity, legs);

        // Emergency stop and preemption never touch the chain.
        if self.emergency_stopped() {
            return self.supersede(execution, "emergency stop");
        }
        // The risk filter already applies the cooldown, but an opportunity
        // admitted just before a sibling reserved the pair would otherwise
        // slip through the window once the slot frees.
        let cooldown_ns = time::secs_to_ns(self.config.arbitrage.cooldown_period_secs);
        let recently_active = self
            .cooldowns
            .lock()
            .get(&pair)
            .is_some_and(|last| now_ns.saturating_sub(*last) < cooldown_ns);
        if recently_active {
            return self.supersede(execution, "pair inside cooldown window");
        }
        if !self.slots.try_claim(&pair, id) {
            // Tie-break: the queue is ranked, so the holder had the greater
            // net profit this tick.
            return self.supersede(execution, "slot held by concurrent execution");
        }
        let permit = match self.concurrency.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.slots.release(&pair, id);
                return self.supersede(execution, "concurrency budget exhausted");
            }
        };

        self.ledger.append(EventKind::ExecutionReserved {
            execution_id: id,
            opportunity_id: opportunity.id,
            pair: pair.clone(),
            trade_size: opportunity.trade_size,
        })?;
        self.cooldowns.lock().insert(pair.clone(), now_ns);
        execution
            .advance(ExecutionState::Reserved)
            .expect("detected -> reserved is always legal");

        info!(
            execution = %id,
            %pair,
            size = %opportunity.trade_size,
            net = %opportunity.net_profit,
            "execution reserved"
        );

        let result = self.run_legs(&mut execution, &opportunity).await;

        let execution = match result {
            Ok(()) => self.complete(execution)?,
            Err(abort) => self.fail(execution, abort.outcome, abort.reason)?,
        };

        self.slots.release(&pair, id);
        drop(permit);
        self.cooldowns.lock().insert(pair, time::now_ns());
        self.push_recent(execution.clone());
        Ok(execution)
    }

    /// Submit and confirm every leg in order. Any error aborts the
    /// remaining legs (they are never submitted).
    async fn run_legs(
        &self,
        execution: &mut Execution,
        opportunity: &Opportunity,
    ) -> Result<(), Abort> {
        execution
            .advance(ExecutionState::Submitting)
            .map_err(Abort::internal)?;

        self.check_gas_drift(opportunity).await?;
        self.preflight_slippage(opportunity).await?;

        let mut receipts: Vec<Receipt> = Vec::with_capacity(execution.legs.len());

        for index in 0..execution.legs.len() {
            if self.emergency_stopped() {
                return Err(Abort {
                    outcome: ExecutionOutcome::Superseded,
                    reason: "emergency stop before submission".to_string(),
                });
            }

            let leg = execution.legs[index].clone();
            let network = leg.network().clone();
            let gateway = self.gateway(&network)?;
            let tx = self.leg_tx(&leg, opportunity)?;

            let tx_hash = gateway.submit(tx).await.map_err(Abort::from_gateway)?;
            let submitted_at = time::now_ns();
            self.ledger
                .append(EventKind::LegSubmitted {
                    execution_id: execution.id,
                    leg_index: index,
                    network: network.clone(),
                    tx_hash,
                })
                .map_err(Abort::ledger)?;
            {
                let leg = &mut execution.legs[index];
                leg.tx_hash = Some(tx_hash);
                leg.submitted_at_ns = Some(submitted_at);
            }
            if execution.state == ExecutionState::Submitting {
                execution
                    .advance(ExecutionState::Submitted)
                    .map_err(Abort::internal)?;
                execution.submitted_at_ns = Some(submitted_at);
            }

            let depth = self.confirmation_depth(&network);
            if execution.state == ExecutionState::Submitted {
                execution
                    .advance(ExecutionState::Confirming)
                    .map_err(Abort::internal)?;
            }
            let receipt = gateway
                .await_confirmation(tx_hash, depth)
                .await
                .map_err(Abort::from_gateway)?;

            if !receipt.success {
                return Err(Abort {
                    outcome: ExecutionOutcome::Reverted,
                    reason: format!("leg {index} reverted in block {}", receipt.block_number),
                });
            }

            self.ledger
                .append(EventKind::LegConfirmed {
                    execution_id: execution.id,
                    leg_index: index,
                    tx_hash,
                    block_number: receipt.block_number,
                    gas_used: receipt.gas_used,
                })
                .map_err(Abort::ledger)?;
            {
                let leg = &mut execution.legs[index];
                leg.confirmed_at_ns = Some(time::now_ns());
                leg.gas_used = Some(receipt.gas_used);
            }

            // A bridge leg suspends the execution until the asset lands on
            // the target network.
            if let LegKind::Bridge { source_network, target_network } = &leg.kind {
                self.run_bridge(
                    execution,
                    opportunity,
                    source_network.clone(),
                    target_network.clone(),
                    tx_hash,
                )
                .await?;
            }

            receipts.push(receipt);
        }

        execution.realized_profit = Some(
            receipts
                .iter()
                .filter_map(|receipt| receipt.token_delta)
                .sum(),
        );
        Ok(())
    }

    async fn run_bridge(
        &self,
        execution: &mut Execution,
        opportunity: &Opportunity,
        source_network: NetworkId,
        target_network: NetworkId,
        source_tx_hash: types::TxHash,
    ) -> Result<(), Abort> {
        let transfer = BridgeTransfer {
            id: TransferId(self.next_transfer_id.fetch_add(1, Ordering::Relaxed)),
            execution_id: execution.id,
            source_network,
            target_network,
            token: opportunity.direction_token.clone(),
            amount: opportunity.paired_amount,
            source_tx_hash,
            target_tx_hash: None,
            deadline_ns: time::now_ns()
                + time::secs_to_ns(self.config.cross_chain.confirmation_timeout_secs),
            status: BridgeStatus::Pending,
        };
        let transfer_id = transfer.id;

        let resolution = self
            .bridge
            .track(transfer, opportunity.pair.target.clone(), false)
            .await
            .map_err(Abort::ledger)?;

        match resolution {
            BridgeResolution::Confirmed { .. } => Ok(()),
            BridgeResolution::Failed => Err(Abort {
                outcome: ExecutionOutcome::Reverted,
                reason: format!("bridge transfer {transfer_id} refunded on source"),
            }),
            BridgeResolution::TimedOut => {
                // The asset is stranded mid-bridge; record it and hand
                // responsibility to the coordinator's reclaim queue. No
                // compensating trade is initiated.
                self.ledger
                    .append(EventKind::StrandedAsset {
                        transfer_id,
                        execution_id: execution.id,
                        token: opportunity.direction_token.clone(),
                        amount: opportunity.paired_amount,
                    })
                    .map_err(Abort::ledger)?;
                Err(Abort {
                    outcome: ExecutionOutcome::BridgeTimeout,
                    reason: format!("bridge transfer {transfer_id} exceeded deadline"),
                })
            }
        }
    }

    /// Abort when the observed gas cost has drifted beyond the estimate.
    async fn check_gas_drift(&self, opportunity: &Opportunity) -> Result<(), Abort> {
        let mut current_cost = Decimal::ZERO;
        let mut networks = vec![&opportunity.source_network];
        if opportunity.is_cross_network() {
            networks.push(&opportunity.target_network);
        } else {
            networks.push(&opportunity.source_network);
        }

        for network in networks {
            let Some(network_config) = self.config.network(network) else {
                continue;
            };
            let gateway = self.gateway(network)?;
            let price_wei = gateway
                .gas_price_wei()
                .await
                .map_err(Abort::from_gateway)?;
            let price_wei = price_wei.min(u64::MAX as u128) as u64;
            current_cost += Decimal::from(price_wei)
                * Decimal::from(network_config.gas_units_per_swap)
                / dec!(1000000000000000000)
                * network_config.native_price_cqt;
        }

        let ceiling = opportunity.est_gas_cost * GAS_DRIFT_FACTOR;
        if current_cost > ceiling {
            return Err(Abort {
                outcome: ExecutionOutcome::GasDrift,
                reason: format!(
                    "gas cost {current_cost} exceeds estimate ceiling {ceiling}"
                ),
            });
        }
        Ok(())
    }

    /// Re-quote the source pool; abort without on-chain footprint when the
    /// expected proceeds have slipped beyond tolerance.
    async fn preflight_slippage(&self, opportunity: &Opportunity) -> Result<(), Abort> {
        let pool_config = self.pool(&opportunity.pair.source)?;
        let gateway = self.gateway(&pool_config.network_id)?;

        let observation = gateway
            .read_pool_state(pool_config.address)
            .await
            .map_err(Abort::from_gateway)?;
        let snapshot =
            PriceSnapshot::from_observation(pool_config.id.clone(), observation, time::now_ns())
                .map_err(|e| Abort {
                    outcome: ExecutionOutcome::RpcFailure,
                    reason: format!("undecodable pool state in preflight: {e}"),
                })?;

        let cqt_is_token0 = pool_config.cqt_is_token0().unwrap_or(true);
        let (cqt_reserve, paired_reserve) = if cqt_is_token0 {
            (snapshot.reserve0, snapshot.reserve1)
        } else {
            (snapshot.reserve1, snapshot.reserve0)
        };
        let pool = SwapPool {
            reserve_in: cqt_reserve,
            reserve_out: paired_reserve,
            fee_bps: pool_config.fee_tier_bps,
        };

        let fresh_out = SwapMath::output_amount(opportunity.trade_size, &pool)
            .map_err(|e| Abort {
                outcome: ExecutionOutcome::SlippageExceeded,
                reason: format!("source pool no longer swappable: {e}"),
            })?;

        let tolerance = Decimal::from(self.config.arbitrage.max_slippage_bps) / dec!(10000);
        let floor = opportunity.paired_amount * (Decimal::ONE - tolerance);
        if fresh_out < floor {
            return Err(Abort {
                outcome: ExecutionOutcome::SlippageExceeded,
                reason: format!(
                    "expected {floor} paired out, fresh quote yields {fresh_out}"
                ),
            });
        }
        Ok(())
    }

    /// Build the leg plan: two swaps, with a bridge between them when the
    /// pools live on different networks.
    fn build_legs(&self, opportunity: &Opportunity) -> Result<Vec<Leg>, String> {
        let source = self
            .pool(&opportunity.pair.source)
            .map_err(|e| e.reason)?
            .clone();
        let target = self
            .pool(&opportunity.pair.target)
            .map_err(|e| e.reason)?
            .clone();

        let mut legs = vec![Leg::new(
            LegKind::Swap { network: source.network_id.clone(), pool: source.id.clone() },
            opportunity.trade_size,
        )];

        if opportunity.is_cross_network() {
            legs.push(Leg::new(
                LegKind::Bridge {
                    source_network: source.network_id.clone(),
                    target_network: target.network_id.clone(),
                },
                opportunity.paired_amount,
            ));
        }

        legs.push(Leg::new(
            LegKind::Swap { network: target.network_id.clone(), pool: target.id.clone() },
            opportunity.paired_amount,
        ));
        Ok(legs)
    }

    /// Materialize the transaction for one leg.
    fn leg_tx(&self, leg: &Leg, opportunity: &Opportunity) -> Result<TxRequest, Abort> {
        let tolerance = Decimal::from(self.config.arbitrage.max_slippage_bps) / dec!(10000);
        match &leg.kind {
            LegKind::Swap { pool, .. } => {
                let pool_config = self.pool(pool)?;
                let cqt_is_token0 = pool_config.cqt_is_token0().unwrap_or(true);
                // Source leg sells CQT; target leg buys it back.
                let selling_cqt = *pool == opportunity.pair.source;
                let min_amount_out = if selling_cqt {
                    opportunity.paired_amount * (Decimal::ONE - tolerance)
                } else {
                    opportunity.trade_size * (Decimal::ONE - tolerance)
                };
                Ok(TxRequest::new(
                    pool_config.address,
                    TxCall::Swap {
                        pool: pool.clone(),
                        zero_for_one: cqt_is_token0 == selling_cqt,
                        amount_in: leg.amount_in,
                        min_amount_out,
                    },
                    self.config
                        .network(&pool_config.network_id)
                        .map(|n| n.gas_units_per_swap)
                        .unwrap_or(300_000),
                ))
            }
            LegKind::Bridge { source_network, target_network } => {
                let contract = self
                    .config
                    .cross_chain
                    .bridge_contracts
                    .get(source_network.as_str())
                    .copied()
                    .ok_or_else(|| Abort {
                        outcome: ExecutionOutcome::RpcFailure,
                        reason: format!("no bridge contract for {source_network}"),
                    })?;
                Ok(TxRequest::new(
                    contract,
                    TxCall::BridgeDeposit {
                        target_network: target_network.clone(),
                        token: opportunity.direction_token.clone(),
                        amount: leg.amount_in,
                        deadline_ns: time::now_ns()
                            + time::secs_to_ns(self.config.cross_chain.confirmation_timeout_secs),
                    },
                    300_000,
                ))
            }
            LegKind::AddLiquidity { .. } => Err(Abort {
                outcome: ExecutionOutcome::RpcFailure,
                reason: "liquidity legs are not part of arbitrage executions".to_string(),
            }),
        }
    }

    fn complete(&self, mut execution: Execution) -> Result<Execution, LedgerError> {
        let realized = execution.realized_profit.unwrap_or(Decimal::ZERO);
        self.ledger.append(EventKind::ExecutionCompleted {
            execution_id: execution.id,
            pair: execution.pair.clone(),
            realized_profit: realized,
        })?;
        execution
            .advance(ExecutionState::Completed)
            .expect("confirming -> completed is always legal");
        execution.outcome = Some(ExecutionOutcome::Success);
        execution.confirmed_at_ns = Some(time::now_ns());

        self.failure_window.lock().clear();
        self.daily_results.lock().push_back((time::now_ns(), realized));

        info!(
            execution = %execution.id,
            pair = %execution.pair,
            profit = %realized,
            "execution completed"
        );
        let _ = self.profit_tx.send(ProfitEvent {
            execution_id: execution.id,
            pair: execution.pair.clone(),
            realized_profit: realized,
        });
        Ok(execution)
    }

    fn fail(
        &self,
        mut execution: Execution,
        outcome: ExecutionOutcome,
        reason: String,
    ) -> Result<Execution, LedgerError> {
        self.ledger.append(EventKind::ExecutionFailed {
            execution_id: execution.id,
            pair: execution.pair.clone(),
            outcome: outcome.clone(),
            reason: reason.clone(),
        })?;
        if execution
            .advance(if outcome == ExecutionOutcome::Superseded {
                ExecutionState::Superseded
            } else {
                ExecutionState::Failed
            })
            .is_err()
        {
            // Terminal already; keep the recorded outcome authoritative.
        }
        execution.outcome = Some(outcome.clone());
        warn!(
            execution = %execution.id,
            pair = %execution.pair,
            outcome = %outcome,
            %reason,
            "execution failed"
        );

        if outcome != ExecutionOutcome::Superseded {
            self.record_failure()?;
        }
        Ok(execution)
    }

    /// Count a failure in the rolling window; trip the emergency stop at the
    /// configured threshold.
    fn record_failure(&self) -> Result<(), LedgerError> {
        let now_ns = time::now_ns();
        let window_start = now_ns.saturating_sub(time::secs_to_ns(FAILURE_WINDOW_SECS));
        let count = {
            let mut window = self.failure_window.lock();
            window.push_back(now_ns);
            while window.front().is_some_and(|ts| *ts < window_start) {
                window.pop_front();
            }
            window.len()
        };

        if count >= self.config.security.max_consecutive_failures as usize {
            self.engage_emergency_stop(&format!(
                "{count} consecutive execution failures within {FAILURE_WINDOW_SECS}s"
            ))?;
        }
        Ok(())
    }

    fn supersede(
        &self,
        mut execution: Execution,
        reason: &str,
    ) -> Result<Execution, LedgerError> {
        self.ledger.append(EventKind::Cancelled {
            scope: format!("execution {}: {reason}", execution.id),
        })?;
        let _ = execution.advance(ExecutionState::Superseded);
        execution.outcome = Some(ExecutionOutcome::Superseded);
        debug!(execution = %execution.id, %reason, "execution superseded");
        self.push_recent(execution.clone());
        Ok(execution)
    }

    fn push_recent(&self, execution: Execution) {
        let mut recent = self.recent.lock();
        if recent.len() == RECENT_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(execution);
    }

    fn gateway(&self, network: &NetworkId) -> Result<&Arc<dyn ChainGateway>, Abort> {
        self.gateways.get(network).ok_or_else(|| Abort {
            outcome: ExecutionOutcome::RpcFailure,
            reason: format!("no gateway for network {network}"),
        })
    }

    fn pool(&self, pool: &types::PoolId) -> Result<&PoolConfig, Abort> {
        self.config.pool(pool).ok_or_else(|| Abort {
            outcome: ExecutionOutcome::RpcFailure,
            reason: format!("pool {pool} is not configured"),
        })
    }

    fn confirmation_depth(&self, network: &NetworkId) -> u64 {
        self.config
            .network(network)
            .map(|n| n.confirmation_blocks)
            .unwrap_or(1)
    }

    #[cfg(test)]
    pub(crate) fn grab_permit(&self) -> tokio::sync::OwnedSemaphorePermit {
        self.concurrency
            .clone()
            .try_acquire_owned()
            .expect("test permit available")
    }
}

/// Internal abort carrying the terminal outcome.
struct Abort {
    outcome: ExecutionOutcome,
    reason: String,
}

impl Abort {
    fn from_gateway(error: GatewayError) -> Self {
        let outcome = match &error {
            GatewayError::Timeout { .. } => ExecutionOutcome::RpcFailure,
            GatewayError::Rejected(_) => ExecutionOutcome::Reverted,
            _ => ExecutionOutcome::RpcFailure,
        };
        Self { outcome, reason: error.to_string() }
    }

    fn ledger(error: LedgerError) -> Self {
        Self { outcome: ExecutionOutcome::RpcFailure, reason: error.to_string() }
    }

    fn internal(error: types::TransitionError) -> Self {
        Self { outcome: ExecutionOutcome::RpcFailure, reason: error.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeAdapter, MockBridgeAdapter, ReclaimCredit};
    use chain_gateway::MockGateway;
    use std::path::PathBuf;
    use std::time::Duration;
    use types::{OpportunityId, OpportunityStatus, PoolId, TxHash};

    struct Harness {
        executor: Arc<Executor>,
        polygon: Arc<MockGateway>,
        base: Arc<MockGateway>,
        adapter: Arc<MockBridgeAdapter>,
        coordinator: Arc<BridgeCoordinator>,
        slots: Arc<SlotManager>,
        profit_rx: mpsc::UnboundedReceiver<ProfitEvent>,
        _credit_rx: mpsc::UnboundedReceiver<ReclaimCredit>,
        ledger_path: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn harness(pool_b_network: &str, max_failures: u32) -> Harness {
        let toml = format!(
            r#"
            [networks.polygon]
            rpc_url = "http://localhost"
            chain_id = 137
            confirmation_blocks = 2
            max_gas_price_gwei = 200
            native_symbol = "MATIC"

            [networks.base]
            rpc_url = "http://localhost"
            chain_id = 8453
            confirmation_blocks = 2
            max_gas_price_gwei = 200
            native_symbol = "ETH"

            [[pools]]
            id = "pool-a"
            network_id = "polygon"
            address = "0x0000000000000000000000000000000000000001"
            token0 = "CQT"
            token1 = "WETH"
            fee_tier_bps = 30

            [[pools]]
            id = "pool-b"
            network_id = "{pool_b_network}"
            address = "0x0000000000000000000000000000000000000002"
            token0 = "CQT"
            token1 = "WETH"
            fee_tier_bps = 30

            [security]
            max_consecutive_failures = {max_failures}

            [cross_chain.bridge_contracts]
            polygon = "0x00000000000000000000000000000000000000aa"
            base = "0x00000000000000000000000000000000000000bb"
        "#
        );
        let config: Arc<EngineConfig> = Arc::new(toml::from_str(&toml).unwrap());
        config.validate().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let ledger_path = dir.path().join("ledger.jsonl");
        let (ledger, _) = Ledger::open(&ledger_path).unwrap();
        let ledger = Arc::new(ledger);

        let polygon = Arc::new(MockGateway::new(NetworkId::new("polygon")));
        let base = Arc::new(MockGateway::new(NetworkId::new("base")));
        set_pool_states(&polygon, &base, pool_b_network);

        let mut gateways: HashMap<NetworkId, Arc<dyn ChainGateway>> = HashMap::new();
        gateways.insert(NetworkId::new("polygon"), polygon.clone());
        gateways.insert(NetworkId::new("base"), base.clone());

        let adapter = Arc::new(MockBridgeAdapter::new(NetworkId::new("base")));
        let mut adapters: HashMap<NetworkId, Arc<dyn BridgeAdapter>> = HashMap::new();
        adapters.insert(NetworkId::new("base"), adapter.clone());
        let mut polls = HashMap::new();
        polls.insert(NetworkId::new("base"), Duration::from_secs(4));
        let (credit_tx, credit_rx) = mpsc::unbounded_channel();
        let coordinator = Arc::new(BridgeCoordinator::new(
            adapters,
            polls,
            Duration::from_secs(600),
            ledger.clone(),
            credit_tx,
        ));

        let slots = Arc::new(SlotManager::new());
        let (profit_tx, profit_rx) = mpsc::unbounded_channel();
        let executor = Arc::new(Executor::new(
            config,
            gateways,
            ledger,
            coordinator.clone(),
            slots.clone(),
            Arc::new(AtomicBool::new(false)),
            profit_tx,
            1,
            1,
        ));

        Harness {
            executor,
            polygon,
            base,
            adapter,
            coordinator,
            slots,
            profit_rx,
            _credit_rx: credit_rx,
            ledger_path,
            _dir: dir,
        }
    }

    fn set_pool_states(polygon: &MockGateway, base: &MockGateway, pool_b_network: &str) {
        use types::{Address, PoolObservation, RawPrice};
        let pool_a = PoolObservation {
            raw_price: RawPrice::Reserves { reserve0: dec!(10000), reserve1: dec!(20000) },
            liquidity: dec!(10000),
            block_number: 1,
        };
        let pool_b = PoolObservation {
            raw_price: RawPrice::Reserves { reserve0: dec!(10500), reserve1: dec!(19000) },
            liquidity: dec!(10500),
            block_number: 1,
        };
        polygon.set_pool(Address([1; 20]), pool_a);
        if pool_b_network == "base" {
            base.set_pool(Address([2; 20]), pool_b);
        } else {
            polygon.set_pool(Address([2; 20]), pool_b);
        }
    }

    fn opportunity(id: u64, source: &str, target: &str, cross: bool) -> Opportunity {
        Opportunity {
            id: OpportunityId(id),
            pair: PoolPair::new(PoolId::new(source), PoolId::new(target)),
            source_network: NetworkId::new("polygon"),
            target_network: NetworkId::new(if cross { "base" } else { "polygon" }),
            direction_token: "CQT".to_string(),
            gross_edge_bps: dec!(450),
            trade_size: dec!(200),
            // Comfortably below the fresh quote of ~391 for pool-a
            paired_amount: dec!(380),
            est_gas_cost: dec!(0.02),
            est_bridge_cost: if cross { dec!(5) } else { dec!(0) },
            net_profit: dec!(9),
            confidence: dec!(0.9),
            detected_at_ns: 0,
            status: OpportunityStatus::Admitted,
        }
    }

    async fn replay(harness: Harness) -> ledger::ReplayState {
        let path = harness.ledger_path.clone();
        drop(harness);
        let (_, state) = Ledger::open(path).unwrap();
        state
    }

    #[tokio::test(start_paused = true)]
    async fn intra_network_happy_path_completes_and_allocates_profit() {
        let mut harness = harness("polygon", 5);
        harness.polygon.script_token_deltas([dec!(-200), dec!(215)]);

        let execution = harness
            .executor
            .execute(opportunity(1, "pool-a", "pool-b", false))
            .await
            .unwrap();

        assert_eq!(execution.state, ExecutionState::Completed);
        assert_eq!(execution.outcome, Some(ExecutionOutcome::Success));
        assert_eq!(execution.realized_profit, Some(dec!(15)));
        assert_eq!(execution.legs.len(), 2);
        assert!(execution.legs.iter().all(|leg| leg.tx_hash.is_some()));

        let profit = harness.profit_rx.recv().await.unwrap();
        assert_eq!(profit.realized_profit, dec!(15));
        assert_eq!(profit.pair, execution.pair);

        // Slot released; in-flight back to zero.
        assert_eq!(harness.executor.in_flight(), 0);

        let state = replay(harness).await;
        assert!(state.open_executions.is_empty());
        assert_eq!(state.completed_profits.len(), 1);
        assert_eq!(state.completed_profits[0].1, dec!(15));
    }

    #[tokio::test(start_paused = true)]
    async fn reverted_leg_fails_without_submitting_remaining_legs() {
        let harness = harness("polygon", 5);
        harness.polygon.revert_next();

        let execution = harness
            .executor
            .execute(opportunity(1, "pool-a", "pool-b", false))
            .await
            .unwrap();

        assert_eq!(execution.state, ExecutionState::Failed);
        assert_eq!(execution.outcome, Some(ExecutionOutcome::Reverted));
        // Only the first leg ever reached the chain.
        assert_eq!(harness.polygon.submitted_requests().len(), 1);
        assert_eq!(harness.executor.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn held_slot_supersedes_new_claimant() {
        let harness = harness("polygon", 5);
        let pair = PoolPair::new(PoolId::new("pool-a"), PoolId::new("pool-b"));
        harness.slots.restore(pair, ExecutionId(99));

        let execution = harness
            .executor
            .execute(opportunity(1, "pool-a", "pool-b", false))
            .await
            .unwrap();
        assert_eq!(execution.state, ExecutionState::Superseded);
        assert_eq!(execution.outcome, Some(ExecutionOutcome::Superseded));
        assert!(harness.polygon.submitted_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_concurrency_budget_supersedes() {
        let harness = harness("polygon", 5);
        // Hold every permit (default cap 3).
        let _permits = [
            harness.executor.grab_permit(),
            harness.executor.grab_permit(),
            harness.executor.grab_permit(),
        ];

        let execution = harness
            .executor
            .execute(opportunity(1, "pool-a", "pool-b", false))
            .await
            .unwrap();
        assert_eq!(execution.state, ExecutionState::Superseded);
        assert!(harness.polygon.submitted_requests().is_empty());
        // The slot was released for the next cycle.
        assert_eq!(harness.executor.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gas_drift_aborts_before_submission() {
        let harness = harness("polygon", 5);
        // Detection estimated 0.02 CQT; 100 gwei pushes the live cost to
        // 0.06, past the 1.2x ceiling.
        harness.polygon.set_gas_price_gwei(100);

        let execution = harness
            .executor
            .execute(opportunity(1, "pool-a", "pool-b", false))
            .await
            .unwrap();
        assert_eq!(execution.state, ExecutionState::Failed);
        assert_eq!(execution.outcome, Some(ExecutionOutcome::GasDrift));
        assert!(harness.polygon.submitted_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slippage_preflight_aborts_without_chain_footprint() {
        let harness = harness("polygon", 5);
        // The source pool moved against us after detection.
        harness.polygon.set_pool(
            types::Address([1; 20]),
            types::PoolObservation {
                raw_price: types::RawPrice::Reserves {
                    reserve0: dec!(10000),
                    reserve1: dec!(15000),
                },
                liquidity: dec!(10000),
                block_number: 2,
            },
        );

        let execution = harness
            .executor
            .execute(opportunity(1, "pool-a", "pool-b", false))
            .await
            .unwrap();
        assert_eq!(execution.outcome, Some(ExecutionOutcome::SlippageExceeded));
        assert!(harness.polygon.submitted_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_failures_trip_the_emergency_stop() {
        let harness = harness("polygon", 2);

        harness.polygon.revert_next();
        harness
            .executor
            .execute(opportunity(1, "pool-a", "pool-b", false))
            .await
            .unwrap();
        assert!(!harness.executor.emergency_stopped());

        harness.polygon.revert_next();
        harness
            .executor
            .execute(opportunity(2, "pool-b", "pool-a", false))
            .await
            .unwrap();
        assert!(harness.executor.emergency_stopped());

        // Post-stop work never reaches the chain.
        let before = harness.polygon.submitted_requests().len();
        let execution = harness
            .executor
            .execute(opportunity(3, "pool-a", "pool-b", false))
            .await
            .unwrap();
        assert_eq!(execution.state, ExecutionState::Superseded);
        assert_eq!(harness.polygon.submitted_requests().len(), before);

        let state = replay(harness).await;
        assert!(state.emergency_stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn cross_chain_bridge_success_completes() {
        let mut harness = harness("base", 5);
        harness.adapter.deliver_everything(TxHash([0xbb; 32]));
        harness.polygon.script_token_deltas([dec!(-5000)]);
        harness.base.script_token_deltas([dec!(5150)]);

        let mut opportunity = opportunity(1, "pool-a", "pool-b", true);
        opportunity.trade_size = dec!(200);
        opportunity.paired_amount = dec!(380);

        let execution = harness.executor.execute(opportunity).await.unwrap();
        assert_eq!(execution.state, ExecutionState::Completed);
        assert_eq!(execution.legs.len(), 3);
        assert_eq!(execution.realized_profit, Some(dec!(150)));

        // One swap + one bridge deposit on polygon, one swap on base.
        assert_eq!(harness.polygon.submitted_requests().len(), 2);
        assert_eq!(harness.base.submitted_requests().len(), 1);

        let profit = harness.profit_rx.recv().await.unwrap();
        assert_eq!(profit.realized_profit, dec!(150));
    }

    #[tokio::test(start_paused = true)]
    async fn cross_chain_bridge_timeout_strands_the_asset() {
        let harness = harness("base", 5);
        // No delivery is ever scripted: the bridge stalls.

        let execution = harness
            .executor
            .execute(opportunity(1, "pool-a", "pool-b", true))
            .await
            .unwrap();

        assert_eq!(execution.state, ExecutionState::Failed);
        assert_eq!(execution.outcome, Some(ExecutionOutcome::BridgeTimeout));
        // The target swap never happened; no compensating trade either.
        assert!(harness.base.submitted_requests().is_empty());
        assert_eq!(harness.coordinator.reclaim_count(), 1);

        let state = replay(harness).await;
        assert!(state.open_executions.is_empty());
        assert_eq!(state.reclaim_transfers.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_pool_drains_queue_and_stops() {
        let mut harness = harness("polygon", 5);
        harness.polygon.script_token_deltas([dec!(-200), dec!(215)]);
        let (queue_tx, queue_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = harness.executor.clone().spawn_workers(queue_rx, shutdown_rx);
        queue_tx
            .send(opportunity(1, "pool-a", "pool-b", false))
            .await
            .unwrap();

        let profit = harness.profit_rx.recv().await.unwrap();
        assert_eq!(profit.realized_profit, dec!(15));

        shutdown_tx.send(true).unwrap();
        worker.await.unwrap();
    }
}
