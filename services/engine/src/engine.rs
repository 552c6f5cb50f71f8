//! Engine assembly and lifecycle.
//!
//! Components are constructed leaves-first, state is replayed from the
//! ledger before anything touches a network, and shutdown drains in the
//! documented order: detector → executor → bridge coordinator → ledger →
//! monitors and auxiliary tasks.

use arb_strategy::{OpportunityDetector, PricePredictor, RiskFilter};
use chain_gateway::{spawn_health_probe, ChainGateway};
use config::EngineConfig;
use execution_engine::bridge::{BridgeAdapter, BridgeCoordinator};
use execution_engine::{Executor, SlotManager};
use ledger::{Ledger, LedgerError, OpenExecution, ReplayState};
use parking_lot::Mutex;
use pool_monitor::{spawn_pool_monitor, PriceOracle};
use reserve_manager::ReserveManager;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::{
    time, EventKind, ExecutionOutcome, NetworkHealth, NetworkId, NetworkStatus, Opportunity,
    PoolId,
};

use crate::control::{ControlCommand, ControlHandle, StatusSnapshot};

/// Fully constructed but not yet running engine.
pub struct Engine {
    pub config: Arc<EngineConfig>,
    pub ledger: Arc<Ledger>,
    pub replay: ReplayState,
    pub gateways: HashMap<NetworkId, Arc<dyn ChainGateway>>,
    pub adapters: HashMap<NetworkId, Arc<dyn BridgeAdapter>>,
    pub predictor: Arc<dyn PricePredictor>,
}

/// Running engine: control surface plus the shutdown choreography.
pub struct EngineHandle {
    pub control: ControlHandle,
    coordinator: Arc<BridgeCoordinator>,
    drain: Duration,
    detector_stop: watch::Sender<bool>,
    executor_stop: watch::Sender<bool>,
    services_stop: watch::Sender<bool>,
    detection_task: Option<JoinHandle<()>>,
    worker_task: Option<JoinHandle<()>>,
    service_tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    pub fn new(
        config: Arc<EngineConfig>,
        ledger: Arc<Ledger>,
        replay: ReplayState,
        gateways: HashMap<NetworkId, Arc<dyn ChainGateway>>,
        adapters: HashMap<NetworkId, Arc<dyn BridgeAdapter>>,
        predictor: Arc<dyn PricePredictor>,
    ) -> Self {
        Self { config, ledger, replay, gateways, adapters, predictor }
    }

    /// Wire everything and start the task tree.
    pub async fn start(self) -> Result<EngineHandle, LedgerError> {
        let Engine { config, ledger, replay, gateways, adapters, predictor } = self;

        let (detector_stop, detector_stop_rx) = watch::channel(false);
        let (executor_stop, executor_stop_rx) = watch::channel(false);
        let (services_stop, services_stop_rx) = watch::channel(false);

        let oracle = Arc::new(PriceOracle::new(config.arbitrage.stale_threshold_ms));
        let (updates_tx, updates_rx) = mpsc::channel::<PoolId>(64);
        let queue_capacity = config.arbitrage.max_concurrent_arbitrages * 2;
        let (queue_tx, queue_rx) = mpsc::channel::<Opportunity>(queue_capacity);
        let (profit_tx, profit_rx) = mpsc::unbounded_channel();
        let (credit_tx, credit_rx) = mpsc::unbounded_channel();
        let (health_tx, mut health_rx) = mpsc::unbounded_channel();
        let (control_tx, mut control_rx) = mpsc::channel::<ControlCommand>(16);

        // Bridge coordination, polled at twice the target's block time.
        let poll_intervals = config
            .networks
            .iter()
            .map(|(id, network)| {
                (
                    NetworkId::new(id.clone()),
                    Duration::from_secs((network.block_time_secs * 2).max(1)),
                )
            })
            .collect();
        let coordinator = Arc::new(BridgeCoordinator::new(
            adapters,
            poll_intervals,
            Duration::from_secs(config.cross_chain.confirmation_timeout_secs),
            ledger.clone(),
            credit_tx,
        ));

        let slots = Arc::new(SlotManager::new());
        let emergency_stop = Arc::new(AtomicBool::new(replay.emergency_stopped));
        let executor = Arc::new(Executor::new(
            config.clone(),
            gateways.clone(),
            ledger.clone(),
            coordinator.clone(),
            slots,
            emergency_stop,
            profit_tx,
            replay.max_execution_id + 1,
            replay.max_transfer_id + 1,
        ));
        executor.restore(
            replay.cooldowns.clone().into_iter().collect(),
            replay.completed_profits.clone(),
        );

        // Non-terminal executions must be reconciled against chain state
        // before anything else runs.
        reconcile_open_executions(&replay, &config, &gateways, &ledger).await?;

        // Transfers still in flight resume tracking; timed-out ones return
        // to the reclaim queue.
        let mut service_tasks: Vec<JoinHandle<()>> = Vec::new();
        for transfer in replay.open_transfers.values() {
            let coordinator = coordinator.clone();
            let transfer = transfer.clone();
            let credit_pool = credit_pool_for(&config, &transfer.target_network);
            service_tasks.push(tokio::spawn(async move {
                if let Err(e) = coordinator.track(transfer, credit_pool, true).await {
                    warn!(error = %e, "resumed bridge tracking failed");
                }
            }));
        }
        for transfer in replay.reclaim_transfers.values() {
            let credit_pool = credit_pool_for(&config, &transfer.target_network);
            coordinator.restore_reclaim(transfer.clone(), credit_pool);
        }

        let reserve = Arc::new(ReserveManager::new(
            config.clone(),
            gateways.clone(),
            oracle.clone(),
            ledger.clone(),
        ));
        reserve.restore(
            replay.reserve_balances.clone().into_iter().collect(),
            replay.last_injection_ns.clone().into_iter().collect(),
        );

        let detector = Arc::new(OpportunityDetector::new(
            config.clone(),
            oracle.clone(),
            gateways.clone(),
            predictor,
            replay.max_opportunity_id + 1,
        ));
        let filter = RiskFilter::standard(&config);

        // One monitor task per enabled pool.
        for pool in config.enabled_pools() {
            let Some(gateway) = gateways.get(&pool.network_id) else {
                warn!(pool = %pool.id, "no gateway for pool network; not monitoring");
                continue;
            };
            let interval = Duration::from_secs(
                pool.poll_interval_secs
                    .unwrap_or(config.arbitrage.monitoring_interval_secs),
            );
            let handle = spawn_pool_monitor(
                pool.clone(),
                interval,
                gateway.clone(),
                oracle.clone(),
                ledger.clone(),
                updates_tx.clone(),
                services_stop_rx.clone(),
            );
            service_tasks.push(handle.task);
        }
        drop(updates_tx);

        // Per-network health probes plus the transition ledger task.
        for gateway in gateways.values() {
            let interval = Duration::from_secs(probe_interval_secs(&config, gateway.network()));
            service_tasks.push(spawn_health_probe(
                gateway.clone(),
                interval,
                health_tx.clone(),
                services_stop_rx.clone(),
            ));
        }
        drop(health_tx);
        {
            let ledger = ledger.clone();
            service_tasks.push(tokio::spawn(async move {
                while let Some((network, health)) = health_rx.recv().await {
                    let event = match health {
                        NetworkHealth::Degraded => EventKind::HealthDegraded { network },
                        NetworkHealth::Healthy => EventKind::HealthRestored { network },
                    };
                    if let Err(e) = ledger.append(event) {
                        warn!(error = %e, "failed to ledger health transition");
                    }
                }
            }));
        }

        let auto_execute = Arc::new(AtomicBool::new(true));
        let latest_opportunities = Arc::new(Mutex::new(Vec::<Opportunity>::new()));

        // Detection loop: timer plus oracle-update nudges.
        let detection_task = {
            let config = config.clone();
            let detector = detector.clone();
            let executor = executor.clone();
            let gateways = gateways.clone();
            let ledger = ledger.clone();
            let auto_execute = auto_execute.clone();
            let latest = latest_opportunities.clone();
            let mut stop = detector_stop_rx;
            let mut updates = updates_rx;
            tokio::spawn(async move {
                let interval = Duration::from_secs(config.arbitrage.detection_interval_secs);
                loop {
                    tokio::select! {
                        _ = stop.changed() => {
                            if *stop.borrow() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(interval) => {}
                        update = updates.recv() => {
                            if update.is_none() {
                                break;
                            }
                        }
                    }

                    let now_ns = time::now_ns();
                    let candidates = detector.detect_cycle(now_ns).await;
                    if candidates.is_empty() {
                        continue;
                    }
                    for opportunity in &candidates {
                        if let Err(e) = ledger.append(EventKind::OpportunityDetected {
                            opportunity: opportunity.clone(),
                        }) {
                            warn!(error = %e, "failed to ledger opportunity");
                        }
                    }
                    *latest.lock() = candidates.clone();

                    if !auto_execute.load(Ordering::SeqCst) {
                        continue;
                    }

                    let gas = gather_gas_gwei(&gateways).await;
                    let cooldowns = executor.cooldowns();
                    let (admitted, rejected) = filter.admit_batch(
                        candidates,
                        now_ns,
                        &gas,
                        &cooldowns,
                        executor.in_flight(),
                        executor.daily_loss(now_ns),
                        executor.emergency_stopped(),
                    );
                    for (opportunity, rule, reason) in &rejected {
                        debug!(
                            opportunity = %opportunity.id,
                            rule,
                            reason,
                            "opportunity rejected"
                        );
                    }
                    for opportunity in admitted {
                        if queue_tx.try_send(opportunity).is_err() {
                            // Bounded queue full: backpressure, next cycle
                            // re-detects anything still worth doing.
                            break;
                        }
                    }
                }
                debug!("detection loop stopped");
            })
        };

        let worker_task = executor.clone().spawn_workers(queue_rx, executor_stop_rx);

        service_tasks.push(reserve.clone().spawn_timer(services_stop_rx.clone()));
        service_tasks.push(reserve.clone().spawn_allocator(
            profit_rx,
            credit_rx,
            services_stop_rx.clone(),
        ));
        service_tasks.push(coordinator.clone().spawn_reclaim_worker(
            Duration::from_secs((config.cross_chain.confirmation_timeout_secs / 4).max(1)),
            services_stop_rx.clone(),
        ));

        // Control surface loop.
        {
            let config = config.clone();
            let oracle = oracle.clone();
            let executor = executor.clone();
            let reserve = reserve.clone();
            let coordinator = coordinator.clone();
            let ledger = ledger.clone();
            let gateways = gateways.clone();
            let auto_execute = auto_execute.clone();
            let latest = latest_opportunities.clone();
            let mut stop = services_stop_rx;
            service_tasks.push(tokio::spawn(async move {
                loop {
                    let command = tokio::select! {
                        _ = stop.changed() => {
                            if *stop.borrow() {
                                return;
                            }
                            continue;
                        }
                        command = control_rx.recv() => {
                            let Some(command) = command else { return };
                            command
                        }
                    };

                    match command {
                        ControlCommand::Status { reply } => {
                            let now_ns = time::now_ns();
                            let networks = gateways
                                .values()
                                .map(|gateway| NetworkStatus {
                                    network: gateway.network().clone(),
                                    health: gateway.health(),
                                })
                                .collect();
                            let fresh = config
                                .enabled_pools()
                                .filter(|pool| oracle.fresh(&pool.id, now_ns).is_some())
                                .count();
                            let _ = reply.send(StatusSnapshot {
                                networks,
                                monitored_pools: config.enabled_pools().count(),
                                fresh_pools: fresh,
                                in_flight_executions: executor.in_flight(),
                                open_bridge_transfers: coordinator.open_count(),
                                reclaim_queue_depth: coordinator.reclaim_count(),
                                reserves: reserve.entries(),
                                daily_loss: executor.daily_loss(now_ns),
                                emergency_stopped: executor.emergency_stopped(),
                                auto_execute: auto_execute.load(Ordering::SeqCst),
                                ledger_next_seq: ledger.next_seq(),
                            });
                        }
                        ControlCommand::ListOpportunities { reply } => {
                            let _ = reply.send(latest.lock().clone());
                        }
                        ControlCommand::ListExecutions { reply } => {
                            let _ = reply.send(executor.recent_executions());
                        }
                        ControlCommand::EmergencyStop { reason } => {
                            if let Err(e) = executor.engage_emergency_stop(&reason) {
                                warn!(error = %e, "failed to engage emergency stop");
                            }
                        }
                        ControlCommand::TriggerInjection => {
                            if let Err(e) = reserve.injection_tick(time::now_ns()).await {
                                warn!(error = %e, "manual injection failed");
                            }
                        }
                        ControlCommand::SetAutoExecute { enabled } => {
                            info!(enabled, "auto-execution toggled");
                            auto_execute.store(enabled, Ordering::SeqCst);
                        }
                    }
                }
            }));
        }

        info!(
            pools = config.enabled_pools().count(),
            networks = gateways.len(),
            replayed_events = replay.last_seq,
            "engine started"
        );

        Ok(EngineHandle {
            control: ControlHandle::new(control_tx),
            coordinator,
            drain: Duration::from_secs(config.engine.shutdown_drain_secs),
            detector_stop,
            executor_stop,
            services_stop,
            detection_task: Some(detection_task),
            worker_task: Some(worker_task),
            service_tasks,
        })
    }
}

impl EngineHandle {
    /// Drain and stop: detector → executor → bridge coordinator → ledger →
    /// monitors and auxiliary tasks.
    pub async fn shutdown(mut self) {
        info!("engine shutting down");

        let _ = self.detector_stop.send(true);
        if let Some(task) = self.detection_task.take() {
            let _ = task.await;
        }

        let _ = self.executor_stop.send(true);
        if let Some(task) = self.worker_task.take() {
            if tokio::time::timeout(self.drain, task).await.is_err() {
                warn!("executor drain exceeded the grace period; abandoning in-flight work");
            }
        }

        // Give open bridge transfers a generous chance to resolve.
        let deadline = tokio::time::Instant::now() + self.drain;
        while self.coordinator.open_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        if self.coordinator.open_count() > 0 {
            warn!(
                open = self.coordinator.open_count(),
                "bridge transfers still open at shutdown; they will be reconciled on restart"
            );
        }

        // Ledger appends are fsync'd; nothing to flush.

        let _ = self.services_stop.send(true);
        for task in self.service_tasks.drain(..) {
            let _ = task.await;
        }
        info!("engine stopped");
    }
}

/// Close out executions that were open in the ledger at restart.
///
/// Policy: an execution whose every submitted leg confirmed successfully is
/// recorded `Completed` (profit from receipts where derivable); anything
/// else is closed `Failed`; the engine never resumes a half-done arbitrage.
async fn reconcile_open_executions(
    replay: &ReplayState,
    config: &EngineConfig,
    gateways: &HashMap<NetworkId, Arc<dyn ChainGateway>>,
    ledger: &Ledger,
) -> Result<(), LedgerError> {
    for open in replay.open_executions.values() {
        let outcome = reconcile_one(open, config, gateways).await;
        match outcome {
            Ok(realized_profit) => {
                info!(
                    execution = %open.execution_id,
                    profit = %realized_profit,
                    "restart reconciliation: all legs confirmed"
                );
                ledger.append(EventKind::ExecutionCompleted {
                    execution_id: open.execution_id,
                    pair: open.pair.clone(),
                    realized_profit,
                })?;
            }
            Err(reason) => {
                warn!(
                    execution = %open.execution_id,
                    %reason,
                    "restart reconciliation: closing execution as failed"
                );
                ledger.append(EventKind::ExecutionFailed {
                    execution_id: open.execution_id,
                    pair: open.pair.clone(),
                    outcome: ExecutionOutcome::RpcFailure,
                    reason,
                })?;
            }
        }
    }
    Ok(())
}

async fn reconcile_one(
    open: &OpenExecution,
    config: &EngineConfig,
    gateways: &HashMap<NetworkId, Arc<dyn ChainGateway>>,
) -> Result<Decimal, String> {
    if open.submitted_legs.is_empty() {
        return Err("no legs were submitted before restart".to_string());
    }
    if open.submitted_legs.len() < 2 {
        return Err("execution was interrupted mid-submission".to_string());
    }

    let mut realized = Decimal::ZERO;
    for (index, network, tx_hash) in &open.submitted_legs {
        let Some(gateway) = gateways.get(network) else {
            return Err(format!("no gateway for network {network}"));
        };
        let depth = config
            .network(network)
            .map(|n| n.confirmation_blocks)
            .unwrap_or(1);
        match gateway.await_confirmation(*tx_hash, depth).await {
            Ok(receipt) if receipt.success => {
                realized += receipt.token_delta.unwrap_or(Decimal::ZERO);
            }
            Ok(_) => return Err(format!("leg {index} reverted")),
            Err(e) => return Err(format!("leg {index} unresolved: {e}")),
        }
    }
    Ok(realized)
}

/// Reserve destination for assets reclaimed on a network: the first enabled
/// pool there.
fn credit_pool_for(config: &EngineConfig, network: &NetworkId) -> PoolId {
    config
        .enabled_pools()
        .find(|pool| &pool.network_id == network)
        .map(|pool| pool.id.clone())
        .unwrap_or_else(|| PoolId::new(format!("{network}-unattributed")))
}

fn probe_interval_secs(config: &EngineConfig, network: &NetworkId) -> u64 {
    config
        .network(network)
        .map(|n| (n.block_time_secs * 5).max(5))
        .unwrap_or(10)
}

async fn gather_gas_gwei(
    gateways: &HashMap<NetworkId, Arc<dyn ChainGateway>>,
) -> HashMap<NetworkId, Decimal> {
    let mut gas = HashMap::new();
    for (network, gateway) in gateways {
        if let Ok(price_wei) = gateway.gas_price_wei().await {
            let wei = price_wei.min(u64::MAX as u128) as u64;
            gas.insert(
                network.clone(),
                Decimal::from(wei) / Decimal::from(1_000_000_000u64),
            );
        }
    }
    gas
}
