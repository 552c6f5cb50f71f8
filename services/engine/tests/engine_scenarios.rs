//! End-to-end scenarios against deterministic in-memory gateways and bridge
//! adapters.
//!
//! The full task tree runs under paused time: monitors poll mock chains,
//! the detector finds the seeded dislocation, the risk filter admits it,
//! the executor trades it (bridging through a `MockBridgeAdapter` for the
//! cross-network cases), and the reserve manager collects the profit share.
//! Pool state is seeded only once the rig is in the intended mode, so the
//! scenarios are deterministic on a current-thread runtime.

use arb_strategy::ConstantPredictor;
use chain_gateway::{ChainGateway, MockGateway};
use config::EngineConfig;
use cqt_engine::engine::Engine;
use cqt_engine::{ControlHandle, EngineHandle};
use execution_engine::bridge::{BridgeAdapter, MockBridgeAdapter};
use ledger::Ledger;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use types::{
    Address, EventKind, ExecutionOutcome, ExecutionState, NetworkId, PoolObservation, PoolPair,
    RawPrice, TxHash,
};

struct TestRig {
    handle: Option<EngineHandle>,
    control: ControlHandle,
    polygon: Arc<MockGateway>,
    base: Arc<MockGateway>,
    adapter: Arc<MockBridgeAdapter>,
    ledger_path: PathBuf,
    _dir: tempfile::TempDir,
}

fn engine_config(min_reserve_balance: Decimal) -> EngineConfig {
    let toml = format!(
        r#"
        [networks.polygon]
        rpc_url = "http://localhost"
        chain_id = 137
        confirmation_blocks = 2
        max_gas_price_gwei = 100
        native_symbol = "MATIC"

        [[pools]]
        id = "pool-a"
        network_id = "polygon"
        address = "0x0000000000000000000000000000000000000001"
        token0 = "CQT"
        token1 = "WETH"
        fee_tier_bps = 30

        [[pools]]
        id = "pool-b"
        network_id = "polygon"
        address = "0x0000000000000000000000000000000000000002"
        token0 = "CQT"
        token1 = "WETH"
        fee_tier_bps = 30

        [blp]
        min_reserve_balance = {min_reserve_balance}
    "#
    );
    let config: EngineConfig = toml::from_str(&toml).unwrap();
    config.validate().unwrap();
    config
}

/// pool-a on polygon, pool-b on base, bridged. A short confirmation budget
/// keeps the timeout scenario's simulated clock manageable.
fn cross_config() -> EngineConfig {
    let toml = r#"
        [networks.polygon]
        rpc_url = "http://localhost"
        chain_id = 137
        confirmation_blocks = 2
        max_gas_price_gwei = 100
        native_symbol = "MATIC"

        [networks.base]
        rpc_url = "http://localhost"
        chain_id = 8453
        confirmation_blocks = 2
        max_gas_price_gwei = 100
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
        network_id = "base"
        address = "0x0000000000000000000000000000000000000002"
        token0 = "CQT"
        token1 = "WETH"
        fee_tier_bps = 30

        [cross_chain]
        confirmation_timeout_secs = 120

        [cross_chain.bridge_contracts]
        polygon = "0x00000000000000000000000000000000000000aa"
        base = "0x00000000000000000000000000000000000000bb"
    "#;
    let config: EngineConfig = toml::from_str(toml).unwrap();
    config.validate().unwrap();
    config
}

/// Three polygon pools at staggered prices with a concurrency cap of two.
fn three_pool_config() -> EngineConfig {
    let toml = r#"
        [networks.polygon]
        rpc_url = "http://localhost"
        chain_id = 137
        confirmation_blocks = 2
        max_gas_price_gwei = 100
        native_symbol = "MATIC"

        [[pools]]
        id = "pool-a"
        network_id = "polygon"
        address = "0x0000000000000000000000000000000000000001"
        token0 = "CQT"
        token1 = "WETH"
        fee_tier_bps = 30

        [[pools]]
        id = "pool-b"
        network_id = "polygon"
        address = "0x0000000000000000000000000000000000000002"
        token0 = "CQT"
        token1 = "WETH"
        fee_tier_bps = 30

        [[pools]]
        id = "pool-c"
        network_id = "polygon"
        address = "0x0000000000000000000000000000000000000003"
        token0 = "CQT"
        token1 = "WETH"
        fee_tier_bps = 30

        [arbitrage]
        max_concurrent_arbitrages = 2
    "#;
    let config: EngineConfig = toml::from_str(toml).unwrap();
    config.validate().unwrap();
    config
}

async fn start_rig(config: EngineConfig) -> TestRig {
    start_rig_in(config, tempfile::tempdir().unwrap()).await
}

/// Start against an existing directory so tests can pre-seed the ledger.
async fn start_rig_in(config: EngineConfig, dir: tempfile::TempDir) -> TestRig {
    let ledger_path = dir.path().join("ledger.jsonl");
    let (ledger, replay) = Ledger::open(&ledger_path).unwrap();

    let polygon = Arc::new(MockGateway::new(NetworkId::new("polygon")));
    let base = Arc::new(MockGateway::new(NetworkId::new("base")));

    let mut gateways: HashMap<NetworkId, Arc<dyn ChainGateway>> = HashMap::new();
    for id in config.networks.keys() {
        let gateway: Arc<MockGateway> = match id.as_str() {
            "base" => base.clone(),
            _ => polygon.clone(),
        };
        gateways.insert(NetworkId::new(id.clone()), gateway);
    }

    let adapter = Arc::new(MockBridgeAdapter::new(NetworkId::new("base")));
    let mut adapters: HashMap<NetworkId, Arc<dyn BridgeAdapter>> = HashMap::new();
    adapters.insert(NetworkId::new("base"), adapter.clone());

    let engine = Engine::new(
        Arc::new(config),
        Arc::new(ledger),
        replay,
        gateways,
        adapters,
        Arc::new(ConstantPredictor::default()),
    );
    let handle = engine.start().await.unwrap();
    let control = handle.control.clone();

    TestRig {
        handle: Some(handle),
        control,
        polygon,
        base,
        adapter,
        ledger_path,
        _dir: dir,
    }
}

fn observation(cqt: Decimal, paired: Decimal) -> PoolObservation {
    PoolObservation {
        raw_price: RawPrice::Reserves { reserve0: cqt, reserve1: paired },
        liquidity: cqt,
        block_number: 1,
    }
}

impl TestRig {
    /// Pool A prices CQT at 2.0 WETH, pool B at ~1.81: a ~5% dislocation.
    fn seed_dislocation(&self) {
        self.polygon.set_pool(Address([1; 20]), observation(dec!(10000), dec!(20000)));
        self.polygon.set_pool(Address([2; 20]), observation(dec!(10500), dec!(19000)));
    }

    /// Same dislocation, but pool B lives on the base network.
    fn seed_cross_dislocation(&self) {
        self.polygon.set_pool(Address([1; 20]), observation(dec!(10000), dec!(20000)));
        self.base.set_pool(Address([2; 20]), observation(dec!(10500), dec!(19000)));
    }

    /// Three pools at 2.0 / 1.9 / ~1.81: three profitable ordered pairs.
    fn seed_three_way_dislocation(&self) {
        self.polygon.set_pool(Address([1; 20]), observation(dec!(10000), dec!(20000)));
        self.polygon.set_pool(Address([2; 20]), observation(dec!(10250), dec!(19475)));
        self.polygon.set_pool(Address([3; 20]), observation(dec!(10500), dec!(19005)));
    }

    async fn executions(&self) -> Vec<types::Execution> {
        self.control.list_executions().await.unwrap_or_default()
    }

    async fn completed_executions(&self) -> Vec<types::Execution> {
        self.executions()
            .await
            .into_iter()
            .filter(|e| e.state == ExecutionState::Completed)
            .collect()
    }

    /// Advance simulated time until the predicate holds or the budget runs out.
    async fn wait_for<F>(&self, seconds: u64, mut predicate: F) -> bool
    where
        F: FnMut(&Vec<types::Execution>) -> bool,
    {
        for _ in 0..seconds {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let executions = self.executions().await;
            if predicate(&executions) {
                return true;
            }
        }
        false
    }

    async fn stop(mut self) -> PathBuf {
        self.handle.take().unwrap().shutdown().await;
        self.ledger_path.clone()
    }
}

#[tokio::test(start_paused = true)]
async fn dislocation_is_detected_executed_and_profit_recycled() {
    let rig = start_rig(engine_config(dec!(1000))).await;
    rig.polygon.script_token_deltas([dec!(-240), dec!(255)]);
    rig.seed_dislocation();

    let done = rig
        .wait_for(30, |executions| {
            executions.iter().any(|e| e.state == ExecutionState::Completed)
        })
        .await;
    assert!(done, "no execution completed within the window");

    let completed = rig.completed_executions().await;
    assert_eq!(completed.len(), 1);
    let execution = &completed[0];
    assert_eq!(execution.realized_profit, Some(dec!(15)));
    assert_eq!(execution.pair.source.as_str(), "pool-a");
    assert_eq!(execution.pair.target.as_str(), "pool-b");

    // Allow the allocator to process the profit message, then check that
    // 20% of the profit landed in the reserves, split evenly.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let status = rig.control.status().await.unwrap();
    let reserve_total: Decimal = status.reserves.iter().map(|r| r.balance).sum();
    assert_eq!(reserve_total, dec!(3));
    assert!(status.reserves.iter().all(|r| r.balance == dec!(1.5)));

    // The detected opportunity is visible on the control surface.
    let opportunities = rig.control.list_opportunities().await.unwrap();
    assert!(!opportunities.is_empty());
    assert!(opportunities[0].net_profit > Decimal::ZERO);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cross_chain_arbitrage_bridges_and_completes() {
    let rig = start_rig(cross_config()).await;
    rig.adapter.deliver_everything(TxHash([0xbb; 32]));
    rig.polygon.script_token_deltas([dec!(-240)]);
    rig.base.script_token_deltas([dec!(255)]);
    rig.seed_cross_dislocation();

    let done = rig
        .wait_for(30, |executions| {
            executions.iter().any(|e| e.state == ExecutionState::Completed)
        })
        .await;
    assert!(done, "cross-chain execution did not complete");

    let completed = rig.completed_executions().await;
    assert_eq!(completed.len(), 1);
    let execution = &completed[0];
    // Swap on polygon, bridge, swap on base.
    assert_eq!(execution.legs.len(), 3);
    assert_eq!(execution.realized_profit, Some(dec!(15)));

    // One swap + one bridge deposit left polygon; one swap ran on base.
    assert_eq!(rig.polygon.submitted_requests().len(), 2);
    assert_eq!(rig.base.submitted_requests().len(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let status = rig.control.status().await.unwrap();
    assert_eq!(status.open_bridge_transfers, 0);
    assert_eq!(status.reclaim_queue_depth, 0);
    let reserve_total: Decimal = status.reserves.iter().map(|r| r.balance).sum();
    assert_eq!(reserve_total, dec!(3));

    let path = rig.stop().await;
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"BridgeStarted\""));
    assert!(text.contains("\"BridgeConfirmed\""));

    let (_, state) = Ledger::open(path).unwrap();
    assert!(state.open_transfers.is_empty());
    assert!(state.reclaim_transfers.is_empty());
    assert!(state.open_executions.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cross_chain_bridge_timeout_strands_the_asset_end_to_end() {
    let rig = start_rig(cross_config()).await;
    // No delivery is ever scripted: the bridge stalls past its budget.
    rig.polygon.script_token_deltas([dec!(-240)]);
    rig.seed_cross_dislocation();

    let failed = rig
        .wait_for(150, |executions| {
            executions
                .iter()
                .any(|e| e.outcome == Some(ExecutionOutcome::BridgeTimeout))
        })
        .await;
    assert!(failed, "bridge timeout never surfaced");

    // No compensating trade: the target network saw nothing.
    assert!(rig.base.submitted_requests().is_empty());
    assert!(rig.completed_executions().await.is_empty());

    let status = rig.control.status().await.unwrap();
    assert_eq!(status.reclaim_queue_depth, 1);
    assert_eq!(status.open_bridge_transfers, 0);

    let path = rig.stop().await;
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"BridgeTimeout\""));
    assert!(text.contains("\"StrandedAsset\""));

    let (_, state) = Ledger::open(path).unwrap();
    assert_eq!(state.reclaim_transfers.len(), 1);
    assert!(state.open_executions.is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrency_cap_executes_top_two_and_supersedes_the_third() {
    let rig = start_rig(three_pool_config()).await;
    // Hold confirmations open so the cap is observable.
    rig.polygon.set_confirmation_delay(Duration::from_secs(30));
    rig.seed_three_way_dislocation();

    // Three admissible pairs are detected in one cycle; the cap of two
    // keeps exactly two in flight and the third is superseded.
    let mut saw_cap = false;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = rig.control.status().await.unwrap();
        assert!(status.in_flight_executions <= 2, "concurrency cap exceeded");
        if status.in_flight_executions == 2 {
            saw_cap = true;
            break;
        }
    }
    assert!(saw_cap, "never reached two in-flight executions");

    let opportunities = rig.control.list_opportunities().await.unwrap();
    assert!(opportunities.len() >= 3);
    let top_two: HashSet<PoolPair> = opportunities[..2].iter().map(|o| o.pair.clone()).collect();

    assert!(rig.completed_executions().await.is_empty());
    let superseded = rig
        .executions()
        .await
        .into_iter()
        .filter(|e| e.state == ExecutionState::Superseded)
        .count();
    assert!(superseded >= 1, "third opportunity was not superseded");

    // Once the held confirmations land, exactly the top two by net profit
    // have completed; the third was deferred to a later cycle.
    let done = rig
        .wait_for(60, |executions| {
            executions
                .iter()
                .filter(|e| e.state == ExecutionState::Completed)
                .count()
                >= 2
        })
        .await;
    assert!(done, "held executions never completed");

    let completed_pairs: HashSet<PoolPair> = rig
        .completed_executions()
        .await
        .into_iter()
        .map(|e| e.pair)
        .collect();
    assert_eq!(completed_pairs, top_two);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cooldown_suppresses_back_to_back_executions_on_the_same_pair() {
    let rig = start_rig(engine_config(dec!(1000))).await;
    rig.polygon.script_token_deltas([dec!(-240), dec!(255)]);
    rig.seed_dislocation();

    let first = rig.wait_for(10, |executions| !executions.is_empty()).await;
    assert!(first);

    // Well inside the 60 s cooldown the same dislocation is still visible,
    // but no second execution may start.
    let advanced = rig
        .wait_for(35, |executions| {
            executions
                .iter()
                .filter(|e| e.state == ExecutionState::Completed)
                .count()
                > 1
        })
        .await;
    assert!(!advanced, "second execution ran inside the cooldown window");

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn replayed_emergency_stop_blocks_trading_from_the_first_tick() {
    // The stop was engaged in a previous run; replay restores it before any
    // task starts.
    let dir = tempfile::tempdir().unwrap();
    {
        let (ledger, _) = Ledger::open(dir.path().join("ledger.jsonl")).unwrap();
        ledger
            .append(EventKind::EmergencyStop { reason: "previous run".to_string() })
            .unwrap();
    }

    let rig = start_rig_in(engine_config(dec!(1000)), dir).await;
    rig.polygon.script_token_deltas([dec!(-240), dec!(255)]);
    rig.seed_dislocation();

    rig.wait_for(30, |_| false).await;

    let status = rig.control.status().await.unwrap();
    assert!(status.emergency_stopped);
    assert!(rig.completed_executions().await.is_empty());

    let path = rig.stop().await;
    let (_, state) = Ledger::open(path).unwrap();
    assert!(state.emergency_stopped);
    assert!(state.open_executions.is_empty());
    assert!(state.completed_profits.is_empty());
}

#[tokio::test(start_paused = true)]
async fn operator_emergency_stop_halts_further_trading() {
    let rig = start_rig(engine_config(dec!(1000))).await;
    // No dislocation yet: nothing can trade while the command lands.
    rig.control.emergency_stop("operator drill").await;
    rig.wait_for(2, |_| false).await;

    rig.polygon.script_token_deltas([dec!(-240), dec!(255)]);
    rig.seed_dislocation();
    rig.wait_for(30, |_| false).await;

    let status = rig.control.status().await.unwrap();
    assert!(status.emergency_stopped);
    assert!(rig.completed_executions().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn manual_injection_flushes_an_eligible_reserve() {
    // Threshold low enough that one execution's profit share qualifies.
    let rig = start_rig(engine_config(dec!(1))).await;
    rig.polygon.script_token_deltas([dec!(-240), dec!(255)]);
    rig.seed_dislocation();

    rig.wait_for(30, |executions| {
        executions.iter().any(|e| e.state == ExecutionState::Completed)
    })
    .await;
    // Let the allocator land the profit share before triggering.
    tokio::time::sleep(Duration::from_secs(1)).await;

    rig.control.trigger_injection().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let status = rig.control.status().await.unwrap();
    // One pool injected (reserve reset), the other still carries its share.
    let zeroed = status
        .reserves
        .iter()
        .filter(|r| r.balance == Decimal::ZERO)
        .count();
    let carrying = status
        .reserves
        .iter()
        .filter(|r| r.balance == dec!(1.5))
        .count();
    assert_eq!(zeroed, 1);
    assert_eq!(carrying, 1);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn auto_execute_toggle_pauses_trading_but_not_detection() {
    let rig = start_rig(engine_config(dec!(1000))).await;
    // Pause trading before the dislocation exists.
    rig.control.set_auto_execute(false).await;
    rig.wait_for(2, |_| false).await;

    rig.polygon.script_token_deltas([dec!(-240), dec!(255)]);
    rig.seed_dislocation();
    // Past the next 30 s monitor tick, so snapshots and detection cycles
    // definitely happened while trading stayed paused.
    rig.wait_for(40, |_| false).await;

    assert!(rig.completed_executions().await.is_empty());

    // Opportunities are still detected and listed while paused.
    let opportunities = rig.control.list_opportunities().await.unwrap();
    assert!(!opportunities.is_empty());
    let status = rig.control.status().await.unwrap();
    assert!(!status.auto_execute);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn restart_replay_reproduces_shutdown_state() {
    let rig = start_rig(engine_config(dec!(1000))).await;
    rig.polygon.script_token_deltas([dec!(-240), dec!(255)]);
    rig.seed_dislocation();

    rig.wait_for(30, |executions| {
        executions.iter().any(|e| e.state == ExecutionState::Completed)
    })
    .await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    let status = rig.control.status().await.unwrap();
    let reserves_at_shutdown: Decimal = status.reserves.iter().map(|r| r.balance).sum();

    let path = rig.stop().await;
    let (_, state) = Ledger::open(path).unwrap();

    assert!(state.open_executions.is_empty());
    assert_eq!(state.completed_profits.len(), 1);
    assert_eq!(state.completed_profits[0].1, dec!(15));
    let replayed_total: Decimal = state.reserve_balances.values().copied().sum();
    assert_eq!(replayed_total, reserves_at_shutdown);
    // Cooldown windows for the executed pair survived the restart.
    assert!(!state.cooldowns.is_empty());
}
