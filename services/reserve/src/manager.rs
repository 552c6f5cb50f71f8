//! Reserve accounting and injection scheduling.

use chain_gateway::{ChainGateway, TxCall, TxRequest};
use config::{EngineConfig, PoolConfig};
use dashmap::DashMap;
use execution_engine::bridge::ReclaimCredit;
use execution_engine::ProfitEvent;
use ledger::{Ledger, LedgerError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use pool_monitor::PriceOracle;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::{
    time, EventKind, NetworkId, PoolId, ReserveEntry, ReserveSource,
};

use crate::fund::FundSource;

/// Owns every [`ReserveEntry`]; nothing else mutates reserve state.
pub struct ReserveManager {
    config: Arc<EngineConfig>,
    gateways: HashMap<NetworkId, Arc<dyn ChainGateway>>,
    oracle: Arc<PriceOracle>,
    ledger: Arc<Ledger>,
    entries: DashMap<PoolId, ReserveEntry>,
}

impl ReserveManager {
    pub fn new(
        config: Arc<EngineConfig>,
        gateways: HashMap<NetworkId, Arc<dyn ChainGateway>>,
        oracle: Arc<PriceOracle>,
        ledger: Arc<Ledger>,
    ) -> Self {
        Self { config, gateways, oracle, ledger, entries: DashMap::new() }
    }

    /// Seed balances and injection timestamps from ledger replay.
    pub fn restore(
        &self,
        balances: HashMap<PoolId, Decimal>,
        last_injection_ns: HashMap<PoolId, u64>,
    ) {
        for (pool_id, balance) in balances {
            let mut entry = self
                .entries
                .entry(pool_id.clone())
                .or_insert_with(|| ReserveEntry::new(pool_id.clone()));
            entry.balance = balance;
        }
        for (pool_id, ts) in last_injection_ns {
            let mut entry = self
                .entries
                .entry(pool_id.clone())
                .or_insert_with(|| ReserveEntry::new(pool_id.clone()));
            entry.last_injection_at_ns = Some(ts);
        }
    }

    pub fn balance(&self, pool: &PoolId) -> Decimal {
        self.entries
            .get(pool)
            .map(|entry| entry.balance)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn entries(&self) -> Vec<ReserveEntry> {
        self.entries.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Credit the configured share of a completed execution's profit, split
    /// evenly between the source and target pools.
    pub fn allocate_from_execution(&self, event: &ProfitEvent) -> Result<(), LedgerError> {
        if event.realized_profit <= Decimal::ZERO {
            debug!(execution = %event.execution_id, "no profit to allocate");
            return Ok(());
        }

        let share = event.realized_profit * self.config.blp.profit_allocation_percent / dec!(100);
        let half = share / dec!(2);
        if half <= Decimal::ZERO {
            return Ok(());
        }

        for pool_id in [&event.pair.source, &event.pair.target] {
            self.credit(
                pool_id.clone(),
                half,
                ReserveSource::ExecutionProfit { execution_id: event.execution_id },
            )?;
        }
        info!(
            execution = %event.execution_id,
            total = %share,
            "profit share allocated to reserves"
        );
        Ok(())
    }

    /// External deposit from the fund-source collaborator.
    pub fn deposit(&self, pool_id: PoolId, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            warn!(%pool_id, %amount, "ignoring non-positive deposit");
            return Ok(());
        }
        self.credit(pool_id, amount, ReserveSource::Deposit)
    }

    /// Credit from a reclaimed bridge transfer.
    pub fn credit_reclaim(&self, credit: &ReclaimCredit) -> Result<(), LedgerError> {
        self.credit(
            credit.pool_id.clone(),
            credit.amount,
            ReserveSource::BridgeReclaim { transfer_id: credit.transfer_id },
        )
    }

    fn credit(
        &self,
        pool_id: PoolId,
        amount: Decimal,
        source: ReserveSource,
    ) -> Result<(), LedgerError> {
        // Ledger first; the balance becomes observable afterwards.
        self.ledger.append(EventKind::ReserveAllocated {
            pool_id: pool_id.clone(),
            amount,
            source,
        })?;
        let mut entry = self
            .entries
            .entry(pool_id.clone())
            .or_insert_with(|| ReserveEntry::new(pool_id));
        entry.balance += amount;
        Ok(())
    }

    /// One injection pass: evaluate the predicate for every pool, pick the
    /// single highest-priority eligible pool and inject.
    pub async fn injection_tick(&self, now_ns: u64) -> Result<Option<PoolId>, LedgerError> {
        let mut eligible: Vec<(&PoolConfig, Decimal)> = Vec::new();

        for pool in self.config.enabled_pools() {
            let balance = self.balance(&pool.id);
            if balance < self.config.blp.min_reserve_balance {
                continue;
            }
            if let Some(entry) = self.entries.get(&pool.id) {
                if let Some(last) = entry.last_injection_at_ns {
                    let interval = time::secs_to_ns(self.config.blp.min_injection_interval_secs);
                    // A window ending exactly now is open again.
                    if now_ns.saturating_sub(last) < interval {
                        continue;
                    }
                }
            }
            let healthy = self
                .gateways
                .get(&pool.network_id)
                .map(|gateway| gateway.health().is_healthy())
                .unwrap_or(false);
            if !healthy {
                debug!(pool = %pool.id, "skipping injection: network degraded");
                continue;
            }
            eligible.push((pool, balance));
        }

        let Some((pool, balance)) = eligible.into_iter().max_by(|(a, ba), (b, bb)| {
            let pa = self.priority(&a.id);
            let pb = self.priority(&b.id);
            pa.cmp(&pb).then(ba.cmp(bb)).then(b.id.cmp(&a.id))
        }) else {
            return Ok(None);
        };

        self.inject(pool, balance).await
    }

    fn priority(&self, pool: &PoolId) -> u32 {
        self.config
            .blp
            .pool_priorities
            .get(pool.as_str())
            .copied()
            .unwrap_or(0)
    }

    /// Inject liquidity into one pool. On failure the reserve is left
    /// untouched and the pool retries after the interval.
    async fn inject(&self, pool: &PoolConfig, balance: Decimal) -> Result<Option<PoolId>, LedgerError> {
        let now_ns = time::now_ns();
        let Some(snapshot) = self.oracle.fresh(&pool.id, now_ns) else {
            debug!(pool = %pool.id, "skipping injection: no fresh price");
            return Ok(None);
        };

        // Cap the injected notional to avoid moving the pool.
        let cap = snapshot.liquidity * self.config.blp.max_pool_fraction;
        let notional = balance.min(cap);
        if notional <= Decimal::ZERO {
            return Ok(None);
        }
        let remainder = balance - notional;

        let cqt_is_token0 = pool.cqt_is_token0().unwrap_or(true);
        let paired_per_cqt = if cqt_is_token0 {
            snapshot.price.token1_per_token0()
        } else {
            match snapshot.price.token0_per_token1() {
                Ok(quote) => quote,
                Err(_) => return Ok(None),
            }
        };

        // Half the notional stays CQT, the other half pairs at current price.
        let cqt_amount = notional / dec!(2);
        let paired_amount = cqt_amount * paired_per_cqt;
        let (amount0, amount1) = if cqt_is_token0 {
            (cqt_amount, paired_amount)
        } else {
            (paired_amount, cqt_amount)
        };

        let Some(gateway) = self.gateways.get(&pool.network_id) else {
            return Ok(None);
        };

        let tx = TxRequest::new(
            pool.address,
            TxCall::AddLiquidity { pool: pool.id.clone(), amount0, amount1 },
            self.config
                .network(&pool.network_id)
                .map(|n| n.gas_units_per_swap)
                .unwrap_or(300_000),
        );

        let tx_hash = match gateway.submit(tx).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(pool = %pool.id, error = %e, "injection submission failed; reserve untouched");
                return Ok(None);
            }
        };
        let depth = self
            .config
            .network(&pool.network_id)
            .map(|n| n.confirmation_blocks)
            .unwrap_or(1);
        let receipt = match gateway.await_confirmation(tx_hash, depth).await {
            Ok(receipt) if receipt.success => receipt,
            Ok(_) => {
                warn!(pool = %pool.id, "injection reverted; reserve untouched");
                return Ok(None);
            }
            Err(e) => {
                warn!(pool = %pool.id, error = %e, "injection confirmation failed; reserve untouched");
                return Ok(None);
            }
        };

        self.ledger.append(EventKind::ReserveInjected {
            pool_id: pool.id.clone(),
            cqt_amount,
            paired_amount,
            tx_hash,
        })?;
        if remainder > Decimal::ZERO {
            self.ledger.append(EventKind::ReserveAllocated {
                pool_id: pool.id.clone(),
                amount: remainder,
                source: ReserveSource::InjectionRemainder,
            })?;
        }

        let mut entry = self
            .entries
            .entry(pool.id.clone())
            .or_insert_with(|| ReserveEntry::new(pool.id.clone()));
        entry.balance = remainder;
        entry.last_injection_at_ns = Some(time::now_ns());

        info!(
            pool = %pool.id,
            %cqt_amount,
            %paired_amount,
            block = receipt.block_number,
            "liquidity injected"
        );
        Ok(Some(pool.id.clone()))
    }

    /// Spawn the periodic injection timer.
    pub fn spawn_timer(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.blp.injection_tick_secs.max(1));
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
                if let Err(e) = self.injection_tick(time::now_ns()).await {
                    warn!(error = %e, "injection tick failed");
                }
            }
        })
    }

    /// Spawn the allocator loop consuming profit events and reclaim credits.
    pub fn spawn_allocator(
        self: Arc<Self>,
        mut profits: mpsc::UnboundedReceiver<ProfitEvent>,
        mut reclaims: mpsc::UnboundedReceiver<ReclaimCredit>,
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
                    profit = profits.recv() => {
                        let Some(profit) = profit else { return };
                        if let Err(e) = self.allocate_from_execution(&profit) {
                            warn!(error = %e, "profit allocation failed");
                        }
                    }
                    credit = reclaims.recv() => {
                        let Some(credit) = credit else { return };
                        if let Err(e) = self.credit_reclaim(&credit) {
                            warn!(error = %e, "reclaim credit failed");
                        }
                    }
                }
            }
        })
    }

    /// Spawn a consumer for an external fund source.
    pub fn spawn_fund_source(
        self: Arc<Self>,
        mut source: Box<dyn FundSource>,
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
                    deposit = source.next_deposit() => {
                        let Some((pool_id, amount)) = deposit else { return };
                        if let Err(e) = self.deposit(pool_id, amount) {
                            warn!(error = %e, "fund-source deposit failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_gateway::MockGateway;
    use std::path::PathBuf;
    use types::{
        ExecutionId, NetworkHealth, PoolObservation, PoolPair, RawPrice, TransferId,
    };

    struct Harness {
        manager: Arc<ReserveManager>,
        gateway: Arc<MockGateway>,
        oracle: Arc<PriceOracle>,
        ledger_path: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn harness(priorities: &str) -> Harness {
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
            token1 = "WMATIC"
            fee_tier_bps = 30

            {priorities}
        "#
        );
        let config: Arc<EngineConfig> = Arc::new(toml::from_str(&toml).unwrap());
        config.validate().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let ledger_path = dir.path().join("ledger.jsonl");
        let (ledger, _) = Ledger::open(&ledger_path).unwrap();

        let gateway = Arc::new(MockGateway::new(NetworkId::new("polygon")));
        let mut gateways: HashMap<NetworkId, Arc<dyn ChainGateway>> = HashMap::new();
        gateways.insert(NetworkId::new("polygon"), gateway.clone());

        let oracle = Arc::new(PriceOracle::new(config.arbitrage.stale_threshold_ms));
        let manager = Arc::new(ReserveManager::new(
            config,
            gateways,
            oracle.clone(),
            Arc::new(ledger),
        ));

        Harness { manager, gateway, oracle, ledger_path, _dir: dir }
    }

    fn publish_price(oracle: &PriceOracle, pool: &str, liquidity: Decimal) {
        let snapshot = types::PriceSnapshot::from_observation(
            PoolId::new(pool),
            PoolObservation {
                raw_price: RawPrice::Reserves {
                    reserve0: liquidity,
                    reserve1: liquidity * dec!(2),
                },
                liquidity,
                block_number: 1,
            },
            time::now_ns(),
        )
        .unwrap();
        oracle.publish(snapshot);
    }

    fn profit_event(profit: Decimal) -> ProfitEvent {
        ProfitEvent {
            execution_id: ExecutionId(1),
            pair: PoolPair::new(PoolId::new("pool-a"), PoolId::new("pool-b")),
            realized_profit: profit,
        }
    }

    #[tokio::test]
    async fn profit_share_splits_evenly_between_pools() {
        let harness = harness("");
        harness.manager.allocate_from_execution(&profit_event(dec!(100))).unwrap();

        // 20% of 100, split in half
        assert_eq!(harness.manager.balance(&PoolId::new("pool-a")), dec!(10));
        assert_eq!(harness.manager.balance(&PoolId::new("pool-b")), dec!(10));
    }

    #[tokio::test]
    async fn losing_execution_allocates_nothing() {
        let harness = harness("");
        harness.manager.allocate_from_execution(&profit_event(dec!(-50))).unwrap();
        assert_eq!(harness.manager.balance(&PoolId::new("pool-a")), dec!(0));
    }

    #[tokio::test]
    async fn injection_fires_at_threshold_and_resets_reserve() {
        let harness = harness("");
        publish_price(&harness.oracle, "pool-a", dec!(200000));

        harness.manager.deposit(PoolId::new("pool-a"), dec!(1200)).unwrap();
        let now = time::now_ns();

        let injected = harness.manager.injection_tick(now).await.unwrap();
        assert_eq!(injected, Some(PoolId::new("pool-a")));
        assert_eq!(harness.manager.balance(&PoolId::new("pool-a")), dec!(0));

        // One addLiquidity transaction with half CQT, half paired at 2.0
        let requests = harness.gateway.submitted_requests();
        assert_eq!(requests.len(), 1);
        match &requests[0].call {
            TxCall::AddLiquidity { amount0, amount1, .. } => {
                assert_eq!(*amount0, dec!(600));
                assert_eq!(*amount1, dec!(1200));
            }
            other => panic!("expected AddLiquidity, got {other:?}"),
        }

        // No second injection inside the interval.
        let again = harness.manager.injection_tick(time::now_ns()).await.unwrap();
        assert_eq!(again, None);
    }

    #[tokio::test]
    async fn below_threshold_reserve_is_left_alone() {
        let harness = harness("");
        publish_price(&harness.oracle, "pool-a", dec!(200000));
        harness.manager.deposit(PoolId::new("pool-a"), dec!(999)).unwrap();

        assert_eq!(harness.manager.injection_tick(time::now_ns()).await.unwrap(), None);
        assert_eq!(harness.manager.balance(&PoolId::new("pool-a")), dec!(999));
    }

    #[tokio::test]
    async fn failed_injection_leaves_reserve_untouched() {
        let harness = harness("");
        publish_price(&harness.oracle, "pool-a", dec!(200000));
        harness.manager.deposit(PoolId::new("pool-a"), dec!(1500)).unwrap();
        harness.gateway.revert_next();

        let injected = harness.manager.injection_tick(time::now_ns()).await.unwrap();
        assert_eq!(injected, None);
        assert_eq!(harness.manager.balance(&PoolId::new("pool-a")), dec!(1500));
    }

    #[tokio::test]
    async fn degraded_network_blocks_injection() {
        let harness = harness("");
        publish_price(&harness.oracle, "pool-a", dec!(200000));
        harness.manager.deposit(PoolId::new("pool-a"), dec!(1500)).unwrap();
        harness.gateway.set_health(NetworkHealth::Degraded);

        assert_eq!(harness.manager.injection_tick(time::now_ns()).await.unwrap(), None);
        assert_eq!(harness.manager.balance(&PoolId::new("pool-a")), dec!(1500));
    }

    #[tokio::test]
    async fn highest_priority_pool_wins_the_tick() {
        let harness = harness(
            "[blp.pool_priorities]\n            pool-a = 1\n            pool-b = 5",
        );
        publish_price(&harness.oracle, "pool-a", dec!(200000));
        publish_price(&harness.oracle, "pool-b", dec!(200000));
        harness.manager.deposit(PoolId::new("pool-a"), dec!(2000)).unwrap();
        harness.manager.deposit(PoolId::new("pool-b"), dec!(1100)).unwrap();

        let injected = harness.manager.injection_tick(time::now_ns()).await.unwrap();
        // pool-b wins on priority despite the smaller balance, and only one
        // pool is injected per tick.
        assert_eq!(injected, Some(PoolId::new("pool-b")));
        assert_eq!(harness.manager.balance(&PoolId::new("pool-b")), dec!(0));
        assert_eq!(harness.manager.balance(&PoolId::new("pool-a")), dec!(2000));
    }

    #[tokio::test]
    async fn liquidity_cap_keeps_the_remainder()
    {
        let harness = harness("");
        // Cap = 1% of 50_000 = 500 < balance
        publish_price(&harness.oracle, "pool-a", dec!(50000));
        harness.manager.deposit(PoolId::new("pool-a"), dec!(1200)).unwrap();

        let injected = harness.manager.injection_tick(time::now_ns()).await.unwrap();
        assert_eq!(injected, Some(PoolId::new("pool-a")));
        assert_eq!(harness.manager.balance(&PoolId::new("pool-a")), dec!(700));
    }

    #[tokio::test]
    async fn reclaim_credit_lands_in_reserve() {
        let harness = harness("");
        harness
            .manager
            .credit_reclaim(&ReclaimCredit {
                transfer_id: TransferId(9),
                pool_id: PoolId::new("pool-b"),
                amount: dec!(5000),
            })
            .unwrap();
        assert_eq!(harness.manager.balance(&PoolId::new("pool-b")), dec!(5000));
    }

    #[tokio::test]
    async fn replayed_ledger_reproduces_reserve_state() {
        let harness = harness("");
        publish_price(&harness.oracle, "pool-a", dec!(200000));
        harness.manager.allocate_from_execution(&profit_event(dec!(1000))).unwrap();
        harness.manager.deposit(PoolId::new("pool-a"), dec!(1100)).unwrap();
        harness.manager.injection_tick(time::now_ns()).await.unwrap();

        let expected_a = harness.manager.balance(&PoolId::new("pool-a"));
        let expected_b = harness.manager.balance(&PoolId::new("pool-b"));

        let path = harness.ledger_path.clone();
        drop(harness);
        let (_, state) = Ledger::open(path).unwrap();
        assert_eq!(state.reserve_balances[&PoolId::new("pool-a")], expected_a);
        assert_eq!(state.reserve_balances[&PoolId::new("pool-b")], expected_b);
    }
}
