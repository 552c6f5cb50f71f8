//! Configuration section structs and their defaults.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use types::{Address, NetworkId, PoolId};

/// Complete engine configuration, one TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Networks keyed by operator-assigned id.
    pub networks: BTreeMap<String, NetworkConfig>,
    pub pools: Vec<PoolConfig>,
    #[serde(default)]
    pub arbitrage: ArbitrageConfig,
    #[serde(default)]
    pub cross_chain: CrossChainConfig,
    #[serde(default)]
    pub blp: BlpConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub engine: EngineSection,
}

impl EngineConfig {
    pub fn pool(&self, id: &PoolId) -> Option<&PoolConfig> {
        self.pools.iter().find(|p| &p.id == id)
    }

    pub fn network(&self, id: &NetworkId) -> Option<&NetworkConfig> {
        self.networks.get(id.as_str())
    }

    pub fn enabled_pools(&self) -> impl Iterator<Item = &PoolConfig> {
        self.pools.iter().filter(|p| p.enabled)
    }
}

/// One EVM network and its RPC endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    #[serde(default)]
    pub backup_rpc_urls: Vec<String>,
    pub chain_id: u64,
    /// Depth at which a transaction counts as confirmed.
    pub confirmation_blocks: u64,
    pub max_gas_price_gwei: u64,
    pub native_symbol: String,
    /// Gas units budgeted per swap leg on this network.
    #[serde(default = "default_gas_units_per_swap")]
    pub gas_units_per_swap: u64,
    /// CQT per native token, for converting gas costs into subject units.
    #[serde(default = "default_native_price_cqt")]
    pub native_price_cqt: Decimal,
    #[serde(default = "default_block_time_secs")]
    pub block_time_secs: u64,
}

fn default_gas_units_per_swap() -> u64 {
    300_000
}

fn default_native_price_cqt() -> Decimal {
    Decimal::ONE
}

fn default_block_time_secs() -> u64 {
    2
}

/// Expected sane quote range for a pool; reads outside it are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: Decimal,
    pub max: Decimal,
}

/// One monitored liquidity pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub id: PoolId,
    pub network_id: NetworkId,
    pub address: Address,
    pub token0: String,
    pub token1: String,
    #[serde(default = "default_decimals")]
    pub token0_decimals: u32,
    #[serde(default = "default_decimals")]
    pub token1_decimals: u32,
    pub fee_tier_bps: u32,
    #[serde(default)]
    pub protocol: types::PoolProtocol,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub expected_price_range: Option<PriceRange>,
    /// Poll interval override; falls back to `arbitrage.monitoring_interval_secs`.
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

impl PoolConfig {
    /// Which side of the pair is CQT, if any.
    pub fn cqt_is_token0(&self) -> Option<bool> {
        if self.token0 == "CQT" {
            Some(true)
        } else if self.token1 == "CQT" {
            Some(false)
        } else {
            None
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_decimals() -> u32 {
    18
}

/// Detection and admission parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrageConfig {
    /// Minimum net profit as bps of notional; exactly at the threshold is admitted.
    pub min_profit_bps: u32,
    pub min_position_size: Decimal,
    pub max_position_size: Decimal,
    pub max_slippage_bps: u32,
    pub monitoring_interval_secs: u64,
    pub detection_interval_secs: u64,
    pub cooldown_period_secs: u64,
    pub max_concurrent_arbitrages: usize,
    /// A snapshot exactly this old is still fresh; older is stale.
    pub stale_threshold_ms: u64,
    pub min_confidence: Decimal,
    /// USD value of one CQT, used to convert USD-denominated bridge fees.
    pub cqt_price_usd: Decimal,
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        Self {
            min_profit_bps: 50,
            min_position_size: dec!(100),
            max_position_size: dec!(50000),
            max_slippage_bps: 50,
            monitoring_interval_secs: 30,
            detection_interval_secs: 5,
            cooldown_period_secs: 60,
            max_concurrent_arbitrages: 3,
            stale_threshold_ms: 90_000,
            min_confidence: dec!(0.7),
            cqt_price_usd: Decimal::ONE,
        }
    }
}

/// Bridge fee schedule and confirmation budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossChainConfig {
    /// Bridge contract per network id.
    pub bridge_contracts: BTreeMap<String, Address>,
    pub flat_fee_usd: Decimal,
    pub percent_fee: Decimal,
    pub confirmation_timeout_secs: u64,
}

impl Default for CrossChainConfig {
    fn default() -> Self {
        Self {
            bridge_contracts: BTreeMap::new(),
            flat_fee_usd: dec!(5),
            percent_fee: dec!(0.001),
            confirmation_timeout_secs: 600,
        }
    }
}

/// Built-in liquidity provider parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlpConfig {
    pub profit_allocation_percent: Decimal,
    pub min_reserve_balance: Decimal,
    pub min_injection_interval_secs: u64,
    pub injection_tick_secs: u64,
    /// Injection notional cap as a fraction of pool liquidity.
    pub max_pool_fraction: Decimal,
    pub injection_confirmation_timeout_secs: u64,
    /// Higher weight wins when several pools are injectable in one tick.
    pub pool_priorities: BTreeMap<String, u32>,
}

impl Default for BlpConfig {
    fn default() -> Self {
        Self {
            profit_allocation_percent: dec!(20),
            min_reserve_balance: dec!(1000),
            min_injection_interval_secs: 3600,
            injection_tick_secs: 60,
            max_pool_fraction: dec!(0.01),
            injection_confirmation_timeout_secs: 300,
            pool_priorities: BTreeMap::new(),
        }
    }
}

/// Loss budgets and the emergency-stop tripwires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub max_daily_loss: Decimal,
    pub max_consecutive_failures: u32,
    pub max_gas_price_gwei: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_daily_loss: dec!(1000),
            max_consecutive_failures: 5,
            max_gas_price_gwei: 100,
        }
    }
}

/// Process-level knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub ledger_path: String,
    pub rpc_timeout_secs: u64,
    pub leg_confirmation_timeout_secs: u64,
    /// Grace period for draining the bridge coordinator at shutdown.
    pub shutdown_drain_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            ledger_path: "./data/ledger.jsonl".to_string(),
            rpc_timeout_secs: 10,
            leg_confirmation_timeout_secs: 120,
            shutdown_drain_secs: 30,
        }
    }
}
