//! Whole-config validation.
//!
//! Run once at startup; any failure is fatal (exit code 1). Checks are
//! cross-sectional (a pool is only valid relative to the network table, a
//! cross-network deployment is only valid with bridge contracts on both
//! sides), so they live here rather than on the individual sections.

use crate::{ConfigError, EngineConfig};
use rust_decimal::Decimal;
use std::collections::BTreeSet;

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.networks.is_empty() {
            return Err(invalid("at least one network must be configured"));
        }
        if self.pools.is_empty() {
            return Err(invalid("at least one pool must be configured"));
        }

        for (id, network) in &self.networks {
            if network.rpc_url.is_empty() {
                return Err(invalid(format!("network {id}: rpc_url must not be empty")));
            }
            if network.confirmation_blocks == 0 {
                return Err(invalid(format!(
                    "network {id}: confirmation_blocks must be positive"
                )));
            }
            if network.max_gas_price_gwei == 0 {
                return Err(invalid(format!(
                    "network {id}: max_gas_price_gwei must be positive"
                )));
            }
            if network.native_price_cqt <= Decimal::ZERO {
                return Err(invalid(format!(
                    "network {id}: native_price_cqt must be positive"
                )));
            }
        }

        let mut seen_pools = BTreeSet::new();
        let mut pool_networks = BTreeSet::new();
        for pool in &self.pools {
            if !seen_pools.insert(pool.id.clone()) {
                return Err(invalid(format!("duplicate pool id {}", pool.id)));
            }
            if !self.networks.contains_key(pool.network_id.as_str()) {
                return Err(invalid(format!(
                    "pool {} references unknown network {}",
                    pool.id, pool.network_id
                )));
            }
            if pool.fee_tier_bps >= 10_000 {
                return Err(invalid(format!(
                    "pool {}: fee_tier_bps must be below 10000",
                    pool.id
                )));
            }
            if pool.cqt_is_token0().is_none() {
                return Err(invalid(format!(
                    "pool {}: one side of the pair must be CQT",
                    pool.id
                )));
            }
            if let Some(range) = &pool.expected_price_range {
                if range.min <= Decimal::ZERO || range.max <= range.min {
                    return Err(invalid(format!(
                        "pool {}: expected_price_range must satisfy 0 < min < max",
                        pool.id
                    )));
                }
            }
            if pool.enabled {
                pool_networks.insert(pool.network_id.clone());
            }
        }

        let arb = &self.arbitrage;
        if arb.min_position_size <= Decimal::ZERO {
            return Err(invalid("arbitrage.min_position_size must be positive"));
        }
        if arb.max_position_size < arb.min_position_size {
            return Err(invalid(
                "arbitrage.max_position_size must be >= min_position_size",
            ));
        }
        if arb.max_slippage_bps > 10_000 {
            return Err(invalid("arbitrage.max_slippage_bps must be <= 10000 (100%)"));
        }
        if arb.min_confidence < Decimal::ZERO || arb.min_confidence > Decimal::ONE {
            return Err(invalid("arbitrage.min_confidence must be within [0, 1]"));
        }
        if arb.max_concurrent_arbitrages == 0 {
            return Err(invalid("arbitrage.max_concurrent_arbitrages must be positive"));
        }
        if arb.monitoring_interval_secs == 0 || arb.detection_interval_secs == 0 {
            return Err(invalid("arbitrage poll intervals must be positive"));
        }
        if arb.cqt_price_usd <= Decimal::ZERO {
            return Err(invalid("arbitrage.cqt_price_usd must be positive"));
        }

        // Cross-network trading needs a bridge contract on every side.
        if pool_networks.len() > 1 {
            for network in &pool_networks {
                if !self
                    .cross_chain
                    .bridge_contracts
                    .contains_key(network.as_str())
                {
                    return Err(invalid(format!(
                        "no bridge contract configured for network {network}"
                    )));
                }
            }
        }
        if self.cross_chain.percent_fee < Decimal::ZERO
            || self.cross_chain.percent_fee >= Decimal::ONE
        {
            return Err(invalid("cross_chain.percent_fee must be within [0, 1)"));
        }
        if self.cross_chain.confirmation_timeout_secs == 0 {
            return Err(invalid("cross_chain.confirmation_timeout_secs must be positive"));
        }

        let blp = &self.blp;
        if blp.profit_allocation_percent < Decimal::ZERO
            || blp.profit_allocation_percent > Decimal::ONE_HUNDRED
        {
            return Err(invalid("blp.profit_allocation_percent must be within [0, 100]"));
        }
        if blp.min_reserve_balance <= Decimal::ZERO {
            return Err(invalid("blp.min_reserve_balance must be positive"));
        }
        if blp.max_pool_fraction <= Decimal::ZERO || blp.max_pool_fraction > Decimal::ONE {
            return Err(invalid("blp.max_pool_fraction must be within (0, 1]"));
        }
        for pool_id in blp.pool_priorities.keys() {
            if !self.pools.iter().any(|p| p.id.as_str() == pool_id) {
                return Err(invalid(format!(
                    "blp.pool_priorities references unknown pool {pool_id}"
                )));
            }
        }

        if self.security.max_daily_loss <= Decimal::ZERO {
            return Err(invalid("security.max_daily_loss must be positive"));
        }
        if self.security.max_consecutive_failures == 0 {
            return Err(invalid("security.max_consecutive_failures must be positive"));
        }

        if self.engine.ledger_path.is_empty() {
            return Err(invalid("engine.ledger_path must not be empty"));
        }
        if self.engine.rpc_timeout_secs == 0 {
            return Err(invalid("engine.rpc_timeout_secs must be positive"));
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}
