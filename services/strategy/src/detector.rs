//! # Arbitrage Opportunity Detection Engine
//!
//! ## Purpose
//!
//! Real-time detection of profitable round trips across the monitored CQT
//! pools using exact constant-product mathematics and live oracle state.
//! Every ordered pool pair with fresh prices is sized by ternary search,
//! priced against the gas and bridge cost model, and scored for confidence
//! before an [`Opportunity`] is emitted.
//!
//! ## Integration Points
//!
//! - **Input Sources**: Price snapshots from the oracle, gas prices from the
//!   per-network gateways, confidence scores from the external predictor
//! - **Output Destinations**: The risk filter, then the executor queue
//! - **Math**: `cqt-amm` sizing and cost model; no floats anywhere
//!
//! ## Cross-pair normalization
//!
//! Pairs whose paired assets differ (CQT/WETH against CQT/WMATIC) are made
//! commensurable through the cross rate implied by their configured expected
//! price ranges; CQT is the anchor on both sides. Pairs with differing
//! paired assets and no configured range cannot be priced and are skipped.

use cqt_amm::{CostModel, OptimalSizer, SizingBounds, SwapPool};
use chain_gateway::ChainGateway;
use config::{EngineConfig, PoolConfig};
use pool_monitor::PriceOracle;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use types::{
    NetworkId, Opportunity, OpportunityId, OpportunityStatus, PoolId, PoolPair, PriceSnapshot,
};

use crate::predictor::PricePredictor;

/// Structured error types for detection failures
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("no gateway configured for network {0}")]
    MissingGateway(NetworkId),

    #[error("gas price unavailable for network {0}")]
    GasPriceUnavailable(NetworkId),

    #[error("pool {0} is not configured")]
    UnknownPool(PoolId),

    #[error("sizing failed for pair {pair}: {reason}")]
    SizingFailed { pair: PoolPair, reason: String },
}

/// One pool's snapshot oriented around CQT.
struct OrientedPool<'a> {
    config: &'a PoolConfig,
    cqt_reserve: Decimal,
    paired_reserve: Decimal,
    paired_symbol: &'a str,
    /// CQT value of one paired token at the configured reference mid.
    paired_value_in_cqt: Option<Decimal>,
    liquidity: Decimal,
    age_ns: u64,
}

/// Detects arbitrage opportunities across the oracle view.
pub struct OpportunityDetector {
    config: Arc<EngineConfig>,
    oracle: Arc<PriceOracle>,
    gateways: HashMap<NetworkId, Arc<dyn ChainGateway>>,
    predictor: Arc<dyn PricePredictor>,
    sizer: OptimalSizer,
    cost_model: CostModel,
    next_opportunity_id: AtomicU64,
}

impl OpportunityDetector {
    pub fn new(
        config: Arc<EngineConfig>,
        oracle: Arc<PriceOracle>,
        gateways: HashMap<NetworkId, Arc<dyn ChainGateway>>,
        predictor: Arc<dyn PricePredictor>,
        first_opportunity_id: u64,
    ) -> Self {
        let sizer = OptimalSizer::new(SizingBounds {
            min_position: config.arbitrage.min_position_size,
            max_position: config.arbitrage.max_position_size,
        });
        let cost_model = CostModel {
            bridge_flat_fee: config.cross_chain.flat_fee_usd / config.arbitrage.cqt_price_usd,
            bridge_pct_fee: config.cross_chain.percent_fee,
            slippage_buffer_bps: config.arbitrage.max_slippage_bps,
        };
        Self {
            config,
            oracle,
            gateways,
            predictor,
            sizer,
            cost_model,
            next_opportunity_id: AtomicU64::new(first_opportunity_id.max(1)),
        }
    }

    /// One detection pass over every ordered pool pair with fresh prices.
    ///
    /// Candidates for the same (source, target) pair are deduplicated to the
    /// highest net profit within the pass; the result is sorted by net
    /// profit descending.
    pub async fn detect_cycle(&self, now_ns: u64) -> Vec<Opportunity> {
        let fresh = self.fresh_pools(now_ns);
        if fresh.len() < 2 {
            return Vec::new();
        }

        let gas_costs = self.gas_costs_cqt(&fresh).await;

        let mut best: HashMap<PoolPair, Opportunity> = HashMap::new();
        for (i, source) in fresh.iter().enumerate() {
            for (j, target) in fresh.iter().enumerate() {
                if i == j {
                    continue;
                }
                match self.evaluate_pair(source, target, &gas_costs, now_ns) {
                    Ok(Some(opportunity)) => {
                        debug!(
                            pair = %opportunity.pair,
                            net = %opportunity.net_profit,
                            edge_bps = %opportunity.gross_edge_bps,
                            "profitable candidate"
                        );
                        match best.entry(opportunity.pair.clone()) {
                            std::collections::hash_map::Entry::Occupied(mut existing) => {
                                if opportunity.net_profit > existing.get().net_profit {
                                    existing.insert(opportunity);
                                }
                            }
                            std::collections::hash_map::Entry::Vacant(slot) => {
                                slot.insert(opportunity);
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "pair evaluation failed");
                    }
                }
            }
        }

        let mut opportunities: Vec<Opportunity> = best.into_values().collect();
        opportunities.sort_by(|a, b| {
            b.net_profit
                .cmp(&a.net_profit)
                .then(b.confidence.cmp(&a.confidence))
        });
        opportunities
    }

    /// Enabled pools whose latest snapshot is fresh at `now_ns`.
    fn fresh_pools(&self, now_ns: u64) -> Vec<(&PoolConfig, Arc<PriceSnapshot>)> {
        self.config
            .enabled_pools()
            .filter_map(|pool| {
                let snapshot = self.oracle.fresh(&pool.id, now_ns)?;
                Some((pool, snapshot))
            })
            .collect()
    }

    /// Per-swap gas cost in CQT for every network with a fresh pool.
    async fn gas_costs_cqt(
        &self,
        fresh: &[(&PoolConfig, Arc<PriceSnapshot>)],
    ) -> HashMap<NetworkId, Decimal> {
        let mut costs = HashMap::new();
        for (pool, _) in fresh {
            if costs.contains_key(&pool.network_id) {
                continue;
            }
            let Some(network_config) = self.config.network(&pool.network_id) else {
                continue;
            };
            let Some(gateway) = self.gateways.get(&pool.network_id) else {
                continue;
            };
            match gateway.gas_price_wei().await {
                Ok(price_wei) => {
                    let price_wei = price_wei.min(u64::MAX as u128) as u64;
                    let cost_native = Decimal::from(price_wei)
                        * Decimal::from(network_config.gas_units_per_swap)
                        / dec!(1000000000000000000);
                    costs.insert(
                        pool.network_id.clone(),
                        cost_native * network_config.native_price_cqt,
                    );
                }
                Err(e) => {
                    debug!(network = %pool.network_id, error = %e, "gas price unavailable this cycle");
                }
            }
        }
        costs
    }

    fn evaluate_pair(
        &self,
        source: &(&PoolConfig, Arc<PriceSnapshot>),
        target: &(&PoolConfig, Arc<PriceSnapshot>),
        gas_costs: &HashMap<NetworkId, Decimal>,
        now_ns: u64,
    ) -> Result<Option<Opportunity>, DetectorError> {
        let src = orient(source.0, &source.1, now_ns);
        let tgt = orient(target.0, &target.1, now_ns);

        // Pairs with different paired assets need the reference cross rate.
        let normalization = if src.paired_symbol == tgt.paired_symbol {
            Decimal::ONE
        } else {
            match (src.paired_value_in_cqt, tgt.paired_value_in_cqt) {
                (Some(src_value), Some(tgt_value)) if src_value > Decimal::ZERO => {
                    tgt_value / src_value
                }
                _ => {
                    debug!(
                        source = %src.config.id,
                        target = %tgt.config.id,
                        "skipping pair: no reference cross rate for differing paired assets"
                    );
                    return Ok(None);
                }
            }
        };

        let source_pool = SwapPool {
            reserve_in: src.cqt_reserve,
            reserve_out: src.paired_reserve,
            fee_bps: src.config.fee_tier_bps,
        };
        let target_pool = SwapPool {
            reserve_in: tgt.paired_reserve * normalization,
            reserve_out: tgt.cqt_reserve,
            fee_bps: tgt.config.fee_tier_bps,
        };

        let pair = PoolPair::new(src.config.id.clone(), tgt.config.id.clone());
        let Some(trade) = self
            .sizer
            .size_round_trip(&source_pool, &target_pool)
            .map_err(|e| DetectorError::SizingFailed { pair: pair.clone(), reason: e.to_string() })?
        else {
            return Ok(None);
        };

        let source_network = src.config.network_id.clone();
        let target_network = tgt.config.network_id.clone();
        let cross_network = source_network != target_network;

        let source_gas = *gas_costs
            .get(&source_network)
            .ok_or_else(|| DetectorError::GasPriceUnavailable(source_network.clone()))?;

        let costs = if cross_network {
            if !self.bridge_within_budget(&target_network) {
                debug!(%pair, "dropping cross-network pair: bridge exceeds confirmation budget");
                return Ok(None);
            }
            let target_gas = *gas_costs
                .get(&target_network)
                .ok_or_else(|| DetectorError::GasPriceUnavailable(target_network.clone()))?;
            self.cost_model
                .cross_network(source_gas, target_gas, trade.size)
        } else {
            self.cost_model.intra_network(source_gas, trade.size)
        };

        let net_profit = trade.gross_profit - costs.total();
        if net_profit <= Decimal::ZERO {
            return Ok(None);
        }

        let confidence = self.confidence(&src, &tgt, trade.size, now_ns);

        let id = OpportunityId(self.next_opportunity_id.fetch_add(1, Ordering::Relaxed));
        Ok(Some(Opportunity {
            id,
            pair,
            source_network,
            target_network,
            direction_token: "CQT".to_string(),
            gross_edge_bps: trade.gross_edge_bps,
            trade_size: trade.size,
            paired_amount: trade.paired_amount,
            est_gas_cost: costs.gas_cost,
            est_bridge_cost: costs.bridge_cost,
            net_profit,
            confidence,
            detected_at_ns: now_ns,
            status: OpportunityStatus::Detected,
        }))
    }

    /// Whether a bridge to `target_network` can settle inside the configured
    /// confirmation budget.
    fn bridge_within_budget(&self, target_network: &NetworkId) -> bool {
        let Some(network) = self.config.network(target_network) else {
            return false;
        };
        let bridge_floor_secs = network.confirmation_blocks * network.block_time_secs * 2;
        self.config.cross_chain.confirmation_timeout_secs >= bridge_floor_secs
    }

    /// Multiplicative confidence: predictor score, liquidity depth and
    /// staleness penalty, each clamped into [0, 1].
    fn confidence(
        &self,
        src: &OrientedPool<'_>,
        tgt: &OrientedPool<'_>,
        size: Decimal,
        _now_ns: u64,
    ) -> Decimal {
        let predictor = self
            .predictor
            .score(&src.config.id, &tgt.config.id)
            .clamp(Decimal::ZERO, Decimal::ONE);

        let liquidity = src.liquidity.min(tgt.liquidity);
        let depth = if size > Decimal::ZERO {
            (liquidity / (size * dec!(10))).min(Decimal::ONE)
        } else {
            Decimal::ZERO
        };

        let stale_threshold = Decimal::from(self.oracle.stale_threshold_ns());
        let age = Decimal::from(src.age_ns.max(tgt.age_ns));
        let staleness = if stale_threshold > Decimal::ZERO {
            (Decimal::ONE - age / stale_threshold).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        predictor * depth * staleness
    }
}

/// Orient a snapshot's reserves and reference price around CQT.
fn orient<'a>(
    config: &'a PoolConfig,
    snapshot: &Arc<PriceSnapshot>,
    now_ns: u64,
) -> OrientedPool<'a> {
    let cqt_is_token0 = config.cqt_is_token0().unwrap_or(true);
    let (cqt_reserve, paired_reserve, paired_symbol) = if cqt_is_token0 {
        (snapshot.reserve0, snapshot.reserve1, config.token1.as_str())
    } else {
        (snapshot.reserve1, snapshot.reserve0, config.token0.as_str())
    };

    // Reference CQT value of one paired token, from the expected range mid.
    let paired_value_in_cqt = config.expected_price_range.as_ref().and_then(|range| {
        let mid = (range.min + range.max) / dec!(2);
        if mid <= Decimal::ZERO {
            return None;
        }
        // quote is token1-per-token0; invert as needed so the result is
        // CQT per paired token.
        if cqt_is_token0 {
            // mid = paired per CQT
            Some(Decimal::ONE / mid)
        } else {
            // mid = CQT per paired
            Some(mid)
        }
    });

    OrientedPool {
        config,
        cqt_reserve,
        paired_reserve,
        paired_symbol,
        paired_value_in_cqt,
        liquidity: cqt_reserve,
        age_ns: snapshot.age_ns(now_ns),
    }
}
