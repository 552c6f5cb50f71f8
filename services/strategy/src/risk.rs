//! Risk filter: an ordered chain of admission predicates.
//!
//! Each gating condition is its own rule object so deployments can select
//! and reorder the active set; the standard chain applies the eight built-in
//! rules in order and the first failure drops the opportunity with a stable
//! reason tag. Boundary semantics are inclusive everywhere: a value exactly
//! at its threshold is admitted.

use config::EngineConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::debug;
use types::{time, NetworkId, Opportunity, PoolPair};

/// Outcome of one rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Drop(String),
}

/// Shared inputs every rule sees alongside the opportunity.
pub struct RiskContext<'a> {
    pub opportunity: &'a Opportunity,
    pub now_ns: u64,
    /// Latest gas price per network, in gwei.
    pub gas_price_gwei: &'a HashMap<NetworkId, Decimal>,
    /// Most recent execution activity per pair.
    pub cooldowns: &'a HashMap<PoolPair, u64>,
    pub in_flight: usize,
    /// Cumulative realized loss today (positive = loss).
    pub daily_loss: Decimal,
    pub emergency_stopped: bool,
}

/// One admission predicate.
pub trait RiskRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, ctx: &RiskContext<'_>) -> Verdict;
}

struct ConfidenceRule {
    min_confidence: Decimal,
}

impl RiskRule for ConfidenceRule {
    fn name(&self) -> &'static str {
        "confidence"
    }

    fn evaluate(&self, ctx: &RiskContext<'_>) -> Verdict {
        if ctx.opportunity.confidence >= self.min_confidence {
            Verdict::Pass
        } else {
            Verdict::Drop(format!(
                "confidence {} below minimum {}",
                ctx.opportunity.confidence, self.min_confidence
            ))
        }
    }
}

struct ProfitThresholdRule {
    min_profit_bps: u32,
}

impl RiskRule for ProfitThresholdRule {
    fn name(&self) -> &'static str {
        "profit-threshold"
    }

    fn evaluate(&self, ctx: &RiskContext<'_>) -> Verdict {
        let threshold =
            ctx.opportunity.trade_size * Decimal::from(self.min_profit_bps) / dec!(10000);
        // Exactly at the threshold is admitted.
        if ctx.opportunity.net_profit >= threshold {
            Verdict::Pass
        } else {
            Verdict::Drop(format!(
                "net profit {} below threshold {}",
                ctx.opportunity.net_profit, threshold
            ))
        }
    }
}

struct PositionBoundsRule {
    min_position: Decimal,
    max_position: Decimal,
}

impl RiskRule for PositionBoundsRule {
    fn name(&self) -> &'static str {
        "position-bounds"
    }

    fn evaluate(&self, ctx: &RiskContext<'_>) -> Verdict {
        let size = ctx.opportunity.trade_size;
        if size >= self.min_position && size <= self.max_position {
            Verdict::Pass
        } else {
            Verdict::Drop(format!(
                "trade size {size} outside [{}, {}]",
                self.min_position, self.max_position
            ))
        }
    }
}

struct GasCeilingRule {
    /// Effective ceiling per network (network cap intersected with the
    /// global security cap), in gwei.
    ceilings: HashMap<NetworkId, Decimal>,
}

impl RiskRule for GasCeilingRule {
    fn name(&self) -> &'static str {
        "gas-ceiling"
    }

    fn evaluate(&self, ctx: &RiskContext<'_>) -> Verdict {
        let mut networks = vec![&ctx.opportunity.source_network];
        if ctx.opportunity.is_cross_network() {
            networks.push(&ctx.opportunity.target_network);
        }
        for network in networks {
            let Some(ceiling) = self.ceilings.get(network) else {
                return Verdict::Drop(format!("no gas ceiling configured for {network}"));
            };
            let Some(price) = ctx.gas_price_gwei.get(network) else {
                return Verdict::Drop(format!("gas price unavailable for {network}"));
            };
            if price > ceiling {
                return Verdict::Drop(format!(
                    "gas price {price} gwei above ceiling {ceiling} on {network}"
                ));
            }
        }
        Verdict::Pass
    }
}

struct CooldownRule {
    period_ns: u64,
}

impl RiskRule for CooldownRule {
    fn name(&self) -> &'static str {
        "cooldown"
    }

    fn evaluate(&self, ctx: &RiskContext<'_>) -> Verdict {
        match ctx.cooldowns.get(&ctx.opportunity.pair) {
            None => Verdict::Pass,
            Some(last_activity_ns) => {
                let elapsed = ctx.now_ns.saturating_sub(*last_activity_ns);
                // A window ending exactly now admits.
                if elapsed >= self.period_ns {
                    Verdict::Pass
                } else {
                    Verdict::Drop(format!(
                        "pair active {}ms ago, cooldown {}ms",
                        elapsed / time::NANOS_PER_MILLI,
                        self.period_ns / time::NANOS_PER_MILLI
                    ))
                }
            }
        }
    }
}

struct ConcurrencyRule {
    max_concurrent: usize,
}

impl RiskRule for ConcurrencyRule {
    fn name(&self) -> &'static str {
        "concurrency"
    }

    fn evaluate(&self, ctx: &RiskContext<'_>) -> Verdict {
        if ctx.in_flight < self.max_concurrent {
            Verdict::Pass
        } else {
            Verdict::Drop(format!(
                "{} executions in flight, cap {}",
                ctx.in_flight, self.max_concurrent
            ))
        }
    }
}

struct DailyLossRule {
    max_daily_loss: Decimal,
}

impl RiskRule for DailyLossRule {
    fn name(&self) -> &'static str {
        "daily-loss"
    }

    fn evaluate(&self, ctx: &RiskContext<'_>) -> Verdict {
        if ctx.daily_loss < self.max_daily_loss {
            Verdict::Pass
        } else {
            Verdict::Drop(format!(
                "daily loss {} at or above budget {}",
                ctx.daily_loss, self.max_daily_loss
            ))
        }
    }
}

struct EmergencyStopRule;

impl RiskRule for EmergencyStopRule {
    fn name(&self) -> &'static str {
        "emergency-stop"
    }

    fn evaluate(&self, ctx: &RiskContext<'_>) -> Verdict {
        if ctx.emergency_stopped {
            Verdict::Drop("emergency stop engaged".to_string())
        } else {
            Verdict::Pass
        }
    }
}

/// Ordered rule chain plus ranking.
pub struct RiskFilter {
    rules: Vec<Box<dyn RiskRule>>,
}

impl RiskFilter {
    /// The standard eight-rule chain.
    pub fn standard(config: &EngineConfig) -> Self {
        let ceilings = config
            .networks
            .iter()
            .map(|(id, network)| {
                let effective = network
                    .max_gas_price_gwei
                    .min(config.security.max_gas_price_gwei);
                (NetworkId::new(id.clone()), Decimal::from(effective))
            })
            .collect();

        let rules: Vec<Box<dyn RiskRule>> = vec![
            Box::new(ConfidenceRule { min_confidence: config.arbitrage.min_confidence }),
            Box::new(ProfitThresholdRule { min_profit_bps: config.arbitrage.min_profit_bps }),
            Box::new(PositionBoundsRule {
                min_position: config.arbitrage.min_position_size,
                max_position: config.arbitrage.max_position_size,
            }),
            Box::new(GasCeilingRule { ceilings }),
            Box::new(CooldownRule {
                period_ns: time::secs_to_ns(config.arbitrage.cooldown_period_secs),
            }),
            Box::new(ConcurrencyRule {
                max_concurrent: config.arbitrage.max_concurrent_arbitrages,
            }),
            Box::new(DailyLossRule { max_daily_loss: config.security.max_daily_loss }),
            Box::new(EmergencyStopRule),
        ];
        Self { rules }
    }

    /// A custom chain, for deployments that reorder or disable rules.
    pub fn with_rules(rules: Vec<Box<dyn RiskRule>>) -> Self {
        Self { rules }
    }

    /// Run the chain in order; the first failing rule wins.
    pub fn evaluate(&self, ctx: &RiskContext<'_>) -> Result<(), (&'static str, String)> {
        for rule in &self.rules {
            if let Verdict::Drop(reason) = rule.evaluate(ctx) {
                debug!(
                    opportunity = %ctx.opportunity.id,
                    rule = rule.name(),
                    %reason,
                    "opportunity dropped"
                );
                return Err((rule.name(), reason));
            }
        }
        Ok(())
    }

    /// Filter a detection batch and rank survivors by net profit descending,
    /// then confidence descending. Returns `(admitted, rejected)`.
    #[allow(clippy::too_many_arguments)]
    pub fn admit_batch(
        &self,
        candidates: Vec<Opportunity>,
        now_ns: u64,
        gas_price_gwei: &HashMap<NetworkId, Decimal>,
        cooldowns: &HashMap<PoolPair, u64>,
        in_flight: usize,
        daily_loss: Decimal,
        emergency_stopped: bool,
    ) -> (Vec<Opportunity>, Vec<(Opportunity, &'static str, String)>) {
        let mut admitted = Vec::new();
        let mut rejected = Vec::new();

        for opportunity in candidates {
            let ctx = RiskContext {
                opportunity: &opportunity,
                now_ns,
                gas_price_gwei,
                cooldowns,
                in_flight,
                daily_loss,
                emergency_stopped,
            };
            match self.evaluate(&ctx) {
                Ok(()) => admitted.push(opportunity),
                Err((rule, reason)) => rejected.push((opportunity, rule, reason)),
            }
        }

        admitted.sort_by(|a, b| {
            b.net_profit
                .cmp(&a.net_profit)
                .then(b.confidence.cmp(&a.confidence))
        });
        (admitted, rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{NetworkId, OpportunityId, OpportunityStatus, PoolId};

    fn opportunity(net_profit: Decimal, confidence: Decimal) -> Opportunity {
        Opportunity {
            id: OpportunityId(1),
            pair: PoolPair::new(PoolId::new("a"), PoolId::new("b")),
            source_network: NetworkId::new("polygon"),
            target_network: NetworkId::new("polygon"),
            direction_token: "CQT".to_string(),
            gross_edge_bps: dec!(130),
            trade_size: dec!(10000),
            paired_amount: dec!(950),
            est_gas_cost: dec!(1),
            est_bridge_cost: dec!(0),
            net_profit,
            confidence,
            detected_at_ns: 0,
            status: OpportunityStatus::Detected,
        }
    }

    fn test_config() -> EngineConfig {
        let toml = r#"
            [networks.polygon]
            rpc_url = "http://localhost"
            chain_id = 137
            confirmation_blocks = 12
            max_gas_price_gwei = 100
            native_symbol = "MATIC"

            [[pools]]
            id = "a"
            network_id = "polygon"
            address = "0x0000000000000000000000000000000000000001"
            token0 = "CQT"
            token1 = "WETH"
            fee_tier_bps = 30

            [[pools]]
            id = "b"
            network_id = "polygon"
            address = "0x0000000000000000000000000000000000000002"
            token0 = "CQT"
            token1 = "WMATIC"
            fee_tier_bps = 30
        "#;
        let config: EngineConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        config
    }

    struct Shared {
        gas: HashMap<NetworkId, Decimal>,
        cooldowns: HashMap<PoolPair, u64>,
    }

    fn shared() -> Shared {
        let mut gas = HashMap::new();
        gas.insert(NetworkId::new("polygon"), dec!(30));
        Shared { gas, cooldowns: HashMap::new() }
    }

    fn evaluate(
        filter: &RiskFilter,
        opp: &Opportunity,
        shared: &Shared,
        now_ns: u64,
        in_flight: usize,
        daily_loss: Decimal,
        stopped: bool,
    ) -> Result<(), (&'static str, String)> {
        filter.evaluate(&RiskContext {
            opportunity: opp,
            now_ns,
            gas_price_gwei: &shared.gas,
            cooldowns: &shared.cooldowns,
            in_flight,
            daily_loss,
            emergency_stopped: stopped,
        })
    }

    #[test]
    fn profit_exactly_at_threshold_is_admitted() {
        let filter = RiskFilter::standard(&test_config());
        let shared = shared();
        // 50 bps of 10_000 = 50
        let at_threshold = opportunity(dec!(50), dec!(0.9));
        assert!(evaluate(&filter, &at_threshold, &shared, 0, 0, dec!(0), false).is_ok());

        let just_below = opportunity(dec!(49.999), dec!(0.9));
        let (rule, _) =
            evaluate(&filter, &just_below, &shared, 0, 0, dec!(0), false).unwrap_err();
        assert_eq!(rule, "profit-threshold");
    }

    #[test]
    fn low_confidence_is_dropped_first() {
        let filter = RiskFilter::standard(&test_config());
        let shared = shared();
        let opp = opportunity(dec!(100), dec!(0.69));
        let (rule, _) = evaluate(&filter, &opp, &shared, 0, 0, dec!(0), false).unwrap_err();
        assert_eq!(rule, "confidence");

        // Exactly at the default minimum passes.
        let opp = opportunity(dec!(100), dec!(0.7));
        assert!(evaluate(&filter, &opp, &shared, 0, 0, dec!(0), false).is_ok());
    }

    #[test]
    fn cooldown_admits_at_exact_expiry() {
        let filter = RiskFilter::standard(&test_config());
        let mut shared = shared();
        let opp = opportunity(dec!(100), dec!(0.9));
        shared
            .cooldowns
            .insert(opp.pair.clone(), 0);

        let period = time::secs_to_ns(60);
        // 30 s in: dropped with the cooldown tag
        let (rule, _) =
            evaluate(&filter, &opp, &shared, period / 2, 0, dec!(0), false).unwrap_err();
        assert_eq!(rule, "cooldown");

        // Exactly at expiry: admitted
        assert!(evaluate(&filter, &opp, &shared, period, 0, dec!(0), false).is_ok());
    }

    #[test]
    fn concurrency_cap_is_strict() {
        let filter = RiskFilter::standard(&test_config());
        let shared = shared();
        let opp = opportunity(dec!(100), dec!(0.9));

        assert!(evaluate(&filter, &opp, &shared, 0, 2, dec!(0), false).is_ok());
        let (rule, _) = evaluate(&filter, &opp, &shared, 0, 3, dec!(0), false).unwrap_err();
        assert_eq!(rule, "concurrency");
    }

    #[test]
    fn gas_above_ceiling_is_dropped() {
        let filter = RiskFilter::standard(&test_config());
        let mut shared = shared();
        shared.gas.insert(NetworkId::new("polygon"), dec!(101));
        let opp = opportunity(dec!(100), dec!(0.9));
        let (rule, _) = evaluate(&filter, &opp, &shared, 0, 0, dec!(0), false).unwrap_err();
        assert_eq!(rule, "gas-ceiling");
    }

    #[test]
    fn daily_loss_budget_stops_admission() {
        let filter = RiskFilter::standard(&test_config());
        let shared = shared();
        let opp = opportunity(dec!(100), dec!(0.9));
        let (rule, _) =
            evaluate(&filter, &opp, &shared, 0, 0, dec!(1000), false).unwrap_err();
        assert_eq!(rule, "daily-loss");
    }

    #[test]
    fn emergency_stop_rejects_everything() {
        let filter = RiskFilter::standard(&test_config());
        let shared = shared();
        let opp = opportunity(dec!(100), dec!(0.9));
        let (rule, _) = evaluate(&filter, &opp, &shared, 0, 0, dec!(0), true).unwrap_err();
        assert_eq!(rule, "emergency-stop");
    }

    #[test]
    fn admitted_batch_is_ranked_by_net_then_confidence() {
        let filter = RiskFilter::standard(&test_config());
        let shared = shared();

        let mut low = opportunity(dec!(60), dec!(0.8));
        low.id = OpportunityId(1);
        let mut high = opportunity(dec!(200), dec!(0.8));
        high.id = OpportunityId(2);
        let mut high_confident = opportunity(dec!(200), dec!(0.95));
        high_confident.id = OpportunityId(3);

        let (admitted, rejected) = filter.admit_batch(
            vec![low, high, high_confident],
            0,
            &shared.gas,
            &shared.cooldowns,
            0,
            dec!(0),
            false,
        );
        assert!(rejected.is_empty());
        let ids: Vec<u64> = admitted.iter().map(|o| o.id.0).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}
