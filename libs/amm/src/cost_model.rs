//! Execution cost model.
//!
//! Converts a sized trade into the cost side of the net-profit equation:
//! gas for each swap leg, bridge fees for cross-network legs, and the
//! slippage buffer. All figures are in subject-token units; callers convert
//! native gas costs before handing them in.
//!
//! net_profit = gross_profit − gas − bridge − slippage_buffer

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Cost breakdown for one candidate trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeCosts {
    pub gas_cost: Decimal,
    pub bridge_cost: Decimal,
    pub slippage_buffer: Decimal,
}

impl TradeCosts {
    pub fn total(&self) -> Decimal {
        self.gas_cost + self.bridge_cost + self.slippage_buffer
    }
}

/// Bridge fee schedule and slippage buffer, from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Flat bridge fee per transfer, subject-token units.
    pub bridge_flat_fee: Decimal,
    /// Proportional bridge fee on the bridged notional.
    pub bridge_pct_fee: Decimal,
    /// Slippage buffer reserved against adverse movement, in bps of notional.
    pub slippage_buffer_bps: u32,
}

impl CostModel {
    /// Costs for a same-network round trip: two swap legs, no bridge.
    pub fn intra_network(&self, gas_cost_per_swap: Decimal, notional: Decimal) -> TradeCosts {
        TradeCosts {
            gas_cost: gas_cost_per_swap * dec!(2),
            bridge_cost: Decimal::ZERO,
            slippage_buffer: self.slippage_buffer(notional),
        }
    }

    /// Costs for a cross-network round trip: a swap on each network plus the
    /// bridge's flat and proportional fees on the bridged notional.
    pub fn cross_network(
        &self,
        source_gas_cost_per_swap: Decimal,
        target_gas_cost_per_swap: Decimal,
        notional: Decimal,
    ) -> TradeCosts {
        TradeCosts {
            gas_cost: source_gas_cost_per_swap + target_gas_cost_per_swap,
            bridge_cost: self.bridge_flat_fee + self.bridge_pct_fee * notional,
            slippage_buffer: self.slippage_buffer(notional),
        }
    }

    fn slippage_buffer(&self, notional: Decimal) -> Decimal {
        notional * Decimal::from(self.slippage_buffer_bps) / dec!(10000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> CostModel {
        CostModel {
            bridge_flat_fee: dec!(5),
            bridge_pct_fee: dec!(0.001),
            slippage_buffer_bps: 50,
        }
    }

    #[test]
    fn intra_network_doubles_swap_gas() {
        let costs = model().intra_network(dec!(2), dec!(10000));
        assert_eq!(costs.gas_cost, dec!(4));
        assert_eq!(costs.bridge_cost, dec!(0));
        assert_eq!(costs.slippage_buffer, dec!(50));
        assert_eq!(costs.total(), dec!(54));
    }

    #[test]
    fn cross_network_adds_bridge_fees() {
        let costs = model().cross_network(dec!(2), dec!(3), dec!(5000));
        assert_eq!(costs.gas_cost, dec!(5));
        // 5 flat + 0.1% of 5000
        assert_eq!(costs.bridge_cost, dec!(10));
        assert_eq!(costs.slippage_buffer, dec!(25));
    }
}
