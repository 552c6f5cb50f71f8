//! Market-data types: pool observations, price snapshots, gas estimates and
//! network health.

use crate::identifiers::{NetworkId, PoolId, TxHash};
use crate::price::{PoolPrice, PriceError, RawPrice, QUOTE_SCALE};
use ethers::types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Venue style of a pool: classic constant-product reserves or concentrated
/// liquidity with a Q64.96 sqrt price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PoolProtocol {
    #[default]
    V2,
    V3,
}

/// One raw pool read as returned by a [`ChainGateway`] `read_pool_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolObservation {
    pub raw_price: RawPrice,
    /// Depth figure for the pool: concentrated liquidity `L` for sqrt-price
    /// pools, the token0 reserve for reserve-pair pools.
    pub liquidity: Decimal,
    pub block_number: u64,
}

/// A decoded, timestamped pool price published by the monitor.
///
/// Reserve figures are the actual pair reserves for constant-product pools
/// and virtual reserves (`x = L / sqrtP`, `y = L * sqrtP`) for concentrated
/// pools, so downstream swap math is uniform across venue styles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub pool_id: PoolId,
    pub price: PoolPrice,
    pub reserve0: Decimal,
    pub reserve1: Decimal,
    pub liquidity: Decimal,
    pub block_number: u64,
    pub observed_at_ns: u64,
}

impl PriceSnapshot {
    /// Build a snapshot from a raw observation, deriving reserves.
    pub fn from_observation(
        pool_id: PoolId,
        observation: PoolObservation,
        observed_at_ns: u64,
    ) -> Result<Self, PriceError> {
        let price = PoolPrice::decode(observation.raw_price.clone())?;
        let (reserve0, reserve1) = match &observation.raw_price {
            RawPrice::Reserves { reserve0, reserve1 } => (*reserve0, *reserve1),
            RawPrice::SqrtPriceX96 { sqrt_price_x96 } => {
                let sqrt_ratio = sqrt_ratio_decimal(*sqrt_price_x96)?;
                if sqrt_ratio.is_zero() {
                    return Err(PriceError::ZeroPrice);
                }
                (
                    observation.liquidity / sqrt_ratio,
                    observation.liquidity * sqrt_ratio,
                )
            }
        };
        Ok(Self {
            pool_id,
            price,
            reserve0,
            reserve1,
            liquidity: observation.liquidity,
            block_number: observation.block_number,
            observed_at_ns,
        })
    }

    /// Snapshot age relative to `now_ns`, saturating at zero.
    pub fn age_ns(&self, now_ns: u64) -> u64 {
        now_ns.saturating_sub(self.observed_at_ns)
    }
}

/// sqrt(price) as a Decimal: `sqrt_price_x96 * 10^18 >> 96`.
fn sqrt_ratio_decimal(sqrt_price_x96: u128) -> Result<Decimal, PriceError> {
    let scaled = U256::from(sqrt_price_x96)
        .checked_mul(U256::from(10u128.pow(QUOTE_SCALE)))
        .ok_or(PriceError::QuoteOverflow)?;
    let shifted = scaled >> 96;
    const MAX_MANTISSA: u128 = (1u128 << 96) - 1;
    if shifted > U256::from(MAX_MANTISSA) {
        return Err(PriceError::QuoteOverflow);
    }
    Ok(Decimal::from_i128_with_scale(
        shifted.as_u128() as i128,
        QUOTE_SCALE,
    ))
}

/// Gas estimate for a prospective transaction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GasEstimate {
    pub units: u64,
    /// Price per gas unit in wei.
    pub price_per_unit_wei: u128,
}

impl GasEstimate {
    /// Total cost in wei.
    pub fn total_wei(&self) -> u128 {
        self.price_per_unit_wei.saturating_mul(self.units as u128)
    }

    /// Price per unit in gwei, for ceiling comparisons against config.
    pub fn price_gwei(&self) -> Decimal {
        let wei = self.price_per_unit_wei.min(u64::MAX as u128) as u64;
        Decimal::from(wei) / Decimal::from(1_000_000_000u64)
    }
}

/// Confirmed transaction receipt as seen by a gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub gas_used: u64,
    pub success: bool,
    /// Net token delta realized by the transaction, when derivable from logs.
    pub token_delta: Option<Decimal>,
}

/// Health of a network's RPC endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkHealth {
    Healthy,
    /// All endpoints failed; submissions are suspended until a probe succeeds.
    Degraded,
}

impl NetworkHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, NetworkHealth::Healthy)
    }
}

/// Marker pairing a network with its health, for status snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub network: NetworkId,
    pub health: NetworkHealth,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn reserve_observation_keeps_reserves() {
        let snapshot = PriceSnapshot::from_observation(
            PoolId::new("p"),
            PoolObservation {
                raw_price: RawPrice::Reserves {
                    reserve0: dec!(1000),
                    reserve1: dec!(1790),
                },
                liquidity: dec!(1000),
                block_number: 77,
            },
            5_000,
        )
        .unwrap();
        assert_eq!(snapshot.reserve0, dec!(1000));
        assert_eq!(snapshot.reserve1, dec!(1790));
        assert_eq!(snapshot.price.token1_per_token0(), dec!(1.79));
    }

    #[test]
    fn sqrt_observation_derives_virtual_reserves() {
        // Unit price: virtual reserves equal L on both sides.
        let snapshot = PriceSnapshot::from_observation(
            PoolId::new("p"),
            PoolObservation {
                raw_price: RawPrice::SqrtPriceX96 {
                    sqrt_price_x96: 1 << 96,
                },
                liquidity: dec!(50000),
                block_number: 1,
            },
            0,
        )
        .unwrap();
        assert_eq!(snapshot.reserve0, dec!(50000));
        assert_eq!(snapshot.reserve1, dec!(50000));
    }

    #[test]
    fn age_saturates_at_zero() {
        let snapshot = PriceSnapshot::from_observation(
            PoolId::new("p"),
            PoolObservation {
                raw_price: RawPrice::Reserves {
                    reserve0: dec!(1),
                    reserve1: dec!(1),
                },
                liquidity: dec!(1),
                block_number: 0,
            },
            1_000_000,
        )
        .unwrap();
        assert_eq!(snapshot.age_ns(500_000), 0);
        assert_eq!(snapshot.age_ns(1_500_000), 500_000);
    }

    #[test]
    fn gas_estimate_totals() {
        let estimate = GasEstimate {
            units: 200_000,
            price_per_unit_wei: 30_000_000_000,
        };
        assert_eq!(estimate.total_wei(), 6_000_000_000_000_000);
        assert_eq!(estimate.price_gwei(), dec!(30));
    }
}
