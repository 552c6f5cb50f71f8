//! Constant-product AMM math with exact calculations
//!
//! Preserves full precision using Decimal type for accurate slippage
//! and optimal position sizing calculations.

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Pool reserves and fee structure, oriented for one swap direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapPool {
    pub reserve_in: Decimal,
    pub reserve_out: Decimal,
    pub fee_bps: u32, // Fee in basis points (30 = 0.3%)
}

impl SwapPool {
    /// The same pool oriented for the opposite swap direction.
    pub fn reversed(&self) -> Self {
        Self {
            reserve_in: self.reserve_out,
            reserve_out: self.reserve_in,
            fee_bps: self.fee_bps,
        }
    }
}

/// Constant-product swap functions with zero precision loss
pub struct SwapMath;

impl SwapMath {
    /// Calculate exact output amount using the x*y=k formula.
    ///
    /// # Arguments
    /// * `amount_in` - Input token amount (in token decimals)
    /// * `pool` - Reserves oriented input -> output, with fee in bps
    ///
    /// # Returns
    /// Exact output amount after fees and slippage
    pub fn output_amount(amount_in: Decimal, pool: &SwapPool) -> Result<Decimal> {
        if amount_in <= dec!(0) {
            bail!("Input amount must be positive");
        }
        if pool.reserve_in <= dec!(0) || pool.reserve_out <= dec!(0) {
            bail!("Reserves must be positive");
        }

        // Apply fee: amount_in_after_fee = amount_in * (10000 - fee_bps) / 10000
        let fee_multiplier = Decimal::from(10_000 - pool.fee_bps) / dec!(10000);
        let amount_in_after_fee = amount_in * fee_multiplier;

        let numerator = amount_in_after_fee * pool.reserve_out;
        let denominator = pool.reserve_in + amount_in_after_fee;

        if denominator <= dec!(0) {
            bail!("Invalid calculation: denominator would be zero");
        }

        Ok(numerator / denominator)
    }

    /// Calculate required input amount for a desired output (reverse calculation).
    pub fn required_input(amount_out: Decimal, pool: &SwapPool) -> Result<Decimal> {
        if amount_out <= dec!(0) {
            bail!("Output amount must be positive");
        }
        if amount_out >= pool.reserve_out {
            bail!("Insufficient liquidity: output exceeds reserves");
        }

        let numerator = pool.reserve_in * amount_out * dec!(10000);
        let denominator = (pool.reserve_out - amount_out) * Decimal::from(10_000 - pool.fee_bps);

        if denominator <= dec!(0) {
            bail!("Invalid calculation: denominator would be zero");
        }

        // Round up so the input is always sufficient
        Ok((numerator / denominator) + dec!(1))
    }

    /// Slippage for a given trade size: the shortfall between the
    /// infinite-liquidity output and the actual output, as a percentage.
    pub fn slippage(amount_in: Decimal, pool: &SwapPool) -> Result<Decimal> {
        let ideal_rate = pool.reserve_out / pool.reserve_in;
        let ideal_output = amount_in * ideal_rate;

        let actual_output = Self::output_amount(amount_in, pool)?;

        Ok((ideal_output - actual_output) / ideal_output * dec!(100))
    }
}
