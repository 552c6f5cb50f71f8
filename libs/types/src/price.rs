//! Pool price codec.
//!
//! Uniswap-style pools quote price as `sqrtPriceX96`, a Q64.96 fixed-point
//! square root; V2-style pools expose a reserve pair. Both decode into an
//! exact `Decimal` quote of token1-per-token0. The raw encoding is retained
//! alongside the quote so that re-encoding a decoded price is the identity:
//! no precision is lost round-tripping through the engine.
//!
//! Squaring a Q64.96 value overflows both `u128` and `Decimal`'s 96-bit
//! mantissa, so the decode path widens through 256/512-bit integers and only
//! narrows once the result is scaled to 18 decimal places.

use ethers::types::{U256, U512};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decimal places carried by a decoded quote.
pub const QUOTE_SCALE: u32 = 18;

const Q96_BITS: usize = 96;

#[derive(Debug, Error, PartialEq)]
pub enum PriceError {
    #[error("sqrt price is zero")]
    ZeroPrice,

    #[error("pool reserves must be positive, got {reserve0} / {reserve1}")]
    NonPositiveReserves { reserve0: Decimal, reserve1: Decimal },

    #[error("decoded quote does not fit a 96-bit mantissa at scale {QUOTE_SCALE}")]
    QuoteOverflow,

    #[error("quote {0} cannot be encoded as a Q64.96 sqrt price")]
    Unencodable(Decimal),
}

/// Raw on-chain price representation, kept verbatim from the pool read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum RawPrice {
    SqrtPriceX96 { sqrt_price_x96: u128 },
    Reserves { reserve0: Decimal, reserve1: Decimal },
}

/// A decoded pool price: the raw encoding plus its exact decimal quote.
///
/// `encode` returns the retained raw value, so
/// `PoolPrice::decode(p.encode())` reproduces `p` bit-for-bit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolPrice {
    raw: RawPrice,
    /// token1 per token0, truncated to [`QUOTE_SCALE`] decimal places.
    quote: Decimal,
}

impl PoolPrice {
    /// Decode a raw pool price into an exact decimal quote.
    pub fn decode(raw: RawPrice) -> Result<Self, PriceError> {
        let quote = match &raw {
            RawPrice::SqrtPriceX96 { sqrt_price_x96 } => {
                decode_sqrt_price_x96(*sqrt_price_x96)?
            }
            RawPrice::Reserves { reserve0, reserve1 } => {
                if *reserve0 <= Decimal::ZERO || *reserve1 <= Decimal::ZERO {
                    return Err(PriceError::NonPositiveReserves {
                        reserve0: *reserve0,
                        reserve1: *reserve1,
                    });
                }
                reserve1 / reserve0
            }
        };
        Ok(Self { raw, quote })
    }

    /// The raw encoding this price was decoded from.
    pub fn encode(&self) -> RawPrice {
        self.raw.clone()
    }

    /// token1 per token0.
    pub fn token1_per_token0(&self) -> Decimal {
        self.quote
    }

    /// token0 per token1.
    pub fn token0_per_token1(&self) -> Result<Decimal, PriceError> {
        if self.quote.is_zero() {
            return Err(PriceError::ZeroPrice);
        }
        Ok(Decimal::ONE / self.quote)
    }
}

/// Decode a Q64.96 sqrt price into token1-per-token0 at [`QUOTE_SCALE`].
///
/// price = (sqrt / 2^96)^2 = sqrt^2 / 2^192, computed as
/// `sqrt^2 * 10^18 >> 192` in 512-bit arithmetic.
pub fn decode_sqrt_price_x96(sqrt_price_x96: u128) -> Result<Decimal, PriceError> {
    if sqrt_price_x96 == 0 {
        return Err(PriceError::ZeroPrice);
    }

    let sqrt = U256::from(sqrt_price_x96);
    let squared: U512 = sqrt.full_mul(sqrt);
    let scaled = squared
        .checked_mul(U512::from(10u128.pow(QUOTE_SCALE)))
        .ok_or(PriceError::QuoteOverflow)?;
    let shifted = scaled >> (2 * Q96_BITS);

    // Decimal mantissas are 96 bits wide.
    const MAX_MANTISSA: u128 = (1u128 << 96) - 1;
    if shifted > U512::from(MAX_MANTISSA) {
        return Err(PriceError::QuoteOverflow);
    }
    let mantissa = shifted.as_u128() as i128;
    Ok(Decimal::from_i128_with_scale(mantissa, QUOTE_SCALE))
}

/// Encode a decimal token1-per-token0 quote as a Q64.96 sqrt price.
///
/// Inverse of [`decode_sqrt_price_x96`] up to the codec's precision; used to
/// fabricate pool observations in tests and simulations, never to round-trip
/// live prices (those keep their raw encoding, see [`PoolPrice`]).
pub fn encode_sqrt_price_x96(quote: Decimal) -> Result<u128, PriceError> {
    if quote <= Decimal::ZERO {
        return Err(PriceError::Unencodable(quote));
    }

    // sqrt_price_x96 = isqrt(quote * 2^192), with quote = mantissa / 10^scale.
    let mantissa = U512::from(quote.mantissa().unsigned_abs());
    let numerator = mantissa
        .checked_mul(U512::one() << (2 * Q96_BITS))
        .ok_or(PriceError::Unencodable(quote))?;
    let ratio = numerator / U512::from(10u128.pow(quote.scale()));
    let sqrt = ratio.integer_sqrt();

    if sqrt > U512::from(u128::MAX) {
        return Err(PriceError::Unencodable(quote));
    }
    Ok(sqrt.as_u128())
}
