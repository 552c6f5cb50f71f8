//! # CQT AMM Library - Exact Constant-Product Mathematics
//!
//! ## Purpose
//!
//! Mathematical foundation for the arbitrage engine: exact constant-product
//! swap formulas with fee handling, slippage modeling, optimal trade sizing
//! by bounded ternary search, and the cross-chain cost model (gas legs plus
//! bridge fees). Zero precision loss: every quantity is `Decimal`, never a
//! float.
//!
//! ## Integration Points
//!
//! - **Input Sources**: Price snapshots from the oracle, sizing bounds from
//!   configuration, gas figures from the chain gateways
//! - **Output Destinations**: The opportunity detector and risk filter
//! - **Precision**: Native token precision preservation via `rust_decimal`
//! - **Validation**: Bounds checking on every formula input
//!
//! ## Architecture Role
//!
//! The library is pure computation: no I/O, no clocks, no suspension points.
//! Everything here is safe to call from the detector's hot path.

pub mod cost_model;
pub mod optimal_size;
pub mod swap_math;

pub use cost_model::{CostModel, TradeCosts};
pub use optimal_size::{OptimalSizer, SizedTrade, SizingBounds};
pub use swap_math::{SwapMath, SwapPool};

/// Common types for AMM calculations
pub use rust_decimal::Decimal;
pub use rust_decimal_macros::dec;
