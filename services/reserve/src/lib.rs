//! # Reserve Manager - Built-in Liquidity Provider
//!
//! ## Purpose
//!
//! Recycles a configured share of realized arbitrage profit, external
//! fund-source deposits and reclaimed bridge assets into per-pool reserves,
//! then periodically injects paired liquidity back into the monitored pools.
//! Injection is deliberately conservative: one pool per tick (the highest
//! configured priority), notional capped at a fraction of pool liquidity,
//! and the reserve is only touched after on-chain confirmation.
//!
//! The executor and this manager share no mutable state: profit arrives as
//! messages, and both sides write only to the ledger.

pub mod fund;
pub mod manager;

pub use fund::FundSource;
pub use manager::ReserveManager;
