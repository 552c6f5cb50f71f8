//! # Pool Monitor & Price Oracle
//!
//! One polling task per enabled pool reads state through that pool's chain
//! gateway at a fixed cadence and publishes decoded [`PriceSnapshot`]s. The
//! oracle aggregates them into the consistent view the detector consumes:
//! latest snapshot per pool behind an atomic pointer swap, a bounded history
//! ring, and staleness metadata with exact boundary semantics (a snapshot
//! aged exactly at the threshold is still fresh).
//!
//! Polls are independent across pools; an RPC failure logs and waits for the
//! next tick; the monitor never crashes the engine.

mod monitor;
mod oracle;

pub use monitor::{spawn_pool_monitor, MonitorHandle};
pub use oracle::PriceOracle;
