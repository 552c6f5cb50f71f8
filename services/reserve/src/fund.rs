//! Fund-source seam.
//!
//! The miner/staking subsystem is an external collaborator that occasionally
//! produces deposits. The engine only sees this trait; a deployment without
//! the miner simply wires no source.

use async_trait::async_trait;
use rust_decimal::Decimal;
use types::PoolId;

/// External producer of occasional reserve deposits.
#[async_trait]
pub trait FundSource: Send {
    /// The next deposit, or `None` when the source is exhausted.
    async fn next_deposit(&mut self) -> Option<(PoolId, Decimal)>;
}
