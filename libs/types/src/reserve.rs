//! Liquidity-reserve accounting entries (BLP).

use crate::identifiers::PoolId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-pool reserve balance earmarked for liquidity injection.
///
/// The balance is an accounting figure equal to the algebraic sum of ledger
/// events touching the pool; it never goes negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveEntry {
    pub pool_id: PoolId,
    pub balance: Decimal,
    pub last_injection_at_ns: Option<u64>,
}

impl ReserveEntry {
    pub fn new(pool_id: PoolId) -> Self {
        Self { pool_id, balance: Decimal::ZERO, last_injection_at_ns: None }
    }
}
