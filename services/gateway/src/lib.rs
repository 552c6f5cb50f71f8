//! # Chain Gateway - Per-Network RPC Facade
//!
//! ## Purpose
//!
//! One gateway instance per configured network encapsulates everything the
//! engine asks of a blockchain: pool state reads, gas estimation, signed
//! transaction submission and confirmation tracking. The production
//! implementation wraps a primary HTTP JSON-RPC endpoint with an ordered
//! list of backups and a strict failover discipline; the rest of the engine
//! only ever sees the [`ChainGateway`] trait.
//!
//! ## Failover policy
//!
//! A transient RPC failure rotates to the next endpoint exactly once per
//! call; a second failure is terminal for that call. When every endpoint has
//! failed the gateway marks the network degraded and the executor suspends
//! submissions until the background health probe sees a successful call.
//!
//! ## Integration Points
//!
//! - **Consumers**: pool monitor (reads), detector (gas figures), executor
//!   (submission + confirmation), reserve manager (injections)
//! - **Signing**: delegated to the external [`TransactionSigner`]
//!   collaborator; key storage never enters this crate

pub mod error;
pub mod gas;
pub mod mock;
pub mod probe;
pub mod rpc;
pub mod tx;

pub use error::GatewayError;
pub use gas::GasPriceCache;
pub use mock::MockGateway;
pub use probe::spawn_health_probe;
pub use rpc::RpcGateway;
pub use tx::{encode_call, to_base_units, TransactionSigner, TxCall, TxRequest};

use async_trait::async_trait;
use types::{Address, GasEstimate, NetworkHealth, NetworkId, PoolObservation, Receipt, TxHash};

/// Per-network facade to blockchain RPC.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    fn network(&self) -> &NetworkId;

    /// Read current pool state with a single static call.
    async fn read_pool_state(&self, pool: Address) -> Result<PoolObservation, GatewayError>;

    /// Expected gas cost for a prospective transaction.
    async fn estimate_gas(&self, tx: &TxRequest) -> Result<GasEstimate, GatewayError>;

    /// Submit a transaction; returns as soon as the mempool accepts it.
    async fn submit(&self, tx: TxRequest) -> Result<TxHash, GatewayError>;

    /// Suspend until the transaction sits `depth` blocks below the head.
    async fn await_confirmation(&self, tx_hash: TxHash, depth: u64)
        -> Result<Receipt, GatewayError>;

    /// Current chain head.
    async fn block_number(&self) -> Result<u64, GatewayError>;

    /// Current gas price in wei, served from the gateway's short-TTL cache
    /// where available.
    async fn gas_price_wei(&self) -> Result<u128, GatewayError>;

    /// Current health as maintained by failover bookkeeping and the probe.
    fn health(&self) -> NetworkHealth;
}
