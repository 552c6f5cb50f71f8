//! Deterministic in-memory gateway for tests and simulation runs.
//!
//! Mines submissions instantly, serves scripted pool states and token
//! deltas, and exposes failure toggles so the failure paths of every
//! consumer (monitor retry, executor revert handling, probe recovery) can be
//! driven without a network.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use types::{
    Address, GasEstimate, NetworkHealth, NetworkId, PoolObservation, Receipt, TxHash,
};

use crate::error::GatewayError;
use crate::tx::{TxCall, TxRequest};
use crate::ChainGateway;

pub struct MockGateway {
    network: NetworkId,
    health: RwLock<NetworkHealth>,
    fail_rpc: RwLock<bool>,
    pools: DashMap<Address, PoolObservation>,
    receipts: DashMap<TxHash, Receipt>,
    stalled: DashMap<TxHash, ()>,
    submitted: Mutex<Vec<TxRequest>>,
    scripted_deltas: Mutex<VecDeque<Decimal>>,
    revert_next: RwLock<bool>,
    stall_next: RwLock<bool>,
    gas_price_gwei: RwLock<u64>,
    block: AtomicU64,
    next_tx: AtomicU64,
    confirmation_timeout: Duration,
    confirmation_delay: RwLock<Duration>,
}

impl MockGateway {
    pub fn new(network: NetworkId) -> Self {
        Self {
            network,
            health: RwLock::new(NetworkHealth::Healthy),
            fail_rpc: RwLock::new(false),
            pools: DashMap::new(),
            receipts: DashMap::new(),
            stalled: DashMap::new(),
            submitted: Mutex::new(Vec::new()),
            scripted_deltas: Mutex::new(VecDeque::new()),
            revert_next: RwLock::new(false),
            stall_next: RwLock::new(false),
            gas_price_gwei: RwLock::new(30),
            block: AtomicU64::new(1_000),
            next_tx: AtomicU64::new(1),
            confirmation_timeout: Duration::from_secs(120),
            confirmation_delay: RwLock::new(Duration::ZERO),
        }
    }

    pub fn set_pool(&self, address: Address, observation: PoolObservation) {
        self.pools.insert(address, observation);
    }

    pub fn set_health(&self, health: NetworkHealth) {
        *self.health.write() = health;
    }

    /// Make every RPC-backed call fail until reset.
    pub fn fail_rpc(&self, fail: bool) {
        *self.fail_rpc.write() = fail;
    }

    /// The next submitted transaction reverts on-chain.
    pub fn revert_next(&self) {
        *self.revert_next.write() = true;
    }

    /// The next submitted transaction never confirms.
    pub fn stall_next(&self) {
        *self.stall_next.write() = true;
    }

    pub fn set_gas_price_gwei(&self, gwei: u64) {
        *self.gas_price_gwei.write() = gwei;
    }

    /// Make every confirmation take this long, so tests can hold executions
    /// in flight.
    pub fn set_confirmation_delay(&self, delay: Duration) {
        *self.confirmation_delay.write() = delay;
    }

    /// Queue token deltas attached to upcoming swap receipts, in order.
    pub fn script_token_deltas(&self, deltas: impl IntoIterator<Item = Decimal>) {
        self.scripted_deltas.lock().extend(deltas);
    }

    pub fn submitted_requests(&self) -> Vec<TxRequest> {
        self.submitted.lock().clone()
    }

    pub fn advance_block(&self, by: u64) {
        self.block.fetch_add(by, Ordering::Relaxed);
    }

    fn check_rpc(&self) -> Result<(), GatewayError> {
        if *self.fail_rpc.read() {
            *self.health.write() = NetworkHealth::Degraded;
            return Err(GatewayError::TransientRpc {
                network: self.network.to_string(),
                message: "scripted failure".to_string(),
            });
        }
        *self.health.write() = NetworkHealth::Healthy;
        Ok(())
    }
}

#[async_trait]
impl ChainGateway for MockGateway {
    fn network(&self) -> &NetworkId {
        &self.network
    }

    async fn read_pool_state(&self, pool: Address) -> Result<PoolObservation, GatewayError> {
        self.check_rpc()?;
        self.pools
            .get(&pool)
            .map(|entry| entry.clone())
            .ok_or(GatewayError::PoolNotFound(pool))
    }

    async fn estimate_gas(&self, tx: &TxRequest) -> Result<GasEstimate, GatewayError> {
        self.check_rpc()?;
        Ok(GasEstimate {
            units: tx.gas_limit.max(21_000),
            price_per_unit_wei: *self.gas_price_gwei.read() as u128 * 1_000_000_000,
        })
    }

    async fn submit(&self, tx: TxRequest) -> Result<TxHash, GatewayError> {
        self.check_rpc()?;

        let id = self.next_tx.fetch_add(1, Ordering::Relaxed);
        let mut hash_bytes = [0u8; 32];
        hash_bytes[..8].copy_from_slice(&id.to_be_bytes());
        let tx_hash = TxHash(hash_bytes);

        let is_swap = matches!(tx.call, TxCall::Swap { .. });
        self.submitted.lock().push(tx);

        if std::mem::take(&mut *self.stall_next.write()) {
            self.stalled.insert(tx_hash, ());
            return Ok(tx_hash);
        }

        let success = !std::mem::take(&mut *self.revert_next.write());
        let token_delta = if is_swap && success {
            self.scripted_deltas.lock().pop_front()
        } else {
            None
        };

        let block_number = self.block.fetch_add(1, Ordering::Relaxed);
        self.receipts.insert(
            tx_hash,
            Receipt {
                tx_hash,
                block_number,
                gas_used: 210_000,
                success,
                token_delta,
            },
        );
        Ok(tx_hash)
    }

    async fn await_confirmation(
        &self,
        tx_hash: TxHash,
        _depth: u64,
    ) -> Result<Receipt, GatewayError> {
        let delay = *self.confirmation_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let deadline = tokio::time::Instant::now() + self.confirmation_timeout;
        loop {
            self.check_rpc()?;
            if let Some(receipt) = self.receipts.get(&tx_hash) {
                return Ok(receipt.clone());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(GatewayError::Timeout {
                    operation: format!("confirmation of {tx_hash}"),
                    seconds: self.confirmation_timeout.as_secs(),
                });
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn block_number(&self) -> Result<u64, GatewayError> {
        self.check_rpc()?;
        Ok(self.block.load(Ordering::Relaxed))
    }

    async fn gas_price_wei(&self) -> Result<u128, GatewayError> {
        self.check_rpc()?;
        Ok(*self.gas_price_gwei.read() as u128 * 1_000_000_000)
    }

    fn health(&self) -> NetworkHealth {
        *self.health.read()
    }
}
