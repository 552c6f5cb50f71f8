//! Production gateway over ethers HTTP providers.
//!
//! One pooled HTTP client feeds every provider (primary and backups); the
//! failover discipline is one rotation per call, after which the network is
//! marked degraded until the probe restores it.

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Bytes, TransactionRequest, H160, H256, U256};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use url::Url;

use config::{NetworkConfig, PoolConfig};
use types::{
    Address, GasEstimate, NetworkHealth, NetworkId, PoolObservation, PoolProtocol, RawPrice,
    Receipt, TxHash, time,
};

use crate::error::GatewayError;
use crate::gas::GasPriceCache;
use crate::tx::{encode_call, TransactionSigner, TxRequest};
use crate::ChainGateway;

/// Pool metadata the gateway needs to decode reads and encode calls.
#[derive(Debug, Clone)]
struct PoolMeta {
    protocol: PoolProtocol,
    token0_decimals: u32,
    token1_decimals: u32,
}

/// `getReserves()` on constant-product pairs.
const SELECTOR_GET_RESERVES: [u8; 4] = [0x09, 0x02, 0xf1, 0xac];
/// `slot0()` on concentrated-liquidity pools.
const SELECTOR_SLOT0: [u8; 4] = [0x38, 0x50, 0xc7, 0xbd];
/// `liquidity()` on concentrated-liquidity pools.
const SELECTOR_LIQUIDITY: [u8; 4] = [0x1a, 0x68, 0x65, 0x02];

pub struct RpcGateway {
    network: NetworkId,
    providers: Vec<Arc<Provider<Http>>>,
    active: AtomicUsize,
    health: RwLock<NetworkHealth>,
    gas_cache: GasPriceCache,
    pools: HashMap<Address, PoolMeta>,
    signer: Arc<dyn TransactionSigner>,
    rpc_timeout: Duration,
    confirmation_timeout: Duration,
    block_time: Duration,
}

impl RpcGateway {
    pub fn new(
        network: NetworkId,
        network_config: &NetworkConfig,
        pool_configs: &[PoolConfig],
        signer: Arc<dyn TransactionSigner>,
        rpc_timeout_secs: u64,
        confirmation_timeout_secs: u64,
    ) -> Result<Self, GatewayError> {
        // Pooled client shared across every endpoint, tuned the same way as
        // the strategy services' RPC paths.
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(rpc_timeout_secs.max(1) * 3))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| GatewayError::PermanentRpc {
                network: network.to_string(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let mut providers = Vec::new();
        for raw_url in std::iter::once(&network_config.rpc_url)
            .chain(network_config.backup_rpc_urls.iter())
        {
            let url: Url = raw_url.parse().map_err(|e| GatewayError::PermanentRpc {
                network: network.to_string(),
                message: format!("invalid RPC URL {raw_url}: {e}"),
            })?;
            let transport = Http::new_with_client(url, client.clone());
            providers.push(Arc::new(Provider::new(transport)));
        }

        let pools = pool_configs
            .iter()
            .filter(|p| p.network_id == network)
            .map(|p| {
                (
                    p.address,
                    PoolMeta {
                        protocol: p.protocol,
                        token0_decimals: p.token0_decimals,
                        token1_decimals: p.token1_decimals,
                    },
                )
            })
            .collect();

        info!(
            network = %network,
            endpoints = providers.len(),
            "chain gateway initialized"
        );

        Ok(Self {
            network,
            providers,
            active: AtomicUsize::new(0),
            health: RwLock::new(NetworkHealth::Healthy),
            gas_cache: GasPriceCache::default(),
            pools,
            signer,
            rpc_timeout: Duration::from_secs(rpc_timeout_secs),
            confirmation_timeout: Duration::from_secs(confirmation_timeout_secs),
            block_time: Duration::from_secs(network_config.block_time_secs.max(1)),
        })
    }

    /// Run one RPC operation with the failover discipline: the active
    /// endpoint, then exactly one rotation, then terminal failure.
    async fn call_with_failover<T, F, Fut>(
        &self,
        operation: &str,
        mut call: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut(Arc<Provider<Http>>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let endpoint_count = self.providers.len();
        let mut last_message = String::new();

        for attempt in 0..2usize.min(endpoint_count.max(1)) {
            let index = self.active.load(Ordering::Relaxed) % endpoint_count;
            let provider = self.providers[index].clone();

            match timeout(self.rpc_timeout, call(provider)).await {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        debug!(network = %self.network, %operation, "failover succeeded");
                    }
                    *self.health.write() = NetworkHealth::Healthy;
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    if !is_transient(&e) {
                        // Malformed responses mark the endpoint suspect:
                        // log, rotate away from it, degrade the network
                        // until the probe sees a clean call, and fail the
                        // operation without a second attempt.
                        error!(
                            network = %self.network,
                            %operation,
                            endpoint = index,
                            error = %e,
                            "permanent RPC failure; endpoint marked degraded"
                        );
                        self.active.store((index + 1) % endpoint_count, Ordering::Relaxed);
                        *self.health.write() = NetworkHealth::Degraded;
                        return Err(GatewayError::PermanentRpc {
                            network: self.network.to_string(),
                            message: format!("{operation}: {e}"),
                        });
                    }
                    last_message = e.to_string();
                }
                Err(_) => {
                    last_message = format!("timed out after {:?}", self.rpc_timeout);
                }
            }

            warn!(
                network = %self.network,
                %operation,
                endpoint = index,
                error = %last_message,
                "RPC endpoint failed, rotating"
            );
            self.active.store((index + 1) % endpoint_count, Ordering::Relaxed);
        }

        *self.health.write() = NetworkHealth::Degraded;
        Err(GatewayError::TransientRpc {
            network: self.network.to_string(),
            message: format!("{operation}: all endpoints failed: {last_message}"),
        })
    }

    /// One probe call; success restores the network to healthy.
    pub async fn probe(&self) -> bool {
        match self.block_number().await {
            Ok(_) => {
                *self.health.write() = NetworkHealth::Healthy;
                true
            }
            Err(_) => false,
        }
    }

    async fn gas_price_wei(&self) -> Result<u128, GatewayError> {
        let now = time::now_ns();
        if let Some(price) = self.gas_cache.get(now) {
            return Ok(price);
        }
        let price = self
            .call_with_failover("eth_gasPrice", |p| async move { p.get_gas_price().await })
            .await?;
        let price = price.as_u128();
        self.gas_cache.store(price, now);
        Ok(price)
    }

    fn static_call(&self, to: Address, selector: [u8; 4]) -> TypedTransaction {
        TransactionRequest::new()
            .to(H160(to.0))
            .data(Bytes::from(selector.to_vec()))
            .into()
    }

    fn pool_meta(&self, pool: Address) -> Result<&PoolMeta, GatewayError> {
        self.pools.get(&pool).ok_or(GatewayError::PoolNotFound(pool))
    }
}

#[async_trait]
impl ChainGateway for RpcGateway {
    fn network(&self) -> &NetworkId {
        &self.network
    }

    async fn read_pool_state(&self, pool: Address) -> Result<PoolObservation, GatewayError> {
        let meta = self.pool_meta(pool)?.clone();
        let block_number = self.block_number().await?;

        match meta.protocol {
            PoolProtocol::V2 => {
                let call = self.static_call(pool, SELECTOR_GET_RESERVES);
                let data = self
                    .call_with_failover("getReserves", move |p| {
                        let call = call.clone();
                        async move { p.call(&call, None).await }
                    })
                    .await?;
                if data.is_empty() {
                    return Err(GatewayError::PoolNotFound(pool));
                }
                let reserve0 = decode_word(&data, 0, &self.network, "reserve0")?;
                let reserve1 = decode_word(&data, 1, &self.network, "reserve1")?;

                let reserve0 = scale_down(reserve0, meta.token0_decimals, &self.network)?;
                let reserve1 = scale_down(reserve1, meta.token1_decimals, &self.network)?;
                Ok(PoolObservation {
                    raw_price: RawPrice::Reserves { reserve0, reserve1 },
                    liquidity: reserve0,
                    block_number,
                })
            }
            PoolProtocol::V3 => {
                let slot0_call = self.static_call(pool, SELECTOR_SLOT0);
                let slot0 = self
                    .call_with_failover("slot0", move |p| {
                        let call = slot0_call.clone();
                        async move { p.call(&call, None).await }
                    })
                    .await?;
                if slot0.is_empty() {
                    return Err(GatewayError::PoolNotFound(pool));
                }
                let sqrt_price = decode_word(&slot0, 0, &self.network, "sqrtPriceX96")?;

                let liquidity_call = self.static_call(pool, SELECTOR_LIQUIDITY);
                let liquidity = self
                    .call_with_failover("liquidity", move |p| {
                        let call = liquidity_call.clone();
                        async move { p.call(&call, None).await }
                    })
                    .await?;
                let liquidity = decode_word(&liquidity, 0, &self.network, "liquidity")?;

                Ok(PoolObservation {
                    raw_price: RawPrice::SqrtPriceX96 { sqrt_price_x96: sqrt_price.as_u128() },
                    liquidity: scale_down(liquidity, 18, &self.network)?,
                    block_number,
                })
            }
        }
    }

    async fn estimate_gas(&self, tx: &TxRequest) -> Result<GasEstimate, GatewayError> {
        let typed: TypedTransaction = TransactionRequest::new()
            .to(H160(tx.to.0))
            .data(Bytes::from(encode_call(&tx.call)))
            .into();

        let units = self
            .call_with_failover("eth_estimateGas", move |p| {
                let typed = typed.clone();
                async move { p.estimate_gas(&typed, None).await }
            })
            .await?
            .as_u64()
            .max(21_000);

        let price_per_unit_wei = self.gas_price_wei().await?;
        Ok(GasEstimate { units, price_per_unit_wei })
    }

    async fn submit(&self, tx: TxRequest) -> Result<TxHash, GatewayError> {
        let gas = self.estimate_gas(&tx).await?;
        let nonce = {
            let signer_address = H160(self.signer.address().0);
            self.call_with_failover("eth_getTransactionCount", move |p| async move {
                p.get_transaction_count(signer_address, None).await
            })
            .await?
            .as_u64()
        };

        let raw = self.signer.sign(&tx, nonce, gas).await?;
        let raw_bytes = Bytes::from(raw);

        let hash = self
            .call_with_failover("eth_sendRawTransaction", move |p| {
                let raw_bytes = raw_bytes.clone();
                async move {
                    let pending = p.send_raw_transaction(raw_bytes).await?;
                    Ok(pending.tx_hash())
                }
            })
            .await?;

        debug!(network = %self.network, tx = %hash, "transaction accepted into mempool");
        Ok(TxHash(hash.0))
    }

    async fn await_confirmation(
        &self,
        tx_hash: TxHash,
        depth: u64,
    ) -> Result<Receipt, GatewayError> {
        let hash = H256(tx_hash.0);
        let deadline = tokio::time::Instant::now() + self.confirmation_timeout;

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(GatewayError::Timeout {
                    operation: format!("confirmation of {tx_hash}"),
                    seconds: self.confirmation_timeout.as_secs(),
                });
            }

            let receipt = self
                .call_with_failover("eth_getTransactionReceipt", move |p| async move {
                    p.get_transaction_receipt(hash).await
                })
                .await?;

            if let Some(receipt) = receipt {
                let mined_in = receipt.block_number.map(|b| b.as_u64()).unwrap_or(0);
                let head = self.block_number().await?;
                if head >= mined_in + depth {
                    return Ok(Receipt {
                        tx_hash,
                        block_number: mined_in,
                        gas_used: receipt.gas_used.map(|g| g.as_u64()).unwrap_or(0),
                        success: receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false),
                        token_delta: None,
                    });
                }
            }

            tokio::time::sleep(self.block_time).await;
        }
    }

    async fn block_number(&self) -> Result<u64, GatewayError> {
        let block = self
            .call_with_failover("eth_blockNumber", |p| async move {
                p.get_block_number().await
            })
            .await?;
        Ok(block.as_u64())
    }

    async fn gas_price_wei(&self) -> Result<u128, GatewayError> {
        RpcGateway::gas_price_wei(self).await
    }

    fn health(&self) -> NetworkHealth {
        *self.health.read()
    }
}

fn is_transient(error: &ProviderError) -> bool {
    // Malformed responses mark the endpoint permanently suspect; everything
    // unrecognized is treated uniformly as transient and fails over once.
    !matches!(error, ProviderError::SerdeJson(_))
}

/// Extract the `index`-th 32-byte word of an ABI-encoded return.
fn decode_word(
    data: &[u8],
    index: usize,
    network: &NetworkId,
    field: &str,
) -> Result<U256, GatewayError> {
    let start = index * 32;
    let end = start + 32;
    if data.len() < end {
        return Err(GatewayError::PermanentRpc {
            network: network.to_string(),
            message: format!("short return data decoding {field}: {} bytes", data.len()),
        });
    }
    Ok(U256::from_big_endian(&data[start..end]))
}

/// Scale a raw token amount down by its decimals into a Decimal.
fn scale_down(raw: U256, decimals: u32, network: &NetworkId) -> Result<Decimal, GatewayError> {
    if raw > U256::from(u128::MAX) {
        return Err(GatewayError::PermanentRpc {
            network: network.to_string(),
            message: "token amount exceeds 128 bits".to_string(),
        });
    }
    let mantissa = raw.as_u128();
    if mantissa > (1u128 << 96) - 1 {
        // Preserve magnitude at reduced precision rather than failing the read.
        let divisor = 10u128.pow(decimals.min(28));
        return Ok(Decimal::from(mantissa / divisor));
    }
    Ok(Decimal::from_i128_with_scale(mantissa as i128, decimals.min(28)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decode_word_reads_big_endian_words() {
        let mut data = vec![0u8; 64];
        data[31] = 7;
        data[63] = 9;
        let network = NetworkId::new("polygon");
        assert_eq!(decode_word(&data, 0, &network, "a").unwrap(), U256::from(7));
        assert_eq!(decode_word(&data, 1, &network, "b").unwrap(), U256::from(9));
        assert!(decode_word(&data, 2, &network, "c").is_err());
    }

    #[test]
    fn scale_down_applies_token_decimals() {
        let network = NetworkId::new("polygon");
        // 1.5 tokens at 18 decimals
        let raw = U256::from(1_500_000_000_000_000_000u128);
        assert_eq!(scale_down(raw, 18, &network).unwrap(), dec!(1.5));

        // 2500 USDC at 6 decimals
        let raw = U256::from(2_500_000_000u64);
        assert_eq!(scale_down(raw, 6, &network).unwrap(), dec!(2500));
    }

}
