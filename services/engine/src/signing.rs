//! Local-wallet transaction signing.
//!
//! Key *storage* is an external concern: the engine only accepts a key that
//! something else (env injection, a mounted secret) already decided to hand
//! the process. Deployments with an HSM implement [`TransactionSigner`]
//! themselves and skip this module entirely.

use async_trait::async_trait;
use chain_gateway::{encode_call, GatewayError, TransactionSigner, TxRequest};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Bytes, TransactionRequest, H160, U256};
use types::{Address, GasEstimate};

/// Signs with an in-process ethers wallet.
pub struct LocalWalletSigner {
    wallet: LocalWallet,
    chain_id: u64,
}

impl LocalWalletSigner {
    pub fn new(private_key: &str, chain_id: u64) -> Result<Self, GatewayError> {
        let wallet = private_key
            .parse::<LocalWallet>()
            .map_err(|e| GatewayError::Signing(format!("invalid private key: {e}")))?
            .with_chain_id(chain_id);
        Ok(Self { wallet, chain_id })
    }
}

#[async_trait]
impl TransactionSigner for LocalWalletSigner {
    fn address(&self) -> Address {
        Address(self.wallet.address().0)
    }

    async fn sign(
        &self,
        tx: &TxRequest,
        nonce: u64,
        gas: GasEstimate,
    ) -> Result<Vec<u8>, GatewayError> {
        let typed: TypedTransaction = TransactionRequest::new()
            .to(H160(tx.to.0))
            .data(Bytes::from(encode_call(&tx.call)))
            .nonce(nonce)
            .gas(U256::from(gas.units))
            .gas_price(U256::from(gas.price_per_unit_wei))
            .chain_id(self.chain_id)
            .into();

        let signature = self
            .wallet
            .sign_transaction(&typed)
            .await
            .map_err(|e| GatewayError::Signing(e.to_string()))?;
        Ok(typed.rlp_signed(&signature).to_vec())
    }
}

/// Signer for observation-only deployments: refuses to sign anything, so
/// submissions fail fast while reads and detection run normally.
pub struct ObservationOnlySigner;

#[async_trait]
impl TransactionSigner for ObservationOnlySigner {
    fn address(&self) -> Address {
        Address::ZERO
    }

    async fn sign(
        &self,
        _tx: &TxRequest,
        _nonce: u64,
        _gas: GasEstimate,
    ) -> Result<Vec<u8>, GatewayError> {
        Err(GatewayError::Signing(
            "engine is running without a signing key".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn observation_signer_refuses() {
        let signer = ObservationOnlySigner;
        assert_eq!(signer.address(), Address::ZERO);
        let tx = TxRequest::new(
            Address([1; 20]),
            chain_gateway::TxCall::BridgeDeposit {
                target_network: types::NetworkId::new("base"),
                token: "CQT".to_string(),
                amount: dec!(1),
                deadline_ns: 0,
            },
            300_000,
        );
        let err = signer
            .sign(&tx, 0, GasEstimate { units: 21_000, price_per_unit_wei: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Signing(_)));
    }

    #[tokio::test]
    async fn local_wallet_signs_deterministic_payload() {
        let signer = LocalWalletSigner::new(
            "0x0123456789012345678901234567890123456789012345678901234567890123",
            137,
        )
        .unwrap();

        let tx = TxRequest::new(
            Address([1; 20]),
            chain_gateway::TxCall::Swap {
                pool: types::PoolId::new("p"),
                zero_for_one: true,
                amount_in: dec!(10),
                min_amount_out: dec!(9),
            },
            300_000,
        );
        let raw = signer
            .sign(&tx, 0, GasEstimate { units: 300_000, price_per_unit_wei: 30_000_000_000 })
            .await
            .unwrap();
        assert!(!raw.is_empty());
    }
}
