//! Engine-level transaction descriptions and the signing seam.
//!
//! The engine composes swaps, bridge deposits and liquidity adds; it never
//! handles keys. A [`TransactionSigner`] is supplied by the deployment and
//! turns a [`TxRequest`] plus gas figures into raw signed bytes.

use async_trait::async_trait;
use ethers::types::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use types::{Address, GasEstimate, NetworkId, PoolId};

use crate::error::GatewayError;

/// What the transaction does, at the engine's level of abstraction.
#[derive(Debug, Clone, PartialEq)]
pub enum TxCall {
    /// Swap `amount_in` through a pool, reverting below `min_amount_out`.
    Swap {
        pool: PoolId,
        zero_for_one: bool,
        amount_in: Decimal,
        min_amount_out: Decimal,
    },
    /// Deposit into the bridge contract for delivery on `target_network`.
    BridgeDeposit {
        target_network: NetworkId,
        token: String,
        amount: Decimal,
        deadline_ns: u64,
    },
    /// Add paired liquidity to a pool.
    AddLiquidity {
        pool: PoolId,
        amount0: Decimal,
        amount1: Decimal,
    },
}

/// A transaction ready for gas estimation and signing.
#[derive(Debug, Clone, PartialEq)]
pub struct TxRequest {
    pub to: Address,
    pub call: TxCall,
    pub gas_limit: u64,
}

impl TxRequest {
    pub fn new(to: Address, call: TxCall, gas_limit: u64) -> Self {
        Self { to, call, gas_limit }
    }
}

/// ABI-encode an engine call. The contract interfaces are external
/// collaborators; these signatures are the declared seam.
pub fn encode_call(call: &TxCall) -> Vec<u8> {
    use ethers::abi::{encode, Token};
    use ethers::utils::keccak256;

    let (signature, tokens) = match call {
        TxCall::Swap { zero_for_one, amount_in, min_amount_out, .. } => (
            "swap(bool,uint256,uint256)",
            vec![
                Token::Bool(*zero_for_one),
                Token::Uint(to_base_units(*amount_in)),
                Token::Uint(to_base_units(*min_amount_out)),
            ],
        ),
        TxCall::BridgeDeposit { amount, deadline_ns, .. } => (
            "deposit(uint256,uint256)",
            vec![
                Token::Uint(to_base_units(*amount)),
                Token::Uint(U256::from(*deadline_ns)),
            ],
        ),
        TxCall::AddLiquidity { amount0, amount1, .. } => (
            "addLiquidity(uint256,uint256)",
            vec![
                Token::Uint(to_base_units(*amount0)),
                Token::Uint(to_base_units(*amount1)),
            ],
        ),
    };

    let mut data = keccak256(signature.as_bytes())[..4].to_vec();
    data.extend(encode(&tokens));
    data
}

/// Convert a Decimal token amount to 18-decimal base units.
pub fn to_base_units(amount: Decimal) -> U256 {
    let scaled = (amount * Decimal::from(1_000_000_000u64) * Decimal::from(1_000_000_000u64))
        .trunc()
        .to_u128()
        .unwrap_or(0);
    U256::from(scaled)
}

/// External signing collaborator. Key storage is out of scope; deployments
/// plug in an HSM- or keystore-backed implementation.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Account the signer controls; used for nonce queries.
    fn address(&self) -> Address;

    async fn sign(
        &self,
        tx: &TxRequest,
        nonce: u64,
        gas: GasEstimate,
    ) -> Result<Vec<u8>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn encode_call_prefixes_selector() {
        let data = encode_call(&TxCall::Swap {
            pool: PoolId::new("p"),
            zero_for_one: true,
            amount_in: dec!(100),
            min_amount_out: dec!(99),
        });
        // 4-byte selector + 3 words
        assert_eq!(data.len(), 4 + 3 * 32);
    }

    #[test]
    fn base_unit_conversion_truncates() {
        assert_eq!(
            to_base_units(dec!(1.5)),
            U256::from(1_500_000_000_000_000_000u128)
        );
        assert_eq!(to_base_units(dec!(0)), U256::zero());
    }
}
