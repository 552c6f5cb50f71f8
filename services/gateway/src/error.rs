//! Gateway error taxonomy.
//!
//! `TransientRpc` is recoverable (retry + failover handled inside the
//! gateway); everything else propagates to the caller, which decides between
//! failing the execution and abandoning the call.

use thiserror::Error;
use types::Address;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network-level failure after failover was exhausted.
    #[error("transient RPC failure on {network}: {message}")]
    TransientRpc { network: String, message: String },

    /// Malformed or protocol-violating response; endpoint is suspect.
    #[error("permanent RPC failure on {network}: {message}")]
    PermanentRpc { network: String, message: String },

    #[error("no pool contract at {0}")]
    PoolNotFound(Address),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// The transaction was rejected at submission.
    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("transaction signing failed: {0}")]
    Signing(String),
}

impl GatewayError {
    /// Whether failing over to another endpoint could help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::TransientRpc { .. } | GatewayError::Timeout { .. }
        )
    }

    /// Stable kind tag for the control surface; no stack traces leak.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            GatewayError::TransientRpc { .. } => "transient-rpc",
            GatewayError::PermanentRpc { .. } => "permanent-rpc",
            GatewayError::PoolNotFound(_) => "pool-not-found",
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::Rejected(_) => "rejected",
            GatewayError::Signing(_) => "signing",
        }
    }
}
