//! # CQT Engine Shared Types
//!
//! Domain types shared by every crate in the workspace: identifiers, the
//! Q64.96 price codec, market snapshots, execution and bridge records,
//! reserve entries, and the ledger event vocabulary.
//!
//! Everything financial is `rust_decimal::Decimal` or raw integer pool
//! encodings; there are no floats in any money path.

pub mod event;
pub mod execution;
pub mod identifiers;
pub mod market;
pub mod price;
pub mod reserve;
pub mod time;

pub use event::{EventKind, LedgerEvent, ReserveSource};
pub use execution::{
    BridgeStatus, BridgeTransfer, Execution, ExecutionOutcome, ExecutionState, Leg, LegKind,
    Opportunity, OpportunityStatus, PoolPair, TransitionError,
};
pub use identifiers::{Address, ExecutionId, NetworkId, OpportunityId, PoolId, TransferId, TxHash};
pub use market::{
    GasEstimate, NetworkHealth, NetworkStatus, PoolObservation, PoolProtocol, PriceSnapshot,
    Receipt,
};
pub use price::{PoolPrice, PriceError, RawPrice};
pub use reserve::ReserveEntry;
