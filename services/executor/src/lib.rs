//! # Execution Engine - State Machine and Bridge Coordination
//!
//! ## Purpose
//!
//! Owns the per-execution state machine
//! `Detected → Reserved → Submitting → Submitted → Confirming → Completed |
//! Failed | Superseded` and everything that guards it: the per-pair
//! exclusivity slot, the global concurrency budget, gas-drift and slippage
//! pre-flight aborts, the consecutive-failure tripwire, and the emergency
//! stop. Cross-chain legs hand the asset to the [`BridgeCoordinator`], which
//! tracks every transfer to a terminal state and parks timeouts in a passive
//! reclaim queue.
//!
//! ## Guarantees
//!
//! - At most one in-flight execution per ordered pool pair, ever
//! - At most `max_concurrent_arbitrages` executions in flight in total
//! - Every state transition is ledgered before it is observable
//! - Executions are never retried automatically
//! - After emergency stop no further legs are submitted; in-flight
//!   transactions are abandoned, never cancelled on-chain

pub mod bridge;
pub mod executor;
pub mod slots;

pub use bridge::{BridgeAdapter, BridgeCoordinator, BridgeResolution, MockBridgeAdapter};
pub use executor::{Executor, ProfitEvent};
pub use slots::SlotManager;
