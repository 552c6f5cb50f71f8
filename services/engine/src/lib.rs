//! # CQT Engine - Process Wiring and Lifecycle
//!
//! Assembles the full pipeline (gateways, monitors, oracle, detector, risk
//! filter, executor, bridge coordinator, reserve manager, ledger) exactly
//! in the dependency order the components declare, replays the ledger on
//! startup, exposes the thin control surface, and owns the shutdown drain
//! sequence.

pub mod control;
pub mod engine;
pub mod signing;

pub use control::{ControlCommand, ControlHandle, StatusSnapshot};
pub use engine::{Engine, EngineHandle};
pub use signing::{LocalWalletSigner, ObservationOnlySigner};
