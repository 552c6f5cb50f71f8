//! # Arbitrage Strategy - Detection and Admission
//!
//! ## Purpose
//!
//! Turns the oracle's price view into an admissible, ranked stream of
//! arbitrage opportunities. The detector enumerates ordered pool pairs
//! sharing CQT, sizes each candidate by ternary search over the
//! constant-product curves, prices the full cost side (gas legs, bridge
//! fees, slippage buffer) and scores confidence. The risk filter then runs
//! every candidate through an ordered chain of rule objects; survivors are
//! ranked by net profit and handed to the executor through a bounded queue.
//!
//! ## Architecture Role
//!
//! ```text
//! Oracle Snapshots → [Pair Enumeration] → [Sizing + Cost Model] → [Risk Rules] → Executor Queue
//!        ↓                  ↓                     ↓                    ↓
//! Freshness Gate      CQT-Common Pairs     Ternary Search        Ordered Predicates
//! Reserve Views       Cross-Rate Anchor    Bridge Budget Check   Ranked Admission
//! ```

pub mod detector;
pub mod predictor;
pub mod risk;

pub use detector::{DetectorError, OpportunityDetector};
pub use predictor::{ConstantPredictor, PricePredictor};
pub use risk::{RiskContext, RiskFilter, RiskRule, Verdict};
