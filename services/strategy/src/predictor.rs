//! Price predictor seam.
//!
//! The ML predictor is an external collaborator; the engine only consumes a
//! confidence scalar per pool pair. Deployments without the predictor run
//! the constant implementation.

use rust_decimal::Decimal;
use types::PoolId;

/// External price-movement predictor. Scores are clamped into [0, 1] by the
/// detector regardless of what the implementation returns.
pub trait PricePredictor: Send + Sync {
    /// Confidence that the dislocation between the two pools will persist
    /// long enough to capture.
    fn score(&self, source: &PoolId, target: &PoolId) -> Decimal;
}

/// Fixed-score predictor for deployments without the ML collaborator.
pub struct ConstantPredictor(pub Decimal);

impl Default for ConstantPredictor {
    fn default() -> Self {
        Self(Decimal::ONE)
    }
}

impl PricePredictor for ConstantPredictor {
    fn score(&self, _source: &PoolId, _target: &PoolId) -> Decimal {
        self.0
    }
}
