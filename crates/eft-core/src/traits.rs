//! Core traits for eftfit
//!
//! The inference layer (fit driver, profile scanner) works against the
//! `NllModel` trait rather than a concrete likelihood, so it does not depend
//! on how the measurement model is assembled.

use crate::Result;

/// A negative-log-likelihood model over a fixed, ordered parameter vector.
///
/// Implementations must be pure with respect to `params`: two calls with the
/// same vector return the same value. The gradient is analytic where
/// possible; the inference layer finite-differences it for Hessian
/// estimates, so noisy gradients degrade the error estimates directly.
pub trait NllModel: Send + Sync {
    /// Number of parameters.
    fn dim(&self) -> usize;

    /// Parameter names, in model order.
    fn parameter_names(&self) -> Vec<String>;

    /// Parameter bounds (min, max), in model order.
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;

    /// Default starting point, in model order.
    fn parameter_init(&self) -> Vec<f64>;

    /// Negative log-likelihood at `params`.
    fn nll(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of the negative log-likelihood at `params`.
    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>>;
}
