//! Error types for eftfit

use thiserror::Error;

/// eftfit error type.
///
/// Construction-time failures (`Domain`, `Schema`, `Numerical`) indicate
/// invalid input and are fatal for the run. `Range` and `NotFound` are
/// per-call contract violations. `Convergence` is raised when the optimizer
/// exhausts its iteration/tolerance budget; the fit driver reports it per
/// parameter instead of silently accepting a non-minimum.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid physical inputs (e.g. non-positive nominal yields)
    #[error("Domain error: {0}")]
    Domain(String),

    /// Catalogue/parameter mismatch
    #[error("Schema error: {0}")]
    Schema(String),

    /// Linear-algebra failure (e.g. covariance not positive definite)
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// Parameter value outside its declared bounds
    #[error("Range error: {0}")]
    Range(String),

    /// Unknown parameter name or snapshot label
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimizer failed to converge within its budget
    #[error("Convergence error: {0}")]
    Convergence(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
