//! Statistical model of a binned EFT sensitivity estimate.
//!
//! The model is assembled in three layers:
//!
//! 1. [`uncertainty`] turns Standard Model and background yields into a
//!    relative covariance matrix (Poisson statistics plus a fully
//!    correlated background systematic).
//! 2. [`scaling`] evaluates the per-bin signal scaling as a sparse
//!    polynomial in the Wilson coefficients.
//! 3. [`likelihood`] combines the two into a multivariate Gaussian negative
//!    log-likelihood with the observation pinned to the Standard Model
//!    point.
//!
//! [`schema`] holds the on-disk catalogue format the layers are built from.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod likelihood;
pub mod schema;
pub mod scaling;
pub mod uncertainty;

pub use likelihood::ScalingLikelihood;
pub use schema::{Catalogue, TermSpec};
pub use scaling::{ScalingModel, Term};
pub use uncertainty::{BinYields, Covariance, ExposureConfig, UncertaintyConfig};
