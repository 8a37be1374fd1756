//! Fitting and scanning on top of the model layer.
//!
//! [`optimizer`] wraps argmin's L-BFGS behind a small bounded-minimization
//! interface, [`hessian`] derives uncertainties and correlations from the
//! curvature at a minimum, [`fit`] drives joint and one-at-a-time fits over
//! an explicit parameter state, and [`scan`] walks a parameter across a
//! grid of fixed values, re-minimizing the rest at every point.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fit;
pub mod hessian;
pub mod optimizer;
pub mod scan;

pub use fit::{FitDriver, FitMode, FitReport, ParamEstimate, SingleFit, INITIAL_SNAPSHOT};
pub use optimizer::{LbfgsMinimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};
pub use scan::{
    run_scans, ProfileScan, ProfileScanner, ScanConfig, ScanPhase, ScanPoint, ScanRequest,
};
