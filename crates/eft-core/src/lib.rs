//! # eft-core
//!
//! Shared foundation for eftfit:
//! - error taxonomy and `Result` alias
//! - fit-result container with correlation helpers
//! - the `NllModel` trait connecting measurement models to the inference layer
//! - parameter state (values, constancy, bounds) with labeled snapshots

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error taxonomy and `Result` alias.
pub mod error;
/// Parameter state: values, constancy, bounds, snapshots.
pub mod params;
/// Model traits used by the inference layer.
pub mod traits;
/// Shared result types.
pub mod types;

pub use error::{Error, Result};
pub use params::{Parameter, ParameterSet};
pub use traits::NllModel;
pub use types::FitResult;

/// Crate version, for artifact metadata and `--version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
