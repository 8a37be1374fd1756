//! On-disk catalogue format.
//!
//! A catalogue is a JSON document describing one measurement region: the
//! Standard Model prediction per bin, the Wilson coefficients, and the
//! polynomial terms that scale the prediction. Structural validation beyond
//! what serde enforces (term arity, coefficient lengths, name resolution)
//! happens when the scaling model is built from the catalogue.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use eft_core::Result;

/// Declarative description of one measurement region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalogue {
    /// Region name. Used to label report and scan artifacts.
    pub name: String,
    /// Standard Model prediction per bin, in declaration order.
    ///
    /// Interpreted as cross sections in femtobarn and converted to event
    /// yields with the exposure settings, unless `sm_is_yields` is set.
    pub sm: Vec<f64>,
    /// When `true`, `sm` and `background` already hold event yields and no
    /// exposure conversion is applied.
    #[serde(default)]
    pub sm_is_yields: bool,
    /// Background prediction per bin, in the same units as `sm`.
    ///
    /// When omitted, the background defaults to a fixed multiple of the
    /// Standard Model yields (see
    /// [`UncertaintyConfig`](crate::UncertaintyConfig)).
    #[serde(default)]
    pub background: Option<Vec<f64>>,
    /// Wilson coefficient names, in declaration order.
    pub parameters: Vec<String>,
    /// Per-parameter bound overrides as `[min, max]` pairs.
    ///
    /// Parameters not listed here use the default range from the run
    /// configuration.
    #[serde(default)]
    pub bounds: HashMap<String, (f64, f64)>,
    /// Scaling terms of the polynomial expansion.
    pub terms: Vec<TermSpec>,
}

/// One term of the polynomial expansion of the signal scaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermSpec {
    /// Names of the parameters entering the term: one name for a linear
    /// term, two for a cross term, the same name twice for a square.
    pub parameters: Vec<String>,
    /// Per-bin coefficients. Must have one entry per `sm` bin.
    pub coefficients: Vec<f64>,
}

impl Catalogue {
    /// Parse a catalogue from a JSON string.
    pub fn from_json_str(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Read and parse a catalogue from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// Number of bins in the region.
    pub fn n_bins(&self) -> usize {
        self.sm.len()
    }
}
