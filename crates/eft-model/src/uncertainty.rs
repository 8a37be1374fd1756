//! Bin-by-bin uncertainty model.
//!
//! Event yields per bin come either straight from the catalogue or from a
//! cross-section times exposure conversion. Yields are then condensed into
//! a relative covariance matrix with two pieces: an uncorrelated Poisson
//! term from the total expected count, and a fully correlated systematic
//! proportional to the background contamination.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use eft_core::{Error, Result};

use crate::schema::Catalogue;

fn default_events_per_run() -> f64 {
    20_000.0
}

fn default_luminosity_fb() -> f64 {
    138.0
}

fn default_background_ratio() -> f64 {
    3.0
}

fn default_syst_fraction() -> f64 {
    0.05
}

/// Exposure applied when catalogue predictions are cross sections.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExposureConfig {
    /// Simulated events per generation run.
    #[serde(default = "default_events_per_run")]
    pub events_per_run: f64,
    /// Integrated luminosity in inverse femtobarn.
    #[serde(default = "default_luminosity_fb")]
    pub luminosity_fb: f64,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            events_per_run: default_events_per_run(),
            luminosity_fb: default_luminosity_fb(),
        }
    }
}

/// Settings of the uncertainty model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UncertaintyConfig {
    /// Background yield as a multiple of the Standard Model yield, used for
    /// catalogues that do not list a background.
    #[serde(default = "default_background_ratio")]
    pub background_ratio: f64,
    /// Fractional systematic uncertainty on the background yield.
    #[serde(default = "default_syst_fraction")]
    pub syst_fraction: f64,
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        Self {
            background_ratio: default_background_ratio(),
            syst_fraction: default_syst_fraction(),
        }
    }
}

/// Expected event yields per bin.
#[derive(Debug, Clone)]
pub struct BinYields {
    sm: Vec<f64>,
    background: Vec<f64>,
}

impl BinYields {
    /// Build from explicit yields.
    ///
    /// Every Standard Model yield must be strictly positive (the relative
    /// uncertainties divide by it) and every background yield non-negative;
    /// violations are `Domain` errors. Mismatched lengths are a `Schema`
    /// error.
    pub fn new(sm: Vec<f64>, background: Vec<f64>) -> Result<Self> {
        if sm.len() != background.len() {
            return Err(Error::Schema(format!(
                "{} signal bins but {} background bins",
                sm.len(),
                background.len()
            )));
        }
        if sm.is_empty() {
            return Err(Error::Schema("no bins".into()));
        }
        for (i, &s) in sm.iter().enumerate() {
            if !s.is_finite() || s <= 0.0 {
                return Err(Error::Domain(format!(
                    "Standard Model yield {s} in bin {i} is not strictly positive"
                )));
            }
        }
        for (i, &b) in background.iter().enumerate() {
            if !b.is_finite() || b < 0.0 {
                return Err(Error::Domain(format!(
                    "background yield {b} in bin {i} is negative"
                )));
            }
        }
        Ok(Self { sm, background })
    }

    /// Build yields from a catalogue, applying the exposure conversion for
    /// cross-section inputs and the default background ratio when the
    /// catalogue lists no background.
    pub fn from_catalogue(
        cat: &Catalogue,
        exposure: &ExposureConfig,
        unc: &UncertaintyConfig,
    ) -> Result<Self> {
        let factor = if cat.sm_is_yields {
            1.0
        } else {
            exposure.events_per_run * exposure.luminosity_fb
        };
        let sm: Vec<f64> = cat.sm.iter().map(|x| x * factor).collect();
        let background = match &cat.background {
            Some(b) => b.iter().map(|x| x * factor).collect(),
            None => sm.iter().map(|s| unc.background_ratio * s).collect(),
        };
        Self::new(sm, background)
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.sm.len()
    }

    /// True when there are no bins. Unreachable through the constructors.
    pub fn is_empty(&self) -> bool {
        self.sm.is_empty()
    }

    /// Standard Model yields.
    pub fn sm(&self) -> &[f64] {
        &self.sm
    }

    /// Background yields.
    pub fn background(&self) -> &[f64] {
        &self.background
    }
}

/// Relative covariance of the measured signal strength per bin.
///
/// With `s` the Standard Model yield and `b` the background yield of a bin,
/// the relative statistical uncertainty is `sqrt(s + b) / s` and the
/// relative systematic is `f * b / s` for a background systematic fraction
/// `f`. Statistical terms are uncorrelated across bins; the systematic is
/// fully correlated, giving
///
/// ```text
/// cov = diag(stat^2) + syst * syst^T
/// ```
#[derive(Debug, Clone)]
pub struct Covariance {
    stat_rel: Vec<f64>,
    syst_rel: Vec<f64>,
    matrix: DMatrix<f64>,
}

impl Covariance {
    /// Build the covariance from yields.
    pub fn from_yields(yields: &BinYields, unc: &UncertaintyConfig) -> Self {
        let n = yields.len();
        let stat_rel: Vec<f64> = yields
            .sm()
            .iter()
            .zip(yields.background())
            .map(|(&s, &b)| (s + b).sqrt() / s)
            .collect();
        let syst_rel: Vec<f64> = yields
            .sm()
            .iter()
            .zip(yields.background())
            .map(|(&s, &b)| unc.syst_fraction * b / s)
            .collect();
        let mut matrix = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                matrix[(i, j)] = syst_rel[i] * syst_rel[j];
            }
            matrix[(i, i)] += stat_rel[i] * stat_rel[i];
        }
        Self { stat_rel, syst_rel, matrix }
    }

    /// Relative statistical uncertainty per bin.
    pub fn stat_rel(&self) -> &[f64] {
        &self.stat_rel
    }

    /// Relative systematic uncertainty per bin.
    pub fn syst_rel(&self) -> &[f64] {
        &self.syst_rel
    }

    /// The full covariance matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn symmetric_pair_covariance() {
        // Two identical bins with a 2% statistical and 1.5% systematic
        // relative uncertainty: sqrt(3250 + 975) = 65 events.
        let yields = BinYields::new(vec![3250.0, 3250.0], vec![975.0, 975.0]).unwrap();
        let cov = Covariance::from_yields(&yields, &UncertaintyConfig::default());

        assert_relative_eq!(cov.stat_rel()[0], 0.02, max_relative = 1e-12);
        assert_relative_eq!(cov.syst_rel()[0], 0.015, max_relative = 1e-12);

        let m = cov.matrix();
        assert_relative_eq!(m[(0, 0)], 0.000625, max_relative = 1e-12);
        assert_relative_eq!(m[(1, 1)], 0.000625, max_relative = 1e-12);
        assert_relative_eq!(m[(0, 1)], 0.000225, max_relative = 1e-12);
        assert_relative_eq!(m[(1, 0)], 0.000225, max_relative = 1e-12);
    }

    #[test]
    fn relative_terms_follow_definitions() {
        let yields = BinYields::new(vec![100.0], vec![300.0]).unwrap();
        let cov = Covariance::from_yields(&yields, &UncertaintyConfig::default());
        // sqrt(400) / 100 and 0.05 * 300 / 100.
        assert_relative_eq!(cov.stat_rel()[0], 0.2, max_relative = 1e-12);
        assert_relative_eq!(cov.syst_rel()[0], 0.15, max_relative = 1e-12);
        assert_relative_eq!(cov.matrix()[(0, 0)], 0.04 + 0.0225, max_relative = 1e-12);
    }

    #[test]
    fn zero_signal_yield_rejected() {
        let err = BinYields::new(vec![10.0, 0.0], vec![30.0, 30.0]).unwrap_err();
        assert!(matches!(err, Error::Domain(_)));
        let err = BinYields::new(vec![-5.0], vec![0.0]).unwrap_err();
        assert!(matches!(err, Error::Domain(_)));
    }

    #[test]
    fn negative_background_rejected() {
        let err = BinYields::new(vec![10.0], vec![-1.0]).unwrap_err();
        assert!(matches!(err, Error::Domain(_)));
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let err = BinYields::new(vec![10.0, 10.0], vec![30.0]).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn exposure_converts_cross_sections() {
        let cat = Catalogue::from_json_str(
            r#"{
                "name": "toy",
                "sm": [0.5],
                "parameters": ["chw"],
                "terms": [{"parameters": ["chw"], "coefficients": [1.0]}]
            }"#,
        )
        .unwrap();
        let yields = BinYields::from_catalogue(
            &cat,
            &ExposureConfig::default(),
            &UncertaintyConfig::default(),
        )
        .unwrap();
        // 0.5 fb * 20000 events per run * 138 /fb.
        assert_relative_eq!(yields.sm()[0], 1_380_000.0, max_relative = 1e-12);
        // Default background is three times the signal.
        assert_relative_eq!(yields.background()[0], 4_140_000.0, max_relative = 1e-12);
    }

    #[test]
    fn explicit_yields_skip_exposure() {
        let cat = Catalogue::from_json_str(
            r#"{
                "name": "toy",
                "sm": [3250.0],
                "sm_is_yields": true,
                "background": [975.0],
                "parameters": ["chw"],
                "terms": [{"parameters": ["chw"], "coefficients": [1.0]}]
            }"#,
        )
        .unwrap();
        let yields = BinYields::from_catalogue(
            &cat,
            &ExposureConfig::default(),
            &UncertaintyConfig::default(),
        )
        .unwrap();
        assert_eq!(yields.sm(), &[3250.0]);
        assert_eq!(yields.background(), &[975.0]);
    }
}
