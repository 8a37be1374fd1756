//! Common data types for eftfit

use serde::{Deserialize, Serialize};

/// Fit result containing named parameter estimates and uncertainties.
///
/// For joint fits the covariance matrix from the Hessian estimate is kept
/// (row-major, ordered like `parameter_names`); one-at-a-time fits carry a
/// single parameter and no covariance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Fitted parameter names, in fit order
    pub parameter_names: Vec<String>,

    /// Best-fit parameter values
    pub parameters: Vec<f64>,

    /// Parameter uncertainties (sqrt of covariance diagonal)
    pub uncertainties: Vec<f64>,

    /// Covariance matrix (row-major, N×N). `None` if Hessian inversion failed.
    pub covariance: Option<Vec<f64>>,

    /// Negative log-likelihood at minimum
    pub nll: f64,

    /// Convergence status
    pub converged: bool,

    /// Number of objective evaluations
    pub n_evaluations: usize,
}

impl FitResult {
    /// Create a fit result without a covariance matrix.
    pub fn new(
        parameter_names: Vec<String>,
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        nll: f64,
        converged: bool,
        n_evaluations: usize,
    ) -> Self {
        Self {
            parameter_names,
            parameters,
            uncertainties,
            covariance: None,
            nll,
            converged,
            n_evaluations,
        }
    }

    /// Create a fit result with a covariance matrix.
    pub fn with_covariance(
        parameter_names: Vec<String>,
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        covariance: Vec<f64>,
        nll: f64,
        converged: bool,
        n_evaluations: usize,
    ) -> Self {
        Self {
            parameter_names,
            parameters,
            uncertainties,
            covariance: Some(covariance),
            nll,
            converged,
            n_evaluations,
        }
    }

    /// Number of fitted parameters.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// True when no parameters were fitted.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Correlation matrix element (i, j). `None` if covariance is unavailable
    /// or a diagonal entry is non-positive.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let n = self.parameters.len();
        if i >= n || j >= n {
            return None;
        }
        let sigma_i = self.uncertainties[i];
        let sigma_j = self.uncertainties[j];
        if sigma_i <= 0.0 || sigma_j <= 0.0 {
            return None;
        }
        Some(cov[i * n + j] / (sigma_i * sigma_j))
    }

    /// Full correlation matrix (row-major), if the covariance is available.
    pub fn correlation_matrix(&self) -> Option<Vec<f64>> {
        let n = self.parameters.len();
        let mut out = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                out.push(self.correlation(i, j)?);
            }
        }
        Some(out)
    }
}
