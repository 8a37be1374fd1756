//! Gaussian likelihood of the scaled signal prediction.
//!
//! The per-bin scale factors are treated as a correlated Gaussian
//! measurement with the covariance from the uncertainty model. The
//! observation is pinned to the Standard Model point (unit scale in every
//! bin), so the minima and curvatures probed by the fits are expected
//! sensitivities rather than measurements of data.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use eft_core::{Error, NllModel, Parameter, ParameterSet, Result};

use crate::scaling::ScalingModel;
use crate::schema::Catalogue;
use crate::uncertainty::{BinYields, Covariance, ExposureConfig, UncertaintyConfig};

/// Negative log-likelihood of the scaling model under Gaussian yields.
///
/// The covariance is factorized once at construction; a failed Cholesky
/// factorization (a covariance that is not positive definite) is a
/// `Numerical` error. Evaluation solves against the cached factor instead
/// of forming an explicit inverse.
#[derive(Debug, Clone)]
pub struct ScalingLikelihood {
    scaling: ScalingModel,
    chol: Cholesky<f64, Dyn>,
    observed: DVector<f64>,
    log_norm: f64,
    bounds: Vec<(f64, f64)>,
}

impl ScalingLikelihood {
    /// Build a likelihood from a scaling model and a covariance matrix.
    pub fn new(
        scaling: ScalingModel,
        covariance: DMatrix<f64>,
        bounds: Vec<(f64, f64)>,
    ) -> Result<Self> {
        let n = scaling.n_bins();
        if covariance.nrows() != n || covariance.ncols() != n {
            return Err(Error::Schema(format!(
                "{}x{} covariance for a model with {n} bins",
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        if bounds.len() != scaling.n_parameters() {
            return Err(Error::Schema(format!(
                "{} bound pairs for {} parameters",
                bounds.len(),
                scaling.n_parameters()
            )));
        }
        let chol = Cholesky::new(covariance).ok_or_else(|| {
            Error::Numerical("covariance matrix is not positive definite".into())
        })?;
        let l = chol.l_dirty();
        let ln_det = 2.0 * (0..n).map(|i| l[(i, i)].ln()).sum::<f64>();
        let log_norm = 0.5 * (n as f64 * (2.0 * std::f64::consts::PI).ln() + ln_det);
        Ok(Self {
            scaling,
            chol,
            observed: DVector::from_element(n, 1.0),
            log_norm,
            bounds,
        })
    }

    /// Build the full likelihood for a catalogue: yields, covariance and
    /// scaling in one step.
    ///
    /// Bounds come from the catalogue's per-parameter overrides, falling
    /// back to `default_bounds`.
    pub fn from_catalogue(
        cat: &Catalogue,
        exposure: &ExposureConfig,
        unc: &UncertaintyConfig,
        default_bounds: (f64, f64),
    ) -> Result<Self> {
        let yields = BinYields::from_catalogue(cat, exposure, unc)?;
        let covariance = Covariance::from_yields(&yields, unc);
        let scaling = ScalingModel::from_catalogue(cat)?;
        let bounds = cat
            .parameters
            .iter()
            .map(|p| cat.bounds.get(p).copied().unwrap_or(default_bounds))
            .collect();
        Self::new(scaling, covariance.matrix().clone(), bounds)
    }

    /// The underlying scaling model.
    pub fn scaling(&self) -> &ScalingModel {
        &self.scaling
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.scaling.n_bins()
    }

    /// Fresh parameter state for this likelihood: every parameter free at
    /// zero with its declared bounds.
    pub fn parameter_set(&self) -> Result<ParameterSet> {
        let params = self
            .scaling
            .parameter_names()
            .iter()
            .zip(&self.bounds)
            .map(|(name, &bounds)| Parameter {
                name: name.clone(),
                value: 0.0,
                bounds,
                constant: false,
            })
            .collect();
        ParameterSet::from_parameters(params)
    }
}

impl NllModel for ScalingLikelihood {
    fn dim(&self) -> usize {
        self.scaling.n_parameters()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.scaling.parameter_names().to_vec()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        self.bounds.clone()
    }

    fn parameter_init(&self) -> Vec<f64> {
        vec![0.0; self.dim()]
    }

    fn nll(&self, params: &[f64]) -> Result<f64> {
        let scale = self.scaling.scale(params)?;
        let residual = scale - &self.observed;
        let solved = self.chol.solve(&residual);
        Ok(0.5 * residual.dot(&solved) + self.log_norm)
    }

    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        let scale = self.scaling.scale(params)?;
        let residual = scale - &self.observed;
        let solved = self.chol.solve(&residual);
        let jac = self.scaling.jacobian(params)?;
        let grad = jac.transpose() * solved;
        Ok(grad.iter().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Two identical bins, one parameter entering with opposite signs.
    ///
    /// The covariance is [[6.25e-4, 2.25e-4], [2.25e-4, 6.25e-4]] and the
    /// residual direction (1, -1) is an eigenvector with eigenvalue 4e-4,
    /// so NLL(c1) - NLL(0) = 2500 * c1^2 exactly.
    fn symmetric_pair() -> ScalingLikelihood {
        let cat = Catalogue::from_json_str(
            r#"{
                "name": "symmetric_pair",
                "sm": [3250.0, 3250.0],
                "sm_is_yields": true,
                "background": [975.0, 975.0],
                "parameters": ["c1"],
                "terms": [{"parameters": ["c1"], "coefficients": [1.0, -1.0]}]
            }"#,
        )
        .unwrap();
        ScalingLikelihood::from_catalogue(
            &cat,
            &ExposureConfig::default(),
            &UncertaintyConfig::default(),
            (-100.0, 100.0),
        )
        .unwrap()
    }

    #[test]
    fn nll_is_quadratic_in_the_symmetric_pair() {
        let lik = symmetric_pair();
        let nll0 = lik.nll(&[0.0]).unwrap();
        for &c1 in &[0.01, -0.02, 0.1] {
            let delta = lik.nll(&[c1]).unwrap() - nll0;
            assert_relative_eq!(delta, 2500.0 * c1 * c1, max_relative = 1e-9);
        }
    }

    #[test]
    fn gradient_is_analytic() {
        let lik = symmetric_pair();
        let grad = lik.grad_nll(&[0.01]).unwrap();
        assert_eq!(grad.len(), 1);
        assert_relative_eq!(grad[0], 5000.0 * 0.01, max_relative = 1e-9);

        // Zero gradient at the observation point.
        let grad0 = lik.grad_nll(&[0.0]).unwrap();
        assert_relative_eq!(grad0[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let cat = Catalogue::from_json_str(
            r#"{
                "name": "toy",
                "sm": [900.0, 400.0, 2500.0],
                "sm_is_yields": true,
                "parameters": ["chw", "chdd"],
                "terms": [
                    {"parameters": ["chw"], "coefficients": [0.8, -0.3, 0.1]},
                    {"parameters": ["chw", "chw"], "coefficients": [0.2, 0.05, 0.0]},
                    {"parameters": ["chw", "chdd"], "coefficients": [0.0, 0.4, -0.2]},
                    {"parameters": ["chdd"], "coefficients": [0.5, 0.0, 0.9]}
                ]
            }"#,
        )
        .unwrap();
        let lik = ScalingLikelihood::from_catalogue(
            &cat,
            &ExposureConfig::default(),
            &UncertaintyConfig::default(),
            (-100.0, 100.0),
        )
        .unwrap();

        let point = [0.013, -0.021];
        let grad = lik.grad_nll(&point).unwrap();
        let h = 1e-7;
        for p in 0..2 {
            let mut up = point;
            let mut dn = point;
            up[p] += h;
            dn[p] -= h;
            let numeric = (lik.nll(&up).unwrap() - lik.nll(&dn).unwrap()) / (2.0 * h);
            assert_relative_eq!(grad[p], numeric, max_relative = 1e-4);
        }
    }

    #[test]
    fn untouched_parameters_have_exactly_zero_gradient() {
        let cat = Catalogue::from_json_str(
            r#"{
                "name": "toy",
                "sm": [100.0, 200.0],
                "sm_is_yields": true,
                "parameters": ["chw", "chdd"],
                "terms": [{"parameters": ["chw"], "coefficients": [1.0, -0.4]}]
            }"#,
        )
        .unwrap();
        let lik = ScalingLikelihood::from_catalogue(
            &cat,
            &ExposureConfig::default(),
            &UncertaintyConfig::default(),
            (-100.0, 100.0),
        )
        .unwrap();

        // chdd sits in the parameter vector but in no term: moving it can
        // never change the NLL, and its gradient entry is exactly zero.
        let grad = lik.grad_nll(&[0.3, 7.0]).unwrap();
        assert!(grad[0] != 0.0);
        assert_eq!(grad[1], 0.0);
        assert_eq!(lik.nll(&[0.3, 7.0]).unwrap(), lik.nll(&[0.3, -2.0]).unwrap());
    }

    #[test]
    fn rejects_indefinite_covariance() {
        let cat = Catalogue::from_json_str(
            r#"{
                "name": "toy",
                "sm": [100.0, 100.0],
                "sm_is_yields": true,
                "parameters": ["c1"],
                "terms": [{"parameters": ["c1"], "coefficients": [1.0, 1.0]}]
            }"#,
        )
        .unwrap();
        let scaling = ScalingModel::from_catalogue(&cat).unwrap();
        // Eigenvalues 3 and -1.
        let bad = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        let err = ScalingLikelihood::new(scaling, bad, vec![(-100.0, 100.0)]).unwrap_err();
        assert!(matches!(err, Error::Numerical(_)));
    }

    #[test]
    fn catalogue_bounds_override_default() {
        let cat = Catalogue::from_json_str(
            r#"{
                "name": "toy",
                "sm": [100.0],
                "sm_is_yields": true,
                "parameters": ["chw", "chdd"],
                "bounds": {"chdd": [-5.0, 5.0]},
                "terms": [{"parameters": ["chw"], "coefficients": [1.0]}]
            }"#,
        )
        .unwrap();
        let lik = ScalingLikelihood::from_catalogue(
            &cat,
            &ExposureConfig::default(),
            &UncertaintyConfig::default(),
            (-100.0, 100.0),
        )
        .unwrap();
        assert_eq!(lik.parameter_bounds(), vec![(-100.0, 100.0), (-5.0, 5.0)]);

        let set = lik.parameter_set().unwrap();
        assert_eq!(set.names(), vec!["chw", "chdd"]);
        assert_eq!(set.values(), vec![0.0, 0.0]);
        assert_eq!(set.free_indices(), vec![0, 1]);
    }

    #[test]
    fn wrong_parameter_count_is_a_schema_error() {
        let lik = symmetric_pair();
        assert!(matches!(lik.nll(&[0.0, 0.0]), Err(Error::Schema(_))));
    }
}
