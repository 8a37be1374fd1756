//! Joint and one-at-a-time fits over an explicit parameter state.
//!
//! The driver owns the fit sequence: zero and free the requested
//! parameters, optionally fit them jointly, capture the `initial` snapshot
//! that every later step restores from, and in one-at-a-time mode fit each
//! parameter alone with the others pinned. A failed single-parameter fit is
//! recorded and logged but never aborts the remaining parameters.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use eft_core::{Error, FitResult, NllModel, ParameterSet, Result};

use crate::hessian::{covariance_from_hessian, diagonal_uncertainties, hessian};
use crate::optimizer::{LbfgsMinimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};

/// Label of the snapshot captured after the initial fit stage.
pub const INITIAL_SNAPSHOT: &str = "initial";

/// How the requested parameters are fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// All requested parameters float together in a single fit.
    Joint,
    /// Each requested parameter is fitted alone, the others held at their
    /// initial values.
    OneAtATime,
}

impl fmt::Display for FitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitMode::Joint => write!(f, "joint"),
            FitMode::OneAtATime => write!(f, "one-at-a-time"),
        }
    }
}

/// Estimate from a one-at-a-time fit.
#[derive(Debug, Clone, Serialize)]
pub struct ParamEstimate {
    /// Best-fit value.
    pub value: f64,
    /// Hessian uncertainty.
    pub uncertainty: f64,
    /// NLL at the best-fit point.
    pub nll: f64,
}

/// Outcome of one single-parameter fit.
#[derive(Debug, Clone, Serialize)]
pub struct SingleFit {
    /// Parameter name.
    pub parameter: String,
    /// The estimate, absent when the fit failed.
    pub estimate: Option<ParamEstimate>,
    /// Failure description when the fit did not converge.
    pub message: Option<String>,
}

/// Everything the fit stage produces.
#[derive(Debug, Clone, Serialize)]
pub struct FitReport {
    /// Mode the fits ran in.
    pub mode: FitMode,
    /// Joint fit result, present in [`FitMode::Joint`].
    pub joint: Option<FitResult>,
    /// Single-parameter results in request order, present in
    /// [`FitMode::OneAtATime`].
    pub singles: Vec<SingleFit>,
}

/// View of a model over its free parameters, the fixed ones pinned at the
/// values captured in `template`.
pub(crate) struct Subspace<'a> {
    model: &'a dyn NllModel,
    template: Vec<f64>,
    free: Vec<usize>,
}

impl<'a> Subspace<'a> {
    pub(crate) fn new(model: &'a dyn NllModel, template: Vec<f64>, free: Vec<usize>) -> Self {
        Self { model, template, free }
    }

    fn expand(&self, reduced: &[f64]) -> Vec<f64> {
        let mut full = self.template.clone();
        for (&i, &v) in self.free.iter().zip(reduced) {
            full[i] = v;
        }
        full
    }
}

impl ObjectiveFunction for Subspace<'_> {
    fn eval(&self, reduced: &[f64]) -> Result<f64> {
        self.model.nll(&self.expand(reduced))
    }

    fn gradient(&self, reduced: &[f64]) -> Result<Vec<f64>> {
        let grad = self.model.grad_nll(&self.expand(reduced))?;
        Ok(self.free.iter().map(|&i| grad[i]).collect())
    }
}

/// Minimize the model over the currently free parameters of `state` and
/// write the best values back. The reduced result follows the order of
/// [`ParameterSet::free_indices`].
///
/// With nothing free this degenerates to a single NLL evaluation.
pub(crate) fn minimize_free(
    model: &dyn NllModel,
    state: &mut ParameterSet,
    optimizer: &LbfgsMinimizer,
) -> Result<OptimizationResult> {
    let free = state.free_indices();
    let full = state.values();
    if free.is_empty() {
        return Ok(OptimizationResult {
            parameters: Vec::new(),
            fval: model.nll(&full)?,
            n_iter: 0,
            n_fev: 1,
            n_gev: 0,
            converged: true,
            message: "no free parameters".into(),
        });
    }

    let init: Vec<f64> = free.iter().map(|&i| full[i]).collect();
    let all_bounds = state.bounds();
    let bounds: Vec<(f64, f64)> = free.iter().map(|&i| all_bounds[i]).collect();
    let names = state.names();

    let objective = Subspace::new(model, full, free.clone());
    let result = optimizer.minimize(&objective, &init, &bounds)?;

    for (k, &i) in free.iter().enumerate() {
        state.set_value(&names[i], result.parameters[k])?;
    }
    Ok(result)
}

/// Drives the fit stage for one model.
pub struct FitDriver<'a> {
    model: &'a dyn NllModel,
    optimizer: LbfgsMinimizer,
}

impl<'a> FitDriver<'a> {
    /// Create a driver for `model`.
    pub fn new(model: &'a dyn NllModel, config: OptimizerConfig) -> Self {
        Self { model, optimizer: LbfgsMinimizer::new(config) }
    }

    /// Run the fit stage for the `requested` parameters.
    ///
    /// Parameters not requested are held fixed at their current values.
    /// Requested ones start free at zero. In joint mode they are fitted
    /// together and the result carries the covariance-derived uncertainties;
    /// a joint fit that fails to converge is a `Convergence` error. In
    /// one-at-a-time mode each requested parameter is fitted alone and a
    /// per-parameter failure is recorded in its [`SingleFit`] instead of
    /// aborting the rest.
    ///
    /// The `initial` snapshot is captured after the optional joint fit, so
    /// later stages (single fits, scans) start from the joint best-fit
    /// point in joint mode and from zero otherwise. On return the state
    /// matches that snapshot.
    pub fn run(
        &self,
        state: &mut ParameterSet,
        mode: FitMode,
        requested: &[String],
    ) -> Result<FitReport> {
        if state.names() != self.model.parameter_names() {
            return Err(Error::Schema(
                "parameter state does not match the model's parameters".into(),
            ));
        }
        if requested.is_empty() {
            return Err(Error::Schema("no parameters requested".into()));
        }
        let mut seen = HashSet::new();
        for name in requested {
            state.index_of(name)?;
            if !seen.insert(name.as_str()) {
                return Err(Error::Schema(format!("parameter '{name}' requested twice")));
            }
        }

        for name in state.names() {
            if !seen.contains(name.as_str()) {
                state.set_fixed(&name)?;
            }
        }
        for name in requested {
            state.set_free(name)?;
            state.set_value(name, 0.0)?;
        }

        let joint = match mode {
            FitMode::Joint => Some(self.fit_joint(state)?),
            FitMode::OneAtATime => None,
        };

        state.snapshot(INITIAL_SNAPSHOT);

        let mut singles = Vec::new();
        if mode == FitMode::OneAtATime {
            for name in requested {
                state.restore(INITIAL_SNAPSHOT)?;
                for other in requested {
                    if other != name {
                        state.set_fixed(other)?;
                    }
                }
                let single = match self.fit_single(state, name) {
                    Ok(estimate) => SingleFit {
                        parameter: name.clone(),
                        estimate: Some(estimate),
                        message: None,
                    },
                    Err(Error::Convergence(msg)) => {
                        log::warn!("fit for '{name}' failed: {msg}");
                        SingleFit { parameter: name.clone(), estimate: None, message: Some(msg) }
                    }
                    Err(e) => return Err(e),
                };
                singles.push(single);
            }
            state.restore(INITIAL_SNAPSHOT)?;
        }

        Ok(FitReport { mode, joint, singles })
    }

    fn fit_joint(&self, state: &mut ParameterSet) -> Result<FitResult> {
        let result = minimize_free(self.model, state, &self.optimizer)?;
        if !result.converged {
            return Err(Error::Convergence(format!(
                "joint fit did not converge: {}",
                result.message
            )));
        }

        let free = state.free_indices();
        let names = state.names();
        let fit_names: Vec<String> = free.iter().map(|&i| names[i].clone()).collect();
        let objective = Subspace::new(self.model, state.values(), free);
        let hess = hessian(&objective, &result.parameters)?;

        let n = hess.nrows();
        let fit = match covariance_from_hessian(&hess) {
            Some(cov) => {
                let uncertainties = (0..n).map(|i| cov[(i, i)].sqrt()).collect();
                let cov = &cov;
                let flat: Vec<f64> =
                    (0..n).flat_map(|i| (0..n).map(move |j| cov[(i, j)])).collect();
                FitResult::with_covariance(
                    fit_names,
                    result.parameters,
                    uncertainties,
                    flat,
                    result.fval,
                    true,
                    result.n_fev + result.n_gev,
                )
            }
            None => {
                log::warn!(
                    "joint fit covariance inversion failed; using diagonal Hessian uncertainties"
                );
                FitResult::new(
                    fit_names,
                    result.parameters,
                    diagonal_uncertainties(&hess),
                    result.fval,
                    true,
                    result.n_fev + result.n_gev,
                )
            }
        };
        Ok(fit)
    }

    fn fit_single(&self, state: &mut ParameterSet, name: &str) -> Result<ParamEstimate> {
        let result = minimize_free(self.model, state, &self.optimizer)?;
        if !result.converged {
            return Err(Error::Convergence(format!(
                "fit for '{name}' stopped early: {}",
                result.message
            )));
        }

        let objective = Subspace::new(self.model, state.values(), state.free_indices());
        let hess = hessian(&objective, &result.parameters)?;
        let uncertainty = match covariance_from_hessian(&hess) {
            Some(cov) => cov[(0, 0)].sqrt(),
            None => {
                log::warn!("Hessian for '{name}' is not invertible; using diagonal uncertainty");
                diagonal_uncertainties(&hess)[0]
            }
        };
        Ok(ParamEstimate { value: result.parameters[0], uncertainty, nll: result.fval })
    }
}
