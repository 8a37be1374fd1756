//! Bounded quasi-Newton minimization.
//!
//! A thin wrapper around argmin's L-BFGS that adds box constraints via
//! clamping plus a projected gradient, and reports evaluation counts and a
//! termination status in one flat result.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use eft_core::{Error, Result};

fn default_max_iter() -> u64 {
    200
}

fn default_tol() -> f64 {
    1e-7
}

fn default_memory() -> usize {
    10
}

/// L-BFGS settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Maximum number of iterations.
    #[serde(default = "default_max_iter")]
    pub max_iter: u64,
    /// Convergence tolerance on the gradient norm.
    #[serde(default = "default_tol")]
    pub tol: f64,
    /// Number of corrections kept for the inverse-Hessian approximation.
    #[serde(default = "default_memory")]
    pub memory: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: default_max_iter(), tol: default_tol(), memory: default_memory() }
    }
}

/// Outcome of one minimization.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Parameter values at the best point seen.
    pub parameters: Vec<f64>,
    /// Objective value at the best point.
    pub fval: f64,
    /// Iterations performed.
    pub n_iter: u64,
    /// Objective evaluations.
    pub n_fev: usize,
    /// Gradient evaluations.
    pub n_gev: usize,
    /// Whether the solver reported convergence (as opposed to running out
    /// of iterations).
    pub converged: bool,
    /// Termination status, verbatim from the solver.
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

/// A scalar objective over a parameter vector.
pub trait ObjectiveFunction: Send + Sync {
    /// Evaluate the objective.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of the objective. The default is a central-difference
    /// estimate; implementors with an analytic gradient should override it.
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let n = params.len();
        let mut grad = vec![0.0; n];
        for i in 0..n {
            let eps = 1e-8 * params[i].abs().max(1.0);
            let mut up = params.to_vec();
            up[i] += eps;
            let f_up = self.eval(&up)?;
            let mut dn = params.to_vec();
            dn[i] -= eps;
            let f_dn = self.eval(&dn)?;
            grad[i] = (f_up - f_dn) / (2.0 * eps);
        }
        Ok(grad)
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

/// Adapter exposing an [`ObjectiveFunction`] to argmin with bounds applied.
struct ArgminProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
    counts: Arc<FuncCounts>,
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        self.objective.eval(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        let mut g = self
            .objective
            .gradient(&clamped)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        // Projected gradient: at an active bound, a component pointing
        // further outside is zeroed so the line search does not keep
        // stepping into the clamped region.
        const EPS: f64 = 1e-12;
        for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds.iter()).enumerate() {
            if x <= lo + EPS && g[i] > 0.0 {
                g[i] = 0.0;
            }
            if x >= hi - EPS && g[i] < 0.0 {
                g[i] = 0.0;
            }
        }

        Ok(g)
    }
}

/// Box-constrained L-BFGS minimizer.
#[derive(Debug, Clone, Default)]
pub struct LbfgsMinimizer {
    config: OptimizerConfig,
}

impl LbfgsMinimizer {
    /// Create a minimizer with the given settings.
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize `objective` starting from `init_params`, keeping every
    /// parameter inside its bounds.
    ///
    /// Returns `Ok` with `converged == false` when the solver stops on the
    /// iteration limit; callers that require convergence check the flag.
    /// Solver failures (line search breakdown, objective errors) surface as
    /// `Convergence` errors.
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init_params.len() != bounds.len() {
            return Err(Error::Schema(format!(
                "{} initial values but {} bound pairs",
                init_params.len(),
                bounds.len()
            )));
        }

        let init_clamped = clamp_params(init_params, bounds);
        let counts = Arc::new(FuncCounts::default());
        let problem = ArgminProblem { objective, bounds, counts: counts.clone() };

        // The line search cannot take a step when the projected gradient
        // already vanishes at the starting point, which is the normal case
        // for a model whose observation equals its prediction. Report
        // convergence there instead of handing argmin a zero direction.
        let g0 = Gradient::gradient(&problem, &init_clamped)
            .map_err(|e| Error::Convergence(format!("gradient evaluation failed: {e}")))?;
        let g0_norm = g0.iter().map(|g| g * g).sum::<f64>().sqrt();
        if g0_norm < self.config.tol {
            let fval = CostFunction::cost(&problem, &init_clamped)
                .map_err(|e| Error::Convergence(format!("objective evaluation failed: {e}")))?;
            return Ok(OptimizationResult {
                parameters: init_clamped,
                fval,
                n_iter: 0,
                n_fev: counts.cost.load(Ordering::Relaxed),
                n_gev: counts.grad.load(Ordering::Relaxed),
                converged: true,
                message: "gradient tolerance reached at the initial point".into(),
            });
        }

        let linesearch = MoreThuenteLineSearch::new();
        // Argmin's default cost tolerance is near machine epsilon, which is
        // too strict for NLL values that carry a large constant offset and
        // leads to spurious max-iter terminations.
        let tol_cost =
            if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(linesearch, self.config.memory)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| Error::Domain(format!("invalid optimizer tolerance: {e}")))?
            .with_tolerance_cost(tol_cost)
            .map_err(|e| Error::Domain(format!("invalid optimizer cost tolerance: {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init_clamped).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Convergence(format!("minimization failed: {e}")))?;

        let state = res.state();
        let best_unclamped = state
            .get_best_param()
            .ok_or_else(|| Error::Convergence("no best parameters found".into()))?
            .clone();
        let parameters = clamp_params(&best_unclamped, bounds);
        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );

        Ok(OptimizationResult {
            parameters,
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: counts.cost.load(Ordering::Relaxed),
            n_gev: counts.grad.load(Ordering::Relaxed),
            converged,
            message: termination.to_string(),
        })
    }
}
