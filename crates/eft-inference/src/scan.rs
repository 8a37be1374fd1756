//! Profile likelihood scans.
//!
//! A scan walks one parameter across a midpoint grid centered on its
//! best-fit value, re-minimizing every remaining free parameter at each
//! grid point, and records the NLL rise over the best-fit minimum. The
//! scanner is an explicit state machine (`Idle` through `Done`) so the
//! best-fit row is always recorded before the parameter is fixed and no
//! grid point can run twice.
//!
//! Only points with a positive NLL rise are retained. A negative rise
//! means the recorded best fit was not the true minimum; such points are
//! dropped with a warning (or kept when configured, for diagnosing exactly
//! that situation).

use serde::{Deserialize, Serialize};

use eft_core::{Error, NllModel, ParameterSet, Result};

use crate::fit::{minimize_free, FitMode, FitReport, INITIAL_SNAPSHOT};
use crate::optimizer::{LbfgsMinimizer, OptimizerConfig};

fn default_points() -> usize {
    50
}

fn default_range_multiplier() -> f64 {
    3.0
}

/// Scan settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Number of grid points (excluding the best-fit row).
    #[serde(default = "default_points")]
    pub points: usize,
    /// Half-width of the scan window in units of the parameter uncertainty.
    #[serde(default = "default_range_multiplier")]
    pub range_multiplier: f64,
    /// Keep points whose NLL lies below the recorded best fit instead of
    /// dropping them. They still produce a warning.
    #[serde(default)]
    pub retain_negative: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            points: default_points(),
            range_multiplier: default_range_multiplier(),
            retain_negative: false,
        }
    }
}

/// Scan target: the best-fit value and uncertainty of one parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ScanRequest {
    /// Parameter to scan.
    pub parameter: String,
    /// Best-fit value the scan window centers on.
    pub value: f64,
    /// Uncertainty setting the window half-width.
    pub uncertainty: f64,
}

impl ScanRequest {
    /// Derive scan targets from a fit report: every jointly fitted
    /// parameter, or every one-at-a-time parameter with a usable estimate.
    /// Parameters whose single fit failed have no window to scan.
    pub fn from_report(report: &FitReport) -> Vec<ScanRequest> {
        if let Some(joint) = &report.joint {
            joint
                .parameter_names
                .iter()
                .zip(joint.parameters.iter().zip(&joint.uncertainties))
                .map(|(name, (&value, &uncertainty))| ScanRequest {
                    parameter: name.clone(),
                    value,
                    uncertainty,
                })
                .collect()
        } else {
            report
                .singles
                .iter()
                .filter_map(|single| {
                    single.estimate.as_ref().map(|est| ScanRequest {
                        parameter: single.parameter.clone(),
                        value: est.value,
                        uncertainty: est.uncertainty,
                    })
                })
                .collect()
        }
    }
}

/// One retained scan row.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScanPoint {
    /// Value of the scanned parameter.
    pub value: f64,
    /// NLL rise over the best-fit minimum.
    pub delta_nll: f64,
    /// Expected-quantile marker, fixed at 1.0.
    pub quantile_expected: f64,
}

/// Completed scan of one parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileScan {
    /// Output label the scan belongs to.
    pub label: String,
    /// Scanned parameter.
    pub parameter: String,
    /// Best-fit value.
    pub best_fit: f64,
    /// Uncertainty used for the window.
    pub uncertainty: f64,
    /// NLL at the best-fit point.
    pub nll_best: f64,
    /// Retained rows, best-fit row first.
    pub points: Vec<ScanPoint>,
}

/// Scanner lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    /// Nothing recorded yet.
    Idle,
    /// Best-fit row recorded, parameter fixed, grid laid out.
    BestFitRecorded,
    /// Somewhere inside the grid walk.
    Scanning,
    /// All grid points processed.
    Done,
}

/// Walks one parameter across its scan grid.
pub struct ProfileScanner<'a> {
    model: &'a dyn NllModel,
    state: ParameterSet,
    optimizer: LbfgsMinimizer,
    config: ScanConfig,
    label: String,
    parameter: String,
    best_fit: f64,
    uncertainty: f64,
    nll_best: f64,
    grid: Vec<f64>,
    start_values: Vec<f64>,
    cursor: usize,
    phase: ScanPhase,
    points: Vec<ScanPoint>,
}

impl<'a> ProfileScanner<'a> {
    /// Create a scanner over its own copy of the parameter state.
    ///
    /// The state must match the model's parameters; the request must name a
    /// known parameter and carry a positive, finite uncertainty.
    pub fn new(
        model: &'a dyn NllModel,
        state: ParameterSet,
        label: &str,
        request: &ScanRequest,
        optimizer: OptimizerConfig,
        config: ScanConfig,
    ) -> Result<Self> {
        if state.names() != model.parameter_names() {
            return Err(Error::Schema(
                "parameter state does not match the model's parameters".into(),
            ));
        }
        state.index_of(&request.parameter)?;
        if !(request.uncertainty.is_finite() && request.uncertainty > 0.0) {
            return Err(Error::Domain(format!(
                "scan window for '{}' needs a positive uncertainty, got {}",
                request.parameter, request.uncertainty
            )));
        }
        if config.points == 0 {
            return Err(Error::Domain("scan needs at least one grid point".into()));
        }
        if !(config.range_multiplier.is_finite() && config.range_multiplier > 0.0) {
            return Err(Error::Domain(format!(
                "scan range multiplier must be positive, got {}",
                config.range_multiplier
            )));
        }
        Ok(Self {
            model,
            state,
            optimizer: LbfgsMinimizer::new(optimizer),
            config,
            label: label.to_string(),
            parameter: request.parameter.clone(),
            best_fit: request.value,
            uncertainty: request.uncertainty,
            nll_best: 0.0,
            grid: Vec::new(),
            start_values: Vec::new(),
            cursor: 0,
            phase: ScanPhase::Idle,
            points: Vec::new(),
        })
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    /// Grid values laid out by [`record_best_fit`](Self::record_best_fit).
    pub fn grid(&self) -> &[f64] {
        &self.grid
    }

    /// Rows retained so far, best-fit row first.
    pub fn points(&self) -> &[ScanPoint] {
        &self.points
    }

    /// Record the best-fit row, fix the scanned parameter, and lay out the
    /// midpoint grid over `value ± multiplier * uncertainty`.
    pub fn record_best_fit(&mut self) -> Result<()> {
        if self.phase != ScanPhase::Idle {
            return Err(Error::Domain("best-fit row already recorded".into()));
        }
        log::info!(
            "{}: scanning {} = {:.6} +/- {:.6}",
            self.label,
            self.parameter,
            self.best_fit,
            self.uncertainty
        );
        self.state.set_value(&self.parameter, self.best_fit)?;
        self.points.push(ScanPoint {
            value: self.best_fit,
            delta_nll: 0.0,
            quantile_expected: 1.0,
        });
        self.nll_best = self.model.nll(&self.state.values())?;
        self.state.set_fixed(&self.parameter)?;

        let half_width = self.config.range_multiplier * self.uncertainty;
        let r_min = self.best_fit - half_width;
        let r_max = self.best_fit + half_width;
        let width = (r_max - r_min) / self.config.points as f64;
        self.grid = (0..self.config.points)
            .map(|k| r_min + (k as f64 + 0.5) * width)
            .collect();

        self.start_values = self.state.values();
        self.phase = ScanPhase::BestFitRecorded;
        Ok(())
    }

    /// Process one grid point and return the phase afterwards.
    ///
    /// Every point starts the remaining free parameters from the values
    /// captured at [`record_best_fit`](Self::record_best_fit), so points
    /// are independent of each other. Grid values outside the parameter's
    /// bounds and points whose minimization fails are dropped with a
    /// warning. Calling this after the grid is exhausted is a no-op.
    pub fn step(&mut self) -> Result<ScanPhase> {
        match self.phase {
            ScanPhase::Idle => {
                return Err(Error::Domain("best-fit row has not been recorded".into()));
            }
            ScanPhase::Done => return Ok(ScanPhase::Done),
            ScanPhase::BestFitRecorded | ScanPhase::Scanning => {}
        }

        let r = self.grid[self.cursor];
        let names = self.state.names();
        let index = self.state.index_of(&self.parameter)?;
        let (lo, hi) = self.state.bounds()[index];

        if r < lo || r > hi {
            log::warn!(
                "{}: grid value {r:.6} outside bounds [{lo}, {hi}]; dropping point",
                self.parameter
            );
            return Ok(self.advance());
        }

        for (name, &value) in names.iter().zip(&self.start_values) {
            self.state.set_value(name, value)?;
        }
        self.state.set_value(&self.parameter, r)?;

        match minimize_free(self.model, &mut self.state, &self.optimizer) {
            Ok(result) if result.converged => {
                let delta = result.fval - self.nll_best;
                log::debug!(
                    "{}: r = {r:.6}; nll0 = {:.6}; nll = {:.6}; deltaNLL = {delta:.6}",
                    self.parameter,
                    self.nll_best,
                    result.fval
                );
                if delta < 0.0 {
                    log::warn!(
                        "{}: deltaNLL = {delta:.6} at r = {r:.6} lies below the recorded \
                         best fit",
                        self.parameter
                    );
                }
                if delta > 0.0 || self.config.retain_negative {
                    self.points.push(ScanPoint {
                        value: r,
                        delta_nll: delta,
                        quantile_expected: 1.0,
                    });
                }
            }
            Ok(result) => {
                log::warn!(
                    "{}: minimization at r = {r:.6} stopped early ({}); dropping point",
                    self.parameter,
                    result.message
                );
            }
            Err(Error::Convergence(msg)) => {
                log::warn!(
                    "{}: minimization at r = {r:.6} failed ({msg}); dropping point",
                    self.parameter
                );
            }
            Err(e) => return Err(e),
        }

        Ok(self.advance())
    }

    fn advance(&mut self) -> ScanPhase {
        self.cursor += 1;
        self.phase =
            if self.cursor == self.grid.len() { ScanPhase::Done } else { ScanPhase::Scanning };
        self.phase
    }

    /// Consume the scanner once the grid is exhausted.
    pub fn finish(self) -> Result<ProfileScan> {
        if self.phase != ScanPhase::Done {
            return Err(Error::Domain("scan has not processed its full grid".into()));
        }
        Ok(ProfileScan {
            label: self.label,
            parameter: self.parameter,
            best_fit: self.best_fit,
            uncertainty: self.uncertainty,
            nll_best: self.nll_best,
            points: self.points,
        })
    }

    /// Record the best fit, walk the whole grid, and finish.
    pub fn run(mut self) -> Result<ProfileScan> {
        self.record_best_fit()?;
        while self.step()? != ScanPhase::Done {}
        self.finish()
    }
}

/// Scan every target from a fit report, in parallel across parameters.
///
/// Each scan works on its own clone of `base` restored to the `initial`
/// snapshot. In one-at-a-time mode the other requested parameters are
/// fixed first, mirroring how their fits ran.
pub fn run_scans(
    model: &dyn NllModel,
    base: &ParameterSet,
    label: &str,
    requested: &[String],
    report: &FitReport,
    optimizer: OptimizerConfig,
    config: ScanConfig,
) -> Result<Vec<ProfileScan>> {
    use rayon::prelude::*;

    let targets = ScanRequest::from_report(report);
    targets
        .par_iter()
        .map(|request| {
            let mut state = base.clone();
            state.restore(INITIAL_SNAPSHOT)?;
            if report.mode == FitMode::OneAtATime {
                for other in requested {
                    if other != &request.parameter {
                        state.set_fixed(other)?;
                    }
                }
            }
            ProfileScanner::new(model, state, label, request, optimizer, config)?.run()
        })
        .collect()
}
