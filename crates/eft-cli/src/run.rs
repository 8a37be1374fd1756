//! Config-driven runs: one file describing the catalogue, the fits and the
//! scans, so a full sensitivity study is reproducible from a single command.

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use eft_core::NllModel;
use eft_inference::{run_scans, FitDriver, FitMode, OptimizerConfig, ScanConfig};
use eft_model::{Catalogue, ExposureConfig, ScalingLikelihood, UncertaintyConfig};

fn default_mode() -> FitMode {
    FitMode::OneAtATime
}

fn default_scans() -> bool {
    true
}

fn default_threads() -> usize {
    1
}

/// Default Wilson coefficient range.
pub fn default_bounds() -> (f64, f64) {
    (-100.0, 100.0)
}

/// Settings of one full run: fits plus optional scans.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Path to the catalogue (JSON).
    pub catalogue: PathBuf,
    /// Directory fit and scan artifacts are written into.
    pub out_dir: PathBuf,
    /// Label used in artifact file names. Defaults to the catalogue name.
    #[serde(default)]
    pub label: Option<String>,
    /// Parameters to fit. Defaults to every catalogue parameter.
    #[serde(default)]
    pub params: Vec<String>,
    /// Fit mode.
    #[serde(default = "default_mode")]
    pub mode: FitMode,
    /// Whether profile likelihood scans follow the fits.
    #[serde(default = "default_scans")]
    pub scans: bool,
    /// Number of threads (0 = all cores).
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Exposure applied to cross-section catalogues.
    #[serde(default)]
    pub exposure: ExposureConfig,
    /// Uncertainty model settings.
    #[serde(default)]
    pub uncertainty: UncertaintyConfig,
    /// Optimizer settings.
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// Scan settings.
    #[serde(default)]
    pub scan: ScanConfig,
    /// Parameter bounds applied where the catalogue declares none.
    #[serde(default = "default_bounds")]
    pub bounds: (f64, f64),
}

/// Read a run config. YAML by default, JSON for `.json` paths.
pub fn read_run_config(path: &Path) -> Result<RunConfig> {
    let bytes = std::fs::read(path)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let cfg = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        serde_yaml_ng::from_slice(&bytes)?
    };
    Ok(cfg)
}

/// Execute a run: load the catalogue, fit, write the report, scan.
pub fn execute(cfg: &RunConfig) -> Result<()> {
    crate::init_threads(cfg.threads);

    tracing::info!(path = %cfg.catalogue.display(), "loading catalogue");
    let catalogue = Catalogue::from_path(&cfg.catalogue)?;
    let label = cfg.label.clone().unwrap_or_else(|| catalogue.name.clone());
    let likelihood = ScalingLikelihood::from_catalogue(
        &catalogue,
        &cfg.exposure,
        &cfg.uncertainty,
        cfg.bounds,
    )?;
    tracing::info!(
        bins = likelihood.n_bins(),
        parameters = likelihood.dim(),
        "model ready"
    );

    let requested = if cfg.params.is_empty() {
        likelihood.parameter_names()
    } else {
        cfg.params.clone()
    };

    let mut state = likelihood.parameter_set()?;
    let driver = FitDriver::new(&likelihood, cfg.optimizer);
    let report = driver.run(&mut state, cfg.mode, &requested)?;
    crate::log_fit_report(&report);

    std::fs::create_dir_all(&cfg.out_dir)?;
    let report_path = cfg.out_dir.join(format!("fit_{label}.json"));
    std::fs::write(
        &report_path,
        serde_json::to_string_pretty(&crate::artifact::fit_report_json(&label, &report))?,
    )?;
    tracing::info!(path = %report_path.display(), "wrote fit report");

    if cfg.scans {
        let scans = run_scans(
            &likelihood,
            &state,
            &label,
            &requested,
            &report,
            cfg.optimizer,
            cfg.scan,
        )?;
        let files = crate::artifact::write_scan_artifacts(&cfg.out_dir, &scans)?;
        for file in &files {
            tracing::info!(path = %file.display(), "wrote scan");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_in_defaults() {
        let cfg: RunConfig =
            serde_yaml_ng::from_str("catalogue: cat.json\nout_dir: out\n").unwrap();
        assert_eq!(cfg.catalogue, PathBuf::from("cat.json"));
        assert_eq!(cfg.out_dir, PathBuf::from("out"));
        assert!(cfg.label.is_none());
        assert!(cfg.params.is_empty());
        assert_eq!(cfg.mode, FitMode::OneAtATime);
        assert!(cfg.scans);
        assert_eq!(cfg.threads, 1);
        assert_eq!(cfg.scan.points, 50);
        assert_eq!(cfg.scan.range_multiplier, 3.0);
        assert_eq!(cfg.optimizer.max_iter, 200);
        assert_eq!(cfg.bounds, (-100.0, 100.0));
    }

    #[test]
    fn sections_override_individual_fields() {
        let text = "\
catalogue: cat.json
out_dir: out
label: smoke
mode: joint
scans: false
params: [chw, chdd]
uncertainty:
  syst_fraction: 0.1
scan:
  points: 10
  retain_negative: true
bounds: [-10.0, 10.0]
";
        let cfg: RunConfig = serde_yaml_ng::from_str(text).unwrap();
        assert_eq!(cfg.label.as_deref(), Some("smoke"));
        assert_eq!(cfg.mode, FitMode::Joint);
        assert!(!cfg.scans);
        assert_eq!(cfg.params, vec!["chw".to_string(), "chdd".to_string()]);
        assert_eq!(cfg.uncertainty.syst_fraction, 0.1);
        // untouched fields in a partially given section keep their defaults
        assert_eq!(cfg.uncertainty.background_ratio, 3.0);
        assert_eq!(cfg.scan.points, 10);
        assert!(cfg.scan.retain_negative);
        assert_eq!(cfg.scan.range_multiplier, 3.0);
        assert_eq!(cfg.bounds, (-10.0, 10.0));
    }

    #[test]
    fn json_configs_parse_too() {
        let text = r#"{"catalogue": "cat.json", "out_dir": "out", "mode": "one_at_a_time"}"#;
        let cfg: RunConfig = serde_json::from_str(text).unwrap();
        assert_eq!(cfg.mode, FitMode::OneAtATime);
    }
}
