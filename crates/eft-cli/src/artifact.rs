//! JSON artifacts written by the fit and scan stages.
//!
//! Scan files follow the layout downstream plotting expects: one row per
//! retained grid point, each row carrying exactly three columns named after
//! the scanned parameter, `deltaNLL` and `quantileExpected`.

use anyhow::Result;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use eft_inference::{FitReport, ProfileScan};

/// File name of one scan artifact.
pub fn scan_file_name(label: &str, parameter: &str) -> String {
    format!("scan_{label}_{parameter}.json")
}

/// Scan artifact: label, parameter and the retained rows.
pub fn scan_artifact_json(scan: &ProfileScan) -> Value {
    let rows: Vec<Value> = scan
        .points
        .iter()
        .map(|point| {
            let mut row = serde_json::Map::new();
            row.insert(scan.parameter.clone(), json!(point.value));
            row.insert("deltaNLL".to_string(), json!(point.delta_nll));
            row.insert("quantileExpected".to_string(), json!(point.quantile_expected));
            Value::Object(row)
        })
        .collect();
    json!({
        "label": scan.label,
        "parameter": scan.parameter,
        "best_fit": scan.best_fit,
        "uncertainty": scan.uncertainty,
        "rows": rows,
    })
}

/// Write one artifact per scan into `out_dir`, creating it if needed.
/// Returns the written paths in scan order.
pub fn write_scan_artifacts(out_dir: &Path, scans: &[ProfileScan]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)?;
    let mut paths = Vec::with_capacity(scans.len());
    for scan in scans {
        let path = out_dir.join(scan_file_name(&scan.label, &scan.parameter));
        std::fs::write(&path, serde_json::to_string_pretty(&scan_artifact_json(scan))?)?;
        paths.push(path);
    }
    Ok(paths)
}

/// Fit report artifact. The joint block is `null` in one-at-a-time mode and
/// the singles list is empty in joint mode.
pub fn fit_report_json(label: &str, report: &FitReport) -> Value {
    let joint = report.joint.as_ref().map(|joint| {
        json!({
            "parameter_names": joint.parameter_names,
            "bestfit": joint.parameters,
            "uncertainties": joint.uncertainties,
            "nll": joint.nll,
            "twice_nll": 2.0 * joint.nll,
            "converged": joint.converged,
            "n_evaluations": joint.n_evaluations,
            "covariance": joint.covariance,
            "correlation": joint.correlation_matrix(),
        })
    });
    let singles: Vec<Value> = report
        .singles
        .iter()
        .map(|single| match &single.estimate {
            Some(est) => json!({
                "parameter": single.parameter,
                "value": est.value,
                "uncertainty": est.uncertainty,
                "nll": est.nll,
                "converged": true,
                "message": single.message,
            }),
            None => json!({
                "parameter": single.parameter,
                "value": Value::Null,
                "uncertainty": Value::Null,
                "nll": Value::Null,
                "converged": false,
                "message": single.message,
            }),
        })
        .collect();
    json!({
        "label": label,
        "mode": report.mode.to_string(),
        "joint": joint,
        "singles": singles,
    })
}
