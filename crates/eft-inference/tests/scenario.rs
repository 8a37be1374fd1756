//! End-to-end fits and scans over real catalogues, driver to artifact rows.

use approx::assert_relative_eq;

use eft_inference::{
    run_scans, FitDriver, FitMode, OptimizerConfig, ProfileScanner, ScanConfig, ScanRequest,
};
use eft_model::{Catalogue, ExposureConfig, ScalingLikelihood, UncertaintyConfig};

/// Two mirrored bins, one linear parameter. The covariance works out to
/// [[0.000625, 0.000225], [0.000225, 0.000625]], so the NLL is exactly
/// 2500 c1^2 above its minimum and the Hessian width is sqrt(2e-4).
const SYMMETRIC_PAIR: &str = r#"{
  "name": "symmetric_pair",
  "sm_is_yields": true,
  "sm": [3250.0, 3250.0],
  "background": [975.0, 975.0],
  "parameters": ["c1"],
  "terms": [
    { "parameters": ["c1"], "coefficients": [1.0, -1.0] }
  ]
}"#;

/// Three bins, two parameters with nearly parallel linear responses, so a
/// joint fit sees a strong degeneracy that one-at-a-time fits do not.
const CORRELATED_PAIR: &str = r#"{
  "name": "pair_study",
  "sm_is_yields": true,
  "sm": [10000.0, 8000.0, 5000.0],
  "background": [30000.0, 24000.0, 15000.0],
  "parameters": ["chw", "chdd"],
  "terms": [
    { "parameters": ["chw"], "coefficients": [0.5, 1.0, 2.0] },
    { "parameters": ["chw", "chw"], "coefficients": [0.1, 0.3, 0.8] },
    { "parameters": ["chdd"], "coefficients": [0.05, 0.09, 0.16] },
    { "parameters": ["chw", "chdd"], "coefficients": [0.01, 0.02, 0.05] }
  ]
}"#;

fn likelihood(json: &str) -> ScalingLikelihood {
    let cat = Catalogue::from_json_str(json).unwrap();
    ScalingLikelihood::from_catalogue(
        &cat,
        &ExposureConfig::default(),
        &UncertaintyConfig::default(),
        (-100.0, 100.0),
    )
    .unwrap()
}

#[test]
fn one_at_a_time_fit_recovers_the_quadratic_width() {
    let model = likelihood(SYMMETRIC_PAIR);
    let mut state = model.parameter_set().unwrap();
    let driver = FitDriver::new(&model, OptimizerConfig::default());

    let report =
        driver.run(&mut state, FitMode::OneAtATime, &["c1".to_string()]).unwrap();
    assert!(report.joint.is_none());
    let est = report.singles[0].estimate.as_ref().expect("fit should converge");
    assert!(est.value.abs() < 1e-6);
    assert_relative_eq!(est.uncertainty, (2e-4_f64).sqrt(), epsilon = 1e-6);
    assert!(est.nll.is_finite());
}

#[test]
fn driver_restores_the_state_it_borrowed() {
    let model = likelihood(CORRELATED_PAIR);
    let mut state = model.parameter_set().unwrap();
    let driver = FitDriver::new(&model, OptimizerConfig::default());

    driver
        .run(&mut state, FitMode::OneAtATime, &["chw".to_string(), "chdd".to_string()])
        .unwrap();

    assert!(state.has_snapshot("initial"));
    for name in ["chw", "chdd"] {
        assert_eq!(state.value(name).unwrap(), 0.0);
        assert!(!state.is_constant(name).unwrap());
    }
}

#[test]
fn joint_errors_inflate_under_correlation() {
    let model = likelihood(CORRELATED_PAIR);
    let requested = vec!["chw".to_string(), "chdd".to_string()];
    let driver_cfg = OptimizerConfig::default();

    let mut joint_state = model.parameter_set().unwrap();
    let joint = FitDriver::new(&model, driver_cfg)
        .run(&mut joint_state, FitMode::Joint, &requested)
        .unwrap()
        .joint
        .unwrap();

    let mut single_state = model.parameter_set().unwrap();
    let singles = FitDriver::new(&model, driver_cfg)
        .run(&mut single_state, FitMode::OneAtATime, &requested)
        .unwrap()
        .singles;

    for (i, single) in singles.iter().enumerate() {
        let alone = single.estimate.as_ref().unwrap().uncertainty;
        assert!(
            joint.uncertainties[i] > alone,
            "profiling must widen {}: joint {} vs alone {}",
            single.parameter,
            joint.uncertainties[i],
            alone
        );
    }
    // The two responses are nearly parallel, so the joint estimates are
    // strongly anti-correlated.
    assert!(joint.correlation(0, 1).unwrap() < -0.9);
}

#[test]
fn scan_grid_is_a_midpoint_lattice_over_three_sigma() {
    let model = likelihood(SYMMETRIC_PAIR);
    let mut state = model.parameter_set().unwrap();
    let driver = FitDriver::new(&model, OptimizerConfig::default());
    let report =
        driver.run(&mut state, FitMode::OneAtATime, &["c1".to_string()]).unwrap();
    let est = report.singles[0].estimate.clone().unwrap();

    let scans = run_scans(
        &model,
        &state,
        "symmetric_pair",
        &["c1".to_string()],
        &report,
        OptimizerConfig::default(),
        ScanConfig::default(),
    )
    .unwrap();
    assert_eq!(scans.len(), 1);
    let scan = &scans[0];
    assert_eq!(scan.parameter, "c1");

    // Best-fit row first, then the full 50-point grid: the quadratic rises
    // on both sides of the minimum, so nothing is dropped.
    assert_eq!(scan.points.len(), 51);
    assert_eq!(scan.points[0].delta_nll, 0.0);
    assert_eq!(scan.points[0].value, scan.best_fit);
    assert!(scan.points.iter().all(|p| p.quantile_expected == 1.0));

    let width = 2.0 * 3.0 * est.uncertainty / 50.0;
    let first = est.value - 3.0 * est.uncertainty + 0.5 * width;
    assert_relative_eq!(scan.points[1].value, first, epsilon = 1e-12);
    for pair in scan.points[1..].windows(2) {
        assert_relative_eq!(pair[1].value - pair[0].value, width, epsilon = 1e-12);
    }
    // The window is symmetric around the best fit.
    let last = scan.points.last().unwrap().value;
    assert_relative_eq!(scan.points[1].value + last, 2.0 * est.value, epsilon = 1e-12);

    // NLL rise follows the closed form 2500 c1^2.
    for point in &scan.points[1..] {
        assert_relative_eq!(
            point.delta_nll,
            2500.0 * point.value * point.value,
            epsilon = 1e-9
        );
    }
}

#[test]
fn profiling_lies_below_pinning() {
    let model = likelihood(CORRELATED_PAIR);
    let request =
        ScanRequest { parameter: "chw".to_string(), value: 0.0, uncertainty: 0.02 };
    let config = ScanConfig { points: 8, range_multiplier: 3.0, retain_negative: false };

    // chdd floats and absorbs part of every displacement.
    let profiled = ProfileScanner::new(
        &model,
        model.parameter_set().unwrap(),
        "pair_study",
        &request,
        OptimizerConfig::default(),
        config,
    )
    .unwrap()
    .run()
    .unwrap();

    // chdd pinned at zero.
    let mut pinned_state = model.parameter_set().unwrap();
    pinned_state.set_fixed("chdd").unwrap();
    let pinned = ProfileScanner::new(
        &model,
        pinned_state,
        "pair_study",
        &request,
        OptimizerConfig::default(),
        config,
    )
    .unwrap()
    .run()
    .unwrap();

    assert_eq!(profiled.points.len(), 9);
    assert_eq!(pinned.points.len(), 9);
    for (p, q) in profiled.points[1..].iter().zip(&pinned.points[1..]) {
        assert_relative_eq!(p.value, q.value, epsilon = 1e-12);
        assert!(
            p.delta_nll < q.delta_nll,
            "at chw = {} profiling gave {} but pinning gave {}",
            p.value,
            p.delta_nll,
            q.delta_nll
        );
    }
}

#[test]
fn joint_report_drives_one_scan_per_parameter() {
    let model = likelihood(CORRELATED_PAIR);
    let requested = vec!["chw".to_string(), "chdd".to_string()];
    let mut state = model.parameter_set().unwrap();
    let driver = FitDriver::new(&model, OptimizerConfig::default());
    let report = driver.run(&mut state, FitMode::Joint, &requested).unwrap();

    let config = ScanConfig { points: 6, range_multiplier: 3.0, retain_negative: false };
    let scans = run_scans(
        &model,
        &state,
        "pair_study",
        &requested,
        &report,
        OptimizerConfig::default(),
        config,
    )
    .unwrap();

    assert_eq!(scans.len(), 2);
    assert_eq!(scans[0].parameter, "chw");
    assert_eq!(scans[1].parameter, "chdd");
    for scan in &scans {
        assert_eq!(scan.label, "pair_study");
        assert_eq!(scan.points.len(), 7);
        assert!(scan.points[1..].iter().all(|p| p.delta_nll > 0.0));
    }
}
