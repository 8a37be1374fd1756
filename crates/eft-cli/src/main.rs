//! eftfit command line interface.
//!
//! `fit` estimates Wilson coefficients from a catalogue, `scan` follows the
//! fits with profile likelihood scans, and `run` drives the whole pipeline
//! from a config file.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use eft_core::NllModel;
use eft_inference::{FitDriver, FitMode, FitReport, OptimizerConfig, ScanConfig};
use eft_model::{Catalogue, ExposureConfig, ScalingLikelihood, UncertaintyConfig};

mod artifact;
mod run;

#[derive(Parser)]
#[command(name = "eftfit")]
#[command(about = "EFT sensitivity fits and profile likelihood scans", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,
}

/// Fit mode selection on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// All requested parameters float together.
    Joint,
    /// Each requested parameter is fitted alone.
    OneAtATime,
}

impl From<ModeArg> for FitMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Joint => FitMode::Joint,
            ModeArg::OneAtATime => FitMode::OneAtATime,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fit Wilson coefficients against the expected Standard Model yields
    Fit {
        /// Path to the catalogue (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Output path for the fit report (JSON; stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Fit mode
        #[arg(long, value_enum, default_value = "one-at-a-time")]
        mode: ModeArg,

        /// Parameters to fit (comma separated; all catalogue parameters when omitted)
        #[arg(long, value_delimiter = ',')]
        params: Vec<String>,

        /// Number of threads (0 = all cores)
        #[arg(long, default_value = "1")]
        threads: usize,
    },

    /// Fit, then scan every requested parameter across its profile likelihood
    Scan {
        /// Path to the catalogue (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Directory the fit report and scan files are written into
        #[arg(short, long)]
        out_dir: PathBuf,

        /// Label used in artifact file names (catalogue name when omitted)
        #[arg(long)]
        label: Option<String>,

        /// Fit mode
        #[arg(long, value_enum, default_value = "one-at-a-time")]
        mode: ModeArg,

        /// Parameters to fit and scan (comma separated; all catalogue parameters when omitted)
        #[arg(long, value_delimiter = ',')]
        params: Vec<String>,

        /// Grid points per scan
        #[arg(long, default_value = "50")]
        points: usize,

        /// Scan window half-width in units of the fitted uncertainty
        #[arg(long, default_value = "3.0")]
        range_multiplier: f64,

        /// Keep scan points that fall below the recorded best fit
        #[arg(long)]
        retain_negative: bool,

        /// Number of threads (0 = all cores)
        #[arg(long, default_value = "1")]
        threads: usize,
    },

    /// Run fits and scans as described by a config file (YAML or JSON)
    Run {
        /// Path to the run config
        config: PathBuf,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Reports printed without --output own stdout; logs go to stderr.
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Fit { input, output, mode, params, threads } => {
            cmd_fit(&input, output.as_ref(), mode.into(), &params, threads)
        }
        Commands::Scan {
            input,
            out_dir,
            label,
            mode,
            params,
            points,
            range_multiplier,
            retain_negative,
            threads,
        } => {
            let cfg = run::RunConfig {
                catalogue: input,
                out_dir,
                label,
                params,
                mode: mode.into(),
                scans: true,
                threads,
                exposure: ExposureConfig::default(),
                uncertainty: UncertaintyConfig::default(),
                optimizer: OptimizerConfig::default(),
                scan: ScanConfig { points, range_multiplier, retain_negative },
                bounds: run::default_bounds(),
            };
            run::execute(&cfg)
        }
        Commands::Run { config } => {
            let cfg = run::read_run_config(&config)?;
            run::execute(&cfg)
        }
        Commands::Version => {
            println!("eftfit {}", eft_core::VERSION);
            Ok(())
        }
    }
}

fn cmd_fit(
    input: &PathBuf,
    output: Option<&PathBuf>,
    mode: FitMode,
    params: &[String],
    threads: usize,
) -> Result<()> {
    init_threads(threads);

    tracing::info!(path = %input.display(), "loading catalogue");
    let catalogue = Catalogue::from_path(input)?;
    let likelihood = ScalingLikelihood::from_catalogue(
        &catalogue,
        &ExposureConfig::default(),
        &UncertaintyConfig::default(),
        run::default_bounds(),
    )?;
    tracing::info!(bins = likelihood.n_bins(), parameters = likelihood.dim(), "model ready");

    let requested =
        if params.is_empty() { likelihood.parameter_names() } else { params.to_vec() };
    let mut state = likelihood.parameter_set()?;
    let driver = FitDriver::new(&likelihood, OptimizerConfig::default());
    let report = driver.run(&mut state, mode, &requested)?;
    log_fit_report(&report);

    write_json(output, artifact::fit_report_json(&catalogue.name, &report))
}

/// Install the global rayon pool. Best effort: a pool may already exist, in
/// which case the existing one is kept.
pub(crate) fn init_threads(threads: usize) {
    if threads > 0 {
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }
}

/// Log a fit report at info level, one line per parameter.
pub(crate) fn log_fit_report(report: &FitReport) {
    if let Some(joint) = &report.joint {
        tracing::info!(
            nll = joint.nll,
            converged = joint.converged,
            evaluations = joint.n_evaluations,
            "joint fit finished"
        );
        for (i, name) in joint.parameter_names.iter().enumerate() {
            tracing::info!(
                "  {name} = {:.6} +/- {:.6}",
                joint.parameters[i],
                joint.uncertainties[i]
            );
        }
        if let Some(corr) = joint.correlation_matrix() {
            let n = joint.parameter_names.len();
            tracing::info!("correlation matrix:");
            for i in 0..n {
                let row: Vec<String> =
                    (0..n).map(|j| format!("{:+.3}", corr[i * n + j])).collect();
                tracing::info!("  [{}]", row.join(", "));
            }
        }
    }
    for single in &report.singles {
        match &single.estimate {
            Some(est) => tracing::info!(
                "fit result for {}: {:.6} +/- {:.6} (nll = {:.6})",
                single.parameter,
                est.value,
                est.uncertainty,
                est.nll
            ),
            None => tracing::warn!(
                "fit for {} failed: {}",
                single.parameter,
                single.message.as_deref().unwrap_or("unknown")
            ),
        }
    }
}

/// Write a JSON value to `output`, or pretty-print it to stdout.
fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    let json = serde_json::to_string_pretty(&value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            tracing::info!(path = %path.display(), "wrote fit report");
        }
        None => println!("{json}"),
    }
    Ok(())
}
