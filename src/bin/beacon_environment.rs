// src/bin/beacon_environment.rs
//
// Beacon-environment experiment driver.
//
// Sweeps spread factor x app adoption (x beacon configuration) for one
// (country, area), with smart tracing isolating and testing every contact
// above the risk threshold, and writes one summary per scenario.
//
// Run examples:
//   beacon_environment --country GER --area TU --calibration calib.json \
//       --simulator-cmd "python sim_worker.py" --cpu-count 32
//   beacon_environment --country CH --area JU --calibration calib.json \
//       --simulator-cmd ./sim_worker --smoke-test --quiet
//
// Runner knobs not exposed as flags come from BEACON_SWEEP_* env vars (see
// config.rs); flags win over env.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use beacon_sweep::calibration::default_max_iterations;
use beacon_sweep::{
    CalibrationMode, CalibrationProvider, ExperimentRunner, FileCalibrationProvider,
    ProcessSimulator, RunnerConfig, ScenarioStatus, SweepSpec, TelemetrySink,
};

/// Command-line arguments for the beacon-environment sweep.
#[derive(Parser, Debug)]
#[command(name = "beacon_environment")]
struct Cli {
    /// Country code of the calibrated population, e.g. GER.
    #[arg(long)]
    country: String,

    /// Area code within the country, e.g. TU.
    #[arg(long)]
    area: String,

    /// Worker processes; defaults to BEACON_SWEEP_WORKERS or all cores.
    #[arg(long)]
    cpu_count: Option<usize>,

    /// Shrink the sweep for a quick end-to-end check.
    #[arg(long)]
    smoke_test: bool,

    /// YAML sweep definition; defaults to the built-in beacon-environment grid.
    #[arg(long)]
    spec: Option<PathBuf>,

    /// JSON calibration store.
    #[arg(long)]
    calibration: PathBuf,

    /// Use the per-site-type calibration instead of the shared beta.
    #[arg(long)]
    multi_beta: bool,

    /// Simulator command; receives `--seed <n>` and the scenario JSON on stdin.
    #[arg(long)]
    simulator_cmd: String,

    /// Per-repeat timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Root directory for summaries.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Base seed for per-repeat seed derivation.
    #[arg(long)]
    seed: Option<u64>,

    /// Keep per-repeat trajectories in the persisted summaries.
    #[arg(long)]
    full_summaries: bool,

    /// Only print the final report line.
    #[arg(long)]
    quiet: bool,
}

fn build_runner_config(cli: &Cli, spec: &SweepSpec) -> RunnerConfig {
    let mut cfg = RunnerConfig::from_env_or_default();
    cfg.random_repeats = spec.random_repeats;
    if let Some(n) = cli.cpu_count {
        cfg.workers = n.max(1);
    }
    if let Some(seed) = cli.seed {
        cfg.base_seed = seed;
    }
    if let Some(secs) = cli.timeout_secs {
        cfg.repeat_timeout = Some(Duration::from_secs(secs.max(1)));
    }
    if let Some(dir) = &cli.output_dir {
        cfg.output_root = dir.clone();
    }
    if cli.full_summaries {
        cfg.condensed = false;
    }
    cfg.quiet |= cli.quiet;
    cfg
}

fn run(cli: Cli) -> Result<bool> {
    let base_spec = match &cli.spec {
        Some(path) => SweepSpec::from_yaml_file(path)
            .with_context(|| format!("loading sweep spec {}", path.display()))?,
        None => SweepSpec::default(),
    };
    let spec = if cli.smoke_test {
        base_spec.smoke()
    } else {
        base_spec
    };

    let calibration = FileCalibrationProvider::from_path(&cli.calibration)?;
    let mode = if cli.multi_beta {
        CalibrationMode::MultiBeta
    } else {
        CalibrationMode::SingleBeta
    };
    let max_iterations = default_max_iterations(&cli.area);
    let calibrated = calibration
        .get_calibrated_params(&cli.country, &cli.area, mode, max_iterations)
        .with_context(|| format!("calibration for {}-{}", cli.country, cli.area))?;
    let adoption = if spec.include_country_adoption {
        Some(calibration.contact_tracing_adoption(&cli.country)?)
    } else {
        None
    };

    let sweep = spec.build_sweep(&cli.country, &cli.area, &calibrated, adoption)?;

    let cfg = build_runner_config(&cli, &spec);
    let simulator =
        ProcessSimulator::from_command_line(&cli.simulator_cmd)?.with_timeout(cfg.repeat_timeout);

    let mut runner =
        ExperimentRunner::from_sweep(sweep, cfg, simulator)?.with_telemetry(TelemetrySink::from_env());
    let report = runner.run_all()?;

    println!(
        "{}: {} scenarios, success={} partial={} failed={} cancelled={}",
        report.experiment_info,
        report.scenarios.len(),
        report.count(ScenarioStatus::Success),
        report.count(ScenarioStatus::Partial),
        report.count(ScenarioStatus::Failed),
        report.count(ScenarioStatus::Cancelled),
    );
    Ok(report.count(ScenarioStatus::Failed) == 0)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("[beacon_environment] ERROR: {:#}", err);
            ExitCode::from(2)
        }
    }
}
