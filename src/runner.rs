// src/runner.rs
//
// Experiment runner.
//
// Owns the queue of scenarios, dispatches `random_repeats` simulator calls
// per scenario onto a bounded rayon pool, and reduces + persists each
// scenario as soon as its last repeat returns.
//
// Scheduling:
// - Repeats are dispatched in (scenario, repeat) order; at most `workers`
//   are in flight, so one scenario's tail overlaps the next one's head.
// - Workers share nothing mutable: each gets an Arc of its scenario and the
//   simulator and sends one RepeatDone back over a channel.
// - Seeds come from seed::expand_seeds, never from completion order.
//
// Failures:
// - A repeat that errors, panics, times out or returns malformed output is
//   retried with the same seed up to `retries_per_repeat` times, then
//   recorded as failed. It never aborts sibling repeats or scenarios.
// - A scenario whose outcome cannot be checksummed or written is reported
//   as failed with the error text. Only the report write is fatal.
// - Cancellation stops dispatch of scenarios that have not started yet.
//   Started scenarios drain.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use serde_json::json;

use crate::config::RunnerConfig;
use crate::error::ConfigError;
use crate::output::{
    summary_checksum, write_outcome, write_report, ExperimentReport, FailedRepeat, ReportEntry,
    ScenarioOutcome, ScenarioStatus, OUTPUT_SCHEMA_VERSION,
};
use crate::scenario::ScenarioConfig;
use crate::seed::expand_seeds;
use crate::simulator::{RawRunResult, SimulationError, Simulator};
use crate::summary::{RepeatRecord, SummaryReducer};
use crate::sweep::Sweep;
use crate::telemetry::{TelemetryConfig, TelemetrySink};

/// Shared flag that stops dispatch of not-yet-started scenarios.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct RepeatJob {
    scenario: usize,
    repeat_index: u32,
    seed: u64,
}

struct RepeatDone {
    scenario: usize,
    repeat_index: u32,
    seed: u64,
    attempts: u32,
    result: Result<RawRunResult, SimulationError>,
}

#[derive(Default)]
struct ScenarioProgress {
    dispatched: u32,
    finished: u32,
    records: Vec<RepeatRecord>,
    failed: Vec<FailedRepeat>,
}

pub struct ExperimentRunner<S: Simulator + 'static> {
    experiment_info: String,
    config: RunnerConfig,
    simulator: Arc<S>,
    scenarios: Vec<Arc<ScenarioConfig>>,
    labels: HashSet<String>,
    reducer: SummaryReducer,
    cancel: CancelHandle,
    telemetry: TelemetrySink,
}

impl<S: Simulator + 'static> ExperimentRunner<S> {
    pub fn new(
        experiment_info: impl Into<String>,
        config: RunnerConfig,
        simulator: S,
    ) -> Result<Self, ConfigError> {
        let experiment_info = experiment_info.into();
        if experiment_info.is_empty() || experiment_info.contains(['/', '\\']) {
            return Err(ConfigError::validation(
                "experiment_info",
                "experiment_info must be a non-empty file name",
            ));
        }
        config.validate()?;
        let reducer = SummaryReducer::new(config.summary_grid_hours, config.condensed)?;
        Ok(Self {
            experiment_info,
            config,
            simulator: Arc::new(simulator),
            scenarios: Vec::new(),
            labels: HashSet::new(),
            reducer,
            cancel: CancelHandle::default(),
            telemetry: TelemetrySink::from_config(TelemetryConfig::off()),
        })
    }

    /// Runner pre-loaded with every scenario of a built sweep.
    pub fn from_sweep(sweep: Sweep, config: RunnerConfig, simulator: S) -> Result<Self, ConfigError> {
        let mut runner = Self::new(sweep.experiment_info(), config, simulator)?;
        for scenario in sweep.scenarios() {
            runner.add(scenario.clone())?;
        }
        Ok(runner)
    }

    pub fn with_telemetry(mut self, telemetry: TelemetrySink) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Share an existing cancel flag, e.g. one already handed to a signal
    /// handler or to the simulator.
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn experiment_info(&self) -> &str {
        &self.experiment_info
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Queue a scenario. Rejected configs leave the queue unchanged.
    pub fn add(&mut self, config: ScenarioConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if self.labels.contains(&config.simulation_info) {
            return Err(ConfigError::DuplicateLabel {
                label: config.simulation_info,
            });
        }
        self.labels.insert(config.simulation_info.clone());
        self.scenarios.push(Arc::new(config));
        Ok(())
    }

    /// Execute the whole queue and write the experiment report.
    ///
    /// Scenario-level failures, including an outcome file that cannot be
    /// written, end up in the report. Only worker pool creation and the
    /// report write itself are returned as errors.
    pub fn run_all(&mut self) -> Result<ExperimentReport> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .thread_name(|i| format!("beacon-sweep-{}", i))
            .build()
            .context("building worker pool")?;

        let repeats = self.config.random_repeats;
        let n = self.scenarios.len();
        let started = Instant::now();
        if !self.config.quiet {
            eprintln!(
                "[runner] {}: {} scenarios x {} repeats on {} workers",
                self.experiment_info, n, repeats, self.config.workers
            );
        }

        let base_seed = self.config.base_seed;
        let mut jobs: VecDeque<RepeatJob> = (0..n)
            .flat_map(|scenario| {
                expand_seeds(base_seed, scenario, repeats)
                    .into_iter()
                    .map(move |(repeat_index, seed)| RepeatJob {
                        scenario,
                        repeat_index,
                        seed,
                    })
            })
            .collect();

        let mut progress: Vec<ScenarioProgress> = (0..n).map(|_| ScenarioProgress::default()).collect();
        let mut entries: Vec<Option<ReportEntry>> = (0..n).map(|_| None).collect();
        let (tx, rx) = mpsc::channel::<RepeatDone>();
        let mut in_flight = 0usize;

        loop {
            while in_flight < self.config.workers {
                let job = match self.next_job(&mut jobs, &progress) {
                    Some(job) => job,
                    None => break,
                };
                progress[job.scenario].dispatched += 1;
                in_flight += 1;

                let tx = tx.clone();
                let simulator = Arc::clone(&self.simulator);
                let scenario = Arc::clone(&self.scenarios[job.scenario]);
                let max_attempts = self.config.max_attempts();
                let timeout = self.config.repeat_timeout;
                pool.spawn(move || {
                    let (attempts, result) =
                        run_repeat(&*simulator, &scenario, job.seed, max_attempts, timeout);
                    // The coordinator only hangs up once nothing is in flight.
                    let _ = tx.send(RepeatDone {
                        scenario: job.scenario,
                        repeat_index: job.repeat_index,
                        seed: job.seed,
                        attempts,
                        result,
                    });
                });
            }

            if in_flight == 0 {
                break;
            }

            let done = rx
                .recv()
                .map_err(|_| anyhow!("worker channel closed with {} repeats in flight", in_flight))?;
            in_flight -= 1;

            let idx = done.scenario;
            self.record_repeat(&mut progress[idx], done);
            if progress[idx].finished == repeats {
                let finished = std::mem::take(&mut progress[idx]);
                entries[idx] = Some(self.finish_scenario(idx, finished));
            }
        }

        let cancelled = entries.iter().any(|e| e.is_none());
        let scenarios: Vec<ReportEntry> = entries
            .into_iter()
            .enumerate()
            .map(|(idx, entry)| match entry {
                Some(entry) => entry,
                None => {
                    let outcome = ScenarioOutcome::cancelled(
                        &self.experiment_info,
                        &self.scenarios[idx].simulation_info,
                        idx,
                        repeats,
                    );
                    ReportEntry::from_outcome(&outcome, None)
                }
            })
            .collect();

        let report = ExperimentReport {
            schema_version: OUTPUT_SCHEMA_VERSION,
            experiment_info: self.experiment_info.clone(),
            base_seed: self.config.base_seed,
            random_repeats: repeats,
            cancelled,
            scenarios,
        };
        let report_path = write_report(&self.config.output_root, &report)?;

        self.telemetry.log_event(
            "sweep_finished",
            json!({
                "experiment": self.experiment_info,
                "scenarios": n,
                "success": report.count(ScenarioStatus::Success),
                "partial": report.count(ScenarioStatus::Partial),
                "failed": report.count(ScenarioStatus::Failed),
                "cancelled": report.count(ScenarioStatus::Cancelled),
            }),
        );
        self.telemetry.flush();

        if !self.config.quiet {
            eprintln!(
                "[runner] {}: finished in {:.1}s (success={} partial={} failed={} cancelled={}) -> {}",
                self.experiment_info,
                started.elapsed().as_secs_f64(),
                report.count(ScenarioStatus::Success),
                report.count(ScenarioStatus::Partial),
                report.count(ScenarioStatus::Failed),
                report.count(ScenarioStatus::Cancelled),
                report_path.display()
            );
        }
        Ok(report)
    }

    /// Next job to dispatch. Jobs are queued in scenario order, so once the
    /// front job belongs to an unstarted scenario, so does everything after
    /// it; on cancellation the rest of the queue is dropped.
    fn next_job(
        &self,
        jobs: &mut VecDeque<RepeatJob>,
        progress: &[ScenarioProgress],
    ) -> Option<RepeatJob> {
        let front = jobs.front()?;
        if progress[front.scenario].dispatched == 0 && self.cancel.is_cancelled() {
            if !self.config.quiet {
                let skipped: HashSet<usize> = jobs.iter().map(|j| j.scenario).collect();
                eprintln!(
                    "[runner] cancelled: {} scenarios will not be started",
                    skipped.len()
                );
            }
            jobs.clear();
            return None;
        }
        jobs.pop_front()
    }

    fn record_repeat(&mut self, progress: &mut ScenarioProgress, done: RepeatDone) {
        progress.finished += 1;
        let label = &self.scenarios[done.scenario].simulation_info;
        match done.result {
            Ok(result) => {
                self.telemetry.log_event(
                    "repeat_finished",
                    json!({
                        "scenario": label,
                        "repeat": done.repeat_index,
                        "seed": done.seed,
                        "attempts": done.attempts,
                    }),
                );
                progress.records.push(RepeatRecord {
                    repeat_index: done.repeat_index,
                    seed: done.seed,
                    result,
                });
            }
            Err(error) => {
                let class = if error.is_resource_error() {
                    "resource"
                } else {
                    "simulation"
                };
                eprintln!(
                    "[runner] WARN: {} repeat {} (seed {}) failed after {} attempt(s) [{}]: {}",
                    label, done.repeat_index, done.seed, done.attempts, class, error
                );
                self.telemetry.log_event(
                    "repeat_failed",
                    json!({
                        "scenario": label,
                        "repeat": done.repeat_index,
                        "seed": done.seed,
                        "attempts": done.attempts,
                        "class": class,
                        "error": error.to_string(),
                    }),
                );
                progress.failed.push(FailedRepeat {
                    repeat_index: done.repeat_index,
                    seed: done.seed,
                    attempts: done.attempts,
                    error,
                });
            }
        }
    }

    fn finish_scenario(
        &mut self,
        idx: usize,
        mut progress: ScenarioProgress,
    ) -> ReportEntry {
        let scenario = Arc::clone(&self.scenarios[idx]);
        let label = &scenario.simulation_info;
        progress.failed.sort_by_key(|f| f.repeat_index);
        let succeeded = progress.records.len() as u32;
        let failed = progress.failed.len() as u32;
        let tolerance = self.config.failed_repeat_tolerance();

        let (mut status, mut summary, mut reduction_error) = if failed > tolerance {
            (ScenarioStatus::Failed, None, None)
        } else {
            match self.reducer.reduce(
                label,
                progress.records,
                &scenario.roc_thresholds,
                scenario.testing_policy.stats_window,
            ) {
                Ok(summary) if failed == 0 => (ScenarioStatus::Success, Some(summary), None),
                Ok(summary) => (ScenarioStatus::Partial, Some(summary), None),
                Err(err) => {
                    eprintln!("[runner] WARN: {} reduction failed: {}", label, err);
                    (ScenarioStatus::Failed, None, Some(err.to_string()))
                }
            }
        };

        let checksum = match summary.as_ref().map(summary_checksum) {
            Some(Ok(checksum)) => checksum,
            Some(Err(err)) => {
                eprintln!("[runner] WARN: {} checksum failed: {:#}", label, err);
                status = ScenarioStatus::Failed;
                summary = None;
                reduction_error = Some(format!("{:#}", err));
                String::new()
            }
            None => String::new(),
        };
        let mut outcome = ScenarioOutcome {
            schema_version: OUTPUT_SCHEMA_VERSION,
            experiment_info: self.experiment_info.clone(),
            simulation_info: label.clone(),
            index: idx,
            status,
            repeats_requested: self.config.random_repeats,
            repeats_succeeded: succeeded,
            failed_repeats: progress.failed,
            summary,
            reduction_error,
            checksum,
        };
        let entry = match write_outcome(&self.config.output_root, &outcome) {
            Ok(path) => ReportEntry::from_outcome(&outcome, Some(&path)),
            Err(err) => {
                eprintln!("[runner] WARN: {} outcome not written: {:#}", label, err);
                outcome.status = ScenarioStatus::Failed;
                outcome.checksum.clear();
                let mut entry = ReportEntry::from_outcome(&outcome, None);
                entry.error = Some(format!("{:#}", err));
                entry
            }
        };
        let status = entry.status;

        self.telemetry.log_event(
            "scenario_finished",
            json!({
                "scenario": label,
                "index": idx,
                "status": status.as_str(),
                "ok": succeeded,
                "failed": failed,
            }),
        );
        if !self.config.quiet {
            eprintln!(
                "[runner] scenario {} done status={} ok={}/{}",
                label, status, succeeded, self.config.random_repeats
            );
        }
        entry
    }
}

/// Run one repeat with retries. Returns the attempts used and the last
/// result.
fn run_repeat<S: Simulator + ?Sized>(
    simulator: &S,
    scenario: &ScenarioConfig,
    seed: u64,
    max_attempts: u32,
    timeout: Option<std::time::Duration>,
) -> (u32, Result<RawRunResult, SimulationError>) {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = run_once(simulator, scenario, seed, timeout);
        if result.is_ok() || attempts >= max_attempts {
            return (attempts, result);
        }
    }
}

/// Slack on the simulator-reported horizon, for rounding on its side.
const HORIZON_TOLERANCE_HOURS: f64 = 1.0;

fn run_once<S: Simulator + ?Sized>(
    simulator: &S,
    scenario: &ScenarioConfig,
    seed: u64,
    timeout: Option<std::time::Duration>,
) -> Result<RawRunResult, SimulationError> {
    let start = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| simulator.run(scenario, seed)))
        .map_err(|payload| SimulationError::Panicked {
            message: panic_message(payload),
        })??;

    // In-process simulators cannot be interrupted; an overrun is detected
    // once the call returns.
    if let Some(limit) = timeout {
        if start.elapsed() > limit {
            return Err(SimulationError::timeout(limit));
        }
    }
    result.validate()?;
    let limit = scenario.horizon_hours() + HORIZON_TOLERANCE_HOURS;
    if result.horizon_hours > limit {
        return Err(SimulationError::Protocol {
            message: format!(
                "horizon_hours {} exceeds the scenario horizon {}",
                result.horizon_hours,
                scenario.horizon_hours()
            ),
        });
    }
    Ok(result)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
