// src/config.rs
//
// Runner configuration.
//
// Sweep-independent knobs of the ExperimentRunner: worker pool size, seed
// policy, repeat count, retry/failure tolerance, per-repeat timeout and
// summary shape. Built from defaults, then environment overrides, then
// (in the binary) command-line flags.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Maximum number of repeats in flight at once.
    pub workers: usize,
    pub base_seed: u64,
    /// Independent stochastic repeats per scenario.
    pub random_repeats: u32,
    /// Extra attempts for a failed repeat (same seed).
    pub retries_per_repeat: u32,
    /// A scenario is failed once more than this fraction of its repeats
    /// failed after retries.
    pub max_failed_fraction: f64,
    pub repeat_timeout: Option<Duration>,
    /// Drop per-repeat trajectories from persisted summaries.
    pub condensed: bool,
    pub summary_grid_hours: f64,
    pub output_root: PathBuf,
    /// Suppress per-scenario progress lines.
    pub quiet: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            base_seed: 0,
            random_repeats: 48,
            retries_per_repeat: 0,
            max_failed_fraction: 0.25,
            repeat_timeout: None,
            condensed: true,
            summary_grid_hours: 24.0,
            output_root: PathBuf::from("summaries"),
            quiet: false,
        }
    }
}

impl RunnerConfig {
    /// Failed repeats tolerated before the scenario is marked failed.
    pub fn failed_repeat_tolerance(&self) -> u32 {
        (self.max_failed_fraction * self.random_repeats as f64).floor() as u32
    }

    /// Attempts per repeat, first try included.
    pub fn max_attempts(&self) -> u32 {
        self.retries_per_repeat.saturating_add(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::validation("workers", "workers must be >= 1"));
        }
        if self.random_repeats == 0 {
            return Err(ConfigError::validation(
                "random_repeats",
                "random_repeats must be >= 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.max_failed_fraction) {
            return Err(ConfigError::validation(
                "max_failed_fraction",
                "max_failed_fraction must be in [0, 1]",
            ));
        }
        if let Some(t) = self.repeat_timeout {
            if t.is_zero() {
                return Err(ConfigError::validation(
                    "repeat_timeout",
                    "repeat_timeout must be > 0",
                ));
            }
        }
        if !self.summary_grid_hours.is_finite() || self.summary_grid_hours <= 0.0 {
            return Err(ConfigError::validation(
                "summary_grid_hours",
                "summary_grid_hours must be > 0",
            ));
        }
        Ok(())
    }

    /// Defaults, then environment overrides:
    ///
    ///   - BEACON_SWEEP_WORKERS              (usize)
    ///   - BEACON_SWEEP_SEED                 (u64)
    ///   - BEACON_SWEEP_REPEATS              (u32)
    ///   - BEACON_SWEEP_RETRIES              (u32)
    ///   - BEACON_SWEEP_MAX_FAILED_FRACTION  (f64, clamped to [0, 1])
    ///   - BEACON_SWEEP_TIMEOUT_MS           (u64, 0 disables)
    ///   - BEACON_SWEEP_CONDENSED            (bool)
    ///   - BEACON_SWEEP_GRID_HOURS           (f64)
    ///   - BEACON_SWEEP_OUTPUT_DIR           (path)
    ///   - BEACON_SWEEP_QUIET                (bool)
    ///
    /// Any variable that fails to parse is ignored with a warning.
    pub fn from_env_or_default() -> Self {
        let mut cfg = RunnerConfig::default();

        if let Some(v) = env_parse::<usize>("BEACON_SWEEP_WORKERS", cfg.workers) {
            cfg.workers = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("BEACON_SWEEP_SEED", cfg.base_seed) {
            cfg.base_seed = v;
        }
        if let Some(v) = env_parse::<u32>("BEACON_SWEEP_REPEATS", cfg.random_repeats) {
            cfg.random_repeats = v.max(1);
        }
        if let Some(v) = env_parse::<u32>("BEACON_SWEEP_RETRIES", cfg.retries_per_repeat) {
            cfg.retries_per_repeat = v;
        }
        if let Some(v) =
            env_parse::<f64>("BEACON_SWEEP_MAX_FAILED_FRACTION", cfg.max_failed_fraction)
        {
            cfg.max_failed_fraction = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        }
        if let Some(ms) = env_parse::<u64>("BEACON_SWEEP_TIMEOUT_MS", 0) {
            cfg.repeat_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(v) = env_flag("BEACON_SWEEP_CONDENSED", cfg.condensed) {
            cfg.condensed = v;
        }
        if let Some(v) = env_parse::<f64>("BEACON_SWEEP_GRID_HOURS", cfg.summary_grid_hours) {
            if v.is_finite() && v > 0.0 {
                cfg.summary_grid_hours = v;
            } else {
                eprintln!(
                    "[config] WARN: BEACON_SWEEP_GRID_HOURS must be > 0; using default {}",
                    cfg.summary_grid_hours
                );
            }
        }
        if let Ok(raw) = env::var("BEACON_SWEEP_OUTPUT_DIR") {
            if !raw.is_empty() {
                eprintln!("[config] BEACON_SWEEP_OUTPUT_DIR = {} (overrode default)", raw);
                cfg.output_root = PathBuf::from(raw);
            }
        }
        if let Some(v) = env_flag("BEACON_SWEEP_QUIET", cfg.quiet) {
            cfg.quiet = v;
        }

        cfg
    }
}

fn env_parse<T>(name: &str, default: T) -> Option<T>
where
    T: FromStr + Display,
{
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => {
            eprintln!("[config] {} = {} (overrode default)", name, v);
            Some(v)
        }
        Err(_) => {
            eprintln!(
                "[config] WARN: could not parse {} = {:?}; using default {}",
                name, raw, default
            );
            None
        }
    }
}

fn env_flag(name: &str, default: bool) -> Option<bool> {
    let raw = env::var(name).ok()?;
    match parse_flag(&raw) {
        Some(v) => {
            eprintln!("[config] {} = {} (overrode default)", name, v);
            Some(v)
        }
        None => {
            eprintln!(
                "[config] WARN: could not parse {} = {:?} as bool; using default {}",
                name, raw, default
            );
            None
        }
    }
}

pub(crate) fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
