//! Beacon sweep core library.
//!
//! Orchestrates parameter sweeps of an external agent-based epidemic
//! simulator for beacon contact-tracing experiments: scenario construction
//! and validation, intervention measure stacks, calibrated parameter
//! resolution, parallel seeded repeats, and reduction into summaries with
//! tracing ROC statistics. The binary (`src/bin/beacon_environment.rs`) is a
//! thin driver around these components.

pub mod calibration;
pub mod config;
pub mod error;
pub mod interval;
pub mod measures;
pub mod metrics;
pub mod output;
pub mod params;
pub mod policy;
pub mod process_sim;
pub mod runner;
pub mod scenario;
pub mod seed;
pub mod simulator;
pub mod summary;
pub mod sweep;
pub mod sweep_spec;
pub mod telemetry;

// --- Re-exports for ergonomic external use ---------------------------------

pub use calibration::{
    CalibrationError, CalibrationMode, CalibrationProvider, FileCalibrationProvider,
};

pub use config::RunnerConfig;

pub use error::ConfigError;

pub use interval::{Interval, TO_HOURS};

pub use measures::{ComposedEffect, Effect, Measure, MeasureContext, MeasureKind, MeasureList};

pub use output::{
    load_report, load_summary, ExperimentReport, ScenarioOutcome, ScenarioStatus,
};

pub use params::{resolve, CalibratedParameterSet, ParamKey, ParameterOverrides, SiteType};

pub use policy::{BeaconConfig, TestingPolicy, TracingAction, TracingPolicy};

pub use process_sim::ProcessSimulator;

pub use runner::{CancelHandle, ExperimentRunner};

pub use scenario::{linspace, options_to_str, InitialSeedPolicy, OptionValue, ScenarioConfig};

pub use simulator::{RawRunResult, SimulationError, Simulator, TracingEvent, Trajectory};

pub use summary::{ReductionError, RocPoint, Summary, SummaryReducer};

pub use sweep::{ScenarioTemplate, Sweep, SweepBuilder};

pub use sweep_spec::SweepSpec;

pub use telemetry::TelemetrySink;
