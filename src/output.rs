// src/output.rs
//
// Persisted sweep outputs.
//
// - <root>/<experiment>/<experiment>-<simulation_info>.json: ScenarioOutcome
//   (status, repeat accounting, Summary or reduction error, checksum)
// - <root>/<experiment>/experiment_report.json: every scenario in add order
//
// Nothing time- or host-dependent is written, so rerunning an identical
// experiment produces byte-identical files.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::simulator::SimulationError;
use crate::summary::Summary;

/// Output schema version.
pub const OUTPUT_SCHEMA_VERSION: u32 = 1;

pub const REPORT_FILE: &str = "experiment_report.json";

/// Final state of one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    /// Every repeat succeeded and the summary was reduced.
    Success,
    /// Some repeats failed, within tolerance; the summary covers the rest.
    Partial,
    /// Too many failed repeats, or the reduction itself failed.
    Failed,
    /// Never started because the sweep was cancelled.
    Cancelled,
}

impl ScenarioStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioStatus::Success => "success",
            ScenarioStatus::Partial => "partial",
            ScenarioStatus::Failed => "failed",
            ScenarioStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A repeat that failed on every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRepeat {
    pub repeat_index: u32,
    pub seed: u64,
    pub attempts: u32,
    pub error: SimulationError,
}

/// Everything recorded for one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub schema_version: u32,
    pub experiment_info: String,
    pub simulation_info: String,
    /// Position in the sweep.
    pub index: usize,
    pub status: ScenarioStatus,
    pub repeats_requested: u32,
    pub repeats_succeeded: u32,
    pub failed_repeats: Vec<FailedRepeat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduction_error: Option<String>,
    /// SHA-256 over the serialized summary; empty when there is none.
    pub checksum: String,
}

impl ScenarioOutcome {
    pub fn cancelled(experiment_info: &str, simulation_info: &str, index: usize, repeats: u32) -> Self {
        Self {
            schema_version: OUTPUT_SCHEMA_VERSION,
            experiment_info: experiment_info.to_string(),
            simulation_info: simulation_info.to_string(),
            index,
            status: ScenarioStatus::Cancelled,
            repeats_requested: repeats,
            repeats_succeeded: 0,
            failed_repeats: Vec::new(),
            summary: None,
            reduction_error: None,
            checksum: String::new(),
        }
    }
}

/// One line of the experiment report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub index: usize,
    pub simulation_info: String,
    pub status: ScenarioStatus,
    pub repeats_requested: u32,
    pub repeats_succeeded: u32,
    pub repeats_failed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub checksum: String,
    /// Why a failed scenario has no summary, when that is not just the
    /// repeat tolerance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReportEntry {
    pub fn from_outcome(outcome: &ScenarioOutcome, path: Option<&Path>) -> Self {
        Self {
            index: outcome.index,
            simulation_info: outcome.simulation_info.clone(),
            status: outcome.status,
            repeats_requested: outcome.repeats_requested,
            repeats_succeeded: outcome.repeats_succeeded,
            repeats_failed: outcome.failed_repeats.len() as u32,
            // File name only, so reports do not depend on the output root.
            path: path
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned()),
            checksum: outcome.checksum.clone(),
            error: outcome.reduction_error.clone(),
        }
    }
}

/// Per-scenario status of a whole sweep, in add order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub schema_version: u32,
    pub experiment_info: String,
    pub base_seed: u64,
    pub random_repeats: u32,
    pub cancelled: bool,
    pub scenarios: Vec<ReportEntry>,
}

impl ExperimentReport {
    pub fn count(&self, status: ScenarioStatus) -> usize {
        self.scenarios.iter().filter(|s| s.status == status).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.scenarios
            .iter()
            .all(|s| s.status == ScenarioStatus::Success)
    }
}

/// Hex-encoded SHA-256 of the summary's canonical JSON.
pub fn summary_checksum(summary: &Summary) -> Result<String> {
    let bytes = serde_json::to_vec(summary).context("serializing summary for checksum")?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex_encode(&hasher.finalize()))
}

pub fn experiment_dir(root: &Path, experiment_info: &str) -> PathBuf {
    root.join(experiment_info)
}

pub fn scenario_path(root: &Path, experiment_info: &str, simulation_info: &str) -> PathBuf {
    experiment_dir(root, experiment_info).join(format!(
        "{}-{}.json",
        experiment_info, simulation_info
    ))
}

/// Write one scenario outcome; returns the file written.
pub fn write_outcome(root: &Path, outcome: &ScenarioOutcome) -> Result<PathBuf> {
    let path = scenario_path(root, &outcome.experiment_info, &outcome.simulation_info);
    write_json(&path, outcome)?;
    Ok(path)
}

pub fn write_report(root: &Path, report: &ExperimentReport) -> Result<PathBuf> {
    let path = experiment_dir(root, &report.experiment_info).join(REPORT_FILE);
    write_json(&path, report)?;
    Ok(path)
}

pub fn load_outcome(path: impl AsRef<Path>) -> Result<ScenarioOutcome> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let outcome: ScenarioOutcome = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))?;
    if outcome.schema_version != OUTPUT_SCHEMA_VERSION {
        bail!(
            "{}: unsupported schema_version {} (expected {})",
            path.display(),
            outcome.schema_version,
            OUTPUT_SCHEMA_VERSION
        );
    }
    Ok(outcome)
}

/// Read back the Summary persisted for one scenario.
pub fn load_summary(path: impl AsRef<Path>) -> Result<Summary> {
    let path = path.as_ref();
    let outcome = load_outcome(path)?;
    match outcome.summary {
        Some(summary) => Ok(summary),
        None => bail!(
            "{}: scenario '{}' has status {} and no summary",
            path.display(),
            outcome.simulation_info,
            outcome.status
        ),
    }
}

pub fn load_report(path: impl AsRef<Path>) -> Result<ExperimentReport> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("writing {}", path.display()))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Hex-encode bytes.
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut result = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        result.push(HEX_CHARS[(byte >> 4) as usize] as char);
        result.push(HEX_CHARS[(byte & 0xf) as usize] as char);
    }
    result
}
