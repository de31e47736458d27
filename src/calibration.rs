// src/calibration.rs
//
// Access to offline calibration results.
//
// The calibration optimizer itself lives elsewhere; it leaves behind a JSON
// store with, per (country, area, mode), the ordered list of evaluated
// trials. The calibrated parameter set is the lowest-loss trial among the
// first `max_iterations` (all trials when unset; earliest wins on ties).
//
// Store layout:
//
// {
//   "version": 1,
//   "contact_tracing_adoption": { "GER": 0.27 },
//   "runs": [
//     { "country": "GER", "area": "TU", "mode": "single_beta",
//       "trials": [ { "loss": 12.5, "params": { "beta_site": 1.1, "beta_household": 0.4 } } ] }
//   ]
// }
//
// In single-beta mode `beta_site` is shared by every site type.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::params::{CalibratedParameterSet, ParamKey, SiteType};

pub const CALIBRATION_STORE_VERSION: u32 = 1;

const SHARED_BETA_KEY: &str = "beta_site";

/// Areas whose optimisation is capped at 40 trials.
const CAPPED_AREAS: [&str; 3] = ["BE", "JU", "RH"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMode {
    /// One transmission rate shared by all site types.
    SingleBeta,
    /// One transmission rate per site type.
    MultiBeta,
}

impl std::fmt::Display for CalibrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationMode::SingleBeta => f.write_str("single_beta"),
            CalibrationMode::MultiBeta => f.write_str("multi_beta"),
        }
    }
}

/// Iteration cap the beacon-environment experiments use for `area`.
pub fn default_max_iterations(area: &str) -> Option<usize> {
    if CAPPED_AREAS.contains(&area) {
        Some(40)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    Io { path: PathBuf, message: String },
    Parse { message: String },
    UnsupportedVersion { found: u32 },
    MissingRun {
        country: String,
        area: String,
        mode: CalibrationMode,
    },
    NoTrials {
        country: String,
        area: String,
        max_iterations: Option<usize>,
    },
    MissingAdoption { country: String },
    InvalidParams(ConfigError),
}

impl std::fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationError::Io { path, message } => {
                write!(f, "cannot read calibration store {}: {}", path.display(), message)
            }
            CalibrationError::Parse { message } => {
                write!(f, "malformed calibration store: {}", message)
            }
            CalibrationError::UnsupportedVersion { found } => write!(
                f,
                "unsupported calibration store version {} (expected {})",
                found, CALIBRATION_STORE_VERSION
            ),
            CalibrationError::MissingRun {
                country,
                area,
                mode,
            } => write!(f, "no {} calibration for {}-{}", mode, country, area),
            CalibrationError::NoTrials {
                country,
                area,
                max_iterations,
            } => write!(
                f,
                "no finite-loss calibration trial for {}-{} (max_iterations {:?})",
                country, area, max_iterations
            ),
            CalibrationError::MissingAdoption { country } => {
                write!(f, "no contact-tracing adoption rate for {}", country)
            }
            CalibrationError::InvalidParams(err) => write!(f, "invalid calibrated params: {}", err),
        }
    }
}

impl std::error::Error for CalibrationError {}

impl From<ConfigError> for CalibrationError {
    fn from(err: ConfigError) -> Self {
        CalibrationError::InvalidParams(err)
    }
}

/// Source of calibrated parameters.
pub trait CalibrationProvider {
    fn get_calibrated_params(
        &self,
        country: &str,
        area: &str,
        mode: CalibrationMode,
        max_iterations: Option<usize>,
    ) -> Result<CalibratedParameterSet, CalibrationError>;

    /// Fraction of the population using the contact-tracing app.
    fn contact_tracing_adoption(&self, country: &str) -> Result<f64, CalibrationError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTrial {
    pub loss: f64,
    pub params: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRun {
    pub country: String,
    pub area: String,
    pub mode: CalibrationMode,
    pub trials: Vec<CalibrationTrial>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStore {
    pub version: u32,
    #[serde(default)]
    pub contact_tracing_adoption: BTreeMap<String, f64>,
    #[serde(default)]
    pub runs: Vec<CalibrationRun>,
}

/// Calibration store read from a JSON file.
#[derive(Debug, Clone)]
pub struct FileCalibrationProvider {
    store: CalibrationStore,
}

impl FileCalibrationProvider {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| CalibrationError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(json: &str) -> Result<Self, CalibrationError> {
        let store: CalibrationStore =
            serde_json::from_str(json).map_err(|e| CalibrationError::Parse {
                message: e.to_string(),
            })?;
        Self::from_store(store)
    }

    pub fn from_store(store: CalibrationStore) -> Result<Self, CalibrationError> {
        if store.version != CALIBRATION_STORE_VERSION {
            return Err(CalibrationError::UnsupportedVersion {
                found: store.version,
            });
        }
        Ok(Self { store })
    }

    pub fn store(&self) -> &CalibrationStore {
        &self.store
    }
}

impl CalibrationProvider for FileCalibrationProvider {
    fn get_calibrated_params(
        &self,
        country: &str,
        area: &str,
        mode: CalibrationMode,
        max_iterations: Option<usize>,
    ) -> Result<CalibratedParameterSet, CalibrationError> {
        let run = self
            .store
            .runs
            .iter()
            .find(|r| r.country == country && r.area == area && r.mode == mode)
            .ok_or_else(|| CalibrationError::MissingRun {
                country: country.to_string(),
                area: area.to_string(),
                mode,
            })?;

        let limit = max_iterations.unwrap_or(usize::MAX);
        let best = run
            .trials
            .iter()
            .take(limit)
            .filter(|t| t.loss.is_finite())
            .fold(None::<&CalibrationTrial>, |best, t| match best {
                Some(b) if b.loss <= t.loss => Some(b),
                _ => Some(t),
            })
            .ok_or_else(|| CalibrationError::NoTrials {
                country: country.to_string(),
                area: area.to_string(),
                max_iterations,
            })?;

        trial_params(&best.params, mode)
    }

    fn contact_tracing_adoption(&self, country: &str) -> Result<f64, CalibrationError> {
        self.store
            .contact_tracing_adoption
            .get(country)
            .copied()
            .filter(|p| (0.0..=1.0).contains(p))
            .ok_or_else(|| CalibrationError::MissingAdoption {
                country: country.to_string(),
            })
    }
}

fn trial_params(
    raw: &BTreeMap<String, f64>,
    mode: CalibrationMode,
) -> Result<CalibratedParameterSet, CalibrationError> {
    let mut values = BTreeMap::new();
    for (name, &value) in raw {
        if name == SHARED_BETA_KEY {
            if mode != CalibrationMode::SingleBeta {
                return Err(ConfigError::UnknownOverrideKey { key: name.clone() }.into());
            }
            for site in SiteType::ALL {
                values.entry(ParamKey::Beta(site)).or_insert(value);
            }
            continue;
        }
        let key: ParamKey = name.parse()?;
        values.insert(key, value);
    }
    Ok(CalibratedParameterSet::new(values)?)
}
