// src/scenario.rs
//
// Fully resolved simulation configuration.
//
// A ScenarioConfig is everything the external simulator needs for one
// point of the sweep: location, date range, intervention stack, effective
// transmission parameters, beacon and testing policy, the ROC threshold grid
// and how the epidemic is seeded. It is validated once when added to a
// sweep and never mutated afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::interval::TO_HOURS;
use crate::measures::MeasureList;
use crate::params::CalibratedParameterSet;
use crate::policy::{BeaconConfig, TestingPolicy};

/// How the initial infections of a run are placed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum InitialSeedPolicy {
    /// Seed from the calibration's expected base exposure rate.
    #[default]
    Calibrated,
    /// Reuse the seeding recorded in a previous summary.
    FromSummary { path: PathBuf },
    /// Fixed number of individuals per disease state.
    Fixed { counts: BTreeMap<String, u32> },
}

/// One fully resolved simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Unique label within the experiment.
    pub simulation_info: String,
    pub country: String,
    pub area: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub measure_list: MeasureList,
    pub beacon_config: BeaconConfig,
    pub testing_policy: TestingPolicy,
    /// Non-decreasing tracing thresholds in [0, 1].
    pub roc_thresholds: Vec<f64>,
    /// Effective parameters (calibrated base with overrides applied).
    pub calibrated_params: CalibratedParameterSet,
    #[serde(default)]
    pub initial_seed_policy: InitialSeedPolicy,
    pub full_scale: bool,
    #[serde(default)]
    pub lockdown_measures_active: bool,
    pub expected_daily_base_expo_per100k: f64,
}

impl ScenarioConfig {
    /// Simulated days between start and end date.
    pub fn max_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }

    pub fn horizon_hours(&self) -> f64 {
        self.max_days() as f64 * TO_HOURS
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.simulation_info.is_empty() {
            return Err(ConfigError::validation(
                "simulation_info",
                "simulation_info cannot be empty",
            ));
        }
        if self
            .simulation_info
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
        {
            return Err(ConfigError::validation(
                "simulation_info",
                "simulation_info must not contain path separators",
            ));
        }
        if self.country.is_empty() {
            return Err(ConfigError::validation("country", "country cannot be empty"));
        }
        if self.area.is_empty() {
            return Err(ConfigError::validation("area", "area cannot be empty"));
        }
        if self.max_days() <= 0 {
            return Err(ConfigError::validation(
                "end_date",
                "end_date must be after start_date",
            ));
        }

        let horizon = self.horizon_hours();
        for m in self.measure_list.measures() {
            m.validate(horizon)?;
        }
        self.beacon_config.validate()?;
        self.testing_policy.validate()?;
        validate_thresholds(&self.roc_thresholds)?;

        if !self.expected_daily_base_expo_per100k.is_finite()
            || self.expected_daily_base_expo_per100k < 0.0
        {
            return Err(ConfigError::validation(
                "expected_daily_base_expo_per100k",
                "must be finite and >= 0",
            ));
        }
        if let InitialSeedPolicy::FromSummary { path } = &self.initial_seed_policy {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::validation(
                    "initial_seed_policy.path",
                    "summary path cannot be empty",
                ));
            }
        }
        Ok(())
    }
}

/// Thresholds must be finite, within [0, 1] and non-decreasing. Duplicates
/// are allowed.
pub fn validate_thresholds(thresholds: &[f64]) -> Result<(), ConfigError> {
    for (i, tau) in thresholds.iter().enumerate() {
        if !tau.is_finite() || !(0.0..=1.0).contains(tau) {
            return Err(ConfigError::validation(
                format!("roc_thresholds[{}]", i),
                "threshold must be in [0, 1]",
            ));
        }
    }
    if thresholds.windows(2).any(|w| w[1] < w[0]) {
        return Err(ConfigError::validation(
            "roc_thresholds",
            "thresholds must be non-decreasing",
        ));
    }
    Ok(())
}

/// Evenly spaced grid of `num` points over [lo, hi], endpoints included.
pub fn linspace(lo: f64, hi: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![lo],
        _ => {
            let step = (hi - lo) / (num - 1) as f64;
            (0..num)
                .map(|i| if i == num - 1 { hi } else { lo + step * i as f64 })
                .collect()
        }
    }
}

/// Value rendered into a scenario label.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Float(f64),
    Int(i64),
    Text(String),
    Bool(bool),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Whole floats keep one decimal so `1.0` never collapses to `1`.
            OptionValue::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{:.1}", x),
            OptionValue::Float(x) => write!(f, "{}", x),
            OptionValue::Int(i) => write!(f, "{}", i),
            OptionValue::Text(s) => f.write_str(s),
            OptionValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<f64> for OptionValue {
    fn from(x: f64) -> Self {
        OptionValue::Float(x)
    }
}

impl From<i64> for OptionValue {
    fn from(i: i64) -> Self {
        OptionValue::Int(i)
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        OptionValue::Text(s.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        OptionValue::Text(s)
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        OptionValue::Bool(b)
    }
}

/// Canonical option string, e.g. `p_adoption=0.75-x=2.0`.
///
/// Pairs are rendered in the order given.
pub fn options_to_str(options: &[(&str, OptionValue)]) -> String {
    options
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_string_is_canonical() {
        let label = options_to_str(&[("p_adoption", 0.75.into()), ("x", 8.0.into())]);
        assert_eq!(label, "p_adoption=0.75-x=8.0");
        let label = options_to_str(&[("beacon", "all".into()), ("p_adoption", 1.0.into())]);
        assert_eq!(label, "beacon=all-p_adoption=1.0");
    }

    #[test]
    fn linspace_includes_endpoints() {
        let grid = linspace(0.0, 1.0, 101);
        assert_eq!(grid.len(), 101);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[100], 1.0);
        assert!((grid[50] - 0.5).abs() < 1e-12);
        assert!(grid.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn threshold_grid_validation() {
        assert!(validate_thresholds(&[0.0, 0.5, 0.5, 1.0]).is_ok());
        assert!(validate_thresholds(&[]).is_ok());
        assert!(validate_thresholds(&[0.5, 0.4]).is_err());
        assert!(validate_thresholds(&[-0.01, 0.5]).is_err());
        assert!(validate_thresholds(&[0.5, f64::NAN]).is_err());
    }

    #[test]
    fn seed_policy_is_tagged() {
        let p: InitialSeedPolicy = serde_json::from_str(
            r#"{"policy": "fixed", "counts": {"expo": 3, "isym": 1}}"#,
        )
        .unwrap();
        match p {
            InitialSeedPolicy::Fixed { counts } => assert_eq!(counts["expo"], 3),
            other => panic!("unexpected policy {:?}", other),
        }
    }
}
