// src/sweep.rs
//
// Sweep construction.
//
// The caller expands its parameter grid (beacon mode x spread factor x
// adoption, ...) and hands one fully specified ScenarioConfig at a time to
// the SweepBuilder, which validates it and rejects duplicate labels. The
// ScenarioTemplate stamps out configs that share everything except the
// measure stack and the parameter overrides.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::measures::{Measure, MeasureList};
use crate::params::{resolve, CalibratedParameterSet, ParameterOverrides};
use crate::policy::{BeaconConfig, TestingPolicy};
use crate::scenario::{InitialSeedPolicy, ScenarioConfig};

/// Settings shared by every scenario of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioTemplate {
    pub country: String,
    pub area: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub beacon_config: BeaconConfig,
    pub testing_policy: TestingPolicy,
    pub roc_thresholds: Vec<f64>,
    /// Calibrated base, before any scenario-specific overrides.
    pub calibrated_params: CalibratedParameterSet,
    pub initial_seed_policy: InitialSeedPolicy,
    pub full_scale: bool,
    pub lockdown_measures_active: bool,
    pub expected_daily_base_expo_per100k: f64,
}

impl ScenarioTemplate {
    pub fn horizon_hours(&self) -> f64 {
        (self.end_date - self.start_date).num_days() as f64 * crate::interval::TO_HOURS
    }

    /// Materialize one scenario.
    ///
    /// The measure stack is validated against the template's horizon and the
    /// overrides are resolved against the calibrated base, which stays
    /// untouched for the next scenario.
    pub fn instantiate(
        &self,
        simulation_info: impl Into<String>,
        measures: Vec<Measure>,
        overrides: &ParameterOverrides,
    ) -> Result<ScenarioConfig, ConfigError> {
        let measure_list = MeasureList::new(measures, self.horizon_hours())?;
        let calibrated_params = resolve(&self.calibrated_params, overrides)?;
        let config = ScenarioConfig {
            simulation_info: simulation_info.into(),
            country: self.country.clone(),
            area: self.area.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
            measure_list,
            beacon_config: self.beacon_config,
            testing_policy: self.testing_policy.clone(),
            roc_thresholds: self.roc_thresholds.clone(),
            calibrated_params,
            initial_seed_policy: self.initial_seed_policy.clone(),
            full_scale: self.full_scale,
            lockdown_measures_active: self.lockdown_measures_active,
            expected_daily_base_expo_per100k: self.expected_daily_base_expo_per100k,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Validated, ordered set of scenarios ready to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    experiment_info: String,
    scenarios: Vec<ScenarioConfig>,
}

impl Sweep {
    pub fn experiment_info(&self) -> &str {
        &self.experiment_info
    }

    /// Scenarios in the order they were added.
    pub fn scenarios(&self) -> &[ScenarioConfig] {
        &self.scenarios
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

/// Accepts one scenario at a time and fails fast on invalid input.
#[derive(Debug)]
pub struct SweepBuilder {
    experiment_info: String,
    scenarios: Vec<ScenarioConfig>,
    labels: HashSet<String>,
}

impl SweepBuilder {
    pub fn new(experiment_info: impl Into<String>) -> Result<Self, ConfigError> {
        let experiment_info = experiment_info.into();
        if experiment_info.is_empty() {
            return Err(ConfigError::validation(
                "experiment_info",
                "experiment_info cannot be empty",
            ));
        }
        if experiment_info.contains(['/', '\\']) {
            return Err(ConfigError::validation(
                "experiment_info",
                "experiment_info must not contain path separators",
            ));
        }
        Ok(Self {
            experiment_info,
            scenarios: Vec::new(),
            labels: HashSet::new(),
        })
    }

    /// Register a scenario. On error the builder is left unchanged.
    pub fn add(&mut self, config: ScenarioConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if self.labels.contains(&config.simulation_info) {
            return Err(ConfigError::DuplicateLabel {
                label: config.simulation_info,
            });
        }
        self.labels.insert(config.simulation_info.clone());
        self.scenarios.push(config);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn scenarios(&self) -> &[ScenarioConfig] {
        &self.scenarios
    }

    pub fn build(self) -> Result<Sweep, ConfigError> {
        if self.scenarios.is_empty() {
            return Err(ConfigError::validation(
                "scenarios",
                "sweep must contain at least one scenario",
            ));
        }
        Ok(Sweep {
            experiment_info: self.experiment_info,
            scenarios: self.scenarios,
        })
    }
}
