// src/policy.rs
//
// Closed testing / tracing policy and beacon discovery configuration.
//
// These replace free-form parameter dictionaries: every knob the simulator
// reads is a typed field, validated once when a scenario is built.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::interval::{Interval, TO_HOURS};

/// Action triggered for a traced contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracingAction {
    Isolate,
    Test,
}

/// Contact selection policy for one tracing action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum TracingPolicy {
    /// Trace every recorded contact.
    Basic,
    /// Rank contacts by inferred risk, trace the top ones.
    Advanced,
    /// Trace contacts whose inferred risk exceeds `threshold`.
    AdvancedThreshold { threshold: f64 },
}

impl TracingPolicy {
    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if let TracingPolicy::AdvancedThreshold { threshold } = self {
            if !threshold.is_finite() || !(0.0..=1.0).contains(threshold) {
                return Err(ConfigError::validation(
                    format!("{field}.threshold"),
                    "threshold must be in [0, 1]",
                ));
            }
        }
        Ok(())
    }
}

/// Testing and smart-tracing settings for one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestingPolicy {
    /// Actions performed on traced contacts.
    pub smart_tracing_actions: BTreeSet<TracingAction>,
    /// Hours between test and result.
    pub test_reporting_lag: f64,
    /// Tests processed per batch.
    pub tests_per_batch: u32,
    /// Contact selection for isolation.
    pub isolate_policy: TracingPolicy,
    /// Maximum contacts isolated per trigger.
    pub isolated_contacts: u32,
    /// Isolation length in hours.
    pub isolation_duration: f64,
    /// Contact selection for testing.
    pub test_policy: TracingPolicy,
    /// Maximum contacts tested per trigger.
    pub tested_contacts: u32,
    /// Window over which tracing ROC statistics are collected.
    pub stats_window: Interval,
}

impl TestingPolicy {
    /// Settings of the beacon-environment experiment: isolate and test every
    /// contact whose inferred risk exceeds `theta`.
    pub fn beacon_environment(theta: f64, stats_window: Interval) -> Result<Self, ConfigError> {
        let policy = Self {
            smart_tracing_actions: [TracingAction::Isolate, TracingAction::Test]
                .into_iter()
                .collect(),
            test_reporting_lag: 48.0,
            tests_per_batch: 100_000,
            isolate_policy: TracingPolicy::AdvancedThreshold { threshold: theta },
            isolated_contacts: 100_000,
            isolation_duration: 14.0 * TO_HOURS,
            test_policy: TracingPolicy::AdvancedThreshold { threshold: theta },
            tested_contacts: 100_000,
            stats_window,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.test_reporting_lag.is_finite() || self.test_reporting_lag < 0.0 {
            return Err(ConfigError::validation(
                "testing_policy.test_reporting_lag",
                "lag must be >= 0",
            ));
        }
        if self.tests_per_batch == 0 {
            return Err(ConfigError::validation(
                "testing_policy.tests_per_batch",
                "tests_per_batch must be >= 1",
            ));
        }
        if !self.isolation_duration.is_finite() || self.isolation_duration <= 0.0 {
            return Err(ConfigError::validation(
                "testing_policy.isolation_duration",
                "isolation_duration must be > 0",
            ));
        }
        if self.stats_window.start() < 0.0 {
            return Err(ConfigError::MalformedWindow {
                start: self.stats_window.start(),
                end: self.stats_window.end(),
                reason: "stats window must start at or after t=0".to_string(),
            });
        }
        self.isolate_policy.validate("testing_policy.isolate_policy")?;
        self.test_policy.validate("testing_policy.test_policy")?;
        Ok(())
    }

    pub fn performs(&self, action: TracingAction) -> bool {
        self.smart_tracing_actions.contains(&action)
    }
}

/// Which individuals carry a discovery beacon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BeaconConfig {
    /// Every site has a beacon.
    All,
    /// Beacons placed at the most visited sites, covering the given proportion.
    VisitFreq { proportion_with_beacon: f64 },
}

impl BeaconConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let BeaconConfig::VisitFreq {
            proportion_with_beacon,
        } = self
        {
            if !(0.0..=1.0).contains(proportion_with_beacon) {
                return Err(ConfigError::validation(
                    "beacon_config.proportion_with_beacon",
                    "proportion must be in [0, 1]",
                ));
            }
        }
        Ok(())
    }

    /// Short label used in scenario names.
    pub fn label(&self) -> String {
        match self {
            BeaconConfig::All => "all".to_string(),
            BeaconConfig::VisitFreq {
                proportion_with_beacon,
            } => format!("visit_freq_{}", proportion_with_beacon),
        }
    }
}
