// src/simulator.rs
//
// Contract with the external epidemic simulator.
//
// The simulator is deterministic given (scenario, seed). One call produces
// one RawRunResult: the epidemic trajectory of a single stochastic repeat
// plus the smart-tracing event log used for ROC statistics.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scenario::ScenarioConfig;

/// Epidemic state counts sampled over time.
///
/// `series[name][i]` is the count of `name` at `times[i]`; `times` is
/// non-decreasing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub series: BTreeMap<String, Vec<f64>>,
}

impl Trajectory {
    /// Step-function value of `name` at time `t`: the last sample at or
    /// before `t`. None before the first sample or for an unknown series.
    pub fn value_at(&self, name: &str, t: f64) -> Option<f64> {
        let values = self.series.get(name)?;
        let idx = self.times.partition_point(|&x| x <= t);
        if idx == 0 {
            return None;
        }
        values.get(idx - 1).copied()
    }

    pub fn final_value(&self, name: &str) -> Option<f64> {
        self.series.get(name)?.last().copied()
    }

    pub fn peak_value(&self, name: &str) -> Option<f64> {
        self.series
            .get(name)?
            .iter()
            .copied()
            .fold(None, |m: Option<f64>, x| Some(m.map_or(x, |m| m.max(x))))
    }

    fn validate(&self) -> Result<(), String> {
        if self.times.iter().any(|t| !t.is_finite()) {
            return Err("trajectory times must be finite".to_string());
        }
        if self.times.windows(2).any(|w| w[1] < w[0]) {
            return Err("trajectory times must be non-decreasing".to_string());
        }
        for (name, values) in &self.series {
            if values.len() != self.times.len() {
                return Err(format!(
                    "series '{}' has {} samples for {} time points",
                    name,
                    values.len(),
                    self.times.len()
                ));
            }
        }
        Ok(())
    }
}

/// One smart-tracing decision recorded by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TracingEvent {
    /// Simulation time of the decision, hours.
    pub t: f64,
    pub individual: u64,
    /// Inferred exposure risk in [0, 1].
    pub risk_score: f64,
    /// Ground truth: the individual was actually infected by the contact.
    pub truly_infected: bool,
}

/// Full output of one simulator invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRunResult {
    /// Simulation time reached, hours.
    pub horizon_hours: f64,
    pub trajectory: Trajectory,
    #[serde(default)]
    pub tracing_events: Vec<TracingEvent>,
}

impl RawRunResult {
    /// Structural check applied to every result before it is accepted.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if !self.horizon_hours.is_finite() || self.horizon_hours < 0.0 {
            return Err(SimulationError::Protocol {
                message: "horizon_hours must be finite and >= 0".to_string(),
            });
        }
        self.trajectory
            .validate()
            .map_err(|message| SimulationError::Protocol { message })?;
        if self
            .tracing_events
            .iter()
            .any(|e| !e.t.is_finite() || !e.risk_score.is_finite())
        {
            return Err(SimulationError::Protocol {
                message: "tracing events must have finite time and score".to_string(),
            });
        }
        Ok(())
    }
}

/// Failure of a single repeat.
///
/// `Timeout` and `Resource` are resource errors; the runner counts them the
/// same way as simulator failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimulationError {
    /// The simulator reported an error.
    Failed { message: String },
    /// The simulator panicked inside a worker.
    Panicked { message: String },
    /// The repeat exceeded its time budget.
    Timeout { limit_ms: u64 },
    /// A worker or process could not be obtained.
    Resource { message: String },
    /// The simulator's output could not be understood.
    Protocol { message: String },
}

impl SimulationError {
    pub fn failed(message: impl Into<String>) -> Self {
        SimulationError::Failed {
            message: message.into(),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        SimulationError::Timeout {
            limit_ms: limit.as_millis() as u64,
        }
    }

    pub fn is_resource_error(&self) -> bool {
        matches!(
            self,
            SimulationError::Timeout { .. } | SimulationError::Resource { .. }
        )
    }
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationError::Failed { message } => write!(f, "simulation failed: {}", message),
            SimulationError::Panicked { message } => {
                write!(f, "simulation panicked: {}", message)
            }
            SimulationError::Timeout { limit_ms } => {
                write!(f, "simulation timed out after {} ms", limit_ms)
            }
            SimulationError::Resource { message } => {
                write!(f, "worker resource error: {}", message)
            }
            SimulationError::Protocol { message } => {
                write!(f, "invalid simulator output: {}", message)
            }
        }
    }
}

impl std::error::Error for SimulationError {}

/// The external simulator.
pub trait Simulator: Send + Sync {
    fn run(&self, scenario: &ScenarioConfig, seed: u64) -> Result<RawRunResult, SimulationError>;
}

impl<F> Simulator for F
where
    F: Fn(&ScenarioConfig, u64) -> Result<RawRunResult, SimulationError> + Send + Sync,
{
    fn run(&self, scenario: &ScenarioConfig, seed: u64) -> Result<RawRunResult, SimulationError> {
        self(scenario, seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trajectory() -> Trajectory {
        Trajectory {
            times: vec![0.0, 24.0, 48.0],
            series: [("infected".to_string(), vec![1.0, 5.0, 3.0])]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn value_at_uses_last_sample() {
        let tr = trajectory();
        assert_eq!(tr.value_at("infected", -1.0), None);
        assert_eq!(tr.value_at("infected", 0.0), Some(1.0));
        assert_eq!(tr.value_at("infected", 30.0), Some(5.0));
        assert_eq!(tr.value_at("infected", 1000.0), Some(3.0));
        assert_eq!(tr.value_at("dead", 10.0), None);
        assert_eq!(tr.final_value("infected"), Some(3.0));
        assert_eq!(tr.peak_value("infected"), Some(5.0));
    }

    #[test]
    fn mismatched_series_is_a_protocol_error() {
        let mut tr = trajectory();
        tr.series.insert("dead".to_string(), vec![0.0]);
        let res = RawRunResult {
            horizon_hours: 48.0,
            trajectory: tr,
            tracing_events: Vec::new(),
        };
        assert!(matches!(res.validate(), Err(SimulationError::Protocol { .. })));
    }

    #[test]
    fn resource_errors_are_classified() {
        assert!(SimulationError::timeout(Duration::from_secs(2)).is_resource_error());
        assert!(!SimulationError::failed("boom").is_resource_error());
        assert_eq!(
            SimulationError::timeout(Duration::from_secs(2)).to_string(),
            "simulation timed out after 2000 ms"
        );
    }
}
