// src/summary.rs
//
// Reduction of per-repeat simulator outputs into one Summary per scenario.
//
// - Epidemic curves: every series is sampled on a fixed time grid (step
//   function of the raw trajectory) and aggregated across repeats.
// - Tracing ROC: for each threshold tau, individuals seen by smart tracing
//   inside the stats window are classified as at-risk iff their highest
//   inferred risk score is strictly greater than tau, and compared against
//   ground-truth infection.
//
// Repeats are processed in repeat-index order, so the output is identical
// whatever order the workers finished in.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::interval::{Interval, TO_HOURS};
use crate::metrics::{GridStats, OnlineStats, StatsSnapshot};
use crate::scenario::validate_thresholds;
use crate::simulator::RawRunResult;

/// Output of one successful repeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatRecord {
    pub repeat_index: u32,
    pub seed: u64,
    pub result: RawRunResult,
}

/// Tracing classification quality at one threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    pub threshold: f64,
    pub tp: u64,
    pub fp: u64,
    pub tn: u64,
    #[serde(rename = "fn")]
    pub fn_: u64,
    pub tpr: f64,
    pub fpr: f64,
}

/// Aggregated epidemic curve of one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSummary {
    /// Mean across repeats at each grid point.
    pub mean: Vec<f64>,
    /// Sample variance across repeats at each grid point.
    pub variance: Vec<f64>,
    pub final_value: StatsSnapshot,
    pub peak: StatsSnapshot,
}

/// Reduced statistics of one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub simulation_info: String,
    pub repeats: u32,
    /// Seeds of the reduced repeats, in repeat-index order.
    pub seeds: Vec<u64>,
    /// Longest horizon reached by any repeat.
    pub horizon_hours: f64,
    pub grid_hours: Vec<f64>,
    pub series: BTreeMap<String, SeriesSummary>,
    pub stats_window: Interval,
    /// Individuals classified per repeat inside the stats window, summed.
    pub traced_individuals: u64,
    pub roc: Vec<RocPoint>,
    pub condensed: bool,
    /// Raw repeat outputs; dropped in condensed mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_repeat: Option<Vec<RepeatRecord>>,
}

impl Summary {
    pub fn roc_at(&self, threshold: f64) -> Option<&RocPoint> {
        self.roc.iter().find(|p| p.threshold == threshold)
    }
}

/// Errors that abort the reduction of one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReductionError {
    /// No successful repeat to reduce.
    NoRepeats,
    /// Every repeat ended before the stats window opened.
    WindowUnreachable {
        window_start: f64,
        max_horizon_hours: f64,
    },
    InvalidThresholds { message: String },
}

impl std::fmt::Display for ReductionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReductionError::NoRepeats => write!(f, "no successful repeats to reduce"),
            ReductionError::WindowUnreachable {
                window_start,
                max_horizon_hours,
            } => write!(
                f,
                "stats window unreachable: starts at {} h but simulations end at {} h",
                window_start, max_horizon_hours
            ),
            ReductionError::InvalidThresholds { message } => {
                write!(f, "invalid ROC thresholds: {}", message)
            }
        }
    }
}

impl std::error::Error for ReductionError {}

/// Reducer settings shared by all scenarios of a sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryReducer {
    grid_step_hours: f64,
    condensed: bool,
}

impl Default for SummaryReducer {
    fn default() -> Self {
        Self {
            grid_step_hours: TO_HOURS,
            condensed: true,
        }
    }
}

impl SummaryReducer {
    pub fn new(grid_step_hours: f64, condensed: bool) -> Result<Self, ConfigError> {
        if !grid_step_hours.is_finite() || grid_step_hours <= 0.0 {
            return Err(ConfigError::validation(
                "summary_grid_hours",
                "grid step must be > 0",
            ));
        }
        Ok(Self {
            grid_step_hours,
            condensed,
        })
    }

    pub fn condensed(&self) -> bool {
        self.condensed
    }

    pub fn reduce(
        &self,
        simulation_info: &str,
        mut results: Vec<RepeatRecord>,
        roc_thresholds: &[f64],
        stats_window: Interval,
    ) -> Result<Summary, ReductionError> {
        if results.is_empty() {
            return Err(ReductionError::NoRepeats);
        }
        validate_thresholds(roc_thresholds).map_err(|e| ReductionError::InvalidThresholds {
            message: e.to_string(),
        })?;

        results.sort_by_key(|r| r.repeat_index);

        let max_horizon = results
            .iter()
            .map(|r| r.result.horizon_hours)
            .fold(0.0_f64, f64::max);
        if !results
            .iter()
            .any(|r| r.result.horizon_hours >= stats_window.start())
        {
            return Err(ReductionError::WindowUnreachable {
                window_start: stats_window.start(),
                max_horizon_hours: max_horizon,
            });
        }

        let grid_hours = self.grid(max_horizon);
        let series = summarize_series(&results, &grid_hours);
        let (roc, traced_individuals) = roc_curve(&results, roc_thresholds, stats_window);

        Ok(Summary {
            simulation_info: simulation_info.to_string(),
            repeats: results.len() as u32,
            seeds: results.iter().map(|r| r.seed).collect(),
            horizon_hours: max_horizon,
            grid_hours,
            series,
            stats_window,
            traced_individuals,
            roc,
            condensed: self.condensed,
            per_repeat: if self.condensed { None } else { Some(results) },
        })
    }

    fn grid(&self, horizon: f64) -> Vec<f64> {
        let points = (horizon / self.grid_step_hours).floor() as usize + 1;
        (0..points)
            .map(|i| i as f64 * self.grid_step_hours)
            .collect()
    }
}

fn summarize_series(results: &[RepeatRecord], grid: &[f64]) -> BTreeMap<String, SeriesSummary> {
    let names: BTreeSet<&String> = results
        .iter()
        .flat_map(|r| r.result.trajectory.series.keys())
        .collect();

    names
        .into_iter()
        .map(|name| {
            let mut per_point = GridStats::new(grid.len());
            for r in results {
                per_point.push_repeat(grid.iter().map(|&t| r.result.trajectory.value_at(name, t)));
            }
            let final_value: OnlineStats = results
                .iter()
                .filter_map(|r| r.result.trajectory.final_value(name))
                .collect();
            let peak: OnlineStats = results
                .iter()
                .filter_map(|r| r.result.trajectory.peak_value(name))
                .collect();
            (
                name.clone(),
                SeriesSummary {
                    mean: per_point.means(),
                    variance: per_point.variances(),
                    final_value: final_value.snapshot(),
                    peak: peak.snapshot(),
                },
            )
        })
        .collect()
}

/// Pool classified individuals over repeats and sweep the thresholds.
fn roc_curve(
    results: &[RepeatRecord],
    thresholds: &[f64],
    window: Interval,
) -> (Vec<RocPoint>, u64) {
    let mut positives: Vec<f64> = Vec::new();
    let mut negatives: Vec<f64> = Vec::new();

    for record in results {
        // individual -> (max score, truly infected)
        let mut seen: BTreeMap<u64, (f64, bool)> = BTreeMap::new();
        for ev in record
            .result
            .tracing_events
            .iter()
            .filter(|e| window.contains(e.t))
        {
            let entry = seen.entry(ev.individual).or_insert((ev.risk_score, false));
            entry.0 = entry.0.max(ev.risk_score);
            entry.1 |= ev.truly_infected;
        }
        for (score, infected) in seen.into_values() {
            if infected {
                positives.push(score);
            } else {
                negatives.push(score);
            }
        }
    }

    positives.sort_by(f64::total_cmp);
    negatives.sort_by(f64::total_cmp);
    let exceeding = |scores: &[f64], tau: f64| -> u64 {
        (scores.len() - scores.partition_point(|&s| s <= tau)) as u64
    };

    let points = thresholds
        .iter()
        .map(|&tau| {
            let tp = exceeding(&positives, tau);
            let fp = exceeding(&negatives, tau);
            let fn_ = positives.len() as u64 - tp;
            let tn = negatives.len() as u64 - fp;
            RocPoint {
                threshold: tau,
                tp,
                fp,
                tn,
                fn_,
                tpr: rate(tp, tp + fn_),
                fpr: rate(fp, fp + tn),
            }
        })
        .collect();

    (points, (positives.len() + negatives.len()) as u64)
}

fn rate(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{TracingEvent, Trajectory};

    fn record(repeat_index: u32, infected: &[f64], events: Vec<TracingEvent>) -> RepeatRecord {
        let times: Vec<f64> = (0..infected.len()).map(|i| i as f64 * 24.0).collect();
        RepeatRecord {
            repeat_index,
            seed: 100 + repeat_index as u64,
            result: RawRunResult {
                horizon_hours: 24.0 * (infected.len() - 1) as f64,
                trajectory: Trajectory {
                    times,
                    series: [("infected".to_string(), infected.to_vec())]
                        .into_iter()
                        .collect(),
                },
                tracing_events: events,
            },
        }
    }

    fn ev(t: f64, individual: u64, risk_score: f64, truly_infected: bool) -> TracingEvent {
        TracingEvent {
            t,
            individual,
            risk_score,
            truly_infected,
        }
    }

    fn window() -> Interval {
        Interval::new(24.0, 72.0).unwrap()
    }

    #[test]
    fn empty_input_fails() {
        let r = SummaryReducer::default().reduce("s", Vec::new(), &[0.5], window());
        assert_eq!(r.unwrap_err(), ReductionError::NoRepeats);
    }

    #[test]
    fn unreachable_window_fails() {
        let short = record(0, &[1.0, 2.0], Vec::new()); // horizon 24h
        let late = Interval::new(100.0, 200.0).unwrap();
        let err = SummaryReducer::default()
            .reduce("s", vec![short], &[0.5], late)
            .unwrap_err();
        assert!(matches!(err, ReductionError::WindowUnreachable { .. }));
    }

    #[test]
    fn decreasing_thresholds_fail() {
        let r = record(0, &[1.0, 2.0, 3.0], Vec::new());
        let err = SummaryReducer::default()
            .reduce("s", vec![r], &[0.6, 0.5], window())
            .unwrap_err();
        assert!(matches!(err, ReductionError::InvalidThresholds { .. }));
    }

    #[test]
    fn curves_are_aggregated_on_grid() {
        let a = record(0, &[1.0, 3.0, 5.0], Vec::new());
        let b = record(1, &[1.0, 5.0, 9.0], Vec::new());
        let s = SummaryReducer::default()
            .reduce("s", vec![b, a], &[], window())
            .unwrap();
        assert_eq!(s.grid_hours, vec![0.0, 24.0, 48.0]);
        let inf = &s.series["infected"];
        assert_eq!(inf.mean, vec![1.0, 4.0, 7.0]);
        assert_eq!(inf.variance, vec![0.0, 2.0, 8.0]);
        assert_eq!(inf.final_value.mean, 7.0);
        assert_eq!(inf.peak.max, 9.0);
        assert_eq!(s.seeds, vec![100, 101]);
        assert!(s.per_repeat.is_none());
    }

    #[test]
    fn roc_counts_individuals_in_window_with_strict_threshold() {
        let events = vec![
            ev(30.0, 1, 0.6, true),
            ev(40.0, 1, 0.2, true), // lower score for same individual ignored
            ev(30.0, 2, 0.6, false),
            ev(50.0, 3, 0.9, true),
            ev(10.0, 4, 0.99, true), // before window
            ev(72.0, 5, 0.99, false), // window is half-open
        ];
        let r = record(0, &[0.0, 1.0, 2.0, 3.0], events);
        let s = SummaryReducer::default()
            .reduce("s", vec![r], &[0.0, 0.6, 0.9], window())
            .unwrap();

        assert_eq!(s.traced_individuals, 3);
        let p0 = s.roc_at(0.0).unwrap();
        assert_eq!((p0.tp, p0.fn_, p0.fp, p0.tn), (2, 0, 1, 0));
        assert_eq!((p0.tpr, p0.fpr), (1.0, 1.0));
        let p6 = s.roc_at(0.6).unwrap();
        assert_eq!((p6.tp, p6.fn_, p6.fp, p6.tn), (1, 1, 0, 1));
        assert_eq!((p6.tpr, p6.fpr), (0.5, 0.0));
        let p9 = s.roc_at(0.9).unwrap();
        assert_eq!(p9.tp, 0);
    }

    #[test]
    fn roc_is_non_increasing_and_keeps_duplicates() {
        let events: Vec<_> = (0..50)
            .map(|i| ev(30.0, i, (i as f64) / 50.0, i % 3 == 0))
            .collect();
        let r = record(0, &[0.0, 1.0, 2.0, 3.0], events);
        let grid = [0.0, 0.1, 0.25, 0.25, 0.5, 0.75, 1.0];
        let s = SummaryReducer::default()
            .reduce("s", vec![r], &grid, window())
            .unwrap();
        assert_eq!(s.roc.len(), grid.len());
        assert_eq!(s.roc[2], s.roc[3]);
        for w in s.roc.windows(2) {
            assert!(w[1].tpr <= w[0].tpr);
            assert!(w[1].fpr <= w[0].fpr);
        }
    }

    #[test]
    fn zero_denominators_report_zero_rates() {
        let events = vec![ev(30.0, 1, 0.5, false)];
        let r = record(0, &[0.0, 1.0, 2.0, 3.0], events);
        let s = SummaryReducer::default()
            .reduce("s", vec![r], &[0.0], window())
            .unwrap();
        assert_eq!(s.roc[0].tpr, 0.0);
        assert_eq!(s.roc[0].fpr, 1.0);
    }

    #[test]
    fn full_mode_keeps_repeats_sorted() {
        let reducer = SummaryReducer::new(24.0, false).unwrap();
        let a = record(0, &[1.0, 2.0], Vec::new());
        let b = record(1, &[1.0, 2.0], Vec::new());
        let s = reducer
            .reduce("s", vec![b, a], &[], Interval::new(0.0, 24.0).unwrap())
            .unwrap();
        let kept = s.per_repeat.unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].repeat_index, 0);
        assert!(SummaryReducer::new(0.0, true).is_err());
    }
}
