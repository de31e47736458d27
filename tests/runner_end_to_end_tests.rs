// tests/runner_end_to_end_tests.rs
//
// Full runs through ExperimentRunner with stub simulators: persisted
// summaries, ROC behaviour and queue validation.


use beacon_sweep::output::scenario_path;
use beacon_sweep::simulator::{RawRunResult, SimulationError};
use beacon_sweep::{
    load_report, load_summary, ConfigError, ExperimentRunner, ScenarioConfig, ScenarioStatus,
};
use sweep_testkit::*;

#[test]
fn single_scenario_aggregates_all_repeats() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = runner_config(dir.path(), 4, 2);
    let sim = |_: &ScenarioConfig, _: u64| -> Result<RawRunResult, SimulationError> {
        Ok(fixed_score_result(0.3, 5))
    };
    let mut runner = ExperimentRunner::new("e2e-GER-TU", cfg, sim).unwrap();
    runner
        .add(compliance_scenario("p_compliance=1.0", 1.0, vec![0.0, 0.5]))
        .unwrap();

    let report = runner.run_all().unwrap();
    assert_eq!(report.scenarios.len(), 1);
    assert_eq!(report.scenarios[0].status, ScenarioStatus::Success);

    // exactly one scenario file plus the report
    let files = read_tree(dir.path());
    assert_eq!(files.len(), 2);

    let path = scenario_path(dir.path(), "e2e-GER-TU", "p_compliance=1.0");
    let summary = load_summary(&path).unwrap();
    assert_eq!(summary.simulation_info, "p_compliance=1.0");
    assert_eq!(summary.repeats, 4);
    assert_eq!(summary.seeds.len(), 4);
    assert_eq!(summary.series["infected"].final_value.n, 4);
    assert_eq!(summary.series["infected"].final_value.mean, 10.0);
    assert!(summary.per_repeat.is_none());

    let report = load_report(dir.path().join("e2e-GER-TU").join("experiment_report.json")).unwrap();
    assert_eq!(report.scenarios[0].repeats_succeeded, 4);
}

#[test]
fn roc_threshold_is_exceeded_strictly() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = runner_config(dir.path(), 3, 3);
    let sim = |_: &ScenarioConfig, _: u64| -> Result<RawRunResult, SimulationError> {
        Ok(fixed_score_result(0.6, 10))
    };
    let mut runner = ExperimentRunner::new("roc", cfg, sim).unwrap();
    runner
        .add(compliance_scenario("roc", 1.0, vec![0.0, 0.5, 1.0]))
        .unwrap();
    runner.run_all().unwrap();

    let summary = load_summary(scenario_path(dir.path(), "roc", "roc")).unwrap();
    let tpr: Vec<f64> = summary.roc.iter().map(|p| p.tpr).collect();
    assert_eq!(tpr, vec![1.0, 1.0, 0.0]);
    assert_eq!(summary.roc[0].tp, 30);
    assert_eq!(summary.roc[2].fn_, 30);
    assert!(summary.roc.iter().all(|p| p.fpr == 0.0));
}

#[test]
fn roc_is_monotone_over_random_repeats() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = runner_config(dir.path(), 8, 4);
    let grid = beacon_sweep::linspace(0.0, 1.0, 21);
    let mut runner = ExperimentRunner::new("mono", cfg, seeded_simulator).unwrap();
    runner.add(compliance_scenario("a", 0.5, grid.clone())).unwrap();
    runner.run_all().unwrap();

    let summary = load_summary(scenario_path(dir.path(), "mono", "a")).unwrap();
    assert_eq!(summary.roc.len(), grid.len());
    assert!(summary.traced_individuals > 0);
    for w in summary.roc.windows(2) {
        assert!(w[1].tpr <= w[0].tpr, "tpr rose at {}", w[1].threshold);
        assert!(w[1].fpr <= w[0].fpr, "fpr rose at {}", w[1].threshold);
    }
}

#[test]
fn duplicate_labels_are_rejected_by_the_runner() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = runner_config(dir.path(), 1, 1);
    let mut runner = ExperimentRunner::new("dup", cfg, seeded_simulator).unwrap();
    let first = compliance_scenario("same", 1.0, vec![0.5]);
    runner.add(first).unwrap();
    let err = runner
        .add(compliance_scenario("same", 0.5, vec![0.5]))
        .unwrap_err();
    assert_eq!(
        err,
        ConfigError::DuplicateLabel {
            label: "same".to_string()
        }
    );
    assert_eq!(runner.len(), 1);
}

#[test]
fn full_summaries_keep_repeats_in_index_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = runner_config(dir.path(), 5, 3);
    cfg.condensed = false;
    let mut runner = ExperimentRunner::new("full", cfg, seeded_simulator).unwrap();
    runner.add(compliance_scenario("a", 1.0, vec![0.5])).unwrap();
    runner.run_all().unwrap();

    let summary = load_summary(scenario_path(dir.path(), "full", "a")).unwrap();
    let repeats = summary.per_repeat.unwrap();
    let idx: Vec<u32> = repeats.iter().map(|r| r.repeat_index).collect();
    assert_eq!(idx, vec![0, 1, 2, 3, 4]);
}
