// src/sweep_spec.rs
//
// YAML definition of a beacon-environment sweep.
//
// A SweepSpec names the experiment, fixes the date range and tracing policy,
// and lists the grid axes:
// - beacon configurations
// - spread factors (social transmission scaled by x, bus stops by 1/x)
// - app adoption levels (optionally extended by the country's measured rate)
//
// `build_sweep` expands the grid (beacon x spread x adoption, in that nesting
// order) into labelled ScenarioConfigs. The `smoke_test` block shrinks the
// grid for quick end-to-end checks.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::interval::{Interval, TO_HOURS};
use crate::measures::{Measure, MeasureKind};
use crate::params::{CalibratedParameterSet, ParamKey, ParameterOverrides, SiteType};
use crate::policy::{BeaconConfig, TestingPolicy};
use crate::scenario::{linspace, options_to_str, InitialSeedPolicy, OptionValue};
use crate::sweep::{ScenarioTemplate, Sweep, SweepBuilder};

/// Current sweep spec schema version.
pub const SWEEP_SPEC_VERSION: u32 = 1;

/// ROC threshold grid, either listed or evenly spaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdGrid {
    List(Vec<f64>),
    Linspace { lo: f64, hi: f64, num: usize },
}

impl ThresholdGrid {
    pub fn values(&self) -> Vec<f64> {
        match self {
            ThresholdGrid::List(v) => v.clone(),
            ThresholdGrid::Linspace { lo, hi, num } => linspace(*lo, *hi, *num),
        }
    }
}

/// Manual contact tracing running alongside beacon tracing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManualTracingSpec {
    pub p_participate: f64,
    pub p_recall: f64,
}

/// Fields replaced when running with `--smoke-test`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmokeTest {
    pub random_repeats: Option<u32>,
    pub spread_factors: Option<Vec<f64>>,
    pub adoption_levels: Option<Vec<f64>>,
    pub include_country_adoption: Option<bool>,
    pub beacon_configs: Option<Vec<BeaconConfig>>,
    pub full_scale: Option<bool>,
    pub roc_thresholds: Option<ThresholdGrid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSpec {
    pub name: String,
    pub version: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub random_repeats: u32,
    #[serde(default = "default_true")]
    pub full_scale: bool,
    #[serde(default)]
    pub lockdown_measures_active: bool,
    pub expected_daily_base_expo_per100k: f64,
    /// ROC stats collection window, in days since start.
    pub stats_window_days: (f64, f64),
    pub beacon_configs: Vec<BeaconConfig>,
    pub adoption_levels: Vec<f64>,
    /// Append the country's measured app adoption to `adoption_levels`.
    #[serde(default)]
    pub include_country_adoption: bool,
    pub spread_factors: Vec<f64>,
    /// Risk threshold above which contacts are isolated and tested.
    pub theta: f64,
    pub roc_thresholds: ThresholdGrid,
    pub isolation_days: f64,
    #[serde(default)]
    pub manual_tracing: Option<ManualTracingSpec>,
    #[serde(default)]
    pub initial_seed_policy: InitialSeedPolicy,
    #[serde(default)]
    pub smoke_test: SmokeTest,
}

fn default_true() -> bool {
    true
}

impl Default for SweepSpec {
    fn default() -> Self {
        Self {
            name: "beacon-environment".to_string(),
            version: SWEEP_SPEC_VERSION,
            start_date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2021, 1, 28).unwrap_or_default(),
            random_repeats: 48,
            full_scale: true,
            lockdown_measures_active: false,
            expected_daily_base_expo_per100k: 5.0 / 7.0,
            stats_window_days: (21.0, 28.0),
            beacon_configs: vec![BeaconConfig::All],
            adoption_levels: vec![1.0, 0.75, 0.65, 0.5],
            include_country_adoption: true,
            spread_factors: vec![1.0, 2.0, 4.0, 8.0],
            theta: 0.9,
            roc_thresholds: ThresholdGrid::Linspace {
                lo: 0.0,
                hi: 1.0,
                num: 101,
            },
            isolation_days: 14.0,
            manual_tracing: None,
            initial_seed_policy: InitialSeedPolicy::Calibrated,
            smoke_test: SmokeTest {
                random_repeats: Some(16),
                spread_factors: Some(vec![8.0]),
                adoption_levels: Some(vec![1.0]),
                include_country_adoption: Some(false),
                beacon_configs: Some(vec![BeaconConfig::All]),
                full_scale: Some(false),
                roc_thresholds: Some(ThresholdGrid::List(vec![
                    0.0, 0.25, 0.5, 0.75, 0.90, 0.95, 0.97, 0.99, 0.995, 0.999, 0.9999,
                ])),
            },
        }
    }
}

impl SweepSpec {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e.to_string(),
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let spec: SweepSpec = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            source: e.to_string(),
        })?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::validation("name", "name cannot be empty"));
        }
        if self.version != SWEEP_SPEC_VERSION {
            return Err(ConfigError::validation(
                "version",
                format!("unsupported version {} (expected {})", self.version, SWEEP_SPEC_VERSION),
            ));
        }
        if self.end_date <= self.start_date {
            return Err(ConfigError::validation(
                "end_date",
                "end_date must be after start_date",
            ));
        }
        if self.random_repeats == 0 {
            return Err(ConfigError::validation(
                "random_repeats",
                "random_repeats must be >= 1",
            ));
        }
        if self.beacon_configs.is_empty() {
            return Err(ConfigError::validation(
                "beacon_configs",
                "at least one beacon config is required",
            ));
        }
        if self.spread_factors.is_empty() || self.adoption_levels.is_empty() {
            return Err(ConfigError::validation(
                "spread_factors",
                "spread_factors and adoption_levels cannot be empty",
            ));
        }
        if self
            .spread_factors
            .iter()
            .any(|x| !x.is_finite() || *x <= 0.0)
        {
            return Err(ConfigError::validation(
                "spread_factors",
                "spread factors must be > 0",
            ));
        }
        if self
            .adoption_levels
            .iter()
            .any(|p| !(0.0..=1.0).contains(p))
        {
            return Err(ConfigError::validation(
                "adoption_levels",
                "adoption levels must be in [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.theta) {
            return Err(ConfigError::validation("theta", "theta must be in [0, 1]"));
        }
        if !self.isolation_days.is_finite() || self.isolation_days <= 0.0 {
            return Err(ConfigError::validation(
                "isolation_days",
                "isolation_days must be > 0",
            ));
        }
        crate::scenario::validate_thresholds(&self.roc_thresholds.values())?;

        // The window may run past the horizon, but must open before it.
        let window = self.stats_window()?;
        if window.start() < 0.0 || window.start() >= self.horizon_hours() {
            return Err(ConfigError::MalformedWindow {
                start: window.start(),
                end: window.end(),
                reason: "stats window must open before the end of the simulation".to_string(),
            });
        }
        Ok(())
    }

    /// Copy with the smoke-test overrides applied.
    pub fn smoke(&self) -> SweepSpec {
        let s = &self.smoke_test;
        let mut out = self.clone();
        if let Some(v) = s.random_repeats {
            out.random_repeats = v;
        }
        if let Some(v) = &s.spread_factors {
            out.spread_factors = v.clone();
        }
        if let Some(v) = &s.adoption_levels {
            out.adoption_levels = v.clone();
        }
        if let Some(v) = s.include_country_adoption {
            out.include_country_adoption = v;
        }
        if let Some(v) = &s.beacon_configs {
            out.beacon_configs = v.clone();
        }
        if let Some(v) = s.full_scale {
            out.full_scale = v;
        }
        if let Some(v) = &s.roc_thresholds {
            out.roc_thresholds = v.clone();
        }
        out
    }

    pub fn experiment_info(&self, country: &str, area: &str) -> String {
        format!("{}-{}-{}", self.name, country, area)
    }

    pub fn horizon_hours(&self) -> f64 {
        (self.end_date - self.start_date).num_days() as f64 * TO_HOURS
    }

    pub fn stats_window(&self) -> Result<Interval, ConfigError> {
        Interval::days(self.stats_window_days.0, self.stats_window_days.1)
    }

    /// Adoption axis; the country rate is appended unless already present.
    pub fn adoption_grid(&self, country_adoption: Option<f64>) -> Vec<f64> {
        let mut grid = self.adoption_levels.clone();
        if self.include_country_adoption {
            if let Some(p) = country_adoption {
                if !grid.contains(&p) {
                    grid.push(p);
                }
            }
        }
        grid
    }

    /// Spread factor `x`: social venues x times more infectious, bus stops x
    /// times less.
    pub fn spread_overrides(fact: f64) -> ParameterOverrides {
        ParameterOverrides::new()
            .with(ParamKey::BetaMultiplier(SiteType::Social), fact)
            .with(ParamKey::BetaMultiplier(SiteType::BusStop), 1.0 / fact)
    }

    /// Intervention stack of one scenario, in application order.
    pub fn measures(&self, p_adoption: f64) -> Result<Vec<Measure>, ConfigError> {
        let full = Interval::new(0.0, self.horizon_hours())?;
        let isolation_duration = self.isolation_days * TO_HOURS;

        let mut m = Vec::with_capacity(6);
        if let Some(manual) = self.manual_tracing {
            m.push(Measure::new(
                full,
                MeasureKind::ManualTracingForAll {
                    p_participate: manual.p_participate,
                    p_recall: manual.p_recall,
                },
            ));
        }
        m.push(Measure::new(
            full,
            MeasureKind::ComplianceForAll {
                p_compliance: p_adoption,
            },
        ));
        m.push(Measure::new(
            full,
            MeasureKind::SocialDistancingForSmartTracing {
                p_stay_home: 1.0,
                isolation_duration,
            },
        ));
        m.push(Measure::new(
            full,
            MeasureKind::SocialDistancingForSmartTracingHousehold {
                p_isolate: 1.0,
                isolation_duration,
            },
        ));
        m.push(Measure::new(
            full,
            MeasureKind::SocialDistancingSymptomaticAfterSmartTracing {
                p_stay_home: 1.0,
                isolation_duration,
            },
        ));
        m.push(Measure::new(
            full,
            MeasureKind::SocialDistancingSymptomaticAfterSmartTracingHousehold {
                p_isolate: 1.0,
                isolation_duration,
            },
        ));
        Ok(m)
    }

    pub fn template(
        &self,
        country: &str,
        area: &str,
        calibrated_params: CalibratedParameterSet,
        beacon_config: BeaconConfig,
    ) -> Result<ScenarioTemplate, ConfigError> {
        let mut testing_policy = TestingPolicy::beacon_environment(self.theta, self.stats_window()?)?;
        testing_policy.isolation_duration = self.isolation_days * TO_HOURS;
        Ok(ScenarioTemplate {
            country: country.to_string(),
            area: area.to_string(),
            start_date: self.start_date,
            end_date: self.end_date,
            beacon_config,
            testing_policy,
            roc_thresholds: self.roc_thresholds.values(),
            calibrated_params,
            initial_seed_policy: self.initial_seed_policy.clone(),
            full_scale: self.full_scale,
            lockdown_measures_active: self.lockdown_measures_active,
            expected_daily_base_expo_per100k: self.expected_daily_base_expo_per100k,
        })
    }

    /// Expand the grid into a validated sweep.
    pub fn build_sweep(
        &self,
        country: &str,
        area: &str,
        calibrated_params: &CalibratedParameterSet,
        country_adoption: Option<f64>,
    ) -> Result<Sweep, ConfigError> {
        let mut builder = SweepBuilder::new(self.experiment_info(country, area))?;
        let adoption = self.adoption_grid(country_adoption);
        let tag_beacon = self.beacon_configs.len() > 1;

        for beacon in &self.beacon_configs {
            let template = self.template(country, area, calibrated_params.clone(), *beacon)?;
            for &fact in &self.spread_factors {
                let overrides = Self::spread_overrides(fact);
                for &p_adoption in &adoption {
                    let mut options: Vec<(&str, OptionValue)> = Vec::with_capacity(3);
                    if tag_beacon {
                        options.push(("beacon", beacon.label().into()));
                    }
                    options.push(("p_adoption", p_adoption.into()));
                    options.push(("x", fact.into()));

                    let config = template.instantiate(
                        options_to_str(&options),
                        self.measures(p_adoption)?,
                        &overrides,
                    )?;
                    builder.add(config)?;
                }
            }
        }
        eprintln!(
            "[sweep] {} configuration done: {} scenarios",
            self.experiment_info(country, area),
            builder.len()
        );
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrated() -> CalibratedParameterSet {
        CalibratedParameterSet::from_named([
            ("betas.education", 1.0),
            ("betas.social", 1.0),
            ("betas.bus_stop", 1.0),
            ("betas.office", 1.0),
            ("betas.supermarket", 1.0),
            ("beta_household", 0.5),
        ])
        .unwrap()
    }

    #[test]
    fn default_spec_is_valid_and_matches_beacon_environment() {
        let spec = SweepSpec::default();
        spec.validate().unwrap();
        assert_eq!(spec.horizon_hours(), 27.0 * 24.0);
        assert_eq!(spec.experiment_info("GER", "TU"), "beacon-environment-GER-TU");
        assert_eq!(spec.roc_thresholds.values().len(), 101);
    }

    #[test]
    fn full_grid_has_one_scenario_per_combination() {
        let spec = SweepSpec::default();
        let sweep = spec
            .build_sweep("GER", "TU", &calibrated(), Some(0.27))
            .unwrap();
        assert_eq!(sweep.len(), 4 * 5);
        assert_eq!(sweep.scenarios()[0].simulation_info, "p_adoption=1.0-x=1.0");
        assert_eq!(sweep.scenarios()[4].simulation_info, "p_adoption=0.27-x=1.0");
        let last = sweep.scenarios().last().unwrap();
        assert_eq!(last.calibrated_params.effective_beta(SiteType::Social), Some(8.0));
        assert_eq!(last.calibrated_params.effective_beta(SiteType::BusStop), Some(0.125));
        assert_eq!(last.measure_list.len(), 5);
    }

    #[test]
    fn country_adoption_already_in_grid_is_not_duplicated() {
        let spec = SweepSpec::default();
        assert_eq!(spec.adoption_grid(Some(0.5)).len(), 4);
        assert!(spec.build_sweep("GER", "TU", &calibrated(), Some(0.5)).is_ok());
    }

    #[test]
    fn smoke_test_shrinks_the_grid() {
        let spec = SweepSpec::default().smoke();
        assert_eq!(spec.random_repeats, 16);
        assert!(!spec.full_scale);
        let sweep = spec
            .build_sweep("CH", "JU", &calibrated(), Some(0.2))
            .unwrap();
        assert_eq!(sweep.len(), 1);
        assert_eq!(sweep.scenarios()[0].simulation_info, "p_adoption=1.0-x=8.0");
        assert_eq!(sweep.scenarios()[0].roc_thresholds.len(), 11);
    }

    #[test]
    fn multiple_beacon_configs_are_tagged() {
        let spec = SweepSpec {
            beacon_configs: vec![
                BeaconConfig::All,
                BeaconConfig::VisitFreq {
                    proportion_with_beacon: 0.5,
                },
            ],
            spread_factors: vec![2.0],
            adoption_levels: vec![1.0],
            include_country_adoption: false,
            ..SweepSpec::default()
        };
        let sweep = spec.build_sweep("GER", "TU", &calibrated(), None).unwrap();
        assert_eq!(sweep.scenarios()[0].simulation_info, "beacon=all-p_adoption=1.0-x=2.0");
        assert_eq!(
            sweep.scenarios()[1].simulation_info,
            "beacon=visit_freq_0.5-p_adoption=1.0-x=2.0"
        );
    }

    #[test]
    fn parses_yaml() {
        let yaml = r#"
name: beacon-environment
version: 1
start_date: "2021-01-01"
end_date: "2021-01-15"
random_repeats: 8
expected_daily_base_expo_per100k: 0.7
stats_window_days: [7, 14]
beacon_configs:
  - mode: all
  - mode: visit_freq
    proportion_with_beacon: 0.5
adoption_levels: [1.0, 0.5]
spread_factors: [1.0]
theta: 0.9
roc_thresholds: {lo: 0.0, hi: 1.0, num: 11}
isolation_days: 14
manual_tracing: {p_participate: 1.0, p_recall: 0.5}
smoke_test:
  random_repeats: 2
"#;
        let spec = SweepSpec::from_yaml_str(yaml).unwrap();
        assert!(spec.full_scale);
        assert_eq!(spec.roc_thresholds.values().len(), 11);
        assert_eq!(spec.smoke().random_repeats, 2);
        assert_eq!(spec.smoke().spread_factors, vec![1.0]);
        assert_eq!(spec.measures(0.5).unwrap().len(), 6);
    }

    #[test]
    fn rejects_window_past_horizon() {
        let spec = SweepSpec {
            stats_window_days: (28.0, 30.0),
            ..SweepSpec::default()
        };
        assert!(matches!(
            spec.validate(),
            Err(ConfigError::MalformedWindow { .. })
        ));
        assert!(matches!(
            SweepSpec::from_yaml_str("name: x"),
            Err(ConfigError::Parse { .. })
        ));
    }
}
