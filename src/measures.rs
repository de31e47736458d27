// src/measures.rs
//
// Time-windowed intervention measures and their composition.
//
// A Measure is a tagged variant plus the window in which it is active. The
// simulator queries the full MeasureList at each decision point; effects are
// folded in list order, so the same list always composes the same way.
//
// Composition rules (MeasureList::compose):
// - beta multipliers multiply
// - compliance is decided by the last compliance measure listed before the
//   measure being evaluated (compliant when none precedes it)
// - smart-tracing distancing only reaches compliant individuals
// - concurrent stay-home / isolate probabilities combine as independent
//   events: p = 1 - prod(1 - p_i)
// - manual tracing and action selection: the last active entry wins

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::interval::Interval;
use crate::params::SiteType;
use crate::policy::TracingAction;

/// Which tracing-triggered actions are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingActions {
    pub isolate: bool,
    pub test: bool,
}

impl TracingActions {
    pub fn allows(&self, action: TracingAction) -> bool {
        match action {
            TracingAction::Isolate => self.isolate,
            TracingAction::Test => self.test,
        }
    }
}

/// Measure variants and their parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasureKind {
    /// Scale transmission at the listed site types while active.
    BetaMultiplierByType {
        beta_multiplier: BTreeMap<SiteType, f64>,
    },
    /// Scale transmission ahead of the run; upscaling is valid because the
    /// simulator rescales betas before sampling exposures.
    APrioriBetaMultiplierByType {
        beta_multiplier: BTreeMap<SiteType, f64>,
    },
    /// Individuals comply with tracing measures with probability `p_compliance`.
    ComplianceForAll { p_compliance: f64 },
    /// Everyone stays home with probability `p_stay_home`.
    SocialDistancingForAll { p_stay_home: f64 },
    /// Traced individuals stay home for `isolation_duration` hours.
    SocialDistancingForSmartTracing {
        p_stay_home: f64,
        isolation_duration: f64,
    },
    /// Traced individuals isolate from their household.
    SocialDistancingForSmartTracingHousehold {
        p_isolate: f64,
        isolation_duration: f64,
    },
    /// Traced individuals who become symptomatic stay home.
    SocialDistancingSymptomaticAfterSmartTracing {
        p_stay_home: f64,
        isolation_duration: f64,
    },
    /// Traced individuals who become symptomatic isolate from their household.
    SocialDistancingSymptomaticAfterSmartTracingHousehold {
        p_isolate: f64,
        isolation_duration: f64,
    },
    /// Manual contact interviews.
    ManualTracingForAll { p_participate: f64, p_recall: f64 },
    /// Restrict which smart-tracing actions fire.
    SmartTracingActionSelector { actions: TracingActions },
}

/// Entity state a measure is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasureContext {
    /// Site type of the visit being evaluated (None when at home).
    pub site_type: Option<SiteType>,
    /// Per-individual uniform draw in [0, 1) deciding compliance.
    pub compliance_draw: f64,
    /// Time the individual was last notified by smart tracing.
    pub last_traced_at: Option<f64>,
    pub symptomatic: bool,
}

impl MeasureContext {
    pub fn individual(compliance_draw: f64) -> Self {
        Self {
            site_type: None,
            compliance_draw,
            last_traced_at: None,
            symptomatic: false,
        }
    }

    pub fn at_site(mut self, site_type: SiteType) -> Self {
        self.site_type = Some(site_type);
        self
    }

    pub fn traced_at(mut self, t: f64) -> Self {
        self.last_traced_at = Some(t);
        self
    }

    pub fn symptomatic(mut self) -> Self {
        self.symptomatic = true;
        self
    }

    fn traced_within(&self, t: f64, duration: f64) -> bool {
        match self.last_traced_at {
            Some(t0) => t >= t0 && t - t0 < duration,
            None => false,
        }
    }
}

/// Perturbation produced by one measure for one entity at one time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect {
    /// Outside the window, or the entity is not targeted.
    Inactive,
    ScaleBeta(f64),
    SetCompliance(bool),
    StayHome { p: f64, compliance_gated: bool },
    IsolateHousehold { p: f64, compliance_gated: bool },
    ManualTracing { p_participate: f64, p_recall: f64 },
    SelectActions(TracingActions),
}

/// One intervention with its active window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub t_window: Interval,
    #[serde(flatten)]
    pub kind: MeasureKind,
}

impl Measure {
    pub fn new(t_window: Interval, kind: MeasureKind) -> Self {
        Self { t_window, kind }
    }

    pub fn is_active(&self, t: f64) -> bool {
        self.t_window.contains(t)
    }

    /// Effect of this measure on `ctx` at time `t`, ignoring other measures.
    pub fn effect_on(&self, ctx: &MeasureContext, t: f64) -> Effect {
        if !self.is_active(t) {
            return Effect::Inactive;
        }
        match &self.kind {
            // Folded into the base betas once, via a_priori_beta_multiplier.
            MeasureKind::APrioriBetaMultiplierByType { .. } => Effect::Inactive,
            MeasureKind::BetaMultiplierByType { beta_multiplier } => ctx
                .site_type
                .and_then(|s| beta_multiplier.get(&s))
                .map_or(Effect::Inactive, |m| Effect::ScaleBeta(*m)),
            MeasureKind::ComplianceForAll { p_compliance } => {
                Effect::SetCompliance(ctx.compliance_draw < *p_compliance)
            }
            MeasureKind::SocialDistancingForAll { p_stay_home } => Effect::StayHome {
                p: *p_stay_home,
                compliance_gated: false,
            },
            MeasureKind::SocialDistancingForSmartTracing {
                p_stay_home,
                isolation_duration,
            } => {
                if ctx.traced_within(t, *isolation_duration) {
                    Effect::StayHome {
                        p: *p_stay_home,
                        compliance_gated: true,
                    }
                } else {
                    Effect::Inactive
                }
            }
            MeasureKind::SocialDistancingForSmartTracingHousehold {
                p_isolate,
                isolation_duration,
            } => {
                if ctx.traced_within(t, *isolation_duration) {
                    Effect::IsolateHousehold {
                        p: *p_isolate,
                        compliance_gated: true,
                    }
                } else {
                    Effect::Inactive
                }
            }
            MeasureKind::SocialDistancingSymptomaticAfterSmartTracing {
                p_stay_home,
                isolation_duration,
            } => {
                if ctx.symptomatic && ctx.traced_within(t, *isolation_duration) {
                    Effect::StayHome {
                        p: *p_stay_home,
                        compliance_gated: true,
                    }
                } else {
                    Effect::Inactive
                }
            }
            MeasureKind::SocialDistancingSymptomaticAfterSmartTracingHousehold {
                p_isolate,
                isolation_duration,
            } => {
                if ctx.symptomatic && ctx.traced_within(t, *isolation_duration) {
                    Effect::IsolateHousehold {
                        p: *p_isolate,
                        compliance_gated: true,
                    }
                } else {
                    Effect::Inactive
                }
            }
            MeasureKind::ManualTracingForAll {
                p_participate,
                p_recall,
            } => Effect::ManualTracing {
                p_participate: *p_participate,
                p_recall: *p_recall,
            },
            MeasureKind::SmartTracingActionSelector { actions } => Effect::SelectActions(*actions),
        }
    }

    /// Check parameter ranges and that the window lies inside the horizon.
    pub fn validate(&self, horizon_hours: f64) -> Result<(), ConfigError> {
        self.t_window.check_within_horizon(horizon_hours)?;
        match &self.kind {
            MeasureKind::BetaMultiplierByType { beta_multiplier }
            | MeasureKind::APrioriBetaMultiplierByType { beta_multiplier } => {
                for (site, m) in beta_multiplier {
                    if !m.is_finite() || *m < 0.0 {
                        return Err(ConfigError::validation(
                            format!("beta_multiplier.{}", site),
                            "multiplier must be finite and >= 0",
                        ));
                    }
                }
            }
            MeasureKind::ComplianceForAll { p_compliance } => {
                check_probability("p_compliance", *p_compliance)?
            }
            MeasureKind::SocialDistancingForAll { p_stay_home } => {
                check_probability("p_stay_home", *p_stay_home)?
            }
            MeasureKind::SocialDistancingForSmartTracing {
                p_stay_home: p,
                isolation_duration,
            }
            | MeasureKind::SocialDistancingSymptomaticAfterSmartTracing {
                p_stay_home: p,
                isolation_duration,
            } => {
                check_probability("p_stay_home", *p)?;
                check_duration(*isolation_duration)?;
            }
            MeasureKind::SocialDistancingForSmartTracingHousehold {
                p_isolate: p,
                isolation_duration,
            }
            | MeasureKind::SocialDistancingSymptomaticAfterSmartTracingHousehold {
                p_isolate: p,
                isolation_duration,
            } => {
                check_probability("p_isolate", *p)?;
                check_duration(*isolation_duration)?;
            }
            MeasureKind::ManualTracingForAll {
                p_participate,
                p_recall,
            } => {
                check_probability("p_participate", *p_participate)?;
                check_probability("p_recall", *p_recall)?;
            }
            MeasureKind::SmartTracingActionSelector { .. } => {}
        }
        Ok(())
    }
}

fn check_probability(field: &str, p: f64) -> Result<(), ConfigError> {
    if !p.is_finite() || !(0.0..=1.0).contains(&p) {
        return Err(ConfigError::validation(field, "probability must be in [0, 1]"));
    }
    Ok(())
}

fn check_duration(d: f64) -> Result<(), ConfigError> {
    if !d.is_finite() || d <= 0.0 {
        return Err(ConfigError::validation(
            "isolation_duration",
            "duration must be > 0",
        ));
    }
    Ok(())
}

/// Manual tracing parameters in force.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManualTracing {
    pub p_participate: f64,
    pub p_recall: f64,
}

/// Net effect of every active measure on one entity at one time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComposedEffect {
    pub beta_multiplier: f64,
    pub compliant: bool,
    pub p_stay_home: f64,
    pub p_isolate_household: f64,
    pub manual_tracing: Option<ManualTracing>,
    /// None when no selector is active (the testing policy decides alone).
    pub tracing_actions: Option<TracingActions>,
}

impl Default for ComposedEffect {
    fn default() -> Self {
        Self {
            beta_multiplier: 1.0,
            compliant: true,
            p_stay_home: 0.0,
            p_isolate_household: 0.0,
            manual_tracing: None,
            tracing_actions: None,
        }
    }
}

/// Ordered, immutable intervention stack of one scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasureList {
    measures: Vec<Measure>,
}

impl MeasureList {
    /// Validate every measure against the horizon and freeze the list.
    pub fn new(measures: Vec<Measure>, horizon_hours: f64) -> Result<Self, ConfigError> {
        for m in &measures {
            m.validate(horizon_hours)?;
        }
        Ok(Self { measures })
    }

    pub fn measures(&self) -> &[Measure] {
        &self.measures
    }

    pub fn len(&self) -> usize {
        self.measures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
    }

    pub fn active_at(&self, t: f64) -> impl Iterator<Item = &Measure> + '_ {
        self.measures.iter().filter(move |m| m.is_active(t))
    }

    /// Product of all a-priori multipliers for `site`, applied before the run.
    pub fn a_priori_beta_multiplier(&self, site: SiteType) -> f64 {
        self.measures
            .iter()
            .filter_map(|m| match &m.kind {
                MeasureKind::APrioriBetaMultiplierByType { beta_multiplier } => {
                    beta_multiplier.get(&site).copied()
                }
                _ => None,
            })
            .product()
    }

    /// Fold all effects active at `t` for `ctx`, in list order.
    pub fn compose(&self, ctx: &MeasureContext, t: f64) -> ComposedEffect {
        let mut out = ComposedEffect::default();
        let mut p_home_stays = 1.0;
        let mut p_household_free = 1.0;

        for measure in self.active_at(t) {
            match measure.effect_on(ctx, t) {
                Effect::Inactive => {}
                Effect::ScaleBeta(m) => out.beta_multiplier *= m,
                Effect::SetCompliance(c) => out.compliant = c,
                Effect::StayHome {
                    p,
                    compliance_gated,
                } => {
                    if !compliance_gated || out.compliant {
                        p_home_stays *= 1.0 - p;
                    }
                }
                Effect::IsolateHousehold {
                    p,
                    compliance_gated,
                } => {
                    if !compliance_gated || out.compliant {
                        p_household_free *= 1.0 - p;
                    }
                }
                Effect::ManualTracing {
                    p_participate,
                    p_recall,
                } => {
                    out.manual_tracing = Some(ManualTracing {
                        p_participate,
                        p_recall,
                    })
                }
                Effect::SelectActions(actions) => out.tracing_actions = Some(actions),
            }
        }

        out.p_stay_home = 1.0 - p_home_stays;
        out.p_isolate_household = 1.0 - p_household_free;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HORIZON: f64 = 28.0 * 24.0;

    fn full() -> Interval {
        Interval::new(0.0, HORIZON).unwrap()
    }

    fn tracing_stack(p_compliance: f64) -> MeasureList {
        MeasureList::new(
            vec![
                Measure::new(full(), MeasureKind::ComplianceForAll { p_compliance }),
                Measure::new(
                    full(),
                    MeasureKind::SocialDistancingForSmartTracing {
                        p_stay_home: 1.0,
                        isolation_duration: 336.0,
                    },
                ),
                Measure::new(
                    full(),
                    MeasureKind::SocialDistancingForSmartTracingHousehold {
                        p_isolate: 1.0,
                        isolation_duration: 336.0,
                    },
                ),
            ],
            HORIZON,
        )
        .unwrap()
    }

    #[test]
    fn measure_outside_window_is_inactive() {
        let m = Measure::new(
            Interval::new(24.0, 48.0).unwrap(),
            MeasureKind::SocialDistancingForAll { p_stay_home: 0.5 },
        );
        let ctx = MeasureContext::individual(0.3);
        assert_eq!(m.effect_on(&ctx, 10.0), Effect::Inactive);
        assert!(matches!(m.effect_on(&ctx, 24.0), Effect::StayHome { .. }));
        assert_eq!(m.effect_on(&ctx, 48.0), Effect::Inactive);
    }

    #[test]
    fn beta_multipliers_compose_multiplicatively() {
        let mult = |x: f64| -> BTreeMap<SiteType, f64> { [(SiteType::Social, x)].into_iter().collect() };
        let list = MeasureList::new(
            vec![
                Measure::new(
                    full(),
                    MeasureKind::APrioriBetaMultiplierByType {
                        beta_multiplier: mult(4.0),
                    },
                ),
                Measure::new(
                    Interval::new(0.0, 100.0).unwrap(),
                    MeasureKind::BetaMultiplierByType {
                        beta_multiplier: mult(0.5),
                    },
                ),
            ],
            HORIZON,
        )
        .unwrap();

        let ctx = MeasureContext::individual(0.0).at_site(SiteType::Social);
        // The a-priori factor is not part of the time-resolved composition.
        assert_eq!(list.compose(&ctx, 50.0).beta_multiplier, 0.5);
        assert_eq!(list.compose(&ctx, 200.0).beta_multiplier, 1.0);
        let office = MeasureContext::individual(0.0).at_site(SiteType::Office);
        assert_eq!(list.compose(&office, 50.0).beta_multiplier, 1.0);
        assert_eq!(list.a_priori_beta_multiplier(SiteType::Social), 4.0);
        assert_eq!(list.a_priori_beta_multiplier(SiteType::BusStop), 1.0);
    }

    #[test]
    fn a_priori_multiplier_is_applied_once() {
        let a_priori = Measure::new(
            full(),
            MeasureKind::APrioriBetaMultiplierByType {
                beta_multiplier: [(SiteType::Social, 3.0)].into_iter().collect(),
            },
        );
        let ctx = MeasureContext::individual(0.0).at_site(SiteType::Social);
        assert_eq!(a_priori.effect_on(&ctx, 10.0), Effect::Inactive);

        let list = MeasureList::new(vec![a_priori], HORIZON).unwrap();
        let base = 2.0;
        let effective = base
            * list.a_priori_beta_multiplier(SiteType::Social)
            * list.compose(&ctx, 10.0).beta_multiplier;
        assert_eq!(effective, 6.0);
    }

    #[test]
    fn non_compliant_individual_ignores_tracing_distancing() {
        let list = tracing_stack(0.5);

        let compliant = MeasureContext::individual(0.2).traced_at(10.0);
        let eff = list.compose(&compliant, 20.0);
        assert!(eff.compliant);
        assert_eq!(eff.p_stay_home, 1.0);
        assert_eq!(eff.p_isolate_household, 1.0);

        let refuser = MeasureContext::individual(0.8).traced_at(10.0);
        let eff = list.compose(&refuser, 20.0);
        assert!(!eff.compliant);
        assert_eq!(eff.p_stay_home, 0.0);
        assert_eq!(eff.p_isolate_household, 0.0);
    }

    #[test]
    fn tracing_isolation_expires() {
        let list = tracing_stack(1.0);
        let ctx = MeasureContext::individual(0.0).traced_at(10.0);
        assert_eq!(list.compose(&ctx, 10.0 + 335.0).p_stay_home, 1.0);
        assert_eq!(list.compose(&ctx, 10.0 + 336.0).p_stay_home, 0.0);
        let untraced = MeasureContext::individual(0.0);
        assert_eq!(list.compose(&untraced, 20.0).p_stay_home, 0.0);
    }

    #[test]
    fn symptomatic_variant_requires_symptoms() {
        let list = MeasureList::new(
            vec![Measure::new(
                full(),
                MeasureKind::SocialDistancingSymptomaticAfterSmartTracing {
                    p_stay_home: 0.7,
                    isolation_duration: 100.0,
                },
            )],
            HORIZON,
        )
        .unwrap();
        let traced = MeasureContext::individual(0.0).traced_at(0.0);
        assert_eq!(list.compose(&traced, 5.0).p_stay_home, 0.0);
        assert_eq!(list.compose(&traced.symptomatic(), 5.0).p_stay_home, 0.7);
    }

    #[test]
    fn concurrent_distancing_combines_as_independent_events() {
        let list = MeasureList::new(
            vec![
                Measure::new(full(), MeasureKind::SocialDistancingForAll { p_stay_home: 0.5 }),
                Measure::new(full(), MeasureKind::SocialDistancingForAll { p_stay_home: 0.5 }),
            ],
            HORIZON,
        )
        .unwrap();
        let eff = list.compose(&MeasureContext::individual(0.0), 1.0);
        assert!((eff.p_stay_home - 0.75).abs() < 1e-12);
    }

    #[test]
    fn compliance_gates_only_measures_listed_after_it() {
        let distancing = Measure::new(
            full(),
            MeasureKind::SocialDistancingForSmartTracing {
                p_stay_home: 1.0,
                isolation_duration: 336.0,
            },
        );
        let compliance = Measure::new(full(), MeasureKind::ComplianceForAll { p_compliance: 0.0 });
        let ctx = MeasureContext::individual(0.5).traced_at(0.0);

        let gated = MeasureList::new(vec![compliance.clone(), distancing.clone()], HORIZON).unwrap();
        assert_eq!(gated.compose(&ctx, 1.0).p_stay_home, 0.0);

        let ungated = MeasureList::new(vec![distancing, compliance], HORIZON).unwrap();
        let eff = ungated.compose(&ctx, 1.0);
        assert_eq!(eff.p_stay_home, 1.0);
        assert!(!eff.compliant);
    }

    #[test]
    fn last_selector_and_manual_tracing_win() {
        let list = MeasureList::new(
            vec![
                Measure::new(
                    full(),
                    MeasureKind::SmartTracingActionSelector {
                        actions: TracingActions {
                            isolate: true,
                            test: true,
                        },
                    },
                ),
                Measure::new(
                    Interval::new(0.0, 24.0).unwrap(),
                    MeasureKind::SmartTracingActionSelector {
                        actions: TracingActions {
                            isolate: false,
                            test: true,
                        },
                    },
                ),
                Measure::new(
                    full(),
                    MeasureKind::ManualTracingForAll {
                        p_participate: 1.0,
                        p_recall: 0.5,
                    },
                ),
            ],
            HORIZON,
        )
        .unwrap();
        let ctx = MeasureContext::individual(0.0);
        let early = list.compose(&ctx, 1.0);
        assert!(!early.tracing_actions.unwrap().allows(TracingAction::Isolate));
        let late = list.compose(&ctx, 30.0);
        assert!(late.tracing_actions.unwrap().allows(TracingAction::Isolate));
        assert_eq!(late.manual_tracing.unwrap().p_recall, 0.5);
    }

    #[test]
    fn validation_rejects_bad_parameters_and_windows() {
        let bad_p = Measure::new(full(), MeasureKind::ComplianceForAll { p_compliance: 1.1 });
        assert!(MeasureList::new(vec![bad_p], HORIZON).is_err());

        let past_horizon = Measure::new(
            Interval::new(0.0, HORIZON + 1.0).unwrap(),
            MeasureKind::SocialDistancingForAll { p_stay_home: 0.1 },
        );
        assert!(matches!(
            MeasureList::new(vec![past_horizon], HORIZON),
            Err(ConfigError::MalformedWindow { .. })
        ));

        let zero_duration = Measure::new(
            full(),
            MeasureKind::SocialDistancingForSmartTracing {
                p_stay_home: 1.0,
                isolation_duration: 0.0,
            },
        );
        assert!(MeasureList::new(vec![zero_duration], HORIZON).is_err());
    }

    #[test]
    fn serializes_with_kind_tag() {
        let m = Measure::new(full(), MeasureKind::ComplianceForAll { p_compliance: 0.5 });
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["kind"], "compliance_for_all");
        assert_eq!(json["p_compliance"], 0.5);
        assert_eq!(json["t_window"]["end"], HORIZON);
        let back: Measure = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }
}
