// src/params.rs
//
// Calibrated transmission parameters and experiment-specific overrides.
//
// The calibrated base is frozen once loaded for a (country, area) pair.
// Experiments shadow a subset of entries through `ParameterOverrides`; the
// effective value of key k is `overrides.get(k)` falling back to `base[k]`.
// Resolution is pure and never touches the base set.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Site types of the mobility model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteType {
    Education,
    Social,
    BusStop,
    Office,
    Supermarket,
}

impl SiteType {
    pub const ALL: [SiteType; 5] = [
        SiteType::Education,
        SiteType::Social,
        SiteType::BusStop,
        SiteType::Office,
        SiteType::Supermarket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SiteType::Education => "education",
            SiteType::Social => "social",
            SiteType::BusStop => "bus_stop",
            SiteType::Office => "office",
            SiteType::Supermarket => "supermarket",
        }
    }

    pub fn parse(s: &str) -> Option<SiteType> {
        SiteType::ALL.into_iter().find(|t| t.as_str() == s.trim())
    }
}

impl fmt::Display for SiteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed parameter vocabulary.
///
/// String form: `betas.<site>`, `beta_household`, `beta_multiplier.<site>`,
/// `mobility_reduction.<site>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ParamKey {
    /// Calibrated per-site transmission rate.
    Beta(SiteType),
    /// Calibrated household transmission rate.
    BetaHousehold,
    /// Free multiplier on a site type's transmission rate (default 1.0).
    BetaMultiplier(SiteType),
    /// Free fraction of visits to a site type that are dropped (default 0.0).
    MobilityReduction(SiteType),
}

impl ParamKey {
    /// Whether the key is produced by calibration (as opposed to a free
    /// experiment parameter with a built-in default).
    pub fn is_calibrated(&self) -> bool {
        matches!(self, ParamKey::Beta(_) | ParamKey::BetaHousehold)
    }

    /// Value used when neither base nor overrides define the key.
    pub fn default_value(&self) -> Option<f64> {
        match self {
            ParamKey::Beta(_) | ParamKey::BetaHousehold => None,
            ParamKey::BetaMultiplier(_) => Some(1.0),
            ParamKey::MobilityReduction(_) => Some(0.0),
        }
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKey::Beta(site) => write!(f, "betas.{}", site),
            ParamKey::BetaHousehold => f.write_str("beta_household"),
            ParamKey::BetaMultiplier(site) => write!(f, "beta_multiplier.{}", site),
            ParamKey::MobilityReduction(site) => write!(f, "mobility_reduction.{}", site),
        }
    }
}

impl FromStr for ParamKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ConfigError::UnknownOverrideKey { key: s.to_string() };
        if s == "beta_household" {
            return Ok(ParamKey::BetaHousehold);
        }
        let (family, site) = s.split_once('.').ok_or_else(unknown)?;
        let site = SiteType::parse(site).ok_or_else(unknown)?;
        match family {
            "betas" => Ok(ParamKey::Beta(site)),
            "beta_multiplier" => Ok(ParamKey::BetaMultiplier(site)),
            "mobility_reduction" => Ok(ParamKey::MobilityReduction(site)),
            _ => Err(unknown()),
        }
    }
}

impl TryFrom<String> for ParamKey {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ParamKey> for String {
    fn from(key: ParamKey) -> String {
        key.to_string()
    }
}

/// Frozen parameter mapping for one (country, area) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<ParamKey, f64>",
    into = "BTreeMap<ParamKey, f64>"
)]
pub struct CalibratedParameterSet {
    values: BTreeMap<ParamKey, f64>,
}

impl TryFrom<BTreeMap<ParamKey, f64>> for CalibratedParameterSet {
    type Error = ConfigError;

    fn try_from(values: BTreeMap<ParamKey, f64>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<CalibratedParameterSet> for BTreeMap<ParamKey, f64> {
    fn from(set: CalibratedParameterSet) -> Self {
        set.values
    }
}

impl CalibratedParameterSet {
    pub fn new(values: BTreeMap<ParamKey, f64>) -> Result<Self, ConfigError> {
        for (key, value) in &values {
            check_value(*key, *value)?;
        }
        Ok(Self { values })
    }

    /// Build from string keys, rejecting anything outside the vocabulary.
    pub fn from_named<'a, I>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut values = BTreeMap::new();
        for (name, value) in entries {
            values.insert(name.parse::<ParamKey>()?, value);
        }
        Self::new(values)
    }

    /// Value of `key`, falling back to the key's built-in default.
    pub fn get(&self, key: ParamKey) -> Option<f64> {
        self.values.get(&key).copied().or_else(|| key.default_value())
    }

    pub fn contains(&self, key: ParamKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn values(&self) -> &BTreeMap<ParamKey, f64> {
        &self.values
    }

    /// Transmission rate at a site type after its free multiplier.
    pub fn effective_beta(&self, site: SiteType) -> Option<f64> {
        let beta = self.get(ParamKey::Beta(site))?;
        let mult = self.get(ParamKey::BetaMultiplier(site)).unwrap_or(1.0);
        Some(beta * mult)
    }
}

/// Experiment-specific overrides shadowing part of a calibrated set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterOverrides(BTreeMap<ParamKey, f64>);

impl ParameterOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_named<'a, I>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut out = Self::new();
        for (name, value) in entries {
            out = out.with(name.parse()?, value);
        }
        Ok(out)
    }

    pub fn with(mut self, key: ParamKey, value: f64) -> Self {
        self.0.insert(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, &f64)> {
        self.0.iter()
    }
}

fn check_value(key: ParamKey, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::validation(key.to_string(), "value must be finite"));
    }
    match key {
        ParamKey::Beta(_) | ParamKey::BetaHousehold | ParamKey::BetaMultiplier(_) => {
            if value < 0.0 {
                return Err(ConfigError::validation(key.to_string(), "value must be >= 0"));
            }
        }
        ParamKey::MobilityReduction(_) => {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::validation(
                    key.to_string(),
                    "fraction must be in [0, 1]",
                ));
            }
        }
    }
    Ok(())
}

/// Produce the effective parameter set for an experiment.
///
/// Calibrated keys may only be overridden if the base defines them; free
/// keys are always accepted. The result carries the merged values, so
/// resolving it again with empty overrides returns it unchanged.
pub fn resolve(
    base: &CalibratedParameterSet,
    overrides: &ParameterOverrides,
) -> Result<CalibratedParameterSet, ConfigError> {
    let mut values = base.values.clone();
    for (key, value) in overrides.iter() {
        if key.is_calibrated() && !base.contains(*key) {
            return Err(ConfigError::UnknownOverrideKey {
                key: key.to_string(),
            });
        }
        check_value(*key, *value)?;
        values.insert(*key, *value);
    }
    Ok(CalibratedParameterSet { values })
}
