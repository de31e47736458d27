// src/error.rs
//
// Build-time configuration errors.
//
// Everything that can be wrong with an experiment definition is reported as a
// ConfigError before a single simulation is dispatched: duplicate scenario
// labels, override keys outside the parameter vocabulary, malformed time
// windows and plain field validation failures.

/// Errors raised while building or validating an experiment definition.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Two scenarios in one experiment share a `simulation_info` label.
    DuplicateLabel { label: String },
    /// An override references a parameter that the calibrated set does not define.
    UnknownOverrideKey { key: String },
    /// A time window is empty, inverted, non-finite or outside the horizon.
    MalformedWindow { start: f64, end: f64, reason: String },
    /// Generic field validation failure.
    Validation { field: String, message: String },
    /// Failed to read a configuration file.
    Io { path: String, source: String },
    /// Failed to parse a configuration file.
    Parse { source: String },
}

impl ConfigError {
    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::DuplicateLabel { label } => {
                write!(f, "Duplicate scenario label '{}'", label)
            }
            ConfigError::UnknownOverrideKey { key } => {
                write!(f, "Unknown parameter override key '{}'", key)
            }
            ConfigError::MalformedWindow { start, end, reason } => {
                write!(f, "Malformed time window [{}, {}): {}", start, end, reason)
            }
            ConfigError::Validation { field, message } => {
                write!(f, "Configuration error in '{}': {}", field, message)
            }
            ConfigError::Io { path, source } => {
                write!(f, "Failed to read configuration file '{}': {}", path, source)
            }
            ConfigError::Parse { source } => {
                write!(f, "Failed to parse configuration: {}", source)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
