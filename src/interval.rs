// src/interval.rs
//
// Half-open time windows in simulation hours.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Hours per simulated day.
pub const TO_HOURS: f64 = 24.0;

/// Immutable half-open window `[start, end)` in simulation hours.
///
/// Construction enforces `start < end` with both bounds finite; deserialized
/// values go through the same check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawInterval")]
pub struct Interval {
    start: f64,
    end: f64,
}

#[derive(Deserialize)]
struct RawInterval {
    start: f64,
    end: f64,
}

impl TryFrom<RawInterval> for Interval {
    type Error = ConfigError;

    fn try_from(raw: RawInterval) -> Result<Self, Self::Error> {
        Interval::new(raw.start, raw.end)
    }
}

impl Interval {
    pub fn new(start: f64, end: f64) -> Result<Self, ConfigError> {
        if !start.is_finite() || !end.is_finite() {
            return Err(ConfigError::MalformedWindow {
                start,
                end,
                reason: "bounds must be finite".to_string(),
            });
        }
        if start >= end {
            return Err(ConfigError::MalformedWindow {
                start,
                end,
                reason: "start must be < end".to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Window covering whole days `[start_day, end_day)`.
    pub fn days(start_day: f64, end_day: f64) -> Result<Self, ConfigError> {
        Self::new(start_day * TO_HOURS, end_day * TO_HOURS)
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// True iff `t` lies in `[start, end)`.
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }

    /// Check that the window lies inside `[0, horizon_hours]`.
    ///
    /// The end bound may equal the horizon because the window itself is
    /// half-open.
    pub fn check_within_horizon(&self, horizon_hours: f64) -> Result<(), ConfigError> {
        if self.start < 0.0 || self.end > horizon_hours {
            return Err(ConfigError::MalformedWindow {
                start: self.start,
                end: self.end,
                reason: format!("window exceeds simulation horizon [0, {})", horizon_hours),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_inverted_windows() {
        assert!(Interval::new(1.0, 1.0).is_err());
        assert!(Interval::new(2.0, 1.0).is_err());
        assert!(Interval::new(0.0, f64::INFINITY).is_err());
        assert!(Interval::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn contains_is_half_open() {
        let w = Interval::new(10.0, 20.0).unwrap();
        assert!(!w.contains(9.999));
        assert!(w.contains(10.0));
        assert!(w.contains(19.999));
        assert!(!w.contains(20.0));
    }

    #[test]
    fn day_windows_scale_to_hours() {
        let w = Interval::days(21.0, 28.0).unwrap();
        assert_eq!(w.start(), 504.0);
        assert_eq!(w.end(), 672.0);
        assert_eq!(w.duration(), 168.0);
    }

    #[test]
    fn horizon_check() {
        let w = Interval::new(0.0, 672.0).unwrap();
        assert!(w.check_within_horizon(672.0).is_ok());
        assert!(w.check_within_horizon(600.0).is_err());
        let neg = Interval::new(-1.0, 5.0).unwrap();
        assert!(neg.check_within_horizon(672.0).is_err());
    }

    #[test]
    fn deserialization_validates() {
        let ok: Interval = serde_json::from_str(r#"{"start": 0.0, "end": 24.0}"#).unwrap();
        assert_eq!(ok.end(), 24.0);
        let bad: Result<Interval, _> = serde_json::from_str(r#"{"start": 5.0, "end": 1.0}"#);
        assert!(bad.is_err());
    }
}
