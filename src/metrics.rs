// src/metrics.rs
//
// Running statistics across repeats.
// - OnlineStats: Welford mean/variance plus observed range for one quantity.
// - GridStats: one OnlineStats per point of a fixed time grid.
// - StatsSnapshot: the persisted view of an OnlineStats.
//
// The reducer feeds repeats in repeat-index order, so the floating-point
// results do not depend on which worker finished first.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default)]
pub struct OnlineStats {
    count: u64,
    mean: f64,
    sq_dev: f64,
    range: Option<(f64, f64)>,
}

impl OnlineStats {
    /// Record one repeat's value. NaN and infinities are skipped.
    pub fn push(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        self.count += 1;
        self.range = Some(match self.range {
            Some((lo, hi)) => (lo.min(x), hi.max(x)),
            None => (x, x),
        });

        let before = x - self.mean;
        self.mean += before / self.count as f64;
        self.sq_dev += before * (x - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// 0 when empty.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Unbiased variance across repeats; 0 with fewer than two samples.
    pub fn sample_variance(&self) -> f64 {
        match self.count {
            0 | 1 => 0.0,
            n => self.sq_dev / (n - 1) as f64,
        }
    }

    /// (min, max), or (0, 0) when empty.
    pub fn range(&self) -> (f64, f64) {
        self.range.unwrap_or((0.0, 0.0))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (min, max) = self.range();
        let variance = self.sample_variance();
        StatsSnapshot {
            n: self.count,
            mean: self.mean,
            variance,
            std: variance.sqrt(),
            min,
            max,
        }
    }
}

impl FromIterator<f64> for OnlineStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = OnlineStats::default();
        iter.into_iter().for_each(|x| stats.push(x));
        stats
    }
}

/// Per-grid-point statistics of one epidemic series.
#[derive(Debug, Clone)]
pub struct GridStats {
    points: Vec<OnlineStats>,
}

impl GridStats {
    pub fn new(len: usize) -> Self {
        Self {
            points: vec![OnlineStats::default(); len],
        }
    }

    /// Record one repeat sampled on the grid; `None` marks a grid point the
    /// repeat did not reach and is skipped.
    pub fn push_repeat<I>(&mut self, samples: I)
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        for (stats, sample) in self.points.iter_mut().zip(samples) {
            if let Some(x) = sample {
                stats.push(x);
            }
        }
    }

    pub fn means(&self) -> Vec<f64> {
        self.points.iter().map(OnlineStats::mean).collect()
    }

    pub fn variances(&self) -> Vec<f64> {
        self.points.iter().map(OnlineStats::sample_variance).collect()
    }
}

/// Aggregate across repeats. Variance is the sample variance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub n: u64,
    pub mean: f64,
    pub variance: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welford_matches_closed_form() {
        let s: OnlineStats = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].into_iter().collect();
        assert_eq!(s.count(), 8);
        assert!((s.mean() - 5.0).abs() < 1e-12);
        assert!((s.sample_variance() - 32.0 / 7.0).abs() < 1e-12);
        assert_eq!(s.range(), (2.0, 9.0));
    }

    #[test]
    fn non_finite_samples_are_skipped() {
        let s: OnlineStats = [1.0, f64::NAN, 3.0, f64::INFINITY].into_iter().collect();
        assert_eq!(s.count(), 2);
        assert!((s.mean() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn empty_snapshot_is_zeroed() {
        let snap = OnlineStats::default().snapshot();
        assert_eq!(snap.n, 0);
        assert_eq!((snap.mean, snap.variance, snap.min, snap.max), (0.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn grid_points_skip_unreached_samples() {
        let mut g = GridStats::new(3);
        g.push_repeat([Some(1.0), Some(2.0), Some(3.0)]);
        g.push_repeat([Some(3.0), Some(4.0), None]);
        assert_eq!(g.means(), vec![2.0, 3.0, 3.0]);
        assert_eq!(g.variances(), vec![2.0, 2.0, 0.0]);
    }
}
