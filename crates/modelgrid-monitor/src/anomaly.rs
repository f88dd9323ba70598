//! Z-score anomaly detection against a trailing baseline.
//!
//! Anomalies are advisory. They are published as events and never feed
//! the rollback path.

use modelgrid_core::Metric;

use crate::window::{mean, std_dev};

/// Metrics screened for anomalies. Proportion metrics are 0/1 per sample
/// and are covered by thresholds instead.
pub const SCREENED_METRICS: [Metric; 3] = [Metric::LatencyMs, Metric::Confidence, Metric::Cost];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyDetector {
    /// Standard deviations from the mean that count as anomalous.
    pub sensitivity: f64,
    /// Baseline samples required before scoring.
    pub min_baseline: usize,
}

/// Mean and standard deviation of a trailing baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
}

impl AnomalyDetector {
    pub fn new(sensitivity: f64, min_baseline: usize) -> Self {
        Self {
            sensitivity,
            min_baseline: min_baseline.max(2),
        }
    }

    /// Summarize `values`; `None` when too few or perfectly flat.
    pub fn baseline(&self, values: &[f64]) -> Option<Baseline> {
        if values.len() < self.min_baseline {
            return None;
        }
        let mean = mean(values)?;
        let std_dev = std_dev(values)?;
        (std_dev > f64::EPSILON).then_some(Baseline { mean, std_dev })
    }

    /// Z-score of `value` when it lies beyond the sensitivity band.
    pub fn score(&self, baseline: &Baseline, value: f64) -> Option<f64> {
        let z = (value - baseline.mean) / baseline.std_dev;
        (z.abs() > self.sensitivity).then_some(z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_minimum_baseline() {
        let d = AnomalyDetector::new(2.0, 5);
        assert!(d.baseline(&[1.0, 2.0, 3.0]).is_none());
        assert!(d.baseline(&[1.0, 2.0, 3.0, 2.0, 1.0]).is_some());
    }

    #[test]
    fn flat_baseline_never_scores() {
        let d = AnomalyDetector::new(2.0, 3);
        assert!(d.baseline(&[5.0; 10]).is_none());
    }

    #[test]
    fn outlier_scored_inlier_ignored() {
        let d = AnomalyDetector::new(2.0, 5);
        let values: Vec<f64> = (0..50).map(|i| 100.0 + (i % 5) as f64).collect();
        let b = d.baseline(&values).unwrap();
        assert!(d.score(&b, 102.0).is_none());
        let z = d.score(&b, 400.0).unwrap();
        assert!(z > 2.0);
        let z = d.score(&b, 0.0).unwrap();
        assert!(z < -2.0);
    }
}
