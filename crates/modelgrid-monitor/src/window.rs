//! Time-bounded sample windows and their aggregates.

use std::collections::VecDeque;

use modelgrid_core::{Metric, ModelRef, PerformanceSample, Timestamp};
use serde::{Deserialize, Serialize};

/// Samples for one model version within the last `window_secs`.
#[derive(Debug)]
pub struct RollingWindow {
    samples: VecDeque<PerformanceSample>,
    window_secs: u64,
    max_samples: usize,
}

impl RollingWindow {
    pub fn new(window_secs: u64, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            window_secs,
            max_samples: max_samples.max(1),
        }
    }

    /// Append a sample, evicting the oldest once the cap is reached.
    pub fn push(&mut self, sample: PerformanceSample) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Drop samples older than the window ending at `now`.
    pub fn prune(&mut self, now: Timestamp) {
        let cutoff = now.saturating_sub(self.window_secs);
        self.samples.retain(|s| s.timestamp > cutoff);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Earliest and latest sample timestamps in the window.
    pub fn span(&self) -> Option<(Timestamp, Timestamp)> {
        let first = self.samples.iter().map(|s| s.timestamp).min()?;
        let last = self.samples.iter().map(|s| s.timestamp).max()?;
        Some((first, last))
    }

    /// Values of `metric` across the window, oldest first.
    pub fn values(&self, metric: Metric) -> Vec<f64> {
        self.samples.iter().filter_map(|s| s.value(metric)).collect()
    }

    /// Aggregate the window as of `now`.
    pub fn aggregate(&self, model_ref: &ModelRef, now: Timestamp) -> VersionMetrics {
        let count = self.samples.len();
        let successes = self.samples.iter().filter(|s| s.success).count();
        let latencies = self.values(Metric::LatencyMs);
        let confidences = self.values(Metric::Confidence);
        let costs = self.values(Metric::Cost);
        let success_rate = if count > 0 {
            successes as f64 / count as f64
        } else {
            0.0
        };

        VersionMetrics {
            model: model_ref.name.clone(),
            version: model_ref.version.clone(),
            window_start: now.saturating_sub(self.window_secs),
            window_end: now,
            sample_count: count,
            success_rate,
            error_rate: if count > 0 { 1.0 - success_rate } else { 0.0 },
            mean_latency_ms: mean(&latencies).unwrap_or(0.0),
            p95_latency_ms: percentile(&latencies, 0.95),
            p99_latency_ms: percentile(&latencies, 0.99),
            mean_confidence: mean(&confidences),
            mean_cost: mean(&costs).unwrap_or(0.0),
            total_cost: costs.iter().sum(),
        }
    }
}

/// Aggregated performance of one model version over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMetrics {
    pub model: String,
    pub version: String,
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    pub sample_count: usize,
    pub success_rate: f64,
    pub error_rate: f64,
    pub mean_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub mean_confidence: Option<f64>,
    pub mean_cost: f64,
    pub total_cost: f64,
}

impl VersionMetrics {
    /// The aggregate thresholds compare against for `metric`.
    pub fn value(&self, metric: Metric) -> Option<f64> {
        if self.sample_count == 0 {
            return None;
        }
        match metric {
            Metric::SuccessRate => Some(self.success_rate),
            Metric::ErrorRate => Some(self.error_rate),
            Metric::LatencyMs => Some(self.mean_latency_ms),
            Metric::Confidence => self.mean_confidence,
            Metric::Cost => Some(self.mean_cost),
        }
    }
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample standard deviation. `None` below two values.
pub(crate) fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Nearest-rank percentile, 0.0 when empty.
fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = (sorted.len() as f64 * q) as usize;
    sorted[idx.min(sorted.len() - 1)]
}
