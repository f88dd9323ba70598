//! Bucketed metric history kept beyond the rolling window.

use std::collections::BTreeMap;

use modelgrid_core::{Metric, PerformanceSample, Timestamp};
use serde::{Deserialize, Serialize};

/// Aggregate of one metric over one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// Bucket start.
    pub timestamp: Timestamp,
    pub value: f64,
    pub count: usize,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: usize,
    sum: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    fn new(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Per-version trend buckets, oldest first.
#[derive(Debug)]
pub struct TrendSeries {
    bucket_secs: u64,
    retention_secs: u64,
    buckets: BTreeMap<Timestamp, BTreeMap<Metric, Accumulator>>,
}

impl TrendSeries {
    pub fn new(bucket_secs: u64, retention_secs: u64) -> Self {
        Self {
            bucket_secs: bucket_secs.max(1),
            retention_secs,
            buckets: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, sample: &PerformanceSample) {
        let start = sample.timestamp - sample.timestamp % self.bucket_secs;
        let bucket = self.buckets.entry(start).or_default();
        for metric in Metric::ALL {
            if let Some(value) = sample.value(metric) {
                bucket
                    .entry(metric)
                    .and_modify(|acc| acc.add(value))
                    .or_insert_with(|| Accumulator::new(value));
            }
        }
    }

    /// Drop buckets that ended before the retention horizon.
    pub fn prune(&mut self, now: Timestamp) {
        let horizon = now.saturating_sub(self.retention_secs);
        let bucket_secs = self.bucket_secs;
        self.buckets.retain(|start, _| start + bucket_secs > horizon);
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Points per metric for buckets ending after `since`.
    pub fn points(&self, since: Timestamp) -> BTreeMap<Metric, Vec<TrendPoint>> {
        let mut out: BTreeMap<Metric, Vec<TrendPoint>> = BTreeMap::new();
        for (start, metrics) in &self.buckets {
            if start + self.bucket_secs <= since {
                continue;
            }
            for (metric, acc) in metrics {
                out.entry(*metric).or_default().push(TrendPoint {
                    timestamp: *start,
                    value: acc.sum / acc.count as f64,
                    count: acc.count,
                    min: acc.min,
                    max: acc.max,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: Timestamp, latency_ms: f64, success: bool) -> PerformanceSample {
        PerformanceSample {
            model: "sorter".to_string(),
            version: "1.0.0".to_string(),
            timestamp: ts,
            success,
            latency_ms,
            confidence: None,
            cost: 0.0,
        }
    }

    #[test]
    fn buckets_aggregate_per_metric() {
        let mut series = TrendSeries::new(3_600, 86_400);
        series.push(&sample(3_600, 100.0, true));
        series.push(&sample(3_700, 300.0, false));
        series.push(&sample(7_300, 50.0, true));

        let points = series.points(0);
        let latency = &points[&Metric::LatencyMs];
        assert_eq!(latency.len(), 2);
        assert_eq!(latency[0].timestamp, 3_600);
        assert_eq!(latency[0].value, 200.0);
        assert_eq!(latency[0].count, 2);
        assert_eq!((latency[0].min, latency[0].max), (100.0, 300.0));
        assert_eq!(points[&Metric::SuccessRate][0].value, 0.5);
        assert!(!points.contains_key(&Metric::Confidence));
    }

    #[test]
    fn old_buckets_pruned_and_filtered() {
        let mut series = TrendSeries::new(100, 1_000);
        for ts in [0, 150, 950, 1_050] {
            series.push(&sample(ts, 1.0, true));
        }
        assert_eq!(series.points(900)[&Metric::LatencyMs].len(), 2);

        series.prune(1_250);
        let starts: Vec<Timestamp> = series.points(0)[&Metric::LatencyMs]
            .iter()
            .map(|p| p.timestamp)
            .collect();
        assert_eq!(starts, vec![900, 1_000]);
    }
}
