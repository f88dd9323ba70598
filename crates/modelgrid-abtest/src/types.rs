//! A/B test records.

use std::fmt;

use modelgrid_core::config::AbTestDefaults;
use modelgrid_core::{Metric, ModelRef, Timestamp};
use serde::{Deserialize, Serialize};

use crate::stats::{Summary, TestOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Control,
    Treatment,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Variant::Control => "control",
            Variant::Treatment => "treatment",
        })
    }
}

/// Tunables of one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestConfig {
    pub confidence_level: f64,
    /// Absolute for proportion metrics, relative to control otherwise.
    pub minimum_detectable_effect: f64,
    pub power: f64,
    pub min_sample_size: u64,
    pub max_sample_size: u64,
    pub max_duration_secs: u64,
    pub futility_threshold: f64,
    pub treatment_percent: u8,
    pub primary_metric: Metric,
    #[serde(default)]
    pub secondary_metrics: Vec<Metric>,
    /// Expected control success rate, for sample-size planning.
    #[serde(default = "default_baseline_rate")]
    pub baseline_rate: f64,
}

fn default_baseline_rate() -> f64 {
    0.95
}

impl From<&AbTestDefaults> for AbTestConfig {
    fn from(d: &AbTestDefaults) -> Self {
        Self {
            confidence_level: d.confidence_level,
            minimum_detectable_effect: d.minimum_detectable_effect,
            power: d.power,
            min_sample_size: d.min_sample_size,
            max_sample_size: d.max_sample_size,
            max_duration_secs: d.max_duration_secs,
            futility_threshold: d.futility_threshold,
            treatment_percent: d.treatment_percent,
            primary_metric: Metric::SuccessRate,
            secondary_metrics: vec![Metric::LatencyMs, Metric::Confidence],
            baseline_rate: default_baseline_rate(),
        }
    }
}

impl Default for AbTestConfig {
    fn default() -> Self {
        Self::from(&AbTestDefaults::default())
    }
}

impl AbTestConfig {
    pub fn alpha(&self) -> f64 {
        1.0 - self.confidence_level
    }

    /// Every problem with the configuration.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !(self.confidence_level > 0.5 && self.confidence_level < 1.0) {
            problems.push(format!("confidence_level {} outside (0.5, 1)", self.confidence_level));
        }
        if !(self.power > 0.0 && self.power < 1.0) {
            problems.push(format!("power {} outside (0, 1)", self.power));
        }
        if !(self.minimum_detectable_effect > 0.0) {
            problems.push("minimum_detectable_effect must be positive".to_string());
        }
        if self.min_sample_size < 2 {
            problems.push("min_sample_size must be at least 2".to_string());
        }
        if self.max_sample_size < self.min_sample_size {
            problems.push("max_sample_size below min_sample_size".to_string());
        }
        if self.max_duration_secs == 0 {
            problems.push("max_duration_secs must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.futility_threshold) {
            problems.push("futility_threshold outside [0, 1)".to_string());
        }
        if self.treatment_percent > 100 {
            problems.push("treatment_percent above 100".to_string());
        }
        if !(self.baseline_rate > 0.0 && self.baseline_rate < 1.0) {
            problems.push("baseline_rate outside (0, 1)".to_string());
        }
        problems
    }
}

/// Running mean and variance (Welford).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Welford {
    pub n: u64,
    pub mean: f64,
    pub m2: f64,
}

impl Welford {
    pub fn push(&mut self, x: f64) {
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Sample variance; zero below two observations.
    pub fn variance(&self) -> f64 {
        if self.n < 2 {
            0.0
        } else {
            self.m2 / (self.n - 1) as f64
        }
    }

    pub fn summary(&self) -> Summary {
        Summary {
            n: self.n,
            mean: self.mean,
            variance: self.variance(),
        }
    }
}

/// One request outcome routed to a variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub success: bool,
    pub latency_ms: f64,
    pub confidence: Option<f64>,
    pub cost: f64,
}

/// Accumulated outcomes of one variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantStats {
    pub requests: u64,
    pub successes: u64,
    pub latency_ms: Welford,
    pub confidence: Welford,
    pub cost: Welford,
}

impl VariantStats {
    pub fn push(&mut self, obs: &Observation) {
        self.requests += 1;
        if obs.success {
            self.successes += 1;
        }
        self.latency_ms.push(obs.latency_ms);
        if let Some(c) = obs.confidence {
            self.confidence.push(c);
        }
        self.cost.push(obs.cost);
    }

    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.successes as f64 / self.requests as f64
        }
    }

    /// Observations that carry `metric`.
    pub fn count(&self, metric: Metric) -> u64 {
        match metric {
            Metric::SuccessRate | Metric::ErrorRate => self.requests,
            Metric::LatencyMs => self.latency_ms.n,
            Metric::Confidence => self.confidence.n,
            Metric::Cost => self.cost.n,
        }
    }

    pub(crate) fn continuous(&self, metric: Metric) -> Option<&Welford> {
        match metric {
            Metric::LatencyMs => Some(&self.latency_ms),
            Metric::Confidence => Some(&self.confidence),
            Metric::Cost => Some(&self.cost),
            Metric::SuccessRate | Metric::ErrorRate => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AbTestStatus {
    Running,
    Stopped { reason: String },
    Concluded,
}

impl AbTestStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, AbTestStatus::Running)
    }
}

/// What the deployment controller should do with the test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    PromoteTreatment,
    KeepControl,
    Extend,
    /// The test ran out of time before it could be judged. No winner is
    /// declared; the control keeps serving.
    Inconclusive,
}

/// One interim analysis that spent alpha.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Look {
    pub at: Timestamp,
    pub information_fraction: f64,
    pub cumulative_alpha: f64,
}

/// Comparison of one metric between the variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricComparison {
    pub metric: Metric,
    pub control_value: f64,
    pub treatment_value: f64,
    pub control_n: u64,
    pub treatment_n: u64,
    /// Treatment minus control: absolute for proportions, relative to
    /// control for continuous metrics.
    pub effect_size: f64,
    pub outcome: TestOutcome,
}

impl MetricComparison {
    /// Whether the treatment moved the metric in its good direction.
    pub fn treatment_better(&self) -> bool {
        if self.metric.higher_is_better() {
            self.effect_size > 0.0
        } else {
            self.effect_size < 0.0
        }
    }
}

/// Result of [`AbTestEngine::analyze`](crate::AbTestEngine::analyze).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestAnalysis {
    pub test_id: String,
    pub analyzed_at: Timestamp,
    pub information_fraction: f64,
    /// Significance level this look was held to.
    pub nominal_alpha: f64,
    pub cumulative_alpha: f64,
    pub primary: Option<MetricComparison>,
    #[serde(default)]
    pub secondary: Vec<MetricComparison>,
    pub statistically_significant: bool,
    pub practically_significant: bool,
    pub winner: Option<Variant>,
    pub futile: bool,
    pub conditional_power: Option<f64>,
    pub verdict: Verdict,
    pub recommendation: String,
}

/// A persisted A/B test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTest {
    pub id: String,
    pub name: String,
    pub control: ModelRef,
    pub treatment: ModelRef,
    pub config: AbTestConfig,
    pub required_sample_size: u64,
    pub treatment_percent: u8,
    pub status: AbTestStatus,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
    pub control_stats: VariantStats,
    pub treatment_stats: VariantStats,
    #[serde(default)]
    pub looks: Vec<Look>,
    pub last_analysis: Option<AbTestAnalysis>,
}

impl AbTest {
    pub fn deadline(&self) -> Timestamp {
        self.started_at.saturating_add(self.config.max_duration_secs)
    }

    pub fn variant_ref(&self, variant: Variant) -> &ModelRef {
        match variant {
            Variant::Control => &self.control,
            Variant::Treatment => &self.treatment,
        }
    }

    pub fn stats(&self, variant: Variant) -> &VariantStats {
        match variant {
            Variant::Control => &self.control_stats,
            Variant::Treatment => &self.treatment_stats,
        }
    }

    pub(crate) fn stats_mut(&mut self, variant: Variant) -> &mut VariantStats {
        match variant {
            Variant::Control => &mut self.control_stats,
            Variant::Treatment => &mut self.treatment_stats,
        }
    }
}

/// Progress report for a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestProgress {
    pub test_id: String,
    pub status: AbTestStatus,
    pub elapsed_secs: u64,
    pub max_duration_secs: u64,
    pub control_requests: u64,
    pub treatment_requests: u64,
    pub required_sample_size: u64,
    pub control_progress: f64,
    pub treatment_progress: f64,
    pub ready_for_analysis: bool,
    pub looks: usize,
    pub treatment_percent: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welford_matches_two_pass() {
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut w = Welford::default();
        for x in xs {
            w.push(x);
        }
        assert_eq!(w.n, 8);
        assert!((w.mean - 5.0).abs() < 1e-12);
        assert!((w.variance() - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(AbTestConfig::default().problems().is_empty());
        let cfg = AbTestConfig {
            max_sample_size: 10,
            treatment_percent: 120,
            ..AbTestConfig::default()
        };
        assert_eq!(cfg.problems().len(), 2);
    }

    #[test]
    fn latency_improvement_is_a_decrease() {
        let outcome = crate::stats::TestOutcome {
            kind: crate::stats::TestKind::WelchT,
            statistic: -3.0,
            p_value: 0.001,
            difference: -20.0,
            ci_low: -30.0,
            ci_high: -10.0,
            df: Some(100.0),
        };
        let cmp = MetricComparison {
            metric: Metric::LatencyMs,
            control_value: 200.0,
            treatment_value: 180.0,
            control_n: 50,
            treatment_n: 50,
            effect_size: -0.1,
            outcome,
        };
        assert!(cmp.treatment_better());
    }

    #[test]
    fn status_serializes_tagged() {
        let json = serde_json::to_string(&AbTestStatus::Stopped {
            reason: "manual".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"state":"stopped","reason":"manual"}"#);
    }
}
