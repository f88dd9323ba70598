//! Rollout strategies, health criteria, and rollback settings.

use modelgrid_abtest::AbTestConfig;
use modelgrid_monitor::{PerformanceThreshold, VersionMetrics};
use serde::{Deserialize, Serialize};

/// How to roll out a new version of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// Switch all traffic at once, then watch one evaluation window.
    Replace,
    /// Ramp traffic through a sequence of percentages.
    Canary(CanaryConfig),
    /// Validate a shadow copy at 0%, then cut over in one step.
    BlueGreen(BlueGreenConfig),
    /// Let an A/B test decide.
    AbTest(AbTestStrategy),
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Canary(CanaryConfig::default())
    }
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Replace => "replace",
            Strategy::Canary(_) => "canary",
            Strategy::BlueGreen(_) => "blue_green",
            Strategy::AbTest(_) => "ab_test",
        }
    }

    /// Whether the strategy serves the current version alongside the new
    /// one, and so needs an `Active` baseline.
    pub fn requires_baseline(&self) -> bool {
        !matches!(self, Strategy::Replace)
    }

    /// Fill in defaults, e.g. a missing final 100% canary step.
    pub fn normalized(mut self) -> Self {
        if let Strategy::Canary(cfg) = &mut self
            && cfg.steps.last() != Some(&100)
        {
            cfg.steps.push(100);
        }
        self
    }

    pub fn problems(&self) -> Vec<String> {
        match self {
            Strategy::Replace => Vec::new(),
            Strategy::Canary(cfg) => cfg.problems(),
            Strategy::BlueGreen(cfg) => {
                if cfg.shadow_requests == Some(0) {
                    vec!["shadow_requests must be positive".to_string()]
                } else {
                    Vec::new()
                }
            }
            Strategy::AbTest(ab) => ab.config.as_ref().map(|c| c.problems()).unwrap_or_default(),
        }
    }
}

/// Canary ramp. Each step holds for the rollback evaluation window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanaryConfig {
    /// Treatment percentages, strictly increasing, ending at 100.
    pub steps: Vec<u8>,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            steps: vec![10, 50, 100],
        }
    }
}

impl CanaryConfig {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.steps.is_empty() {
            problems.push("canary needs at least one step".to_string());
        }
        if self.steps.iter().any(|s| *s == 0 || *s > 100) {
            problems.push("canary steps must be in (0, 100]".to_string());
        }
        if self.steps.windows(2).any(|w| w[0] >= w[1]) {
            problems.push("canary steps must be strictly increasing".to_string());
        }
        problems
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlueGreenConfig {
    /// Synthetic requests sent to the shadow. `[rollout] shadow_requests`
    /// when absent.
    #[serde(default)]
    pub shadow_requests: Option<u32>,
    /// Payloads cycled through for shadow requests.
    #[serde(default)]
    pub shadow_payloads: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbTestStrategy {
    /// Test parameters; the engine's `[abtest]` defaults when absent.
    #[serde(default)]
    pub config: Option<AbTestConfig>,
}

/// Conditions the candidate must meet before a step advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCriteria {
    pub min_success_rate: Option<f64>,
    pub max_error_rate: Option<f64>,
    pub max_p95_latency_ms: Option<f64>,
}

impl Default for HealthCriteria {
    fn default() -> Self {
        Self {
            min_success_rate: Some(0.95),
            max_error_rate: None,
            max_p95_latency_ms: None,
        }
    }
}

impl HealthCriteria {
    /// Criteria `metrics` fails, empty when healthy.
    pub fn violations(&self, metrics: &VersionMetrics) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(min) = self.min_success_rate
            && metrics.success_rate < min
        {
            out.push(format!("success_rate {:.4} < {min}", metrics.success_rate));
        }
        if let Some(max) = self.max_error_rate
            && metrics.error_rate > max
        {
            out.push(format!("error_rate {:.4} > {max}", metrics.error_rate));
        }
        if let Some(max) = self.max_p95_latency_ms
            && metrics.p95_latency_ms > max
        {
            out.push(format!("p95_latency_ms {:.1} > {max}", metrics.p95_latency_ms));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    /// Roll back automatically on a fired rollback-class breach or a
    /// failed step.
    pub enabled: bool,
    /// Thresholds in force for the model while the deployment runs; the
    /// monitor's defaults when empty. Cleared when the deployment ends.
    pub thresholds: Vec<PerformanceThreshold>,
    /// Seconds each step (and the post-switch evaluation) lasts.
    pub evaluation_window_secs: u64,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            thresholds: Vec::new(),
            evaluation_window_secs: 300,
        }
    }
}
