//! Domain types shared across ModelGrid crates.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// A model version identified by `(name, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelRef {
    pub name: String,
    pub version: String,
}

impl ModelRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Composite `{name}/{version}` key.
    pub fn key(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

// ── Configuration ─────────────────────────────────────────────────

/// Inference configuration of a model version.
///
/// The core never interprets these values beyond [`validate`](Self::validate);
/// they are handed verbatim to the inference provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfiguration {
    /// Provider identifier, e.g. "openai", "anthropic".
    pub provider: String,
    /// Provider-side model name.
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Provider-specific parameters.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

fn default_temperature() -> f64 {
    0.3
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

impl ModelConfiguration {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            parameters: serde_json::Map::new(),
        }
    }

    /// Check the parameters the core can reason about.
    ///
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        if self.provider.trim().is_empty() {
            problems.push("provider is empty".to_string());
        }
        if self.model.trim().is_empty() {
            problems.push("model is empty".to_string());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            problems.push(format!(
                "temperature {} outside [0, 2]",
                self.temperature
            ));
        }
        if self.max_tokens == 0 {
            problems.push("max_tokens must be positive".to_string());
        }
        if self.timeout_secs == 0 {
            problems.push("timeout_secs must be positive".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// Parse and normalise a semantic version string.
pub fn parse_version(version: &str) -> Result<semver::Version, semver::Error> {
    semver::Version::parse(version.trim())
}

// ── Performance samples ───────────────────────────────────────────

/// One observed request outcome for a model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub model: String,
    pub version: String,
    pub timestamp: Timestamp,
    pub success: bool,
    pub latency_ms: f64,
    /// Classifier confidence, when the response carried one.
    pub confidence: Option<f64>,
    pub cost: f64,
}

impl PerformanceSample {
    pub fn model_ref(&self) -> ModelRef {
        ModelRef::new(&self.model, &self.version)
    }

    /// The value this sample contributes to `metric`, if any.
    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::SuccessRate => Some(if self.success { 1.0 } else { 0.0 }),
            Metric::ErrorRate => Some(if self.success { 0.0 } else { 1.0 }),
            Metric::LatencyMs => Some(self.latency_ms),
            Metric::Confidence => self.confidence,
            Metric::Cost => Some(self.cost),
        }
    }
}

/// Metrics tracked per model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    SuccessRate,
    ErrorRate,
    LatencyMs,
    Confidence,
    Cost,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::SuccessRate,
        Metric::ErrorRate,
        Metric::LatencyMs,
        Metric::Confidence,
        Metric::Cost,
    ];

    /// Proportion metrics are means of 0/1 outcomes.
    pub fn is_proportion(self) -> bool {
        matches!(self, Metric::SuccessRate | Metric::ErrorRate)
    }

    /// Whether a larger value is an improvement.
    pub fn higher_is_better(self) -> bool {
        matches!(self, Metric::SuccessRate | Metric::Confidence)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::SuccessRate => "success_rate",
            Metric::ErrorRate => "error_rate",
            Metric::LatencyMs => "latency_ms",
            Metric::Confidence => "confidence",
            Metric::Cost => "cost",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
