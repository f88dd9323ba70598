//! modelgrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelGridConfig {
    pub monitor: MonitorConfig,
    pub rollout: RolloutConfig,
    pub abtest: AbTestDefaults,
    pub scheduler: SchedulerConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between evaluation passes.
    pub evaluation_interval_secs: u64,
    /// Length of the rolling window thresholds are evaluated over.
    pub window_secs: u64,
    /// Samples a window needs before thresholds are evaluated.
    pub min_samples: usize,
    /// Standard deviations from the trailing mean that count as anomalous.
    pub anomaly_sensitivity: f64,
    /// Trailing samples needed before anomaly detection kicks in.
    pub anomaly_min_baseline: usize,
    /// Hard cap on samples retained per window.
    pub max_samples_per_window: usize,
    /// Samples queued between the request path and the evaluation loop.
    /// Samples recorded while the queue is full are dropped and counted.
    pub sample_buffer: usize,
    /// Width of one trend bucket.
    pub trend_bucket_secs: u64,
    /// How far back trend buckets are kept.
    pub trend_retention_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 60,
            window_secs: 300,
            min_samples: 10,
            anomaly_sensitivity: 2.0,
            anomaly_min_baseline: 30,
            max_samples_per_window: 10_000,
            sample_buffer: 100_000,
            trend_bucket_secs: 3_600,
            trend_retention_secs: 7 * 24 * 3_600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Seconds between deployment step evaluations.
    pub tick_interval_secs: u64,
    /// Timeout for fetching aggregated metrics.
    pub metrics_timeout_ms: u64,
    /// Timeout for each inference provider call.
    pub provider_timeout_ms: u64,
    /// Synthetic requests sent to a blue-green shadow before cutover.
    pub shadow_requests: u32,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 10,
            metrics_timeout_ms: 2_000,
            provider_timeout_ms: 5_000,
            shadow_requests: 20,
        }
    }
}

impl RolloutConfig {
    /// Every reason this configuration cannot drive deployments.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.tick_interval_secs == 0 {
            problems.push("tick_interval_secs must be positive".to_string());
        }
        if self.shadow_requests == 0 {
            problems.push("shadow_requests must be positive".to_string());
        }
        problems
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbTestDefaults {
    pub confidence_level: f64,
    pub minimum_detectable_effect: f64,
    pub power: f64,
    pub min_sample_size: u64,
    pub max_sample_size: u64,
    pub max_duration_secs: u64,
    pub futility_threshold: f64,
    pub treatment_percent: u8,
}

impl Default for AbTestDefaults {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            minimum_detectable_effect: 0.05,
            power: 0.8,
            min_sample_size: 1_000,
            max_sample_size: 100_000,
            max_duration_secs: 7 * 24 * 3600,
            futility_threshold: 0.01,
            treatment_percent: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrent_updates: usize,
    pub tick_interval_secs: u64,
    /// Default per-rule validation timeout.
    pub validation_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_updates: 3,
            tick_interval_secs: 30,
            validation_timeout_secs: 300,
        }
    }
}

/// Version retention, applied per model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Versions kept per model regardless of age.
    pub max_versions_per_model: usize,
    /// Versions younger than this are always kept.
    pub retention_secs: u64,
    /// Seconds between cleanup passes.
    pub cleanup_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_versions_per_model: 10,
            retention_secs: 90 * 24 * 3_600,
            cleanup_interval_secs: 3_600,
        }
    }
}

impl ModelGridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ModelGridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial() {
        let toml_str = r#"
[monitor]
window_secs = 120

[scheduler]
max_concurrent_updates = 1
"#;
        let config: ModelGridConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.monitor.window_secs, 120);
        assert_eq!(config.monitor.min_samples, 10);
        assert_eq!(config.scheduler.max_concurrent_updates, 1);
        assert_eq!(config.abtest.treatment_percent, 50);
    }

    #[test]
    fn test_roundtrip_defaults() {
        let config = ModelGridConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("[rollout]"));
        let back: ModelGridConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_zero_shadow_requests_rejected() {
        let toml_str = r#"
[rollout]
shadow_requests = 0
"#;
        let config: ModelGridConfig = toml::from_str(toml_str).unwrap();
        let problems = config.rollout.problems();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("shadow_requests"));
        assert!(RolloutConfig::default().problems().is_empty());
    }

    #[test]
    fn test_retention_defaults() {
        let config: ModelGridConfig = toml::from_str("[retention]\nmax_versions_per_model = 3\n").unwrap();
        assert_eq!(config.retention.max_versions_per_model, 3);
        assert_eq!(config.retention.retention_secs, 90 * 24 * 3_600);
        assert_eq!(config.monitor.sample_buffer, 100_000);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config =
            ModelGridConfig::load_or_default(Path::new("/nonexistent/modelgrid.toml")).unwrap();
        assert_eq!(config, ModelGridConfig::default());
    }
}
