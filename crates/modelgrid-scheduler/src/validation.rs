//! Validation pipeline run before an update is handed to the deployment
//! controller.
//!
//! Rules run in order. A failing required rule stops the pipeline and
//! rejects the update; a failing optional rule is recorded as a warning.
//! Every rule runs under a timeout, and a timeout counts as a failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use modelgrid_core::{InferenceProvider, InferenceRequest, ModelRef};
use modelgrid_state::{ModelVersion, VersionStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const CONFIGURATION_VALID: &str = "configuration_valid";
pub const VERSION_AVAILABLE: &str = "version_available";
pub const PROVIDER_SMOKE_TEST: &str = "provider_smoke_test";

/// One step of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Name of a registered validator.
    pub name: String,
    pub required: bool,
    /// Overrides the scheduler-wide default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ValidationRule {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            timeout_secs: None,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Pipeline used when an update names no rules.
pub fn default_rules() -> Vec<ValidationRule> {
    vec![
        ValidationRule::required(CONFIGURATION_VALID),
        ValidationRule::required(VERSION_AVAILABLE),
    ]
}

/// What a validator gets to look at.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub target: ModelRef,
    /// `None` when the version does not exist.
    pub version: Option<ModelVersion>,
    /// Version currently serving the model.
    pub active: Option<ModelVersion>,
}

impl ValidationContext {
    fn require_version(&self) -> Result<&ModelVersion, String> {
        self.version
            .as_ref()
            .ok_or_else(|| format!("version {} not found", self.target))
    }
}

#[async_trait]
pub trait Validator: Send + Sync {
    /// `Err` carries a human-readable reason.
    async fn validate(&self, ctx: &ValidationContext) -> Result<(), String>;
}

/// The version's configuration passes its own checks.
pub struct ConfigurationValid;

#[async_trait]
impl Validator for ConfigurationValid {
    async fn validate(&self, ctx: &ValidationContext) -> Result<(), String> {
        ctx.require_version()?
            .configuration
            .validate()
            .map_err(|problems| problems.join("; "))
    }
}

/// The version exists and has never been deployed.
pub struct VersionAvailable;

#[async_trait]
impl Validator for VersionAvailable {
    async fn validate(&self, ctx: &ValidationContext) -> Result<(), String> {
        let version = ctx.require_version()?;
        if version.status != VersionStatus::Pending {
            return Err(format!(
                "{} is {:?}; only pending versions can be deployed",
                ctx.target, version.status
            ));
        }
        Ok(())
    }
}

/// One live request through the provider with the candidate's
/// configuration.
pub struct ProviderSmokeTest {
    provider: Arc<dyn InferenceProvider>,
}

impl ProviderSmokeTest {
    pub fn new(provider: Arc<dyn InferenceProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Validator for ProviderSmokeTest {
    async fn validate(&self, ctx: &ValidationContext) -> Result<(), String> {
        let version = ctx.require_version()?;
        let request = InferenceRequest {
            request_id: format!("smoke-{}", ctx.target.key()),
            payload: serde_json::json!({ "smoke_test": true }),
        };
        let response = self
            .provider
            .infer(&version.configuration, &request)
            .await
            .map_err(|e| e.to_string())?;
        if !response.success {
            return Err("smoke request reported failure".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub required: bool,
    pub passed: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub outcomes: Vec<RuleOutcome>,
}

impl ValidationReport {
    /// The first failed required rule, if any.
    pub fn blocking(&self) -> Option<&RuleOutcome> {
        self.outcomes.iter().find(|o| o.required && !o.passed)
    }

    pub fn passed(&self) -> bool {
        self.blocking().is_none()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| !o.required && !o.passed)
            .map(|o| format!("{}: {}", o.rule, o.message.as_deref().unwrap_or("failed")))
            .collect()
    }
}

/// Named validators plus the default per-rule timeout.
pub struct ValidationPipeline {
    validators: HashMap<String, Arc<dyn Validator>>,
    default_timeout: Duration,
}

impl ValidationPipeline {
    /// A pipeline with `configuration_valid` and `version_available`.
    pub fn new(default_timeout: Duration) -> Self {
        let mut pipeline = Self {
            validators: HashMap::new(),
            default_timeout,
        };
        pipeline.register(CONFIGURATION_VALID, Arc::new(ConfigurationValid));
        pipeline.register(VERSION_AVAILABLE, Arc::new(VersionAvailable));
        pipeline
    }

    /// Also register `provider_smoke_test`.
    pub fn with_provider(mut self, provider: Arc<dyn InferenceProvider>) -> Self {
        self.register(PROVIDER_SMOKE_TEST, Arc::new(ProviderSmokeTest::new(provider)));
        self
    }

    /// Add or replace a validator.
    pub fn register(&mut self, name: impl Into<String>, validator: Arc<dyn Validator>) {
        self.validators.insert(name.into(), validator);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    pub fn registered(&self) -> usize {
        self.validators.len()
    }

    pub async fn run(&self, rules: &[ValidationRule], ctx: &ValidationContext) -> ValidationReport {
        let mut report = ValidationReport::default();
        for rule in rules {
            let result = match self.validators.get(&rule.name) {
                None => Err(format!("no validator registered as {}", rule.name)),
                Some(validator) => {
                    let limit = rule
                        .timeout_secs
                        .map(Duration::from_secs)
                        .unwrap_or(self.default_timeout);
                    match tokio::time::timeout(limit, validator.validate(ctx)).await {
                        Ok(result) => result,
                        Err(_) => Err(format!("timed out after {}s", limit.as_secs())),
                    }
                }
            };

            let passed = result.is_ok();
            let message = result.err();
            if let Some(why) = &message {
                warn!(target_version = %ctx.target, rule = %rule.name, required = rule.required, reason = %why, "validation rule failed");
            } else {
                debug!(target_version = %ctx.target, rule = %rule.name, "validation rule passed");
            }
            report.outcomes.push(RuleOutcome {
                rule: rule.name.clone(),
                required: rule.required,
                passed,
                message,
            });
            if rule.required && !passed {
                break;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgrid_core::ModelConfiguration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn version(status: VersionStatus, configuration: ModelConfiguration) -> ModelVersion {
        ModelVersion {
            id: "v1".to_string(),
            name: "sorter".to_string(),
            version: "1.1.0".to_string(),
            configuration,
            status,
            parent: None,
            created_at: 0,
            created_by: None,
            description: None,
            tags: Default::default(),
            status_history: Vec::new(),
        }
    }

    fn ctx(version: Option<ModelVersion>) -> ValidationContext {
        ValidationContext {
            target: ModelRef::new("sorter", "1.1.0"),
            version,
            active: None,
        }
    }

    fn good() -> ModelConfiguration {
        ModelConfiguration::new("openai", "gpt-4o-mini")
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl Validator for Counting {
        async fn validate(&self, _: &ValidationContext) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Never;

    #[async_trait]
    impl Validator for Never {
        async fn validate(&self, _: &ValidationContext) -> Result<(), String> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn default_rules_pass_for_a_pending_version() {
        let pipeline = ValidationPipeline::new(Duration::from_secs(5));
        let report = pipeline
            .run(&default_rules(), &ctx(Some(version(VersionStatus::Pending, good()))))
            .await;
        assert!(report.passed());
        assert_eq!(report.outcomes.len(), 2);
    }

    #[tokio::test]
    async fn required_failure_stops_the_pipeline() {
        let mut pipeline = ValidationPipeline::new(Duration::from_secs(5));
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        pipeline.register("count", counter.clone());

        let mut bad = good();
        bad.temperature = 3.0;
        let rules = vec![
            ValidationRule::required(CONFIGURATION_VALID),
            ValidationRule::required("count"),
        ];
        let report = pipeline
            .run(&rules, &ctx(Some(version(VersionStatus::Pending, bad))))
            .await;
        assert!(!report.passed());
        let blocking = report.blocking().unwrap();
        assert_eq!(blocking.rule, CONFIGURATION_VALID);
        assert!(blocking.message.as_deref().unwrap().contains("temperature"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn optional_failure_only_warns() {
        let pipeline = ValidationPipeline::new(Duration::from_secs(5));
        let rules = vec![
            ValidationRule::optional("not_registered"),
            ValidationRule::required(VERSION_AVAILABLE),
        ];
        let report = pipeline
            .run(&rules, &ctx(Some(version(VersionStatus::Pending, good()))))
            .await;
        assert!(report.passed());
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.warnings().len(), 1);
        assert!(report.warnings()[0].starts_with("not_registered"));
    }

    #[tokio::test]
    async fn deployed_or_missing_versions_are_unavailable() {
        let pipeline = ValidationPipeline::new(Duration::from_secs(5));
        let rules = vec![ValidationRule::required(VERSION_AVAILABLE)];

        let active = pipeline
            .run(&rules, &ctx(Some(version(VersionStatus::Active, good()))))
            .await;
        assert!(!active.passed());

        let missing = pipeline.run(&rules, &ctx(None)).await;
        assert!(missing.blocking().unwrap().message.as_deref().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn slow_rule_times_out() {
        let mut pipeline = ValidationPipeline::new(Duration::from_secs(300));
        pipeline.register("never", Arc::new(Never));
        let rules = vec![ValidationRule::required("never").with_timeout(1)];
        let report = pipeline
            .run(&rules, &ctx(Some(version(VersionStatus::Pending, good()))))
            .await;
        assert_eq!(
            report.blocking().unwrap().message.as_deref(),
            Some("timed out after 1s")
        );
    }
}
