//! Validated updates reach the real deployment controller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use modelgrid_abtest::AbTestEngine;
use modelgrid_core::config::{AbTestDefaults, MonitorConfig, RolloutConfig, SchedulerConfig};
use modelgrid_core::{
    InferenceProvider, InferenceRequest, InferenceResponse, ManualClock, ModelConfiguration,
    ModelRef, ProviderError,
};
use modelgrid_monitor::PerformanceMonitor;
use modelgrid_rollout::{CanaryConfig, DeploymentController, DeploymentState, Strategy};
use modelgrid_scheduler::{
    NewUpdate, RolloutPlan, UpdateScheduler, UpdateStatus, ValidationPipeline, ValidationRule,
};
use modelgrid_state::{NewVersion, StateStore, VersionStatus, VersionStore};

struct Down;

#[async_trait]
impl InferenceProvider for Down {
    async fn infer(
        &self,
        _: &ModelConfiguration,
        _: &InferenceRequest,
    ) -> Result<InferenceResponse, ProviderError> {
        Err(ProviderError::Unavailable("maintenance".to_string()))
    }
}

#[tokio::test]
async fn validated_update_starts_a_canary() {
    let clock = ManualClock::new(1_000);
    let state = StateStore::open_in_memory().unwrap();
    let versions = Arc::new(VersionStore::new(Arc::new(state.clone()), clock.shared()));
    for v in ["1.0.0", "1.1.0", "1.2.0"] {
        versions
            .create_version(NewVersion::new(
                "sorter",
                v,
                ModelConfiguration::new("openai", "gpt-4o-mini"),
            ))
            .await
            .unwrap();
    }
    let baseline = ModelRef::new("sorter", "1.0.0");
    for status in [
        VersionStatus::Validating,
        VersionStatus::Deploying,
        VersionStatus::Active,
    ] {
        versions.transition_status(&baseline, status).await.unwrap();
    }

    let provider: Arc<dyn InferenceProvider> = Arc::new(Down);
    let monitor = Arc::new(
        PerformanceMonitor::new(MonitorConfig::default(), state.clone(), clock.shared()).unwrap(),
    );
    let abtests = Arc::new(
        AbTestEngine::new(AbTestDefaults::default(), state.clone(), clock.shared()).unwrap(),
    );
    let controller = Arc::new(
        DeploymentController::new(
            RolloutConfig::default(),
            state.clone(),
            clock.shared(),
            versions.clone(),
            monitor,
            abtests,
            provider.clone(),
        )
        .unwrap(),
    );
    let scheduler = Arc::new(
        UpdateScheduler::new(
            SchedulerConfig::default(),
            state.clone(),
            clock.shared(),
            versions.clone(),
            controller.clone(),
            ValidationPipeline::new(Duration::from_secs(5)).with_provider(provider),
        )
        .unwrap(),
    );

    let canary = RolloutPlan {
        strategy: Strategy::Canary(CanaryConfig {
            steps: vec![25, 100],
        }),
        ..RolloutPlan::default()
    };
    let rules = vec![
        ValidationRule::required("configuration_valid"),
        ValidationRule::required("version_available"),
        ValidationRule::optional("provider_smoke_test"),
    ];
    let first = scheduler
        .submit(
            NewUpdate::new("sorter", "1.1.0")
                .with_rules(rules.clone())
                .with_plan(canary.clone()),
        )
        .unwrap();
    let done = scheduler.wait(&first.id).await.unwrap();
    assert_eq!(done.status, UpdateStatus::Deployed);
    assert_eq!(done.warnings.len(), 1);
    assert!(done.warnings[0].contains("maintenance"));

    let deployment = controller.active_deployment("sorter").await.unwrap();
    assert_eq!(Some(&deployment.id), done.deployment_id.as_ref());
    assert_eq!(deployment.state, DeploymentState::RampingUp);
    assert_eq!(deployment.candidate_percent(), 25);
    assert_eq!(
        versions.get("sorter", "1.1.0").unwrap().unwrap().status,
        VersionStatus::Deploying
    );

    // Validation passes, but the controller already has a deployment in
    // flight for the model.
    let second = scheduler
        .submit(NewUpdate::new("sorter", "1.2.0").with_plan(canary))
        .unwrap();
    let refused = scheduler.wait(&second.id).await.unwrap();
    assert_eq!(refused.status, UpdateStatus::Failed);
    assert!(refused.reason.as_deref().unwrap().contains("in flight"));
    assert_eq!(
        versions.get("sorter", "1.2.0").unwrap().unwrap().status,
        VersionStatus::Pending
    );
}
