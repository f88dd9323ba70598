//! DeploymentController — drives deployments through their state machine.
//!
//! Each step takes the model's lock, gathers signals, asks [`decide`] for
//! the next action, and applies it. The lock is released around provider
//! calls (blue-green shadow traffic); the deployment is re-read afterwards
//! in case it was cancelled meanwhile.
//!
//! A deployment owns its model's thresholds: they are installed (or reset
//! to the defaults) when it starts and reset when it ends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use modelgrid_abtest::{AbTestEngine, AbTestError, NewAbTest, Observation, Variant, bucket};
use modelgrid_core::config::RolloutConfig;
use modelgrid_core::{
    InferenceProvider, InferenceRequest, ModelConfiguration, ModelRef, PerformanceSample,
    ProviderError, SharedClock, Timestamp,
};
use modelgrid_monitor::MonitorEvent;
use modelgrid_state::{ModelLocks, Restoration, StateStore, Table, VersionStatus, VersionStore};
use tokio::sync::{RwLock, broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::deployment::{Action, Deployment, DeploymentState, MetricsRead, Signals, decide};
use crate::error::{RolloutError, RolloutResult};
use crate::health::HealthSource;
use crate::strategy::{HealthCriteria, RollbackConfig, Strategy};
use crate::traffic::TrafficSplit;

/// A request to roll out one version.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployRequest {
    pub model: String,
    pub version: String,
    pub strategy: Strategy,
    pub health: HealthCriteria,
    pub rollback: RollbackConfig,
}

impl DeployRequest {
    pub fn new(model: impl Into<String>, version: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            model: model.into(),
            version: version.into(),
            strategy,
            health: HealthCriteria::default(),
            rollback: RollbackConfig::default(),
        }
    }

    pub fn with_health(mut self, health: HealthCriteria) -> Self {
        self.health = health;
        self
    }

    pub fn with_rollback(mut self, rollback: RollbackConfig) -> Self {
        self.rollback = rollback;
        self
    }
}

pub struct DeploymentController {
    config: RolloutConfig,
    state: StateStore,
    clock: SharedClock,
    versions: Arc<VersionStore>,
    health: Arc<dyn HealthSource>,
    abtests: Arc<AbTestEngine>,
    provider: Arc<dyn InferenceProvider>,
    locks: ModelLocks,
    deployments: RwLock<HashMap<String, Deployment>>,
}

impl DeploymentController {
    /// Create the controller, loading persisted deployments. In-flight ones
    /// resume from their stored timestamps on the next tick.
    pub fn new(
        config: RolloutConfig,
        state: StateStore,
        clock: SharedClock,
        versions: Arc<VersionStore>,
        health: Arc<dyn HealthSource>,
        abtests: Arc<AbTestEngine>,
        provider: Arc<dyn InferenceProvider>,
    ) -> RolloutResult<Self> {
        let problems = config.problems();
        if !problems.is_empty() {
            return Err(RolloutError::InvalidRequest(problems));
        }
        let mut deployments = HashMap::new();
        for d in state.list_records::<Deployment>(Table::Deployments)? {
            deployments.insert(d.id.clone(), d);
        }
        let in_flight = deployments.values().filter(|d| d.is_in_flight()).count();
        if in_flight > 0 {
            info!(in_flight, "resuming deployments");
        }
        Ok(Self {
            config,
            state,
            clock,
            versions,
            health,
            abtests,
            provider,
            locks: ModelLocks::new(),
            deployments: RwLock::new(deployments),
        })
    }

    fn persist(&self, d: &Deployment) -> RolloutResult<()> {
        self.state.put_record(Table::Deployments, &d.id, d)?;
        Ok(())
    }

    async fn store(&self, d: Deployment) -> RolloutResult<Deployment> {
        self.persist(&d)?;
        self.deployments
            .write()
            .await
            .insert(d.id.clone(), d.clone());
        if d.state.is_terminal() && !d.rollback.thresholds.is_empty() {
            match self.health.clear_thresholds(&d.model).await {
                Ok(()) => debug!(deployment = %d.id, model = %d.model, "deployment thresholds cleared"),
                Err(e) => warn!(deployment = %d.id, error = %e, "failed to clear deployment thresholds"),
            }
        }
        Ok(d)
    }

    /// Re-install the thresholds of in-flight deployments. Returns how
    /// many deployments carried their own.
    pub async fn resume(&self) -> usize {
        let in_flight: Vec<Deployment> = self
            .deployments
            .read()
            .await
            .values()
            .filter(|d| d.is_in_flight() && !d.rollback.thresholds.is_empty())
            .cloned()
            .collect();
        for d in &in_flight {
            if let Err(e) = self
                .health
                .install_thresholds(&d.model, d.rollback.thresholds.clone())
                .await
            {
                warn!(deployment = %d.id, error = %e, "failed to re-install thresholds");
            }
        }
        in_flight.len()
    }

    async fn snapshot(&self, id: &str) -> RolloutResult<Deployment> {
        self.deployments
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RolloutError::NotFound(id.to_string()))
    }

    /// The deployment currently in flight for `model`.
    pub async fn active_deployment(&self, model: &str) -> Option<Deployment> {
        self.deployments
            .read()
            .await
            .values()
            .find(|d| d.model == model && d.is_in_flight())
            .cloned()
    }

    pub async fn get(&self, id: &str) -> Option<Deployment> {
        self.deployments.read().await.get(id).cloned()
    }

    /// Deployments, oldest first, optionally for one model.
    pub async fn list_deployments(&self, model: Option<&str>) -> Vec<Deployment> {
        let deployments = self.deployments.read().await;
        let mut out: Vec<Deployment> = deployments
            .values()
            .filter(|d| model.is_none_or(|m| d.model == m))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Start rolling out `req.version`.
    ///
    /// Fails with `DeploymentInProgress` when the model already has a
    /// deployment in flight. Validation failures leave nothing behind.
    pub async fn deploy(&self, req: DeployRequest) -> RolloutResult<Deployment> {
        let strategy = req.strategy.normalized();
        let mut problems = strategy.problems();
        if req.model.trim().is_empty() {
            problems.push("model name is empty".to_string());
        }
        if req.rollback.evaluation_window_secs == 0 && !matches!(strategy, Strategy::AbTest(_)) {
            problems.push("evaluation_window_secs must be positive".to_string());
        }
        if !problems.is_empty() {
            return Err(RolloutError::InvalidRequest(problems));
        }

        let now = self.clock.now();
        let id = uuid::Uuid::now_v7().to_string();
        let mut d = Deployment {
            id: id.clone(),
            model: req.model,
            version: req.version,
            baseline: None,
            strategy,
            health: req.health,
            rollback: req.rollback,
            state: DeploymentState::Initializing,
            traffic: TrafficSplit::default(),
            step: 0,
            step_started_at: now,
            started_at: now,
            updated_at: now,
            finished_at: None,
            ab_test_id: None,
            reason: None,
            history: Vec::new(),
        };

        let _guard = self.locks.lock(&d.model).await;
        {
            let mut deployments = self.deployments.write().await;
            if let Some(existing) = deployments
                .values()
                .find(|x| x.model == d.model && x.is_in_flight())
            {
                return Err(RolloutError::DeploymentInProgress {
                    model: d.model.clone(),
                    deployment_id: existing.id.clone(),
                    state: existing.state,
                });
            }
            deployments.insert(id.clone(), d.clone());
        }

        if let Err(e) = self.prepare(&mut d).await {
            self.deployments.write().await.remove(&id);
            return Err(e);
        }
        info!(
            deployment = %id,
            model = %d.model,
            version = %d.version,
            strategy = d.strategy.name(),
            baseline = ?d.baseline,
            "deployment started"
        );
        let started = self.start(&mut d, now).await;
        self.conclude_step(d, started, now).await
    }

    /// Checks that mutate nothing persistent.
    async fn prepare(&self, d: &mut Deployment) -> RolloutResult<()> {
        let target = self.versions.require(&d.target())?;
        if target.status != VersionStatus::Pending {
            return Err(RolloutError::InvalidRequest(vec![format!(
                "{} is {:?}; only pending versions can be deployed",
                d.target(),
                target.status
            )]));
        }
        d.baseline = self.versions.get_active(&d.model)?.map(|v| v.version);
        if d.strategy.requires_baseline() && d.baseline.is_none() {
            return Err(RolloutError::InvalidRequest(vec![format!(
                "{} deployment needs an active version of {} to compare against",
                d.strategy.name(),
                d.model
            )]));
        }
        if let Some(baseline) = &d.baseline {
            d.traffic = TrafficSplit::single(baseline);
        }
        if d.rollback.thresholds.is_empty() {
            self.health.clear_thresholds(&d.model).await?;
        } else {
            self.health
                .install_thresholds(&d.model, d.rollback.thresholds.clone())
                .await?;
        }
        Ok(())
    }

    async fn start(&self, d: &mut Deployment, now: Timestamp) -> RolloutResult<()> {
        let target = d.target();
        self.versions
            .transition_status(&target, VersionStatus::Validating)
            .await?;
        self.versions
            .transition_status(&target, VersionStatus::Deploying)
            .await?;

        match d.strategy.clone() {
            Strategy::Replace => self.promote_candidate(d, now, false).await,
            Strategy::Canary(cfg) => {
                let first = cfg.steps.first().copied().unwrap_or(100);
                if first >= 100 {
                    return self.promote_candidate(d, now, false).await;
                }
                let baseline = d.baseline.clone().unwrap_or_default();
                d.traffic = TrafficSplit::split(&baseline, &d.version, first);
                d.enter(
                    DeploymentState::RampingUp,
                    now,
                    format!("canary at {first}%"),
                );
                Ok(())
            }
            Strategy::BlueGreen(_) => {
                let baseline = d.baseline.clone().unwrap_or_default();
                d.traffic = TrafficSplit::split(&baseline, &d.version, 0);
                d.enter(DeploymentState::Initializing, now, "shadow deployed at 0%");
                Ok(())
            }
            Strategy::AbTest(ab) => {
                let Some(control) = d.baseline_ref() else {
                    return Err(RolloutError::InvalidRequest(vec![
                        "A/B deployment needs a baseline".to_string(),
                    ]));
                };
                let config = ab.config.unwrap_or_else(|| self.abtests.default_config());
                let test = self
                    .abtests
                    .create_test(NewAbTest {
                        id: Some(d.id.clone()),
                        name: format!("{} {} vs {}", d.model, control.version, d.version),
                        control: control.clone(),
                        treatment: target,
                        config,
                    })
                    .await?;
                d.traffic = TrafficSplit::split(&control.version, &d.version, test.treatment_percent);
                d.ab_test_id = Some(test.id);
                d.enter(
                    DeploymentState::Evaluating,
                    now,
                    format!("A/B test at {}% treatment", test.treatment_percent),
                );
                Ok(())
            }
        }
    }

    /// Make the candidate `Active` at 100%, keeping the baseline listed at
    /// 0% for an immediate rollback.
    async fn promote_candidate(
        &self,
        d: &mut Deployment,
        now: Timestamp,
        finish: bool,
    ) -> RolloutResult<()> {
        self.versions.promote(&d.target()).await?;
        d.traffic = match &d.baseline {
            Some(b) => TrafficSplit::split(b, &d.version, 100),
            None => TrafficSplit::single(&d.version),
        };
        d.step_started_at = now;
        if finish {
            d.enter(DeploymentState::Promoted, now, "promoted");
            info!(deployment = %d.id, version = %d.target(), "deployment promoted");
        } else {
            d.enter(DeploymentState::Evaluating, now, "candidate active at 100%");
            info!(deployment = %d.id, version = %d.target(), "candidate serving all traffic");
        }
        Ok(())
    }

    /// Advance one deployment by a single step.
    pub async fn tick(&self, id: &str) -> RolloutResult<Deployment> {
        let model = self.snapshot(id).await?.model;
        let guard = self.locks.lock(&model).await;
        let mut d = self.snapshot(id).await?;
        if !d.is_in_flight() {
            return Ok(d);
        }

        let signals = self.signals(&d).await;
        let now = self.clock.now();
        match decide(&d, &signals, now) {
            Action::Hold { reason } => {
                debug!(deployment = %id, state = ?d.state, %reason, "holding");
                Ok(d)
            }
            Action::ShadowValidate => {
                drop(guard);
                self.blue_green_cutover(id).await
            }
            action => {
                let applied = self.apply(&mut d, action, now).await;
                self.conclude_step(d, applied, now).await
            }
        }
    }

    /// Tick every in-flight deployment. Returns how many were ticked.
    pub async fn tick_all(&self) -> usize {
        let ids: Vec<String> = self
            .deployments
            .read()
            .await
            .values()
            .filter(|d| d.is_in_flight())
            .map(|d| d.id.clone())
            .collect();
        for id in &ids {
            if let Err(e) = self.tick(id).await {
                warn!(deployment = %id, error = %e, "deployment step failed");
            }
        }
        ids.len()
    }

    async fn signals(&self, d: &Deployment) -> Signals {
        let target = d.target();
        let rollback = self.health.fired_rollback(&target).await;
        let breach_pending = self.health.breach_pending(&target).await;

        let timeout_ms = self.config.metrics_timeout_ms;
        let metrics = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.health.metrics(&target),
        )
        .await
        {
            Ok(Ok(m)) => MetricsRead::Ready(m),
            Ok(Err(e)) => MetricsRead::Unavailable(e.to_string()),
            Err(_) => MetricsRead::Unavailable(format!("metrics timed out after {timeout_ms}ms")),
        };

        let analysis = match &d.ab_test_id {
            Some(test_id) if d.state == DeploymentState::Evaluating => {
                match self.abtests.analyze(test_id).await {
                    Ok(a) => Some(a),
                    Err(e) => {
                        debug!(deployment = %d.id, error = %e, "no A/B verdict");
                        None
                    }
                }
            }
            _ => None,
        };

        Signals {
            rollback,
            breach_pending,
            metrics,
            analysis,
        }
    }

    async fn apply(&self, d: &mut Deployment, action: Action, now: Timestamp) -> RolloutResult<()> {
        match action {
            Action::Hold { .. } | Action::ShadowValidate => Ok(()),
            Action::Shift { step, percent } => {
                let baseline = d.baseline.clone().unwrap_or_default();
                d.traffic = TrafficSplit::split(&baseline, &d.version, percent);
                d.step = step;
                d.step_started_at = now;
                d.enter(
                    DeploymentState::RampingUp,
                    now,
                    format!("canary at {percent}%"),
                );
                info!(deployment = %d.id, version = %d.target(), percent, "traffic shifted");
                Ok(())
            }
            Action::Promote { finish } => self.promote_candidate(d, now, finish).await,
            Action::Complete => {
                d.enter(DeploymentState::Promoted, now, "evaluation passed");
                info!(deployment = %d.id, version = %d.target(), "deployment promoted");
                Ok(())
            }
            Action::Rollback { reason } => {
                self.roll_back(d, &reason, DeploymentState::RolledBack, now)
                    .await
            }
        }
    }

    /// Persist the outcome of a step. A failed step fails the deployment,
    /// rolling back first when auto-rollback is on.
    async fn conclude_step(
        &self,
        mut d: Deployment,
        outcome: RolloutResult<()>,
        now: Timestamp,
    ) -> RolloutResult<Deployment> {
        match outcome {
            Ok(()) => self.store(d).await,
            Err(e @ RolloutError::RollbackFailed { .. }) => {
                self.store(d).await?;
                Err(e)
            }
            Err(cause) => {
                let reason = format!("step failed: {cause}");
                error!(deployment = %d.id, model = %d.model, %reason, "deployment failed");
                let surfaced = if d.rollback.enabled {
                    match self
                        .roll_back(&mut d, &reason, DeploymentState::Failed, now)
                        .await
                    {
                        Ok(()) => cause,
                        Err(rollback_error) => rollback_error,
                    }
                } else {
                    d.reason = Some(reason.clone());
                    d.enter(DeploymentState::Failed, now, reason);
                    cause
                };
                if let Err(e) = self.store(d).await {
                    error!(error = %e, "failed to persist failed deployment");
                }
                Err(surfaced)
            }
        }
    }

    /// Send traffic back to the baseline and end the deployment in
    /// `terminal`.
    ///
    /// A candidate already promoted is replaced by restoring the baseline;
    /// one still deploying just moves to `RolledBack`. When the versions
    /// cannot be restored the deployment ends `Failed` and the error is
    /// `RollbackFailed`.
    async fn roll_back(
        &self,
        d: &mut Deployment,
        reason: &str,
        terminal: DeploymentState,
        now: Timestamp,
    ) -> RolloutResult<()> {
        let target = d.target();
        let restored = match self.versions.require(&target) {
            Err(e) => Err(e.to_string()),
            Ok(candidate) => match (candidate.status, d.baseline_ref()) {
                (VersionStatus::Active, Some(baseline)) => self
                    .versions
                    .restore(&baseline)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string()),
                (VersionStatus::Active, None) => {
                    Err("no earlier version to restore".to_string())
                }
                (VersionStatus::Validating | VersionStatus::Deploying, _) => self
                    .versions
                    .transition_status(&target, VersionStatus::RolledBack)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string()),
                (VersionStatus::Pending, _) => self
                    .versions
                    .transition_status(&target, VersionStatus::Failed)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string()),
                _ => Ok(()),
            },
        };

        if let Err(why) = restored {
            let reason = format!("{reason}; rollback failed: {why}");
            error!(deployment = %d.id, version = %target, %reason, "rollback failed");
            d.reason = Some(reason.clone());
            d.enter(DeploymentState::Failed, now, reason.clone());
            return Err(RolloutError::RollbackFailed {
                deployment_id: d.id.clone(),
                state: d.state,
                reason,
            });
        }

        if let Some(test_id) = &d.ab_test_id {
            match self.abtests.stop_test(test_id, reason).await {
                Ok(_) | Err(AbTestError::NotRunning { .. }) => {}
                Err(e) => warn!(deployment = %d.id, error = %e, "failed to stop A/B test"),
            }
        }
        if let Err(e) = self.health.release(&target).await {
            warn!(version = %target, error = %e, "failed to clear monitor state");
        }

        d.traffic = d
            .baseline
            .as_deref()
            .map(TrafficSplit::single)
            .unwrap_or_default();
        d.reason = Some(reason.to_string());
        d.enter(terminal, now, reason);
        warn!(
            deployment = %d.id,
            version = %target,
            baseline = ?d.baseline,
            %reason,
            "deployment rolled back"
        );
        Ok(())
    }

    /// Exercise the blue-green shadow, then cut over or abort.
    async fn blue_green_cutover(&self, id: &str) -> RolloutResult<Deployment> {
        let d = self.snapshot(id).await?;
        let candidate = self.versions.require(&d.target())?;
        let outcome = self.shadow_validate(&d, &candidate.configuration).await;

        let _guard = self.locks.lock(&d.model).await;
        let mut d = self.snapshot(id).await?;
        if d.state != DeploymentState::Initializing {
            return Ok(d);
        }
        let now = self.clock.now();
        let applied = match outcome {
            Ok(passed) => {
                info!(deployment = %id, passed, "shadow validation passed");
                self.promote_candidate(&mut d, now, false).await
            }
            Err(why) => {
                let reason = format!("shadow validation failed: {why}");
                self.roll_back(&mut d, &reason, DeploymentState::RolledBack, now)
                    .await
            }
        };
        self.conclude_step(d, applied, now).await
    }

    /// Every shadow request must succeed within the provider timeout.
    async fn shadow_validate(
        &self,
        d: &Deployment,
        configuration: &ModelConfiguration,
    ) -> Result<u32, String> {
        let Strategy::BlueGreen(cfg) = &d.strategy else {
            return Ok(0);
        };
        let total = cfg.shadow_requests.unwrap_or(self.config.shadow_requests);
        if total == 0 {
            return Err("no shadow requests configured".to_string());
        }
        let timeout_ms = self.config.provider_timeout_ms;
        let mut failures = Vec::new();
        for i in 0..total {
            let payload = if cfg.shadow_payloads.is_empty() {
                serde_json::json!({ "shadow": i })
            } else {
                cfg.shadow_payloads[i as usize % cfg.shadow_payloads.len()].clone()
            };
            let request = InferenceRequest {
                request_id: format!("{}-shadow-{i}", d.id),
                payload,
            };
            match tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                self.provider.infer(configuration, &request),
            )
            .await
            {
                Ok(Ok(response)) if response.success => {}
                Ok(Ok(_)) => failures.push(format!("request {i} unsuccessful")),
                Ok(Err(e)) => failures.push(format!("request {i}: {e}")),
                Err(_) => failures.push(format!("request {i}: {}", ProviderError::Timeout(timeout_ms))),
            }
        }
        match failures.first() {
            None => Ok(total),
            Some(first) => Err(format!(
                "{}/{total} shadow requests failed, first: {first}",
                failures.len()
            )),
        }
    }

    /// Abort an in-flight deployment the same way an automatic rollback
    /// would.
    pub async fn cancel(&self, id: &str) -> RolloutResult<Deployment> {
        let model = self.snapshot(id).await?.model;
        let _guard = self.locks.lock(&model).await;
        let mut d = self.snapshot(id).await?;
        if !d.is_in_flight() {
            return Err(RolloutError::Finished {
                deployment_id: d.id,
                state: d.state,
            });
        }
        let now = self.clock.now();
        let result = self
            .roll_back(&mut d, "cancelled", DeploymentState::RolledBack, now)
            .await;
        let d = self.store(d).await?;
        result.map(|()| d)
    }

    /// Manually make an earlier version the active one.
    ///
    /// The target must last have been `Active` or `Deprecated`. Refused
    /// while a deployment is in flight for the model; cancel it first.
    pub async fn rollback(&self, model: &str, version: &str) -> RolloutResult<Restoration> {
        let _guard = self.locks.lock(model).await;
        if let Some(d) = self.active_deployment(model).await {
            return Err(RolloutError::DeploymentInProgress {
                model: model.to_string(),
                deployment_id: d.id,
                state: d.state,
            });
        }
        let restoration = self.versions.restore(&ModelRef::new(model, version)).await?;
        if let Some(replaced) = &restoration.rolled_back
            && let Err(e) = self.health.release(&replaced.model_ref()).await
        {
            warn!(version = %replaced.model_ref(), error = %e, "failed to clear monitor state");
        }
        Ok(restoration)
    }

    /// The version that serves `identity` for `model` right now.
    ///
    /// Sticky: the same identity keeps its version while the split is
    /// unchanged.
    pub async fn route(&self, model: &str, identity: &str) -> RolloutResult<ModelRef> {
        if let Some(d) = self.active_deployment(model).await
            && !d.traffic.is_empty()
        {
            if let Some(test_id) = &d.ab_test_id
                && d.state == DeploymentState::Evaluating
            {
                let (_, served) = self.abtests.assign(test_id, identity).await?;
                return Ok(served);
            }
            let version = match &d.baseline {
                Some(b) if bucket(&d.id, identity) >= d.candidate_percent() => b.clone(),
                _ => d.version.clone(),
            };
            return Ok(ModelRef::new(model, version));
        }
        self.versions
            .get_active(model)?
            .map(|v| v.model_ref())
            .ok_or_else(|| RolloutError::NoActiveVersion(model.to_string()))
    }

    /// Change the treatment share of a running A/B deployment.
    pub async fn set_ab_split(&self, id: &str, treatment_percent: u8) -> RolloutResult<Deployment> {
        let model = self.snapshot(id).await?.model;
        let _guard = self.locks.lock(&model).await;
        let mut d = self.snapshot(id).await?;
        if !d.is_in_flight() {
            return Err(RolloutError::Finished {
                deployment_id: d.id,
                state: d.state,
            });
        }
        let Some(test_id) = d
            .ab_test_id
            .clone()
            .filter(|_| d.state == DeploymentState::Evaluating)
        else {
            return Err(RolloutError::InvalidRequest(vec![format!(
                "deployment {id} is not running an A/B test"
            )]));
        };
        self.abtests.set_split(&test_id, treatment_percent).await?;
        let baseline = d.baseline.clone().unwrap_or_default();
        d.traffic = TrafficSplit::split(&baseline, &d.version, treatment_percent);
        d.enter(
            DeploymentState::Evaluating,
            self.clock.now(),
            format!("A/B split at {treatment_percent}% treatment"),
        );
        info!(deployment = %id, treatment_percent, "A/B split changed");
        self.store(d).await
    }

    /// Current traffic shares for `model`.
    pub async fn traffic(&self, model: &str) -> RolloutResult<TrafficSplit> {
        if let Some(d) = self.active_deployment(model).await
            && !d.traffic.is_empty()
        {
            // The test owns the split while it runs.
            if let Some(test_id) = &d.ab_test_id
                && d.state == DeploymentState::Evaluating
                && let Some(test) = self.abtests.get(test_id).await
                && test.status.is_running()
            {
                return Ok(TrafficSplit::split(
                    &test.control.version,
                    &test.treatment.version,
                    test.treatment_percent,
                ));
            }
            return Ok(d.traffic);
        }
        self.versions
            .get_active(model)?
            .map(|v| TrafficSplit::single(&v.version))
            .ok_or_else(|| RolloutError::NoActiveVersion(model.to_string()))
    }

    /// Feed a served request to the model's A/B test, if one is running.
    /// Returns whether the sample was used.
    pub async fn record_outcome(&self, sample: &PerformanceSample) -> RolloutResult<bool> {
        let Some(d) = self.active_deployment(&sample.model).await else {
            return Ok(false);
        };
        let Some(test_id) = &d.ab_test_id else {
            return Ok(false);
        };
        let variant = if sample.version == d.version {
            Variant::Treatment
        } else if d.baseline.as_deref() == Some(sample.version.as_str()) {
            Variant::Control
        } else {
            return Ok(false);
        };
        let observation = Observation {
            success: sample.success,
            latency_ms: sample.latency_ms,
            confidence: sample.confidence,
            cost: sample.cost,
        };
        self.abtests.record(test_id, variant, observation).await?;
        Ok(true)
    }

    async fn on_rollback_requested(&self, version: &ModelRef) {
        let target = self
            .active_deployment(&version.name)
            .await
            .filter(|d| d.version == version.version);
        match target {
            Some(d) => {
                if let Err(e) = self.tick(&d.id).await {
                    warn!(deployment = %d.id, error = %e, "rollback step failed");
                }
            }
            None => warn!(
                version = %version,
                "rollback requested outside a deployment; manual action required"
            ),
        }
    }

    /// Run the step loop until shutdown, reacting to monitor rollback
    /// events between ticks.
    pub async fn run(
        &self,
        mut events: broadcast::Receiver<MonitorEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let interval = Duration::from_secs(self.config.tick_interval_secs.max(1));
        let mut events_open = true;
        let resumed = self.resume().await;
        info!(interval_secs = interval.as_secs(), resumed, "deployment controller started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.tick_all().await;
                }
                received = events.recv(), if events_open => match received {
                    Ok(MonitorEvent::RollbackRequested(alert)) => {
                        self.on_rollback_requested(&alert.model_ref()).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "monitor events lagged; ticking all deployments");
                        self.tick_all().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("monitor event channel closed");
                        events_open = false;
                    }
                },
                _ = shutdown.changed() => {
                    info!("deployment controller shutting down");
                    break;
                }
            }
        }
    }
}
