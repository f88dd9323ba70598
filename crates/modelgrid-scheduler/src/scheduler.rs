//! UpdateScheduler — queues updates, validates them, and hands them to the
//! deployment controller.
//!
//! Updates run FIFO with at most `max_concurrent_updates` in validation or
//! hand-off at once; the rest wait in the queue. Cron schedules are
//! evaluated on a periodic loop against persisted `next_run` times, and
//! event schedules fire when [`UpdateScheduler::fire_event`] is called.
//! Performance schedules fire when the monitor reports an alert against
//! the model's active version.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use modelgrid_core::config::SchedulerConfig;
use modelgrid_core::{ModelRef, SharedClock, Timestamp};
use modelgrid_monitor::{AlertRecord, MonitorEvent};
use modelgrid_rollout::{DeployRequest, Deployment, DeploymentController, RolloutResult};
use modelgrid_state::{StateStore, Table, VersionStatus, VersionStore};
use serde::Serialize;
use tokio::sync::{Notify, RwLock, broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::cron::CronSchedule;
use crate::error::{SchedulerError, SchedulerResult};
use crate::task::{
    NewSchedule, NewScheduleTrigger, NewUpdate, RolloutPlan, Schedule, ScheduleTrigger,
    UpdateStatus, UpdateTarget, UpdateTask, UpdateTrigger,
};
use crate::validation::{ValidationContext, ValidationPipeline, ValidationRule, default_rules};

/// Where validated updates go.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, request: DeployRequest) -> RolloutResult<Deployment>;
}

#[async_trait]
impl Deployer for DeploymentController {
    async fn deploy(&self, request: DeployRequest) -> RolloutResult<Deployment> {
        DeploymentController::deploy(self, request).await
    }
}

/// Counts over the update book and the schedules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutomationStatistics {
    pub total_updates: usize,
    pub queued: usize,
    /// Updates in validation or hand-off.
    pub running: usize,
    pub max_concurrent_updates: usize,
    pub by_status: BTreeMap<UpdateStatus, usize>,
    /// Keyed by trigger kind: manual, scheduled, event, performance.
    pub by_trigger: BTreeMap<String, usize>,
    pub schedules: usize,
    pub enabled_schedules: usize,
    pub performance_schedules: usize,
    pub registered_validators: usize,
}

#[derive(Default)]
struct Book {
    updates: HashMap<String, UpdateTask>,
    queue: VecDeque<String>,
    running: usize,
}

pub struct UpdateScheduler {
    config: SchedulerConfig,
    state: StateStore,
    clock: SharedClock,
    versions: Arc<VersionStore>,
    deployer: Arc<dyn Deployer>,
    pipeline: ValidationPipeline,
    book: Mutex<Book>,
    schedules: RwLock<HashMap<String, Schedule>>,
    changed: Notify,
}

impl UpdateScheduler {
    /// Create the scheduler from persisted updates and schedules.
    ///
    /// Queued updates keep their order. Updates caught mid-validation or
    /// mid-hand-off by a restart are marked failed; nothing is replayed.
    /// Call [`dispatch`](Self::dispatch) or [`run`](Self::run) to start
    /// the queue.
    pub fn new(
        config: SchedulerConfig,
        state: StateStore,
        clock: SharedClock,
        versions: Arc<VersionStore>,
        deployer: Arc<dyn Deployer>,
        pipeline: ValidationPipeline,
    ) -> SchedulerResult<Self> {
        let now = clock.now();
        let mut book = Book::default();
        let mut queued = Vec::new();
        for mut task in state.list_records::<UpdateTask>(Table::Updates)? {
            match task.status {
                UpdateStatus::Queued => queued.push((task.created_at, task.id.clone())),
                UpdateStatus::Validating | UpdateStatus::Deploying => {
                    warn!(update = %task.id, status = ?task.status, "update interrupted by restart");
                    task.finish(
                        UpdateStatus::Failed,
                        now,
                        Some(format!("interrupted by restart while {:?}", task.status)),
                    );
                    state.put_record(Table::Updates, &task.id, &task)?;
                }
                _ => {}
            }
            book.updates.insert(task.id.clone(), task);
        }
        queued.sort();
        book.queue = queued.into_iter().map(|(_, id)| id).collect();

        let mut schedules = HashMap::new();
        for schedule in state.list_records::<Schedule>(Table::Schedules)? {
            schedules.insert(schedule.id.clone(), schedule);
        }
        if !book.queue.is_empty() || !schedules.is_empty() {
            info!(
                queued = book.queue.len(),
                schedules = schedules.len(),
                "restored update scheduler state"
            );
        }

        Ok(Self {
            config,
            state,
            clock,
            versions,
            deployer,
            pipeline,
            book: Mutex::new(book),
            schedules: RwLock::new(schedules),
            changed: Notify::new(),
        })
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn persist(&self, task: &UpdateTask) -> SchedulerResult<()> {
        self.state.put_record(Table::Updates, &task.id, task)?;
        Ok(())
    }

    fn check_rules(&self, rules: &[ValidationRule], plan: &RolloutPlan) -> Vec<String> {
        let mut problems: Vec<String> = rules
            .iter()
            .filter(|r| !self.pipeline.is_registered(&r.name))
            .map(|r| format!("unknown validation rule {}", r.name))
            .collect();
        if rules.iter().any(|r| r.timeout_secs == Some(0)) {
            problems.push("rule timeout must be positive".to_string());
        }
        problems.extend(plan.strategy.problems());
        problems
    }

    fn enqueue(
        &self,
        model: String,
        version: String,
        rules: Vec<ValidationRule>,
        plan: RolloutPlan,
        trigger: UpdateTrigger,
    ) -> SchedulerResult<UpdateTask> {
        let mut problems = self.check_rules(&rules, &plan);
        if model.trim().is_empty() {
            problems.push("model name is empty".to_string());
        }
        if version.trim().is_empty() {
            problems.push("version is empty".to_string());
        }
        if !problems.is_empty() {
            return Err(SchedulerError::InvalidRequest(problems));
        }

        let task = UpdateTask {
            id: uuid::Uuid::now_v7().to_string(),
            model,
            version,
            trigger,
            rules: if rules.is_empty() { default_rules() } else { rules },
            plan,
            status: UpdateStatus::Queued,
            created_at: self.clock.now(),
            started_at: None,
            finished_at: None,
            validation: Vec::new(),
            warnings: Vec::new(),
            deployment_id: None,
            reason: None,
        };
        self.persist(&task)?;
        let mut book = self.book();
        book.queue.push_back(task.id.clone());
        book.updates.insert(task.id.clone(), task.clone());
        info!(
            update = %task.id,
            model = %task.model,
            version = %task.version,
            trigger = ?task.trigger,
            queue_len = book.queue.len(),
            "update queued"
        );
        Ok(task)
    }

    /// Queue a manual update and start it if a slot is free.
    pub fn submit(self: &Arc<Self>, update: NewUpdate) -> SchedulerResult<UpdateTask> {
        let task = self.enqueue(
            update.model,
            update.version,
            update.rules,
            update.plan,
            UpdateTrigger::Manual,
        )?;
        self.dispatch();
        Ok(self.get(&task.id).unwrap_or(task))
    }

    /// Start queued updates while slots are free.
    pub fn dispatch(self: &Arc<Self>) {
        let now = self.clock.now();
        let limit = self.config.max_concurrent_updates.max(1);
        let mut started = Vec::new();
        {
            let mut book = self.book();
            while book.running < limit {
                let Some(id) = book.queue.pop_front() else {
                    break;
                };
                let Some(task) = book.updates.get_mut(&id) else {
                    continue;
                };
                if task.status != UpdateStatus::Queued {
                    continue;
                }
                task.status = UpdateStatus::Validating;
                task.started_at = Some(now);
                let task = task.clone();
                book.running += 1;
                started.push(task);
            }
        }

        for task in started {
            if let Err(e) = self.persist(&task) {
                error!(update = %task.id, error = %e, "failed to persist update start");
            }
            info!(update = %task.id, model = %task.model, version = %task.version, "update started");
            let this = Arc::clone(self);
            tokio::spawn(async move { this.execute(task).await });
        }
    }

    async fn execute(self: Arc<Self>, mut task: UpdateTask) {
        let target = ModelRef::new(&task.model, &task.version);
        let ctx = match self.context(&target) {
            Ok(ctx) => ctx,
            Err(e) => {
                self.complete(task, UpdateStatus::Failed, Some(e.to_string()));
                return;
            }
        };

        let report = self.pipeline.run(&task.rules, &ctx).await;
        task.warnings = report.warnings();
        task.validation = report.outcomes.clone();
        if let Some(blocking) = report.blocking() {
            let reason = format!(
                "required rule {} failed: {}",
                blocking.rule,
                blocking.message.as_deref().unwrap_or("failed")
            );
            self.complete(task, UpdateStatus::Rejected, Some(reason));
            return;
        }

        task.status = UpdateStatus::Deploying;
        self.save(&task);
        let request = DeployRequest::new(&task.model, &task.version, task.plan.strategy.clone())
            .with_health(task.plan.health.clone())
            .with_rollback(task.plan.rollback.clone());
        match self.deployer.deploy(request).await {
            Ok(deployment) => {
                task.deployment_id = Some(deployment.id);
                self.complete(task, UpdateStatus::Deployed, None);
            }
            Err(e) => {
                let reason = format!("deployment not started: {e}");
                self.complete(task, UpdateStatus::Failed, Some(reason));
            }
        }
    }

    fn context(&self, target: &ModelRef) -> SchedulerResult<ValidationContext> {
        Ok(ValidationContext {
            target: target.clone(),
            version: self.versions.get(&target.name, &target.version)?,
            active: self.versions.get_active(&target.name)?,
        })
    }

    fn save(&self, task: &UpdateTask) {
        if let Err(e) = self.persist(task) {
            error!(update = %task.id, error = %e, "failed to persist update");
        }
        self.book().updates.insert(task.id.clone(), task.clone());
        self.changed.notify_waiters();
    }

    /// Record a terminal outcome, free the slot, and start the next update.
    fn complete(self: &Arc<Self>, mut task: UpdateTask, status: UpdateStatus, reason: Option<String>) {
        task.finish(status, self.clock.now(), reason);
        match status {
            UpdateStatus::Deployed => info!(
                update = %task.id,
                deployment = ?task.deployment_id,
                warnings = task.warnings.len(),
                "update handed to deployment controller"
            ),
            _ => warn!(
                update = %task.id,
                status = ?status,
                reason = ?task.reason,
                "update did not deploy"
            ),
        }
        {
            let mut book = self.book();
            book.running = book.running.saturating_sub(1);
        }
        self.save(&task);
        self.dispatch();
    }

    /// Cancel an update that has not started validating.
    pub fn cancel(&self, id: &str) -> SchedulerResult<UpdateTask> {
        let task = {
            let mut book = self.book();
            let task = book
                .updates
                .get_mut(id)
                .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
            if task.status != UpdateStatus::Queued {
                return Err(SchedulerError::NotCancellable {
                    update_id: id.to_string(),
                    status: task.status,
                });
            }
            task.finish(UpdateStatus::Cancelled, self.clock.now(), Some("cancelled".to_string()));
            let task = task.clone();
            book.queue.retain(|queued| queued != id);
            task
        };
        self.persist(&task)?;
        self.changed.notify_waiters();
        info!(update = %id, "update cancelled");
        Ok(task)
    }

    pub fn get(&self, id: &str) -> Option<UpdateTask> {
        self.book().updates.get(id).cloned()
    }

    /// Updates, oldest first, optionally filtered by model and status.
    pub fn list(&self, model: Option<&str>, status: Option<UpdateStatus>) -> Vec<UpdateTask> {
        let mut out: Vec<UpdateTask> = self
            .book()
            .updates
            .values()
            .filter(|t| model.is_none_or(|m| t.model == m))
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Updates waiting for a slot, in the order they will start.
    pub fn queued(&self) -> Vec<String> {
        self.book().queue.iter().cloned().collect()
    }

    /// Wait until update `id` reaches a terminal status.
    pub async fn wait(&self, id: &str) -> SchedulerResult<UpdateTask> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let task = self
                .get(id)
                .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            notified.await;
        }
    }

    // --- Schedules ---

    pub async fn add_schedule(&self, new: NewSchedule) -> SchedulerResult<Schedule> {
        let mut problems = self.check_rules(&new.rules, &new.plan);
        if new.model.trim().is_empty() {
            problems.push("model name is empty".to_string());
        }
        if matches!(&new.target, UpdateTarget::Version(v) if v.trim().is_empty()) {
            problems.push("target version is empty".to_string());
        }
        let now = self.clock.now();
        let trigger = match new.trigger {
            NewScheduleTrigger::Cron(expr) => {
                let expression = CronSchedule::parse(&expr)?;
                let next_run = expression.next_run(now);
                if next_run.is_none() {
                    problems.push(format!("cron expression {expression} never fires"));
                }
                ScheduleTrigger::Cron {
                    expression,
                    next_run,
                }
            }
            NewScheduleTrigger::Event(event) => {
                if event.trim().is_empty() {
                    problems.push("event name is empty".to_string());
                }
                ScheduleTrigger::Event { event }
            }
            NewScheduleTrigger::Performance(threshold) => {
                if threshold.as_deref().is_some_and(|t| t.trim().is_empty()) {
                    problems.push("threshold name is empty".to_string());
                }
                ScheduleTrigger::Performance { threshold }
            }
        };
        if !problems.is_empty() {
            return Err(SchedulerError::InvalidRequest(problems));
        }

        let schedule = Schedule {
            id: uuid::Uuid::now_v7().to_string(),
            model: new.model,
            target: new.target,
            trigger,
            rules: new.rules,
            plan: new.plan,
            enabled: true,
            created_at: now,
            last_run: None,
        };
        self.state
            .put_record(Table::Schedules, &schedule.id, &schedule)?;
        self.schedules
            .write()
            .await
            .insert(schedule.id.clone(), schedule.clone());
        info!(schedule = %schedule.id, model = %schedule.model, trigger = ?schedule.trigger, "schedule added");
        Ok(schedule)
    }

    pub async fn remove_schedule(&self, id: &str) -> SchedulerResult<()> {
        let mut schedules = self.schedules.write().await;
        if schedules.remove(id).is_none() {
            return Err(SchedulerError::ScheduleNotFound(id.to_string()));
        }
        self.state.delete_record(Table::Schedules, id)?;
        info!(schedule = %id, "schedule removed");
        Ok(())
    }

    pub async fn set_schedule_enabled(&self, id: &str, enabled: bool) -> SchedulerResult<Schedule> {
        let mut schedules = self.schedules.write().await;
        let schedule = schedules
            .get_mut(id)
            .ok_or_else(|| SchedulerError::ScheduleNotFound(id.to_string()))?;
        let mut updated = schedule.clone();
        updated.enabled = enabled;
        self.state.put_record(Table::Schedules, id, &updated)?;
        *schedule = updated.clone();
        Ok(updated)
    }

    pub async fn list_schedules(&self) -> Vec<Schedule> {
        let mut out: Vec<Schedule> = self.schedules.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Queue an update for `schedule`, resolving its target now.
    ///
    /// Returns `None` when there is nothing to deploy or the same version
    /// already has an update in progress.
    fn fire(&self, schedule: &Schedule, trigger: UpdateTrigger) -> SchedulerResult<Option<UpdateTask>> {
        let version = match &schedule.target {
            UpdateTarget::Version(v) => v.clone(),
            UpdateTarget::LatestPending => {
                let latest = self
                    .versions
                    .list_versions(&schedule.model)?
                    .into_iter()
                    .filter(|v| v.status == VersionStatus::Pending)
                    .next_back();
                match latest {
                    Some(v) => v.version,
                    None => {
                        debug!(schedule = %schedule.id, model = %schedule.model, "no pending version to deploy");
                        return Ok(None);
                    }
                }
            }
        };
        let duplicate = self.book().updates.values().any(|t| {
            t.model == schedule.model && t.version == version && !t.status.is_terminal()
        });
        if duplicate {
            debug!(schedule = %schedule.id, model = %schedule.model, %version, "update already in progress");
            return Ok(None);
        }
        self.enqueue(
            schedule.model.clone(),
            version,
            schedule.rules.clone(),
            schedule.plan.clone(),
            trigger,
        )
        .map(Some)
    }

    /// Fire every due cron schedule, then start what fits. Missed runs
    /// collapse into one; the next run is computed from now.
    pub async fn tick(self: &Arc<Self>) -> Vec<UpdateTask> {
        let now = self.clock.now();
        let mut fired = Vec::new();
        {
            let mut schedules = self.schedules.write().await;
            for schedule in schedules.values_mut().filter(|s| s.is_due(now)) {
                let ScheduleTrigger::Cron { expression, .. } = &schedule.trigger else {
                    continue;
                };
                let expression = expression.clone();
                let trigger = UpdateTrigger::Scheduled {
                    schedule_id: schedule.id.clone(),
                    expression: expression.to_string(),
                };
                match self.fire(schedule, trigger) {
                    Ok(Some(task)) => fired.push(task),
                    Ok(None) => {}
                    Err(e) => warn!(schedule = %schedule.id, error = %e, "scheduled update not queued"),
                }

                let next_run = expression.next_run(now);
                if next_run.is_none() {
                    warn!(schedule = %schedule.id, "schedule has no further runs");
                }
                schedule.trigger = ScheduleTrigger::Cron {
                    expression,
                    next_run,
                };
                schedule.last_run = Some(now);
                if let Err(e) = self
                    .state
                    .put_record(Table::Schedules, &schedule.id, &*schedule)
                {
                    error!(schedule = %schedule.id, error = %e, "failed to persist schedule");
                }
            }
        }
        self.dispatch();
        fired
    }

    /// Fire every enabled schedule listening for `event`.
    pub async fn fire_event(self: &Arc<Self>, event: &str) -> Vec<UpdateTask> {
        let now = self.clock.now();
        let mut fired = Vec::new();
        {
            let mut schedules = self.schedules.write().await;
            for schedule in schedules.values_mut().filter(|s| {
                s.enabled && matches!(&s.trigger, ScheduleTrigger::Event { event: e } if e == event)
            }) {
                let trigger = UpdateTrigger::Event {
                    event: event.to_string(),
                };
                match self.fire(schedule, trigger) {
                    Ok(Some(task)) => fired.push(task),
                    Ok(None) => {}
                    Err(e) => warn!(schedule = %schedule.id, error = %e, "event update not queued"),
                }
                schedule.last_run = Some(now);
                if let Err(e) = self
                    .state
                    .put_record(Table::Schedules, &schedule.id, &*schedule)
                {
                    error!(schedule = %schedule.id, error = %e, "failed to persist schedule");
                }
            }
        }
        info!(%event, fired = fired.len(), "event processed");
        self.dispatch();
        fired
    }

    /// Fire the performance schedules an alert on `alert.model` matches.
    ///
    /// Only alerts against the active version count; a canary's alerts
    /// belong to its deployment.
    pub async fn on_alert(self: &Arc<Self>, alert: &AlertRecord) -> Vec<UpdateTask> {
        let active = match self.versions.get_active(&alert.model) {
            Ok(Some(active)) => active.version,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(model = %alert.model, error = %e, "active version lookup failed");
                return Vec::new();
            }
        };
        if active != alert.version {
            debug!(model = %alert.model, version = %alert.version, "alert is not on the active version");
            return Vec::new();
        }

        let now = self.clock.now();
        let mut fired = Vec::new();
        {
            let mut schedules = self.schedules.write().await;
            for schedule in schedules.values_mut().filter(|s| {
                s.enabled
                    && s.model == alert.model
                    && matches!(
                        &s.trigger,
                        ScheduleTrigger::Performance { threshold }
                            if threshold.as_ref().is_none_or(|t| *t == alert.threshold)
                    )
            }) {
                let trigger = UpdateTrigger::Performance {
                    schedule_id: schedule.id.clone(),
                    alert_id: alert.id.clone(),
                    threshold: alert.threshold.clone(),
                    degraded: alert.version.clone(),
                };
                match self.fire(schedule, trigger) {
                    Ok(Some(task)) => fired.push(task),
                    Ok(None) => {}
                    Err(e) => warn!(schedule = %schedule.id, error = %e, "performance update not queued"),
                }
                schedule.last_run = Some(now);
                if let Err(e) = self
                    .state
                    .put_record(Table::Schedules, &schedule.id, &*schedule)
                {
                    error!(schedule = %schedule.id, error = %e, "failed to persist schedule");
                }
            }
        }
        if !fired.is_empty() {
            info!(
                model = %alert.model,
                threshold = %alert.threshold,
                fired = fired.len(),
                "performance-triggered updates queued"
            );
        }
        self.dispatch();
        fired
    }

    /// Route one monitor event. Resolutions and anomalies are ignored.
    pub async fn on_monitor_event(self: &Arc<Self>, event: &MonitorEvent) -> Vec<UpdateTask> {
        match event {
            MonitorEvent::Alert(alert) | MonitorEvent::RollbackRequested(alert) => {
                self.on_alert(alert).await
            }
            MonitorEvent::Resolved(_) | MonitorEvent::Anomaly(_) => Vec::new(),
        }
    }

    /// Feed monitor events to performance schedules until shutdown.
    pub async fn watch_alerts(
        self: Arc<Self>,
        mut events: broadcast::Receiver<MonitorEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => {
                        self.on_monitor_event(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "monitor events lagged; performance triggers missed");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("monitor event channel closed");
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Evaluate schedules until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.tick_interval_secs.max(1));
        info!(interval_secs = interval.as_secs(), "update scheduler started");
        self.dispatch();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let fired = self.tick().await;
                    if !fired.is_empty() {
                        debug!(fired = fired.len(), "scheduled updates queued");
                    }
                }
                _ = shutdown.changed() => {
                    info!("update scheduler shutting down");
                    break;
                }
            }
        }
    }

    pub async fn statistics(&self) -> AutomationStatistics {
        let (total_updates, queued, running, by_status, by_trigger) = {
            let book = self.book();
            let mut by_status = BTreeMap::new();
            let mut by_trigger = BTreeMap::new();
            for task in book.updates.values() {
                *by_status.entry(task.status).or_insert(0) += 1;
                *by_trigger.entry(task.trigger.kind().to_string()).or_insert(0) += 1;
            }
            (book.updates.len(), book.queue.len(), book.running, by_status, by_trigger)
        };
        let schedules = self.schedules.read().await;
        AutomationStatistics {
            total_updates,
            queued,
            running,
            max_concurrent_updates: self.config.max_concurrent_updates.max(1),
            by_status,
            by_trigger,
            schedules: schedules.len(),
            enabled_schedules: schedules.values().filter(|s| s.enabled).count(),
            performance_schedules: schedules
                .values()
                .filter(|s| matches!(s.trigger, ScheduleTrigger::Performance { .. }))
                .count(),
            registered_validators: self.pipeline.registered(),
        }
    }

    /// Next run of every enabled cron schedule.
    pub async fn upcoming(&self) -> Vec<(String, Timestamp)> {
        let mut out: Vec<(String, Timestamp)> = self
            .schedules
            .read()
            .await
            .values()
            .filter(|s| s.enabled)
            .filter_map(|s| match s.trigger {
                ScheduleTrigger::Cron { next_run: Some(at), .. } => Some((s.id.clone(), at)),
                _ => None,
            })
            .collect();
        out.sort_by_key(|(_, at)| *at);
        out
    }
}
