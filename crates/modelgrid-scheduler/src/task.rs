//! Update tasks and the schedules that create them.

use modelgrid_core::Timestamp;
use modelgrid_rollout::{HealthCriteria, RollbackConfig, Strategy};
use serde::{Deserialize, Serialize};

use crate::cron::CronSchedule;
use crate::validation::{RuleOutcome, ValidationRule};

/// What started an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateTrigger {
    Manual,
    Scheduled { schedule_id: String, expression: String },
    Event { event: String },
    /// A monitor alert against the serving version.
    Performance {
        schedule_id: String,
        alert_id: String,
        threshold: String,
        /// The version the alert fired on.
        degraded: String,
    },
}

impl UpdateTrigger {
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateTrigger::Manual => "manual",
            UpdateTrigger::Scheduled { .. } => "scheduled",
            UpdateTrigger::Event { .. } => "event",
            UpdateTrigger::Performance { .. } => "performance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Waiting for a free slot.
    Queued,
    Validating,
    /// Validated and being handed to the deployment controller.
    Deploying,
    /// A deployment was started.
    Deployed,
    /// A required validation rule failed. Nothing was touched.
    Rejected,
    /// The deployment could not be started.
    Failed,
    Cancelled,
}

impl UpdateStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UpdateStatus::Deployed
                | UpdateStatus::Rejected
                | UpdateStatus::Failed
                | UpdateStatus::Cancelled
        )
    }
}

/// How the update should be rolled out once validated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RolloutPlan {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub health: HealthCriteria,
    #[serde(default)]
    pub rollback: RollbackConfig,
}

/// A request to update `model` to `version`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUpdate {
    pub model: String,
    pub version: String,
    /// Run in order. Empty means the default pipeline.
    pub rules: Vec<ValidationRule>,
    pub plan: RolloutPlan,
}

impl NewUpdate {
    pub fn new(model: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            version: version.into(),
            rules: Vec::new(),
            plan: RolloutPlan::default(),
        }
    }

    pub fn with_rules(mut self, rules: Vec<ValidationRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_plan(mut self, plan: RolloutPlan) -> Self {
        self.plan = plan;
        self
    }
}

/// A persisted update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateTask {
    pub id: String,
    pub model: String,
    pub version: String,
    pub trigger: UpdateTrigger,
    pub rules: Vec<ValidationRule>,
    pub plan: RolloutPlan,
    pub status: UpdateStatus,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    #[serde(default)]
    pub validation: Vec<RuleOutcome>,
    /// Failed optional rules.
    #[serde(default)]
    pub warnings: Vec<String>,
    pub deployment_id: Option<String>,
    pub reason: Option<String>,
}

impl UpdateTask {
    pub(crate) fn finish(&mut self, status: UpdateStatus, now: Timestamp, reason: Option<String>) {
        self.status = status;
        self.finished_at = Some(now);
        self.reason = reason;
    }
}

/// Which version a schedule deploys when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "version", rename_all = "snake_case")]
pub enum UpdateTarget {
    Version(String),
    /// Highest pending version at fire time; nothing happens when there
    /// is none.
    LatestPending,
}

/// When a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleTrigger {
    Cron {
        expression: CronSchedule,
        /// Persisted so a restart neither skips nor repeats a run.
        next_run: Option<Timestamp>,
    },
    Event { event: String },
    /// Fires when the model's active version raises an alert or a rollback
    /// request. `threshold` narrows it to one named threshold.
    Performance { threshold: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSchedule {
    pub model: String,
    pub target: UpdateTarget,
    pub trigger: NewScheduleTrigger,
    pub rules: Vec<ValidationRule>,
    pub plan: RolloutPlan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewScheduleTrigger {
    Cron(String),
    Event(String),
    /// Optional threshold name.
    Performance(Option<String>),
}

/// A persisted schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub model: String,
    pub target: UpdateTarget,
    pub trigger: ScheduleTrigger,
    pub rules: Vec<ValidationRule>,
    pub plan: RolloutPlan,
    pub enabled: bool,
    pub created_at: Timestamp,
    pub last_run: Option<Timestamp>,
}

impl Schedule {
    /// Cron schedules due at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.enabled
            && matches!(self.trigger, ScheduleTrigger::Cron { next_run: Some(at), .. } if at <= now)
    }
}
