//! modelgrid-scheduler — triggering model updates.
//!
//! An update names a model and a target version. It is created manually,
//! by a cron schedule, by an external event, or by a monitor alert against
//! the active version, waits in a FIFO queue for one of a bounded number
//! of slots, runs its validation pipeline, and is then handed to the
//! deployment controller.
//!
//! ```text
//! submit / cron tick / fire_event / on_alert
//!        │
//!        ▼
//!     Queued ──cancel──▶ Cancelled
//!        │ (slot free)
//!        ▼
//!   Validating ──required rule fails──▶ Rejected
//!        │
//!        ▼
//!    Deploying ──controller refuses──▶ Failed
//!        │
//!        ▼
//!     Deployed
//! ```
//!
//! A rejected update never touches the version store.

pub mod cron;
pub mod error;
pub mod scheduler;
pub mod task;
pub mod validation;

pub use cron::{CronError, CronSchedule};
pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{AutomationStatistics, Deployer, UpdateScheduler};
pub use task::{
    NewSchedule, NewScheduleTrigger, NewUpdate, RolloutPlan, Schedule, ScheduleTrigger,
    UpdateStatus, UpdateTarget, UpdateTask, UpdateTrigger,
};
pub use validation::{
    RuleOutcome, ValidationContext, ValidationPipeline, ValidationReport, ValidationRule, Validator,
    default_rules,
};
