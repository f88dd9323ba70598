use modelgrid_core::ErrorKind;
use modelgrid_state::{StateError, VersionError};
use thiserror::Error;

use crate::cron::CronError;
use crate::task::UpdateStatus;

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid update request: {}", .0.join("; "))]
    InvalidRequest(Vec<String>),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(#[from] CronError),

    #[error("update not found: {0}")]
    NotFound(String),

    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),

    /// Validation is atomic; only queued updates can be cancelled.
    #[error("update {update_id} cannot be cancelled while {status:?}")]
    NotCancellable {
        update_id: String,
        status: UpdateStatus,
    },

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::InvalidRequest(_) | SchedulerError::InvalidSchedule(_) => {
                ErrorKind::Validation
            }
            SchedulerError::NotFound(_) | SchedulerError::ScheduleNotFound(_) => ErrorKind::NotFound,
            SchedulerError::NotCancellable { .. } => ErrorKind::Conflict,
            SchedulerError::Version(e) => e.kind(),
            SchedulerError::State(_) => ErrorKind::Internal,
        }
    }

    /// The update's status after this failure, when one is involved.
    pub fn update_status(&self) -> Option<UpdateStatus> {
        match self {
            SchedulerError::NotCancellable { status, .. } => Some(*status),
            _ => None,
        }
    }
}
