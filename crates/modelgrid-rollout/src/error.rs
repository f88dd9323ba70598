use modelgrid_abtest::AbTestError;
use modelgrid_core::{ErrorKind, ProviderError};
use modelgrid_monitor::MonitorError;
use modelgrid_state::{StateError, VersionError};
use thiserror::Error;

use crate::deployment::DeploymentState;

pub type RolloutResult<T> = Result<T, RolloutError>;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("invalid deployment request: {}", .0.join("; "))]
    InvalidRequest(Vec<String>),

    #[error("model {model} already has deployment {deployment_id} in flight ({state:?})")]
    DeploymentInProgress {
        model: String,
        deployment_id: String,
        state: DeploymentState,
    },

    #[error("deployment not found: {0}")]
    NotFound(String),

    #[error("deployment {deployment_id} already finished ({state:?})")]
    Finished {
        deployment_id: String,
        state: DeploymentState,
    },

    #[error("no active version serves model {0}")]
    NoActiveVersion(String),

    #[error("rollback of deployment {deployment_id} failed: {reason}")]
    RollbackFailed {
        deployment_id: String,
        state: DeploymentState,
        reason: String,
    },

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    AbTest(#[from] AbTestError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl RolloutError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RolloutError::InvalidRequest(_) => ErrorKind::Validation,
            RolloutError::DeploymentInProgress { .. } | RolloutError::Finished { .. } => {
                ErrorKind::Conflict
            }
            RolloutError::NotFound(_) | RolloutError::NoActiveVersion(_) => ErrorKind::NotFound,
            RolloutError::RollbackFailed { .. } => ErrorKind::RollbackFailed,
            RolloutError::Provider(_) => ErrorKind::Provider,
            RolloutError::Version(e) => e.kind(),
            RolloutError::AbTest(e) => e.kind(),
            RolloutError::Monitor(e) => e.kind(),
            RolloutError::State(_) => ErrorKind::Internal,
        }
    }

    /// The deployment's state after this failure, when one is involved.
    pub fn deployment_state(&self) -> Option<DeploymentState> {
        match self {
            RolloutError::DeploymentInProgress { state, .. }
            | RolloutError::Finished { state, .. }
            | RolloutError::RollbackFailed { state, .. } => Some(*state),
            _ => None,
        }
    }
}
