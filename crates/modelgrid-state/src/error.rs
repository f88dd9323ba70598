//! Error types for the state store and the version store.

use modelgrid_core::{ErrorKind, ModelRef};
use thiserror::Error;

use crate::types::VersionStatus;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

/// Result type alias for version store operations.
pub type VersionResult<T> = Result<T, VersionError>;

/// Errors from the model version lifecycle.
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("version already exists: {0}")]
    DuplicateVersion(ModelRef),

    #[error("invalid semantic version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("invalid configuration: {}", .0.join("; "))]
    InvalidConfiguration(Vec<String>),

    #[error("invalid lineage for {version}: {reason}")]
    InvalidLineage { version: ModelRef, reason: String },

    #[error("invalid transition for {version}: {current:?} -> {requested:?}")]
    InvalidTransition {
        version: ModelRef,
        current: VersionStatus,
        requested: VersionStatus,
    },

    #[error("{version} cannot be a rollback target (status {current:?})")]
    NotRollbackTarget {
        version: ModelRef,
        current: VersionStatus,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl VersionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VersionError::DuplicateVersion(_) => ErrorKind::Conflict,
            VersionError::InvalidVersion { .. }
            | VersionError::InvalidConfiguration(_)
            | VersionError::InvalidLineage { .. }
            | VersionError::NotRollbackTarget { .. } => ErrorKind::Validation,
            VersionError::InvalidTransition { .. } => ErrorKind::Conflict,
            VersionError::NotFound(_) => ErrorKind::NotFound,
            VersionError::State(_) => ErrorKind::Internal,
        }
    }

    /// The status the entity is in after this failure, when known.
    pub fn current_status(&self) -> Option<VersionStatus> {
        match self {
            VersionError::InvalidTransition { current, .. }
            | VersionError::NotRollbackTarget { current, .. } => Some(*current),
            _ => None,
        }
    }
}
