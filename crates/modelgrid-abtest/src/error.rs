use modelgrid_core::ErrorKind;
use modelgrid_state::StateError;
use thiserror::Error;

use crate::types::AbTestStatus;

pub type AbTestResult<T> = Result<T, AbTestError>;

#[derive(Debug, Error)]
pub enum AbTestError {
    #[error("A/B test not found: {0}")]
    NotFound(String),

    #[error("A/B test already exists: {0}")]
    DuplicateTest(String),

    #[error("invalid A/B test configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error(
        "insufficient data for {test_id}: control {control}, treatment {treatment}, need {required} each"
    )]
    InsufficientData {
        test_id: String,
        control: u64,
        treatment: u64,
        required: u64,
    },

    #[error("A/B test {test_id} is not running ({status:?})")]
    NotRunning {
        test_id: String,
        status: AbTestStatus,
    },

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl AbTestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AbTestError::NotFound(_) => ErrorKind::NotFound,
            AbTestError::DuplicateTest(_) | AbTestError::NotRunning { .. } => ErrorKind::Conflict,
            AbTestError::InvalidConfig(_) => ErrorKind::Validation,
            AbTestError::InsufficientData { .. } => ErrorKind::InsufficientData,
            AbTestError::State(_) => ErrorKind::Internal,
        }
    }
}
