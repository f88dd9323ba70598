use modelgrid_core::{ErrorKind, ModelRef};
use modelgrid_state::StateError;
use thiserror::Error;

pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("insufficient data for {version}: {have} samples, need {need}")]
    InsufficientData {
        version: ModelRef,
        have: usize,
        need: usize,
    },

    #[error("no samples recorded for {0}")]
    UnknownVersion(ModelRef),

    #[error("invalid threshold {name:?}: {reason}")]
    InvalidThreshold { name: String, reason: String },

    #[error("sample channel closed")]
    ChannelClosed,

    #[error("sample buffer full; sample dropped")]
    BufferFull,

    #[error("notification delivery failed: {0}")]
    Delivery(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl MonitorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MonitorError::InsufficientData { .. } => ErrorKind::InsufficientData,
            MonitorError::UnknownVersion(_) => ErrorKind::NotFound,
            MonitorError::InvalidThreshold { .. } => ErrorKind::Validation,
            MonitorError::ChannelClosed
            | MonitorError::BufferFull
            | MonitorError::Delivery(_)
            | MonitorError::State(_) => ErrorKind::Internal,
        }
    }
}
