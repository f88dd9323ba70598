//! Error taxonomy shared by every ModelGrid crate.
//!
//! Each crate defines its own `thiserror` enum; all of them map onto
//! [`ErrorKind`] so callers can decide whether to retry, wait, escalate,
//! or intervene without matching on crate-specific variants.

use serde::{Deserialize, Serialize};

/// Category of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input. Nothing was persisted.
    Validation,
    /// A concurrent operation holds the same model.
    Conflict,
    /// Unknown model, version, deployment, test, or update.
    NotFound,
    /// Not enough samples to decide. A wait state, not a failure.
    InsufficientData,
    /// The inference provider call failed. Not retried internally.
    Provider,
    /// A prior version could not be restored. Needs manual intervention.
    RollbackFailed,
    /// Storage or serialization fault.
    Internal,
}

impl ErrorKind {
    /// Whether retrying the same request later can succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Conflict | ErrorKind::InsufficientData | ErrorKind::Provider
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Conflict.is_retryable());
        assert!(ErrorKind::InsufficientData.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::RollbackFailed.is_retryable());
    }
}
