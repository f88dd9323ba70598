//! Inference provider collaborator.
//!
//! The core never calls a model directly; it hands a version's
//! [`ModelConfiguration`] to an [`InferenceProvider`] and treats the
//! result as opaque. Calls are bounded by the caller's timeout and are
//! never retried here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ModelConfiguration;

/// A single inference request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Caller-assigned request id, also used for sticky routing.
    pub request_id: String,
    pub payload: serde_json::Value,
}

/// Outcome of a single inference request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub response: serde_json::Value,
    pub latency_ms: f64,
    pub success: bool,
    pub cost: f64,
}

/// Failure of the external provider call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("provider timed out after {0}ms")]
    Timeout(u64),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider rejected request: {0}")]
    Rejected(String),
}

/// Executes inference requests against a configured model.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn infer(
        &self,
        config: &ModelConfiguration,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, ProviderError>;
}
