//! Inference provider used when the daemon runs without a provider
//! integration.
//!
//! Every call fails as unavailable, so blue-green shadow validation and
//! the `provider_smoke_test` rule fail closed instead of passing on
//! fabricated responses.

use async_trait::async_trait;
use modelgrid_core::{
    InferenceProvider, InferenceRequest, InferenceResponse, ModelConfiguration, ProviderError,
};
use tracing::warn;

pub struct UnconfiguredProvider;

#[async_trait]
impl InferenceProvider for UnconfiguredProvider {
    async fn infer(
        &self,
        config: &ModelConfiguration,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, ProviderError> {
        warn!(
            provider = %config.provider,
            model = %config.model,
            request_id = %request.request_id,
            "inference requested but no provider is configured"
        );
        Err(ProviderError::Unavailable(format!(
            "no integration for provider {}",
            config.provider
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_call_is_unavailable() {
        let request = InferenceRequest {
            request_id: "r1".to_string(),
            payload: serde_json::Value::Null,
        };
        let err = UnconfiguredProvider
            .infer(&ModelConfiguration::new("openai", "gpt-4o-mini"), &request)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::Unavailable("no integration for provider openai".to_string())
        );
    }
}
