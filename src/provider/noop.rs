//! The provider the SDK falls back to when no default provider has been
//! registered yet: every resolution simply returns the caller's default
//! with reason `Default`.

use async_trait::async_trait;

use crate::context::EvaluationContext;
use crate::error::EvaluationResult;
use crate::evaluation::{EvaluationReason, ResolutionDetails};
use crate::value::StructValue;

use super::{FeatureProvider, ProviderMetadata};

const METADATA_NAME: &str = "no-op provider";

/// Always resolves to the caller-supplied default. This is the provider
/// every freshly-constructed SDK instance starts with, analogous to the
/// `NoopProvider` every OpenFeature SDK ships so `new_client` never hands
/// back a client with nothing to call.
#[derive(Debug)]
pub struct NoopProvider {
    metadata: ProviderMetadata,
}

impl Default for NoopProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl NoopProvider {
    pub fn new() -> Self {
        Self {
            metadata: ProviderMetadata::new(METADATA_NAME),
        }
    }
}

#[async_trait]
impl FeatureProvider for NoopProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn resolve_bool_value(
        &self,
        _flag_key: &str,
        default_value: bool,
        _context: &EvaluationContext,
    ) -> EvaluationResult<ResolutionDetails<bool>> {
        Ok(ResolutionDetails::builder()
            .value(default_value)
            .reason(EvaluationReason::Default)
            .build())
    }

    async fn resolve_string_value(
        &self,
        _flag_key: &str,
        default_value: &str,
        _context: &EvaluationContext,
    ) -> EvaluationResult<ResolutionDetails<String>> {
        Ok(ResolutionDetails::builder()
            .value(default_value.to_string())
            .reason(EvaluationReason::Default)
            .build())
    }

    async fn resolve_int_value(
        &self,
        _flag_key: &str,
        default_value: i64,
        _context: &EvaluationContext,
    ) -> EvaluationResult<ResolutionDetails<i64>> {
        Ok(ResolutionDetails::builder()
            .value(default_value)
            .reason(EvaluationReason::Default)
            .build())
    }

    async fn resolve_float_value(
        &self,
        _flag_key: &str,
        default_value: f64,
        _context: &EvaluationContext,
    ) -> EvaluationResult<ResolutionDetails<f64>> {
        Ok(ResolutionDetails::builder()
            .value(default_value)
            .reason(EvaluationReason::Default)
            .build())
    }

    async fn resolve_object_value(
        &self,
        _flag_key: &str,
        default_value: StructValue,
        _context: &EvaluationContext,
    ) -> EvaluationResult<ResolutionDetails<StructValue>> {
        Ok(ResolutionDetails::builder()
            .value(default_value)
            .reason(EvaluationReason::Default)
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_to_the_supplied_default() {
        let provider = NoopProvider::new();
        let ctx = EvaluationContext::default();
        let result = provider.resolve_bool_value("any-flag", true, &ctx).await.unwrap();
        assert_eq!(result.value, true);
        assert_eq!(result.reason, Some(EvaluationReason::Default));
    }
}
