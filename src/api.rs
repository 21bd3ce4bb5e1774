//! The top-level facade (§4.B items 2-4): a process-wide singleton or a
//! freestanding instance for test isolation, coordinating the provider
//! registry and the event executor without either depending on the other.

use std::sync::{Arc, OnceLock};

use crate::client::Client;
use crate::config::ExecutorConfig;
use crate::context::EvaluationContext;
use crate::events::{EventExecutor, EventHandler, HandlerToken};
use crate::hooks::Hook;
use crate::logging::{Logger, LoggerHandle};
use crate::provider::{EventType, FeatureProvider, NoopProvider, ProviderMetadata};
use crate::registry::ProviderRegistry;

static SINGLETON: OnceLock<OpenFeature> = OnceLock::new();

/// The SDK entry point. Owns the provider registry and the event executor
/// and is the only component permitted to know about both.
#[derive(Clone)]
pub struct OpenFeature {
    registry: Arc<ProviderRegistry>,
    executor: Arc<EventExecutor>,
    logger: LoggerHandle,
}

impl OpenFeature {
    /// The process-wide instance, created on first access.
    pub fn singleton() -> &'static OpenFeature {
        SINGLETON.get_or_init(OpenFeature::new)
    }

    /// A freestanding instance, independent of the process-wide singleton.
    /// Intended for tests that need isolation from other tests' global
    /// state.
    pub fn new() -> Self {
        let logger = LoggerHandle::default();
        let registry = Arc::new(ProviderRegistry::new(Arc::new(NoopProvider::new()), logger.clone()));
        let executor = EventExecutor::new(registry.clone(), ExecutorConfig::default(), logger.clone());
        Self { registry, executor, logger }
    }

    #[tracing::instrument(skip(self, provider))]
    pub async fn set_default_provider(&self, provider: Arc<dyn FeatureProvider>) {
        let outcome = self.registry.set_default_provider(provider).await;
        self.apply_registration(outcome).await;
    }

    #[tracing::instrument(skip(self, provider))]
    pub async fn set_named_provider(&self, name: impl Into<String> + std::fmt::Debug, provider: Arc<dyn FeatureProvider>) {
        let outcome = self.registry.set_named_provider(name, provider).await;
        self.apply_registration(outcome).await;
    }

    async fn apply_registration(&self, outcome: crate::registry::RegistrationOutcome) {
        let global_context = self.registry.global_context().await;
        if outcome.newly_registered {
            let provider = outcome.provider.clone();
            let ctx = global_context.clone();
            let logger = self.logger.clone();
            tokio::spawn(async move {
                if let Err(err) = provider.initialize(&ctx).await {
                    logger.get().log_error(&format!("provider initialize failed: {err}"));
                }
            });
        }
        self.executor.watch(outcome.provider, outcome.newly_registered).await;

        if let Some(displaced) = outcome.displaced {
            self.executor.unwatch(&displaced, outcome.displaced_released);
            if outcome.displaced_released {
                tokio::spawn(async move {
                    displaced.shutdown().await;
                });
            }
        }
    }

    pub async fn provider_metadata(&self) -> ProviderMetadata {
        self.registry.default_provider().await.metadata().clone()
    }

    pub async fn set_global_evaluation_context(&self, context: EvaluationContext) {
        self.registry.set_global_context(context).await;
    }

    pub async fn add_global_hooks(&self, hooks: impl IntoIterator<Item = Arc<dyn Hook>>) {
        self.registry.add_api_hooks(hooks).await;
    }

    pub async fn add_event_handler(&self, event_type: EventType, handler: EventHandler) -> HandlerToken {
        self.executor.add_api_handler(event_type, handler).await
    }

    pub async fn add_client_event_handler(
        &self,
        client_name: &str,
        event_type: EventType,
        handler: EventHandler,
    ) -> HandlerToken {
        self.executor.add_client_handler(client_name, event_type, handler).await
    }

    pub async fn remove_event_handler(&self, token: HandlerToken) {
        self.executor.remove_handler(token).await;
    }

    pub fn set_logger(&self, logger: Arc<dyn Logger>) {
        self.logger.set(logger);
    }

    #[tracing::instrument(skip(self))]
    pub async fn new_client(&self, name: impl Into<String> + std::fmt::Debug) -> Client {
        let name = name.into();
        self.registry.register_client_name(&name).await;
        Client::new(name, self.registry.clone(), self.executor.clone(), self.logger.clone())
    }

    /// Stops the event executor and shuts down every currently-bound
    /// provider, waiting up to each component's configured budget.
    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
        for provider in self.registry.all_bound_providers().await {
            provider.shutdown().await;
        }
    }
}

impl Default for OpenFeature {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::NoopProvider;

    #[tokio::test]
    async fn new_client_resolves_through_noop_before_any_provider_is_set() {
        let api = OpenFeature::new();
        let client = api.new_client("test").await;
        let value = client.get_bool_value("flag", true, crate::client::EvaluationOptions::new()).await;
        assert!(value);
    }

    #[tokio::test]
    async fn set_default_provider_is_observed_by_existing_clients() {
        let api = OpenFeature::new();
        let client = api.new_client("test").await;
        api.set_default_provider(Arc::new(NoopProvider::new())).await;
        let metadata = api.provider_metadata().await;
        assert_eq!(metadata.name, "no-op provider");
        let _ = client;
    }

    #[tokio::test]
    async fn shutdown_completes_without_hanging() {
        let api = OpenFeature::new();
        api.set_default_provider(Arc::new(NoopProvider::new())).await;
        api.shutdown().await;
    }
}
