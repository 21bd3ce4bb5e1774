//! The provider registry: default + named provider bindings, 1:N reference
//! accounting, and non-blocking init/shutdown of the providers they hold.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::context::EvaluationContext;
use crate::hooks::Hook;
use crate::logging::LoggerHandle;
use crate::provider::FeatureProvider;

/// The result of swapping a new provider into a slot, used by the caller to
/// decide whether to schedule init/shutdown and whether to notify the event
/// executor to start/stop watching.
pub struct RegistrationOutcome {
    pub provider: Arc<dyn FeatureProvider>,
    pub displaced: Option<Arc<dyn FeatureProvider>>,
    /// True if `displaced` (when present) is no longer bound to any slot.
    pub displaced_released: bool,
    /// True if `provider` was not already bound to any other slot before
    /// this call — i.e. this is the first registration of this instance.
    pub newly_registered: bool,
}

/// A read-only snapshot of what an in-flight evaluation needs from the
/// registry, taken once under the read lock so a concurrent registration
/// cannot affect an evaluation already under way.
#[derive(Clone)]
pub struct EvaluationSnapshot {
    pub provider: Arc<dyn FeatureProvider>,
    pub api_hooks: Vec<Arc<dyn Hook>>,
    pub api_context: EvaluationContext,
}

struct Bindings {
    default: Arc<dyn FeatureProvider>,
    named: HashMap<String, Arc<dyn FeatureProvider>>,
    known_client_names: HashSet<String>,
}

pub struct ProviderRegistry {
    bindings: RwLock<Bindings>,
    global_context: RwLock<EvaluationContext>,
    api_hooks: RwLock<Vec<Arc<dyn Hook>>>,
    logger: LoggerHandle,
}

impl ProviderRegistry {
    pub fn new(default_provider: Arc<dyn FeatureProvider>, logger: LoggerHandle) -> Self {
        Self {
            bindings: RwLock::new(Bindings {
                default: default_provider,
                named: HashMap::new(),
                known_client_names: HashSet::new(),
            }),
            global_context: RwLock::new(EvaluationContext::default()),
            api_hooks: RwLock::new(Vec::new()),
            logger,
        }
    }

    pub async fn set_global_context(&self, ctx: EvaluationContext) {
        *self.global_context.write().await = ctx;
    }

    pub async fn global_context(&self) -> EvaluationContext {
        self.global_context.read().await.clone()
    }

    pub async fn add_api_hooks(&self, hooks: impl IntoIterator<Item = Arc<dyn Hook>>) {
        self.api_hooks.write().await.extend(hooks);
    }

    pub async fn api_hooks(&self) -> Vec<Arc<dyn Hook>> {
        self.api_hooks.read().await.clone()
    }

    pub async fn register_client_name(&self, name: &str) {
        self.bindings
            .write()
            .await
            .known_client_names
            .insert(name.to_string());
    }

    pub async fn set_default_provider(&self, provider: Arc<dyn FeatureProvider>) -> RegistrationOutcome {
        let mut bindings = self.bindings.write().await;
        let newly_registered = !is_bound_anywhere(&bindings, &provider);
        let old = std::mem::replace(&mut bindings.default, provider.clone());
        let displaced_released = !is_bound_anywhere(&bindings, &old);
        RegistrationOutcome {
            provider,
            displaced: Some(old),
            displaced_released,
            newly_registered,
        }
    }

    pub async fn set_named_provider(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn FeatureProvider>,
    ) -> RegistrationOutcome {
        let name = name.into();
        let mut bindings = self.bindings.write().await;
        let newly_registered = !is_bound_anywhere(&bindings, &provider);
        let old = bindings.named.insert(name, provider.clone());
        let displaced_released = match &old {
            Some(old_provider) => !is_bound_anywhere(&bindings, old_provider),
            None => false,
        };
        RegistrationOutcome {
            provider,
            displaced: old,
            displaced_released,
            newly_registered,
        }
    }

    pub async fn default_provider(&self) -> Arc<dyn FeatureProvider> {
        self.bindings.read().await.default.clone()
    }

    pub async fn named_provider(&self, name: &str) -> Option<Arc<dyn FeatureProvider>> {
        self.bindings.read().await.named.get(name).cloned()
    }

    /// Resolves the provider + API hooks + global context an evaluation for
    /// `client_name` should use, as one consistent snapshot.
    pub async fn snapshot_for(&self, client_name: &str) -> EvaluationSnapshot {
        let bindings = self.bindings.read().await;
        let provider = bindings
            .named
            .get(client_name)
            .cloned()
            .unwrap_or_else(|| bindings.default.clone());
        drop(bindings);
        EvaluationSnapshot {
            provider,
            api_hooks: self.api_hooks().await,
            api_context: self.global_context().await,
        }
    }

    /// Client names whose explicit named binding is `provider` (by pointer
    /// identity).
    pub async fn client_names_bound_to(&self, provider: &Arc<dyn FeatureProvider>) -> Vec<String> {
        let bindings = self.bindings.read().await;
        bindings
            .named
            .iter()
            .filter(|(_, p)| Arc::ptr_eq(p, provider))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Client names with no explicit named binding at all (they resolve
    /// through the default provider).
    pub async fn client_names_with_no_binding(&self) -> Vec<String> {
        let bindings = self.bindings.read().await;
        bindings
            .known_client_names
            .iter()
            .filter(|name| !bindings.named.contains_key(*name))
            .cloned()
            .collect()
    }

    pub async fn is_default_provider(&self, provider: &Arc<dyn FeatureProvider>) -> bool {
        Arc::ptr_eq(&self.bindings.read().await.default, provider)
    }

    /// All providers currently bound anywhere (default + every named slot),
    /// de-duplicated by pointer identity. Used by `shutdown()`.
    pub async fn all_bound_providers(&self) -> Vec<Arc<dyn FeatureProvider>> {
        let bindings = self.bindings.read().await;
        let mut out: Vec<Arc<dyn FeatureProvider>> = vec![bindings.default.clone()];
        for p in bindings.named.values() {
            if !out.iter().any(|existing| Arc::ptr_eq(existing, p)) {
                out.push(p.clone());
            }
        }
        out
    }

    pub fn logger(&self) -> LoggerHandle {
        self.logger.clone()
    }
}

fn is_bound_anywhere(bindings: &Bindings, provider: &Arc<dyn FeatureProvider>) -> bool {
    Arc::ptr_eq(&bindings.default, provider) || bindings.named.values().any(|p| Arc::ptr_eq(p, provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::NoopProvider;

    fn provider() -> Arc<dyn FeatureProvider> {
        Arc::new(NoopProvider::new())
    }

    #[tokio::test]
    async fn default_provider_starts_as_noop_and_is_replaceable() {
        let registry = ProviderRegistry::new(provider(), LoggerHandle::default());
        let p2 = provider();
        let outcome = registry.set_default_provider(p2.clone()).await;
        assert!(outcome.newly_registered);
        assert!(outcome.displaced_released);
        assert!(Arc::ptr_eq(&registry.default_provider().await, &p2));
    }

    #[tokio::test]
    async fn shared_provider_is_not_released_while_still_bound() {
        let registry = ProviderRegistry::new(provider(), LoggerHandle::default());
        let shared = provider();
        registry.set_default_provider(shared.clone()).await;
        registry.set_named_provider("a", shared.clone()).await;

        let replacement = provider();
        let outcome = registry.set_default_provider(replacement).await;
        assert!(!outcome.displaced_released, "still bound under client 'a'");

        let outcome2 = registry.set_named_provider("a", provider()).await;
        assert!(outcome2.displaced_released, "no longer bound anywhere");
    }

    #[tokio::test]
    async fn snapshot_falls_back_to_default_for_unbound_client() {
        let default = provider();
        let registry = ProviderRegistry::new(default.clone(), LoggerHandle::default());
        let snapshot = registry.snapshot_for("unbound-client").await;
        assert!(Arc::ptr_eq(&snapshot.provider, &default));
    }

    #[tokio::test]
    async fn client_names_with_no_binding_excludes_bound_clients() {
        let registry = ProviderRegistry::new(provider(), LoggerHandle::default());
        registry.register_client_name("a").await;
        registry.register_client_name("b").await;
        registry.set_named_provider("a", provider()).await;

        let unbound = registry.client_names_with_no_binding().await;
        assert_eq!(unbound, vec!["b".to_string()]);
    }
}
