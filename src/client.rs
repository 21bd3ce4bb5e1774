//! Named clients and the typed evaluation orchestrator (§4.E): the
//! before/resolve/after/error/finally algorithm with default-on-failure
//! guarantees, exposed once per flag type as value-only and details methods.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::context::{merge, EvaluationContext};
use crate::error::{EvaluationError, EvaluationErrorCode, EvaluationResult};
use crate::evaluation::{EvaluationDetails, EvaluationReason, FlagValueType};
use crate::hooks::{
    before_order, reverse_order, run_after_chain, run_before_chain, run_error_chain, run_finally_chain, Hook,
    HookContext, HookEvaluationDetails, HookHints,
};
use crate::logging::LoggerHandle;
use crate::registry::ProviderRegistry;
use crate::value::{StructValue, Value};

/// Identifying information for a client, observed by hooks via
/// [`crate::hooks::HookContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMetadata {
    pub name: String,
}

impl ClientMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Caller-supplied, per-evaluation extras layered on top of the client and
/// API contexts/hooks.
#[derive(Default)]
pub struct EvaluationOptions {
    pub context: Option<EvaluationContext>,
    pub hooks: Vec<Arc<dyn Hook>>,
    pub hints: HookHints,
}

impl EvaluationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, context: EvaluationContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_hints(mut self, hints: HookHints) -> Self {
        self.hints = hints;
        self
    }
}

/// A named handle for evaluating flags against whichever provider is
/// currently bound to its name (or the default provider, if unbound).
///
/// Cheap to clone: the expensive state (registry, hooks) lives behind
/// `Arc`s reached through `registry`.
#[derive(Clone)]
pub struct Client {
    metadata: ClientMetadata,
    registry: Arc<ProviderRegistry>,
    executor: Arc<crate::events::EventExecutor>,
    context: Arc<RwLock<EvaluationContext>>,
    hooks: Arc<RwLock<Vec<Arc<dyn Hook>>>>,
    logger: LoggerHandle,
}

impl Client {
    pub(crate) fn new(
        name: impl Into<String>,
        registry: Arc<ProviderRegistry>,
        executor: Arc<crate::events::EventExecutor>,
        logger: LoggerHandle,
    ) -> Self {
        Self {
            metadata: ClientMetadata::new(name),
            registry,
            executor,
            context: Arc::new(RwLock::new(EvaluationContext::default())),
            hooks: Arc::new(RwLock::new(Vec::new())),
            logger,
        }
    }

    pub fn metadata(&self) -> &ClientMetadata {
        &self.metadata
    }

    pub async fn set_evaluation_context(&self, context: EvaluationContext) {
        *self.context.write().await = context;
    }

    pub async fn add_hooks(&self, hooks: impl IntoIterator<Item = Arc<dyn Hook>>) {
        self.hooks.write().await.extend(hooks);
    }

    pub async fn add_event_handler(
        &self,
        event_type: crate::provider::EventType,
        handler: crate::events::EventHandler,
    ) -> crate::events::HandlerToken {
        self.executor.add_client_handler(&self.metadata.name, event_type, handler).await
    }

    pub async fn remove_event_handler(&self, token: crate::events::HandlerToken) {
        self.executor.remove_handler(token).await;
    }

    pub async fn get_bool_value(&self, flag_key: &str, default: bool, options: EvaluationOptions) -> bool {
        self.details(flag_key, FlagValueType::Boolean, default, options).await.value
    }

    pub async fn get_bool_details(
        &self,
        flag_key: &str,
        default: bool,
        options: EvaluationOptions,
    ) -> EvaluationDetails<bool> {
        self.details(flag_key, FlagValueType::Boolean, default, options).await
    }

    pub async fn get_string_value(&self, flag_key: &str, default: &str, options: EvaluationOptions) -> String {
        self.details(flag_key, FlagValueType::String, default.to_string(), options)
            .await
            .value
    }

    pub async fn get_string_details(
        &self,
        flag_key: &str,
        default: &str,
        options: EvaluationOptions,
    ) -> EvaluationDetails<String> {
        self.details(flag_key, FlagValueType::String, default.to_string(), options).await
    }

    pub async fn get_int_value(&self, flag_key: &str, default: i64, options: EvaluationOptions) -> i64 {
        self.details(flag_key, FlagValueType::Int, default, options).await.value
    }

    pub async fn get_int_details(
        &self,
        flag_key: &str,
        default: i64,
        options: EvaluationOptions,
    ) -> EvaluationDetails<i64> {
        self.details(flag_key, FlagValueType::Int, default, options).await
    }

    pub async fn get_float_value(&self, flag_key: &str, default: f64, options: EvaluationOptions) -> f64 {
        self.details(flag_key, FlagValueType::Float, default, options).await.value
    }

    pub async fn get_float_details(
        &self,
        flag_key: &str,
        default: f64,
        options: EvaluationOptions,
    ) -> EvaluationDetails<f64> {
        self.details(flag_key, FlagValueType::Float, default, options).await
    }

    pub async fn get_object_value(&self, flag_key: &str, default: StructValue, options: EvaluationOptions) -> StructValue {
        self.details(flag_key, FlagValueType::Object, default, options).await.value
    }

    pub async fn get_object_details(
        &self,
        flag_key: &str,
        default: StructValue,
        options: EvaluationOptions,
    ) -> EvaluationDetails<StructValue> {
        self.details(flag_key, FlagValueType::Object, default, options).await
    }

    /// Runs the before/resolve/after algorithm for one flag type, generic
    /// over the five supported value types via [`Resolvable`].
    #[tracing::instrument(skip(self, default, options), fields(client = %self.metadata.name))]
    async fn details<T>(
        &self,
        flag_key: &str,
        flag_type: FlagValueType,
        default: T,
        options: EvaluationOptions,
    ) -> EvaluationDetails<T>
    where
        T: Resolvable,
    {
        let snapshot = self.registry.snapshot_for(&self.metadata.name).await;
        let client_context = self.context.read().await.clone();
        let invocation_context = options.context.clone().unwrap_or_default();
        let running_context = merge(&[&snapshot.api_context, &client_context, &invocation_context]);
        tracing::debug!(
            context = %serde_json::to_string(&running_context).unwrap_or_default(),
            "resolving flag '{flag_key}'"
        );

        let client_hooks = self.hooks.read().await.clone();
        let provider_hooks = snapshot.provider.hooks();
        let before_chain = before_order(&snapshot.api_hooks, &client_hooks, &options.hooks, &provider_hooks);
        let after_chain = reverse_order(&before_chain);

        let hook_ctx = HookContext {
            flag_key: flag_key.to_string(),
            flag_type,
            default_value: default.to_generic_value(),
            client_metadata: self.metadata.clone(),
            provider_metadata: snapshot.provider.metadata().clone(),
            evaluation_context: running_context.clone(),
        };
        let logger = self.logger.get();

        let merged_context = match run_before_chain(&before_chain, &hook_ctx, &running_context, &options.hints) {
            Ok(ctx) => ctx,
            Err(err) => {
                run_error_chain(&after_chain, &hook_ctx, &err, &options.hints, logger.as_ref());
                run_finally_chain(&after_chain, &hook_ctx, &options.hints, logger.as_ref());
                return EvaluationDetails::default_for(flag_key, flag_type, default, &err);
            }
        };

        let resolution = T::resolve(snapshot.provider.as_ref(), flag_key, default.clone_value(), &merged_context).await;

        let resolution = match resolution {
            Ok(resolution) => resolution,
            Err(err) => {
                run_error_chain(&after_chain, &hook_ctx, &err, &options.hints, logger.as_ref());
                run_finally_chain(&after_chain, &hook_ctx, &options.hints, logger.as_ref());
                return EvaluationDetails::default_for(flag_key, flag_type, default, &err);
            }
        };

        if let Some(code) = resolution.error_code.clone() {
            let err = EvaluationError {
                code,
                message: resolution.error_message.clone(),
            };
            run_error_chain(&after_chain, &hook_ctx, &err, &options.hints, logger.as_ref());
            run_finally_chain(&after_chain, &hook_ctx, &options.hints, logger.as_ref());
            return EvaluationDetails::default_for(flag_key, flag_type, default, &err);
        }

        let details = EvaluationDetails::from_resolution(flag_key, flag_type, resolution);
        let hook_details = HookEvaluationDetails {
            flag_key: details.flag_key.clone(),
            flag_type,
            value: details.value.to_generic_value(),
            variant: details.variant.clone(),
            reason: details.reason,
        };

        if let Err(err) = run_after_chain(&after_chain, &hook_ctx, &hook_details, &options.hints) {
            run_error_chain(&after_chain, &hook_ctx, &err, &options.hints, logger.as_ref());
            run_finally_chain(&after_chain, &hook_ctx, &options.hints, logger.as_ref());
            return EvaluationDetails::default_for(flag_key, flag_type, default, &err);
        }

        run_finally_chain(&after_chain, &hook_ctx, &options.hints, logger.as_ref());
        details
    }
}

/// Bridges a concrete flag value type to its typed provider resolution
/// method and to the type-erased [`Value`] the hook pipeline observes.
///
/// Hidden from the public surface: callers only ever see `bool`, `String`,
/// `i64`, `f64`, and [`StructValue`] on [`Client`]'s public methods above.
#[async_trait::async_trait]
trait Resolvable: Sized + Clone + Send + Sync + 'static {
    async fn resolve(
        provider: &(dyn crate::provider::FeatureProvider + '_),
        flag_key: &str,
        default: Self,
        context: &EvaluationContext,
    ) -> EvaluationResult<crate::evaluation::ResolutionDetails<Self>>;

    fn to_generic_value(&self) -> Value;

    fn clone_value(&self) -> Self {
        self.clone()
    }
}

#[async_trait::async_trait]
impl Resolvable for bool {
    async fn resolve(
        provider: &(dyn crate::provider::FeatureProvider + '_),
        flag_key: &str,
        default: Self,
        context: &EvaluationContext,
    ) -> EvaluationResult<crate::evaluation::ResolutionDetails<Self>> {
        provider.resolve_bool_value(flag_key, default, context).await
    }

    fn to_generic_value(&self) -> Value {
        Value::Bool(*self)
    }
}

#[async_trait::async_trait]
impl Resolvable for String {
    async fn resolve(
        provider: &(dyn crate::provider::FeatureProvider + '_),
        flag_key: &str,
        default: Self,
        context: &EvaluationContext,
    ) -> EvaluationResult<crate::evaluation::ResolutionDetails<Self>> {
        provider.resolve_string_value(flag_key, &default, context).await
    }

    fn to_generic_value(&self) -> Value {
        Value::String(self.clone())
    }
}

#[async_trait::async_trait]
impl Resolvable for i64 {
    async fn resolve(
        provider: &(dyn crate::provider::FeatureProvider + '_),
        flag_key: &str,
        default: Self,
        context: &EvaluationContext,
    ) -> EvaluationResult<crate::evaluation::ResolutionDetails<Self>> {
        provider.resolve_int_value(flag_key, default, context).await
    }

    fn to_generic_value(&self) -> Value {
        Value::Int(*self)
    }
}

#[async_trait::async_trait]
impl Resolvable for f64 {
    async fn resolve(
        provider: &(dyn crate::provider::FeatureProvider + '_),
        flag_key: &str,
        default: Self,
        context: &EvaluationContext,
    ) -> EvaluationResult<crate::evaluation::ResolutionDetails<Self>> {
        provider.resolve_float_value(flag_key, default, context).await
    }

    fn to_generic_value(&self) -> Value {
        Value::Float(*self)
    }
}

#[async_trait::async_trait]
impl Resolvable for StructValue {
    async fn resolve(
        provider: &(dyn crate::provider::FeatureProvider + '_),
        flag_key: &str,
        default: Self,
        context: &EvaluationContext,
    ) -> EvaluationResult<crate::evaluation::ResolutionDetails<Self>> {
        provider.resolve_object_value(flag_key, default, context).await
    }

    fn to_generic_value(&self) -> Value {
        Value::Struct(self.clone())
    }
}
