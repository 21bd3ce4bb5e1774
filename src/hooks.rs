//! The stage-ordered hook pipeline: `before`/`after`/`error`/`finally`
//! callbacks run around every evaluation, with failure isolation.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::client::ClientMetadata;
use crate::context::EvaluationContext;
use crate::error::{EvaluationError, EvaluationErrorCode, EvaluationResult};
use crate::evaluation::{EvaluationReason, FlagValueType};
use crate::logging::Logger;
use crate::provider::ProviderMetadata;
use crate::value::Value;

/// Immutable, per-invocation string-keyed data passed to every hook stage.
#[derive(Debug, Clone, Default)]
pub struct HookHints {
    values: BTreeMap<String, Value>,
}

impl HookHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// The read-only bundle each hook stage observes.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub flag_key: String,
    pub flag_type: FlagValueType,
    pub default_value: Value,
    pub client_metadata: ClientMetadata,
    pub provider_metadata: ProviderMetadata,
    pub evaluation_context: EvaluationContext,
}

/// A type-erased view of [`crate::evaluation::EvaluationDetails`] for hook
/// consumption. Hooks are registered once and apply across every flag type,
/// so they cannot be generic over `T`; the typed orchestrator narrows this
/// back into a concrete `EvaluationDetails<T>` before returning to the
/// caller.
#[derive(Debug, Clone)]
pub struct HookEvaluationDetails {
    pub flag_key: String,
    pub flag_type: FlagValueType,
    pub value: Value,
    pub variant: Option<String>,
    pub reason: Option<EvaluationReason>,
}

/// A callback bundle invoked around evaluation. Every stage defaults to a
/// no-op so a hook author overrides only the stages they need.
pub trait Hook: Send + Sync {
    fn before(
        &self,
        _ctx: &HookContext,
        _hints: &HookHints,
    ) -> Result<Option<EvaluationContext>, EvaluationError> {
        Ok(None)
    }

    fn after(
        &self,
        _ctx: &HookContext,
        _details: &HookEvaluationDetails,
        _hints: &HookHints,
    ) -> Result<(), EvaluationError> {
        Ok(())
    }

    fn error(&self, _ctx: &HookContext, _error: &EvaluationError, _hints: &HookHints) {}

    fn finally(&self, _ctx: &HookContext, _hints: &HookHints) {}
}

fn panicked_as_error(stage: &str) -> EvaluationError {
    EvaluationError::builder()
        .code(EvaluationErrorCode::General(format!("hook panicked in {stage} stage")))
        .build()
}

/// Runs the `before` chain outer-in, additively merging each hook's output
/// on top of `base_context` (first hook to set a key wins among the `before`
/// outputs themselves; the accumulated patch as a whole then outranks
/// `base_context` per the usual merge precedence). Halts and returns the
/// underlying error on the first failing (or panicking) hook.
pub fn run_before_chain(
    hooks: &[Arc<dyn Hook>],
    base: &HookContext,
    base_context: &EvaluationContext,
    hints: &HookHints,
) -> EvaluationResult<EvaluationContext> {
    let mut patch = EvaluationContext::default();
    let mut running = HookContext {
        evaluation_context: base_context.clone(),
        ..base.clone()
    };

    for hook in hooks {
        let outcome = catch_unwind(AssertUnwindSafe(|| hook.before(&running, hints)));
        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(panicked_as_error("before")),
        };

        match result {
            Ok(Some(returned)) => {
                if patch.targeting_key.is_none() {
                    patch.targeting_key = returned.targeting_key.clone();
                }
                for (k, v) in returned.custom_fields {
                    patch.custom_fields.entry(k).or_insert(v);
                }
                running.evaluation_context = crate::context::merge(&[base_context, &patch]);
            }
            Ok(None) => {}
            Err(err) => return Err(err),
        }
    }

    Ok(crate::context::merge(&[base_context, &patch]))
}

/// Runs the `after` chain inner-out. Halts on the first failing (or
/// panicking) hook and returns that error; hooks before the failure have
/// already run and cannot be un-run.
pub fn run_after_chain(
    hooks_inner_out: &[Arc<dyn Hook>],
    ctx: &HookContext,
    details: &HookEvaluationDetails,
    hints: &HookHints,
) -> EvaluationResult<()> {
    for hook in hooks_inner_out {
        let outcome = catch_unwind(AssertUnwindSafe(|| hook.after(ctx, details, hints)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(panicked_as_error("after")),
        }
    }
    Ok(())
}

/// Runs the `error` stage on every hook, inner-out. Fully isolated: one
/// hook's panic is logged and does not stop the others.
pub fn run_error_chain(
    hooks_inner_out: &[Arc<dyn Hook>],
    ctx: &HookContext,
    error: &EvaluationError,
    hints: &HookHints,
    logger: &dyn Logger,
) {
    for hook in hooks_inner_out {
        let outcome = catch_unwind(AssertUnwindSafe(|| hook.error(ctx, error, hints)));
        if outcome.is_err() {
            logger.log_error(&format!(
                "hook panicked in error stage for flag '{}'",
                ctx.flag_key
            ));
        }
    }
}

/// Runs the `finally` stage on every hook, inner-out. Fully isolated.
pub fn run_finally_chain(
    hooks_inner_out: &[Arc<dyn Hook>],
    ctx: &HookContext,
    hints: &HookHints,
    logger: &dyn Logger,
) {
    for hook in hooks_inner_out {
        let outcome = catch_unwind(AssertUnwindSafe(|| hook.finally(ctx, hints)));
        if outcome.is_err() {
            logger.log_error(&format!(
                "hook panicked in finally stage for flag '{}'",
                ctx.flag_key
            ));
        }
    }
}

/// Orders hooks outer-in for `before`: API, client, invocation, provider.
pub fn before_order(
    api: &[Arc<dyn Hook>],
    client: &[Arc<dyn Hook>],
    invocation: &[Arc<dyn Hook>],
    provider: &[Arc<dyn Hook>],
) -> Vec<Arc<dyn Hook>> {
    api.iter()
        .chain(client.iter())
        .chain(invocation.iter())
        .chain(provider.iter())
        .cloned()
        .collect()
}

/// The reverse of [`before_order`], used for `after`/`error`/`finally`.
pub fn reverse_order(before_order: &[Arc<dyn Hook>]) -> Vec<Arc<dyn Hook>> {
    before_order.iter().rev().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::TracingLogger;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn base_ctx() -> HookContext {
        HookContext {
            flag_key: "flag".to_string(),
            flag_type: FlagValueType::Boolean,
            default_value: Value::Bool(false),
            client_metadata: ClientMetadata::new("test-client"),
            provider_metadata: ProviderMetadata::new("test-provider"),
            evaluation_context: EvaluationContext::default(),
        }
    }

    struct RecordingHook {
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Hook for RecordingHook {
        fn before(
            &self,
            _ctx: &HookContext,
            _hints: &HookHints,
        ) -> Result<Option<EvaluationContext>, EvaluationError> {
            self.order.lock().unwrap().push(self.name);
            Ok(None)
        }

        fn after(
            &self,
            _ctx: &HookContext,
            _details: &HookEvaluationDetails,
            _hints: &HookHints,
        ) -> Result<(), EvaluationError> {
            self.order.lock().unwrap().push(self.name);
            Ok(())
        }
    }

    #[test]
    fn before_and_after_are_mirror_ordered() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let api: Vec<Arc<dyn Hook>> = vec![Arc::new(RecordingHook { name: "api", order: order.clone() })];
        let client: Vec<Arc<dyn Hook>> = vec![Arc::new(RecordingHook { name: "client", order: order.clone() })];
        let invocation: Vec<Arc<dyn Hook>> = vec![Arc::new(RecordingHook { name: "invocation", order: order.clone() })];
        let provider: Vec<Arc<dyn Hook>> = vec![Arc::new(RecordingHook { name: "provider", order: order.clone() })];

        let before = before_order(&api, &client, &invocation, &provider);
        let ctx = base_ctx();
        let base_context = EvaluationContext::default();
        let hints = HookHints::new();
        run_before_chain(&before, &ctx, &base_context, &hints).unwrap();

        let after = reverse_order(&before);
        let details = HookEvaluationDetails {
            flag_key: "flag".to_string(),
            flag_type: FlagValueType::Boolean,
            value: Value::Bool(true),
            variant: None,
            reason: None,
        };
        run_after_chain(&after, &ctx, &details, &hints).unwrap();

        assert_eq!(
            order.lock().unwrap().as_slice(),
            ["api", "client", "invocation", "provider", "provider", "invocation", "client", "api"]
        );
    }

    struct SetsKey {
        key: &'static str,
        value: &'static str,
    }

    impl Hook for SetsKey {
        fn before(
            &self,
            _ctx: &HookContext,
            _hints: &HookHints,
        ) -> Result<Option<EvaluationContext>, EvaluationError> {
            Ok(Some(
                EvaluationContext::new().with_custom_field(self.key, self.value),
            ))
        }
    }

    #[test]
    fn earlier_before_hook_wins_on_conflicting_keys() {
        let hooks: Vec<Arc<dyn Hook>> = vec![
            Arc::new(SetsKey { key: "k", value: "outer" }),
            Arc::new(SetsKey { key: "k", value: "inner" }),
        ];
        let ctx = base_ctx();
        let base_context = EvaluationContext::default();
        let merged = run_before_chain(&hooks, &ctx, &base_context, &HookHints::new()).unwrap();
        assert_eq!(
            merged.custom_fields.get("k"),
            Some(&crate::context::EvaluationContextFieldValue::String("outer".to_string()))
        );
    }

    #[test]
    fn before_output_overrides_base_context() {
        let hooks: Vec<Arc<dyn Hook>> = vec![Arc::new(SetsKey { key: "mult", value: "3" })];
        let ctx = base_ctx();
        let base_context = EvaluationContext::new().with_custom_field("mult", "1");
        let merged = run_before_chain(&hooks, &ctx, &base_context, &HookHints::new()).unwrap();
        assert_eq!(
            merged.custom_fields.get("mult"),
            Some(&crate::context::EvaluationContextFieldValue::String("3".to_string()))
        );
    }

    struct FailingBefore;
    impl Hook for FailingBefore {
        fn before(
            &self,
            _ctx: &HookContext,
            _hints: &HookHints,
        ) -> Result<Option<EvaluationContext>, EvaluationError> {
            Err(EvaluationError::builder()
                .code(EvaluationErrorCode::General("nope".to_string()))
                .build())
        }
    }

    #[test]
    fn before_chain_halts_on_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        struct CountingHook(Arc<AtomicUsize>);
        impl Hook for CountingHook {
            fn before(
                &self,
                _ctx: &HookContext,
                _hints: &HookHints,
            ) -> Result<Option<EvaluationContext>, EvaluationError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        }
        let hooks: Vec<Arc<dyn Hook>> = vec![
            Arc::new(FailingBefore),
            Arc::new(CountingHook(calls.clone())),
        ];
        let ctx = base_ctx();
        let base_context = EvaluationContext::default();
        let result = run_before_chain(&hooks, &ctx, &base_context, &HookHints::new());
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    struct PanicsOnError;
    impl Hook for PanicsOnError {
        fn error(&self, _ctx: &HookContext, _error: &EvaluationError, _hints: &HookHints) {
            panic!("boom");
        }
    }

    #[test]
    fn error_stage_panic_does_not_stop_other_hooks() {
        let ran = Arc::new(AtomicUsize::new(0));
        struct CountingErrorHook(Arc<AtomicUsize>);
        impl Hook for CountingErrorHook {
            fn error(&self, _ctx: &HookContext, _error: &EvaluationError, _hints: &HookHints) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let hooks: Vec<Arc<dyn Hook>> = vec![Arc::new(PanicsOnError), Arc::new(CountingErrorHook(ran.clone()))];
        let ctx = base_ctx();
        let err = EvaluationError::builder().code(EvaluationErrorCode::General("x".to_string())).build();
        run_error_chain(&hooks, &ctx, &err, &HookHints::new(), &TracingLogger);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
