//! The provider capability contract: what every flag-resolution backend
//! must implement to be registered with the SDK.

mod noop;

pub use noop::NoopProvider;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::context::EvaluationContext;
use crate::error::EvaluationResult;
use crate::evaluation::ResolutionDetails;
use crate::hooks::Hook;
use crate::value::{StructValue, Value};
use std::sync::Arc;

/// Identifying information for a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub name: String,
}

impl ProviderMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A provider's lifecycle state, as observed by the event executor for
/// late-subscribe replay and by evaluations that want to surface
/// `ProviderNotReady` before init completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    NotReady,
    Ready,
    Stale,
    Error,
}

/// One of the closed set of lifecycle/config-change events a provider can
/// emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Ready,
    Error,
    Stale,
    ConfigChange,
}

/// A single event emitted by a provider, received by the event executor's
/// per-provider listener task.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub originating_provider: String,
    pub message: Option<String>,
    pub changed_flags: Vec<String>,
    pub metadata: HashMap<String, Value>,
}

impl Event {
    pub fn new(event_type: EventType, originating_provider: impl Into<String>) -> Self {
        Self {
            event_type,
            originating_provider: originating_provider.into(),
            message: None,
            changed_flags: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_changed_flags(mut self, flags: Vec<String>) -> Self {
        self.changed_flags = flags;
        self
    }
}

/// A provider's event stream, handed to the executor exactly once per
/// registration.
pub type EventReceiver = tokio::sync::mpsc::Receiver<Event>;

/// The capability contract every registered provider implements.
///
/// Lifecycle (`initialize`/`shutdown`/`status`) and eventing
/// (`event_stream`) are modeled as defaulted methods rather than separate
/// optional traits: Rust has no interface reflection, so "detect capability
/// by interface query" (see the SDK's design notes) reads idiomatically as
/// "call the method and see what it returns" — a provider that doesn't need
/// lifecycle hooks or events simply keeps the no-op/`None` default.
#[async_trait]
pub trait FeatureProvider: Send + Sync {
    fn metadata(&self) -> &ProviderMetadata;

    async fn resolve_bool_value(
        &self,
        flag_key: &str,
        default_value: bool,
        context: &EvaluationContext,
    ) -> EvaluationResult<ResolutionDetails<bool>>;

    async fn resolve_string_value(
        &self,
        flag_key: &str,
        default_value: &str,
        context: &EvaluationContext,
    ) -> EvaluationResult<ResolutionDetails<String>>;

    async fn resolve_int_value(
        &self,
        flag_key: &str,
        default_value: i64,
        context: &EvaluationContext,
    ) -> EvaluationResult<ResolutionDetails<i64>>;

    async fn resolve_float_value(
        &self,
        flag_key: &str,
        default_value: f64,
        context: &EvaluationContext,
    ) -> EvaluationResult<ResolutionDetails<f64>>;

    async fn resolve_object_value(
        &self,
        flag_key: &str,
        default_value: StructValue,
        context: &EvaluationContext,
    ) -> EvaluationResult<ResolutionDetails<StructValue>>;

    /// Hooks bundled with this provider, run innermost in the `before`
    /// chain and outermost-adjacent in `after`/`error`/`finally`.
    fn hooks(&self) -> Vec<Arc<dyn Hook>> {
        Vec::new()
    }

    async fn initialize(&self, _global_context: &EvaluationContext) -> EvaluationResult<()> {
        Ok(())
    }

    async fn shutdown(&self) {}

    fn status(&self) -> ProviderStatus {
        ProviderStatus::Ready
    }

    /// Returns the provider's event stream the first time it is called, and
    /// `None` on every subsequent call — the executor takes ownership of
    /// the receiver exactly once per provider registration.
    fn event_stream(&self) -> Option<EventReceiver> {
        None
    }
}
