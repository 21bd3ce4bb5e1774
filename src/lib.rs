//! An OpenFeature-style feature-flag evaluation SDK core.
//!
//! Register one or more [`provider::FeatureProvider`] implementations,
//! obtain a [`client::Client`] by name from [`api::OpenFeature`], and
//! evaluate flags against whichever provider is currently bound to that
//! name. [`hooks::Hook`]s observe every evaluation; [`events::EventExecutor`]
//! notifies subscribers of provider lifecycle and config-change events.

pub mod api;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluation;
pub mod events;
pub mod hooks;
pub mod logging;
pub mod provider;
pub mod registry;
pub mod value;

pub use api::OpenFeature;
pub use client::{Client, ClientMetadata, EvaluationOptions};
pub use context::{EvaluationContext, EvaluationContextFieldValue};
pub use error::{EvaluationError, EvaluationErrorCode, EvaluationResult};
pub use evaluation::{EvaluationDetails, EvaluationReason, FlagMetadata, FlagValueType, ResolutionDetails};
pub use events::{EventDetails, EventHandler, HandlerToken};
pub use hooks::{Hook, HookContext, HookEvaluationDetails, HookHints};
pub use logging::{Logger, LoggerHandle, TracingLogger};
pub use provider::{Event, EventType, FeatureProvider, NoopProvider, ProviderMetadata, ProviderStatus};
pub use value::{MetadataMap, StructValue, Value};
