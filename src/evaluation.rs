//! Resolution results: the provider's raw answer ([`ResolutionDetails`]) and
//! the caller/hook-facing answer ([`EvaluationDetails`]) it is promoted into.

use crate::error::EvaluationErrorCode;
use crate::value::MetadataMap;

/// Why a provider resolved a flag the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationReason {
    Static,
    Default,
    TargetingMatch,
    Split,
    Disabled,
    Cached,
    Unknown,
    Error,
}

/// The declared type of a flag being evaluated, carried on [`EvaluationDetails`]
/// so hooks can branch on it without re-deriving it from `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagValueType {
    Boolean,
    String,
    Int,
    Float,
    Object,
}

/// Free-form metadata a provider attaches to one resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagMetadata {
    values: MetadataMap,
}

impl FlagMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<crate::value::Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&crate::value::Value> {
        self.values.get(key)
    }
}

/// A provider's answer to one resolve call.
///
/// Built via [`ResolutionDetails::builder`], mirroring the construction
/// style used throughout this ecosystem's provider implementations.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionDetails<T> {
    pub value: T,
    pub variant: Option<String>,
    pub reason: Option<EvaluationReason>,
    pub error_code: Option<EvaluationErrorCode>,
    pub error_message: Option<String>,
    pub flag_metadata: Option<FlagMetadata>,
}

impl<T> ResolutionDetails<T> {
    pub fn builder() -> ResolutionDetailsBuilder<T> {
        ResolutionDetailsBuilder::default()
    }
}

pub struct ResolutionDetailsBuilder<T> {
    value: Option<T>,
    variant: Option<String>,
    reason: Option<EvaluationReason>,
    error_code: Option<EvaluationErrorCode>,
    error_message: Option<String>,
    flag_metadata: Option<FlagMetadata>,
}

impl<T> Default for ResolutionDetailsBuilder<T> {
    fn default() -> Self {
        Self {
            value: None,
            variant: None,
            reason: None,
            error_code: None,
            error_message: None,
            flag_metadata: None,
        }
    }
}

impl<T> ResolutionDetailsBuilder<T> {
    pub fn value(mut self, value: T) -> Self {
        self.value = Some(value);
        self
    }

    pub fn variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn reason(mut self, reason: EvaluationReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn error(mut self, code: EvaluationErrorCode, message: impl Into<String>) -> Self {
        self.error_code = Some(code);
        self.error_message = Some(message.into());
        self
    }

    pub fn flag_metadata(mut self, metadata: FlagMetadata) -> Self {
        self.flag_metadata = Some(metadata);
        self
    }

    /// Panics if `value` was never set. Every resolution, including error
    /// ones, still carries a value slot (typically the provider's own
    /// notion of a default) so that `build()` cannot silently fabricate one.
    pub fn build(self) -> ResolutionDetails<T> {
        ResolutionDetails {
            value: self.value.expect("ResolutionDetailsBuilder::build called without a value"),
            variant: self.variant,
            reason: self.reason,
            error_code: self.error_code,
            error_message: self.error_message,
            flag_metadata: self.flag_metadata,
        }
    }
}

/// [`ResolutionDetails`] augmented with the flag key and declared type —
/// what hooks observe in the `after` stage and what the caller ultimately
/// receives from a `*_details` client method.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationDetails<T> {
    pub flag_key: String,
    pub flag_type: FlagValueType,
    pub value: T,
    pub variant: Option<String>,
    pub reason: Option<EvaluationReason>,
    pub error_code: Option<EvaluationErrorCode>,
    pub error_message: Option<String>,
    pub flag_metadata: Option<FlagMetadata>,
}

impl<T> EvaluationDetails<T> {
    pub fn from_resolution(
        flag_key: impl Into<String>,
        flag_type: FlagValueType,
        details: ResolutionDetails<T>,
    ) -> Self {
        Self {
            flag_key: flag_key.into(),
            flag_type,
            value: details.value,
            variant: details.variant,
            reason: details.reason,
            error_code: details.error_code,
            error_message: details.error_message,
            flag_metadata: details.flag_metadata,
        }
    }

    pub fn default_for(
        flag_key: impl Into<String>,
        flag_type: FlagValueType,
        value: T,
        error: &crate::error::EvaluationError,
    ) -> Self {
        Self {
            flag_key: flag_key.into(),
            flag_type,
            value,
            variant: None,
            reason: Some(EvaluationReason::Error),
            error_code: Some(error.code.clone()),
            error_message: error.message.clone(),
            flag_metadata: None,
        }
    }
}
