//! The closed set of evaluation error kinds and the error type every public
//! resolution boundary returns.

use thiserror::Error;

/// Closed set of error kinds a provider or the hook pipeline can surface.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationErrorCode {
    #[error("provider not ready")]
    ProviderNotReady,
    #[error("flag not found")]
    FlagNotFound,
    #[error("parse error")]
    ParseError,
    #[error("type mismatch")]
    TypeMismatch,
    #[error("targeting key missing")]
    TargetingKeyMissing,
    #[error("invalid context")]
    InvalidContext,
    #[error("{0}")]
    General(String),
}

/// An error surfaced by a provider resolution or by the hook pipeline.
///
/// Carries the closed-set [`EvaluationErrorCode`] plus an optional
/// human-readable message, mirroring how every contributed provider in this
/// ecosystem constructs its errors.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}{}", message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct EvaluationError {
    pub code: EvaluationErrorCode,
    pub message: Option<String>,
}

impl EvaluationError {
    pub fn new(code: EvaluationErrorCode) -> Self {
        Self {
            code,
            message: None,
        }
    }

    pub fn builder() -> EvaluationErrorBuilder {
        EvaluationErrorBuilder::default()
    }
}

#[derive(Default)]
pub struct EvaluationErrorBuilder {
    code: Option<EvaluationErrorCode>,
    message: Option<String>,
}

impl EvaluationErrorBuilder {
    pub fn code(mut self, code: EvaluationErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Panics if `code` was never set — mirrors the ergonomics of the
    /// builders this crate's provider ecosystem already exposes, where the
    /// code is the one field every call site supplies.
    pub fn build(self) -> EvaluationError {
        EvaluationError {
            code: self.code.expect("EvaluationErrorBuilder::build called without a code"),
            message: self.message,
        }
    }
}

/// Result alias used at every resolution boundary.
pub type EvaluationResult<T> = Result<T, EvaluationError>;
