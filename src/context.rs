//! Evaluation context: the targeting subject and attributes passed into a
//! resolution call, and the merge rules that combine its layers.

use std::collections::BTreeMap;

use crate::value::StructValue;

/// A single context attribute value.
///
/// Distinct from [`crate::value::Value`] only in that a context attribute may
/// carry a timestamp, which providers commonly need for freshness/windowing
/// targeting rules but which a resolved flag value never is.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum EvaluationContextFieldValue {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    DateTime(String),
    Struct(StructValue),
}

impl From<&str> for EvaluationContextFieldValue {
    fn from(v: &str) -> Self {
        EvaluationContextFieldValue::String(v.to_string())
    }
}

impl From<String> for EvaluationContextFieldValue {
    fn from(v: String) -> Self {
        EvaluationContextFieldValue::String(v)
    }
}

impl From<bool> for EvaluationContextFieldValue {
    fn from(v: bool) -> Self {
        EvaluationContextFieldValue::Bool(v)
    }
}

impl From<i64> for EvaluationContextFieldValue {
    fn from(v: i64) -> Self {
        EvaluationContextFieldValue::Int(v)
    }
}

impl From<f64> for EvaluationContextFieldValue {
    fn from(v: f64) -> Self {
        EvaluationContextFieldValue::Float(v)
    }
}

/// The targeting subject and attributes for one evaluation.
///
/// Immutable once built: every merge allocates a fresh attribute map rather
/// than aliasing a caller's, so a caller mutating its own context after
/// passing it in cannot affect an evaluation already in flight.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct EvaluationContext {
    pub targeting_key: Option<String>,
    pub custom_fields: BTreeMap<String, EvaluationContextFieldValue>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targeting_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.targeting_key = if key.is_empty() { None } else { Some(key) };
        self
    }

    pub fn with_custom_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<EvaluationContextFieldValue>,
    ) -> Self {
        self.custom_fields.insert(key.into(), value.into());
        self
    }
}

/// Merges evaluation context layers with the precedence required for a
/// single evaluation: earlier arguments are lowest priority, later arguments
/// override. The targeting key used is the last non-empty one supplied.
///
/// Per the SDK's hook precedence chain this is called as
/// `merge([api_context, client_context, invocation_context, before_hook_output])`.
pub fn merge(layers: &[&EvaluationContext]) -> EvaluationContext {
    let mut merged = EvaluationContext::default();
    for layer in layers {
        if let Some(key) = &layer.targeting_key {
            merged.targeting_key = Some(key.clone());
        }
        for (k, v) in &layer.custom_fields {
            merged.custom_fields.insert(k.clone(), v.clone());
        }
    }
    merged
}
