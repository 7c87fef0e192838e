//! Inbound training update frames.
//!
//! Training servers disagree on field casing, so each logical field has an
//! ordered alias list. The first alias present with a non-null value wins.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::attention_viz::{normalize, CanonicalAttention};
use crate::loss_series::LossPoint;

/// Accepted keys for the step counter, in priority order.
pub const STEP_ALIASES: &[&str] = &["step", "STEP"];
/// Accepted keys for the loss value, in priority order.
pub const LOSS_ALIASES: &[&str] = &["loss", "LOSS"];
/// Accepted keys for the attention payload, in priority order.
pub const ATTENTION_ALIASES: &[&str] = &["attention_weights", "ATTENTION_WEIGHTS", "attentionWeights"];

/// Errors raised while parsing a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// One parsed frame, with aliases already resolved.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrainingUpdate {
    pub step: Option<f64>,
    pub loss: Option<f64>,
    /// Normalized attention, present only if the frame carried the field.
    pub attention: Option<CanonicalAttention>,
}

impl TrainingUpdate {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    /// Build from an already-decoded JSON value.
    pub fn from_value(value: &Value) -> Result<Self, FrameError> {
        let object = value
            .as_object()
            .ok_or_else(|| FrameError::NotAnObject(json_kind(value)))?;

        Ok(Self {
            step: lookup(object, STEP_ALIASES).and_then(Value::as_f64),
            loss: lookup(object, LOSS_ALIASES).and_then(Value::as_f64),
            attention: lookup(object, ATTENTION_ALIASES).map(|raw| normalize(Some(raw))),
        })
    }

    /// The loss point, only when both step and loss are present.
    pub fn loss_point(&self) -> Option<LossPoint> {
        match (self.step, self.loss) {
            (Some(step), Some(loss)) => Some(LossPoint::new(step, loss)),
            _ => None,
        }
    }
}

fn lookup<'a>(object: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|key| object.get(*key))
        .find(|v| !v.is_null())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
