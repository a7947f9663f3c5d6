//! Envelope — the immutable, typed message passed between nodes.
//!
//! An envelope's `body` is a tagged union (`Body`); the active variant
//! determines its `content_type`. All mutation returns a new envelope —
//! there is no `&mut self` method on `Envelope` anywhere in this module.

mod factory;
mod protocol;

pub use factory::{EnvelopeFactory, StrictEnvelopeFactory};
pub use protocol::{deserialize_protocol, serialize_protocol, ProtocolEnvelope};

use crate::types::{EnvelopeId, Error, ExecutionId, NodeId, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Discriminant for `Envelope::body`. Kept separate from `Body` itself so
/// it can travel on the wire (`ProtocolEnvelope::content_type`) without
/// dragging the payload along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    RawText,
    Object,
    Binary,
    ConversationState,
}

/// The typed payload of an envelope. Exactly one variant is active; the
/// variant itself is the `content_type` (invariant I5 / I7 by construction).
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    RawText(String),
    Object(Value),
    Binary {
        bytes: Vec<u8>,
        format: Option<String>,
    },
    ConversationState(Map<String, Value>),
}

impl Body {
    pub fn content_type(&self) -> ContentType {
        match self {
            Body::RawText(_) => ContentType::RawText,
            Body::Object(_) => ContentType::Object,
            Body::Binary { .. } => ContentType::Binary,
            Body::ConversationState(_) => ContentType::ConversationState,
        }
    }
}

/// Immutable, typed message passed between nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    id: EnvelopeId,
    trace_id: ExecutionId,
    produced_by: NodeId,
    body: Body,
    schema_id: Option<String>,
    serialization_format: Option<String>,
    meta: BTreeMap<String, Value>,
}

impl Envelope {
    pub fn id(&self) -> &EnvelopeId {
        &self.id
    }

    pub fn trace_id(&self) -> &ExecutionId {
        &self.trace_id
    }

    pub fn produced_by(&self) -> &NodeId {
        &self.produced_by
    }

    pub fn content_type(&self) -> ContentType {
        self.body.content_type()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn schema_id(&self) -> Option<&str> {
        self.schema_id.as_deref()
    }

    pub fn serialization_format(&self) -> Option<&str> {
        self.serialization_format.as_deref()
    }

    pub fn meta(&self) -> &BTreeMap<String, Value> {
        &self.meta
    }

    /// An envelope is an error envelope iff `meta.error` is non-empty.
    pub fn is_error(&self) -> bool {
        self.meta
            .get("error")
            .map(|v| !matches!(v, Value::Null) && v != &Value::String(String::new()))
            .unwrap_or(false)
    }

    /// Returns a new envelope with `key` set to `value` in `meta`. Does not
    /// mutate `self`.
    pub fn with_meta(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut meta = self.meta.clone();
        meta.insert(key.into(), value.into());
        Self {
            meta,
            ..self.clone()
        }
    }

    pub fn with_iteration(&self, iteration: u32) -> Self {
        self.with_meta("iteration", iteration)
    }

    pub fn with_branch(&self, branch_id: impl Into<String>) -> Self {
        self.with_meta("branch_id", branch_id.into())
    }

    /// Returns a new error envelope derived from this one: same trace/producer,
    /// RAW_TEXT body carrying the message, with `meta.error`/`meta.error_type` set.
    pub fn with_error(&self, message: impl Into<String>, error_type: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            id: EnvelopeId::new(),
            trace_id: self.trace_id.clone(),
            produced_by: self.produced_by.clone(),
            body: Body::RawText(message.clone()),
            schema_id: None,
            serialization_format: None,
            meta: {
                let mut meta = self.meta.clone();
                meta.insert("error".to_string(), Value::String(message));
                meta.insert("error_type".to_string(), Value::String(error_type.into()));
                meta.insert("is_error".to_string(), Value::Bool(true));
                meta
            },
        }
    }

    // ---- lenient accessors: best-effort coercion across content types ----

    pub fn as_text(&self) -> Result<String> {
        match &self.body {
            Body::RawText(s) => Ok(s.clone()),
            Body::Object(v) => Ok(v.to_string()),
            Body::Binary { bytes, .. } => String::from_utf8(bytes.clone())
                .map_err(|e| Error::validation(format!("cannot convert BINARY to RAW_TEXT: {e}"))),
            Body::ConversationState(m) => Ok(Value::Object(m.clone()).to_string()),
        }
    }

    pub fn as_json(&self) -> Result<Value> {
        match &self.body {
            Body::Object(v) => Ok(v.clone()),
            Body::RawText(s) => serde_json::from_str(s)
                .map_err(|e| Error::validation(format!("cannot convert RAW_TEXT to OBJECT: {e}"))),
            Body::ConversationState(m) => Ok(Value::Object(m.clone())),
            Body::Binary { .. } => Err(Error::validation(
                "cannot convert BINARY to OBJECT".to_string(),
            )),
        }
    }

    /// As `as_json`, additionally validating the result against a JSON
    /// Schema when one is supplied (mirrors `schema_id`-bound validation).
    pub fn as_json_validated(&self, schema: &Value) -> Result<Value> {
        let value = self.as_json()?;
        let compiled = jsonschema::validator_for(schema)
            .map_err(|e| Error::validation(format!("invalid schema: {e}")))?;
        if let Err(err) = compiled.validate(&value) {
            return Err(Error::validation(format!("schema validation failed: {err}")));
        }
        Ok(value)
    }

    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        match &self.body {
            Body::Binary { bytes, .. } => Ok(bytes.clone()),
            Body::RawText(s) => Ok(s.as_bytes().to_vec()),
            Body::Object(v) => Ok(v.to_string().into_bytes()),
            Body::ConversationState(m) => Ok(Value::Object(m.clone()).to_string().into_bytes()),
        }
    }

    pub fn as_conversation(&self) -> Result<Map<String, Value>> {
        match &self.body {
            Body::ConversationState(m) => Ok(m.clone()),
            Body::Object(Value::Object(m)) => Ok(m.clone()),
            _ => Err(Error::validation(
                "cannot convert envelope to CONVERSATION_STATE".to_string(),
            )),
        }
    }

    // ---- strict accessors: refuse any implicit conversion ----

    pub fn to_text(&self) -> Result<&str> {
        match &self.body {
            Body::RawText(s) => Ok(s.as_str()),
            other => Err(mismatch_error(ContentType::RawText, other.content_type())),
        }
    }

    pub fn to_json(&self) -> Result<&Value> {
        match &self.body {
            Body::Object(v) => Ok(v),
            other => Err(mismatch_error(ContentType::Object, other.content_type())),
        }
    }

    pub fn to_bytes(&self) -> Result<&[u8]> {
        match &self.body {
            Body::Binary { bytes, .. } => Ok(bytes),
            other => Err(mismatch_error(ContentType::Binary, other.content_type())),
        }
    }

    pub fn to_conversation(&self) -> Result<&Map<String, Value>> {
        match &self.body {
            Body::ConversationState(m) => Ok(m),
            other => Err(mismatch_error(ContentType::ConversationState, other.content_type())),
        }
    }
}

fn mismatch_error(expected: ContentType, actual: ContentType) -> Error {
    Error::validation(format!(
        "cannot convert {actual:?} to {expected:?}: content_type mismatch"
    ))
}
