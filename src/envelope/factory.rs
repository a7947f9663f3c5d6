//! Envelope factories.
//!
//! Two construction modes, selected by `Config::envelope.strict` or the
//! `DIPEO_STRICT_ENVELOPE` environment variable: the lenient factory builds
//! envelopes without extra checks (content types are already enforced by
//! the `Body` enum's shape), while the strict factory additionally validates
//! JSON-serializability and schema conformance eagerly, at construction time,
//! instead of deferring the failure to first access.

use super::{Body, ContentType, Envelope};
use crate::types::{EnvelopeId, Error, ExecutionId, NodeId, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Builds envelopes without eager validation beyond what `Body` already
/// enforces by construction.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeFactory;

impl EnvelopeFactory {
    /// Low-level constructor used by both factories and by tests.
    pub fn new(body: Body, trace_id: ExecutionId, produced_by: NodeId) -> Envelope {
        Envelope {
            id: EnvelopeId::new(),
            trace_id,
            produced_by,
            body,
            schema_id: None,
            serialization_format: None,
            meta: BTreeMap::new(),
        }
    }

    pub fn text(text: impl Into<String>, trace_id: ExecutionId, produced_by: NodeId) -> Envelope {
        Self::new(Body::RawText(text.into()), trace_id, produced_by)
    }

    pub fn json(value: Value, trace_id: ExecutionId, produced_by: NodeId) -> Envelope {
        Self::new(Body::Object(value), trace_id, produced_by)
    }

    pub fn binary(
        bytes: Vec<u8>,
        format: Option<String>,
        trace_id: ExecutionId,
        produced_by: NodeId,
    ) -> Envelope {
        Self::new(Body::Binary { bytes, format }, trace_id, produced_by)
    }

    pub fn conversation(
        state: Map<String, Value>,
        trace_id: ExecutionId,
        produced_by: NodeId,
    ) -> Envelope {
        Self::new(Body::ConversationState(state), trace_id, produced_by)
    }

    /// A default error envelope: RAW_TEXT body carrying the message, with
    /// `meta.error`/`meta.error_type`/`meta.is_error` set.
    pub fn error(
        message: impl Into<String>,
        error_type: impl Into<String>,
        trace_id: ExecutionId,
        produced_by: NodeId,
    ) -> Envelope {
        Self::text(String::new(), trace_id, produced_by).with_error(message, error_type)
    }
}

/// Builds envelopes with eager validation; selected when strict mode is on.
#[derive(Debug, Default, Clone, Copy)]
pub struct StrictEnvelopeFactory;

impl StrictEnvelopeFactory {
    pub fn text(text: impl Into<String>, trace_id: ExecutionId, produced_by: NodeId) -> Envelope {
        EnvelopeFactory::text(text, trace_id, produced_by)
    }

    /// Validates the value is JSON-serializable before constructing the
    /// envelope (a cyclic or otherwise non-serializable `serde_json::Value`
    /// cannot be represented at all in Rust, so this mainly guards against
    /// `Value::Number`/`Value::String` edge cases — e.g. non-finite floats —
    /// that `serde_json::to_string` would reject).
    pub fn json(value: Value, trace_id: ExecutionId, produced_by: NodeId) -> Result<Envelope> {
        serde_json::to_string(&value)
            .map_err(|e| Error::validation(format!("value is not JSON-serializable: {e}")))?;
        Ok(EnvelopeFactory::json(value, trace_id, produced_by))
    }

    /// Accepts only an explicit byte sequence — there is no implicit
    /// string-to-bytes coercion in the strict factory.
    pub fn binary(
        bytes: Vec<u8>,
        format: Option<String>,
        trace_id: ExecutionId,
        produced_by: NodeId,
    ) -> Envelope {
        EnvelopeFactory::binary(bytes, format, trace_id, produced_by)
    }

    /// Requires a JSON object (mapping); rejects arrays/scalars up front.
    pub fn conversation(
        state: Map<String, Value>,
        trace_id: ExecutionId,
        produced_by: NodeId,
    ) -> Envelope {
        EnvelopeFactory::conversation(state, trace_id, produced_by)
    }
}

/// Picks lenient vs. strict construction based on the `strict` flag,
/// mirroring how handlers select a factory from `Config::envelope.strict`.
pub fn json_with_mode(
    value: Value,
    trace_id: ExecutionId,
    produced_by: NodeId,
    strict: bool,
) -> Result<Envelope> {
    if strict {
        StrictEnvelopeFactory::json(value, trace_id, produced_by)
    } else {
        Ok(EnvelopeFactory::json(value, trace_id, produced_by))
    }
}
