//! Wire protocol for envelopes: `serialize_protocol` / `deserialize_protocol`.
//!
//! The wire shape carries an explicit `envelope_format: true` discriminator
//! so a reader can distinguish it from any legacy, undiscriminated shape and
//! refuse to guess.

use super::{Body, ContentType, Envelope};
use crate::types::{EnvelopeId, Error, ExecutionId, NodeId, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// On-the-wire representation of an `Envelope`. `body` is untyped JSON whose
/// shape is dictated by `content_type` (a string for RAW_TEXT, base64 for
/// BINARY, an object for OBJECT/CONVERSATION_STATE).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolEnvelope {
    pub envelope_format: bool,
    pub id: String,
    pub trace_id: String,
    pub produced_by: String,
    pub content_type: ContentType,
    pub schema_id: Option<String>,
    pub serialization_format: Option<String>,
    pub body: Value,
    pub meta: BTreeMap<String, Value>,
}

/// Serializes an envelope to its wire shape.
pub fn serialize_protocol(env: &Envelope) -> ProtocolEnvelope {
    let body = match env.body() {
        Body::RawText(s) => Value::String(s.clone()),
        Body::Object(v) => v.clone(),
        Body::Binary { bytes, format } => {
            use base64::Engine;
            let mut obj = Map::new();
            obj.insert(
                "data_base64".to_string(),
                Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)),
            );
            if let Some(format) = format {
                obj.insert("format".to_string(), Value::String(format.clone()));
            }
            Value::Object(obj)
        }
        Body::ConversationState(m) => Value::Object(m.clone()),
    };

    ProtocolEnvelope {
        envelope_format: true,
        id: env.id().to_string(),
        trace_id: env.trace_id().to_string(),
        produced_by: env.produced_by().to_string(),
        content_type: env.content_type(),
        schema_id: env.schema_id().map(str::to_string),
        serialization_format: env.serialization_format().map(str::to_string),
        body,
        meta: env.meta().clone(),
    }
}

/// Deserializes a wire-shaped value back into an `Envelope`. Requires the
/// `envelope_format: true` discriminator; any other shape (including legacy,
/// pre-envelope protocol shapes) is refused.
pub fn deserialize_protocol(value: &Value) -> Result<Envelope> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::validation("envelope payload must be a JSON object".to_string()))?;

    let is_envelope = obj
        .get("envelope_format")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !is_envelope {
        return Err(Error::validation(
            "missing envelope_format discriminator; refusing legacy payload shape".to_string(),
        ));
    }

    let proto: ProtocolEnvelope = serde_json::from_value(value.clone())?;

    let body = match proto.content_type {
        ContentType::RawText => Body::RawText(
            proto
                .body
                .as_str()
                .ok_or_else(|| Error::validation("RAW_TEXT body must be a string".to_string()))?
                .to_string(),
        ),
        ContentType::Object => Body::Object(proto.body),
        ContentType::Binary => {
            use base64::Engine;
            let obj = proto
                .body
                .as_object()
                .ok_or_else(|| Error::validation("BINARY body must be an object".to_string()))?;
            let data = obj
                .get("data_base64")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::validation("BINARY body missing data_base64".to_string()))?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| Error::validation(format!("invalid base64 in BINARY body: {e}")))?;
            let format = obj.get("format").and_then(Value::as_str).map(str::to_string);
            Body::Binary { bytes, format }
        }
        ContentType::ConversationState => Body::ConversationState(
            proto
                .body
                .as_object()
                .ok_or_else(|| {
                    Error::validation("CONVERSATION_STATE body must be an object".to_string())
                })?
                .clone(),
        ),
    };

    Ok(Envelope {
        id: EnvelopeId::from_string(proto.id)
            .map_err(|e| Error::validation(e.to_string()))?,
        trace_id: ExecutionId::from_string(proto.trace_id)
            .map_err(|e| Error::validation(e.to_string()))?,
        produced_by: NodeId::from_string(proto.produced_by)
            .map_err(|e| Error::validation(e.to_string()))?,
        body,
        schema_id: proto.schema_id,
        serialization_format: proto.serialization_format,
        meta: proto.meta,
    })
}
