//! Event translation — internal lifecycle events → externally-stable shape.
//!
//! Pure, total, side-effect-free mapping. Internal events are tied to this
//! crate's enum/field names; what crosses the wire to a subscriber should
//! stay stable even if the internal representation changes. Events with no
//! external meaning map to `None` and are dropped silently.

use super::{Event, EventKind};
use serde_json::{json, Value};

/// Translates one internal `Event` into `(external_event_type, payload)`, or
/// `None` if the event isn't forwarded externally.
pub fn translate_event(event: &Event) -> Option<(String, Value)> {
    let payload = |extra: Value| {
        let mut base = json!({
            "execution_id": event.execution_id.as_str(),
            "status": event.status,
            "timestamp": event.timestamp.to_rfc3339(),
        });
        if let Some(node_id) = &event.node_id {
            base["node_id"] = json!(node_id.as_str());
        }
        if let Value::Object(extra) = extra {
            if let Value::Object(base) = &mut base {
                base.extend(extra);
            }
        }
        base
    };

    match event.kind {
        EventKind::ExecutionStarted => Some(("execution.started".to_string(), payload(Value::Null))),
        EventKind::ExecutionCompleted => Some(("execution.completed".to_string(), payload(Value::Null))),
        EventKind::ExecutionFailed => Some((
            "execution.failed".to_string(),
            payload(json!({ "error": event.meta.get("error").cloned().unwrap_or(Value::Null) })),
        )),
        EventKind::ExecutionAborted => Some(("execution.aborted".to_string(), payload(Value::Null))),
        EventKind::NodeFailed => Some((
            "node.failed".to_string(),
            payload(json!({ "error": event.meta.get("error").cloned().unwrap_or(Value::Null) })),
        )),
        EventKind::WebhookReceived => Some(("webhook.received".to_string(), payload(Value::Null))),
        // Per-node started/completed chatter is not forwarded externally by
        // default — too high-volume for a generic subscriber; consumers that
        // need it read the tracker directly.
        EventKind::NodeStarted | EventKind::NodeCompleted => None,
    }
}
