//! Event Emitter (C11) — publishes diagram lifecycle events to decoupled
//! subscribers. Delivery is best-effort; a subscriber that's gone (channel
//! closed) is simply dropped, never treated as an engine error.

pub mod translation;

pub use translation::translate_event;

use crate::types::{EnvelopeId, ExecutionId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Lifecycle event kinds published over the course of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    ExecutionStarted,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionAborted,
    WebhookReceived,
}

/// One published lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub execution_id: ExecutionId,
    pub kind: EventKind,
    pub node_id: Option<NodeId>,
    pub status: String,
    pub envelope_id: Option<EnvelopeId>,
    pub timestamp: DateTime<Utc>,
    pub meta: Value,
}

impl Event {
    pub fn new(execution_id: ExecutionId, kind: EventKind, status: impl Into<String>) -> Self {
        Self {
            execution_id,
            kind,
            node_id: None,
            status: status.into(),
            envelope_id: None,
            timestamp: Utc::now(),
            meta: Value::Null,
        }
    }

    pub fn with_node(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_envelope(mut self, envelope_id: EnvelopeId) -> Self {
        self.envelope_id = Some(envelope_id);
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }
}

/// Fire-and-forget broadcast of lifecycle events. Subscribers that lag too
/// far behind (beyond the channel capacity) miss events rather than stall
/// the publisher — matches "delivery is best-effort".
pub struct EventEmitter {
    sender: broadcast::Sender<Event>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publishes `event`. A send with zero subscribers is not an error —
    /// it's the common case between the first publish and the first
    /// `subscribe`.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
