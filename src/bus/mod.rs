//! Token Bus (C6) — per-execution, in-process envelope bus keyed by
//! `(consumer_node_id, port_name)`.
//!
//! A single mutex guards the whole bus; `emit_outputs_as_tokens` and
//! `consume_inbound` are each atomic with respect to the other, so a
//! consumer never observes a partial deposit from a concurrent emit.

use crate::diagram::Diagram;
use crate::envelope::Envelope;
use crate::types::NodeId;
use std::collections::HashMap;
use std::sync::Mutex;

/// Envelopes deposited for one `(consumer, port)` pair, in emission order.
#[derive(Default)]
struct Mailbox {
    by_port: HashMap<String, Vec<Envelope>>,
}

/// Per-execution envelope bus. Delivery is at-most-once per run of the
/// consumer: `consume_inbound` drains everything currently addressed to a
/// node and nothing more arrives until a producer emits again.
#[derive(Default)]
pub struct TokenBus {
    mailboxes: Mutex<HashMap<NodeId, Mailbox>>,
}

impl std::fmt::Debug for TokenBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mailboxes = self.mailboxes.lock().expect("token bus lock poisoned");
        f.debug_struct("TokenBus")
            .field("pending_consumers", &mailboxes.len())
            .finish()
    }
}

impl TokenBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks `diagram`'s edges leaving `(producer, port)` for each entry in
    /// `outputs` and deposits the envelope at each edge's target. Producer
    /// emission order is preserved per edge (per-port `outputs` is iterated
    /// in the order callers supply it).
    pub fn emit_outputs_as_tokens(
        &self,
        diagram: &Diagram,
        producer: &NodeId,
        outputs: Vec<(String, Envelope)>,
    ) {
        let mut mailboxes = self.mailboxes.lock().expect("token bus lock poisoned");
        for (port, envelope) in outputs {
            for edge in diagram.outgoing(producer, &port) {
                mailboxes
                    .entry(edge.to_node.clone())
                    .or_default()
                    .by_port
                    .entry(edge.to_port.clone())
                    .or_default()
                    .push(envelope.clone());
            }
        }
    }

    /// Atomically removes and returns every envelope currently addressed to
    /// `node`, keyed by port. Returns `None` if nothing is pending — a
    /// rerun of the consumer only sees envelopes deposited since its last
    /// consume, never leftovers.
    ///
    /// When multiple envelopes have queued for the same port (a consumer
    /// that hasn't drained since an earlier emission), only the most
    /// recently deposited one is delivered on that port — matches "last
    /// envelope per port is additionally stored in Execution State" (§3).
    pub fn consume_inbound(&self, node: &NodeId) -> Option<HashMap<String, Envelope>> {
        let mut mailboxes = self.mailboxes.lock().expect("token bus lock poisoned");
        let mailbox = mailboxes.remove(node)?;
        if mailbox.by_port.is_empty() {
            return None;
        }
        Some(
            mailbox
                .by_port
                .into_iter()
                .filter_map(|(port, mut envelopes)| envelopes.pop().map(|e| (port, e)))
                .collect(),
        )
    }

    /// True iff `node` currently has at least one envelope waiting.
    pub fn has_pending(&self, node: &NodeId) -> bool {
        self.mailboxes
            .lock()
            .expect("token bus lock poisoned")
            .get(node)
            .map(|m| !m.by_port.is_empty())
            .unwrap_or(false)
    }

    /// True iff `node` has an envelope waiting on `port` specifically, used
    /// by the scheduler's readiness check (non-destructive — does not drain).
    pub fn has_port(&self, node: &NodeId, port: &str) -> bool {
        self.mailboxes
            .lock()
            .expect("token bus lock poisoned")
            .get(node)
            .map(|m| m.by_port.get(port).map(|v| !v.is_empty()).unwrap_or(false))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::{Edge, Node, NodeSchema};
    use crate::envelope::EnvelopeFactory;
    use crate::types::ExecutionId;
    use std::collections::BTreeMap;

    fn schema() -> NodeSchema {
        NodeSchema {
            node_type: "raw_text_echo".to_string(),
            inbound_ports: vec![],
            outbound_ports: vec!["default".to_string()],
            max_iteration: None,
            retry_policy: None,
        }
    }

    fn diagram_with_edge(from: &str, to: &str) -> Diagram {
        let mut d = Diagram::new();
        d.add_node(Node {
            id: NodeId::from(from),
            schema: schema(),
            resolved_inputs: BTreeMap::new(),
        });
        d.add_node(Node {
            id: NodeId::from(to),
            schema: schema(),
            resolved_inputs: BTreeMap::new(),
        });
        d.add_edge(Edge {
            from_node: NodeId::from(from),
            from_port: "default".to_string(),
            to_node: NodeId::from(to),
            to_port: "in".to_string(),
        });
        d
    }

    #[test]
    fn emit_then_consume_delivers_envelope() {
        let diagram = diagram_with_edge("a", "b");
        let bus = TokenBus::new();
        let env = EnvelopeFactory::text("hi", ExecutionId::new(), NodeId::from("a"));
        bus.emit_outputs_as_tokens(&diagram, &NodeId::from("a"), vec![("default".to_string(), env)]);

        let inbound = bus.consume_inbound(&NodeId::from("b")).unwrap();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound["in"].to_text().unwrap(), "hi");
    }

    #[test]
    fn consume_inbound_is_at_most_once() {
        let diagram = diagram_with_edge("a", "b");
        let bus = TokenBus::new();
        let env = EnvelopeFactory::text("hi", ExecutionId::new(), NodeId::from("a"));
        bus.emit_outputs_as_tokens(&diagram, &NodeId::from("a"), vec![("default".to_string(), env)]);
        assert!(bus.consume_inbound(&NodeId::from("b")).is_some());
        assert!(bus.consume_inbound(&NodeId::from("b")).is_none());
    }

    #[test]
    fn consume_inbound_none_when_nothing_pending() {
        let bus = TokenBus::new();
        assert!(bus.consume_inbound(&NodeId::from("z")).is_none());
    }

    #[test]
    fn rerun_only_sees_envelopes_since_last_consume() {
        let diagram = diagram_with_edge("a", "b");
        let bus = TokenBus::new();
        let env1 = EnvelopeFactory::text("first", ExecutionId::new(), NodeId::from("a"));
        bus.emit_outputs_as_tokens(&diagram, &NodeId::from("a"), vec![("default".to_string(), env1)]);
        bus.consume_inbound(&NodeId::from("b"));

        let env2 = EnvelopeFactory::text("second", ExecutionId::new(), NodeId::from("a"));
        bus.emit_outputs_as_tokens(&diagram, &NodeId::from("a"), vec![("default".to_string(), env2)]);
        let inbound = bus.consume_inbound(&NodeId::from("b")).unwrap();
        assert_eq!(inbound["in"].to_text().unwrap(), "second");
    }
}
