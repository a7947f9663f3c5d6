//! Scheduler (C7) — pull-based readiness: at each tick the engine asks
//! "which nodes are ready?" and the scheduler answers from the diagram,
//! the tracker, and the bus, without owning any execution state itself
//! beyond the current epoch.

use crate::bus::TokenBus;
use crate::diagram::{Diagram, Node, PortRequirement};
use crate::handler::HandlerRegistry;
use crate::tracker::{Epoch, NodeStatus, UnifiedStateTracker};
use crate::types::NodeId;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Tracks the current epoch and answers readiness queries. Stateless apart
/// from the epoch counter — everything else is read fresh from its
/// collaborators on every call.
pub struct Scheduler {
    epoch: Mutex<Epoch>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("epoch", &*self.epoch.lock().expect("scheduler lock poisoned"))
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self { epoch: Mutex::new(0) }
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_epoch(&self) -> Epoch {
        *self.epoch.lock().expect("scheduler lock poisoned")
    }

    /// Bumps the epoch counter for a fresh scheduling wave (new execution,
    /// resumed loop, external input) and returns the new value.
    pub fn begin_new_epoch(&self) -> Epoch {
        let mut epoch = self.epoch.lock().expect("scheduler lock poisoned");
        *epoch += 1;
        *epoch
    }

    /// Returns the ids of every node ready to run right now, in topological
    /// order (parents before children), then insertion order among
    /// siblings, then lexicographic node id as the final tie-break.
    ///
    /// As a side effect, any node that is otherwise ready except for its
    /// iteration cap is transitioned to MAXITER_REACHED here rather than
    /// being returned — callers never observe a node straddling "ready" and
    /// "capped".
    pub fn ready_nodes(
        &self,
        diagram: &Diagram,
        tracker: &UnifiedStateTracker,
        bus: &TokenBus,
        handlers: &HandlerRegistry,
    ) -> Vec<NodeId> {
        let epoch = self.current_epoch();
        let mut ready = Vec::new();

        for node in diagram.nodes() {
            if tracker.get_node_state(&node.id) != Some(NodeStatus::Pending) {
                continue;
            }
            if !ports_satisfied(bus, node) {
                continue;
            }
            if let Some(handler) = handlers.get(&node.schema.node_type) {
                if handler.validate(node).is_some() {
                    continue;
                }
            }
            if !tracker.can_execute_in_loop(&node.id, epoch, node.schema.max_iteration) {
                let last_output = tracker.get_last_output(&node.id);
                tracker.transition_to_running(&node.id, epoch);
                if let Err(err) = tracker.transition_to_maxiter(&node.id, last_output) {
                    tracing::error!(node = %node.id, error = %err, "maxiter_transition_failed");
                }
                continue;
            }
            ready.push(node.id.clone());
        }

        order_by_topology(diagram, ready)
    }
}

/// Every required inbound port either has a pending token or a
/// diagram-resolved static input; optional ports never block readiness.
fn ports_satisfied(bus: &TokenBus, node: &Node) -> bool {
    node.schema
        .required_ports()
        .all(|port| bus.has_port(&node.id, &port.name) || node.resolved_inputs.contains_key(&port.name))
}

/// Sorts `candidates` by (topological rank, insertion index, node id).
/// Nodes unreachable from a stable topological sort (true cycles) fall back
/// to insertion order, ranked after every node that did sort cleanly.
fn order_by_topology(diagram: &Diagram, mut candidates: Vec<NodeId>) -> Vec<NodeId> {
    let rank = topological_rank(diagram);
    candidates.sort_by(|a, b| {
        let ra = rank.get(a).copied().unwrap_or(usize::MAX);
        let rb = rank.get(b).copied().unwrap_or(usize::MAX);
        ra.cmp(&rb)
            .then_with(|| diagram.insertion_index(a).cmp(&diagram.insertion_index(b)))
            .then_with(|| a.as_str().cmp(b.as_str()))
    });
    candidates
}

/// Kahn's algorithm over `diagram`; nodes left over after the queue drains
/// (true cycles) are simply absent from the map.
fn topological_rank(diagram: &Diagram) -> HashMap<NodeId, usize> {
    let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
    for node in diagram.nodes() {
        in_degree.entry(node.id.clone()).or_insert(0);
    }
    for edge in diagram.edges() {
        *in_degree.entry(edge.to_node.clone()).or_insert(0) += 1;
    }

    let mut queue: Vec<NodeId> = diagram
        .nodes()
        .filter(|n| in_degree.get(&n.id).copied().unwrap_or(0) == 0)
        .map(|n| n.id.clone())
        .collect();
    queue.sort_by_key(|id| diagram.insertion_index(id));

    let mut rank = HashMap::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut next_rank = 0usize;

    while let Some(id) = queue.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        rank.insert(id.clone(), next_rank);
        next_rank += 1;
        for edge in diagram.edges() {
            if edge.from_node != id {
                continue;
            }
            if let Some(degree) = in_degree.get_mut(&edge.to_node) {
                if *degree > 0 {
                    *degree -= 1;
                }
                if *degree == 0 && !visited.contains(&edge.to_node) {
                    queue.push(edge.to_node.clone());
                }
            }
        }
        queue.sort_by_key(|id| diagram.insertion_index(id));
    }

    rank
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::{Edge, NodeSchema, PortSchema};
    use std::collections::BTreeMap;

    fn schema(node_type: &str, ports: Vec<(&str, PortRequirement)>) -> NodeSchema {
        NodeSchema {
            node_type: node_type.to_string(),
            inbound_ports: ports
                .into_iter()
                .map(|(name, requirement)| PortSchema {
                    name: name.to_string(),
                    requirement,
                })
                .collect(),
            outbound_ports: vec!["default".to_string()],
            max_iteration: None,
            retry_policy: None,
        }
    }

    fn node(id: &str, node_type: &str, ports: Vec<(&str, PortRequirement)>) -> Node {
        Node {
            id: NodeId::from(id),
            schema: schema(node_type, ports),
            resolved_inputs: BTreeMap::new(),
        }
    }

    #[test]
    fn pending_node_with_no_required_ports_is_ready() {
        let mut diagram = Diagram::new();
        diagram.add_node(node("a", "raw_text_echo", vec![]));
        let tracker = UnifiedStateTracker::new();
        tracker.initialize_node(&NodeId::from("a"));
        let bus = TokenBus::new();
        let handlers = HandlerRegistry::new();
        let scheduler = Scheduler::new();

        let ready = scheduler.ready_nodes(&diagram, &tracker, &bus, &handlers);
        assert_eq!(ready, vec![NodeId::from("a")]);
    }

    #[test]
    fn node_with_unsatisfied_required_port_is_not_ready() {
        let mut diagram = Diagram::new();
        diagram.add_node(node("a", "raw_text_echo", vec![("in", PortRequirement::Required)]));
        let tracker = UnifiedStateTracker::new();
        tracker.initialize_node(&NodeId::from("a"));
        let bus = TokenBus::new();
        let handlers = HandlerRegistry::new();
        let scheduler = Scheduler::new();

        assert!(scheduler.ready_nodes(&diagram, &tracker, &bus, &handlers).is_empty());
    }

    #[test]
    fn ready_nodes_orders_parents_before_children() {
        let mut diagram = Diagram::new();
        diagram.add_node(node("b", "raw_text_echo", vec![("in", PortRequirement::Required)]));
        diagram.add_node(node("a", "raw_text_echo", vec![]));
        diagram.add_edge(Edge {
            from_node: NodeId::from("a"),
            from_port: "default".to_string(),
            to_node: NodeId::from("b"),
            to_port: "in".to_string(),
        });

        let tracker = UnifiedStateTracker::new();
        tracker.initialize_node(&NodeId::from("a"));
        tracker.initialize_node(&NodeId::from("b"));
        let bus = TokenBus::new();
        let handlers = HandlerRegistry::new();
        let scheduler = Scheduler::new();

        // Only "a" is ready (b needs a token on "in" first).
        let ready = scheduler.ready_nodes(&diagram, &tracker, &bus, &handlers);
        assert_eq!(ready, vec![NodeId::from("a")]);
    }

    #[test]
    fn node_exceeding_iteration_cap_is_transitioned_to_maxiter_not_returned() {
        let mut diagram = Diagram::new();
        let mut n = node("l", "raw_text_echo", vec![]);
        n.schema.max_iteration = Some(1);
        diagram.add_node(n);

        let tracker = UnifiedStateTracker::new();
        let id = NodeId::from("l");
        tracker.initialize_node(&id);
        tracker.transition_to_running(&id, 0);
        tracker.transition_to_completed(&id, None, None).unwrap();
        tracker.reset_node(&id);

        let bus = TokenBus::new();
        let handlers = HandlerRegistry::new();
        let scheduler = Scheduler::new();

        let ready = scheduler.ready_nodes(&diagram, &tracker, &bus, &handlers);
        assert!(ready.is_empty());
        assert_eq!(tracker.get_node_state(&id), Some(NodeStatus::MaxIterReached));
    }

    #[test]
    fn begin_new_epoch_increments_monotonically() {
        let scheduler = Scheduler::new();
        assert_eq!(scheduler.current_epoch(), 0);
        assert_eq!(scheduler.begin_new_epoch(), 1);
        assert_eq!(scheduler.begin_new_epoch(), 2);
    }

    #[test]
    fn cyclic_diagram_falls_back_to_insertion_order_without_panicking() {
        let mut diagram = Diagram::new();
        diagram.add_node(node("a", "raw_text_echo", vec![("in", PortRequirement::Required)]));
        diagram.add_node(node("b", "raw_text_echo", vec![("in", PortRequirement::Required)]));
        diagram.add_edge(Edge {
            from_node: NodeId::from("a"),
            from_port: "default".to_string(),
            to_node: NodeId::from("b"),
            to_port: "in".to_string(),
        });
        diagram.add_edge(Edge {
            from_node: NodeId::from("b"),
            from_port: "default".to_string(),
            to_node: NodeId::from("a"),
            to_port: "in".to_string(),
        });

        let tracker = UnifiedStateTracker::new();
        tracker.initialize_node(&NodeId::from("a"));
        tracker.initialize_node(&NodeId::from("b"));
        let bus = TokenBus::new();
        let handlers = HandlerRegistry::new();
        let scheduler = Scheduler::new();

        // Neither node has its (optional-less, but present) "in" port
        // satisfied, so nothing is ready — the point of this test is that
        // ranking a cyclic graph doesn't panic or infinite-loop.
        let ready = scheduler.ready_nodes(&diagram, &tracker, &bus, &handlers);
        assert!(ready.is_empty());
    }
}
