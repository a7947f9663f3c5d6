//! Minimal diagram graph types.
//!
//! A diagram is the static structure the scheduler and engine walk: nodes,
//! the ports they declare, and the edges connecting producer ports to
//! consumer ports. Node *behavior* (handler bodies) lives outside this
//! crate; a node here is only its id, type, schema, and wiring.

use crate::retry::RetryPolicy;
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Whether an inbound port must be satisfied before a node is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortRequirement {
    Required,
    Optional,
}

/// A declared inbound or outbound port on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSchema {
    pub name: String,
    pub requirement: PortRequirement,
}

/// The static, typed shape of a node: its ports and iteration cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSchema {
    pub node_type: String,
    pub inbound_ports: Vec<PortSchema>,
    pub outbound_ports: Vec<String>,
    /// Overrides `DefaultLimits::max_iteration` when set.
    pub max_iteration: Option<u32>,
    /// Applied by the engine when this node's output comes back as an
    /// error envelope (§4.10); `None` means a failing node never retries.
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

impl NodeSchema {
    pub fn required_ports(&self) -> impl Iterator<Item = &PortSchema> {
        self.inbound_ports
            .iter()
            .filter(|p| p.requirement == PortRequirement::Required)
    }
}

/// A node in the diagram graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub schema: NodeSchema,
    /// Diagram-resolved static inputs, keyed by port name. Used when no
    /// token is present on the bus for that port.
    pub resolved_inputs: BTreeMap<String, serde_json::Value>,
}

/// A directed edge from a producer's output port to a consumer's input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from_node: NodeId,
    pub from_port: String,
    pub to_node: NodeId,
    pub to_port: String,
}

/// The static graph: nodes, edges, and insertion order for tie-breaking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagram {
    pub id: Option<crate::types::DiagramId>,
    nodes: BTreeMap<NodeId, Node>,
    /// Preserves the order nodes were added in, for scheduler tie-breaking
    /// among siblings with no topological relationship.
    insertion_order: Vec<NodeId>,
    edges: Vec<Edge>,
}

impl Diagram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) {
        if !self.nodes.contains_key(&node.id) {
            self.insertion_order.push(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.insertion_order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges leaving `(node, port)`.
    pub fn outgoing(&self, node: &NodeId, port: &str) -> impl Iterator<Item = &Edge> {
        self.edges
            .iter()
            .filter(move |e| &e.from_node == node && e.from_port == port)
    }

    /// The 0-based insertion index of a node, used as the scheduler's
    /// secondary tie-break key after topological order.
    pub fn insertion_index(&self, node: &NodeId) -> usize {
        self.insertion_order
            .iter()
            .position(|n| n == node)
            .unwrap_or(usize::MAX)
    }

    /// Parents (nodes with an edge into `node`), deduplicated.
    pub fn parents(&self, node: &NodeId) -> BTreeSet<NodeId> {
        self.edges
            .iter()
            .filter(|e| &e.to_node == node)
            .map(|e| e.from_node.clone())
            .collect()
    }
}
