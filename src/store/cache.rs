//! In-memory per-execution cache fronting the database.

use super::{envelope_to_json, json_to_envelope};
use crate::envelope::Envelope;
use crate::tracker::TokenUsage;
use crate::types::{DiagramId, ExecutionId, NodeId, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Mutex;

/// The full persisted shape of one execution's state, cached in memory and
/// mirrored (as JSON columns) into `execution_states`.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub execution_id: ExecutionId,
    pub diagram_id: Option<DiagramId>,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub node_states: HashMap<NodeId, String>,
    pub node_outputs: HashMap<NodeId, Envelope>,
    pub node_errors: HashMap<NodeId, String>,
    pub llm_usage: TokenUsage,
    pub error: Option<String>,
    pub variables: Value,
    pub exec_counts: HashMap<NodeId, u32>,
    pub executed_nodes: Vec<NodeId>,
    pub metrics: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionState {
    pub fn new(execution_id: ExecutionId, diagram_id: Option<DiagramId>, variables: Value) -> Self {
        let now = Utc::now();
        Self {
            execution_id,
            diagram_id,
            status: "RUNNING".to_string(),
            started_at: now,
            ended_at: None,
            node_states: HashMap::new(),
            node_outputs: HashMap::new(),
            node_errors: HashMap::new(),
            llm_usage: TokenUsage::default(),
            error: None,
            variables,
            exec_counts: HashMap::new(),
            executed_nodes: Vec::new(),
            metrics: None,
            created_at: now,
        }
    }
}

/// Thread-safe map of in-flight executions, keyed by execution id.
#[derive(Default)]
pub struct Cache {
    inner: Mutex<HashMap<ExecutionId, ExecutionState>>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("resident", &self.inner.lock().expect("cache lock poisoned").len())
            .finish()
    }
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, state: ExecutionState) {
        self.inner
            .lock()
            .expect("cache lock poisoned")
            .insert(state.execution_id.clone(), state);
    }

    pub fn get(&self, id: &ExecutionId) -> Option<ExecutionState> {
        self.inner.lock().expect("cache lock poisoned").get(id).cloned()
    }

    pub fn remove(&self, id: &ExecutionId) -> Option<ExecutionState> {
        self.inner.lock().expect("cache lock poisoned").remove(id)
    }

    /// Applies `mutate` to the cached entry for `id` and returns a clone of
    /// the updated state, or `None` if the execution isn't resident.
    pub fn update(&self, id: &ExecutionId, mutate: impl FnOnce(&mut ExecutionState)) -> Option<ExecutionState> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let state = inner.get_mut(id)?;
        mutate(state);
        Some(state.clone())
    }
}

/// Reconstructs an `ExecutionState` from one `execution_states` row.
pub(crate) fn row_to_state(row: &SqliteRow) -> Result<ExecutionState> {
    let execution_id: String = row.get("execution_id");
    let diagram_id: Option<String> = row.get("diagram_id");
    let node_states_json: String = row.get("node_states");
    let node_outputs_json: String = row.get("node_outputs");
    let llm_usage_json: String = row.get("llm_usage");
    let variables_json: String = row.get("variables");
    let exec_counts_json: String = row.get("exec_counts");
    let executed_nodes_json: String = row.get("executed_nodes");
    let metrics_json: Option<String> = row.get("metrics");

    let node_states: HashMap<String, String> = serde_json::from_str(&node_states_json)?;
    let node_outputs_raw: HashMap<String, Value> = serde_json::from_str(&node_outputs_json)?;
    let mut node_outputs = HashMap::new();
    for (node, value) in node_outputs_raw {
        node_outputs.insert(NodeId::from(node.as_str()), json_to_envelope(&value)?);
    }

    Ok(ExecutionState {
        execution_id: ExecutionId::from_string(execution_id).map_err(|e| crate::types::Error::internal(e.to_string()))?,
        diagram_id: diagram_id.map(DiagramId::from),
        status: row.get("status"),
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
        node_states: node_states.into_iter().map(|(k, v)| (NodeId::from(k.as_str()), v)).collect(),
        node_outputs,
        node_errors: HashMap::new(),
        llm_usage: serde_json::from_str(&llm_usage_json)?,
        error: row.get("error"),
        variables: serde_json::from_str(&variables_json)?,
        exec_counts: serde_json::from_str::<HashMap<String, u32>>(&exec_counts_json)?
            .into_iter()
            .map(|(k, v)| (NodeId::from(k.as_str()), v))
            .collect(),
        executed_nodes: serde_json::from_str::<Vec<String>>(&executed_nodes_json)?
            .into_iter()
            .map(|s| NodeId::from(s.as_str()))
            .collect(),
        metrics: metrics_json.map(|m| serde_json::from_str(&m)).transpose()?,
        created_at: row.get("created_at"),
    })
}

/// Serializes an `ExecutionState`'s JSON columns for a write.
pub(crate) struct StateColumns {
    pub node_states: String,
    pub node_outputs: String,
    pub llm_usage: String,
    pub variables: String,
    pub exec_counts: String,
    pub executed_nodes: String,
    pub metrics: Option<String>,
}

pub(crate) fn state_to_columns(state: &ExecutionState) -> Result<StateColumns> {
    let node_states: HashMap<&str, &str> = state
        .node_states
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let node_outputs: HashMap<&str, Value> = state
        .node_outputs
        .iter()
        .map(|(k, v)| (k.as_str(), envelope_to_json(v)))
        .collect();

    Ok(StateColumns {
        node_states: serde_json::to_string(&node_states)?,
        node_outputs: serde_json::to_string(&node_outputs)?,
        llm_usage: serde_json::to_string(&state.llm_usage)?,
        variables: serde_json::to_string(&state.variables)?,
        exec_counts: serde_json::to_string(
            &state
                .exec_counts
                .iter()
                .map(|(k, v)| (k.as_str(), v))
                .collect::<HashMap<_, _>>(),
        )?,
        executed_nodes: serde_json::to_string(
            &state.executed_nodes.iter().map(|n| n.as_str()).collect::<Vec<_>>(),
        )?,
        metrics: state.metrics.as_ref().map(serde_json::to_string).transpose()?,
    })
}
