//! Unified State Tracker (C4) — the single source of truth for per-node UI
//! state, execution history, iteration counts, and outputs.
//!
//! One lock guards the entire aggregate (`inner: Mutex<Inner>`); every
//! operation acquires it briefly and releases it before returning. Query
//! results are copies — callers may not observe or mutate the tracker's
//! internal storage.

use crate::envelope::Envelope;
use crate::types::{Error, NodeId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// A monotonically increasing counter bumped each time the engine begins a
/// fresh scheduling wave; scopes per-node iteration caps.
pub type Epoch = u32;

/// UI-facing status of a node within one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    MaxIterReached,
}

/// How a single execution record finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Success,
    Failed,
    MaxIter,
    Skipped,
}

/// Token accounting attached to a completed record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cached: u64,
}

impl TokenUsage {
    pub(crate) fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.cached += other.cached;
    }
}

/// One append-only record of a single node execution attempt.
#[derive(Debug, Clone)]
pub struct NodeExecutionRecord {
    pub execution_number: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: Option<RecordStatus>,
    pub output: Option<Envelope>,
    pub error: Option<String>,
    pub token_usage: Option<TokenUsage>,
    pub duration: Option<f64>,
}

impl NodeExecutionRecord {
    fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    fn finalize(&mut self, status: RecordStatus, output: Option<Envelope>, error: Option<String>, token_usage: Option<TokenUsage>) {
        let ended_at = Utc::now();
        self.duration = Some((ended_at - self.started_at).num_milliseconds() as f64 / 1000.0);
        self.ended_at = Some(ended_at);
        self.status = Some(status);
        self.output = output;
        self.error = error;
        self.token_usage = token_usage;
    }
}

/// Aggregate totals returned by `get_execution_summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_nodes: usize,
    pub completed: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub total_duration: f64,
    pub token_usage: TokenUsage,
    pub execution_order: Vec<NodeId>,
}

#[derive(Default)]
struct Inner {
    node_states: HashMap<NodeId, NodeStatus>,
    node_errors: HashMap<NodeId, String>,
    records: HashMap<NodeId, Vec<NodeExecutionRecord>>,
    exec_counts: HashMap<NodeId, u32>,
    executed_nodes: Vec<NodeId>,
    execution_order: Vec<NodeId>,
    iterations_per_epoch: HashMap<(NodeId, Epoch), u32>,
    last_outputs: HashMap<NodeId, Envelope>,
    node_metadata: HashMap<NodeId, serde_json::Value>,
}

/// Thread-safe aggregate of node states, history, iteration counts, and
/// per-node metadata for one execution.
#[derive(Default)]
pub struct UnifiedStateTracker {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for UnifiedStateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("tracker lock poisoned");
        f.debug_struct("UnifiedStateTracker")
            .field("nodes", &inner.node_states.len())
            .field("executed", &inner.executed_nodes.len())
            .finish()
    }
}

impl UnifiedStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("tracker lock poisoned")
    }

    /// Sets a node to PENDING if it has no state yet. Idempotent.
    pub fn initialize_node(&self, node: &NodeId) {
        let mut inner = self.lock();
        inner.node_states.entry(node.clone()).or_insert(NodeStatus::Pending);
    }

    /// Flips `node` to RUNNING, opens a new execution record, and bumps all
    /// the bookkeeping invariants (I1–I4) in one locked step.
    pub fn transition_to_running(&self, node: &NodeId, epoch: Epoch) -> u32 {
        let mut inner = self.lock();
        inner.node_states.insert(node.clone(), NodeStatus::Running);
        inner.node_errors.remove(node);

        let count = {
            let counter = inner.exec_counts.entry(node.clone()).or_insert(0);
            *counter += 1;
            *counter
        };

        inner
            .records
            .entry(node.clone())
            .or_default()
            .push(NodeExecutionRecord {
                execution_number: count,
                started_at: Utc::now(),
                ended_at: None,
                status: None,
                output: None,
                error: None,
                token_usage: None,
                duration: None,
            });

        if !inner.executed_nodes.contains(node) {
            inner.executed_nodes.push(node.clone());
        }
        inner.execution_order.push(node.clone());

        *inner
            .iterations_per_epoch
            .entry((node.clone(), epoch))
            .or_insert(0) += 1;

        count
    }

    fn finalize_open_record(
        &self,
        inner: &mut Inner,
        node: &NodeId,
        status: RecordStatus,
        output: Option<Envelope>,
        error: Option<String>,
        token_usage: Option<TokenUsage>,
    ) -> Result<()> {
        let records = inner
            .records
            .get_mut(node)
            .ok_or_else(|| Error::state_transition(format!("no execution record started for {node}")))?;
        let record = records
            .last_mut()
            .filter(|r| r.is_open())
            .ok_or_else(|| {
                Error::state_transition(format!("completing {node} twice: no open record"))
            })?;
        record.finalize(status, output.clone(), error, token_usage);
        if let Some(output) = output {
            inner.last_outputs.insert(node.clone(), output);
        }
        Ok(())
    }

    pub fn transition_to_completed(
        &self,
        node: &NodeId,
        output: Option<Envelope>,
        token_usage: Option<TokenUsage>,
    ) -> Result<()> {
        let mut inner = self.lock();
        self.finalize_open_record(&mut inner, node, RecordStatus::Success, output, None, token_usage)?;
        inner.node_states.insert(node.clone(), NodeStatus::Completed);
        Ok(())
    }

    pub fn transition_to_failed(&self, node: &NodeId, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        let mut inner = self.lock();
        self.finalize_open_record(&mut inner, node, RecordStatus::Failed, None, Some(error.clone()), None)?;
        inner.node_states.insert(node.clone(), NodeStatus::Failed);
        inner.node_errors.insert(node.clone(), error);
        Ok(())
    }

    pub fn transition_to_maxiter(&self, node: &NodeId, output: Option<Envelope>) -> Result<()> {
        let mut inner = self.lock();
        self.finalize_open_record(&mut inner, node, RecordStatus::MaxIter, output, None, None)?;
        inner.node_states.insert(node.clone(), NodeStatus::MaxIterReached);
        Ok(())
    }

    pub fn transition_to_skipped(&self, node: &NodeId) -> Result<()> {
        let mut inner = self.lock();
        self.finalize_open_record(&mut inner, node, RecordStatus::Skipped, None, None, None)?;
        inner.node_states.insert(node.clone(), NodeStatus::Skipped);
        Ok(())
    }

    /// Flips `node` back to PENDING without clearing counts or history —
    /// prepares it for re-execution inside a loop (B3).
    pub fn reset_node(&self, node: &NodeId) {
        let mut inner = self.lock();
        inner.node_states.insert(node.clone(), NodeStatus::Pending);
    }

    pub fn get_node_state(&self, node: &NodeId) -> Option<NodeStatus> {
        self.lock().node_states.get(node).copied()
    }

    pub fn get_completed_nodes(&self) -> Vec<NodeId> {
        self.nodes_with_status(NodeStatus::Completed)
    }

    pub fn get_running_nodes(&self) -> Vec<NodeId> {
        self.nodes_with_status(NodeStatus::Running)
    }

    pub fn get_failed_nodes(&self) -> Vec<NodeId> {
        self.nodes_with_status(NodeStatus::Failed)
    }

    fn nodes_with_status(&self, status: NodeStatus) -> Vec<NodeId> {
        self.lock()
            .node_states
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn has_running_nodes(&self) -> bool {
        self.lock().node_states.values().any(|s| *s == NodeStatus::Running)
    }

    pub fn get_execution_count(&self, node: &NodeId) -> u32 {
        self.lock().exec_counts.get(node).copied().unwrap_or(0)
    }

    pub fn has_executed(&self, node: &NodeId) -> bool {
        self.lock().executed_nodes.contains(node)
    }

    pub fn get_last_output(&self, node: &NodeId) -> Option<Envelope> {
        self.lock().last_outputs.get(node).cloned()
    }

    /// The value and meta of a node's last output, if any.
    pub fn get_node_result(&self, node: &NodeId) -> Option<(serde_json::Value, serde_json::Value)> {
        let env = self.get_last_output(node)?;
        let value = env.as_json().unwrap_or(serde_json::Value::Null);
        let meta = serde_json::to_value(env.meta()).unwrap_or(serde_json::Value::Null);
        Some((value, meta))
    }

    pub fn get_node_execution_history(&self, node: &NodeId) -> Vec<NodeExecutionRecord> {
        self.lock().records.get(node).cloned().unwrap_or_default()
    }

    pub fn get_execution_order(&self) -> Vec<NodeId> {
        self.lock().execution_order.clone()
    }

    pub fn get_execution_summary(&self) -> ExecutionSummary {
        let inner = self.lock();
        let total_nodes = inner.node_states.len();
        let completed = inner
            .node_states
            .values()
            .filter(|s| **s == NodeStatus::Completed)
            .count();
        let failed = inner
            .node_states
            .values()
            .filter(|s| **s == NodeStatus::Failed)
            .count();

        let mut total_duration = 0.0;
        let mut token_usage = TokenUsage::default();
        for records in inner.records.values() {
            for record in records {
                total_duration += record.duration.unwrap_or(0.0);
                if let Some(usage) = &record.token_usage {
                    token_usage.add(usage);
                }
            }
        }

        let success_rate = if total_nodes == 0 {
            0.0
        } else {
            completed as f64 / total_nodes as f64
        };

        ExecutionSummary {
            total_nodes,
            completed,
            failed,
            success_rate,
            total_duration,
            token_usage,
            execution_order: inner.execution_order.clone(),
        }
    }

    /// True iff `node` may run again within `epoch` without exceeding its
    /// iteration cap (I2).
    pub fn can_execute_in_loop(&self, node: &NodeId, epoch: Epoch, max_iteration: Option<u32>) -> bool {
        let cap = max_iteration.unwrap_or(100);
        let inner = self.lock();
        let used = inner
            .iterations_per_epoch
            .get(&(node.clone(), epoch))
            .copied()
            .unwrap_or(0);
        used < cap
    }

    pub fn get_node_metadata(&self, node: &NodeId) -> Option<serde_json::Value> {
        self.lock().node_metadata.get(node).cloned()
    }

    pub fn set_node_metadata(&self, node: &NodeId, value: serde_json::Value) {
        self.lock().node_metadata.insert(node.clone(), value);
    }

    pub fn clear_history(&self) {
        let mut inner = self.lock();
        *inner = Inner::default();
    }

    /// Rehydrates the tracker from a `StateStore`-loaded `ExecutionState`
    /// after a crash/resume: `states` uses the store's own status strings
    /// (`"PENDING"`, `"RUNNING"`, `"COMPLETED"`, `"FAILED"`, `"SKIPPED"`,
    /// `"MAX_ITER_REACHED"`); `records`, `counts`, and `outputs` are optional
    /// and fill in history, exec counts, and last outputs respectively when
    /// available. `executed_nodes` is derived as every node whose persisted
    /// status isn't PENDING. Per-epoch iteration counters aren't persisted
    /// and start fresh, so a resumed loop's cap re-counts from the resume
    /// point rather than carrying over pre-crash iterations.
    pub fn load_states(
        &self,
        states: HashMap<NodeId, String>,
        records: Option<HashMap<NodeId, Vec<NodeExecutionRecord>>>,
        counts: Option<HashMap<NodeId, u32>>,
        outputs: Option<HashMap<NodeId, Envelope>>,
    ) -> Result<()> {
        let mut inner = self.lock();

        let mut executed_nodes = Vec::new();
        for (node, raw_status) in states {
            let status = parse_node_status(&raw_status)?;
            if status != NodeStatus::Pending {
                executed_nodes.push(node.clone());
            }
            inner.node_states.insert(node, status);
        }
        inner.executed_nodes = executed_nodes;

        if let Some(records) = records {
            inner.records = records;
        }
        if let Some(counts) = counts {
            inner.exec_counts = counts;
        }
        if let Some(outputs) = outputs {
            inner.last_outputs = outputs;
        }

        Ok(())
    }
}

fn parse_node_status(s: &str) -> Result<NodeStatus> {
    match s {
        "PENDING" => Ok(NodeStatus::Pending),
        "RUNNING" => Ok(NodeStatus::Running),
        "COMPLETED" => Ok(NodeStatus::Completed),
        "FAILED" => Ok(NodeStatus::Failed),
        "SKIPPED" => Ok(NodeStatus::Skipped),
        "MAX_ITER_REACHED" => Ok(NodeStatus::MaxIterReached),
        other => Err(Error::state_transition(format!("unknown persisted node status {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeFactory;
    use crate::types::ExecutionId;

    fn node(id: &str) -> NodeId {
        NodeId::from(id)
    }

    #[test]
    fn transition_to_running_increments_exec_count_and_records() {
        let tracker = UnifiedStateTracker::new();
        let n = node("a");
        let count = tracker.transition_to_running(&n, 0);
        assert_eq!(count, 1);
        assert_eq!(tracker.get_execution_count(&n), 1);
        assert_eq!(tracker.get_node_execution_history(&n).len(), 1);
    }

    #[test]
    fn executed_nodes_contains_node_at_most_once() {
        let tracker = UnifiedStateTracker::new();
        let n = node("a");
        tracker.transition_to_running(&n, 0);
        tracker.transition_to_completed(&n, None, None).unwrap();
        tracker.reset_node(&n);
        tracker.transition_to_running(&n, 0);
        assert_eq!(tracker.lock().executed_nodes, vec![n.clone()]);
        assert_eq!(tracker.get_execution_order(), vec![n.clone(), n]);
    }

    #[test]
    fn exec_counts_equals_record_len() {
        let tracker = UnifiedStateTracker::new();
        let n = node("a");
        for _ in 0..3 {
            tracker.transition_to_running(&n, 0);
            tracker.transition_to_completed(&n, None, None).unwrap();
            tracker.reset_node(&n);
        }
        assert_eq!(
            tracker.get_execution_count(&n) as usize,
            tracker.get_node_execution_history(&n).len()
        );
    }

    #[test]
    fn completing_without_starting_fails() {
        let tracker = UnifiedStateTracker::new();
        let n = node("a");
        assert!(tracker.transition_to_completed(&n, None, None).is_err());
    }

    #[test]
    fn completing_twice_fails() {
        let tracker = UnifiedStateTracker::new();
        let n = node("a");
        tracker.transition_to_running(&n, 0);
        tracker.transition_to_completed(&n, None, None).unwrap();
        assert!(tracker.transition_to_completed(&n, None, None).is_err());
    }

    #[test]
    fn reset_node_preserves_exec_count_and_history() {
        let tracker = UnifiedStateTracker::new();
        let n = node("a");
        tracker.transition_to_running(&n, 0);
        tracker.transition_to_completed(&n, None, None).unwrap();
        let count_before = tracker.get_execution_count(&n);
        let history_before = tracker.get_node_execution_history(&n).len();
        tracker.reset_node(&n);
        assert_eq!(tracker.get_node_state(&n), Some(NodeStatus::Pending));
        assert_eq!(tracker.get_execution_count(&n), count_before);
        assert_eq!(tracker.get_node_execution_history(&n).len(), history_before);
    }

    #[test]
    fn can_execute_in_loop_respects_cap() {
        let tracker = UnifiedStateTracker::new();
        let n = node("l");
        for _ in 0..3 {
            assert!(tracker.can_execute_in_loop(&n, 0, Some(3)));
            tracker.transition_to_running(&n, 0);
            tracker.transition_to_completed(&n, None, None).unwrap();
            tracker.reset_node(&n);
        }
        assert!(!tracker.can_execute_in_loop(&n, 0, Some(3)));
    }

    #[test]
    fn iteration_cap_resets_on_new_epoch() {
        let tracker = UnifiedStateTracker::new();
        let n = node("l");
        tracker.transition_to_running(&n, 0);
        tracker.transition_to_completed(&n, None, None).unwrap();
        tracker.reset_node(&n);
        assert!(tracker.can_execute_in_loop(&n, 1, Some(1)));
    }

    #[test]
    fn get_execution_summary_computes_success_rate() {
        let tracker = UnifiedStateTracker::new();
        let a = node("a");
        let b = node("b");
        tracker.transition_to_running(&a, 0);
        let env = EnvelopeFactory::text("hi", ExecutionId::new(), a.clone());
        tracker.transition_to_completed(&a, Some(env), None).unwrap();
        tracker.transition_to_running(&b, 0);
        tracker.transition_to_failed(&b, "bad").unwrap();

        let summary = tracker.get_execution_summary();
        assert_eq!(summary.total_nodes, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.success_rate, 0.5);
    }

    #[test]
    fn load_states_rehydrates_status_counts_and_outputs() {
        let tracker = UnifiedStateTracker::new();
        let a = node("a");
        let b = node("b");

        let mut states = HashMap::new();
        states.insert(a.clone(), "COMPLETED".to_string());
        states.insert(b.clone(), "PENDING".to_string());

        let mut counts = HashMap::new();
        counts.insert(a.clone(), 2);

        let mut outputs = HashMap::new();
        outputs.insert(a.clone(), EnvelopeFactory::text("hi", ExecutionId::new(), a.clone()));

        tracker.load_states(states, None, Some(counts), Some(outputs)).unwrap();

        assert_eq!(tracker.get_node_state(&a), Some(NodeStatus::Completed));
        assert_eq!(tracker.get_node_state(&b), Some(NodeStatus::Pending));
        assert_eq!(tracker.get_execution_count(&a), 2);
        assert!(tracker.has_executed(&a));
        assert!(!tracker.has_executed(&b));
        assert_eq!(tracker.get_last_output(&a).unwrap().to_text().unwrap(), "hi");
    }

    #[test]
    fn load_states_rejects_unknown_status_string() {
        let tracker = UnifiedStateTracker::new();
        let mut states = HashMap::new();
        states.insert(node("a"), "BOGUS".to_string());
        assert!(tracker.load_states(states, None, None, None).is_err());
    }

    #[test]
    fn has_running_nodes_reflects_state() {
        let tracker = UnifiedStateTracker::new();
        let n = node("a");
        assert!(!tracker.has_running_nodes());
        tracker.transition_to_running(&n, 0);
        assert!(tracker.has_running_nodes());
        tracker.transition_to_completed(&n, None, None).unwrap();
        assert!(!tracker.has_running_nodes());
    }
}
