//! Execution Engine (C8) — the main loop driving one diagram execution from
//! EXECUTION_STARTED to a terminal status.
//!
//! Each tick asks the [`Scheduler`] which nodes are ready, dispatches them as
//! bounded worker tasks (a [`tokio::sync::Semaphore`] caps concurrency), and
//! folds completed workers' outcomes back into the token bus, the state
//! store, and the event emitter. A node whose output comes back carrying
//! error meta is requeued with backoff per its [`RetryPolicy`] rather than
//! failing the execution outright; retries exhausted (or no policy at all)
//! count it as an unrecovered failure.

use crate::bus::TokenBus;
use crate::diagram::{Diagram, Node};
use crate::envelope::Envelope;
use crate::events::{Event, EventEmitter, EventKind};
use crate::handler::{ExecutionRequest, HandlerRegistry};
use crate::scheduler::Scheduler;
use crate::services::ServiceRegistry;
use crate::store::StateStore;
use crate::tracker::{Epoch, NodeStatus, UnifiedStateTracker};
use crate::types::{DiagramId, DefaultLimits, Error, ExecutionId, NodeId, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

pub use tokio_util::sync::CancellationToken;

/// How one execution finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Completed,
    Failed,
    Aborted,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Aborted => "ABORTED",
        }
    }
}

/// What [`ExecutionEngine::run`] returns once the execution reaches a
/// terminal status. `tracker` stays reachable for callers that want the full
/// per-node history after the fact.
#[derive(Debug)]
pub struct ExecutionReport {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub tracker: Arc<UnifiedStateTracker>,
}

/// One worker's finished invocation: the node it ran (carrying its schema,
/// needed for outbound ports and retry policy) and the lifecycle's outcome.
struct WorkerOutcome {
    node: Node,
    result: Result<Envelope>,
}

/// Drives diagrams to completion. Stateless apart from its collaborators —
/// one instance may run many executions concurrently, each with its own
/// tracker, bus, and scheduler.
pub struct ExecutionEngine {
    handlers: Arc<HandlerRegistry>,
    services: Arc<ServiceRegistry>,
    store: Arc<StateStore>,
    events: Arc<EventEmitter>,
    limits: DefaultLimits,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("max_concurrent_workers", &self.limits.max_concurrent_workers)
            .finish()
    }
}

impl ExecutionEngine {
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        services: Arc<ServiceRegistry>,
        store: Arc<StateStore>,
        events: Arc<EventEmitter>,
        limits: DefaultLimits,
    ) -> Self {
        Self {
            handlers,
            services,
            store,
            events,
            limits,
        }
    }

    pub fn events(&self) -> &Arc<EventEmitter> {
        &self.events
    }

    /// Runs `diagram` to completion with no external cancellation.
    pub async fn run(
        &self,
        diagram: Arc<Diagram>,
        diagram_id: Option<DiagramId>,
        variables: Option<Value>,
    ) -> Result<ExecutionReport> {
        self.run_cancellable(diagram, diagram_id, variables, CancellationToken::new())
            .await
    }

    /// Runs `diagram` to completion, or to ABORTED if `cancel` fires first.
    /// Callers keep a clone of `cancel` to abort from another task.
    pub async fn run_cancellable(
        &self,
        diagram: Arc<Diagram>,
        diagram_id: Option<DiagramId>,
        variables: Option<Value>,
        cancel: CancellationToken,
    ) -> Result<ExecutionReport> {
        let execution_id = ExecutionId::new();
        let tracker = Arc::new(UnifiedStateTracker::new());
        let bus = Arc::new(TokenBus::new());
        let scheduler = Scheduler::new();

        self.store
            .create_execution(execution_id.clone(), diagram_id, variables)
            .await?;
        for node in diagram.nodes() {
            tracker.initialize_node(&node.id);
        }
        tracing::info!(execution_id = %execution_id, node_count = diagram.nodes().count(), "execution_started");
        self.events.publish(Event::new(
            execution_id.clone(),
            EventKind::ExecutionStarted,
            "RUNNING",
        ));

        let epoch = scheduler.begin_new_epoch();
        let semaphore = Arc::new(Semaphore::new(self.limits.max_concurrent_workers.max(1)));

        let mut to_dispatch: VecDeque<NodeId> = VecDeque::new();
        // Nodes popped from `to_dispatch` and spawned but not yet reflected
        // as RUNNING in the tracker — `ready_nodes` still sees them as
        // Pending until their worker is actually polled, so without this set
        // the same node would be queued for dispatch a second time.
        let mut in_flight: HashSet<NodeId> = HashSet::new();
        let mut workers: JoinSet<WorkerOutcome> = JoinSet::new();
        let mut pending_retries: JoinSet<NodeId> = JoinSet::new();
        let mut retry_counts: HashMap<NodeId, u32> = HashMap::new();
        let mut unrecovered_errors: HashSet<NodeId> = HashSet::new();
        let mut aborted = false;

        'main: loop {
            if cancel.is_cancelled() {
                aborted = true;
                break;
            }

            for id in scheduler.ready_nodes(&diagram, &tracker, &bus, &self.handlers) {
                if !to_dispatch.contains(&id) && !in_flight.contains(&id) {
                    to_dispatch.push_back(id);
                }
            }

            if to_dispatch.is_empty() && workers.is_empty() && pending_retries.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    aborted = true;
                    break 'main;
                }

                permit = semaphore.clone().acquire_owned(), if !to_dispatch.is_empty() => {
                    let permit = permit.map_err(|e| Error::internal(format!("semaphore closed: {e}")))?;
                    let node_id = to_dispatch.pop_front().expect("checked non-empty above");
                    in_flight.insert(node_id.clone());
                    let node = diagram
                        .node(&node_id)
                        .cloned()
                        .expect("scheduler only returns nodes present in the diagram");
                    tracing::debug!(execution_id = %execution_id, node_id = %node_id, epoch, "worker_dispatched");
                    workers.spawn(run_worker(
                        node,
                        execution_id.clone(),
                        epoch,
                        tracker.clone(),
                        self.services.clone(),
                        bus.clone(),
                        self.handlers.clone(),
                        permit,
                    ));
                }

                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    let outcome = joined.map_err(|e| Error::internal(format!("worker task panicked: {e}")))?;
                    in_flight.remove(&outcome.node.id);
                    self.handle_outcome(
                        &execution_id,
                        &diagram,
                        &tracker,
                        &bus,
                        &mut retry_counts,
                        &mut unrecovered_errors,
                        &mut pending_retries,
                        outcome,
                    )
                    .await?;
                }

                Some(joined) = pending_retries.join_next(), if !pending_retries.is_empty() => {
                    if let Ok(node_id) = joined {
                        tracker.reset_node(&node_id);
                    }
                }
            }
        }

        if aborted {
            self.drain_on_abort(&execution_id, &diagram, &tracker, &bus, &mut retry_counts, &mut unrecovered_errors, &mut workers, &mut pending_retries)
                .await;
            for node_id in tracker.get_running_nodes() {
                let _ = tracker.transition_to_failed(&node_id, "execution aborted");
            }
        }

        let status = if aborted {
            ExecutionStatus::Aborted
        } else if !tracker.get_failed_nodes().is_empty() || !unrecovered_errors.is_empty() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        tracing::info!(execution_id = %execution_id, status = status.as_str(), "execution_finished");

        let (kind, error) = match status {
            ExecutionStatus::Completed => (EventKind::ExecutionCompleted, None),
            ExecutionStatus::Failed => (
                EventKind::ExecutionFailed,
                Some("one or more nodes failed".to_string()),
            ),
            ExecutionStatus::Aborted => (
                EventKind::ExecutionAborted,
                Some("execution aborted".to_string()),
            ),
        };
        self.store
            .update_status(&execution_id, status.as_str(), error)
            .await?;
        self.events
            .publish(Event::new(execution_id.clone(), kind, status.as_str()));

        Ok(ExecutionReport {
            execution_id,
            status,
            tracker,
        })
    }

    /// Cancellation's grace period: await in-flight workers up to
    /// `limits.hook_timeout`, then abort whatever's left.
    async fn drain_on_abort(
        &self,
        execution_id: &ExecutionId,
        diagram: &Diagram,
        tracker: &Arc<UnifiedStateTracker>,
        bus: &Arc<TokenBus>,
        retry_counts: &mut HashMap<NodeId, u32>,
        unrecovered_errors: &mut HashSet<NodeId>,
        workers: &mut JoinSet<WorkerOutcome>,
        pending_retries: &mut JoinSet<NodeId>,
    ) {
        let grace = self.limits.hook_timeout;
        let drain = async {
            while let Some(joined) = workers.join_next().await {
                if let Ok(outcome) = joined {
                    let _ = self
                        .handle_outcome(execution_id, diagram, tracker, bus, retry_counts, unrecovered_errors, pending_retries, outcome)
                        .await;
                }
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }
        pending_retries.abort_all();
        while pending_retries.join_next().await.is_some() {}
    }

    /// Folds one worker's outcome into the bus, the state store, and the
    /// event emitter, scheduling a backoff requeue when the output carries
    /// error meta and the node's retry policy permits another attempt.
    async fn handle_outcome(
        &self,
        execution_id: &ExecutionId,
        diagram: &Diagram,
        tracker: &Arc<UnifiedStateTracker>,
        bus: &Arc<TokenBus>,
        retry_counts: &mut HashMap<NodeId, u32>,
        unrecovered_errors: &mut HashSet<NodeId>,
        pending_retries: &mut JoinSet<NodeId>,
        outcome: WorkerOutcome,
    ) -> Result<()> {
        let WorkerOutcome { node, result } = outcome;
        let node_id = node.id.clone();

        match result {
            Ok(output) => {
                self.store
                    .update_node_output(execution_id, &node_id, output.clone(), false, None)
                    .await?;

                let ports = &node.schema.outbound_ports;
                let loop_targets: HashSet<NodeId> = ports
                    .iter()
                    .flat_map(|port| diagram.outgoing(&node_id, port))
                    .map(|edge| edge.to_node.clone())
                    .collect();

                let outputs: Vec<(String, Envelope)> = ports
                    .iter()
                    .map(|port| (port.clone(), output.clone()))
                    .collect();
                bus.emit_outputs_as_tokens(diagram, &node_id, outputs);

                // A cycle edge may feed a token back to a node that already
                // finished this epoch (a self-loop, or a longer cycle); that
                // node is re-armed for another pass rather than staying
                // stuck COMPLETED. `ready_nodes` enforces the iteration cap
                // on the next tick, so this never loops past `max_iteration`.
                for target in loop_targets {
                    if tracker.get_node_state(&target) == Some(NodeStatus::Completed) {
                        tracker.reset_node(&target);
                    }
                }

                tracing::debug!(execution_id = %execution_id, node_id = %node_id, "node_completed");
                self.events.publish(
                    Event::new(execution_id.clone(), EventKind::NodeCompleted, "COMPLETED")
                        .with_node(node_id.clone())
                        .with_envelope(output.id().clone()),
                );

                if output.is_error() {
                    match &node.schema.retry_policy {
                        Some(policy) => {
                            let attempt = retry_counts.entry(node_id.clone()).or_insert(0);
                            if policy.should_retry(*attempt) {
                                let delay_ms = policy.calculate_delay(*attempt + 1);
                                *attempt += 1;
                                tracing::warn!(execution_id = %execution_id, node_id = %node_id, attempt = *attempt, delay_ms, "node_output_errored_requeuing");
                                let retry_node_id = node_id.clone();
                                pending_retries.spawn(async move {
                                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                                    retry_node_id
                                });
                            } else {
                                tracing::error!(execution_id = %execution_id, node_id = %node_id, "node_retries_exhausted");
                                unrecovered_errors.insert(node_id);
                            }
                        }
                        None => {
                            tracing::error!(execution_id = %execution_id, node_id = %node_id, "node_output_errored_no_retry_policy");
                            unrecovered_errors.insert(node_id);
                        }
                    }
                }
            }
            Err(err) => {
                tracing::error!(execution_id = %execution_id, node_id = %node_id, error = %err, "node_failed");
                let _ = self
                    .store
                    .update_node_status(execution_id, &node_id, "FAILED", Some(err.to_string()))
                    .await;
                self.events.publish(
                    Event::new(execution_id.clone(), EventKind::NodeFailed, "FAILED")
                        .with_node(node_id)
                        .with_meta(serde_json::json!({ "error": err.to_string() })),
                );
            }
        }

        Ok(())
    }
}

/// Consumes `node`'s inbound envelopes and drives its handler through the
/// full lifecycle (§4.3). A node type with no registered handler fails
/// immediately rather than hanging — the scheduler doesn't filter these out
/// since handler registration is an engine-level concern, not a diagram one.
async fn run_worker(
    node: Node,
    execution_id: ExecutionId,
    epoch: Epoch,
    tracker: Arc<UnifiedStateTracker>,
    services: Arc<ServiceRegistry>,
    bus: Arc<TokenBus>,
    handlers: Arc<HandlerRegistry>,
    _permit: OwnedSemaphorePermit,
) -> WorkerOutcome {
    let node_id = node.id.clone();
    let inbound = bus.consume_inbound(&node_id).unwrap_or_default();

    let handler = match handlers.get(&node.schema.node_type) {
        Some(handler) => handler,
        None => {
            let message = format!("no handler registered for node type \"{}\"", node.schema.node_type);
            tracker.transition_to_running(&node_id, epoch);
            let _ = tracker.transition_to_failed(&node_id, message.clone());
            return WorkerOutcome {
                node,
                result: Err(Error::validation(message)),
            };
        }
    };

    let request = ExecutionRequest::new(execution_id, node.clone(), epoch, tracker, services, bus);
    let result = crate::handler::execute(handler.as_ref(), &request, inbound).await;

    WorkerOutcome { node, result }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::{Edge, NodeSchema, PortRequirement, PortSchema};
    use crate::envelope::EnvelopeFactory;
    use crate::retry::{RetryPolicy, RetryStrategy};
    use crate::types::Error as EngineError;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn schema(node_type: &str, inbound: Vec<(&str, PortRequirement)>, retry_policy: Option<RetryPolicy>) -> NodeSchema {
        NodeSchema {
            node_type: node_type.to_string(),
            inbound_ports: inbound
                .into_iter()
                .map(|(name, requirement)| PortSchema {
                    name: name.to_string(),
                    requirement,
                })
                .collect(),
            outbound_ports: vec!["default".to_string()],
            max_iteration: None,
            retry_policy,
        }
    }

    fn node(id: &str, node_type: &str, inbound: Vec<(&str, PortRequirement)>, retry_policy: Option<RetryPolicy>) -> Node {
        Node {
            id: NodeId::from(id),
            schema: schema(node_type, inbound, retry_policy),
            resolved_inputs: BTreeMap::new(),
        }
    }

    async fn engine_with_store() -> (TempDir, ExecutionEngine, HandlerRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::types::StateStoreConfig::default();
        config.db_path = dir.path().join("state.db").to_string_lossy().to_string();
        let store = Arc::new(StateStore::open(config).await.unwrap());
        let services = Arc::new(ServiceRegistry::new());
        let events = Arc::new(EventEmitter::default());
        let handlers = HandlerRegistry::new();
        let engine = ExecutionEngine::new(Arc::new(HandlerRegistry::new()), services, store, events, DefaultLimits::default());
        (dir, engine, handlers)
    }

    struct StartHandler;

    #[async_trait]
    impl crate::handler::Handler for StartHandler {
        fn node_type(&self) -> &'static str {
            "start"
        }

        async fn run(&self, _inputs: HashMap<String, Envelope>, request: &ExecutionRequest) -> Result<Envelope> {
            Ok(EnvelopeFactory::text("hello", request.execution_id.clone(), request.node_id().clone()))
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl crate::handler::Handler for EchoHandler {
        fn node_type(&self) -> &'static str {
            "echo"
        }

        async fn run(&self, inputs: HashMap<String, Envelope>, request: &ExecutionRequest) -> Result<Envelope> {
            let text = inputs.get("in").map(|e| e.as_text().unwrap_or_default()).unwrap_or_default();
            Ok(EnvelopeFactory::text(
                format!("{text}!"),
                request.execution_id.clone(),
                request.node_id().clone(),
            ))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl crate::handler::Handler for FailingHandler {
        fn node_type(&self) -> &'static str {
            "boom"
        }

        async fn run(&self, _inputs: HashMap<String, Envelope>, _request: &ExecutionRequest) -> Result<Envelope> {
            Err(EngineError::internal("handler exploded"))
        }
    }

    /// Returns an error-meta envelope on every call, counting attempts.
    struct AlwaysErrorHandler {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl crate::handler::Handler for AlwaysErrorHandler {
        fn node_type(&self) -> &'static str {
            "flaky"
        }

        async fn run(&self, _inputs: HashMap<String, Envelope>, request: &ExecutionRequest) -> Result<Envelope> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let ok = EnvelopeFactory::text("try again", request.execution_id.clone(), request.node_id().clone());
            Ok(ok.with_error("upstream unavailable", "UpstreamError"))
        }
    }

    struct SleepyHandler;

    #[async_trait]
    impl crate::handler::Handler for SleepyHandler {
        fn node_type(&self) -> &'static str {
            "sleepy"
        }

        async fn run(&self, _inputs: HashMap<String, Envelope>, request: &ExecutionRequest) -> Result<Envelope> {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Ok(EnvelopeFactory::text("done", request.execution_id.clone(), request.node_id().clone()))
        }
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn execution_lifecycle_is_logged() {
        let (_dir, engine, mut handlers) = engine_with_store().await;
        handlers.register(Arc::new(StartHandler));
        let engine = ExecutionEngine::new(Arc::new(handlers), engine.services.clone(), engine.store.clone(), engine.events.clone(), engine.limits.clone());

        let mut diagram = Diagram::new();
        diagram.add_node(node("a", "start", vec![], None));

        engine.run(Arc::new(diagram), None, None).await.unwrap();
        assert!(logs_contain("execution_started"));
        assert!(logs_contain("execution_finished"));
    }

    #[tokio::test]
    async fn two_node_diagram_completes_with_echoed_output() {
        let (_dir, engine, mut handlers) = engine_with_store().await;
        handlers.register(Arc::new(StartHandler));
        handlers.register(Arc::new(EchoHandler));
        let engine = ExecutionEngine::new(Arc::new(handlers), engine.services.clone(), engine.store.clone(), engine.events.clone(), engine.limits.clone());

        let mut diagram = Diagram::new();
        diagram.add_node(node("a", "start", vec![], None));
        diagram.add_node(node("b", "echo", vec![("in", PortRequirement::Required)], None));
        diagram.add_edge(Edge {
            from_node: NodeId::from("a"),
            from_port: "default".to_string(),
            to_node: NodeId::from("b"),
            to_port: "in".to_string(),
        });

        let report = engine.run(Arc::new(diagram), None, None).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Completed);
        assert_eq!(
            report.tracker.get_last_output(&NodeId::from("b")).unwrap().to_text().unwrap(),
            "hello!"
        );
    }

    #[tokio::test]
    async fn handler_error_fails_the_execution() {
        let (_dir, engine, mut handlers) = engine_with_store().await;
        handlers.register(Arc::new(FailingHandler));
        let engine = ExecutionEngine::new(Arc::new(handlers), engine.services.clone(), engine.store.clone(), engine.events.clone(), engine.limits.clone());

        let mut diagram = Diagram::new();
        diagram.add_node(node("a", "boom", vec![], None));

        let report = engine.run(Arc::new(diagram), None, None).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn missing_handler_fails_the_execution() {
        let (_dir, engine, handlers) = engine_with_store().await;
        let engine = ExecutionEngine::new(Arc::new(handlers), engine.services.clone(), engine.store.clone(), engine.events.clone(), engine.limits.clone());

        let mut diagram = Diagram::new();
        diagram.add_node(node("a", "ghost", vec![], None));

        let report = engine.run(Arc::new(diagram), None, None).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn error_envelope_without_retry_policy_fails_the_execution() {
        let (_dir, engine, mut handlers) = engine_with_store().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        handlers.register(Arc::new(AlwaysErrorHandler { attempts: attempts.clone() }));
        let engine = ExecutionEngine::new(Arc::new(handlers), engine.services.clone(), engine.store.clone(), engine.events.clone(), engine.limits.clone());

        let mut diagram = Diagram::new();
        diagram.add_node(node("a", "flaky", vec![], None));

        let report = engine.run(Arc::new(diagram), None, None).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Failed);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn error_envelope_retries_until_policy_exhausted() {
        let (_dir, engine, mut handlers) = engine_with_store().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        handlers.register(Arc::new(AlwaysErrorHandler { attempts: attempts.clone() }));
        let engine = ExecutionEngine::new(Arc::new(handlers), engine.services.clone(), engine.store.clone(), engine.events.clone(), engine.limits.clone());

        let policy = RetryPolicy::new(2, 1, 5, RetryStrategy::Constant, 1.0, false);
        let mut diagram = Diagram::new();
        diagram.add_node(node("a", "flaky", vec![], Some(policy)));

        let report = engine.run(Arc::new(diagram), None, None).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Failed);
        // First attempt plus two retries (max_attempts = 2).
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_aborts_the_execution() {
        let (_dir, engine, mut handlers) = engine_with_store().await;
        handlers.register(Arc::new(SleepyHandler));
        let mut limits = DefaultLimits::default();
        limits.hook_timeout = std::time::Duration::from_millis(10);
        let engine = ExecutionEngine::new(Arc::new(handlers), engine.services.clone(), engine.store.clone(), engine.events.clone(), limits);

        let mut diagram = Diagram::new();
        diagram.add_node(node("a", "sleepy", vec![], None));

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let diagram = Arc::new(diagram);
        let run = tokio::spawn(async move { engine.run_cancellable(diagram, None, None, cancel_clone).await });

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cancel.cancel();

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.status, ExecutionStatus::Aborted);
    }
}
