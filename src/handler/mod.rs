//! Handler Lifecycle Contract (C3) — the interface node behaviors implement,
//! and the orchestration that drives them through
//! `pre_execute -> prepare_inputs -> run -> serialize_output -> post_execute`,
//! with `on_error` as the escape hatch.
//!
//! A handler declares the services it needs via [`ServiceDependency`] rather
//! than reaching into a global; [`resolve_services`] does the lookup once,
//! up front, so a handler missing a required dependency fails fast instead
//! of partway through `run`.

use crate::bus::TokenBus;
use crate::diagram::Node;
use crate::envelope::Envelope;
use crate::recovery::with_recovery_async;
use crate::services::{ServiceKey, ServiceRegistry};
use crate::tracker::{Epoch, UnifiedStateTracker};
use crate::types::{Error, ExecutionId, NodeId, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Whether a declared service dependency must resolve for the handler to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
}

/// A handler's declaration of one service it depends on.
#[derive(Debug, Clone)]
pub struct ServiceDependency {
    pub name: &'static str,
    pub key: ServiceKey,
    pub requirement: Requirement,
    pub default: Option<Value>,
}

impl ServiceDependency {
    pub fn required(name: &'static str, key: ServiceKey) -> Self {
        Self {
            name,
            key,
            requirement: Requirement::Required,
            default: None,
        }
    }

    pub fn optional(name: &'static str, key: ServiceKey, default: Option<Value>) -> Self {
        Self {
            name,
            key,
            requirement: Requirement::Optional,
            default,
        }
    }
}

/// Everything one handler invocation needs: the node being executed, the
/// shared per-execution collaborators, and scratch state private to this
/// invocation.
pub struct ExecutionRequest {
    pub execution_id: ExecutionId,
    pub node: Node,
    pub epoch: Epoch,
    pub tracker: Arc<UnifiedStateTracker>,
    pub services: Arc<ServiceRegistry>,
    pub bus: Arc<TokenBus>,
    /// Free-form scratch state a handler may stash between lifecycle steps;
    /// not persisted past this invocation. Interior-mutable since handlers
    /// only ever see `&ExecutionRequest`.
    pub handler_state: std::sync::Mutex<HashMap<String, Value>>,
}

impl ExecutionRequest {
    pub fn new(
        execution_id: ExecutionId,
        node: Node,
        epoch: Epoch,
        tracker: Arc<UnifiedStateTracker>,
        services: Arc<ServiceRegistry>,
        bus: Arc<TokenBus>,
    ) -> Self {
        Self {
            execution_id,
            node,
            epoch,
            tracker,
            services,
            bus,
            handler_state: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node.id
    }
}

/// A node's behavior. Implementors are registered in a [`HandlerRegistry`]
/// under the node type they handle and driven through the full lifecycle by
/// [`execute`].
#[async_trait]
pub trait Handler: Send + Sync {
    /// The node type string this handler answers to (must match
    /// `NodeSchema::node_type`).
    fn node_type(&self) -> &'static str;

    /// Services this handler requires or may optionally use.
    fn service_requirements(&self) -> Vec<ServiceDependency> {
        Vec::new()
    }

    /// Static, synchronous precondition checked by the scheduler before a
    /// node is offered as ready — independent of `pre_execute`, which runs
    /// as part of the invocation itself. Returning `Some(reason)` keeps the
    /// node out of the ready set without transitioning it.
    fn validate(&self, _node: &Node) -> Option<String> {
        None
    }

    /// Short-circuit check run before input resolution. Returning
    /// `Some(envelope)` skips `prepare_inputs`/`run` entirely and uses the
    /// envelope as the node's output (e.g. a cached result).
    async fn pre_execute(&self, _request: &ExecutionRequest) -> Result<Option<Envelope>> {
        Ok(None)
    }

    /// Resolves the inbound envelopes (and any diagram-resolved static
    /// inputs) into the exact input map `run` will receive.
    async fn prepare_inputs(
        &self,
        _request: &ExecutionRequest,
        inbound: HashMap<String, Envelope>,
    ) -> Result<HashMap<String, Envelope>> {
        Ok(inbound)
    }

    /// The handler's actual work. A panic here is caught by [`execute`] and
    /// converted to an `Error::internal`, not propagated to the caller.
    async fn run(&self, inputs: HashMap<String, Envelope>, request: &ExecutionRequest) -> Result<Envelope>;

    /// Post-processes `run`'s output before it's recorded or emitted.
    /// Default is identity.
    fn serialize_output(&self, output: Envelope, _request: &ExecutionRequest) -> Result<Envelope> {
        Ok(output)
    }

    /// Runs after the output has been recorded but before the engine emits
    /// it on the bus. Default is identity; override for side effects like
    /// recording a checkpoint or tagging the output with branch metadata.
    /// Routing the output to downstream ports is the engine's job, not the
    /// handler's — a handler here doesn't have access to the diagram.
    async fn post_execute(&self, _request: &ExecutionRequest, output: Envelope) -> Result<Envelope> {
        Ok(output)
    }

    /// Called when `run` (or its panic-wrapped invocation) fails. Returning
    /// `Some(envelope)` recovers the node to COMPLETED with that envelope as
    /// output instead of FAILED; returning `None` lets the failure stand.
    async fn on_error(&self, _request: &ExecutionRequest, _error: &Error) -> Option<Envelope> {
        None
    }
}

/// Looks up every service a handler declares, applying `default` to
/// optional dependencies that didn't resolve and failing on the first
/// unresolved required one.
pub fn resolve_services(
    deps: &[ServiceDependency],
    services: &ServiceRegistry,
) -> Result<HashMap<&'static str, Option<Value>>> {
    let mut resolved = HashMap::new();
    for dep in deps {
        let present = services.has(dep.key);
        match (present, dep.requirement) {
            (true, _) => {
                resolved.insert(dep.name, None);
            }
            (false, Requirement::Optional) => {
                resolved.insert(dep.name, dep.default.clone());
            }
            (false, Requirement::Required) => {
                return Err(Error::service_missing(dep.name, dep.key.as_str()));
            }
        }
    }
    Ok(resolved)
}

/// Registry of handlers keyed by the node type they implement.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn Handler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("node_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.node_type(), handler);
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(node_type).cloned()
    }
}

/// Drives `handler` through the full lifecycle for one node execution,
/// recording state transitions on `request.tracker` along the way.
///
/// Steps: `pre_execute` (short-circuit straight to `post_execute`) ->
/// service resolution -> `prepare_inputs` -> panic-wrapped `run` ->
/// `serialize_output` -> `post_execute`. A failure at any step after
/// `transition_to_running` has
/// been called transitions the node to FAILED via `on_error`'s recovery
/// path, never leaves it dangling in RUNNING.
pub async fn execute(
    handler: &dyn Handler,
    request: &ExecutionRequest,
    inbound: HashMap<String, Envelope>,
) -> Result<Envelope> {
    request.tracker.transition_to_running(request.node_id(), request.epoch);

    if let Some(cached) = handler.pre_execute(request).await? {
        let output = handler.post_execute(request, cached).await?;
        request
            .tracker
            .transition_to_completed(request.node_id(), Some(output.clone()), None)?;
        return Ok(output);
    }

    if let Err(err) = resolve_services(&handler.service_requirements(), &request.services) {
        request.tracker.transition_to_failed(request.node_id(), err.to_string())?;
        return Err(err);
    }

    let result = run_lifecycle(handler, request, inbound).await;

    match result {
        Ok(output) => {
            request
                .tracker
                .transition_to_completed(request.node_id(), Some(output.clone()), None)?;
            Ok(output)
        }
        Err(err) => {
            if let Some(recovered) = handler.on_error(request, &err).await {
                request
                    .tracker
                    .transition_to_completed(request.node_id(), Some(recovered.clone()), None)?;
                Ok(recovered)
            } else {
                request.tracker.transition_to_failed(request.node_id(), err.to_string())?;
                Err(err)
            }
        }
    }
}

async fn run_lifecycle(
    handler: &dyn Handler,
    request: &ExecutionRequest,
    inbound: HashMap<String, Envelope>,
) -> Result<Envelope> {
    let inputs = handler.prepare_inputs(request, inbound).await?;
    let output = with_recovery_async(
        || handler.run(inputs, request),
        &format!("run:{}", request.node_id()),
    )
    .await?;
    let output = handler.serialize_output(output, request)?;
    handler.post_execute(request, output).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::{Node, NodeSchema, PortRequirement, PortSchema};
    use crate::envelope::EnvelopeFactory;
    use std::collections::BTreeMap;

    fn node(node_type: &str) -> Node {
        Node {
            id: NodeId::from("n1"),
            schema: NodeSchema {
                node_type: node_type.to_string(),
                inbound_ports: vec![PortSchema {
                    name: "in".to_string(),
                    requirement: PortRequirement::Optional,
                }],
                outbound_ports: vec!["default".to_string()],
                max_iteration: None,
                retry_policy: None,
            },
            resolved_inputs: BTreeMap::new(),
        }
    }

    fn request(node_type: &str) -> ExecutionRequest {
        ExecutionRequest::new(
            ExecutionId::new(),
            node(node_type),
            0,
            Arc::new(UnifiedStateTracker::new()),
            Arc::new(ServiceRegistry::new()),
            Arc::new(TokenBus::new()),
        )
    }

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        fn node_type(&self) -> &'static str {
            "echo"
        }

        async fn run(&self, inputs: HashMap<String, Envelope>, request: &ExecutionRequest) -> Result<Envelope> {
            let text = inputs
                .get("in")
                .map(|e| e.as_text().unwrap_or_default())
                .unwrap_or_default();
            Ok(EnvelopeFactory::text(text, request.execution_id.clone(), request.node_id().clone()))
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl Handler for PanickingHandler {
        fn node_type(&self) -> &'static str {
            "boom"
        }

        async fn run(&self, _inputs: HashMap<String, Envelope>, _request: &ExecutionRequest) -> Result<Envelope> {
            panic!("handler exploded");
        }
    }

    struct RecoveringHandler;

    #[async_trait]
    impl Handler for RecoveringHandler {
        fn node_type(&self) -> &'static str {
            "recovers"
        }

        async fn run(&self, _inputs: HashMap<String, Envelope>, _request: &ExecutionRequest) -> Result<Envelope> {
            Err(Error::internal("transient failure"))
        }

        async fn on_error(&self, request: &ExecutionRequest, _error: &Error) -> Option<Envelope> {
            Some(EnvelopeFactory::text("fallback", request.execution_id.clone(), request.node_id().clone()))
        }
    }

    struct RequiresMissingService;

    #[async_trait]
    impl Handler for RequiresMissingService {
        fn node_type(&self) -> &'static str {
            "needs_llm"
        }

        fn service_requirements(&self) -> Vec<ServiceDependency> {
            vec![ServiceDependency::required("llm", ServiceKey::LlmService)]
        }

        async fn run(&self, _inputs: HashMap<String, Envelope>, request: &ExecutionRequest) -> Result<Envelope> {
            Ok(EnvelopeFactory::text("unreachable", request.execution_id.clone(), request.node_id().clone()))
        }
    }

    #[tokio::test]
    async fn execute_runs_full_lifecycle_and_completes_node() {
        let req = request("echo");
        let env = EnvelopeFactory::text("hi", req.execution_id.clone(), NodeId::from("a"));
        let mut inbound = HashMap::new();
        inbound.insert("in".to_string(), env);

        let output = execute(&EchoHandler, &req, inbound).await.unwrap();
        assert_eq!(output.to_text().unwrap(), "hi");
        assert_eq!(
            req.tracker.get_node_state(req.node_id()),
            Some(crate::tracker::NodeStatus::Completed)
        );
    }

    #[tokio::test]
    async fn execute_converts_panic_to_failed_node() {
        let req = request("boom");
        let result = execute(&PanickingHandler, &req, HashMap::new()).await;
        assert!(result.is_err());
        assert_eq!(
            req.tracker.get_node_state(req.node_id()),
            Some(crate::tracker::NodeStatus::Failed)
        );
    }

    #[tokio::test]
    async fn on_error_recovers_node_to_completed() {
        let req = request("recovers");
        let output = execute(&RecoveringHandler, &req, HashMap::new()).await.unwrap();
        assert_eq!(output.to_text().unwrap(), "fallback");
        assert_eq!(
            req.tracker.get_node_state(req.node_id()),
            Some(crate::tracker::NodeStatus::Completed)
        );
    }

    #[tokio::test]
    async fn missing_required_service_fails_before_run() {
        let req = request("needs_llm");
        let result = execute(&RequiresMissingService, &req, HashMap::new()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("LLM_SERVICE"));
        assert_eq!(
            req.tracker.get_node_state(req.node_id()),
            Some(crate::tracker::NodeStatus::Failed)
        );
    }

    #[test]
    fn resolve_services_applies_optional_default() {
        let registry = ServiceRegistry::new();
        let deps = vec![ServiceDependency::optional(
            "renderer",
            ServiceKey::TemplateRenderer,
            Some(Value::String("plain".to_string())),
        )];
        let resolved = resolve_services(&deps, &registry).unwrap();
        assert_eq!(resolved["renderer"], Some(Value::String("plain".to_string())));
    }

    #[test]
    fn handler_registry_dispatches_by_node_type() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(EchoHandler));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }
}
