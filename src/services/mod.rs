//! Service Registry (C2) — a process-wide, capability-keyed map of
//! provider instances.
//!
//! Keys are opaque symbols known at compile time (`ServiceKey`); providers
//! are registered once at startup and the registry is read-only for the
//! remainder of the process's life, so no internal locking is needed.

use crate::types::{Error, Result};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Capability keys a handler may depend on. New keys are additive; this
/// enum is intentionally not `#[non_exhaustive]` since it is a closed,
/// process-wide vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKey {
    ApiInvoker,
    LlmService,
    FilesystemAdapter,
    AstParser,
    TemplateRenderer,
    IrCache,
    IrBuilderRegistry,
    ExecutionContext,
    Diagram,
    ExecutionOrchestrator,
    PromptBuilder,
}

impl ServiceKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKey::ApiInvoker => "API_INVOKER",
            ServiceKey::LlmService => "LLM_SERVICE",
            ServiceKey::FilesystemAdapter => "FILESYSTEM_ADAPTER",
            ServiceKey::AstParser => "AST_PARSER",
            ServiceKey::TemplateRenderer => "TEMPLATE_RENDERER",
            ServiceKey::IrCache => "IR_CACHE",
            ServiceKey::IrBuilderRegistry => "IR_BUILDER_REGISTRY",
            ServiceKey::ExecutionContext => "EXECUTION_CONTEXT",
            ServiceKey::Diagram => "DIAGRAM",
            ServiceKey::ExecutionOrchestrator => "EXECUTION_ORCHESTRATOR",
            ServiceKey::PromptBuilder => "PROMPT_BUILDER",
        }
    }
}

/// Process-wide map of capability keys to type-erased provider instances.
///
/// NOT a separate actor — owned by the process and read from freely once
/// populated at startup.
#[derive(Default)]
pub struct ServiceRegistry {
    providers: HashMap<ServiceKey, Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("registered", &self.providers.keys().map(ServiceKey::as_str).collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under `key`, overwriting any previous provider.
    pub fn register<T: Any + Send + Sync>(&mut self, key: ServiceKey, provider: Arc<T>) {
        self.providers.insert(key, provider);
    }

    /// Fetches a required provider, downcast to `T`. Fails if the key was
    /// never registered or was registered under a different type.
    pub fn get_required<T: Any + Send + Sync>(&self, key: ServiceKey) -> Result<Arc<T>> {
        self.providers
            .get(&key)
            .ok_or_else(|| Error::service_missing("<registry>", key.as_str()))?
            .clone()
            .downcast::<T>()
            .map_err(|_| Error::internal(format!("service {} registered with wrong type", key.as_str())))
    }

    /// Fetches an optional provider, falling back to `None` on miss or type
    /// mismatch rather than failing.
    pub fn get_optional<T: Any + Send + Sync>(&self, key: ServiceKey) -> Option<Arc<T>> {
        self.providers.get(&key)?.clone().downcast::<T>().ok()
    }

    pub fn has(&self, key: ServiceKey) -> bool {
        self.providers.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
