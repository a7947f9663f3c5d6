//! Core types shared across the execution engine.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (ExecutionId, NodeId, EnvelopeId, …)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Layered configuration for the store, engine defaults, and envelopes

mod config;
mod errors;
mod ids;

pub use config::{Config, DefaultLimits, EnvelopeConfig, ObservabilityConfig, StateStoreConfig};
pub use errors::{Error, Result};
pub use ids::{DiagramId, EnvelopeId, ExecutionId, NodeId};
