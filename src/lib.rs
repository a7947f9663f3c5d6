//! # dipeo-engine — Diagram Execution Engine
//!
//! A token-driven scheduler and execution runtime for directed diagrams of
//! typed node handlers. Nodes communicate through immutable envelopes routed
//! over a per-execution token bus; a single state tracker is the source of
//! truth for per-node status, iteration counts, and history; a WAL-backed
//! SQLite store persists Execution State for recovery and post-mortem
//! inspection.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌───────────────────────────────────┐
//!  run_cancellable → │         Execution Engine           │
//!                    │  ┌─────────┐ ┌─────────┐           │
//!                    │  │Scheduler│ │ Token   │           │
//!                    │  │         │ │ Bus     │           │
//!                    │  └─────────┘ └─────────┘           │
//!                    │  ┌─────────┐ ┌─────────┐           │
//!                    │  │ State   │ │ Event   │           │
//!                    │  │ Tracker │ │ Emitter │           │
//!                    │  └─────────┘ └─────────┘           │
//!                    └───────────────┬───────────────────┘
//!                                    │ persists
//!                            ┌───────▼────────┐
//!                            │  State Store   │
//!                            │ (SQLite + WAL) │
//!                            └────────────────┘
//! ```
//!
//! Node behavior lives outside this crate, behind the [`handler::Handler`]
//! trait; this crate owns only the graph, the scheduling, and the execution
//! contract.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod bus;
pub mod diagram;
pub mod engine;
pub mod envelope;
pub mod events;
pub mod handler;
pub mod recovery;
pub mod retry;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod subdiagram;
pub mod tracker;
pub mod types;

// Internal utilities
pub mod observability;

pub use diagram::{Diagram, Edge, Node, NodeSchema, PortRequirement, PortSchema};
pub use engine::{CancellationToken, ExecutionEngine, ExecutionReport, ExecutionStatus};
pub use envelope::{Envelope, EnvelopeFactory};
pub use events::{Event, EventEmitter, EventKind};
pub use handler::{Handler, HandlerRegistry};
pub use retry::{RetryPolicy, RetryStrategy};
pub use scheduler::Scheduler;
pub use services::{ServiceKey, ServiceRegistry};
pub use store::StateStore;
pub use tracker::{NodeStatus, UnifiedStateTracker};
pub use types::{Config, Error, Result};
