//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the execution engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Validation errors raised by `pre_execute` / `handler.validate`.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found (execution id, node id, service key, …).
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid state transition (tracker completion-rule violations).
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// A handler declared a required service that was never registered.
    #[error("service misconfiguration in {handler}: missing required service {key}")]
    ServiceMissing { handler: String, key: String },

    /// Internal/unexpected errors, including recovered panics.
    #[error("internal error: {0}")]
    Internal(String),

    /// Execution was cancelled (ABORTED).
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A handler or state-store operation exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// State store errors after exhausting reconnect/retry attempts.
    #[error("state store error: {0}")]
    StateStore(#[from] sqlx::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn service_missing(handler: impl Into<String>, key: impl Into<String>) -> Self {
        Self::ServiceMissing {
            handler: handler.into(),
            key: key.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// True for errors that represent normal, per-node failures rather than
    /// engine-level faults (used to decide whether a failure should surface
    /// as a FAILED node vs. propagate out of the worker task).
    pub fn is_node_local(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::Timeout(_) | Error::ServiceMissing { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_missing_names_handler_and_key() {
        let err = Error::service_missing("ApiJobHandler", "API_INVOKER");
        assert!(err.to_string().contains("ApiJobHandler"));
        assert!(err.to_string().contains("API_INVOKER"));
    }

    #[test]
    fn validation_error_is_node_local() {
        assert!(Error::validation("bad input").is_node_local());
        assert!(!Error::internal("boom").is_node_local());
    }

    #[test]
    fn serde_error_converts_via_from() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json");
        let err: Result<()> = bad.map(|_| ()).map_err(Error::from);
        assert!(matches!(err, Err(Error::Serialization(_))));
    }
}
