//! Panic recovery utilities for handler invocation.
//!
//! These utilities ensure that a panicking handler doesn't take down the
//! worker task driving it — a single misbehaving node should degrade to a
//! FAILED node, not crash the engine.

use crate::types::{Error, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Executes a function with panic recovery. A caught panic is converted to
/// `Error::internal` carrying the extracted message.
pub fn with_recovery<F, T>(operation: F, operation_name: &str) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(operation)) {
        Ok(result) => result,
        Err(panic_payload) => {
            let panic_msg = extract_panic_message(&panic_payload);
            tracing::error!(
                operation = operation_name,
                panic = %panic_msg,
                "panic_recovered"
            );
            Err(Error::internal(format!("panic in {operation_name}: {panic_msg}")))
        }
    }
}

/// Executes an async function with panic recovery. Only the synchronous
/// construction of the future is guarded by `catch_unwind` — a panic
/// inside the polled future still propagates, since `catch_unwind` cannot
/// span an `.await`; handler bodies that may panic mid-`run` should keep
/// their panicking code synchronous and call into it via `with_recovery`.
pub async fn with_recovery_async<F, Fut, T>(operation: F, operation_name: &str) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    match catch_unwind(AssertUnwindSafe(operation)) {
        Ok(fut) => fut.await,
        Err(panic_payload) => {
            let panic_msg = extract_panic_message(&panic_payload);
            tracing::error!(
                operation = operation_name,
                panic = %panic_msg,
                "async_panic_recovered"
            );
            Err(Error::internal(format!(
                "panic in {operation_name}: {panic_msg}"
            )))
        }
    }
}

fn extract_panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic (no message)".to_string()
    }
}
