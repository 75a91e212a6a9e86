//! Listener abstraction for namespace change notifications.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Whether a change was published by this cache instance or another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// A change delivered to namespace listeners. `value` is `None` for deletes.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub namespace: String,
    pub key: String,
    pub value: Option<Value>,
    pub origin: Origin,
}

/// Receives propagated changes for a namespace.
///
/// Listeners are registered as `Arc<dyn StateListener>`; the allocation is the
/// listener's identity for idempotent subscribe and for removal.
#[async_trait]
pub trait StateListener: Send + Sync {
    async fn on_change(&self, change: &StateChange) -> Result<()>;
}

/// Identity comparison for shared listener handles.
pub fn same_listener<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Runs one listener invocation, turning errors and panics into a message so
/// the caller can log it and move on to the next listener.
pub async fn run_isolated<F>(invocation: F) -> Result<(), String>
where
    F: Future<Output = Result<()>>,
{
    match AssertUnwindSafe(invocation).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(_) => Err("listener panicked".to_string()),
    }
}
