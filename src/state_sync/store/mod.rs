//! Backing store abstraction shared by every process in a deployment.
//!
//! A store provides durable string keys plus publish/subscribe channels. The
//! cache only ever stores JSON-encoded values and JSON propagation envelopes.

pub mod memory;
pub mod redis_store;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Stream of raw payloads received on one channel.
pub type PayloadStream = BoxStream<'static, String>;

#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Round-trip check used when the cache connects.
    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// All `(key, value)` pairs whose key starts with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Opens a subscription. Dropping the stream releases it.
    async fn subscribe(&self, channel: &str) -> Result<PayloadStream>;
}
