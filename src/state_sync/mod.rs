//! Replicated state cache.
//!
//! Maps `(namespace, key)` to JSON values mirrored locally and in a shared
//! backing store, with change propagation to every process subscribed to a
//! namespace. When the store is disabled or unreachable the cache keeps
//! working in local-only mode.

pub mod cache;
pub mod event;
pub mod listener;
pub mod store;

pub use cache::ReplicatedCache;
pub use event::PropagationEvent;
pub use listener::{same_listener, Origin, StateChange, StateListener};
pub use store::{BackingStore, MemoryStore, RedisStore};
