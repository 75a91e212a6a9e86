//! Room chat log and live captions.
//!
//! Everything here is built on the replicated cache: chat messages are written
//! to the `chat_messages` namespace keyed by room, live captions to the
//! `captions` namespace keyed by `{room}:{user_id}`. Without replication the
//! manager notifies its own listeners directly.

mod feed;
mod manager;
pub mod types;

use crate::state_sync::Origin;
use anyhow::Result;
use async_trait::async_trait;

pub use manager::{ChatManager, DeliveryGuard};
pub use types::{Caption, CaptionEvent, CaptionUpdate, Message, MessageIdGenerator, MessageKind};

pub const MESSAGES_NAMESPACE: &str = "chat_messages";
pub const CAPTIONS_NAMESPACE: &str = "captions";

/// Receives every message delivered to a room.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn on_message(&self, message: &Message, origin: Origin) -> Result<()>;
}

/// Receives caption changes for a room.
#[async_trait]
pub trait CaptionListener: Send + Sync {
    async fn on_caption(&self, event: &CaptionEvent, origin: Origin) -> Result<()>;
}

#[cfg(test)]
mod tests;
