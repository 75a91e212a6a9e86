//! Fans changes made by other instances out to this instance's connections.

use super::frames::OutboundFrame;
use super::registry::RoomRegistry;
use crate::chat::{CaptionEvent, CaptionListener, Message, MessageListener};
use crate::state_sync::Origin;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Registered as a room's message and caption listener while the room has
/// live connections. Local changes are broadcast by whoever made them, so
/// only remote ones are relayed here.
pub struct RoomRelay {
    registry: Arc<Mutex<RoomRegistry>>,
}

impl RoomRelay {
    pub fn new(registry: Arc<Mutex<RoomRegistry>>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl MessageListener for RoomRelay {
    async fn on_message(&self, message: &Message, origin: Origin) -> Result<()> {
        if origin == Origin::Local {
            return Ok(());
        }
        let frame = OutboundFrame::Message {
            message: message.clone(),
        };
        let delivered = self.registry.lock().await.broadcast(&message.room, &frame, None);
        debug!(room = %message.room, delivered, "Relayed remote message");
        Ok(())
    }
}

#[async_trait]
impl CaptionListener for RoomRelay {
    async fn on_caption(&self, event: &CaptionEvent, origin: Origin) -> Result<()> {
        if origin == Origin::Local {
            return Ok(());
        }
        let frame = OutboundFrame::Caption {
            user_id: event.user_id.clone(),
            caption: event.caption.clone(),
        };
        let delivered = self.registry.lock().await.broadcast(&event.room, &frame, None);
        debug!(room = %event.room, delivered, "Relayed remote caption");
        Ok(())
    }
}
