//! Per-room chat state and the cache listeners that keep it in sync.

use super::types::{split_caption_key, Caption, CaptionEvent, Message};
use super::{CaptionListener, MessageListener};
use crate::state_sync::listener::run_isolated;
use crate::state_sync::{same_listener, Origin, StateChange, StateListener};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Default)]
pub(super) struct ChatState {
    pub(super) messages: Mutex<HashMap<String, Vec<Message>>>,
    pub(super) captions: Mutex<HashMap<String, HashMap<String, Caption>>>,
    message_listeners: Mutex<HashMap<String, Vec<Arc<dyn MessageListener>>>>,
    caption_listeners: Mutex<HashMap<String, Vec<Arc<dyn CaptionListener>>>>,
}

impl ChatState {
    pub(super) async fn add_message_listener(&self, room: &str, listener: Arc<dyn MessageListener>) -> bool {
        let mut listeners = self.message_listeners.lock().await;
        let entry = listeners.entry(room.to_string()).or_default();
        if entry.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        entry.push(listener);
        true
    }

    pub(super) async fn remove_message_listener(&self, room: &str, listener: &Arc<dyn MessageListener>) -> bool {
        let mut listeners = self.message_listeners.lock().await;
        let Some(entry) = listeners.get_mut(room) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|l| !same_listener(l, listener));
        let removed = entry.len() != before;
        if entry.is_empty() {
            listeners.remove(room);
        }
        removed
    }

    pub(super) async fn add_caption_listener(&self, room: &str, listener: Arc<dyn CaptionListener>) -> bool {
        let mut listeners = self.caption_listeners.lock().await;
        let entry = listeners.entry(room.to_string()).or_default();
        if entry.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        entry.push(listener);
        true
    }

    pub(super) async fn remove_caption_listener(&self, room: &str, listener: &Arc<dyn CaptionListener>) -> bool {
        let mut listeners = self.caption_listeners.lock().await;
        let Some(entry) = listeners.get_mut(room) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|l| !same_listener(l, listener));
        let removed = entry.len() != before;
        if entry.is_empty() {
            listeners.remove(room);
        }
        removed
    }

    pub(super) async fn has_message_listeners(&self, room: &str) -> bool {
        self.message_listeners.lock().await.contains_key(room)
    }

    pub(super) async fn has_caption_listeners(&self, room: &str) -> bool {
        self.caption_listeners.lock().await.contains_key(room)
    }

    pub(super) async fn notify_message(&self, message: &Message, origin: Origin) {
        let listeners = self
            .message_listeners
            .lock()
            .await
            .get(&message.room)
            .cloned()
            .unwrap_or_default();

        for listener in listeners {
            if let Err(err) = run_isolated(listener.on_message(message, origin)).await {
                warn!(room = %message.room, message_id = %message.id, "Message listener failed: {}", err);
            }
        }
    }

    pub(super) async fn notify_caption(&self, event: &CaptionEvent, origin: Origin) {
        let listeners = self
            .caption_listeners
            .lock()
            .await
            .get(&event.room)
            .cloned()
            .unwrap_or_default();

        for listener in listeners {
            if let Err(err) = run_isolated(listener.on_caption(event, origin)).await {
                warn!(room = %event.room, user_id = %event.user_id, "Caption listener failed: {}", err);
            }
        }
    }
}

/// Applies `chat_messages` changes to the room logs.
pub(super) struct MessageFeed {
    pub(super) state: Arc<ChatState>,
}

#[async_trait]
impl StateListener for MessageFeed {
    async fn on_change(&self, change: &StateChange) -> Result<()> {
        let room = change.key.as_str();
        let Some(value) = &change.value else {
            if change.origin == Origin::Remote {
                debug!(room = %room, "Room log cleared by another instance");
                self.state.messages.lock().await.remove(room);
            }
            return Ok(());
        };

        let message: Message = match serde_json::from_value(value.clone()) {
            Ok(message) => message,
            Err(err) => {
                warn!(room = %room, error = %err, "Ignoring undecodable chat message");
                return Ok(());
            }
        };

        if change.origin == Origin::Remote {
            let mut messages = self.state.messages.lock().await;
            let log = messages.entry(message.room.clone()).or_default();
            if !log.iter().any(|existing| existing.id == message.id) {
                log.push(message.clone());
            }
        }

        self.state.notify_message(&message, change.origin).await;
        Ok(())
    }
}

/// Applies `captions` changes to the caption snapshots.
pub(super) struct CaptionFeed {
    pub(super) state: Arc<ChatState>,
}

#[async_trait]
impl StateListener for CaptionFeed {
    async fn on_change(&self, change: &StateChange) -> Result<()> {
        let Some((room, user_id)) = split_caption_key(&change.key) else {
            warn!(key = %change.key, "Ignoring caption with malformed key");
            return Ok(());
        };

        let caption = match &change.value {
            Some(value) => match serde_json::from_value::<Caption>(value.clone()) {
                Ok(caption) => Some(caption),
                Err(err) => {
                    warn!(key = %change.key, error = %err, "Ignoring undecodable caption");
                    return Ok(());
                }
            },
            None => None,
        };

        if change.origin == Origin::Remote {
            let mut captions = self.state.captions.lock().await;
            match &caption {
                Some(caption) => {
                    captions
                        .entry(room.clone())
                        .or_default()
                        .insert(user_id.to_string(), caption.clone());
                }
                None => {
                    if let Some(room_captions) = captions.get_mut(&room) {
                        room_captions.remove(user_id);
                        if room_captions.is_empty() {
                            captions.remove(&room);
                        }
                    }
                }
            }
        }

        let event = CaptionEvent {
            room,
            user_id: user_id.to_string(),
            caption,
        };
        self.state.notify_caption(&event, change.origin).await;
        Ok(())
    }
}
