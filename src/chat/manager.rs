use super::feed::{CaptionFeed, ChatState, MessageFeed};
use super::types::{caption_key, Caption, CaptionEvent, CaptionUpdate, Message, MessageIdGenerator, MessageKind};
use super::{CaptionListener, MessageListener, CAPTIONS_NAMESPACE, MESSAGES_NAMESPACE};
use crate::audit::AuditSink;
use crate::config::ChatConfig;
use crate::state_sync::{Origin, ReplicatedCache, StateListener};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Keeps a [`ChatManager`]'s message delivery serialized while alive.
#[must_use = "dropping the guard immediately gives up the ordering it provides"]
pub struct DeliveryGuard<'a> {
    _lock: MutexGuard<'a, ()>,
}

/// Owns room chat logs, live caption snapshots and their listeners.
pub struct ChatManager {
    cache: Arc<ReplicatedCache>,
    audit: Arc<dyn AuditSink>,
    settings: ChatConfig,
    state: Arc<ChatState>,
    ids: MessageIdGenerator,
    replicated: AtomicBool,
    /// Serializes message delivery so listeners see a room's messages in
    /// `send_message` completion order.
    delivery: Mutex<()>,
    message_feed: Arc<dyn StateListener>,
    caption_feed: Arc<dyn StateListener>,
}

impl ChatManager {
    pub fn new(cache: Arc<ReplicatedCache>, audit: Arc<dyn AuditSink>, settings: ChatConfig) -> Self {
        let state = Arc::new(ChatState::default());
        let message_feed: Arc<dyn StateListener> = Arc::new(MessageFeed {
            state: state.clone(),
        });
        let caption_feed: Arc<dyn StateListener> = Arc::new(CaptionFeed {
            state: state.clone(),
        });

        Self {
            cache,
            audit,
            settings,
            state,
            ids: MessageIdGenerator::new(),
            replicated: AtomicBool::new(false),
            delivery: Mutex::new(()),
            message_feed,
            caption_feed,
        }
    }

    pub fn settings(&self) -> &ChatConfig {
        &self.settings
    }

    /// Subscribes to the chat namespaces when the cache is connected.
    /// Returns whether replication is active.
    pub async fn initialize(&self) -> bool {
        if !self.cache.is_connected() {
            info!("Chat running in local delivery mode");
            return false;
        }

        let messages = self
            .cache
            .subscribe(MESSAGES_NAMESPACE, self.message_feed.clone())
            .await;
        let captions = self
            .cache
            .subscribe(CAPTIONS_NAMESPACE, self.caption_feed.clone())
            .await;

        if messages && captions {
            self.replicated.store(true, Ordering::Release);
            info!("Chat replication active");
            return true;
        }

        warn!("Chat replication subscription failed; using local delivery mode");
        if messages {
            self.cache
                .unsubscribe(MESSAGES_NAMESPACE, &self.message_feed)
                .await;
        }
        if captions {
            self.cache
                .unsubscribe(CAPTIONS_NAMESPACE, &self.caption_feed)
                .await;
        }
        false
    }

    pub async fn shutdown(&self) {
        if self.replicated.swap(false, Ordering::AcqRel) {
            self.cache
                .unsubscribe(MESSAGES_NAMESPACE, &self.message_feed)
                .await;
            self.cache
                .unsubscribe(CAPTIONS_NAMESPACE, &self.caption_feed)
                .await;
            info!("Chat replication stopped");
        }
    }

    pub fn is_replicated(&self) -> bool {
        self.replicated.load(Ordering::Acquire) && self.cache.is_connected()
    }

    pub async fn send_message(
        &self,
        room: &str,
        user_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> Message {
        self.send_message_ordered(room, user_id, content, kind).await.0
    }

    /// Sends a message and keeps the delivery lock held in the returned
    /// guard. Anything the caller fans out before dropping the guard is
    /// ordered the same way as the room log.
    pub async fn send_message_ordered(
        &self,
        room: &str,
        user_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> (Message, DeliveryGuard<'_>) {
        let delivery = self.delivery.lock().await;
        let message = self.deliver_message(room, user_id, content, kind).await;
        (message, DeliveryGuard { _lock: delivery })
    }

    /// Caller holds `delivery`.
    async fn deliver_message(
        &self,
        room: &str,
        user_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> Message {
        let message = Message {
            id: self.ids.next_id(),
            room: room.to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            kind,
            timestamp: Utc::now(),
        };

        self.state
            .messages
            .lock()
            .await
            .entry(room.to_string())
            .or_default()
            .push(message.clone());

        let propagated = self.is_replicated()
            && match serde_json::to_value(&message) {
                Ok(value) => {
                    self.cache
                        .set_propagated(MESSAGES_NAMESPACE, room, value)
                        .await
                }
                Err(err) => {
                    warn!(room = %room, "Failed to encode chat message: {}", err);
                    false
                }
            };
        if !propagated {
            self.state.notify_message(&message, Origin::Local).await;
        }

        debug!(room = %room, message_id = %message.id, kind = kind.as_str(), "Message sent");
        self.audit.log(
            "chat.message_sent",
            user_id,
            json!({
                "room": room,
                "message_id": message.id,
                "type": kind.as_str(),
            }),
        );

        message
    }

    /// Replaces the speaker's live caption. A final caption with visible
    /// text is also appended to the chat log as a `caption` message.
    pub async fn update_caption(
        &self,
        room: &str,
        user_id: &str,
        text: &str,
        is_final: bool,
        language: Option<&str>,
    ) -> CaptionUpdate {
        self.update_caption_ordered(room, user_id, text, is_final, language)
            .await
            .0
    }

    /// [`update_caption`](Self::update_caption) with the delivery lock kept
    /// in the returned guard, as in
    /// [`send_message_ordered`](Self::send_message_ordered).
    pub async fn update_caption_ordered(
        &self,
        room: &str,
        user_id: &str,
        text: &str,
        is_final: bool,
        language: Option<&str>,
    ) -> (CaptionUpdate, DeliveryGuard<'_>) {
        let delivery = self.delivery.lock().await;

        let caption = Caption {
            text: text.to_string(),
            is_final,
            language: language
                .filter(|l| !l.is_empty())
                .unwrap_or(self.settings.default_caption_language.as_str())
                .to_string(),
            timestamp: Utc::now(),
        };

        self.state
            .captions
            .lock()
            .await
            .entry(room.to_string())
            .or_default()
            .insert(user_id.to_string(), caption.clone());

        let message = if is_final && !text.trim().is_empty() {
            Some(
                self.deliver_message(room, user_id, text, MessageKind::Caption)
                    .await,
            )
        } else {
            None
        };

        let propagated = self.is_replicated()
            && match serde_json::to_value(&caption) {
                Ok(value) => {
                    self.cache
                        .set_propagated(CAPTIONS_NAMESPACE, &caption_key(room, user_id), value)
                        .await
                }
                Err(err) => {
                    warn!(room = %room, "Failed to encode caption: {}", err);
                    false
                }
            };
        if !propagated {
            let event = CaptionEvent {
                room: room.to_string(),
                user_id: user_id.to_string(),
                caption: Some(caption.clone()),
            };
            self.state.notify_caption(&event, Origin::Local).await;
        }

        let update = CaptionUpdate {
            room: room.to_string(),
            user_id: user_id.to_string(),
            caption,
            message,
        };
        (update, DeliveryGuard { _lock: delivery })
    }

    /// Messages strictly before `before_id` (when present in the log), newest
    /// `limit` of them, oldest first.
    pub async fn get_room_messages(
        &self,
        room: &str,
        limit: Option<usize>,
        before_id: Option<&str>,
    ) -> Vec<Message> {
        let limit = limit.unwrap_or(self.settings.default_page_limit);
        let messages = self.state.messages.lock().await;
        let Some(log) = messages.get(room) else {
            return Vec::new();
        };

        let window = match before_id.and_then(|id| log.iter().position(|m| m.id == id)) {
            Some(index) => &log[..index],
            None => &log[..],
        };
        let start = window.len().saturating_sub(limit);
        window[start..].to_vec()
    }

    pub async fn get_room_captions(&self, room: &str) -> HashMap<String, Caption> {
        self.state
            .captions
            .lock()
            .await
            .get(room)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn clear_room_messages(&self, room: &str) {
        self.state.messages.lock().await.remove(room);
        if self.is_replicated() {
            self.cache.delete(MESSAGES_NAMESPACE, room).await;
        }
        info!(room = %room, "Room messages cleared");
    }

    /// Drops every live caption in the room. Returns how many were removed.
    pub async fn clear_room_captions(&self, room: &str) -> usize {
        let removed = self
            .state
            .captions
            .lock()
            .await
            .remove(room)
            .unwrap_or_default();

        if self.is_replicated() {
            for user_id in removed.keys() {
                self.cache
                    .delete(CAPTIONS_NAMESPACE, &caption_key(room, user_id))
                    .await;
            }
        }
        info!(room = %room, count = removed.len(), "Room captions cleared");
        removed.len()
    }

    /// Returns `false` if the listener was already registered for the room.
    pub async fn add_message_listener(&self, room: &str, listener: Arc<dyn MessageListener>) -> bool {
        self.state.add_message_listener(room, listener).await
    }

    pub async fn remove_message_listener(&self, room: &str, listener: &Arc<dyn MessageListener>) -> bool {
        self.state.remove_message_listener(room, listener).await
    }

    pub async fn add_caption_listener(&self, room: &str, listener: Arc<dyn CaptionListener>) -> bool {
        self.state.add_caption_listener(room, listener).await
    }

    pub async fn remove_caption_listener(&self, room: &str, listener: &Arc<dyn CaptionListener>) -> bool {
        self.state.remove_caption_listener(room, listener).await
    }

    pub async fn has_message_listeners(&self, room: &str) -> bool {
        self.state.has_message_listeners(room).await
    }

    pub async fn has_caption_listeners(&self, room: &str) -> bool {
        self.state.has_caption_listeners(room).await
    }
}
