//! Per-room WebSocket fan-out.
//!
//! The gateway owns the room registry, turns inbound client frames into chat
//! and collaborator calls, and broadcasts the results. A connection is
//! registered when it opens and removed through its [`ConnectionGuard`] when
//! it closes; the room's relay listeners live exactly as long as the room has
//! connections.

mod commands;
pub mod frames;
pub mod registry;
mod relay;
pub mod socket;

use crate::calls::CallController;
use crate::chat::{
    CaptionListener, CaptionUpdate, ChatManager, Message, MessageKind, MessageListener,
};
use crate::recording::RecordingController;
use crate::state_sync::listener::run_isolated;
use anyhow::{bail, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

pub use frames::{parse_inbound, Command, FrameError, InboundFrame, OutboundFrame};
pub use registry::{Connection, ConnectionId, RoomRegistry};
pub use relay::RoomRelay;
pub use socket::router;

pub struct Gateway {
    chat: Arc<ChatManager>,
    recordings: Arc<dyn RecordingController>,
    calls: Arc<dyn CallController>,
    registry: Arc<Mutex<RoomRegistry>>,
    message_relay: Arc<dyn MessageListener>,
    caption_relay: Arc<dyn CaptionListener>,
    next_connection_id: AtomicU64,
}

impl Gateway {
    pub fn new(
        chat: Arc<ChatManager>,
        recordings: Arc<dyn RecordingController>,
        calls: Arc<dyn CallController>,
    ) -> Self {
        let registry = Arc::new(Mutex::new(RoomRegistry::default()));
        let relay = Arc::new(RoomRelay::new(registry.clone()));

        Self {
            chat,
            recordings,
            calls,
            registry,
            message_relay: relay.clone(),
            caption_relay: relay,
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn chat(&self) -> &Arc<ChatManager> {
        &self.chat
    }

    /// Registers a connection and queues its welcome, history and caption
    /// snapshot frames, in that order.
    pub async fn open(
        self: &Arc<Self>,
        room: &str,
        user_id: &str,
    ) -> (ConnectionGuard, mpsc::UnboundedReceiver<OutboundFrame>) {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (connection, outbound) = Connection::new(id, room, user_id);

        {
            let mut registry = self.registry.lock().await;
            if registry.insert(connection.clone()) {
                self.chat
                    .add_message_listener(room, self.message_relay.clone())
                    .await;
                self.chat
                    .add_caption_listener(room, self.caption_relay.clone())
                    .await;
                debug!(room = %room, "Room relay registered");
            }

            // Queued before the lock is released so no broadcast can overtake
            // the initial snapshot.
            connection.send(OutboundFrame::system(format!(
                "Welcome {user_id} to room {room}"
            )));

            let history_limit = self.chat.settings().history_replay_limit;
            let history = self
                .chat
                .get_room_messages(room, Some(history_limit), None)
                .await;
            if !history.is_empty() {
                connection.send(OutboundFrame::History { messages: history });
            }

            let captions = self.chat.get_room_captions(room).await;
            connection.send(OutboundFrame::Captions { captions });
        }

        info!(room = %room, user_id = %user_id, connection_id = id, "Connection opened");

        let guard = ConnectionGuard {
            gateway: self.clone(),
            connection,
            released: false,
        };
        (guard, outbound)
    }

    async fn close(&self, room: &str, id: ConnectionId) {
        let mut registry = self.registry.lock().await;
        match registry.remove(room, id) {
            Some(true) => {
                self.chat
                    .remove_message_listener(room, &self.message_relay)
                    .await;
                self.chat
                    .remove_caption_listener(room, &self.caption_relay)
                    .await;
                info!(room = %room, connection_id = id, "Connection closed; room is now empty");
            }
            Some(false) => {
                info!(room = %room, connection_id = id, "Connection closed");
            }
            None => {
                debug!(room = %room, connection_id = id, "Connection already closed");
            }
        }
    }

    /// Handles one inbound text frame. Failures are logged and never close
    /// the connection.
    pub async fn handle_frame(&self, sender: &Connection, raw: &str) {
        let frame = match parse_inbound(raw) {
            Ok(frame) => frame,
            Err(FrameError::UnknownCommand(action)) => {
                sender.send(OutboundFrame::system(format!("Unknown command: {action}")));
                return;
            }
            Err(err) => {
                warn!(
                    room = %sender.room,
                    connection_id = sender.id,
                    "Dropping inbound frame: {}",
                    err
                );
                return;
            }
        };

        if let Err(err) = run_isolated(self.dispatch(sender, frame)).await {
            warn!(
                room = %sender.room,
                connection_id = sender.id,
                "Failed to handle inbound frame: {}",
                err
            );
        }
    }

    async fn dispatch(&self, sender: &Connection, frame: InboundFrame) -> Result<()> {
        match frame {
            InboundFrame::Text { content } => {
                let (message, _delivery) = self
                    .chat
                    .send_message_ordered(&sender.room, &sender.user_id, &content, MessageKind::Text)
                    .await;
                self.broadcast(&sender.room, OutboundFrame::Message { message }, Some(sender.id))
                    .await;
            }
            InboundFrame::Caption {
                text,
                is_final,
                language,
            } => {
                let (update, _delivery) = self
                    .chat
                    .update_caption_ordered(
                        &sender.room,
                        &sender.user_id,
                        &text,
                        is_final,
                        language.as_deref(),
                    )
                    .await;
                self.broadcast_caption(update, Some(sender.id)).await;
            }
            InboundFrame::Command(command) => self.run_command(sender, command).await?,
        }
        Ok(())
    }

    /// Queues `frame` for every connection in the room except `exclude`.
    pub async fn broadcast(
        &self,
        room: &str,
        frame: OutboundFrame,
        exclude: Option<ConnectionId>,
    ) -> usize {
        self.registry.lock().await.broadcast(room, &frame, exclude)
    }

    async fn broadcast_caption(&self, update: CaptionUpdate, exclude: Option<ConnectionId>) {
        let room = update.room;
        self.broadcast(
            &room,
            OutboundFrame::Caption {
                user_id: update.user_id,
                caption: Some(update.caption),
            },
            exclude,
        )
        .await;
        if let Some(message) = update.message {
            self.broadcast(&room, OutboundFrame::Message { message }, exclude)
                .await;
        }
    }

    /// Sends a message on behalf of a non-socket client and broadcasts it to
    /// every connection in the room. Local broadcasts happen before the chat
    /// delivery guard is released, so every connection sees messages in log
    /// order.
    pub async fn publish_message(
        &self,
        room: &str,
        user_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> Message {
        let (message, _delivery) = self
            .chat
            .send_message_ordered(room, user_id, content, kind)
            .await;
        self.broadcast(
            room,
            OutboundFrame::Message {
                message: message.clone(),
            },
            None,
        )
        .await;
        message
    }

    pub async fn publish_caption(
        &self,
        room: &str,
        user_id: &str,
        text: &str,
        is_final: bool,
        language: Option<&str>,
    ) -> CaptionUpdate {
        let (update, _delivery) = self
            .chat
            .update_caption_ordered(room, user_id, text, is_final, language)
            .await;
        self.broadcast_caption(update.clone(), None).await;
        update
    }

    pub async fn connection_count(&self, room: &str) -> usize {
        self.registry.lock().await.connection_count(room)
    }

    pub async fn contains_room(&self, room: &str) -> bool {
        self.registry.lock().await.contains_room(room)
    }

    pub async fn room_count(&self) -> usize {
        self.registry.lock().await.room_count()
    }
}

fn reply(sender: &Connection, frame: OutboundFrame) -> Result<()> {
    if !sender.send(frame) {
        bail!("connection {} is closed", sender.id);
    }
    Ok(())
}

/// Unregisters its connection when released, or on drop if the socket task
/// ends without reaching `release`.
pub struct ConnectionGuard {
    gateway: Arc<Gateway>,
    connection: Connection,
    released: bool,
}

impl ConnectionGuard {
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub async fn release(mut self) {
        self.released = true;
        self.gateway
            .close(&self.connection.room, self.connection.id)
            .await;
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let gateway = self.gateway.clone();
        let room = self.connection.room.clone();
        let id = self.connection.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { gateway.close(&room, id).await });
            }
            Err(_) => {
                warn!(room = %room, connection_id = id, "No runtime to unregister connection");
            }
        }
    }
}
