//! Chat and caption value types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    System,
    /// A finalized live caption kept in the chat log.
    Caption,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::System => "system",
            Self::Caption => "caption",
        }
    }
}

/// An immutable entry in a room's chat log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub room: String,
    pub user_id: String,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
}

/// The live caption of one speaker in a room. Each update replaces the last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    pub text: String,
    pub is_final: bool,
    pub language: String,
    pub timestamp: DateTime<Utc>,
}

/// A caption change for one speaker. `caption` is `None` when it was cleared.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionEvent {
    pub room: String,
    pub user_id: String,
    pub caption: Option<Caption>,
}

/// Outcome of `ChatManager::update_caption`.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionUpdate {
    pub room: String,
    pub user_id: String,
    pub caption: Caption,
    /// The chat message appended for a finalized caption.
    pub message: Option<Message>,
}

/// Allocates `msg_{unix_millis}_{counter}_{instance}` ids.
///
/// The counter makes ids from one generator distinct and increasing even
/// within a millisecond; the instance suffix keeps generators apart.
pub struct MessageIdGenerator {
    counter: AtomicU64,
    instance: String,
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        let instance = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            counter: AtomicU64::new(0),
            instance,
        }
    }

    pub fn next_id(&self) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!(
            "msg_{}_{}_{}",
            Utc::now().timestamp_millis(),
            sequence,
            self.instance
        )
    }
}

/// Splits a `captions` namespace key into `(room, user_id)`.
///
/// The room part is escaped by [`caption_key`], so the first unescaped `:`
/// always ends it even when the room name itself contains colons.
pub(crate) fn split_caption_key(key: &str) -> Option<(String, &str)> {
    let (room, user_id) = key.split_once(':')?;
    if room.is_empty() || user_id.is_empty() {
        return None;
    }
    Some((unescape_room(room)?, user_id))
}

pub(crate) fn caption_key(room: &str, user_id: &str) -> String {
    let mut key = String::with_capacity(room.len() + user_id.len() + 1);
    for ch in room.chars() {
        match ch {
            '%' => key.push_str("%25"),
            ':' => key.push_str("%3A"),
            other => key.push(other),
        }
    }
    key.push(':');
    key.push_str(user_id);
    key
}

fn unescape_room(escaped: &str) -> Option<String> {
    let mut room = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(index) = rest.find('%') {
        room.push_str(&rest[..index]);
        let code = rest.get(index + 1..index + 3)?;
        room.push(match code {
            "25" => '%',
            "3A" => ':',
            _ => return None,
        });
        rest = &rest[index + 3..];
    }
    room.push_str(rest);
    Some(room)
}
