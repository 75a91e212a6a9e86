//! JSON frames exchanged with room clients.
//!
//! Every frame is an object tagged by `type`. Commands carry a second tag,
//! `action`.

use crate::chat::{Caption, Message};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Text {
        content: String,
    },
    Caption {
        text: String,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        language: Option<String>,
    },
    Command(Command),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    ClearCaptions,
    StartRecording {
        #[serde(default)]
        layout: Option<String>,
        #[serde(default)]
        preset: Option<String>,
        #[serde(default)]
        output_type: Option<String>,
    },
    StopRecording {
        recording_id: String,
    },
    RecordingStatus {
        recording_id: String,
    },
    PlaceCall {
        phone_number: String,
        #[serde(default)]
        language: Option<String>,
    },
    EndCall {
        call_id: String,
    },
    CallStatus {
        call_id: String,
    },
}

impl Command {
    pub const ACTIONS: &'static [&'static str] = &[
        "clear_captions",
        "start_recording",
        "stop_recording",
        "recording_status",
        "place_call",
        "end_call",
        "call_status",
    ];
}

const FRAME_TYPES: &[&str] = &["text", "caption", "command"];

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no type")]
    MissingType,
    #[error("unknown frame type: {0}")]
    UnknownType(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("invalid {kind} frame: {source}")]
    Invalid {
        kind: String,
        source: serde_json::Error,
    },
}

pub fn parse_inbound(raw: &str) -> Result<InboundFrame, FrameError> {
    let value: Value = serde_json::from_str(raw)?;
    serde_json::from_value::<InboundFrame>(value.clone()).map_err(|err| classify(&value, err))
}

fn classify(value: &Value, err: serde_json::Error) -> FrameError {
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return FrameError::MissingType;
    };
    if !FRAME_TYPES.contains(&kind) {
        return FrameError::UnknownType(kind.to_string());
    }
    if kind == "command" {
        match value.get("action").and_then(Value::as_str) {
            Some(action) if !Command::ACTIONS.contains(&action) => {
                return FrameError::UnknownCommand(action.to_string())
            }
            None => return FrameError::UnknownCommand(String::new()),
            _ => {}
        }
    }
    FrameError::Invalid {
        kind: kind.to_string(),
        source: err,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    System {
        content: String,
        timestamp: DateTime<Utc>,
    },
    History {
        messages: Vec<Message>,
    },
    Captions {
        captions: HashMap<String, Caption>,
    },
    Message {
        message: Message,
    },
    Caption {
        user_id: String,
        caption: Option<Caption>,
    },
    RecordingStatus {
        success: bool,
        message: String,
        recording_id: Option<String>,
    },
    CallStatus {
        success: bool,
        message: String,
        call_id: Option<String>,
    },
}

impl OutboundFrame {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}
