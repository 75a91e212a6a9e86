//! Room commands sent by clients. Results go back to the requester only,
//! except `clear_captions`, which every connection in the room sees.

use super::frames::{Command, OutboundFrame};
use super::registry::Connection;
use super::{reply, Gateway};
use crate::recording::RecordingOptions;
use anyhow::Result;
use std::collections::HashMap;
use tracing::info;

impl Gateway {
    pub(super) async fn run_command(&self, sender: &Connection, command: Command) -> Result<()> {
        let room = sender.room.as_str();
        match command {
            Command::ClearCaptions => {
                let cleared = self.chat.clear_room_captions(room).await;
                info!(room = %room, user_id = %sender.user_id, cleared, "Captions cleared");
                self.broadcast(
                    room,
                    OutboundFrame::Captions {
                        captions: HashMap::new(),
                    },
                    None,
                )
                .await;
                Ok(())
            }
            Command::StartRecording {
                layout,
                preset,
                output_type,
            } => {
                let defaults = RecordingOptions::default();
                let options = RecordingOptions {
                    layout: layout.unwrap_or(defaults.layout),
                    preset: preset.unwrap_or(defaults.preset),
                    output_type: output_type.unwrap_or(defaults.output_type),
                };
                let frame = match self.recordings.start(room, options).await {
                    Ok(started) => recording_status(true, started.message, Some(started.recording_id)),
                    Err(err) => {
                        let recording_id = err.recording_id().map(str::to_string);
                        recording_status(false, err.to_string(), recording_id)
                    }
                };
                reply(sender, frame)
            }
            Command::StopRecording { recording_id } => {
                let frame = match self.recordings.stop(&recording_id).await {
                    Ok(message) => recording_status(true, message, Some(recording_id)),
                    Err(err) => recording_status(false, err.to_string(), Some(recording_id)),
                };
                reply(sender, frame)
            }
            Command::RecordingStatus { recording_id } => {
                let frame = match self.recordings.status(&recording_id).await {
                    Ok(info) => recording_status(
                        true,
                        format!("Recording {} is {}", info.recording_id, info.status.as_str()),
                        Some(recording_id),
                    ),
                    Err(err) => recording_status(false, err.to_string(), Some(recording_id)),
                };
                reply(sender, frame)
            }
            Command::PlaceCall {
                phone_number,
                language,
            } => {
                let language = language
                    .unwrap_or_else(|| self.chat.settings().default_caption_language.clone());
                let frame = match self.calls.place(room, &phone_number, &language).await {
                    Ok(placed) => call_status(true, placed.message, Some(placed.call_id)),
                    Err(err) => call_status(false, err.to_string(), None),
                };
                reply(sender, frame)
            }
            Command::EndCall { call_id } => {
                let frame = match self.calls.end(&call_id).await {
                    Ok(message) => call_status(true, message, Some(call_id)),
                    Err(err) => call_status(false, err.to_string(), Some(call_id)),
                };
                reply(sender, frame)
            }
            Command::CallStatus { call_id } => {
                let frame = match self.calls.status(&call_id).await {
                    Ok(info) => {
                        let mut message = format!("Call {} is {}", info.call_id, info.status.as_str());
                        if let Some(provider_status) = &info.provider_status {
                            message.push_str(&format!(" ({provider_status})"));
                        }
                        call_status(true, message, Some(call_id))
                    }
                    Err(err) => call_status(false, err.to_string(), Some(call_id)),
                };
                reply(sender, frame)
            }
        }
    }
}

fn recording_status(success: bool, message: String, recording_id: Option<String>) -> OutboundFrame {
    OutboundFrame::RecordingStatus {
        success,
        message,
        recording_id,
    }
}

fn call_status(success: bool, message: String, call_id: Option<String>) -> OutboundFrame {
    OutboundFrame::CallStatus {
        success,
        message,
        call_id,
    }
}
