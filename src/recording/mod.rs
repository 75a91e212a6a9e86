//! Room recording control.
//!
//! Recording itself happens in an external egress service; this module only
//! starts, stops and queries egress jobs and tracks which rooms are recording.

pub mod egress;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use egress::EgressRecordingController;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingOptions {
    pub layout: String,
    pub preset: String,
    pub output_type: String,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            layout: "audio-only".to_string(),
            preset: "audio-only".to_string(),
            output_type: "mp4".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// Egress request in flight.
    Starting,
    Active,
    Stopped,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingInfo {
    pub recording_id: String,
    pub room: String,
    pub egress_id: Option<String>,
    pub status: RecordingState,
    pub start_time: DateTime<Utc>,
    pub stop_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub options: RecordingOptions,
    /// Last status document returned by the egress service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub egress_status: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingStarted {
    pub recording_id: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("recording is not enabled")]
    Disabled,
    #[error("recording is not enabled for room {0}")]
    RoomNotEnabled(String),
    #[error("recording service is not configured: {0}")]
    NotConfigured(String),
    #[error("room {room} is already recording (ID: {recording_id})")]
    AlreadyRecording { room: String, recording_id: String },
    #[error("recording {0} is already stopped")]
    AlreadyStopped(String),
    #[error("recording not found: {0}")]
    NotFound(String),
    #[error("egress request failed: {0}")]
    Egress(String),
}

impl RecordingError {
    /// Recording id worth echoing back to the requester, if any.
    pub fn recording_id(&self) -> Option<&str> {
        match self {
            RecordingError::AlreadyRecording { recording_id, .. } => Some(recording_id),
            RecordingError::AlreadyStopped(id) | RecordingError::NotFound(id) => Some(id),
            _ => None,
        }
    }
}

#[async_trait]
pub trait RecordingController: Send + Sync {
    async fn start(
        &self,
        room: &str,
        options: RecordingOptions,
    ) -> Result<RecordingStarted, RecordingError>;

    /// Returns a human-readable confirmation.
    async fn stop(&self, recording_id: &str) -> Result<String, RecordingError>;

    async fn status(&self, recording_id: &str) -> Result<RecordingInfo, RecordingError>;

    async fn list(&self, room: Option<&str>) -> Vec<RecordingInfo>;
}

/// Used when recording is switched off in config.
pub struct DisabledRecordingController;

#[async_trait]
impl RecordingController for DisabledRecordingController {
    async fn start(
        &self,
        _room: &str,
        _options: RecordingOptions,
    ) -> Result<RecordingStarted, RecordingError> {
        Err(RecordingError::Disabled)
    }

    async fn stop(&self, _recording_id: &str) -> Result<String, RecordingError> {
        Err(RecordingError::Disabled)
    }

    async fn status(&self, _recording_id: &str) -> Result<RecordingInfo, RecordingError> {
        Err(RecordingError::Disabled)
    }

    async fn list(&self, _room: Option<&str>) -> Vec<RecordingInfo> {
        Vec::new()
    }
}
