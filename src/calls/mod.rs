//! Outbound phone calls bridged into a room.
//!
//! Telephony signaling belongs to the provider; this module places, ends and
//! queries calls over the provider's REST API and remembers which room each
//! call was bridged into.

pub mod twilio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use twilio::TwilioCallController;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Initiated,
    Ended,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Ended => "ended",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallInfo {
    pub call_id: String,
    pub room: String,
    pub phone_number: String,
    pub language: String,
    pub direction: String,
    pub status: CallState,
    pub provider_sid: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallPlaced {
    pub call_id: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("phone calls are not enabled")]
    Disabled,
    #[error("call provider is not configured: {0}")]
    NotConfigured(String),
    #[error("invalid phone number: {0}")]
    InvalidNumber(String),
    #[error("call not found: {0}")]
    NotFound(String),
    #[error("call {0} has already ended")]
    AlreadyEnded(String),
    #[error("call provider request failed: {0}")]
    Provider(String),
}

impl CallError {
    pub fn call_id(&self) -> Option<&str> {
        match self {
            CallError::NotFound(id) | CallError::AlreadyEnded(id) => Some(id),
            _ => None,
        }
    }
}

#[async_trait]
pub trait CallController: Send + Sync {
    async fn place(
        &self,
        room: &str,
        phone_number: &str,
        language: &str,
    ) -> Result<CallPlaced, CallError>;

    async fn end(&self, call_id: &str) -> Result<String, CallError>;

    async fn status(&self, call_id: &str) -> Result<CallInfo, CallError>;

    async fn list(&self, room: Option<&str>) -> Vec<CallInfo>;
}

pub struct DisabledCallController;

#[async_trait]
impl CallController for DisabledCallController {
    async fn place(
        &self,
        _room: &str,
        _phone_number: &str,
        _language: &str,
    ) -> Result<CallPlaced, CallError> {
        Err(CallError::Disabled)
    }

    async fn end(&self, _call_id: &str) -> Result<String, CallError> {
        Err(CallError::Disabled)
    }

    async fn status(&self, _call_id: &str) -> Result<CallInfo, CallError> {
        Err(CallError::Disabled)
    }

    async fn list(&self, _room: Option<&str>) -> Vec<CallInfo> {
        Vec::new()
    }
}

/// Normalizes a dialable number to E.164-style `+digits`.
pub fn normalize_number(raw: &str) -> Result<String, CallError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(CallError::InvalidNumber(raw.to_string()));
    }
    Ok(format!("+{digits}"))
}
