//! Audit trail for security-relevant actions.
//!
//! Events are structured `tracing` records on the `audit` target so they can be
//! routed to their own sink with an `EnvFilter` directive such as
//! `audit=info`.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Mutex;
use tracing::info;

pub const AUDIT_TARGET: &str = "audit";

pub trait AuditSink: Send + Sync {
    fn log(&self, event: &str, user_id: &str, details: Value);

    fn log_room_event(&self, event: &str, room: &str, user_id: &str, details: Value) {
        self.log(&format!("room.{event}"), user_id, with_room(room, details));
    }

    fn log_token_event(&self, event: &str, room: &str, user_id: &str, is_publisher: bool) {
        self.log(
            &format!("token.{event}"),
            user_id,
            json!({ "room": room, "is_publisher": is_publisher }),
        );
    }

    /// Recording events are attributed to the recording id.
    fn log_recording_event(&self, event: &str, room: &str, recording_id: &str, details: Value) {
        self.log(
            &format!("recording.{event}"),
            recording_id,
            with_room(room, details),
        );
    }

    /// Call events are attributed to the call id.
    fn log_call_event(&self, event: &str, call_id: &str, details: Value) {
        self.log(&format!("call.{event}"), call_id, details);
    }
}

fn with_room(room: &str, details: Value) -> Value {
    match details {
        Value::Object(mut map) => {
            map.insert("room".to_string(), Value::String(room.to_string()));
            Value::Object(map)
        }
        Value::Null => json!({ "room": room }),
        other => json!({ "room": room, "details": other }),
    }
}

/// Writes audit events through `tracing`.
pub struct TracingAuditSink {
    enabled: bool,
}

impl TracingAuditSink {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl AuditSink for TracingAuditSink {
    fn log(&self, event: &str, user_id: &str, details: Value) {
        if !self.enabled {
            return;
        }
        info!(
            target: AUDIT_TARGET,
            event = %event,
            user_id = %user_id,
            details = %details,
            "audit"
        );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub event: String,
    pub user_id: String,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

/// Keeps audit events in memory; used by tests and embedding code that wants
/// to inspect what was recorded.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.records().into_iter().map(|record| record.event).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn log(&self, event: &str, user_id: &str, details: Value) {
        let record = AuditRecord {
            event: event.to_string(),
            user_id: user_id.to_string(),
            details,
            timestamp: Utc::now(),
        };
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}
