//! Call controller for the Twilio voice REST API.

use super::{normalize_number, CallController, CallError, CallInfo, CallPlaced, CallState};
use crate::audit::AuditSink;
use crate::config::CallsConfig;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct ProviderCall {
    sid: String,
    status: Option<String>,
    duration: Option<String>,
}

struct Account {
    sid: String,
    auth_token: String,
}

pub struct TwilioCallController {
    client: reqwest::Client,
    enabled: bool,
    account: Option<Account>,
    from_number: Option<String>,
    api_base: String,
    media_url: Option<String>,
    audit: Arc<dyn AuditSink>,
    calls: Mutex<HashMap<String, CallInfo>>,
}

impl TwilioCallController {
    /// `media_url` is the media server's WebSocket URL that calls stream into.
    pub fn new(config: &CallsConfig, media_url: Option<String>, audit: Arc<dyn AuditSink>) -> Self {
        let account = match (&config.account_sid, &config.auth_token) {
            (Some(sid), Some(token)) if !sid.is_empty() && !token.is_empty() => Some(Account {
                sid: sid.clone(),
                auth_token: token.clone(),
            }),
            _ => None,
        };
        if config.enabled && account.is_none() {
            warn!("Calls are enabled but the account SID or auth token is missing");
        }

        Self {
            client: reqwest::Client::new(),
            enabled: config.enabled,
            account,
            from_number: config.phone_number.clone().filter(|n| !n.is_empty()),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            media_url,
            audit,
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn account(&self) -> Result<&Account, CallError> {
        if !self.enabled {
            return Err(CallError::Disabled);
        }
        self.account
            .as_ref()
            .ok_or_else(|| CallError::NotConfigured("account SID or auth token missing".to_string()))
    }

    fn calls_url(&self, account: &Account) -> String {
        format!("{}/2010-04-01/Accounts/{}/Calls", self.api_base, account.sid)
    }

    fn twiml(&self, room: &str, call_id: &str, language: &str) -> Result<String, CallError> {
        let media_url = self
            .media_url
            .as_deref()
            .ok_or_else(|| CallError::NotConfigured("media server url is not set".to_string()))?;
        let host = media_url
            .trim_start_matches("wss://")
            .trim_start_matches("ws://")
            .trim_end_matches('/');

        Ok(format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<Response>"#,
                r#"<Say language="{lang}">You are connected to the live translation service. Please hold.</Say>"#,
                r#"<Connect><Stream url="wss://{host}/twilio/stream?room={room}&amp;identity=phone_{call_id}"></Stream></Connect>"#,
                r#"<Say language="{lang}">The call has ended. Thank you.</Say>"#,
                r#"</Response>"#
            ),
            lang = language,
            host = host,
            room = room,
            call_id = call_id,
        ))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<ProviderCall, CallError> {
        let response = request
            .send()
            .await
            .map_err(|e| CallError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Provider(format!("{status} - {body}")));
        }

        response
            .json::<ProviderCall>()
            .await
            .map_err(|e| CallError::Provider(format!("invalid provider response: {e}")))
    }

    async fn lookup(&self, call_id: &str) -> Result<CallInfo, CallError> {
        self.calls
            .lock()
            .await
            .get(call_id)
            .cloned()
            .ok_or_else(|| CallError::NotFound(call_id.to_string()))
    }
}

#[async_trait]
impl CallController for TwilioCallController {
    async fn place(
        &self,
        room: &str,
        phone_number: &str,
        language: &str,
    ) -> Result<CallPlaced, CallError> {
        let account = self.account()?;
        let to = normalize_number(phone_number)?;
        let from = self
            .from_number
            .clone()
            .ok_or_else(|| CallError::NotConfigured("caller phone number is not set".to_string()))?;

        let call_id = format!("call_{}", &Uuid::new_v4().simple().to_string()[..8]);
        let twiml = self.twiml(room, &call_id, language)?;

        let request = self
            .client
            .post(format!("{}.json", self.calls_url(account)))
            .basic_auth(&account.sid, Some(&account.auth_token))
            .form(&[("To", to.as_str()), ("From", from.as_str()), ("Twiml", twiml.as_str())]);

        let provider_call = match self.send(request).await {
            Ok(call) => call,
            Err(err) => {
                warn!(room = %room, call_id = %call_id, "Failed to place call: {}", err);
                self.audit.log_call_event(
                    "outbound_call_failed",
                    &call_id,
                    json!({ "phone_number": to, "room": room, "error": err.to_string() }),
                );
                return Err(err);
            }
        };

        self.calls.lock().await.insert(
            call_id.clone(),
            CallInfo {
                call_id: call_id.clone(),
                room: room.to_string(),
                phone_number: to.clone(),
                language: language.to_string(),
                direction: "outbound".to_string(),
                status: CallState::Initiated,
                provider_sid: provider_call.sid.clone(),
                started_at: Utc::now(),
                provider_status: provider_call.status,
                duration: None,
            },
        );

        info!(room = %room, call_id = %call_id, "Outbound call initiated");
        self.audit.log_call_event(
            "outbound_call_initiated",
            &call_id,
            json!({ "phone_number": to, "room": room, "provider_sid": provider_call.sid }),
        );

        Ok(CallPlaced {
            message: format!("Calling {to}"),
            call_id,
        })
    }

    async fn end(&self, call_id: &str) -> Result<String, CallError> {
        let account = self.account()?;
        let call = self.lookup(call_id).await?;
        if call.status == CallState::Ended {
            return Err(CallError::AlreadyEnded(call_id.to_string()));
        }

        let request = self
            .client
            .post(format!("{}/{}.json", self.calls_url(account), call.provider_sid))
            .basic_auth(&account.sid, Some(&account.auth_token))
            .form(&[("Status", "completed")]);

        match self.send(request).await {
            Ok(provider_call) => {
                if let Some(entry) = self.calls.lock().await.get_mut(call_id) {
                    entry.status = CallState::Ended;
                    entry.provider_status = provider_call.status;
                }
                info!(call_id = %call_id, "Call ended");
                self.audit.log_call_event(
                    "call_ended",
                    call_id,
                    json!({ "provider_sid": call.provider_sid }),
                );
                Ok(format!("Call {call_id} ended"))
            }
            Err(err) => {
                self.audit.log_call_event(
                    "call_end_error",
                    call_id,
                    json!({ "provider_sid": call.provider_sid, "error": err.to_string() }),
                );
                Err(err)
            }
        }
    }

    async fn status(&self, call_id: &str) -> Result<CallInfo, CallError> {
        let account = self.account()?;
        let call = self.lookup(call_id).await?;

        let request = self
            .client
            .get(format!("{}/{}.json", self.calls_url(account), call.provider_sid))
            .basic_auth(&account.sid, Some(&account.auth_token));
        let provider_call = self.send(request).await?;

        let mut calls = self.calls.lock().await;
        let entry = calls
            .get_mut(call_id)
            .ok_or_else(|| CallError::NotFound(call_id.to_string()))?;
        entry.provider_status = provider_call.status;
        entry.duration = provider_call.duration;
        Ok(entry.clone())
    }

    async fn list(&self, room: Option<&str>) -> Vec<CallInfo> {
        let mut calls: Vec<CallInfo> = self
            .calls
            .lock()
            .await
            .values()
            .filter(|call| room.map_or(true, |room| call.room == room))
            .cloned()
            .collect();
        calls.sort_by_key(|call| call.started_at);
        calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use axum::{
        extract::{Path, State},
        routing::post,
        Form, Json, Router,
    };
    use serde_json::Value;
    use std::collections::HashMap as Params;
    use std::sync::Mutex as StdMutex;

    type Seen = Arc<StdMutex<Vec<Params<String, String>>>>;

    async fn spawn_provider() -> (String, Seen) {
        let seen: Seen = Arc::new(StdMutex::new(Vec::new()));

        async fn create(
            State(seen): State<Seen>,
            Form(params): Form<Params<String, String>>,
        ) -> Json<Value> {
            seen.lock().unwrap().push(params);
            Json(json!({ "sid": "CA123", "status": "queued" }))
        }

        async fn update(
            State(seen): State<Seen>,
            Path((_account, sid)): Path<(String, String)>,
            Form(params): Form<Params<String, String>>,
        ) -> Json<Value> {
            seen.lock().unwrap().push(params);
            Json(json!({ "sid": sid.trim_end_matches(".json"), "status": "completed" }))
        }

        async fn fetch(Path((_account, sid)): Path<(String, String)>) -> Json<Value> {
            Json(json!({ "sid": sid.trim_end_matches(".json"), "status": "in-progress", "duration": "42" }))
        }

        let app = Router::new()
            .route("/2010-04-01/Accounts/:account/Calls.json", post(create))
            .route("/2010-04-01/Accounts/:account/Calls/:sid", post(update).get(fetch))
            .with_state(seen.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    fn calls_config(api_base: String) -> CallsConfig {
        CallsConfig {
            enabled: true,
            account_sid: Some("AC1".to_string()),
            auth_token: Some("token".to_string()),
            phone_number: Some("+15550199".to_string()),
            api_base,
        }
    }

    #[tokio::test]
    async fn test_place_status_end() {
        let (api_base, seen) = spawn_provider().await;
        let audit = Arc::new(MemoryAuditSink::new());
        let controller = TwilioCallController::new(
            &calls_config(api_base),
            Some("wss://media.example.com".to_string()),
            audit.clone(),
        );

        let placed = controller.place("lobby", "15550100", "en-US").await.unwrap();
        assert!(placed.call_id.starts_with("call_"));
        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen[0]["To"], "+15550100");
            assert_eq!(seen[0]["From"], "+15550199");
            assert!(seen[0]["Twiml"].contains("room=lobby"));
            assert!(seen[0]["Twiml"].contains("wss://media.example.com/twilio/stream"));
        }

        let info = controller.status(&placed.call_id).await.unwrap();
        assert_eq!(info.provider_sid, "CA123");
        assert_eq!(info.provider_status.as_deref(), Some("in-progress"));
        assert_eq!(info.duration.as_deref(), Some("42"));

        controller.end(&placed.call_id).await.unwrap();
        assert_eq!(seen.lock().unwrap()[1]["Status"], "completed");
        assert!(matches!(
            controller.end(&placed.call_id).await,
            Err(CallError::AlreadyEnded(_))
        ));

        let listed = controller.list(Some("lobby")).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, CallState::Ended);
        assert!(controller.list(Some("other")).await.is_empty());
        assert_eq!(
            audit.events(),
            vec!["call.outbound_call_initiated".to_string(), "call.call_ended".to_string()]
        );
    }

    #[tokio::test]
    async fn test_configuration_checks() {
        let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditSink::new());

        let mut config = calls_config("http://127.0.0.1:9".to_string());
        config.enabled = false;
        let controller = TwilioCallController::new(&config, None, audit.clone());
        assert!(matches!(
            controller.place("lobby", "15550100", "en-US").await,
            Err(CallError::Disabled)
        ));

        let mut config = calls_config("http://127.0.0.1:9".to_string());
        config.phone_number = None;
        let controller = TwilioCallController::new(&config, Some("wss://m".to_string()), audit.clone());
        assert!(matches!(
            controller.place("lobby", "15550100", "en-US").await,
            Err(CallError::NotConfigured(_))
        ));

        let controller = TwilioCallController::new(
            &calls_config("http://127.0.0.1:9".to_string()),
            Some("wss://m".to_string()),
            audit,
        );
        assert!(matches!(
            controller.place("lobby", "not a number", "en-US").await,
            Err(CallError::InvalidNumber(_))
        ));
        assert!(matches!(
            controller.status("call_missing").await,
            Err(CallError::NotFound(_))
        ));
    }
}
