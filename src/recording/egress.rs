//! Recording controller backed by the media server's egress REST API.

use super::{
    RecordingController, RecordingError, RecordingInfo, RecordingOptions, RecordingStarted,
    RecordingState,
};
use crate::audit::AuditSink;
use crate::config::{LiveKitConfig, RecordingConfig};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct StartEgressResponse {
    egress_id: Option<String>,
}

pub struct EgressRecordingController {
    client: reqwest::Client,
    config: RecordingConfig,
    api_key: String,
    api_secret: String,
    audit: Arc<dyn AuditSink>,
    recordings: Mutex<HashMap<String, RecordingInfo>>,
}

impl EgressRecordingController {
    pub fn new(
        config: &RecordingConfig,
        livekit: &LiveKitConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: config.clone(),
            api_key: livekit.api_key.clone().unwrap_or_default(),
            api_secret: livekit.api_secret.clone().unwrap_or_default(),
            audit,
            recordings: Mutex::new(HashMap::new()),
        }
    }

    fn egress_url(&self) -> Result<&str, RecordingError> {
        if !self.config.enabled {
            return Err(RecordingError::Disabled);
        }
        match self.config.egress_url.as_deref() {
            Some(url) if !url.is_empty() => Ok(url.trim_end_matches('/')),
            _ => Err(RecordingError::NotConfigured("egress_url is not set".to_string())),
        }
    }

    fn start_request(&self, room: &str, recording_id: &str, options: &RecordingOptions) -> Value {
        let mut output = json!({
            "file_type": options.output_type,
            "filepath": format!("{recording_id}.{}", options.output_type),
        });
        if let Some(bucket) = self.config.s3_bucket.as_deref().filter(|b| !b.is_empty()) {
            output["s3"] = json!({
                "bucket": bucket,
                "region": self.config.s3_region,
                "key_prefix": format!("recordings/{room}/"),
            });
        }

        json!({
            "room_name": room,
            "output": output,
            "preset": options.preset,
            "layout": options.layout,
            "custom_id": recording_id,
        })
    }

    async fn request_start(&self, egress_url: &str, request: &Value) -> Result<String, RecordingError> {
        let response = self
            .client
            .post(format!("{egress_url}/api/v1/room_composite"))
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .json(request)
            .send()
            .await
            .map_err(|e| RecordingError::Egress(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecordingError::Egress(format!("{status} - {body}")));
        }

        let parsed: StartEgressResponse = response
            .json()
            .await
            .map_err(|e| RecordingError::Egress(format!("invalid egress response: {e}")))?;

        parsed
            .egress_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RecordingError::Egress("egress service returned no egress_id".to_string()))
    }

    async fn lookup(&self, recording_id: &str) -> Result<RecordingInfo, RecordingError> {
        self.recordings
            .lock()
            .await
            .get(recording_id)
            .cloned()
            .ok_or_else(|| RecordingError::NotFound(recording_id.to_string()))
    }
}

#[async_trait]
impl RecordingController for EgressRecordingController {
    async fn start(
        &self,
        room: &str,
        options: RecordingOptions,
    ) -> Result<RecordingStarted, RecordingError> {
        let egress_url = self.egress_url()?;
        if !self.config.room_enabled(room) {
            return Err(RecordingError::RoomNotEnabled(room.to_string()));
        }

        let recording_id = format!("rec_{room}_{}", &Uuid::new_v4().simple().to_string()[..8]);

        // Reserve the room before the egress call so concurrent starts for the
        // same room cannot both go through.
        {
            let mut recordings = self.recordings.lock().await;
            if let Some(existing) = recordings.values().find(|rec| {
                rec.room == room
                    && matches!(rec.status, RecordingState::Starting | RecordingState::Active)
            }) {
                return Err(RecordingError::AlreadyRecording {
                    room: room.to_string(),
                    recording_id: existing.recording_id.clone(),
                });
            }
            recordings.insert(
                recording_id.clone(),
                RecordingInfo {
                    recording_id: recording_id.clone(),
                    room: room.to_string(),
                    egress_id: None,
                    status: RecordingState::Starting,
                    start_time: Utc::now(),
                    stop_time: None,
                    options: options.clone(),
                    egress_status: None,
                },
            );
        }

        let request = self.start_request(room, &recording_id, &options);
        match self.request_start(egress_url, &request).await {
            Ok(egress_id) => {
                if let Some(rec) = self.recordings.lock().await.get_mut(&recording_id) {
                    rec.egress_id = Some(egress_id.clone());
                    rec.status = RecordingState::Active;
                }
                info!(room = %room, recording_id = %recording_id, egress_id = %egress_id, "Recording started");
                self.audit.log_recording_event(
                    "started",
                    room,
                    &recording_id,
                    json!({
                        "egress_id": egress_id,
                        "layout": options.layout,
                        "preset": options.preset,
                    }),
                );
                Ok(RecordingStarted {
                    message: format!("Recording started for room {room} (ID: {recording_id})"),
                    recording_id,
                })
            }
            Err(err) => {
                self.recordings.lock().await.remove(&recording_id);
                warn!(room = %room, recording_id = %recording_id, "Failed to start recording: {}", err);
                self.audit.log_recording_event(
                    "start_failed",
                    room,
                    &recording_id,
                    json!({ "error": err.to_string() }),
                );
                Err(err)
            }
        }
    }

    async fn stop(&self, recording_id: &str) -> Result<String, RecordingError> {
        let egress_url = self.egress_url()?;
        let recording = self.lookup(recording_id).await?;

        let egress_id = match (recording.status, recording.egress_id) {
            (RecordingState::Stopped, _) => {
                return Err(RecordingError::AlreadyStopped(recording_id.to_string()))
            }
            (RecordingState::Active, Some(egress_id)) => egress_id,
            _ => {
                return Err(RecordingError::Egress(format!(
                    "recording {recording_id} has no egress job yet"
                )))
            }
        };

        let result = self
            .client
            .post(format!("{egress_url}/api/v1/egress/{egress_id}/stop"))
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .send()
            .await;

        let failure = match result {
            Ok(response) if response.status().is_success() => None,
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Some(format!("{status} - {body}"))
            }
            Err(err) => Some(err.to_string()),
        };

        if let Some(error) = failure {
            self.audit.log_recording_event(
                "stop_failed",
                &recording.room,
                recording_id,
                json!({ "egress_id": egress_id, "error": error }),
            );
            return Err(RecordingError::Egress(error));
        }

        if let Some(rec) = self.recordings.lock().await.get_mut(recording_id) {
            rec.status = RecordingState::Stopped;
            rec.stop_time = Some(Utc::now());
        }
        info!(room = %recording.room, recording_id = %recording_id, "Recording stopped");
        self.audit.log_recording_event(
            "stopped",
            &recording.room,
            recording_id,
            json!({ "egress_id": egress_id }),
        );
        Ok(format!("Recording {recording_id} stopped"))
    }

    async fn status(&self, recording_id: &str) -> Result<RecordingInfo, RecordingError> {
        let egress_url = self.egress_url()?;
        let recording = self.lookup(recording_id).await?;
        let Some(egress_id) = recording.egress_id.as_deref() else {
            return Ok(recording);
        };

        let response = self
            .client
            .get(format!("{egress_url}/api/v1/egress/{egress_id}"))
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .send()
            .await
            .map_err(|e| RecordingError::Egress(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecordingError::Egress(format!("{status} - {body}")));
        }

        let egress_status: Value = response
            .json()
            .await
            .map_err(|e| RecordingError::Egress(format!("invalid egress response: {e}")))?;

        let mut recordings = self.recordings.lock().await;
        match recordings.get_mut(recording_id) {
            Some(rec) => {
                rec.egress_status = Some(egress_status);
                Ok(rec.clone())
            }
            None => Err(RecordingError::NotFound(recording_id.to_string())),
        }
    }

    async fn list(&self, room: Option<&str>) -> Vec<RecordingInfo> {
        if !self.config.enabled {
            return Vec::new();
        }
        let mut recordings: Vec<RecordingInfo> = self
            .recordings
            .lock()
            .await
            .values()
            .filter(|rec| room.map_or(true, |room| rec.room == room))
            .cloned()
            .collect();
        recordings.sort_by_key(|rec| rec.start_time);
        recordings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use axum::{extract::Path, http::StatusCode, routing::{get, post}, Json, Router};

    async fn spawn_egress(fail_start: bool) -> String {
        let app = Router::new()
            .route(
                "/api/v1/room_composite",
                post(move |Json(body): Json<Value>| async move {
                    if fail_start {
                        return (StatusCode::BAD_GATEWAY, Json(json!({ "error": "no capacity" })));
                    }
                    let custom_id = body["custom_id"].as_str().unwrap_or_default().to_string();
                    (StatusCode::OK, Json(json!({ "egress_id": format!("EG_{custom_id}") })))
                }),
            )
            .route("/api/v1/egress/:id/stop", post(|| async { StatusCode::OK }))
            .route(
                "/api/v1/egress/:id",
                get(|Path(id): Path<String>| async move {
                    Json(json!({ "egress_id": id, "status": "EGRESS_ACTIVE" }))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn build_controller(egress_url: Option<String>, rooms: Vec<String>) -> (EgressRecordingController, Arc<MemoryAuditSink>) {
        let audit = Arc::new(MemoryAuditSink::new());
        let config = RecordingConfig {
            enabled: true,
            egress_url,
            s3_bucket: Some("bucket".to_string()),
            s3_region: Some("us-east-1".to_string()),
            rooms,
        };
        let livekit = LiveKitConfig {
            api_key: Some("key".to_string()),
            api_secret: Some("secret".to_string()),
            ..LiveKitConfig::default()
        };
        (EgressRecordingController::new(&config, &livekit, audit.clone()), audit)
    }

    #[tokio::test]
    async fn test_start_stop_status_lifecycle() {
        let url = spawn_egress(false).await;
        let (controller, audit) = build_controller(Some(url), Vec::new());

        let started = controller.start("studio", RecordingOptions::default()).await.unwrap();
        assert!(started.recording_id.starts_with("rec_studio_"));

        let info = controller.status(&started.recording_id).await.unwrap();
        assert_eq!(info.status, RecordingState::Active);
        assert_eq!(info.egress_id.as_deref(), Some(format!("EG_{}", started.recording_id).as_str()));
        assert_eq!(info.egress_status.unwrap()["status"], "EGRESS_ACTIVE");

        controller.stop(&started.recording_id).await.unwrap();
        let listed = controller.list(Some("studio")).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, RecordingState::Stopped);
        assert!(listed[0].stop_time.is_some());

        assert!(matches!(
            controller.stop(&started.recording_id).await,
            Err(RecordingError::AlreadyStopped(_))
        ));
        assert_eq!(
            audit.events(),
            vec!["recording.started".to_string(), "recording.stopped".to_string()]
        );
    }

    #[tokio::test]
    async fn test_second_start_in_same_room_is_rejected() {
        let url = spawn_egress(false).await;
        let (controller, _audit) = build_controller(Some(url), Vec::new());

        let first = controller.start("studio", RecordingOptions::default()).await.unwrap();
        match controller.start("studio", RecordingOptions::default()).await {
            Err(RecordingError::AlreadyRecording { recording_id, .. }) => {
                assert_eq!(recording_id, first.recording_id)
            }
            other => panic!("expected AlreadyRecording, got {other:?}"),
        }

        // A stopped recording no longer blocks the room.
        controller.stop(&first.recording_id).await.unwrap();
        assert!(controller.start("studio", RecordingOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_egress_releases_room() {
        let url = spawn_egress(true).await;
        let (controller, audit) = build_controller(Some(url), Vec::new());

        assert!(matches!(
            controller.start("studio", RecordingOptions::default()).await,
            Err(RecordingError::Egress(_))
        ));
        assert!(controller.list(None).await.is_empty());
        assert_eq!(audit.events(), vec!["recording.start_failed".to_string()]);
    }

    #[tokio::test]
    async fn test_configuration_checks() {
        let (controller, _) = build_controller(None, Vec::new());
        assert!(matches!(
            controller.start("studio", RecordingOptions::default()).await,
            Err(RecordingError::NotConfigured(_))
        ));

        let (controller, _) = build_controller(Some("http://127.0.0.1:9".to_string()), vec!["stage".to_string()]);
        assert!(matches!(
            controller.start("studio", RecordingOptions::default()).await,
            Err(RecordingError::RoomNotEnabled(_))
        ));
        assert!(matches!(
            controller.status("rec_missing").await,
            Err(RecordingError::NotFound(_))
        ));
    }

    #[test]
    fn test_start_request_includes_s3_output() {
        let (controller, _) = build_controller(Some("http://egress".to_string()), Vec::new());
        let request = controller.start_request("studio", "rec_studio_1", &RecordingOptions::default());
        assert_eq!(request["output"]["filepath"], "rec_studio_1.mp4");
        assert_eq!(request["output"]["s3"]["key_prefix"], "recordings/studio/");
        assert_eq!(request["custom_id"], "rec_studio_1");
    }
}
