//! Recording control endpoints.

use crate::api::error::{ApiError, ApiResult};
use crate::recording::{RecordingController, RecordingInfo, RecordingOptions, RecordingStarted};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct StartRecordingRequest {
    pub room: String,
    #[serde(flatten)]
    pub options: RecordingOptions,
}

#[derive(Debug, Deserialize, Default)]
pub struct RoomFilter {
    pub room: Option<String>,
}

pub fn router(recordings: Arc<dyn RecordingController>) -> Router {
    Router::new()
        .route("/recordings", get(list_recordings).post(start_recording))
        .route("/recordings/:id", get(recording_status))
        .route("/recordings/:id/stop", post(stop_recording))
        .with_state(recordings)
}

async fn start_recording(
    State(recordings): State<Arc<dyn RecordingController>>,
    Json(request): Json<StartRecordingRequest>,
) -> ApiResult<Json<RecordingStarted>> {
    if request.room.trim().is_empty() {
        return Err(ApiError::bad_request("room is required"));
    }
    let started = recordings.start(&request.room, request.options).await?;
    Ok(Json(started))
}

async fn stop_recording(
    State(recordings): State<Arc<dyn RecordingController>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let message = recordings.stop(&id).await?;
    Ok(Json(json!({
        "success": true,
        "recording_id": id,
        "message": message,
    })))
}

async fn recording_status(
    State(recordings): State<Arc<dyn RecordingController>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RecordingInfo>> {
    Ok(Json(recordings.status(&id).await?))
}

async fn list_recordings(
    State(recordings): State<Arc<dyn RecordingController>>,
    Query(filter): Query<RoomFilter>,
) -> Json<Value> {
    let recordings = recordings.list(filter.room.as_deref()).await;
    Json(json!({ "recordings": recordings }))
}
