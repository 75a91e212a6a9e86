//! Phone call endpoints.

use crate::api::error::{ApiError, ApiResult};
use crate::calls::{CallController, CallInfo, CallPlaced};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct CallsState {
    pub calls: Arc<dyn CallController>,
    pub default_language: String,
}

#[derive(Debug, Deserialize)]
pub struct PlaceCallRequest {
    pub room: String,
    pub phone_number: String,
    pub language: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RoomFilter {
    pub room: Option<String>,
}

pub fn router(state: CallsState) -> Router {
    Router::new()
        .route("/calls", get(list_calls).post(place_call))
        .route("/calls/:id", get(call_status))
        .route("/calls/:id/end", post(end_call))
        .with_state(state)
}

async fn place_call(
    State(state): State<CallsState>,
    Json(request): Json<PlaceCallRequest>,
) -> ApiResult<Json<CallPlaced>> {
    if request.room.trim().is_empty() {
        return Err(ApiError::bad_request("room is required"));
    }
    let language = request
        .language
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| state.default_language.clone());
    let placed = state
        .calls
        .place(&request.room, &request.phone_number, &language)
        .await?;
    Ok(Json(placed))
}

async fn end_call(
    State(state): State<CallsState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let message = state.calls.end(&id).await?;
    Ok(Json(json!({
        "success": true,
        "call_id": id,
        "message": message,
    })))
}

async fn call_status(
    State(state): State<CallsState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CallInfo>> {
    Ok(Json(state.calls.status(&id).await?))
}

async fn list_calls(
    State(state): State<CallsState>,
    Query(filter): Query<RoomFilter>,
) -> Json<Value> {
    let calls = state.calls.list(filter.room.as_deref()).await;
    Json(json!({ "calls": calls }))
}
