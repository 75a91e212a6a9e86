//! Room chat and caption endpoints.
//!
//! Writes made here are broadcast to the room's live connections just like
//! frames sent over a socket.

use crate::api::error::{ApiError, ApiResult};
use crate::chat::{Message, MessageKind};
use crate::gateway::Gateway;
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub user_id: String,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
}

#[derive(Debug, Deserialize, Default)]
pub struct MessageQueryParams {
    pub limit: Option<usize>,
    pub before_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostCaptionRequest {
    pub user_id: String,
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
    pub language: Option<String>,
}

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route(
            "/rooms/:room/messages",
            get(list_messages).post(post_message).delete(clear_messages),
        )
        .route("/rooms/:room/captions", get(list_captions).post(post_caption))
        .route("/rooms/:room/connections", get(connection_count))
        .with_state(gateway)
}

async fn post_message(
    State(gateway): State<Arc<Gateway>>,
    Path(room): Path<String>,
    Json(request): Json<PostMessageRequest>,
) -> ApiResult<Json<Message>> {
    if request.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id is required"));
    }
    if request.content.trim().is_empty() {
        return Err(ApiError::bad_request("content must not be empty"));
    }

    let message = gateway
        .publish_message(&room, &request.user_id, &request.content, request.kind)
        .await;
    Ok(Json(message))
}

/// GET /rooms/:room/messages - Page through the room log, oldest first.
async fn list_messages(
    State(gateway): State<Arc<Gateway>>,
    Path(room): Path<String>,
    Query(params): Query<MessageQueryParams>,
) -> Json<Value> {
    let messages = gateway
        .chat()
        .get_room_messages(&room, params.limit, params.before_id.as_deref())
        .await;
    Json(json!({
        "room": room,
        "messages": messages,
    }))
}

async fn clear_messages(
    State(gateway): State<Arc<Gateway>>,
    Path(room): Path<String>,
) -> Json<Value> {
    info!(room = %room, "Clearing room messages via API");
    gateway.chat().clear_room_messages(&room).await;
    Json(json!({
        "success": true,
        "room": room,
    }))
}

async fn post_caption(
    State(gateway): State<Arc<Gateway>>,
    Path(room): Path<String>,
    Json(request): Json<PostCaptionRequest>,
) -> ApiResult<Json<Value>> {
    if request.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id is required"));
    }

    let update = gateway
        .publish_caption(
            &room,
            &request.user_id,
            &request.text,
            request.is_final,
            request.language.as_deref(),
        )
        .await;
    Ok(Json(json!({
        "room": update.room,
        "user_id": update.user_id,
        "caption": update.caption,
        "message": update.message,
    })))
}

async fn list_captions(
    State(gateway): State<Arc<Gateway>>,
    Path(room): Path<String>,
) -> Json<Value> {
    let captions = gateway.chat().get_room_captions(&room).await;
    Json(json!({
        "room": room,
        "captions": captions,
    }))
}

async fn connection_count(
    State(gateway): State<Arc<Gateway>>,
    Path(room): Path<String>,
) -> Json<Value> {
    let connections = gateway.connection_count(&room).await;
    Json(json!({
        "room": room,
        "connections": connections,
    }))
}
