//! Viewer token endpoint.

use crate::api::error::{ApiError, ApiResult};
use crate::token::TokenIssuer;
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct TokenState {
    pub tokens: Arc<dyn TokenIssuer>,
    pub livekit_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TokenQueryParams {
    pub room: Option<String>,
    pub identity: Option<String>,
}

pub fn router(state: TokenState) -> Router {
    Router::new()
        .route("/token", get(issue_token))
        .with_state(state)
}

/// GET /token?room=..&identity=.. - Subscribe-only token for a viewer.
async fn issue_token(
    State(state): State<TokenState>,
    Query(params): Query<TokenQueryParams>,
) -> ApiResult<Json<Value>> {
    let room = params.room.filter(|r| !r.is_empty());
    let identity = params.identity.filter(|i| !i.is_empty());
    let (Some(room), Some(identity)) = (room, identity) else {
        return Err(ApiError::bad_request("room and identity are required"));
    };

    let token = state
        .tokens
        .issue(&room, &identity, false)
        .ok_or_else(|| ApiError::internal("Failed to issue token"))?;

    Ok(Json(json!({
        "token": token,
        "url": state.livekit_url,
        "room": room,
        "identity": identity,
    })))
}
