use crate::gateway::Gateway;
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(gateway)
}

/// GET /health - Liveness plus whether cross-instance replication is active.
async fn health(State(gateway): State<Arc<Gateway>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "replicated": gateway.chat().is_replicated(),
        "rooms": gateway.room_count().await,
    }))
}
