//! REST API and WebSocket server for roomsync.
//!
//! Provides HTTP endpoints for:
//! - Room chat history and captions
//! - Viewer access tokens
//! - Recording control
//! - Phone calls into a room
//!
//! and the per-room WebSocket gateway at `/ws/:room/:user_id`.

pub mod error;
pub mod routes;

use crate::calls::CallController;
use crate::gateway::{self, Gateway};
use crate::recording::RecordingController;
use crate::token::TokenIssuer;
use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

/// Everything the HTTP surface dispatches into.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub recordings: Arc<dyn RecordingController>,
    pub calls: Arc<dyn CallController>,
    pub tokens: Arc<dyn TokenIssuer>,
    pub livekit_url: Option<String>,
}

/// Builds the complete application router.
pub fn router(state: AppState) -> Router {
    let default_language = state
        .gateway
        .chat()
        .settings()
        .default_caption_language
        .clone();

    Router::new()
        .route("/", get(service_info))
        .merge(routes::health::router(state.gateway.clone()))
        .merge(routes::rooms::router(state.gateway.clone()))
        .merge(routes::token::router(routes::token::TokenState {
            tokens: state.tokens,
            livekit_url: state.livekit_url,
        }))
        .merge(routes::recordings::router(state.recordings))
        .merge(routes::calls::router(routes::calls::CallsState {
            calls: state.calls,
            default_language,
        }))
        .merge(gateway::router(state.gateway))
        .layer(ServiceBuilder::new())
}

pub struct ApiServer {
    host: String,
    port: u16,
    state: AppState,
}

impl ApiServer {
    pub fn new(host: impl Into<String>, port: u16, state: AppState) -> Self {
        Self {
            host: host.into(),
            port,
            state,
        }
    }

    /// Serves until `shutdown` is cancelled, then lets in-flight requests
    /// finish.
    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        let app = router(self.state);
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!("API server listening on http://{}", addr);
        info!("Endpoints:");
        info!("  GET    /                          - Service info");
        info!("  GET    /health                    - Health check");
        info!("  GET    /ws/:room/:user_id         - Room WebSocket");
        info!("  GET    /rooms/:room/messages      - Room message history");
        info!("  POST   /rooms/:room/messages      - Send a message");
        info!("  DELETE /rooms/:room/messages      - Clear room messages");
        info!("  GET    /rooms/:room/captions      - Current captions");
        info!("  POST   /rooms/:room/captions      - Update a caption");
        info!("  GET    /rooms/:room/connections   - Live connection count");
        info!("  GET    /token                     - Viewer access token");
        info!("  GET    /recordings                - List recordings");
        info!("  POST   /recordings                - Start a recording");
        info!("  GET    /recordings/:id            - Recording status");
        info!("  POST   /recordings/:id/stop       - Stop a recording");
        info!("  GET    /calls                     - List calls");
        info!("  POST   /calls                     - Place a call");
        info!("  GET    /calls/:id                 - Call status");
        info!("  POST   /calls/:id/end             - End a call");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "roomsync",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}
