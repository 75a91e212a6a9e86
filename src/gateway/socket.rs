//! WebSocket endpoint: `GET /ws/:room/:user_id`.

use super::Gateway;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/ws/:room/:user_id", get(ws_handler))
        .with_state(gateway)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((room, user_id)): Path<(String, String)>,
    State(gateway): State<Arc<Gateway>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, room, user_id))
}

async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>, room: String, user_id: String) {
    let (guard, mut outbound) = gateway.open(&room, &user_id).await;
    let connection_id = guard.connection().id;
    let (mut sender, mut receiver) = socket.split();

    // Sole writer for this socket; frame order is queue order.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    warn!(connection_id, error = %err, "Failed to encode outbound frame");
                    continue;
                }
            };
            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    gateway.handle_frame(guard.connection(), &text).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!(connection_id, "Client closed connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(connection_id, error = %err, "WebSocket receive error");
                    break;
                }
            },
            _ = &mut writer => {
                debug!(connection_id, "Writer finished");
                break;
            }
        }
    }

    guard.release().await;
    writer.abort();
}
