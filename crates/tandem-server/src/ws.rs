//! WebSocket connection handler.
//!
//! Each socket gets an outbound channel registered with the hub and a
//! sender task that serializes [`ServerEvent`]s onto the wire. Inbound
//! frames are parsed as [`ClientEvent`]s and handed to the engine in
//! arrival order.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tandem_shared::protocol::{ClientEvent, ServerEvent};

use crate::api::AppState;
use crate::engine::Engine;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.engine))
}

/// Runs for the lifetime of one connection.
pub async fn handle_socket(socket: WebSocket, engine: Engine) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (conn, mut rx) = engine.hub().connect();
    tracing::info!(
        conn = %conn,
        connections = engine.hub().connection_count(),
        "WebSocket connected"
    );

    let sender_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event.to_json() {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize server event");
                }
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match ClientEvent::from_json(&text) {
                Ok(event) => engine.dispatch(conn, event).await,
                Err(e) => {
                    tracing::warn!(conn = %conn, error = %e, "Failed to parse client event");
                    engine
                        .hub()
                        .send_to(conn, ServerEvent::error("Invalid event format"));
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn = %conn, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Dropping the hub entry closes the channel, which ends the sender task.
    engine.disconnect(conn).await;
    let _ = sender_task.await;
    tracing::info!(conn = %conn, "WebSocket disconnected");
}
