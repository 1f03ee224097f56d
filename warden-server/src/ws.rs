//! WebSocket endpoint: upgrades the connection and registers it as a hub
//! subscriber for the connection's lifetime.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, error};

use warden_core::Hub;

use crate::routes::AppState;

/// GET /ws — upgrade and stream review events until either side goes away.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| subscriber_connection(socket, hub))
}

async fn subscriber_connection(socket: WebSocket, hub: Hub) {
    let mut subscription = hub.subscribe().await;
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = subscription.recv() => {
                // None: hub shut down, or we were dropped for falling behind.
                let Some(event) = event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(err) => {
                        error!("failed to encode review event: {err}");
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(payload)).await.is_err() {
                    // Write failure ends the registration.
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    // The stream is outbound-only; other inbound frames
                    // (pings are answered by axum) are ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    debug!("websocket subscriber disconnected");
    // Dropping the subscription unregisters it from the hub.
}
