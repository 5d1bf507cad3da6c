//! WebSocket transport.
//!
//! One task pair per connection: the forward task drains the router's
//! outbound channel into the socket, the receive loop parses inbound
//! frames into router commands. The transport never touches routing
//! state; everything goes through the command queue.

use axum::{
    extract::ws::{Message, WebSocket},
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use haven_core::router::RouterCommand;
use haven_shared::protocol::{ClientEvent, ServerEvent};
use haven_shared::types::ConnectionId;

use crate::api::AppState;

pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn = ConnectionId::new();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    // Weak handle for the receive loop: the router holds the only strong
    // sender, so dropping the registered socket (session displacement,
    // shutdown) closes the channel and ends the forward task.
    let error_tx = tx.downgrade();

    info!(conn = %conn, "websocket connected");

    if state
        .commands
        .send(RouterCommand::Connect { conn, outbound: tx })
        .is_err()
    {
        // Router task is gone; nothing to connect to.
        warn!(conn = %conn, "router unavailable, dropping connection");
        return;
    }

    // Forward outbound events into the socket. Dropping the sender side
    // (session displacement, router shutdown) ends this task and with it
    // the connection.
    let forward_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(conn = %conn, error = %err, "failed to encode outbound frame");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if state
                        .commands
                        .send(RouterCommand::Event { conn, event })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(err) => {
                    debug!(conn = %conn, error = %err, "malformed frame");
                    if let Some(tx) = error_tx.upgrade() {
                        let _ = tx.send(ServerEvent::ServerError("Malformed event".to_string()));
                    }
                }
            },
            Ok(Message::Close(_)) => break,
            // axum answers pings itself; binary frames are not part of
            // the protocol.
            Ok(Message::Binary(_)) | Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                debug!(conn = %conn, error = %err, "websocket error");
                break;
            }
        }
    }

    let _ = state.commands.send(RouterCommand::Disconnect { conn });
    forward_task.abort();
    info!(conn = %conn, "websocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    // The receive loop only holds a weak sender, so the router dropping a
    // displaced socket must end the forward task instead of leaving the
    // channel open forever.
    #[tokio::test]
    async fn forward_task_ends_when_router_drops_the_outbound() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
        let error_tx = tx.downgrade();

        let forward = tokio::spawn(async move {
            let mut delivered = 0u32;
            while rx.recv().await.is_some() {
                delivered += 1;
            }
            delivered
        });

        tx.send(ServerEvent::ServerError("boom".to_string())).unwrap();
        drop(tx);

        let delivered = forward.await.unwrap();
        assert_eq!(delivered, 1);
        assert!(error_tx.upgrade().is_none());
    }
}
