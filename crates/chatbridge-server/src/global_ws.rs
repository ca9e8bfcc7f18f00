//! Event WebSocket for dashboards and bots.

use crate::state::AppState;
use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use chatbridge_types::{WsClientMessage, WsOutbound, WsServerMessage};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

/// Forward every chat event to the socket and accept send/ping requests.
pub async fn handle_global_websocket(socket: WebSocket, state: Arc<AppState>) -> Result<()> {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut event_rx = state.client.subscribe();
    // Replies to client requests share the socket writer with events.
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<WsServerMessage>();

    tracing::info!(target: "chatbridge::ws", "Event WebSocket client connected");

    let mut send_task = tokio::spawn(async move {
        loop {
            let outbound = tokio::select! {
                event = event_rx.recv() => match event {
                    Ok(event) => WsOutbound::Event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            target: "chatbridge::ws",
                            "WebSocket subscriber lagged, skipped {} events", skipped
                        );
                        WsOutbound::Control(WsServerMessage::Lagged { skipped })
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(reply) = control_rx.recv() => WsOutbound::Control(reply),
            };

            let json = match serde_json::to_string(&outbound) {
                Ok(j) => j,
                Err(_) => continue,
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                tracing::debug!(target: "chatbridge::ws", "Event WebSocket client disconnected");
                break;
            }
        }
    });

    let client = state.client.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => {
                    let reply = match serde_json::from_str::<WsClientMessage>(text.as_str()) {
                        Ok(WsClientMessage::Send {
                            room_id,
                            message,
                            target,
                            private,
                        }) => {
                            if client.room_status(&room_id).is_none() {
                                Some(WsServerMessage::Error {
                                    code: "room_not_found".to_string(),
                                    message: format!("Room {} is not joined", room_id),
                                })
                            } else {
                                client
                                    .send(&room_id, &message, target.as_deref(), private)
                                    .await;
                                None
                            }
                        }
                        Ok(WsClientMessage::Ping { timestamp }) => {
                            tracing::trace!(target: "chatbridge::ws::ping", "Ping {}", timestamp);
                            Some(WsServerMessage::Pong { timestamp })
                        }
                        Err(e) => Some(WsServerMessage::Error {
                            code: "invalid_message".to_string(),
                            message: e.to_string(),
                        }),
                    };
                    if let Some(reply) = reply {
                        if control_tx.send(reply).is_err() {
                            break;
                        }
                    }
                }
                Message::Close(_) => {
                    tracing::debug!(target: "chatbridge::ws", "Event WebSocket client closed connection");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    tracing::info!(target: "chatbridge::ws", "Event WebSocket client disconnected");
    Ok(())
}
