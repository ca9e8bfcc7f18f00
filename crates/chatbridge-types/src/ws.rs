//! WebSocket message protocol between dashboard clients and the server.

use crate::{ChatEvent, RoomId};
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientMessage {
    /// Post a message into a room.
    Send {
        room_id: RoomId,
        message: String,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        private: bool,
    },
    /// Keepalive.
    Ping { timestamp: u64 },
}

/// Messages sent from server to client that are not chat events.
///
/// Chat events are forwarded as bare [`ChatEvent`] JSON so existing
/// subscribers keep working.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerMessage {
    Pong { timestamp: u64 },
    Error { code: String, message: String },
    /// The subscriber fell behind and missed events.
    Lagged { skipped: u64 },
}

/// Anything the server may push over the event socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsOutbound {
    Event(ChatEvent),
    Control(WsServerMessage),
}
