//! Events emitted by room channels.

use crate::RoomId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presence state code reported by the upstream service when a user goes idle.
pub const STATE_IDLE: u32 = 1;
/// Presence state code reported when a user is active again.
pub const STATE_ONLINE: u32 = 0;

/// A typed event parsed from one room's stream.
///
/// Serialized as `{"event": "...", "data": {...}}`, the shape WebSocket
/// subscribers receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A chat line, public or directed at another user.
    Message {
        sender: String,
        body: String,
        /// Addressee of a directed message.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        /// Whether only the addressee can see the message.
        #[serde(default)]
        is_private: bool,
        room_id: RoomId,
        timestamp: DateTime<Utc>,
    },
    /// A user entered the room.
    UserJoined {
        username: String,
        room_id: RoomId,
        timestamp: DateTime<Utc>,
    },
    /// A user left the room.
    UserLeft {
        username: String,
        room_id: RoomId,
        timestamp: DateTime<Utc>,
    },
    /// A user's presence state changed (see [`STATE_IDLE`], [`STATE_ONLINE`]).
    UserStateChanged {
        username: String,
        state: u32,
        room_id: RoomId,
        timestamp: DateTime<Utc>,
    },
}

impl ChatEvent {
    /// Room the event originated from.
    pub fn room_id(&self) -> &RoomId {
        match self {
            ChatEvent::Message { room_id, .. }
            | ChatEvent::UserJoined { room_id, .. }
            | ChatEvent::UserLeft { room_id, .. }
            | ChatEvent::UserStateChanged { room_id, .. } => room_id,
        }
    }

    /// Short name of the event kind, matching the serialized tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::Message { .. } => "message",
            ChatEvent::UserJoined { .. } => "user_joined",
            ChatEvent::UserLeft { .. } => "user_left",
            ChatEvent::UserStateChanged { .. } => "user_state_changed",
        }
    }
}
