//! Channel lifecycle types.

use crate::RoomId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a room channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Channel exists but has never joined (or its last join failed).
    Unjoined,
    /// Join token and stream URL are being negotiated.
    Joining,
    /// Stream is open and fragments are being read.
    Streaming,
    /// Stream was lost; rejoin attempts are in progress.
    Reconnecting,
    /// Channel was left or gave up reconnecting.
    Closed,
}

impl ChannelState {
    /// Whether the send endpoint is still considered usable.
    pub fn can_send(self) -> bool {
        matches!(self, ChannelState::Streaming | ChannelState::Reconnecting)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Unjoined => "unjoined",
            ChannelState::Joining => "joining",
            ChannelState::Streaming => "streaming",
            ChannelState::Reconnecting => "reconnecting",
            ChannelState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a channel, for dashboards and the REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomStatus {
    pub room_id: RoomId,
    pub state: ChannelState,
    /// Current reconnect attempt (0 when not reconnecting).
    pub reconnect_attempt: u32,
    pub fragments_received: u64,
    pub events_emitted: u64,
    /// Fragments that could not be classified or parsed.
    pub fragments_discarded: u64,
    /// Successful reconnects since the channel was created.
    pub reconnects: u64,
}
