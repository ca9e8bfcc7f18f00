//! Persisted chat messages.

use crate::RoomId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message row from the message store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub rowid: i64,
    pub sender: String,
    pub body: String,
    pub target: Option<String>,
    pub is_private: bool,
    pub room_id: RoomId,
    pub timestamp: DateTime<Utc>,
}

