//! Error types for chatbridge.

use chatbridge_types::RoomId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Session is not authenticated")]
    NotAuthenticated,

    #[error("Failed to join room {room}: {reason}")]
    Join { room: RoomId, reason: String },

    #[error("Unexpected upstream response: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ChatError {
    /// Wrap any failure during the join handshake as a join error for `room`.
    pub fn join(room: &RoomId, reason: impl ToString) -> Self {
        ChatError::Join {
            room: room.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ChatError::Auth(_) | ChatError::NotAuthenticated)
    }
}
