//! Transport seam between the protocol client and the upstream service.

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chatbridge_types::{RoomId, UserProfile};
use futures::Stream;
use std::fmt;
use std::pin::Pin;

/// Command the upstream service interprets as "leave this room".
pub const EXIT_COMMAND: &str = "/poistu";

/// Raw byte chunks of an open room stream.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Login credentials.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// URLs handed out by the upstream service for one joined room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoints {
    /// Long-lived HTML stream of the room.
    pub stream_url: String,
    /// Endpoint that accepts chat lines (already carries a query string).
    pub send_url: String,
}

/// A chat line to post into a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    /// Addressee; `None` is everyone in the room.
    pub target: Option<String>,
    pub private: bool,
}

impl OutgoingMessage {
    /// A public message to everyone in the room.
    pub fn public(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            target: None,
            private: false,
        }
    }

    pub fn to(text: impl Into<String>, target: impl Into<String>, private: bool) -> Self {
        Self {
            text: text.into(),
            target: Some(target.into()),
            private,
        }
    }

    /// Empty liveness ping.
    pub fn keepalive() -> Self {
        Self::public("")
    }

    /// Control message that removes the user from `room`.
    pub fn exit(room: &RoomId) -> Self {
        Self::public(format!("{} {}", EXIT_COMMAND, room))
    }

    pub fn is_keepalive(&self) -> bool {
        self.text.is_empty() && self.target.is_none()
    }
}

/// Requests the protocol client makes against the upstream service.
///
/// The implementation owns the authenticated context (cookies); callers only
/// ever see the resulting [`UserProfile`].
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Exchange credentials for an authenticated context.
    async fn authenticate(&self, credentials: &Credentials) -> Result<UserProfile>;

    /// Invalidate the authenticated context.
    async fn logout(&self) -> Result<()>;

    /// Fetch the short-lived token that grants access to `room`.
    async fn fetch_join_token(&self, room: &RoomId) -> Result<String>;

    /// Trade a join token for the room's stream and send URLs.
    async fn exchange_token(
        &self,
        room: &RoomId,
        profile: &UserProfile,
        token: &str,
    ) -> Result<StreamEndpoints>;

    /// Open the long-lived room stream.
    async fn open_stream(&self, stream_url: &str) -> Result<FragmentStream>;

    /// Post a message through the room's send endpoint.
    async fn send_to_room(&self, send_url: &str, message: &OutgoingMessage) -> Result<()>;
}
