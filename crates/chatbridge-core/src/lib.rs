//! Protocol client for the legacy room chat, plus message persistence.

mod channel;
mod client;
mod db;
mod decoder;
mod error;
mod http;
mod markup;
mod parser;
mod session;
mod transport;

pub use channel::{Channel, ChannelConfig, ChannelFailure, FailureCause};
pub use client::{ChatClient, ClientConfig, EventStream};
pub use db::{MessageStore, DEFAULT_LIMIT};
pub use decoder::FragmentDecoder;
pub use error::ChatError;
pub use http::{
    build_send_url, endpoints_from_redirect, extract_join_token, legacy_escape, HttpEndpoints,
    HttpTransport,
};
pub use parser::{classify, emoticon_code, FragmentKind, FragmentParser, ParserOptions};
pub use session::Session;
pub use transport::{
    ChatTransport, Credentials, FragmentStream, OutgoingMessage, StreamEndpoints, EXIT_COMMAND,
};

/// Result type for chatbridge operations.
pub type Result<T> = std::result::Result<T, ChatError>;
