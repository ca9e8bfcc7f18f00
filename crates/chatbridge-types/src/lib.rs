//! Shared types for the chatbridge chat client and server.

mod channel;
mod event;
mod message;
mod room;
mod session;
mod ws;

pub use channel::*;
pub use event::*;
pub use message::*;
pub use room::*;
pub use session::*;
pub use ws::*;
