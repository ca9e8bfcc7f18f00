//! Chatbridge server library - REST and WebSocket front for the chat client.
//!
//! Routes, WebSocket handlers and application state live here, separate from
//! main.rs, so integration tests can build the router against a scripted
//! transport.

pub mod config;
pub mod event_processor;
pub mod global_ws;
pub mod logging;
pub mod routes;
pub mod scheduler;
pub mod state;
