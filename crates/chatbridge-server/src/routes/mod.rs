//! HTTP route handlers.

pub mod messages;
pub mod rooms;
pub mod session;
pub mod ws;

use crate::state::AppState;
use axum::{
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chatbridge_core::ChatError;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// REST routes, mounted under `/api`.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        // Rooms
        .route("/rooms", get(rooms::list))
        .route("/rooms/{id}", delete(rooms::leave))
        .route("/rooms/{id}/join", post(rooms::join))
        .route("/rooms/{id}/messages", post(rooms::send_message))
        // Session
        .route("/session", get(session::get))
        .route("/session/relogin", post(session::relogin))
        .route("/session/leave", post(session::leave_all))
        // Stored messages
        .route("/messages", get(messages::list))
        .route("/messages/{id}", get(messages::get).delete(messages::delete))
}

/// WebSocket routes, mounted under `/ws`.
pub fn ws_routes() -> Router<Arc<AppState>> {
    Router::new().route("/events", get(ws::upgrade))
}

/// Full application router without middleware.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .nest("/ws", ws_routes())
        .with_state(state)
}

/// Map a chat error to the status code a handler returns.
pub fn error_response(e: ChatError) -> (StatusCode, String) {
    let status = match &e {
        ChatError::RoomNotFound(_) => StatusCode::NOT_FOUND,
        ChatError::Auth(_) | ChatError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        ChatError::Join { .. }
        | ChatError::Protocol(_)
        | ChatError::Transport(_)
        | ChatError::Send(_)
        | ChatError::HttpError(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::warn!(target: "chatbridge::api", "Request failed: {}", e);
    }
    (status, e.to_string())
}
