//! Room management routes.

use super::error_response;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chatbridge_types::{RoomId, RoomStatus};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub private: bool,
}

pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<RoomStatus>> {
    Json(state.client.statuses())
}

pub async fn join(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RoomStatus>, (StatusCode, String)> {
    if !state.client.session().is_authenticated().await {
        return Err((StatusCode::UNAUTHORIZED, "Session is not authenticated".to_string()));
    }

    let room = RoomId::new(id);
    state
        .client
        .join(room.clone())
        .await
        .map_err(error_response)?;

    tracing::info!(target: "chatbridge::api", "Joined room {} via API", room);
    state
        .client
        .room_status(&room)
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("Room not found: {}", room)))
}

pub async fn leave(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let room = RoomId::new(id);
    state.client.leave(&room).await.map_err(error_response)?;
    tracing::info!(target: "chatbridge::api", "Left room {} via API", room);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let room = RoomId::new(id);
    let Some(status) = state.client.room_status(&room) else {
        return Err((StatusCode::NOT_FOUND, format!("Room not found: {}", room)));
    };
    if !status.state.can_send() {
        return Err((
            StatusCode::CONFLICT,
            format!("Room {} is {}, cannot send", room, status.state),
        ));
    }
    if req.message.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Message is empty".to_string()));
    }

    state
        .client
        .send(&room, &req.message, req.target.as_deref(), req.private)
        .await;
    Ok(StatusCode::ACCEPTED)
}
