//! Stored message routes.

use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chatbridge_types::{RoomId, StoredMessage};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub room: Option<String>,
    pub sender: Option<String>,
    pub limit: Option<usize>,
}

fn internal(e: impl ToString) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Newest first. `room` takes precedence over `sender`.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<StoredMessage>>, (StatusCode, String)> {
    let messages = match (query.room, query.sender) {
        (Some(room), _) => state.store.list_by_room(&RoomId::new(room), query.limit),
        (None, Some(sender)) => state.store.list_by_sender(&sender, query.limit),
        (None, None) => state.store.list(query.limit),
    }
    .map_err(internal)?;
    Ok(Json(messages))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<StoredMessage>, (StatusCode, String)> {
    state
        .store
        .get(id)
        .map_err(internal)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("Message not found: {}", id)))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.store.delete(id).map_err(internal)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("Message not found: {}", id)))
    }
}
