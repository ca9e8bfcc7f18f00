//! Session routes.

use super::error_response;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use chatbridge_types::{RoomStatus, UserProfile};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
    pub rooms: Vec<RoomStatus>,
}

pub async fn get(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    let profile = state.client.profile().await;
    Json(SessionResponse {
        authenticated: profile.is_some(),
        profile,
        rooms: state.client.statuses(),
    })
}

pub async fn relogin(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionResponse>, (StatusCode, String)> {
    state.client.relogin().await.map_err(error_response)?;
    Ok(get(State(state)).await)
}

/// Leave every room but keep the session.
pub async fn leave_all(State(state): State<Arc<AppState>>) -> StatusCode {
    state.client.leave_all().await;
    StatusCode::NO_CONTENT
}
