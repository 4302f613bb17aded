//! Room directory and track hand-off routes.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;

use crate::services::room::{RoomSnapshot, RoomSummary};
use crate::services::sync::{self, SyncError, TrackInput};
use crate::state::AppState;

pub type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

/// `GET /api/rooms` — the room directory.
pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(state.registry.summaries().await)
}

/// `GET /api/rooms/:id/state` — current snapshot of one room.
pub async fn room_state(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSnapshot>, ApiError> {
    let room_id = sync::normalize_room_id(&room_id).map_err(sync_error_to_status)?;
    sync::room_state(&state, room_id)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "room not found"))
}

/// `POST /api/rooms/:id/tracks` — enqueue a track produced by the uploader.
/// Only existing rooms accept tracks; an upload never creates a room.
pub async fn enqueue_track(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    body: Result<Json<TrackInput>, JsonRejection>,
) -> Result<Json<RoomSnapshot>, ApiError> {
    let Json(body) = body.map_err(rejection_to_status)?;
    let room_id = sync::normalize_room_id(&room_id).map_err(sync_error_to_status)?;
    let track = body
        .into_track(state.clock.now_ms())
        .map_err(sync_error_to_status)?;
    sync::enqueue_track(&state, room_id, track)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "room not found"))
}

/// Malformed bodies get the same `{ "error": message }` shape as every
/// other failure instead of axum's plain-text rejection.
fn rejection_to_status(rejection: JsonRejection) -> ApiError {
    api_error(rejection.status(), rejection.body_text())
}

pub(crate) fn sync_error_to_status(err: SyncError) -> ApiError {
    let status = match err {
        SyncError::InvalidRoomId | SyncError::InvalidTrack(_) | SyncError::DurationUnknown => StatusCode::BAD_REQUEST,
        SyncError::NotJoined | SyncError::NoCurrentTrack => StatusCode::CONFLICT,
    };
    api_error(status, err.to_string())
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
