//! Sync service — applies room events and publishes the results.
//!
//! DESIGN
//! ======
//! Each inbound event (join, leave, enqueue, vote, track-ended) follows the
//! same shape:
//!
//! 1. lock the room through the registry
//! 2. mutate it
//! 3. publish room-scoped frames while still holding the guard
//! 4. release the guard, then evict/refresh the directory if needed
//!
//! Step 3 under the guard keeps per-room frame order identical to mutation
//! order. Step 4 outside it keeps the registry lock order intact.
//!
//! ERROR HANDLING
//! ==============
//! An unknown room is a silent no-op (a late event racing a leave is
//! benign). Invalid requests are rejected here, before reaching the room.

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

use crate::frame::{Data, ErrorCode};
use crate::services::broadcast::{
    self, SYSCALL_ADVANCED, SYSCALL_MEMBER_JOINED, SYSCALL_MEMBER_LEFT, SYSCALL_SKIPPED, SYSCALL_TICK,
};
use crate::services::drift::{self, DriftReport};
use crate::services::room::{ConnectionId, RoomSnapshot, Track};
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("must join a room first")]
    NotJoined,
    #[error("nothing is playing")]
    NoCurrentTrack,
    #[error("room_id required")]
    InvalidRoomId,
    #[error("invalid track: {0}")]
    InvalidTrack(String),
    #[error("track duration unknown; send duration_ms")]
    DurationUnknown,
}

impl ErrorCode for SyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotJoined => "E_NOT_JOINED",
            Self::NoCurrentTrack => "E_NO_CURRENT_TRACK",
            Self::InvalidRoomId => "E_INVALID_ROOM_ID",
            Self::InvalidTrack(_) => "E_INVALID_TRACK",
            Self::DurationUnknown => "E_DURATION_UNKNOWN",
        }
    }
}

/// Result of a recorded skip vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct VoteOutcome {
    pub skipped: bool,
    pub skip_vote_count: usize,
    pub required_votes: usize,
}

/// Track metadata as submitted by the producer (upload handler or client).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TrackInput {
    pub display_name: String,
    pub source_path: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl TrackInput {
    /// Validate and stamp into an immutable `Track`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTrack` if the name or source path is blank.
    pub fn into_track(self, added_at: i64) -> Result<Track, SyncError> {
        let display_name = self.display_name.trim();
        if display_name.is_empty() {
            return Err(SyncError::InvalidTrack("display_name required".into()));
        }
        let source_path = self.source_path.trim();
        if source_path.is_empty() {
            return Err(SyncError::InvalidTrack("source_path required".into()));
        }
        let track = Track::new(display_name, source_path, added_at);
        Ok(match self.duration_ms.filter(|ms| *ms > 0) {
            Some(ms) => track.with_duration_ms(ms),
            None => track,
        })
    }
}

/// Normalize a client-chosen room id. Same string = same room; only
/// surrounding whitespace is dropped.
///
/// # Errors
///
/// Returns `InvalidRoomId` if the id is blank.
pub fn normalize_room_id(raw: &str) -> Result<&str, SyncError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SyncError::InvalidRoomId);
    }
    Ok(trimmed)
}

// =============================================================================
// EVENTS
// =============================================================================

/// `joinRoom`: add the connection, creating the room on first join.
pub async fn join_room(state: &AppState, room_id: &str, client_id: ConnectionId) -> RoomSnapshot {
    let mut room = state.registry.get_or_create(room_id).await;
    let added = room.join(client_id);
    if added {
        let data = broadcast::member_count_data(room.member_count());
        broadcast::room_event(state, &room, SYSCALL_MEMBER_JOINED, data, Some(client_id)).await;
        info!(%room_id, %client_id, members = room.member_count(), "client joined room");
    }
    broadcast::room_snapshot(state, &room).await;
    let snapshot = room.snapshot();
    drop(room);

    if added {
        broadcast::directory(state).await;
    }
    snapshot
}

/// `leaveRoom`: remove the connection and evict the room if it emptied.
/// Returns whether the connection was a member.
pub async fn leave_room(state: &AppState, room_id: &str, client_id: ConnectionId) -> bool {
    let Some(mut room) = state.registry.get(room_id).await else {
        return false;
    };
    let removed = room.leave(client_id);
    if removed {
        info!(%room_id, %client_id, remaining = room.member_count(), "client left room");
        if !room.is_empty() {
            let data = broadcast::member_count_data(room.member_count());
            broadcast::room_event(state, &room, SYSCALL_MEMBER_LEFT, data, None).await;
            broadcast::room_snapshot(state, &room).await;
        }
    }
    drop(room);

    state.registry.remove_if_empty(room_id).await;
    if removed {
        broadcast::directory(state).await;
    }
    removed
}

/// `enqueueTrack`: start or queue a track. `None` if the room is unknown.
pub async fn enqueue_track(state: &AppState, room_id: &str, track: Track) -> Option<RoomSnapshot> {
    let mut room = state.registry.get(room_id).await?;
    room.enqueue(track);
    broadcast::room_snapshot(state, &room).await;
    let snapshot = room.snapshot();
    drop(room);

    broadcast::directory(state).await;
    Some(snapshot)
}

/// `voteSkip`: record a vote; skip when quorum is met. `Ok(None)` if the
/// room is unknown.
///
/// # Errors
///
/// `NotJoined` if the voter is not a member, `NoCurrentTrack` if nothing is
/// playing. Neither reaches the room state.
pub async fn vote_skip(
    state: &AppState,
    room_id: &str,
    client_id: ConnectionId,
) -> Result<Option<VoteOutcome>, SyncError> {
    let Some(mut room) = state.registry.get(room_id).await else {
        return Ok(None);
    };
    if !room.is_member(client_id) {
        return Err(SyncError::NotJoined);
    }
    if room.current_track().is_none() {
        return Err(SyncError::NoCurrentTrack);
    }

    let quorum = room.vote_skip(client_id);
    let mut outcome =
        VoteOutcome { skipped: false, skip_vote_count: room.skip_vote_count(), required_votes: room.required_votes() };
    debug!(%room_id, %client_id, votes = outcome.skip_vote_count, required = outcome.required_votes, "skip vote recorded");

    if quorum {
        room.advance();
        outcome.skipped = true;
        info!(%room_id, "track skipped by vote");
        broadcast::room_event(state, &room, SYSCALL_SKIPPED, Data::new(), None).await;
    }
    broadcast::room_snapshot(state, &room).await;
    drop(room);

    if quorum {
        broadcast::directory(state).await;
    }
    Ok(Some(outcome))
}

/// `trackEnded`: advance once per current track. Returns whether the room
/// advanced; duplicates and stale reports return `false`.
pub async fn track_ended(state: &AppState, room_id: &str, reported_track_id: Option<Uuid>) -> bool {
    let Some(mut room) = state.registry.get(room_id).await else {
        return false;
    };
    if !room.finish_track(reported_track_id) {
        debug!(%room_id, ?reported_track_id, "ignoring track-ended for non-current track");
        return false;
    }

    broadcast::room_snapshot(state, &room).await;
    if let Some(next) = room.current_track() {
        let mut data = Data::new();
        data.insert("track".into(), serde_json::to_value(next).unwrap_or_default());
        broadcast::room_event(state, &room, SYSCALL_ADVANCED, data, None).await;
    }
    drop(room);

    broadcast::directory(state).await;
    true
}

/// Current snapshot of a room, if it exists.
pub async fn room_state(state: &AppState, room_id: &str) -> Option<RoomSnapshot> {
    Some(state.registry.get(room_id).await?.snapshot())
}

/// `sync:check`: reconcile a client-reported position against the room
/// timeline. `duration_ms` falls back to the track's own metadata.
///
/// # Errors
///
/// `NoCurrentTrack` if the room is unknown or stopped, `DurationUnknown`
/// if neither the caller nor the track supplies a duration.
pub async fn check_drift(
    state: &AppState,
    room_id: &str,
    local_ms: i64,
    duration_ms: Option<u64>,
) -> Result<DriftReport, SyncError> {
    let snapshot = room_state(state, room_id)
        .await
        .ok_or(SyncError::NoCurrentTrack)?;
    let track_duration = snapshot
        .current_track
        .as_ref()
        .ok_or(SyncError::NoCurrentTrack)?
        .duration_ms;
    let duration_ms = duration_ms
        .or(track_duration)
        .ok_or(SyncError::DurationUnknown)?;

    let now = state.clock.now_ms();
    drift::check(&snapshot, now, local_ms, duration_ms, state.config.drift_threshold_ms)
        .ok_or(SyncError::NoCurrentTrack)
}

// =============================================================================
// PERIODIC SYNC
// =============================================================================

/// Spawn the periodic sync task. Every interval, members of each playing
/// room receive a `sync:tick` snapshot to re-anchor their players against.
pub fn spawn_sync_task(state: AppState) -> JoinHandle<()> {
    let interval = state.config.sync_interval();
    info!(interval_ms = state.config.sync_interval_ms, "periodic sync configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            publish_ticks(&state).await;
        }
    })
}

/// Publish one `sync:tick` round. Returns how many rooms were ticked.
pub async fn publish_ticks(state: &AppState) -> usize {
    let mut ticked = 0;
    for handle in state.registry.handles().await {
        let room = handle.lock().await;
        if !room.is_playing() || room.is_empty() {
            continue;
        }
        broadcast::publish_snapshot(state, &room, SYSCALL_TICK).await;
        ticked += 1;
    }
    if ticked > 0 {
        debug!(rooms = ticked, "published sync ticks");
    }
    ticked
}

#[cfg(test)]
#[path = "sync_test.rs"]
mod tests;
