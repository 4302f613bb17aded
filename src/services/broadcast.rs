//! Broadcast service — fan-out of room and directory frames.
//!
//! DESIGN
//! ======
//! Delivery is a non-blocking `try_send` onto each client's bounded channel;
//! the socket task drains the channel. A full channel drops the frame for
//! that client only.
//!
//! Room fan-out takes a `&RoomState`, i.e. runs while the caller still
//! holds the room guard. That is what gives every subscriber the same
//! snapshot order as the order mutations were applied. Directory fan-out
//! walks every room, so it must run with no room guard held.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, to_data};
use crate::services::room::{RoomSnapshot, RoomState, RoomSummary};
use crate::state::AppState;

pub const SYSCALL_SNAPSHOT: &str = "room:snapshot";
pub const SYSCALL_DIRECTORY: &str = "room:directory";
pub const SYSCALL_MEMBER_JOINED: &str = "room:member_joined";
pub const SYSCALL_MEMBER_LEFT: &str = "room:member_left";
pub const SYSCALL_SKIPPED: &str = "room:skipped";
pub const SYSCALL_ADVANCED: &str = "room:advanced";
pub const SYSCALL_TICK: &str = "sync:tick";

// =============================================================================
// PAYLOADS
// =============================================================================

#[must_use]
pub fn snapshot_data(snapshot: &RoomSnapshot) -> Data {
    to_data(snapshot)
}

#[must_use]
pub fn directory_data(rooms: &[RoomSummary]) -> Data {
    let mut data = Data::new();
    data.insert("rooms".into(), serde_json::to_value(rooms).unwrap_or_default());
    data
}

#[must_use]
pub fn member_count_data(member_count: usize) -> Data {
    let mut data = Data::new();
    data.insert("member_count".into(), serde_json::json!(member_count));
    data
}

// =============================================================================
// ROOM FAN-OUT
// =============================================================================

/// Send a frame to every member of `room`, optionally excluding one.
pub async fn to_room(state: &AppState, room: &RoomState, frame: &Frame, exclude: Option<Uuid>) {
    let clients = state.clients.read().await;
    for member in room.members() {
        if exclude == Some(member) {
            continue;
        }
        let Some(tx) = clients.get(&member) else {
            continue;
        };
        if tx.try_send(frame.clone()).is_err() {
            warn!(room_id = %room.room_id(), client_id = %member, syscall = %frame.syscall, "dropped room frame for slow client");
        }
    }
}

/// Publish the room's current snapshot to all of its members.
pub async fn room_snapshot(state: &AppState, room: &RoomState) {
    publish_snapshot(state, room, SYSCALL_SNAPSHOT).await;
}

/// Publish the snapshot under `syscall` (`room:snapshot` or `sync:tick`).
pub async fn publish_snapshot(state: &AppState, room: &RoomState, syscall: &str) {
    let frame = Frame::request(syscall, snapshot_data(&room.snapshot())).with_room_id(room.room_id());
    to_room(state, room, &frame, None).await;
}

/// Send a room-scoped notification to every member.
pub async fn room_event(state: &AppState, room: &RoomState, syscall: &str, data: Data, exclude: Option<Uuid>) {
    let frame = Frame::request(syscall, data).with_room_id(room.room_id());
    to_room(state, room, &frame, exclude).await;
}

// =============================================================================
// GLOBAL FAN-OUT
// =============================================================================

/// Send a frame to every connected client.
pub async fn to_all(state: &AppState, frame: &Frame) {
    let clients = state.clients.read().await;
    for (client_id, tx) in clients.iter() {
        if tx.try_send(frame.clone()).is_err() {
            warn!(%client_id, syscall = %frame.syscall, "dropped frame for slow client");
        }
    }
}

/// Recompute the room directory and push it to every connected client.
///
/// Must not be called while holding a room guard.
pub async fn directory(state: &AppState) {
    let _serial = state.directory_lock.lock().await;
    let rooms = state.registry.summaries().await;
    debug!(rooms = rooms.len(), "broadcasting room directory");
    let frame = Frame::request(SYSCALL_DIRECTORY, directory_data(&rooms));
    to_all(state, &frame).await;
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
