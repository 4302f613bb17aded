//! Connection session — one per connected socket.
//!
//! DESIGN
//! ======
//! A session maps a transport connection to at most one room. Its
//! `connection_id` doubles as the member and voter identity inside the room,
//! so one socket casts at most one skip vote.
//!
//! LIFECYCLE
//! =========
//! `connect` registers the outbound channel; `disconnect` leaves the current
//! room (evicting it if that was the last member) and only then drops the
//! channel. The socket task calls `disconnect` on every exit path, clean
//! close or transport error alike.

use tracing::info;
use uuid::Uuid;

use crate::services::room::{ConnectionId, RoomSnapshot, Track};
use crate::services::sync::{self, SyncError, VoteOutcome};
use crate::state::{AppState, ClientSender};

pub struct Session {
    connection_id: ConnectionId,
    room_id: Option<String>,
}

impl Session {
    /// Register a freshly connected client.
    pub async fn connect(state: &AppState, tx: ClientSender) -> Self {
        let connection_id = Uuid::new_v4();
        let connected = {
            let mut clients = state.clients.write().await;
            clients.insert(connection_id, tx);
            clients.len()
        };
        info!(client_id = %connection_id, connected, "session opened");
        Self { connection_id, room_id: None }
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    /// The joined room, or `NotJoined`.
    ///
    /// # Errors
    ///
    /// Returns `NotJoined` if the session is not in a room.
    pub fn joined_room(&self) -> Result<&str, SyncError> {
        self.room_id.as_deref().ok_or(SyncError::NotJoined)
    }

    /// Join `room_id`, leaving the previous room first if it differs.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRoomId` for a blank id.
    pub async fn join(&mut self, state: &AppState, room_id: &str) -> Result<RoomSnapshot, SyncError> {
        let room_id = sync::normalize_room_id(room_id)?;
        if self.room_id.as_deref().is_some_and(|current| current != room_id) {
            self.leave(state).await;
        }
        let snapshot = sync::join_room(state, room_id, self.connection_id).await;
        self.room_id = Some(room_id.to_owned());
        Ok(snapshot)
    }

    /// Leave the current room. Returns `false` if not in one.
    pub async fn leave(&mut self, state: &AppState) -> bool {
        let Some(room_id) = self.room_id.take() else {
            return false;
        };
        sync::leave_room(state, &room_id, self.connection_id).await
    }

    /// Add a track to the current room.
    ///
    /// # Errors
    ///
    /// Returns `NotJoined` if the session is not in a room.
    pub async fn enqueue(&self, state: &AppState, track: Track) -> Result<Option<RoomSnapshot>, SyncError> {
        let room_id = self.joined_room()?;
        Ok(sync::enqueue_track(state, room_id, track).await)
    }

    /// Vote to skip the current track of the current room.
    ///
    /// # Errors
    ///
    /// Returns `NotJoined` or `NoCurrentTrack`.
    pub async fn vote_skip(&self, state: &AppState) -> Result<Option<VoteOutcome>, SyncError> {
        let room_id = self.joined_room()?;
        sync::vote_skip(state, room_id, self.connection_id).await
    }

    /// Report that the local player finished `track_id` (or the current track).
    ///
    /// # Errors
    ///
    /// Returns `NotJoined` if the session is not in a room.
    pub async fn track_ended(&self, state: &AppState, track_id: Option<Uuid>) -> Result<bool, SyncError> {
        let room_id = self.joined_room()?;
        Ok(sync::track_ended(state, room_id, track_id).await)
    }

    /// Tear down: implicit leave, then unregister the outbound channel.
    pub async fn disconnect(mut self, state: &AppState) {
        self.leave(state).await;
        state.clients.write().await.remove(&self.connection_id);
        info!(client_id = %self.connection_id, "session closed");
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
