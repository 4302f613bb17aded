//! Room state — membership, queue, playback clock, and skip votes.
//!
//! DESIGN
//! ======
//! `RoomState` is the authoritative per-room state machine. It owns its
//! queue and vote set outright; callers reach it only through a lock guard
//! handed out by the registry, so every operation here runs single-writer.
//!
//! Invariants held after every operation:
//! - no current track ⇒ not playing and no `playback_started_at`
//! - `skip_votes ⊆ members`
//! - the queue never holds the current track; head of queue plays next
//!
//! Nothing in here fails. Unknown connections and empty queues degrade to
//! no-ops; rejecting invalid requests (e.g. voting with nothing playing) is
//! the caller's job.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::clock::{Clock, Timestamp};

/// Transport-level identity of one connected client.
pub type ConnectionId = Uuid;

// =============================================================================
// TRACK
// =============================================================================

/// One playable item. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub display_name: String,
    pub source_path: String,
    pub added_at: Timestamp,
    /// Nominal duration, when the producer knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Track {
    #[must_use]
    pub fn new(display_name: impl Into<String>, source_path: impl Into<String>, added_at: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            source_path: source_path.into(),
            added_at,
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

// =============================================================================
// VIEWS
// =============================================================================

/// Externally-safe view of a room. Carries counts, never member or voter ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub member_count: usize,
    pub current_track: Option<Track>,
    pub queue: Vec<Track>,
    pub is_playing: bool,
    pub playback_started_at: Option<Timestamp>,
    pub skip_vote_count: usize,
    pub required_votes: usize,
}

/// What the room directory shows about the current track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub display_name: String,
    pub added_at: Timestamp,
}

/// One room directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: String,
    pub member_count: usize,
    pub current_track: Option<TrackSummary>,
    pub queue_length: usize,
    pub is_playing: bool,
}

// =============================================================================
// ROOM STATE
// =============================================================================

pub struct RoomState {
    room_id: String,
    /// Unique by construction; iteration order carries no meaning.
    members: HashSet<ConnectionId>,
    /// FIFO. Insertion order is the only play order.
    queue: VecDeque<Track>,
    current_track: Option<Track>,
    is_playing: bool,
    playback_started_at: Option<Timestamp>,
    /// One vote per member; cleared whenever the current track changes.
    skip_votes: HashSet<ConnectionId>,
    /// Set by the registry once the room is unmapped. Never cleared.
    evicted: bool,
    clock: Arc<dyn Clock>,
}

/// Votes needed to skip: `ceil(member_count / 2)`.
#[must_use]
pub fn required_votes(member_count: usize) -> usize {
    member_count.div_ceil(2)
}

impl RoomState {
    #[must_use]
    pub fn new(room_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            room_id: room_id.into(),
            members: HashSet::new(),
            queue: VecDeque::new(),
            current_track: None,
            is_playing: false,
            playback_started_at: None,
            skip_votes: HashSet::new(),
            evicted: false,
            clock,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn is_member(&self, connection_id: ConnectionId) -> bool {
        self.members.contains(&connection_id)
    }

    #[must_use]
    pub fn is_evicted(&self) -> bool {
        self.evicted
    }

    pub(crate) fn mark_evicted(&mut self) {
        self.evicted = true;
    }

    /// Member connections, for delivery only. Never put these on the wire.
    pub fn members(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.members.iter().copied()
    }

    #[must_use]
    pub fn current_track(&self) -> Option<&Track> {
        self.current_track.as_ref()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    #[cfg(test)]
    #[must_use]
    pub fn playback_started_at(&self) -> Option<Timestamp> {
        self.playback_started_at
    }

    #[cfg(test)]
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn skip_vote_count(&self) -> usize {
        self.skip_votes.len()
    }

    #[must_use]
    pub fn required_votes(&self) -> usize {
        required_votes(self.members.len())
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    /// Add a member. Returns `false` if it was already present.
    pub fn join(&mut self, connection_id: ConnectionId) -> bool {
        self.members.insert(connection_id)
    }

    /// Remove a member and any vote it cast. Returns `false` if it was not a member.
    pub fn leave(&mut self, connection_id: ConnectionId) -> bool {
        self.skip_votes.remove(&connection_id);
        self.members.remove(&connection_id)
    }

    // -------------------------------------------------------------------------
    // Playback
    // -------------------------------------------------------------------------

    /// Start `track` immediately if nothing is playing, otherwise append it to
    /// the queue. Returns `true` when the track became current.
    pub fn enqueue(&mut self, track: Track) -> bool {
        if self.current_track.is_some() {
            info!(room_id = %self.room_id, track = %track.display_name, position = self.queue.len(), "queued track");
            self.queue.push_back(track);
            return false;
        }

        info!(room_id = %self.room_id, track = %track.display_name, "auto-playing enqueued track");
        self.start(track);
        true
    }

    /// Current track ended or was skipped: play the queue head, or stop.
    pub fn advance(&mut self) {
        match self.queue.pop_front() {
            Some(next) => {
                info!(room_id = %self.room_id, track = %next.display_name, remaining = self.queue.len(), "advanced to next track");
                self.start(next);
            }
            None => {
                info!(room_id = %self.room_id, "queue exhausted, playback stopped");
                self.current_track = None;
                self.is_playing = false;
                self.playback_started_at = None;
                self.skip_votes.clear();
            }
        }
    }

    /// Track-ended entry point. Advances only while a track is current and,
    /// when the reporter names a track, only if that track is still current.
    /// Returns whether an advance happened.
    pub fn finish_track(&mut self, reported_track_id: Option<Uuid>) -> bool {
        let Some(current) = &self.current_track else {
            return false;
        };
        if reported_track_id.is_some_and(|id| id != current.id) {
            return false;
        }
        self.advance();
        true
    }

    /// Record a skip vote and report whether quorum is now met. Quorum is
    /// evaluated against current membership on every call. A vote from a
    /// connection that is not a member is dropped and never meets quorum.
    pub fn vote_skip(&mut self, connection_id: ConnectionId) -> bool {
        if !self.members.contains(&connection_id) {
            return false;
        }
        self.skip_votes.insert(connection_id);
        self.skip_votes.len() >= self.required_votes()
    }

    fn start(&mut self, track: Track) {
        self.current_track = Some(track);
        self.is_playing = true;
        self.playback_started_at = Some(self.clock.now_ms());
        self.skip_votes.clear();
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            member_count: self.members.len(),
            current_track: self.current_track.clone(),
            queue: self.queue.iter().cloned().collect(),
            is_playing: self.is_playing,
            playback_started_at: self.playback_started_at,
            skip_vote_count: self.skip_votes.len(),
            required_votes: self.required_votes(),
        }
    }

    #[must_use]
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.room_id.clone(),
            member_count: self.members.len(),
            current_track: self
                .current_track
                .as_ref()
                .map(|t| TrackSummary { display_name: t.display_name.clone(), added_at: t.added_at }),
            queue_length: self.queue.len(),
            is_playing: self.is_playing,
        }
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
