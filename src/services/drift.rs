//! Drift reconciliation — where a client's player should be.
//!
//! DESIGN
//! ======
//! The server never pushes position deltas. It publishes
//! `playback_started_at` and `is_playing` at every transition, and every
//! client derives the same expected position on its own:
//!
//! ```text
//! expected = now - playback_started_at
//! seek to expected  iff  |expected - local| > threshold
//!                   and  0 <= expected < duration
//! ```
//!
//! Clients run the check on a fixed cadence. The same math backs the
//! `sync:check` request, for clients that would rather ask than compute.
//! Server and client clocks are assumed to agree; there is no skew
//! compensation.

use serde::Serialize;

use crate::clock::Timestamp;
use crate::services::room::RoomSnapshot;

/// How often a client compares its player against the room timeline.
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 5_000;

/// Drift tolerated before a client seeks.
pub const DEFAULT_DRIFT_THRESHOLD_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Correction {
    /// Within tolerance; leave the player alone.
    InSync,
    /// Seek the local player to `position_ms`.
    Seek { position_ms: i64 },
    /// Drifted, but the expected position lies outside the track, so a seek
    /// would be meaningless. The track-ended path takes over from here.
    OutOfRange,
}

/// Outcome of one drift check, as returned to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub expected_ms: i64,
    pub local_ms: i64,
    /// `local - expected`: positive means the client is ahead.
    pub drift_ms: i64,
    pub correction: Correction,
}

/// Position the room timeline is at, or `None` if nothing is playing.
#[must_use]
pub fn expected_position_ms(snapshot: &RoomSnapshot, now: Timestamp) -> Option<i64> {
    if !snapshot.is_playing {
        return None;
    }
    snapshot.playback_started_at.map(|started| now.saturating_sub(started))
}

/// Decide whether a player at `local_ms` must seek.
#[must_use]
pub fn reconcile(expected_ms: i64, local_ms: i64, duration_ms: u64, threshold_ms: u64) -> Correction {
    let drift = expected_ms.abs_diff(local_ms);
    if drift <= threshold_ms {
        return Correction::InSync;
    }
    let in_track = expected_ms >= 0 && expected_ms.unsigned_abs() < duration_ms;
    if !in_track {
        return Correction::OutOfRange;
    }
    Correction::Seek { position_ms: expected_ms }
}

/// Full drift check against a snapshot. `None` if the room is not playing.
/// `local_ms` is client-reported, so the arithmetic saturates.
#[must_use]
pub fn check(
    snapshot: &RoomSnapshot,
    now: Timestamp,
    local_ms: i64,
    duration_ms: u64,
    threshold_ms: u64,
) -> Option<DriftReport> {
    let expected_ms = expected_position_ms(snapshot, now)?;
    Some(DriftReport {
        expected_ms,
        local_ms,
        drift_ms: local_ms.saturating_sub(expected_ms),
        correction: reconcile(expected_ms, local_ms, duration_ms, threshold_ms),
    })
}

#[cfg(test)]
#[path = "drift_test.rs"]
mod tests;
