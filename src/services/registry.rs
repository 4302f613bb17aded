//! Room registry — room id → live room state.
//!
//! DESIGN
//! ======
//! The registry is the only place rooms are created or dropped. Rooms are
//! created on first join and evicted the moment their last member leaves;
//! there is no timeout-based reaping.
//!
//! Each room sits behind its own `tokio::sync::Mutex`, so mutations to one
//! room are serialized while different rooms proceed in parallel under a
//! shared read lock on the map.
//!
//! LOCK ORDER
//! ==========
//! The map lock is only ever held for map reads and writes, never while
//! awaiting a room. Callers clone the room's `Arc`, release the map, then
//! lock the room. Eviction marks the room `evicted` under its own lock
//! before unmapping it, so a caller that raced the eviction sees the flag
//! and retries (`get_or_create`) or treats the room as gone (`get`). A room
//! holding members is never evicted. Never touch the registry while holding
//! a room guard.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::info;

use crate::clock::Clock;
use crate::services::room::{RoomState, RoomSummary};

/// Exclusive handle on one room. Dropping it releases the room.
pub type RoomGuard = OwnedMutexGuard<RoomState>;

#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, Arc<Mutex<RoomState>>>>>,
    clock: Arc<dyn Clock>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { rooms: Arc::new(RwLock::new(HashMap::new())), clock }
    }

    /// Lock the room, creating it first if the id is unknown. Concurrent
    /// callers for the same id always end up on the same room.
    pub async fn get_or_create(&self, room_id: &str) -> RoomGuard {
        loop {
            let room = {
                let mut rooms = self.rooms.write().await;
                rooms
                    .entry(room_id.to_owned())
                    .or_insert_with(|| {
                        info!(%room_id, "created room");
                        Arc::new(Mutex::new(RoomState::new(room_id, Arc::clone(&self.clock))))
                    })
                    .clone()
            };
            let guard = Arc::clone(&room).lock_owned().await;
            if !guard.is_evicted() {
                return guard;
            }
            drop(guard);
            // Lost a race with eviction; clear the stale entry and retry.
            self.unmap(room_id, &room).await;
        }
    }

    /// Lock an existing room.
    pub async fn get(&self, room_id: &str) -> Option<RoomGuard> {
        let room = self.rooms.read().await.get(room_id)?.clone();
        let guard = room.lock_owned().await;
        (!guard.is_evicted()).then_some(guard)
    }

    /// Drop the room iff it has no members. Returns whether it was removed.
    pub async fn remove_if_empty(&self, room_id: &str) -> bool {
        let Some(room) = self.rooms.read().await.get(room_id).cloned() else {
            return false;
        };
        {
            let mut guard = room.lock().await;
            if guard.is_evicted() || !guard.is_empty() {
                return false;
            }
            guard.mark_evicted();
        }
        let remaining_rooms = self.unmap(room_id, &room).await;
        info!(%room_id, remaining_rooms, "evicted empty room");
        true
    }

    /// Remove `room_id` if it still maps to `room`. Returns the room count.
    async fn unmap(&self, room_id: &str, room: &Arc<Mutex<RoomState>>) -> usize {
        let mut rooms = self.rooms.write().await;
        if rooms.get(room_id).is_some_and(|mapped| Arc::ptr_eq(mapped, room)) {
            rooms.remove(room_id);
        }
        rooms.len()
    }

    /// Directory entries for every live room, ordered by room id.
    pub async fn summaries(&self) -> Vec<RoomSummary> {
        let handles = self.handles().await;
        let mut out = Vec::with_capacity(handles.len());
        for room in handles {
            let room = room.lock().await;
            if !room.is_evicted() {
                out.push(room.summary());
            }
        }
        out.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        out
    }

    /// Handles to every live room, for periodic fan-out. The map lock is
    /// released before returning; a room evicted meanwhile has no members
    /// and so nobody to deliver to.
    pub async fn handles(&self) -> Vec<Arc<Mutex<RoomState>>> {
        self.rooms.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
impl RoomRegistry {
    pub async fn contains(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
