use super::*;
use crate::clock::ManualClock;
use crate::services::room::Track;
use uuid::Uuid;

fn registry() -> RoomRegistry {
    RoomRegistry::new(Arc::new(ManualClock::new(1_000)))
}

#[tokio::test]
async fn get_or_create_creates_once_per_id() {
    let registry = registry();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    registry.get_or_create("lounge").await.join(a);
    registry.get_or_create("lounge").await.join(b);

    assert_eq!(registry.len().await, 1);
    let room = registry.get("lounge").await.expect("room should exist");
    assert_eq!(room.member_count(), 2);
}

#[tokio::test]
async fn get_unknown_room_is_none() {
    let registry = registry();
    assert!(registry.get("nowhere").await.is_none());
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn room_ids_are_opaque_strings() {
    let registry = registry();
    registry.get_or_create("Lounge").await.join(Uuid::new_v4());
    registry.get_or_create("lounge").await.join(Uuid::new_v4());
    assert_eq!(registry.len().await, 2);
}

#[tokio::test]
async fn remove_if_empty_evicts_after_last_leave() {
    let registry = registry();
    let a = Uuid::new_v4();
    registry.get_or_create("lounge").await.join(a);

    registry.get("lounge").await.expect("room").leave(a);
    assert!(registry.remove_if_empty("lounge").await);
    assert!(!registry.contains("lounge").await);
    assert!(registry.get("lounge").await.is_none());
}

#[tokio::test]
async fn remove_if_empty_keeps_occupied_room() {
    let registry = registry();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    {
        let mut room = registry.get_or_create("lounge").await;
        room.join(a);
        room.join(b);
    }

    registry.get("lounge").await.expect("room").leave(a);
    assert!(!registry.remove_if_empty("lounge").await);
    assert!(registry.contains("lounge").await);
}

#[tokio::test]
async fn remove_if_empty_on_unknown_room_is_a_no_op() {
    let registry = registry();
    assert!(!registry.remove_if_empty("nowhere").await);
}

#[tokio::test]
async fn summaries_are_sorted_by_room_id() {
    let registry = registry();
    for id in ["zeta", "alpha", "mid"] {
        registry.get_or_create(id).await.join(Uuid::new_v4());
    }
    registry
        .get("mid")
        .await
        .expect("room")
        .enqueue(Track::new("song", "/uploads/song.mp3", 1_000));

    let summaries = registry.summaries().await;
    let ids: Vec<&str> = summaries.iter().map(|s| s.room_id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    assert!(summaries[1].is_playing);
    assert!(!summaries[0].is_playing);
}

#[tokio::test]
async fn concurrent_joins_to_same_room_are_not_lost() {
    let registry = registry();
    let mut handles = Vec::new();
    for _ in 0..32 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry.get_or_create("party").await.join(Uuid::new_v4());
        }));
    }
    for handle in handles {
        handle.await.expect("join task");
    }

    assert_eq!(registry.len().await, 1);
    assert_eq!(registry.get("party").await.expect("room").member_count(), 32);
}

#[tokio::test]
async fn concurrent_votes_are_serialized() {
    let registry = registry();
    let members: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
    {
        let mut room = registry.get_or_create("party").await;
        for id in &members {
            room.join(*id);
        }
        room.enqueue(Track::new("a", "/a.mp3", 0));
        room.enqueue(Track::new("b", "/b.mp3", 0));
    }

    let mut handles = Vec::new();
    for id in members.iter().take(3).copied() {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let mut room = registry.get("party").await.expect("room");
            room.vote_skip(id);
        }));
    }
    for handle in handles {
        handle.await.expect("vote task");
    }

    let room = registry.get("party").await.expect("room");
    assert_eq!(room.skip_vote_count(), 3);
}

#[tokio::test]
async fn join_racing_eviction_never_lands_in_orphaned_room() {
    let registry = registry();
    let first = Uuid::new_v4();
    registry.get_or_create("lounge").await.join(first);

    let leaver = {
        let registry = registry.clone();
        tokio::spawn(async move {
            registry.get("lounge").await.expect("room").leave(first);
            registry.remove_if_empty("lounge").await;
        })
    };
    let second = Uuid::new_v4();
    let joiner = {
        let registry = registry.clone();
        tokio::spawn(async move {
            registry.get_or_create("lounge").await.join(second);
        })
    };
    leaver.await.expect("leave task");
    joiner.await.expect("join task");

    // Whatever the interleaving, the joiner must be in the registered room.
    let room = registry.get("lounge").await.expect("room should exist");
    assert!(room.is_member(second));
}

#[tokio::test]
async fn busy_room_does_not_stall_other_rooms() {
    let registry = registry();
    registry.get_or_create("busy").await.join(Uuid::new_v4());
    registry.get_or_create("quiet").await.join(Uuid::new_v4());
    let held = registry.get("busy").await.expect("room");

    // Both of these wait on the busy room's lock.
    let lister = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.summaries().await.len() })
    };
    let evictor = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.remove_if_empty("busy").await })
    };
    tokio::task::yield_now().await;

    let other = tokio::time::timeout(std::time::Duration::from_secs(1), async {
        registry.get_or_create("fresh").await.join(Uuid::new_v4());
        registry.get("quiet").await.expect("room").member_count()
    })
    .await
    .expect("other rooms stay reachable while one room is locked");
    assert_eq!(other, 1);

    drop(held);
    // The listing may or may not have seen "fresh" before blocking.
    assert!(lister.await.expect("list task") >= 2);
    assert!(!evictor.await.expect("evict task"));
}

#[tokio::test]
async fn stale_handle_sees_eviction_and_get_or_create_starts_fresh() {
    let registry = registry();
    let a = Uuid::new_v4();
    registry.get_or_create("lounge").await.join(a);
    let stale = registry.handles().await.pop().expect("one room");

    registry.get("lounge").await.expect("room").leave(a);
    assert!(registry.remove_if_empty("lounge").await);
    assert!(stale.lock().await.is_evicted());
    // A second eviction of the same id is a no-op.
    assert!(!registry.remove_if_empty("lounge").await);

    let b = Uuid::new_v4();
    let mut fresh = registry.get_or_create("lounge").await;
    fresh.join(b);
    assert!(!fresh.is_evicted());
    drop(fresh);
    assert!(!stale.lock().await.is_member(b));
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn summaries_skip_rooms_evicted_meanwhile() {
    let registry = registry();
    let a = Uuid::new_v4();
    registry.get_or_create("lounge").await.join(a);
    registry.get_or_create("other").await.join(Uuid::new_v4());

    registry.get("lounge").await.expect("room").leave(a);
    assert!(registry.remove_if_empty("lounge").await);

    let ids: Vec<String> = registry.summaries().await.into_iter().map(|s| s.room_id).collect();
    assert_eq!(ids, vec!["other".to_owned()]);
}
