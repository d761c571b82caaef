use super::*;
use crate::sched::{Clock, ManualClock};
use canvas::doc::{UserMetadata, UserStatus};

fn user(id: &str) -> User {
    User {
        id: id.to_owned(),
        point: [0.0, 0.0],
        color: "#aabbcc".to_owned(),
        status: UserStatus::Connected,
        metadata: UserMetadata { id: id.to_owned(), name: format!("Peer {id}") },
    }
}

fn camera() -> Camera {
    Camera { point: [3.0, 4.0], zoom: 2.0 }
}

// =============================================================
// Roster
// =============================================================

#[test]
fn upsert_tracks_peers_but_never_self() {
    let mut tracker = PresenceTracker::new("me");
    tracker.upsert(user("a"), camera(), None).unwrap();
    tracker.upsert(user("me"), camera(), None).unwrap();
    assert_eq!(tracker.len(), 1);
    assert!(tracker.get("a").is_some());
    assert!(tracker.get("me").is_none());
}

#[test]
fn upsert_rejects_entries_without_ids() {
    let mut tracker = PresenceTracker::new("me");
    let mut bad = user("");
    bad.metadata.id = String::new();
    let err = tracker.upsert(bad, camera(), None).unwrap_err();
    assert!(matches!(err, SyncError::UserLoadFailure(_)));
    assert!(tracker.is_empty());
}

#[test]
fn presence_update_without_viewport_keeps_last_known() {
    let mut tracker = PresenceTracker::new("me");
    let viewport = Viewport { width: 640.0, height: 480.0 };
    tracker.upsert(user("a"), camera(), Some(viewport)).unwrap();
    tracker
        .upsert(user("a"), Camera { point: [9.0, 9.0], zoom: 1.0 }, None)
        .unwrap();

    let (cam, vp) = tracker.camera_of("a").unwrap();
    assert_eq!(cam.point, [9.0, 9.0]);
    assert_eq!(vp.unwrap().width, 640.0);
}

#[test]
fn remove_returns_the_entry() {
    let mut tracker = PresenceTracker::new("me");
    tracker.upsert(user("a"), camera(), None).unwrap();
    let entry = tracker.remove("a").unwrap();
    assert_eq!(entry.user.id, "a");
    assert!(tracker.is_empty());
    assert!(tracker.remove("a").is_none());
}

// =============================================================
// Roster seeding
// =============================================================

#[test]
fn load_roster_skips_unusable_entries() {
    let mut tracker = PresenceTracker::new("me");
    let mut entries = HashMap::new();
    entries.insert(
        "a".to_owned(),
        serde_json::to_value(RosterRecord { user: user("a"), camera: camera() }).unwrap(),
    );
    entries.insert("broken".to_owned(), serde_json::json!({"user": 17}));
    entries.insert(
        "me".to_owned(),
        serde_json::to_value(RosterRecord { user: user("me"), camera: camera() }).unwrap(),
    );

    let (loaded, skipped) = tracker.load_roster(&entries);
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].user.id, "a");
    assert_eq!(skipped, 1);
    assert_eq!(tracker.len(), 1);
}

// =============================================================
// Broadcast gating
// =============================================================

#[test]
fn idle_broadcasts_use_short_interval() {
    let clock = ManualClock::new();
    let mut tracker = PresenceTracker::new("me");

    assert!(tracker.should_broadcast(clock.now(), false));
    clock.advance(IDLE_INTERVAL - Duration::from_millis(1));
    assert!(!tracker.should_broadcast(clock.now(), false));
    clock.advance(Duration::from_millis(1));
    assert!(tracker.should_broadcast(clock.now(), false));
}

#[test]
fn drawing_broadcasts_use_long_interval() {
    let clock = ManualClock::new();
    let mut tracker = PresenceTracker::new("me");

    assert!(tracker.should_broadcast(clock.now(), true));
    clock.advance(IDLE_INTERVAL);
    assert!(!tracker.should_broadcast(clock.now(), true));
    clock.advance(DRAWING_INTERVAL);
    assert!(tracker.should_broadcast(clock.now(), true));
}

#[test]
fn reset_lets_the_next_broadcast_through() {
    let clock = ManualClock::new();
    let mut tracker = PresenceTracker::new("me");
    assert!(tracker.should_broadcast(clock.now(), false));
    tracker.reset_throttle();
    assert!(tracker.should_broadcast(clock.now(), false));
}
