//! Presence tracker: the roster of connected peers and their live
//! cursor/camera broadcasts.
//!
//! Live presence flows over the event bus, never through the persisted
//! store; the `users` namespace only seeds the roster for late joiners.
//! Outbound broadcasts are throttled leading-edge, with a longer interval
//! while the local user is drawing so cursor chatter never competes with
//! shape-edit traffic.

#[cfg(test)]
#[path = "presence_test.rs"]
mod presence_test;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use canvas::camera::{Camera, Viewport};
use canvas::doc::User;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SyncError;
use crate::sched::Throttle;

/// Broadcast interval while the local user is idle.
pub const IDLE_INTERVAL: Duration = Duration::from_millis(120);

/// Broadcast interval while the local user is drawing.
pub const DRAWING_INTERVAL: Duration = Duration::from_millis(400);

/// Roster record as persisted in the `users` namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterRecord {
    pub user: User,
    pub camera: Camera,
}

/// One connected peer.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub user: User,
    pub camera: Camera,
    pub viewport: Option<Viewport>,
}

/// Roster of connected peers plus the outbound broadcast throttle.
#[derive(Debug)]
pub struct PresenceTracker {
    self_id: String,
    peers: HashMap<String, PeerEntry>,
    throttle: Throttle,
}

impl PresenceTracker {
    #[must_use]
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            peers: HashMap::new(),
            throttle: Throttle::new(IDLE_INTERVAL),
        }
    }

    /// Insert or refresh a peer. The local user is never tracked as a peer.
    ///
    /// # Errors
    ///
    /// Returns `UserLoadFailure` when the entry is missing a usable id.
    pub fn upsert(
        &mut self,
        user: User,
        camera: Camera,
        viewport: Option<Viewport>,
    ) -> Result<(), SyncError> {
        if user.id.is_empty() || user.metadata.id.is_empty() {
            return Err(SyncError::UserLoadFailure(format!(
                "entry for '{}' has no usable id",
                user.metadata.name
            )));
        }
        if user.id == self.self_id {
            return Ok(());
        }
        let entry = self
            .peers
            .entry(user.id.clone())
            .or_insert_with(|| PeerEntry { user: user.clone(), camera, viewport });
        entry.user = user;
        entry.camera = camera;
        if viewport.is_some() {
            entry.viewport = viewport;
        }
        Ok(())
    }

    /// Remove a peer, returning its entry.
    pub fn remove(&mut self, user_id: &str) -> Option<PeerEntry> {
        self.peers.remove(user_id)
    }

    /// Seed the roster from the persisted `users` namespace, skipping
    /// unusable entries. Returns the loaded peers; skipped entries are
    /// logged and counted.
    pub fn load_roster(
        &mut self,
        entries: &HashMap<String, serde_json::Value>,
    ) -> (Vec<PeerEntry>, usize) {
        let mut loaded = Vec::new();
        let mut skipped = 0;
        for (key, value) in entries {
            let record: RosterRecord = match serde_json::from_value(value.clone()) {
                Ok(record) => record,
                Err(e) => {
                    warn!(key, error = %e, "skipping unusable roster entry");
                    skipped += 1;
                    continue;
                }
            };
            if self
                .upsert(record.user.clone(), record.camera, None)
                .is_err()
            {
                warn!(key, "skipping roster entry with no usable id");
                skipped += 1;
                continue;
            }
            if record.user.id != self.self_id {
                loaded.push(PeerEntry { user: record.user, camera: record.camera, viewport: None });
            }
        }
        (loaded, skipped)
    }

    #[must_use]
    pub fn camera_of(&self, user_id: &str) -> Option<(Camera, Option<Viewport>)> {
        self.peers.get(user_id).map(|p| (p.camera, p.viewport))
    }

    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<&PeerEntry> {
        self.peers.get(user_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerEntry> {
        self.peers.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Gate an outbound presence broadcast: picks the interval for the
    /// current activity, then applies the leading-edge throttle.
    pub fn should_broadcast(&mut self, now: Instant, drawing: bool) -> bool {
        let interval = if drawing { DRAWING_INTERVAL } else { IDLE_INTERVAL };
        self.throttle.set_interval(interval);
        self.throttle.allow(now)
    }

    /// Let the next broadcast through immediately (used when a new follower
    /// needs the camera right away).
    pub fn reset_throttle(&mut self) {
        self.throttle.reset();
    }
}
