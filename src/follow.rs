//! Follow/unfollow state machine.
//!
//! DESIGN
//! ======
//! Per peer pair the relation runs `none → requested → established →
//! (unfollowed | peer-left)`. `following` is an ordered list, not a single
//! id: a follow response chains the responder's own upstream targets so
//! "follow the follower of the leader" propagates the whole chain in one
//! hop. The last entry of the list is the camera followee.
//!
//! The machine is pure: every transition returns the messages to emit
//! instead of touching the bus, so state and protocol are testable without
//! any transport.

#[cfg(test)]
#[path = "follow_test.rs"]
mod follow_test;

use std::collections::HashSet;

use tracing::debug;

use crate::bus::BusMessage;
use crate::error::SyncError;

/// A message addressed to specific peers (or broadcast when `to` is `None`).
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub message: BusMessage,
    pub to: Option<Vec<String>>,
}

impl Outgoing {
    fn to_one(message: BusMessage, target: impl Into<String>) -> Self {
        Self { message, to: Some(vec![target.into()]) }
    }

    fn to_many(message: BusMessage, targets: Vec<String>) -> Self {
        Self { message, to: Some(targets) }
    }
}

/// Follow state for the local user.
#[derive(Debug)]
pub struct FollowMachine {
    self_id: String,
    /// Ordered chain of peers the local user tracks; the last entry drives
    /// the camera.
    following: Vec<String>,
    /// Peers tracking the local user.
    followers: HashSet<String>,
}

impl FollowMachine {
    #[must_use]
    pub fn new(self_id: impl Into<String>) -> Self {
        Self { self_id: self_id.into(), following: Vec::new(), followers: HashSet::new() }
    }

    // --- Queries ---

    #[must_use]
    pub fn following(&self) -> &[String] {
        &self.following
    }

    #[must_use]
    pub fn followers(&self) -> &HashSet<String> {
        &self.followers
    }

    #[must_use]
    pub fn is_following(&self) -> bool {
        !self.following.is_empty()
    }

    /// The peer whose camera the local user applies.
    #[must_use]
    pub fn followee(&self) -> Option<&str> {
        self.following.last().map(String::as_str)
    }

    // --- Manual follow ---

    /// Start following a peer.
    ///
    /// # Errors
    ///
    /// Returns `FollowCycleRejected` when the target is already following
    /// the local user; neither roster changes.
    pub fn follow(&mut self, target: &str) -> Result<Vec<Outgoing>, SyncError> {
        if self.followers.contains(target) {
            return Err(SyncError::FollowCycleRejected(target.to_owned()));
        }
        Ok(vec![Outgoing::to_one(
            BusMessage::FollowRequest { from: self.self_id.clone() },
            target,
        )])
    }

    /// A peer asked to follow the local user: register it and reply with
    /// the local user's whole upstream chain.
    pub fn on_follow_request(&mut self, from: &str) -> Vec<Outgoing> {
        self.followers.insert(from.to_owned());
        let mut follow_ids = vec![self.self_id.clone()];
        follow_ids.extend(self.following.iter().cloned());
        vec![Outgoing::to_one(BusMessage::FollowResponse { follow_ids }, from)]
    }

    /// A follow response arrived: extend the chain with any new ids and
    /// relay the same response to the local user's own followers. The relay
    /// stops once nothing new is appended, which bounds propagation to the
    /// chain depth.
    pub fn on_follow_response(&mut self, follow_ids: &[String]) -> Vec<Outgoing> {
        let mut appended = false;
        for id in follow_ids {
            if *id == self.self_id || self.following.contains(id) {
                continue;
            }
            self.following.push(id.clone());
            appended = true;
        }
        if !appended || self.followers.is_empty() {
            return Vec::new();
        }
        vec![Outgoing::to_many(
            BusMessage::FollowResponse { follow_ids: follow_ids.to_vec() },
            self.followers.iter().cloned().collect(),
        )]
    }

    // --- Unfollow ---

    /// Stop following. Notifies the camera followee and tells the local
    /// user's own followers to drop that id from their chains.
    pub fn unfollow(&mut self) -> Vec<Outgoing> {
        let Some(target) = self.following.last().cloned() else {
            return Vec::new();
        };
        let mut out = vec![Outgoing::to_one(
            BusMessage::Unfollow { from: self.self_id.clone() },
            target.clone(),
        )];
        if !self.followers.is_empty() {
            out.push(Outgoing::to_many(
                BusMessage::RemoteUnfollow { unfollow: target },
                self.followers.iter().cloned().collect(),
            ));
        }
        self.following.clear();
        out
    }

    /// A follower stopped following the local user.
    pub fn on_unfollow(&mut self, from: &str) {
        self.followers.remove(from);
    }

    /// A peer upstream in the chain broke its link: drop that id from the
    /// local chain and notify the remaining targets that the local user's
    /// relation to them is dissolving too.
    pub fn on_remote_unfollow(&mut self, unfollow: &str) -> Vec<Outgoing> {
        let before = self.following.len();
        self.following.retain(|id| id != unfollow);
        if self.following.len() == before {
            return Vec::new();
        }
        self.following
            .iter()
            .map(|id| {
                Outgoing::to_one(BusMessage::Unfollow { from: self.self_id.clone() }, id.clone())
            })
            .collect()
    }

    // --- Config-forced follow ---

    /// Apply a config-forced followee. Bypasses the request/response
    /// handshake: the chain becomes exactly the configured target, and the
    /// registration still flows through the follower-notification path so
    /// the leader's followers set stays accurate. No-op when already
    /// following the target or when the target is the local user.
    pub fn apply_config(&mut self, follow: Option<&str>) -> Vec<Outgoing> {
        let Some(target) = follow else {
            return Vec::new();
        };
        if target == self.self_id || self.followee() == Some(target) {
            return Vec::new();
        }
        debug!(followee = target, "config-forced follow");
        self.following = vec![target.to_owned()];
        vec![Outgoing::to_one(
            BusMessage::ConfigFollow { from: self.self_id.clone() },
            target,
        )]
    }

    /// A config-forced follower registered with the local user. Same shape
    /// as a manual request: record the follower, reply with the chain.
    pub fn on_config_follow(&mut self, from: &str) -> Vec<Outgoing> {
        self.on_follow_request(from)
    }

    // --- Departures ---

    /// A peer disconnected: forget it on both sides of the relation.
    pub fn on_peer_left(&mut self, id: &str) {
        self.followers.remove(id);
        self.following.retain(|f| f != id);
    }
}
