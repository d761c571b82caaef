//! Presence/event bus boundary: typed messages over a broadcast channel.
//!
//! ARCHITECTURE
//! ============
//! Presence, camera, and follow traffic flows over a low-latency broadcast
//! channel, never through the persisted store. Events are named with the
//! `prefix:action` convention and carry JSON payloads; this module decodes
//! them into the typed [`BusMessage`] union at the boundary so the rest of
//! the core never touches raw payloads. Unknown events are ignored with a
//! debug log — hosts are free to ship events this core does not consume.

#[cfg(test)]
#[path = "bus_test.rs"]
mod bus_test;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use canvas::camera::{Camera, Viewport};
use canvas::doc::User;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ErrorCode, SyncError};
use crate::store::SubscriptionGuard;

// =============================================================================
// EVENT NAMES
// =============================================================================

pub const EVENT_USER_JOINED: &str = "user:joined";
pub const EVENT_USER_PRESENCE: &str = "user:presence";
pub const EVENT_PEER_LEFT: &str = "peer:left";
pub const EVENT_FOLLOW_REQUEST: &str = "follow:request";
pub const EVENT_FOLLOW_RESPONSE: &str = "follow:response";
pub const EVENT_UNFOLLOW: &str = "follow:unfollow";
pub const EVENT_REMOTE_UNFOLLOW: &str = "follow:remote-unfollow";
pub const EVENT_CONFIG_FOLLOW: &str = "follow:config";
pub const EVENT_CONFIG_UPDATE: &str = "config:update";
pub const EVENT_BOARD_LOAD: &str = "board:load";
pub const EVENT_BOARD_SUMMARY: &str = "board:summary";
pub const EVENT_BOARD_SUMMARY_REPLY: &str = "board:summary-reply";
pub const EVENT_BOARD_SAVED: &str = "board:saved";
pub const EVENT_PAGE_SET: &str = "page:set";
pub const EVENT_PAGE_ADD: &str = "page:add";

// =============================================================================
// ENVELOPE AND ERRORS
// =============================================================================

/// One event as delivered by the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEnvelope {
    pub event: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus backend: {0}")]
    Backend(String),
}

impl ErrorCode for BusError {
    fn error_code(&self) -> &'static str {
        "E_BUS"
    }

    fn retryable(&self) -> bool {
        true
    }
}

// =============================================================================
// CAPABILITY TRAIT
// =============================================================================

/// The host's broadcast/unicast event channel.
#[async_trait::async_trait]
pub trait EventBus: Send + Sync {
    /// Emit an event. `to` restricts delivery to the named peers; `None`
    /// broadcasts to every peer in the room.
    async fn emit(
        &self,
        event: &str,
        payload: serde_json::Value,
        to: Option<&[String]>,
    ) -> Result<(), BusError>;

    /// Register this peer's inbox.
    fn subscribe(
        &self,
        peer_id: &str,
        sink: mpsc::UnboundedSender<BusEnvelope>,
    ) -> SubscriptionGuard;
}

// =============================================================================
// TYPED MESSAGES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserCameraPayload {
    user: User,
    camera: Camera,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<Viewport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdPayload {
    id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FromPayload {
    from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FollowResponsePayload {
    follow_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnfollowPayload {
    unfollow: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigUpdatePayload {
    data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BoardLoadPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin: Option<String>,
    document: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryReplyPayload {
    document: serde_json::Value,
    page_history: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BoardSavedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    message: String,
    status: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageSetPayload {
    page_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PageAddPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

/// Every event this core consumes or emits, decoded from the wire.
#[derive(Debug, Clone)]
pub enum BusMessage {
    UserJoined { user: User, camera: Camera },
    UserPresence { user: User, camera: Camera, viewport: Option<Viewport> },
    PeerLeft { id: String },
    FollowRequest { from: String },
    FollowResponse { follow_ids: Vec<String> },
    Unfollow { from: String },
    RemoteUnfollow { unfollow: String },
    ConfigFollow { from: String },
    ConfigUpdate { patch: serde_json::Value },
    BoardLoad { origin: Option<String>, document: serde_json::Value },
    SummaryRequest,
    SummaryReply { document: serde_json::Value, page_history: Vec<String> },
    BoardSaved { url: Option<String>, message: String, status: u16 },
    SetPage { page_id: String },
    AddPage { name: Option<String> },
}

impl BusMessage {
    /// Wire event name for this message.
    #[must_use]
    pub fn event(&self) -> &'static str {
        match self {
            Self::UserJoined { .. } => EVENT_USER_JOINED,
            Self::UserPresence { .. } => EVENT_USER_PRESENCE,
            Self::PeerLeft { .. } => EVENT_PEER_LEFT,
            Self::FollowRequest { .. } => EVENT_FOLLOW_REQUEST,
            Self::FollowResponse { .. } => EVENT_FOLLOW_RESPONSE,
            Self::Unfollow { .. } => EVENT_UNFOLLOW,
            Self::RemoteUnfollow { .. } => EVENT_REMOTE_UNFOLLOW,
            Self::ConfigFollow { .. } => EVENT_CONFIG_FOLLOW,
            Self::ConfigUpdate { .. } => EVENT_CONFIG_UPDATE,
            Self::BoardLoad { .. } => EVENT_BOARD_LOAD,
            Self::SummaryRequest => EVENT_BOARD_SUMMARY,
            Self::SummaryReply { .. } => EVENT_BOARD_SUMMARY_REPLY,
            Self::BoardSaved { .. } => EVENT_BOARD_SAVED,
            Self::SetPage { .. } => EVENT_PAGE_SET,
            Self::AddPage { .. } => EVENT_PAGE_ADD,
        }
    }

    /// Encode into a wire payload.
    ///
    /// # Panics
    ///
    /// Never panics: all payload types serialize infallibly.
    #[must_use]
    pub fn encode(&self) -> serde_json::Value {
        let encoded = match self.clone() {
            Self::UserJoined { user, camera } => {
                serde_json::to_value(UserCameraPayload { user, camera, size: None })
            }
            Self::UserPresence { user, camera, viewport } => {
                serde_json::to_value(UserCameraPayload { user, camera, size: viewport })
            }
            Self::PeerLeft { id } => serde_json::to_value(IdPayload { id }),
            Self::FollowRequest { from } | Self::ConfigFollow { from } | Self::Unfollow { from } => {
                serde_json::to_value(FromPayload { from })
            }
            Self::FollowResponse { follow_ids } => {
                serde_json::to_value(FollowResponsePayload { follow_ids })
            }
            Self::RemoteUnfollow { unfollow } => serde_json::to_value(UnfollowPayload { unfollow }),
            Self::ConfigUpdate { patch } => serde_json::to_value(ConfigUpdatePayload { data: patch }),
            Self::BoardLoad { origin, document } => {
                serde_json::to_value(BoardLoadPayload { origin, document })
            }
            Self::SummaryRequest => Ok(serde_json::json!({})),
            Self::SummaryReply { document, page_history } => {
                serde_json::to_value(SummaryReplyPayload { document, page_history })
            }
            Self::BoardSaved { url, message, status } => {
                serde_json::to_value(BoardSavedPayload { url, message, status })
            }
            Self::SetPage { page_id } => serde_json::to_value(PageSetPayload { page_id }),
            Self::AddPage { name } => serde_json::to_value(PageAddPayload { name }),
        };
        encoded.expect("bus payloads serialize infallibly")
    }

    /// Decode an envelope. `Ok(None)` for events this core does not consume.
    ///
    /// # Errors
    ///
    /// Returns `UserLoadFailure` for malformed presence payloads and
    /// `InvalidPatch` for other malformed known events.
    pub fn decode(envelope: &BusEnvelope) -> Result<Option<Self>, SyncError> {
        fn parse<T: serde::de::DeserializeOwned>(
            envelope: &BusEnvelope,
        ) -> Result<T, SyncError> {
            serde_json::from_value(envelope.payload.clone())
                .map_err(|e| SyncError::invalid_patch("bus", &envelope.event, e))
        }

        let message = match envelope.event.as_str() {
            EVENT_USER_JOINED => {
                let p: UserCameraPayload = parse(envelope)
                    .map_err(|e| SyncError::UserLoadFailure(e.to_string()))?;
                Self::UserJoined { user: p.user, camera: p.camera }
            }
            EVENT_USER_PRESENCE => {
                let p: UserCameraPayload = parse(envelope)
                    .map_err(|e| SyncError::UserLoadFailure(e.to_string()))?;
                Self::UserPresence { user: p.user, camera: p.camera, viewport: p.size }
            }
            EVENT_PEER_LEFT => {
                let p: IdPayload = parse(envelope)?;
                Self::PeerLeft { id: p.id }
            }
            EVENT_FOLLOW_REQUEST => {
                let p: FromPayload = parse(envelope)?;
                Self::FollowRequest { from: p.from }
            }
            EVENT_FOLLOW_RESPONSE => {
                let p: FollowResponsePayload = parse(envelope)?;
                Self::FollowResponse { follow_ids: p.follow_ids }
            }
            EVENT_UNFOLLOW => {
                let p: FromPayload = parse(envelope)?;
                Self::Unfollow { from: p.from }
            }
            EVENT_REMOTE_UNFOLLOW => {
                let p: UnfollowPayload = parse(envelope)?;
                Self::RemoteUnfollow { unfollow: p.unfollow }
            }
            EVENT_CONFIG_FOLLOW => {
                let p: FromPayload = parse(envelope)?;
                Self::ConfigFollow { from: p.from }
            }
            EVENT_CONFIG_UPDATE => {
                let p: ConfigUpdatePayload = parse(envelope)?;
                Self::ConfigUpdate { patch: p.data }
            }
            EVENT_BOARD_LOAD => {
                let p: BoardLoadPayload = parse(envelope)?;
                Self::BoardLoad { origin: p.origin, document: p.document }
            }
            EVENT_BOARD_SUMMARY => Self::SummaryRequest,
            EVENT_BOARD_SUMMARY_REPLY => {
                let p: SummaryReplyPayload = parse(envelope)?;
                Self::SummaryReply { document: p.document, page_history: p.page_history }
            }
            EVENT_BOARD_SAVED => {
                let p: BoardSavedPayload = parse(envelope)?;
                Self::BoardSaved { url: p.url, message: p.message, status: p.status }
            }
            EVENT_PAGE_SET => {
                let p: PageSetPayload = parse(envelope)?;
                Self::SetPage { page_id: p.page_id }
            }
            EVENT_PAGE_ADD => {
                let p: PageAddPayload = parse(envelope)?;
                Self::AddPage { name: p.name }
            }
            other => {
                debug!(event = other, "ignoring unknown bus event");
                return Ok(None);
            }
        };
        Ok(Some(message))
    }
}

// =============================================================================
// IN-PROCESS BUS
// =============================================================================

struct BusInner {
    inboxes: HashMap<String, Vec<(u64, mpsc::UnboundedSender<BusEnvelope>)>>,
    next_id: u64,
}

/// In-process reference bus honoring unicast targets. All sessions in a
/// test (or an offline room) share one instance.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Mutex<BusInner>>,
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner { inboxes: HashMap::new(), next_id: 0 })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        self.inner.lock().expect("bus lock poisoned")
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EventBus for MemoryBus {
    async fn emit(
        &self,
        event: &str,
        payload: serde_json::Value,
        to: Option<&[String]>,
    ) -> Result<(), BusError> {
        let envelope = BusEnvelope { event: event.to_owned(), payload };
        let mut inner = self.lock();
        match to {
            Some(targets) => {
                for target in targets {
                    if let Some(sinks) = inner.inboxes.get_mut(target) {
                        sinks.retain(|(_, sink)| sink.send(envelope.clone()).is_ok());
                    }
                }
            }
            None => {
                for sinks in inner.inboxes.values_mut() {
                    sinks.retain(|(_, sink)| sink.send(envelope.clone()).is_ok());
                }
            }
        }
        Ok(())
    }

    fn subscribe(
        &self,
        peer_id: &str,
        sink: mpsc::UnboundedSender<BusEnvelope>,
    ) -> SubscriptionGuard {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.inboxes.entry(peer_id.to_owned()).or_default().push((id, sink));
            id
        };

        let bus = self.clone();
        let peer_id = peer_id.to_owned();
        SubscriptionGuard::new(move || {
            let mut inner = bus.lock();
            if let Some(sinks) = inner.inboxes.get_mut(&peer_id) {
                sinks.retain(|(sink_id, _)| *sink_id != id);
                if sinks.is_empty() {
                    inner.inboxes.remove(&peer_id);
                }
            }
        })
    }
}
