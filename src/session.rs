//! Session: the explicit state struct wiring every component together.
//!
//! ARCHITECTURE
//! ============
//! One `Session` per participant per room. All collaborators — remote
//! store, event bus, binary asset store, clock — are injected as capability
//! traits at construction; there is no ambient global state. All work
//! happens in reaction to one of three inputs on a single event context:
//! a local engine callback, a store subscription delta, or a bus envelope.
//! `run` pumps the two receivers plus a scheduler tick; hosts embedding
//! their own loop can call `drain_events`/`tick` directly instead.
//!
//! Teardown drops subscriptions in the reverse of registration order.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::sync::Arc;
use std::time::Duration;

use canvas::doc::{self, Asset, AssetKind, DocumentSnapshot, User, UserMetadata, UserStatus};
use canvas::engine::{Engine, EngineStatus, PageDelta, ToolLock};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::assets::AssetStore;
use crate::bus::{BusEnvelope, BusMessage, EventBus};
use crate::camera;
use crate::config::RoomConfig;
use crate::error::SyncError;
use crate::follow::{FollowMachine, Outgoing};
use crate::pages::{DEFAULT_PAGE_ID, DEFAULT_PAGE_NAME, PageManager};
use crate::presence::{PresenceTracker, RosterRecord};
use crate::reconciler::{InboundOutcome, PageChannels, Reconciler};
use crate::sched::Clock;
use crate::store::{
    CURRENT_PAGE_KEY, NS_CONFIG, NS_PAGE, NS_USERS, RemoteStore, StoreDelta, StoreHandle,
    SubscriptionGuard,
};

/// Scheduler tick while `run` drives the session.
const TICK_INTERVAL_MS: u64 = 25;

/// Key under which remote config patches arrive in the `config` namespace.
const CONFIG_KEY: &str = "config";

// =============================================================================
// IDENTITY
// =============================================================================

/// Who this session is, as granted by the host identity API.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub user_id: String,
    pub user_name: String,
    pub room_id: String,
    /// Peer that granted this session, if any.
    pub enabled_by: Option<String>,
    /// Recording participants are hidden and config-followed to the host.
    pub recorder: bool,
    pub hidden: bool,
}

impl SessionIdentity {
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        room_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            room_id: room_id.into(),
            enabled_by: None,
            recorder: false,
            hidden: false,
        }
    }

    /// Load identity from `SYNCBOARD_*` environment variables, minting a
    /// fresh user id when none is provided.
    #[must_use]
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self {
            user_id: std::env::var("SYNCBOARD_USER_ID")
                .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),
            user_name: std::env::var("SYNCBOARD_USER_NAME").unwrap_or_else(|_| "Guest".to_owned()),
            room_id: std::env::var("SYNCBOARD_ROOM_ID").unwrap_or_else(|_| "room".to_owned()),
            enabled_by: std::env::var("SYNCBOARD_ENABLED_BY").ok().filter(|v| !v.is_empty()),
            recorder: crate::config::env_parse("SYNCBOARD_RECORDER", false),
            hidden: crate::config::env_parse("SYNCBOARD_HIDDEN", false),
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

pub struct Session {
    identity: SessionIdentity,
    config: RoomConfig,
    engine: Engine,
    remote: Arc<dyn RemoteStore>,
    bus: Arc<dyn EventBus>,
    asset_store: Arc<dyn AssetStore>,
    clock: Arc<dyn Clock>,

    users_store: Arc<dyn StoreHandle>,
    page_store: Arc<dyn StoreHandle>,
    channels: PageChannels,

    store_tx: mpsc::UnboundedSender<StoreDelta>,
    store_rx: mpsc::UnboundedReceiver<StoreDelta>,
    bus_rx: mpsc::UnboundedReceiver<BusEnvelope>,
    /// Page-triple guards; replaced wholesale on every page switch.
    page_guards: Vec<SubscriptionGuard>,
    /// Roster/page/config/bus guards; dropped last, in reverse order.
    base_guards: Vec<SubscriptionGuard>,

    reconciler: Reconciler,
    pages: PageManager,
    presence: PresenceTracker,
    follow: FollowMachine,

    color: String,
    cursor: [f64; 2],
    loading: bool,
    errors: Vec<SyncError>,
}

impl Session {
    /// Join a room: populate and load the shared document, seed the roster,
    /// announce the local user, and subscribe everything.
    ///
    /// # Errors
    ///
    /// Propagates store failures; individual malformed entities never fail
    /// the join.
    pub async fn connect(
        identity: SessionIdentity,
        config: RoomConfig,
        remote: Arc<dyn RemoteStore>,
        bus: Arc<dyn EventBus>,
        asset_store: Arc<dyn AssetStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SyncError> {
        let mut engine = Engine::new(DEFAULT_PAGE_ID, DEFAULT_PAGE_NAME);
        let mut pages = PageManager::new();
        let mut presence = PresenceTracker::new(identity.user_id.clone());

        for namespace in [NS_USERS, NS_PAGE, NS_CONFIG] {
            remote.populate(namespace).await?;
        }
        let users_store = remote.create(NS_USERS);
        let page_store = remote.create(NS_PAGE);
        let config_store = remote.create(NS_CONFIG);

        // Remote config overrides the host-provided one.
        let mut config = config;
        if let Some(patch) = config_store.get(CONFIG_KEY).await? {
            config.apply_patch(&patch);
        }

        pages.load_all(&mut engine, &remote, &page_store).await?;

        let roster = users_store.get_all().await?;
        let (loaded, skipped) = presence.load_roster(&roster);
        if skipped > 0 {
            warn!(skipped, "roster entries skipped at join");
        }
        engine.update_users(loaded.iter().map(|p| p.user.clone()).collect());

        let (store_tx, store_rx) = mpsc::unbounded_channel();
        let (bus_tx, bus_rx) = mpsc::unbounded_channel();
        let mut base_guards = vec![
            users_store.subscribe("*", store_tx.clone()),
            page_store.subscribe("*", store_tx.clone()),
            config_store.subscribe("*", store_tx.clone()),
        ];
        base_guards.push(bus.subscribe(&identity.user_id, bus_tx));

        let (channels, page_guards) =
            PageChannels::open(&remote, engine.current_page_id(), &store_tx).await?;

        let follow = FollowMachine::new(identity.user_id.clone());
        let mut session = Self {
            identity,
            config,
            engine,
            remote,
            bus,
            asset_store,
            clock,
            users_store,
            page_store,
            channels,
            store_tx,
            store_rx,
            bus_rx,
            page_guards,
            base_guards,
            reconciler: Reconciler::default(),
            pages,
            presence,
            follow,
            color: random_color(),
            cursor: [0.0, 0.0],
            loading: false,
            errors: Vec::new(),
        };

        // Announce ourselves: engine presence, persisted roster, bus.
        let user = session.self_user();
        session.engine.update_users(vec![user.clone()]);
        let record = RosterRecord { user: user.clone(), camera: session.engine.camera() };
        session
            .users_store
            .set(
                &session.identity.user_id,
                serde_json::to_value(&record)
                    .map_err(|e| SyncError::invalid_patch(NS_USERS, &session.identity.user_id, e))?,
            )
            .await?;
        let joined = BusMessage::UserJoined { user, camera: session.engine.camera() };
        session.bus.emit(joined.event(), joined.encode(), None).await?;

        let effects = session.follow.apply_config(session.config.follow.as_deref());
        session.send_outgoings(effects).await;

        session.engine.zoom_to_fit();
        info!(
            user = %session.identity.user_id,
            room = %session.identity.room_id,
            page = %session.engine.current_page_id(),
            "session connected"
        );
        Ok(session)
    }

    // --- Accessors ---

    #[must_use]
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    #[must_use]
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    #[must_use]
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    #[must_use]
    pub fn follow_state(&self) -> &FollowMachine {
        &self.follow
    }

    #[must_use]
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    #[must_use]
    pub fn page_history(&self) -> Vec<String> {
        self.pages.page_history()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Surfaced, non-fatal errors accumulated since the last call.
    pub fn take_errors(&mut self) -> Vec<SyncError> {
        std::mem::take(&mut self.errors)
    }

    fn self_user(&self) -> User {
        User {
            id: self.identity.user_id.clone(),
            point: self.cursor,
            color: self.color.clone(),
            status: UserStatus::Connected,
            metadata: UserMetadata {
                id: self.identity.user_id.clone(),
                name: self.identity.user_name.clone(),
            },
        }
    }

    // =========================================================================
    // EVENT PUMP
    // =========================================================================

    /// Drive the session until the bus closes. Hosts that own their own
    /// loop can instead call [`Session::drain_events`] and
    /// [`Session::tick`].
    pub async fn run(&mut self) {
        let mut ticker = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                maybe_delta = self.store_rx.recv() => {
                    match maybe_delta {
                        Some(delta) => self.handle_store_delta(delta).await,
                        None => break,
                    }
                }
                maybe_envelope = self.bus_rx.recv() => {
                    match maybe_envelope {
                        Some(envelope) => self.handle_bus_envelope(envelope).await,
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Process everything currently queued on the store and bus receivers.
    /// Returns how many events were handled.
    pub async fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let mut progressed = false;
            if let Ok(delta) = self.store_rx.try_recv() {
                self.handle_store_delta(delta).await;
                progressed = true;
            }
            if let Ok(envelope) = self.bus_rx.try_recv() {
                self.handle_bus_envelope(envelope).await;
                progressed = true;
            }
            if !progressed {
                return handled;
            }
            handled += 1;
        }
    }

    /// Scheduler tick: flush the outbound batch once its debounce window
    /// has elapsed.
    pub async fn tick(&mut self) {
        let now = self.clock.now();
        if let Some(batch) = self.reconciler.take_ready(now) {
            self.push_outbound(batch).await;
        }
    }

    /// Flush any pending outbound batch immediately.
    pub async fn flush_now(&mut self) {
        if let Some(batch) = self.reconciler.take_now() {
            self.push_outbound(batch).await;
        }
    }

    // =========================================================================
    // LOCAL CALLBACKS
    // =========================================================================

    /// The engine's settled local edit batch (the `onPageChange` callback).
    pub fn on_local_change(&mut self, delta: PageDelta) {
        self.reconciler.record_local(delta, self.clock.now());
    }

    /// The local cursor moved; broadcast presence if the throttle admits.
    pub async fn on_presence_change(&mut self, cursor: [f64; 2]) {
        self.cursor = cursor;
        let drawing = !self.engine.selection().is_empty()
            || self.engine.tool_lock() == ToolLock::Creating;
        if self.presence.should_broadcast(self.clock.now(), drawing) {
            self.emit_presence().await;
        }
    }

    async fn emit_presence(&mut self) {
        let message = BusMessage::UserPresence {
            user: self.self_user(),
            camera: self.engine.camera(),
            viewport: Some(self.engine.viewport()),
        };
        if let Err(e) = self.bus.emit(message.event(), message.encode(), None).await {
            self.errors.push(e.into());
        }
    }

    fn outbound_suppressed(&self) -> bool {
        self.config.is_read_only()
            || self.loading
            || self.engine.status() == EngineStatus::Loading
            || self.config.follow.is_some()
    }

    async fn push_outbound(&mut self, batch: PageDelta) {
        if self.outbound_suppressed() {
            debug!("outbound batch dropped (read-only, loading, or forced follow)");
            return;
        }
        let errors = self
            .reconciler
            .push_batch(&mut self.engine, &self.channels, &self.asset_store, batch)
            .await;
        self.errors.extend(errors);
    }

    // =========================================================================
    // STORE DELTAS
    // =========================================================================

    /// Route one store mutation to the component that owns its namespace.
    pub async fn handle_store_delta(&mut self, delta: StoreDelta) {
        match delta.namespace.as_str() {
            NS_USERS => self.handle_roster_delta(&delta),
            NS_PAGE => self.handle_page_delta(&delta).await,
            NS_CONFIG => {
                if let Some(patch) = &delta.value {
                    self.config.apply_patch(patch);
                    let effects = self.follow.apply_config(self.config.follow.as_deref());
                    self.send_outgoings(effects).await;
                }
            }
            _ => {
                let outcome = self.reconciler.on_remote_mutation(&mut self.engine, &delta);
                if matches!(outcome, InboundOutcome::Applied | InboundOutcome::Removed) {
                    self.after_remote_mutation();
                }
            }
        }
    }

    fn handle_roster_delta(&mut self, delta: &StoreDelta) {
        match &delta.value {
            Some(value) => {
                let record: RosterRecord = match serde_json::from_value(value.clone()) {
                    Ok(record) => record,
                    Err(e) => {
                        self.errors.push(SyncError::UserLoadFailure(e.to_string()));
                        return;
                    }
                };
                if record.user.id == self.identity.user_id {
                    return;
                }
                self.engine.update_users(vec![record.user.clone()]);
                if let Err(e) = self.presence.upsert(record.user, record.camera, None) {
                    self.errors.push(e);
                }
            }
            None => {
                self.engine.remove_user(&delta.key);
                self.presence.remove(&delta.key);
            }
        }
    }

    async fn handle_page_delta(&mut self, delta: &StoreDelta) {
        if delta.key == CURRENT_PAGE_KEY {
            let Some(target) = delta.value.as_ref().and_then(|v| v.as_str()) else {
                return;
            };
            // Prefer the remote pointer unless the local document is
            // mid-load.
            if self.loading || target == self.engine.current_page_id() {
                return;
            }
            let target = target.to_owned();
            if let Err(e) = self.adopt_remote_page(&target).await {
                self.errors.push(e);
            }
            return;
        }

        match &delta.value {
            Some(value) => {
                let name = value.as_str().unwrap_or(&delta.key).to_owned();
                self.engine.create_page(&delta.key, &name);
                self.pages.observe_name(&name);
            }
            None => {
                if self.engine.delete_page(&delta.key).is_err() {
                    debug!(page = %delta.key, "remote page delete not applicable locally");
                }
            }
        }
    }

    async fn adopt_remote_page(&mut self, page_id: &str) -> Result<(), SyncError> {
        if self.engine.get_page(page_id).is_none() {
            // Name may not have arrived yet; the id stands in until it does.
            self.engine.create_page(page_id, page_id);
        }
        self.engine.change_page(page_id)?;
        self.reopen_channels().await?;
        info!(page_id, "adopted remote page pointer");
        Ok(())
    }

    fn after_remote_mutation(&mut self) {
        camera::auto_fit(&mut self.engine, &self.config, self.follow.is_following());
        if !self.config.infinite_canvas {
            camera::limit_canvas(&mut self.engine);
        }
    }

    // =========================================================================
    // BUS MESSAGES
    // =========================================================================

    /// Decode and dispatch one bus envelope.
    pub async fn handle_bus_envelope(&mut self, envelope: BusEnvelope) {
        match BusMessage::decode(&envelope) {
            Ok(Some(message)) => self.handle_bus_message(message).await,
            Ok(None) => {}
            Err(e) => self.errors.push(e),
        }
    }

    async fn handle_bus_message(&mut self, message: BusMessage) {
        match message {
            BusMessage::UserJoined { user, camera } => {
                if user.id == self.identity.user_id {
                    return;
                }
                self.engine.update_users(vec![user.clone()]);
                if let Err(e) = self.presence.upsert(user, camera, None) {
                    self.errors.push(e);
                }
                // A config-forced followee may have just arrived.
                let effects = self.follow.apply_config(self.config.follow.as_deref());
                self.send_outgoings(effects).await;
            }
            BusMessage::UserPresence { user, camera, viewport } => {
                if user.id == self.identity.user_id {
                    return;
                }
                let user_id = user.id.clone();
                self.engine.update_users(vec![user.clone()]);
                if let Err(e) = self.presence.upsert(user, camera, viewport) {
                    self.errors.push(e);
                    return;
                }
                // Use the tracker's entry so a broadcast without a viewport
                // still corrects against the last-known one.
                let stored_viewport = self.presence.camera_of(&user_id).and_then(|(_, vp)| vp);
                let applied = camera::apply_remote_camera(
                    &mut self.engine,
                    &self.follow,
                    &user_id,
                    &camera,
                    stored_viewport.as_ref(),
                );
                if applied && !self.config.infinite_canvas {
                    camera::limit_canvas(&mut self.engine);
                }
            }
            BusMessage::PeerLeft { id } => self.handle_peer_left(&id).await,
            BusMessage::FollowRequest { from } => {
                let effects = self.follow.on_follow_request(&from);
                self.send_outgoings(effects).await;
                // The new follower needs our camera right away.
                self.presence.reset_throttle();
                self.emit_presence().await;
            }
            BusMessage::FollowResponse { follow_ids } => {
                let effects = self.follow.on_follow_response(&follow_ids);
                self.send_outgoings(effects).await;
                self.apply_followee_camera();
            }
            BusMessage::Unfollow { from } => self.follow.on_unfollow(&from),
            BusMessage::RemoteUnfollow { unfollow } => {
                let effects = self.follow.on_remote_unfollow(&unfollow);
                self.send_outgoings(effects).await;
            }
            BusMessage::ConfigFollow { from } => {
                let effects = self.follow.on_config_follow(&from);
                self.send_outgoings(effects).await;
                self.presence.reset_throttle();
                self.emit_presence().await;
            }
            BusMessage::ConfigUpdate { patch } => {
                self.config.apply_patch(&patch);
                let effects = self.follow.apply_config(self.config.follow.as_deref());
                self.send_outgoings(effects).await;
            }
            BusMessage::BoardLoad { origin, document } => {
                self.handle_board_load(origin, document).await;
            }
            BusMessage::SummaryRequest => {
                let reply = BusMessage::SummaryReply {
                    document: snapshot_value(&self.engine.snapshot()),
                    page_history: self.pages.page_history(),
                };
                if let Err(e) = self.bus.emit(reply.event(), reply.encode(), None).await {
                    self.errors.push(e.into());
                }
            }
            BusMessage::SetPage { page_id } => {
                if let Err(e) = self.switch_page(&page_id).await {
                    self.errors.push(e);
                }
            }
            BusMessage::AddPage { name } => {
                let result = match name {
                    Some(name) => {
                        let id = doc::new_id();
                        self.pages
                            .switch_page(&mut self.engine, &self.page_store, &id, Some(&name))
                            .await
                            .map(|()| id)
                    }
                    None => self.pages.add_page(&mut self.engine, &self.page_store).await,
                };
                match result {
                    Ok(_) => {
                        if let Err(e) = self.reopen_channels().await {
                            self.errors.push(e);
                        }
                    }
                    Err(e) => self.errors.push(e),
                }
            }
            // Host-bound notifications; nothing to do on a peer.
            BusMessage::SummaryReply { .. } | BusMessage::BoardSaved { .. } => {}
        }
    }

    async fn handle_peer_left(&mut self, id: &str) {
        if let Some(entry) = self.presence.remove(id) {
            self.engine.remove_user(&entry.user.id);
        } else {
            self.engine.remove_user(id);
        }
        self.follow.on_peer_left(id);
        // Any peer may clear the departed roster entry; deletes are
        // idempotent under LWW.
        if let Err(e) = self.users_store.delete(id).await {
            self.errors.push(e.into());
        }
        info!(peer = id, "peer left");
    }

    fn apply_followee_camera(&mut self) {
        let Some(followee) = self.follow.followee() else {
            return;
        };
        let Some((camera, viewport)) = self.presence.camera_of(followee) else {
            return;
        };
        let followee = followee.to_owned();
        camera::apply_remote_camera(
            &mut self.engine,
            &self.follow,
            &followee,
            &camera,
            viewport.as_ref(),
        );
    }

    async fn handle_board_load(&mut self, origin: Option<String>, document: serde_json::Value) {
        if origin.as_deref() == Some(self.identity.user_id.as_str()) {
            return;
        }
        let snapshot: DocumentSnapshot = match serde_json::from_value(document.clone()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.errors.push(SyncError::invalid_patch("bus", "board:load", e));
                return;
            }
        };

        self.loading = true;
        if let Err(e) = self.engine.load_snapshot(snapshot) {
            self.errors.push(e.into());
            self.loading = false;
            return;
        }
        if let Err(e) = self.reopen_channels().await {
            self.errors.push(e);
        }
        // A host-initiated load fans out to the other peers from here.
        if origin.is_none() {
            let message = BusMessage::BoardLoad {
                origin: Some(self.identity.user_id.clone()),
                document,
            };
            if let Err(e) = self.bus.emit(message.event(), message.encode(), None).await {
                self.errors.push(e.into());
            }
        }
        self.loading = false;
        info!("document replaced from host load");
    }

    // =========================================================================
    // FOLLOW API
    // =========================================================================

    /// Manually follow a peer.
    ///
    /// # Errors
    ///
    /// Returns `FollowCycleRejected` when the target already follows the
    /// local user. A no-op while a config-forced follow is active.
    pub async fn follow(&mut self, target: &str) -> Result<(), SyncError> {
        if self.config.follow.is_some() {
            debug!(peer = target, "manual follow ignored while config follow is active");
            return Ok(());
        }
        let effects = self.follow.follow(target)?;
        self.send_outgoings(effects).await;
        Ok(())
    }

    /// Stop following and propagate the break to our own followers.
    pub async fn unfollow(&mut self) {
        let effects = self.follow.unfollow();
        self.send_outgoings(effects).await;
    }

    async fn send_outgoings(&mut self, outgoings: Vec<Outgoing>) {
        for outgoing in outgoings {
            let result = self
                .bus
                .emit(
                    outgoing.message.event(),
                    outgoing.message.encode(),
                    outgoing.to.as_deref(),
                )
                .await;
            if let Err(e) = result {
                self.errors.push(e.into());
            }
        }
    }

    // =========================================================================
    // PAGE API
    // =========================================================================

    /// Switch to a page, creating it if needed, and resubscribe the
    /// namespace triple.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn switch_page(&mut self, page_id: &str) -> Result<(), SyncError> {
        self.pages
            .switch_page(&mut self.engine, &self.page_store, page_id, None)
            .await?;
        self.reopen_channels().await
    }

    /// Allocate and switch to a fresh page. Returns its id.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn add_page(&mut self) -> Result<String, SyncError> {
        let id = self.pages.add_page(&mut self.engine, &self.page_store).await?;
        self.reopen_channels().await?;
        Ok(id)
    }

    /// Delete a page everywhere. The last remaining page is refused.
    ///
    /// # Errors
    ///
    /// Returns the engine's `LastPage` error or store failures.
    pub async fn delete_page(&mut self, page_id: &str) -> Result<(), SyncError> {
        self.pages
            .delete_page(&mut self.engine, &self.page_store, page_id)
            .await?;
        self.reopen_channels().await
    }

    async fn reopen_channels(&mut self) -> Result<(), SyncError> {
        let page_id = self.engine.current_page_id().to_owned();
        if self.channels.page_id == page_id {
            return Ok(());
        }
        // Detach the old triple before attaching the new, newest first.
        while let Some(guard) = self.page_guards.pop() {
            guard.unsubscribe();
        }
        let (channels, guards) = PageChannels::open(&self.remote, &page_id, &self.store_tx).await?;
        self.channels = channels;
        self.page_guards = guards;
        Ok(())
    }

    // =========================================================================
    // BOARD OPS
    // =========================================================================

    /// Upload a binary and mint its asset record. The host turns the
    /// returned record into a shape through a normal edit batch.
    ///
    /// # Errors
    ///
    /// Returns `UploadFailure` on I/O errors; nothing is rolled back.
    pub async fn create_asset(
        &mut self,
        file_name: &str,
        size: [f64; 2],
        bytes: Vec<u8>,
    ) -> Result<Asset, SyncError> {
        let url = self.asset_store.upload(file_name, bytes).await?;
        Ok(Asset {
            id: doc::new_id(),
            kind: AssetKind::Image,
            size,
            point: None,
            url,
            file_name: Some(file_name.to_owned()),
        })
    }

    /// Export the document snapshot to the binary store and notify the
    /// host. Refuses an empty board.
    ///
    /// # Errors
    ///
    /// Returns `EmptyBoard` or `UploadFailure`; the host is notified either
    /// way via `board:saved`.
    pub async fn save_board(&mut self) -> Result<String, SyncError> {
        if self.engine.doc().is_empty() {
            let notice = BusMessage::BoardSaved {
                url: None,
                message: "Cannot save an empty board.".to_owned(),
                status: 400,
            };
            let _ = self.bus.emit(notice.event(), notice.encode(), None).await;
            return Err(SyncError::EmptyBoard);
        }

        let snapshot = snapshot_value(&self.engine.snapshot());
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| SyncError::UploadFailure(e.to_string()))?;
        let file_name = format!("whiteboard-{}", self.identity.room_id);

        match self.asset_store.upload(&file_name, bytes).await {
            Ok(url) => {
                let notice = BusMessage::BoardSaved {
                    url: Some(url.clone()),
                    message: "Board saved successfully.".to_owned(),
                    status: 200,
                };
                if let Err(e) = self.bus.emit(notice.event(), notice.encode(), None).await {
                    self.errors.push(e.into());
                }
                info!(file_name, "board exported");
                Ok(url)
            }
            Err(e) => {
                let notice = BusMessage::BoardSaved {
                    url: None,
                    message: "Error while saving board.".to_owned(),
                    status: 500,
                };
                let _ = self.bus.emit(notice.event(), notice.encode(), None).await;
                Err(e)
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Reverse of registration: the page triple first, then the base
        // subscriptions, newest first.
        while let Some(guard) = self.page_guards.pop() {
            guard.unsubscribe();
        }
        while let Some(guard) = self.base_guards.pop() {
            guard.unsubscribe();
        }
    }
}

fn snapshot_value(snapshot: &DocumentSnapshot) -> serde_json::Value {
    serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null)
}

fn random_color() -> String {
    let value: u32 = rand::rng().random_range(0..0x00FF_FFFF);
    format!("#{value:06x}")
}
