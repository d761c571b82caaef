//! Store reconciler: bidirectional sync between the document engine and the
//! remote per-page namespaces.
//!
//! DESIGN
//! ======
//! Outbound, settled local edit batches are coalesced per id inside a
//! trailing-edge debounce window and pushed as bulk writes. Asset-derived
//! shapes never enter the shape namespace — they travel as asset records
//! carrying the rendering shape's position. Every outbound value is
//! remembered per (namespace, key) so the store's fan-out of our own write
//! (self-echo) is recognized by equality and consumed without touching the
//! document.
//!
//! Inbound, every mutation is applied individually and guarded: a malformed
//! payload, a patch the engine rejects, or a delete of an already-absent
//! entity is logged and skipped without aborting the rest of the batch. A
//! write tagged for another page is dropped silently — expected during
//! concurrent multi-page editing, not an error. A shape referencing an
//! asset that has not arrived yet is parked in the asset archive and
//! materialized when the asset record lands.

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod reconciler_test;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use canvas::doc::{Asset, Binding, Shape};
use canvas::engine::{Engine, PageDelta};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::assets::{self, AssetArchive, AssetStore};
use crate::error::SyncError;
use crate::sched::Debounce;
use crate::store::{
    self, NamespaceKind, RemoteStore, StoreDelta, StoreEntry, StoreHandle, SubscriptionGuard,
    page_namespace, split_page_namespace,
};

/// Default debounce window for outbound document diffs, in milliseconds.
pub const FLUSH_DEBOUNCE_MS: u64 = 250;

// =============================================================================
// PAGE CHANNELS
// =============================================================================

/// Open handles onto the active page's namespace triple.
pub struct PageChannels {
    pub page_id: String,
    pub shapes: Arc<dyn StoreHandle>,
    pub bindings: Arc<dyn StoreHandle>,
    pub assets: Arc<dyn StoreHandle>,
}

impl PageChannels {
    /// Populate, open, and subscribe the three namespaces of a page. The
    /// returned guards keep the subscriptions alive; dropping them (in
    /// reverse order) detaches.
    ///
    /// # Errors
    ///
    /// Propagates store failures from `populate`.
    pub async fn open(
        remote: &Arc<dyn RemoteStore>,
        page_id: &str,
        sink: &mpsc::UnboundedSender<StoreDelta>,
    ) -> Result<(Self, Vec<SubscriptionGuard>), SyncError> {
        let shapes_ns = page_namespace(page_id, NamespaceKind::Shapes);
        let bindings_ns = page_namespace(page_id, NamespaceKind::Bindings);
        let assets_ns = page_namespace(page_id, NamespaceKind::Assets);
        remote.populate(&shapes_ns).await?;
        remote.populate(&bindings_ns).await?;
        remote.populate(&assets_ns).await?;

        let shapes = remote.create(&shapes_ns);
        let bindings = remote.create(&bindings_ns);
        let assets = remote.create(&assets_ns);
        let guards = vec![
            shapes.subscribe("*", sink.clone()),
            bindings.subscribe("*", sink.clone()),
            assets.subscribe("*", sink.clone()),
        ];

        Ok((
            Self { page_id: page_id.to_owned(), shapes, bindings, assets },
            guards,
        ))
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// What happened to one inbound mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Entity created or patched into the document.
    Applied,
    /// Entity removed from the document.
    Removed,
    /// Echo of this peer's own write; consumed silently.
    SelfEcho,
    /// Write tagged for a page that is not active; dropped silently.
    StalePage,
    /// Shape parked in the asset archive until its asset arrives.
    Deferred,
    /// Malformed payload or engine-rejected patch; logged and skipped.
    Invalid,
    /// Not a page-scoped namespace; someone else's concern.
    Ignored,
}

// =============================================================================
// RECONCILER
// =============================================================================

pub struct Reconciler {
    pending: PageDelta,
    debounce: Debounce,
    /// Last value written per (namespace, key); `None` records a delete.
    last_sent: HashMap<(String, String), Option<serde_json::Value>>,
    archive: AssetArchive,
    /// Which live shape renders which asset, for exactly-once binary
    /// deletes when the shape goes away.
    asset_by_shape: HashMap<String, String>,
}

impl Reconciler {
    #[must_use]
    pub fn new(debounce_window: Duration) -> Self {
        Self {
            pending: PageDelta::default(),
            debounce: Debounce::new(debounce_window),
            last_sent: HashMap::new(),
            archive: AssetArchive::new(),
            asset_by_shape: HashMap::new(),
        }
    }

    // --- Outbound: coalescing ---

    /// Fold a settled local edit batch into the pending set and re-arm the
    /// debounce window.
    pub fn record_local(&mut self, delta: PageDelta, now: Instant) {
        if delta.is_empty() {
            return;
        }
        self.pending.merge(delta);
        self.debounce.schedule(now);
    }

    /// The coalesced batch, if the quiet period has elapsed.
    pub fn take_ready(&mut self, now: Instant) -> Option<PageDelta> {
        if self.debounce.fire(now) && !self.pending.is_empty() {
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    /// The coalesced batch immediately, regardless of the window.
    pub fn take_now(&mut self) -> Option<PageDelta> {
        self.debounce.flush();
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    /// Drop everything pending (read-only role, load phase, forced follow).
    pub fn discard_pending(&mut self) {
        self.pending = PageDelta::default();
        self.debounce.cancel();
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.debounce.is_pending()
    }

    #[must_use]
    pub fn archived_count(&self) -> usize {
        self.archive.len()
    }

    // --- Outbound: push ---

    /// Push one coalesced batch to the page namespaces. Returns surfaced,
    /// non-fatal errors; a failure on one entity never blocks the rest.
    pub async fn push_batch(
        &mut self,
        engine: &mut Engine,
        channels: &PageChannels,
        asset_store: &Arc<dyn AssetStore>,
        batch: PageDelta,
    ) -> Vec<SyncError> {
        let mut errors = Vec::new();
        let page_id = channels.page_id.clone();

        let mut shape_sets: HashMap<String, serde_json::Value> = HashMap::new();
        let mut shape_deletes: Vec<String> = Vec::new();
        let mut binding_sets: HashMap<String, serde_json::Value> = HashMap::new();
        let mut binding_deletes: Vec<String> = Vec::new();
        let mut asset_sets: HashMap<String, serde_json::Value> = HashMap::new();
        let mut asset_deletes: Vec<String> = Vec::new();

        // Asset entries, carrying through the rendering shape's position so
        // repositioning an image also repositions its record.
        for (id, entry) in batch.assets {
            match entry {
                Some(mut asset) => {
                    if let Some(shape) = engine.doc().shape_by_asset(&page_id, &id) {
                        asset.point = Some(shape.point);
                    }
                    match serde_json::to_value(&asset) {
                        Ok(value) => {
                            asset_sets.insert(id, value);
                        }
                        Err(e) => errors.push(SyncError::invalid_patch(
                            channels.assets.namespace(),
                            &id,
                            e,
                        )),
                    }
                }
                None => asset_deletes.push(id),
            }
        }

        for (id, entry) in batch.shapes {
            match entry {
                Some(shape) => {
                    if let Some(asset_id) = shape.asset_id.clone() {
                        // Asset-derived shapes sync through their asset
                        // record, not the shape namespace.
                        self.asset_by_shape.insert(id, asset_id.clone());
                        if !asset_sets.contains_key(&asset_id) {
                            if let Some(asset) = engine.doc().asset(&page_id, &asset_id) {
                                let mut moved = asset.clone();
                                moved.point = Some(shape.point);
                                if let Ok(value) = serde_json::to_value(&moved) {
                                    asset_sets.insert(asset_id, value);
                                }
                            }
                        }
                    } else {
                        match serde_json::to_value(&shape) {
                            Ok(value) => {
                                shape_sets.insert(id, value);
                            }
                            Err(e) => errors.push(SyncError::invalid_patch(
                                channels.shapes.namespace(),
                                &id,
                                e,
                            )),
                        }
                    }
                }
                None => {
                    if let Some(asset_id) = self.asset_by_shape.remove(&id) {
                        // The shape rendered an asset: drop the backing
                        // binary exactly once, then the record.
                        if let Err(e) = asset_store.delete(&asset_id).await {
                            errors.push(e);
                        }
                        if engine.delete_asset(&asset_id).is_err() {
                            debug!(asset_id, "asset record already absent locally");
                        }
                        asset_deletes.push(asset_id);
                    } else {
                        shape_deletes.push(id);
                    }
                }
            }
        }

        for (id, entry) in batch.bindings {
            match entry {
                Some(binding) => match serde_json::to_value(&binding) {
                    Ok(value) => {
                        binding_sets.insert(id, value);
                    }
                    Err(e) => errors.push(SyncError::invalid_patch(
                        channels.bindings.namespace(),
                        &id,
                        e,
                    )),
                },
                None => binding_deletes.push(id),
            }
        }

        self.write(&channels.assets, asset_sets, asset_deletes, &mut errors).await;
        self.write(&channels.shapes, shape_sets, shape_deletes, &mut errors).await;
        self.write(&channels.bindings, binding_sets, binding_deletes, &mut errors).await;

        // Post-flush: clear the selection and return to the active tool,
        // unless a multi-step tool is mid-edit.
        if !engine.tool().is_multi_step() {
            engine.select_none();
        }

        errors
    }

    async fn write(
        &mut self,
        handle: &Arc<dyn StoreHandle>,
        sets: HashMap<String, serde_json::Value>,
        deletes: Vec<String>,
        errors: &mut Vec<SyncError>,
    ) {
        let namespace = handle.namespace().to_owned();
        if !sets.is_empty() {
            let entries: Vec<StoreEntry> = sets
                .into_iter()
                .map(|(key, payload)| {
                    self.last_sent
                        .insert((namespace.clone(), key.clone()), Some(payload.clone()));
                    StoreEntry { key, payload }
                })
                .collect();
            let count = entries.len();
            if let Err(e) = handle.bulk_set(entries).await {
                errors.push(e.into());
            } else {
                debug!(%namespace, count, "pushed upserts");
            }
        }
        if !deletes.is_empty() {
            for key in &deletes {
                self.last_sent.insert((namespace.clone(), key.clone()), None);
            }
            let count = deletes.len();
            if let Err(e) = handle.bulk_delete(deletes).await {
                errors.push(e.into());
            } else {
                debug!(%namespace, count, "pushed deletes");
            }
        }
    }

    // --- Inbound ---

    /// Apply one remote mutation to the document. Never panics and never
    /// aborts on a single bad entity.
    pub fn on_remote_mutation(&mut self, engine: &mut Engine, delta: &StoreDelta) -> InboundOutcome {
        let Some((delta_page, kind)) = split_page_namespace(&delta.namespace) else {
            return InboundOutcome::Ignored;
        };

        let echo_key = (delta.namespace.clone(), delta.key.clone());
        if let Some(sent) = self.last_sent.get(&echo_key) {
            if *sent == delta.value {
                self.last_sent.remove(&echo_key);
                return InboundOutcome::SelfEcho;
            }
        }

        if delta_page != engine.current_page_id() {
            debug!(namespace = %delta.namespace, key = %delta.key, "dropping cross-page write");
            return InboundOutcome::StalePage;
        }
        let page_id = delta_page.to_owned();

        match kind {
            NamespaceKind::Shapes => self.apply_shape(engine, &page_id, delta),
            NamespaceKind::Bindings => Self::apply_binding(engine, delta),
            NamespaceKind::Assets => self.apply_asset(engine, &page_id, delta),
        }
    }

    fn apply_shape(
        &mut self,
        engine: &mut Engine,
        page_id: &str,
        delta: &StoreDelta,
    ) -> InboundOutcome {
        let Some(value) = &delta.value else {
            self.asset_by_shape.remove(&delta.key);
            if engine.delete(std::slice::from_ref(&delta.key)).is_err() {
                debug!(key = %delta.key, "shape already absent");
            }
            return InboundOutcome::Removed;
        };

        let shape: Shape = match store::decode_entity(&delta.namespace, &delta.key, value) {
            Ok(shape) => shape,
            Err(e) => {
                warn!(error = %e, "rejecting shape payload");
                return InboundOutcome::Invalid;
            }
        };
        if shape.parent_id != page_id {
            debug!(key = %delta.key, parent = %shape.parent_id, "dropping cross-page shape");
            return InboundOutcome::StalePage;
        }

        if let Some(asset_id) = shape.asset_id.clone() {
            if engine.doc().asset(page_id, &asset_id).is_none() {
                // Asset not here yet: park the shape until it arrives.
                self.archive.insert(asset_id, shape);
                return InboundOutcome::Deferred;
            }
            self.asset_by_shape.insert(shape.id.clone(), asset_id);
        }

        if let Err(e) = engine.patch_create(vec![shape], Vec::new()) {
            warn!(key = %delta.key, error = %e, "engine rejected shape patch");
            return InboundOutcome::Invalid;
        }
        InboundOutcome::Applied
    }

    fn apply_binding(engine: &mut Engine, delta: &StoreDelta) -> InboundOutcome {
        let Some(value) = &delta.value else {
            if engine.delete_binding(&delta.key).is_err() {
                debug!(key = %delta.key, "binding already absent");
            }
            return InboundOutcome::Removed;
        };

        let binding: Binding = match store::decode_entity(&delta.namespace, &delta.key, value) {
            Ok(binding) => binding,
            Err(e) => {
                warn!(error = %e, "rejecting binding payload");
                return InboundOutcome::Invalid;
            }
        };
        if let Err(e) = engine.patch_create(Vec::new(), vec![binding]) {
            warn!(key = %delta.key, error = %e, "engine rejected binding patch");
            return InboundOutcome::Invalid;
        }
        InboundOutcome::Applied
    }

    fn apply_asset(
        &mut self,
        engine: &mut Engine,
        page_id: &str,
        delta: &StoreDelta,
    ) -> InboundOutcome {
        let Some(value) = &delta.value else {
            if let Some(shape) = engine.doc().shape_by_asset(page_id, &delta.key).cloned() {
                self.asset_by_shape.remove(&shape.id);
                if engine.delete(std::slice::from_ref(&shape.id)).is_err() {
                    debug!(key = %shape.id, "asset shape already absent");
                }
            }
            if engine.delete_asset(&delta.key).is_err() {
                debug!(key = %delta.key, "asset already absent");
            }
            return InboundOutcome::Removed;
        };

        let asset: Asset = match store::decode_entity(&delta.namespace, &delta.key, value) {
            Ok(asset) => asset,
            Err(e) => {
                warn!(error = %e, "rejecting asset payload");
                return InboundOutcome::Invalid;
            }
        };

        if let Err(e) = engine.patch_assets(vec![asset.clone()]) {
            warn!(key = %delta.key, error = %e, "engine rejected asset patch");
            return InboundOutcome::Invalid;
        }

        match engine.doc().shape_by_asset(page_id, &asset.id).cloned() {
            Some(existing) => {
                // A moved asset record repositions its rendering shape.
                if let Some(point) = asset.point {
                    if point != existing.point {
                        let mut moved = existing;
                        moved.point = point;
                        if let Err(e) = engine.patch_create(vec![moved], Vec::new()) {
                            warn!(key = %delta.key, error = %e, "failed to reposition asset shape");
                        }
                    }
                }
            }
            None => {
                // First sight: materialize the parked shape, or synthesize
                // a fresh one.
                let shape = self.archive.take(&asset.id).unwrap_or_else(|| {
                    assets::synthesize_shape(&asset, page_id, &engine.viewport())
                });
                self.asset_by_shape.insert(shape.id.clone(), asset.id.clone());
                if let Err(e) = engine.patch_create(vec![shape], Vec::new()) {
                    warn!(key = %delta.key, error = %e, "engine rejected synthesized shape");
                    return InboundOutcome::Invalid;
                }
            }
        }
        InboundOutcome::Applied
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(Duration::from_millis(FLUSH_DEBOUNCE_MS))
    }
}
