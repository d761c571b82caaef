//! Engine facade the sync layer programs against.
//!
//! DESIGN
//! ======
//! `Engine` wraps the multi-page [`Document`] with the transient state the
//! sync core needs to reason about: camera + viewport, selection, the active
//! tool and its lock state, presence users, and the loading phase. All
//! mutations delegate to the document and propagate its `DocError`s — the
//! sync core guards each call individually so one bad entity never aborts a
//! batch.

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;

use std::collections::HashMap;

use crate::camera::{self, Bounds, Camera, Viewport};
use crate::doc::{
    Asset, Binding, DocError, Document, DocumentSnapshot, Page, PageContent, Shape, User,
};

// =============================================================================
// TOOL STATE
// =============================================================================

/// The active tool on the drawing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    Select,
    Draw,
    Rect,
    Ellipse,
    Arrow,
    Text,
    Erase,
}

impl Tool {
    /// Multi-step tools must not be interrupted by a post-flush selection
    /// reset (text entry spans several edit batches).
    #[must_use]
    pub fn is_multi_step(self) -> bool {
        matches!(self, Tool::Text)
    }
}

/// Whether a shape is currently mid-creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolLock {
    #[default]
    Idle,
    Creating,
}

/// Document lifecycle phase as seen by the sync core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineStatus {
    Loading,
    #[default]
    Ready,
}

// =============================================================================
// EDIT BATCHES
// =============================================================================

/// One settled batch of local edits: added/updated entries are `Some`,
/// removed entries are `None`. Repeated updates to the same id within a
/// batch collapse to the last value.
#[derive(Debug, Clone, Default)]
pub struct PageDelta {
    pub shapes: HashMap<String, Option<Shape>>,
    pub bindings: HashMap<String, Option<Binding>>,
    pub assets: HashMap<String, Option<Asset>>,
}

impl PageDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty() && self.bindings.is_empty() && self.assets.is_empty()
    }

    /// Fold a later batch into this one; later values win per id.
    pub fn merge(&mut self, other: PageDelta) {
        self.shapes.extend(other.shapes);
        self.bindings.extend(other.bindings);
        self.assets.extend(other.assets);
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// The local document engine: document, camera, selection, tools, presence.
#[derive(Debug)]
pub struct Engine {
    doc: Document,
    camera: Camera,
    viewport: Viewport,
    selection: Vec<String>,
    tool: Tool,
    tool_lock: ToolLock,
    status: EngineStatus,
    users: HashMap<String, User>,
    last_camera_reason: Option<String>,
}

impl Engine {
    #[must_use]
    pub fn new(initial_page_id: impl Into<String>, initial_page_name: impl Into<String>) -> Self {
        Self {
            doc: Document::new(initial_page_id, initial_page_name),
            camera: Camera::default(),
            viewport: Viewport::default(),
            selection: Vec::new(),
            tool: Tool::default(),
            tool_lock: ToolLock::default(),
            status: EngineStatus::default(),
            users: HashMap::new(),
            last_camera_reason: None,
        }
    }

    // --- Document access ---

    #[must_use]
    pub fn doc(&self) -> &Document {
        &self.doc
    }

    #[must_use]
    pub fn current_page_id(&self) -> &str {
        self.doc.current_page_id()
    }

    #[must_use]
    pub fn get_shape(&self, id: &str) -> Option<&Shape> {
        self.doc.shape(self.doc.current_page_id(), id)
    }

    #[must_use]
    pub fn get_page(&self, id: &str) -> Option<&Page> {
        self.doc.page(id)
    }

    // --- Remote patch application ---

    /// Replace the current page's content wholesale.
    ///
    /// # Errors
    ///
    /// Propagates `DocError` from the document.
    pub fn replace_page_content(
        &mut self,
        shapes: HashMap<String, Shape>,
        bindings: HashMap<String, Binding>,
        assets: HashMap<String, Asset>,
    ) -> Result<(), DocError> {
        let page_id = self.doc.current_page_id().to_owned();
        self.doc
            .replace_page_content(&page_id, PageContent { shapes, bindings, assets })
    }

    /// Create or update shapes and bindings on the current page.
    ///
    /// # Errors
    ///
    /// Propagates the first `DocError`; callers apply entities one at a time
    /// when isolation matters.
    pub fn patch_create(&mut self, shapes: Vec<Shape>, bindings: Vec<Binding>) -> Result<(), DocError> {
        let page_id = self.doc.current_page_id().to_owned();
        for shape in shapes {
            if shape.parent_id != page_id {
                return Err(DocError::WrongPage {
                    shape: shape.id,
                    expected: page_id,
                    actual: shape.parent_id,
                });
            }
            self.doc.upsert_shape(shape)?;
        }
        for binding in bindings {
            self.doc.upsert_binding(&page_id, binding)?;
        }
        Ok(())
    }

    /// Create or update asset records on the current page.
    ///
    /// # Errors
    ///
    /// Propagates `DocError` from the document.
    pub fn patch_assets(&mut self, assets: Vec<Asset>) -> Result<(), DocError> {
        let page_id = self.doc.current_page_id().to_owned();
        for asset in assets {
            self.doc.upsert_asset(&page_id, asset)?;
        }
        Ok(())
    }

    /// Delete shapes by id from the current page. Bindings anchored to a
    /// deleted shape are pruned by the document.
    ///
    /// # Errors
    ///
    /// Returns the first `ShapeNotFound`; earlier deletions stay applied.
    pub fn delete(&mut self, ids: &[String]) -> Result<(), DocError> {
        let page_id = self.doc.current_page_id().to_owned();
        for id in ids {
            self.doc.remove_shape(&page_id, id)?;
            self.selection.retain(|s| s != id);
        }
        Ok(())
    }

    /// Remove a binding from the current page.
    ///
    /// # Errors
    ///
    /// Returns `BindingNotFound` if absent.
    pub fn delete_binding(&mut self, id: &str) -> Result<(), DocError> {
        let page_id = self.doc.current_page_id().to_owned();
        self.doc.remove_binding(&page_id, id).map(|_| ())
    }

    /// Remove an asset record from the current page.
    ///
    /// # Errors
    ///
    /// Returns `AssetNotFound` if absent.
    pub fn delete_asset(&mut self, id: &str) -> Result<(), DocError> {
        let page_id = self.doc.current_page_id().to_owned();
        self.doc.remove_asset(&page_id, id).map(|_| ())
    }

    // --- Selection ---

    #[must_use]
    pub fn selection(&self) -> &[String] {
        &self.selection
    }

    pub fn select(&mut self, ids: Vec<String>) {
        self.selection = ids;
    }

    pub fn select_none(&mut self) {
        self.selection.clear();
    }

    pub fn select_all(&mut self) {
        self.selection = self.doc.current_content().shapes.keys().cloned().collect();
    }

    // --- Camera ---

    #[must_use]
    pub fn camera(&self) -> Camera {
        self.camera
    }

    #[must_use]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn set_camera(&mut self, point: [f64; 2], zoom: f64, reason: &str) {
        self.camera = Camera { point, zoom };
        self.last_camera_reason = Some(reason.to_owned());
    }

    /// Why the camera last moved (e.g. `"follow"`, `"auto-fit"`).
    #[must_use]
    pub fn last_camera_reason(&self) -> Option<&str> {
        self.last_camera_reason.as_deref()
    }

    /// Fit the camera to the selected shapes. No-op on empty selection.
    pub fn zoom_to_selection(&mut self) {
        let content = self.doc.current_content();
        let bounds = camera::content_bounds(
            self.selection
                .iter()
                .filter_map(|id| content.shapes.get(id)),
        );
        if let Some(bounds) = bounds {
            self.camera = camera::camera_to_fit(&bounds, &self.viewport);
            self.last_camera_reason = Some("zoom-to-selection".to_owned());
        }
    }

    /// Fit the camera to all content on the current page. No-op when empty.
    pub fn zoom_to_fit(&mut self) {
        let bounds = camera::content_bounds(self.doc.current_content().shapes.values());
        if let Some(bounds) = bounds {
            self.camera = camera::camera_to_fit(&bounds, &self.viewport);
            self.last_camera_reason = Some("zoom-to-fit".to_owned());
        }
    }

    /// Bounding box of all content on the current page.
    #[must_use]
    pub fn content_bounds(&self) -> Option<Bounds> {
        camera::content_bounds(self.doc.current_content().shapes.values())
    }

    // --- Pages ---

    pub fn create_page(&mut self, id: impl Into<String>, name: impl Into<String>) {
        self.doc.create_page(id, name);
    }

    /// Switch the current page, dropping the selection.
    ///
    /// # Errors
    ///
    /// Returns `PageNotFound` for an unknown page.
    pub fn change_page(&mut self, id: &str) -> Result<(), DocError> {
        self.doc.change_page(id)?;
        self.selection.clear();
        Ok(())
    }

    /// Delete a page.
    ///
    /// # Errors
    ///
    /// Returns `LastPage` when only one page remains.
    pub fn delete_page(&mut self, id: &str) -> Result<(), DocError> {
        self.doc.delete_page(id)
    }

    /// Load content into an arbitrary page without switching to it, used
    /// when streaming remote pages in at session start.
    ///
    /// # Errors
    ///
    /// Returns `PageNotFound` for an unknown page.
    pub fn load_page_content(&mut self, page_id: &str, content: PageContent) -> Result<(), DocError> {
        self.doc.replace_page_content(page_id, content)
    }

    // --- Snapshot ---

    #[must_use]
    pub fn snapshot(&self) -> DocumentSnapshot {
        self.doc.snapshot()
    }

    /// Replace the whole document from a snapshot, dropping the selection.
    ///
    /// # Errors
    ///
    /// Propagates `DocError` from the document.
    pub fn load_snapshot(&mut self, snapshot: DocumentSnapshot) -> Result<(), DocError> {
        self.doc.load_snapshot(snapshot)?;
        self.selection.clear();
        Ok(())
    }

    // --- Tool / status ---

    #[must_use]
    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    #[must_use]
    pub fn tool_lock(&self) -> ToolLock {
        self.tool_lock
    }

    pub fn set_tool_lock(&mut self, lock: ToolLock) {
        self.tool_lock = lock;
    }

    #[must_use]
    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn set_status(&mut self, status: EngineStatus) {
        self.status = status;
    }

    // --- Presence ---

    pub fn update_users(&mut self, users: Vec<User>) {
        for user in users {
            self.users.insert(user.id.clone(), user);
        }
    }

    pub fn remove_user(&mut self, id: &str) {
        self.users.remove(id);
    }

    #[must_use]
    pub fn users(&self) -> &HashMap<String, User> {
        &self.users
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(crate::doc::new_id(), "Page 1")
    }
}
