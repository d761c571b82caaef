//! Entity types and the multi-page document store.
//!
//! This module defines the typed entities that cross the store boundary
//! (`Shape`, `Binding`, `Asset`), the presence model (`User`), pages, and the
//! runtime `Document` that owns all live content partitioned per page.
//!
//! Data flows into this layer from the sync core (remote mutations validated
//! at the store boundary) and from the host drawing surface (local edits).
//! Every mutation that can fail — patching a missing entity, touching an
//! unknown page — returns a `DocError` instead of panicking, so the sync core
//! can isolate one bad entity without aborting a batch.

#[cfg(test)]
#[path = "doc_test.rs"]
mod doc_test;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DocError {
    #[error("page not found: {0}")]
    PageNotFound(String),
    #[error("shape not found: {0}")]
    ShapeNotFound(String),
    #[error("binding not found: {0}")]
    BindingNotFound(String),
    #[error("asset not found: {0}")]
    AssetNotFound(String),
    #[error("cannot delete the last remaining page")]
    LastPage,
    #[error("shape {shape} belongs to page {actual}, not {expected}")]
    WrongPage {
        shape: String,
        expected: String,
        actual: String,
    },
}

// =============================================================================
// ENTITIES
// =============================================================================

/// Mint a fresh entity id (UUID v4 rendered as a string key).
#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// The kind of a shape on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Rect,
    Ellipse,
    Draw,
    Arrow,
    Text,
    Image,
    Sticky,
}

/// Visual style carried on every shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style {
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dash: Option<String>,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_color() -> String {
    "#1F1A17".to_owned()
}

fn default_scale() -> f64 {
    1.0
}

impl Default for Style {
    fn default() -> Self {
        Self { color: default_color(), fill: None, dash: None, scale: default_scale() }
    }
}

/// A shape as stored in the document and on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shape {
    /// Unique identifier for this shape.
    pub id: String,
    /// Shape type.
    #[serde(rename = "type")]
    pub kind: ShapeKind,
    /// Page this shape belongs to.
    pub parent_id: String,
    /// Top-left corner in world coordinates.
    pub point: [f64; 2],
    /// Bounding-box size in world units, if the kind has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<[f64; 2]>,
    /// Clockwise rotation in radians around the bounding-box center.
    #[serde(default)]
    pub rotation: f64,
    /// Visual style.
    #[serde(default)]
    pub style: Style,
    /// Backing asset for image shapes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
}

/// A binding relating two shapes (e.g. an arrow anchored to a rect).
///
/// The linkage payload is engine-specific and kept as an open JSON bag;
/// only the id is interpreted by the sync core. Conventional keys are
/// `fromId` / `toId` for the endpoint shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub id: String,
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Binding {
    /// Shape ids this binding references, read from the conventional
    /// `fromId` / `toId` keys.
    #[must_use]
    pub fn endpoint_ids(&self) -> Vec<&str> {
        ["fromId", "toId"]
            .iter()
            .filter_map(|k| self.data.get(*k).and_then(|v| v.as_str()))
            .collect()
    }
}

/// The kind of an uploaded binary asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    File,
}

/// An uploaded binary resource, rendered through a synthesized image shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    #[serde(rename = "type", default = "default_asset_kind")]
    pub kind: AssetKind,
    /// Natural size in world units.
    pub size: [f64; 2],
    /// Position of the shape rendering this asset, carried through so
    /// repositioning an image on one peer repositions it everywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<[f64; 2]>,
    /// Download URL of the backing binary.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

fn default_asset_kind() -> AssetKind {
    AssetKind::Image
}

/// Connection status of a presence user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Connected,
    Idle,
    Disconnected,
}

/// Host-level identity attached to a presence user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMetadata {
    pub id: String,
    pub name: String,
}

/// One connected peer as mirrored into the document's presence model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Cursor position in world coordinates.
    pub point: [f64; 2],
    /// Presence color (CSS hex).
    pub color: String,
    pub status: UserStatus,
    pub metadata: UserMetadata,
}

/// A page of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub name: String,
}

/// All live content of one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    pub shapes: HashMap<String, Shape>,
    pub bindings: HashMap<String, Binding>,
    pub assets: HashMap<String, Asset>,
}

// =============================================================================
// DOCUMENT
// =============================================================================

/// Serializable snapshot of the whole document, used for export and
/// whole-document loads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub pages: Vec<Page>,
    pub content: HashMap<String, PageContent>,
    pub current_page_id: String,
}

/// The multi-page document store. Exactly one page is current at a time;
/// switching pages swaps the active content without discarding other pages.
#[derive(Debug, Clone)]
pub struct Document {
    pages: Vec<Page>,
    content: HashMap<String, PageContent>,
    current_page_id: String,
}

impl Document {
    /// Create a document with a single empty page.
    #[must_use]
    pub fn new(page_id: impl Into<String>, page_name: impl Into<String>) -> Self {
        let id = page_id.into();
        let page = Page { id: id.clone(), name: page_name.into() };
        let mut content = HashMap::new();
        content.insert(id.clone(), PageContent::default());
        Self { pages: vec![page], content, current_page_id: id }
    }

    // --- Pages ---

    #[must_use]
    pub fn current_page_id(&self) -> &str {
        &self.current_page_id
    }

    #[must_use]
    pub fn page(&self, id: &str) -> Option<&Page> {
        self.pages.iter().find(|p| p.id == id)
    }

    /// All pages in creation order, for the page menu.
    #[must_use]
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Add a page if it does not exist yet. Re-adding an existing page only
    /// updates its name.
    pub fn create_page(&mut self, id: impl Into<String>, name: impl Into<String>) {
        let id = id.into();
        let name = name.into();
        if let Some(page) = self.pages.iter_mut().find(|p| p.id == id) {
            page.name = name;
            return;
        }
        self.content.insert(id.clone(), PageContent::default());
        self.pages.push(Page { id, name });
    }

    /// Make a page current.
    ///
    /// # Errors
    ///
    /// Returns `PageNotFound` for an unknown page id.
    pub fn change_page(&mut self, id: &str) -> Result<(), DocError> {
        if !self.content.contains_key(id) {
            return Err(DocError::PageNotFound(id.to_owned()));
        }
        self.current_page_id = id.to_owned();
        Ok(())
    }

    /// Remove a page and its content.
    ///
    /// # Errors
    ///
    /// Returns `LastPage` when only one page remains and `PageNotFound` for
    /// an unknown id. If the current page is deleted the first remaining
    /// page becomes current.
    pub fn delete_page(&mut self, id: &str) -> Result<(), DocError> {
        if self.pages.len() == 1 {
            return Err(DocError::LastPage);
        }
        let Some(index) = self.pages.iter().position(|p| p.id == id) else {
            return Err(DocError::PageNotFound(id.to_owned()));
        };
        self.pages.remove(index);
        self.content.remove(id);
        if self.current_page_id == id {
            self.current_page_id.clone_from(&self.pages[0].id);
        }
        Ok(())
    }

    // --- Content access ---

    #[must_use]
    pub fn content(&self, page_id: &str) -> Option<&PageContent> {
        self.content.get(page_id)
    }

    /// Content of the current page.
    ///
    /// # Panics
    ///
    /// Never panics: the current page always has a content entry.
    #[must_use]
    pub fn current_content(&self) -> &PageContent {
        self.content
            .get(&self.current_page_id)
            .expect("current page always has content")
    }

    fn content_mut(&mut self, page_id: &str) -> Result<&mut PageContent, DocError> {
        self.content
            .get_mut(page_id)
            .ok_or_else(|| DocError::PageNotFound(page_id.to_owned()))
    }

    // --- Shapes ---

    #[must_use]
    pub fn shape(&self, page_id: &str, id: &str) -> Option<&Shape> {
        self.content.get(page_id).and_then(|c| c.shapes.get(id))
    }

    /// The shape rendering the given asset on a page, if any.
    #[must_use]
    pub fn shape_by_asset(&self, page_id: &str, asset_id: &str) -> Option<&Shape> {
        self.content
            .get(page_id)?
            .shapes
            .values()
            .find(|s| s.asset_id.as_deref() == Some(asset_id))
    }

    /// Insert or replace a shape on its parent page.
    ///
    /// # Errors
    ///
    /// Returns `PageNotFound` if the parent page does not exist.
    pub fn upsert_shape(&mut self, shape: Shape) -> Result<(), DocError> {
        let content = self.content_mut(&shape.parent_id.clone())?;
        content.shapes.insert(shape.id.clone(), shape);
        Ok(())
    }

    /// Remove a shape, pruning any bindings anchored to it.
    ///
    /// # Errors
    ///
    /// Returns `ShapeNotFound` if the shape is absent.
    pub fn remove_shape(&mut self, page_id: &str, id: &str) -> Result<Shape, DocError> {
        let content = self.content_mut(page_id)?;
        let shape = content
            .shapes
            .remove(id)
            .ok_or_else(|| DocError::ShapeNotFound(id.to_owned()))?;
        content
            .bindings
            .retain(|_, b| !b.endpoint_ids().contains(&id));
        Ok(shape)
    }

    // --- Bindings ---

    #[must_use]
    pub fn binding(&self, page_id: &str, id: &str) -> Option<&Binding> {
        self.content.get(page_id).and_then(|c| c.bindings.get(id))
    }

    /// Insert or replace a binding on a page.
    ///
    /// # Errors
    ///
    /// Returns `PageNotFound` if the page does not exist.
    pub fn upsert_binding(&mut self, page_id: &str, binding: Binding) -> Result<(), DocError> {
        let content = self.content_mut(page_id)?;
        content.bindings.insert(binding.id.clone(), binding);
        Ok(())
    }

    /// Remove a binding.
    ///
    /// # Errors
    ///
    /// Returns `BindingNotFound` if the binding is absent.
    pub fn remove_binding(&mut self, page_id: &str, id: &str) -> Result<Binding, DocError> {
        let content = self.content_mut(page_id)?;
        content
            .bindings
            .remove(id)
            .ok_or_else(|| DocError::BindingNotFound(id.to_owned()))
    }

    // --- Assets ---

    #[must_use]
    pub fn asset(&self, page_id: &str, id: &str) -> Option<&Asset> {
        self.content.get(page_id).and_then(|c| c.assets.get(id))
    }

    /// Insert or replace an asset record on a page.
    ///
    /// # Errors
    ///
    /// Returns `PageNotFound` if the page does not exist.
    pub fn upsert_asset(&mut self, page_id: &str, asset: Asset) -> Result<(), DocError> {
        let content = self.content_mut(page_id)?;
        content.assets.insert(asset.id.clone(), asset);
        Ok(())
    }

    /// Remove an asset record.
    ///
    /// # Errors
    ///
    /// Returns `AssetNotFound` if the asset is absent.
    pub fn remove_asset(&mut self, page_id: &str, id: &str) -> Result<Asset, DocError> {
        let content = self.content_mut(page_id)?;
        content
            .assets
            .remove(id)
            .ok_or_else(|| DocError::AssetNotFound(id.to_owned()))
    }

    // --- Bulk ---

    /// Replace the full content of a page.
    ///
    /// # Errors
    ///
    /// Returns `PageNotFound` if the page does not exist.
    pub fn replace_page_content(
        &mut self,
        page_id: &str,
        content: PageContent,
    ) -> Result<(), DocError> {
        let slot = self.content_mut(page_id)?;
        *slot = content;
        Ok(())
    }

    /// Snapshot the whole document for export or transfer.
    #[must_use]
    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            pages: self.pages.clone(),
            content: self.content.clone(),
            current_page_id: self.current_page_id.clone(),
        }
    }

    /// Replace the whole document from a snapshot.
    ///
    /// A snapshot without pages is rejected; a snapshot whose current page
    /// is unknown falls back to its first page.
    ///
    /// # Errors
    ///
    /// Returns `PageNotFound` if the snapshot contains no pages.
    pub fn load_snapshot(&mut self, snapshot: DocumentSnapshot) -> Result<(), DocError> {
        if snapshot.pages.is_empty() {
            return Err(DocError::PageNotFound(snapshot.current_page_id));
        }
        let current = if snapshot.pages.iter().any(|p| p.id == snapshot.current_page_id) {
            snapshot.current_page_id
        } else {
            snapshot.pages[0].id.clone()
        };
        self.pages = snapshot.pages;
        self.content = snapshot.content;
        for page in &self.pages {
            self.content.entry(page.id.clone()).or_default();
        }
        self.current_page_id = current;
        Ok(())
    }

    /// True when no page holds any shape.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.values().all(|c| c.shapes.is_empty())
    }
}
