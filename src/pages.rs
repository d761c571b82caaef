//! Page manager: lazy namespace triples and the shared current-page
//! pointer.
//!
//! DESIGN
//! ======
//! A logical page maps to three store namespaces (`{page}-shapes`,
//! `{page}-bindings`, `{page}-assets`), materialized on first visit. The
//! active page is shared state: a dedicated `currentPage` key in the `page`
//! namespace, distinct from the per-page id→name map that feeds the page
//! menu. Page names are `"Page {n}"`; after a host restart the counter is
//! recovered as the maximum numeric suffix seen across all known names, so
//! freshly added pages never reuse a taken name.
//!
//! Every client seeds its document with the same default page id, so the
//! initial pages of concurrently joining peers merge instead of forking.

#[cfg(test)]
#[path = "pages_test.rs"]
mod pages_test;

use std::collections::BTreeSet;
use std::sync::Arc;

use canvas::doc::{self, Asset, Binding, PageContent, Shape};
use canvas::engine::Engine;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::store::{
    self, CURRENT_PAGE_KEY, NamespaceKind, RemoteStore, StoreHandle, page_namespace,
};

/// Page id every client starts from.
pub const DEFAULT_PAGE_ID: &str = "page1";

/// Name of the default page.
pub const DEFAULT_PAGE_NAME: &str = "Page 1";

/// Numeric suffix of a page name (`"Page 3"` → `3`).
fn page_name_suffix(name: &str) -> Option<u64> {
    name.rsplit(' ').next()?.parse().ok()
}

/// Tracks the page-name counter and the set of visited pages.
#[derive(Debug, Default)]
pub struct PageManager {
    counter: u64,
    history: BTreeSet<String>,
}

impl PageManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Page ids this session has activated, for the board summary.
    #[must_use]
    pub fn page_history(&self) -> Vec<String> {
        self.history.iter().cloned().collect()
    }

    /// Bump the counter to cover an observed page name.
    pub fn observe_name(&mut self, name: &str) {
        if let Some(n) = page_name_suffix(name) {
            self.counter = self.counter.max(n);
        }
    }

    fn next_name(&mut self) -> String {
        self.counter += 1;
        format!("Page {}", self.counter)
    }

    /// Switch to a page, creating it locally if unknown (its remote content
    /// streams in through the reconciler). Announces the new pointer and
    /// the id→name mapping to the shared store.
    ///
    /// # Errors
    ///
    /// Propagates store write failures.
    pub async fn switch_page(
        &mut self,
        engine: &mut Engine,
        page_store: &Arc<dyn StoreHandle>,
        page_id: &str,
        name: Option<&str>,
    ) -> Result<(), SyncError> {
        let name = match engine.get_page(page_id) {
            Some(page) => page.name.clone(),
            None => {
                let name = name.map_or_else(|| self.next_name(), str::to_owned);
                engine.create_page(page_id, &name);
                name
            }
        };
        self.observe_name(&name);
        engine.change_page(page_id)?;
        page_store
            .set(CURRENT_PAGE_KEY, serde_json::json!(page_id))
            .await?;
        page_store.set(page_id, serde_json::json!(name)).await?;
        self.history.insert(page_id.to_owned());
        info!(page_id, name, "switched page");
        Ok(())
    }

    /// Allocate a new page and switch to it. Returns the new page id.
    ///
    /// # Errors
    ///
    /// Propagates store write failures.
    pub async fn add_page(
        &mut self,
        engine: &mut Engine,
        page_store: &Arc<dyn StoreHandle>,
    ) -> Result<String, SyncError> {
        let page_id = doc::new_id();
        self.switch_page(engine, page_store, &page_id, None).await?;
        Ok(page_id)
    }

    /// Remove a page locally and from the shared store. The engine refuses
    /// to delete the last remaining page.
    ///
    /// # Errors
    ///
    /// Returns the engine's `LastPage` error or store write failures.
    pub async fn delete_page(
        &mut self,
        engine: &mut Engine,
        page_store: &Arc<dyn StoreHandle>,
        page_id: &str,
    ) -> Result<(), SyncError> {
        engine.delete_page(page_id)?;
        page_store.delete(page_id).await?;
        // The engine may have moved the pointer if the current page died.
        page_store
            .set(CURRENT_PAGE_KEY, serde_json::json!(engine.current_page_id()))
            .await?;
        self.history.remove(page_id);
        info!(page_id, "deleted page");
        Ok(())
    }

    /// Enumerate all known pages, load their content into the engine, and
    /// adopt the shared current-page pointer. Recovers the name counter
    /// from every observed name. On a fresh store, announces the local
    /// default page instead.
    ///
    /// # Errors
    ///
    /// Propagates store failures; individual malformed entities are skipped.
    pub async fn load_all(
        &mut self,
        engine: &mut Engine,
        remote: &Arc<dyn RemoteStore>,
        page_store: &Arc<dyn StoreHandle>,
    ) -> Result<(), SyncError> {
        let entries = page_store.get_all().await?;

        for (key, value) in &entries {
            if key == CURRENT_PAGE_KEY {
                continue;
            }
            let name = value.as_str().unwrap_or(key).to_owned();
            engine.create_page(key, &name);
            self.observe_name(&name);
        }
        for page in engine.doc().pages().to_vec() {
            self.observe_name(&page.name);
        }

        let page_ids: Vec<String> = engine.doc().pages().iter().map(|p| p.id.clone()).collect();
        for page_id in &page_ids {
            let content = load_page(remote, page_id).await?;
            engine.load_page_content(page_id, content)?;
        }

        match entries.get(CURRENT_PAGE_KEY).and_then(|v| v.as_str()) {
            Some(current) if engine.get_page(current).is_some() => {
                engine.change_page(current)?;
                self.history.insert(current.to_owned());
            }
            _ => {
                // Fresh store: announce the seed page.
                let current = engine.current_page_id().to_owned();
                let name = engine
                    .get_page(&current)
                    .map_or_else(|| DEFAULT_PAGE_NAME.to_owned(), |p| p.name.clone());
                page_store
                    .set(CURRENT_PAGE_KEY, serde_json::json!(current))
                    .await?;
                page_store.set(&current, serde_json::json!(name)).await?;
                self.history.insert(current);
            }
        }
        info!(pages = page_ids.len(), counter = self.counter, "pages loaded");
        Ok(())
    }
}

/// Populate and read one page's namespace triple into typed content.
/// Malformed entities are dropped with a warning, never propagated.
async fn load_page(remote: &Arc<dyn RemoteStore>, page_id: &str) -> Result<PageContent, SyncError> {
    let mut content = PageContent::default();

    for kind in [NamespaceKind::Shapes, NamespaceKind::Bindings, NamespaceKind::Assets] {
        let namespace = page_namespace(page_id, kind);
        remote.populate(&namespace).await?;
        let handle = remote.create(&namespace);
        for (key, value) in handle.get_all().await? {
            match kind {
                NamespaceKind::Shapes => {
                    match store::decode_entity::<Shape>(&namespace, &key, &value) {
                        Ok(shape) => {
                            content.shapes.insert(key, shape);
                        }
                        Err(e) => warn!(%namespace, key, error = %e, "skipping entity"),
                    }
                }
                NamespaceKind::Bindings => {
                    match store::decode_entity::<Binding>(&namespace, &key, &value) {
                        Ok(binding) => {
                            content.bindings.insert(key, binding);
                        }
                        Err(e) => warn!(%namespace, key, error = %e, "skipping entity"),
                    }
                }
                NamespaceKind::Assets => {
                    match store::decode_entity::<Asset>(&namespace, &key, &value) {
                        Ok(asset) => {
                            content.assets.insert(key, asset);
                        }
                        Err(e) => warn!(%namespace, key, error = %e, "skipping entity"),
                    }
                }
            }
        }
    }

    debug!(
        page_id,
        shapes = content.shapes.len(),
        bindings = content.bindings.len(),
        assets = content.assets.len(),
        "page content loaded"
    );
    Ok(content)
}
