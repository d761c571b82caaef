//! Remote store boundary: namespaces, deltas, capability traits.
//!
//! ARCHITECTURE
//! ============
//! The shared document lives in an external eventually-consistent key/value
//! store with last-write-wins semantics per key. This module owns the typed
//! boundary to it: the namespace naming scheme, the delta type delivered by
//! subscriptions, the `RemoteStore`/`StoreHandle` capability traits, and
//! schema validation of raw payloads into entity types. Subscriptions
//! deliver into an `mpsc` sink so every mutation is processed on the
//! session's single event context — the store fans out *all* mutations,
//! including the subscriber's own writes (self-echo), which the reconciler
//! suppresses.

pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::error::{ErrorCode, SyncError};

// =============================================================================
// NAMESPACES
// =============================================================================

/// Namespace holding the persisted roster.
pub const NS_USERS: &str = "users";

/// Namespace holding the current-page pointer and the id→name page map.
pub const NS_PAGE: &str = "page";

/// Namespace holding remote configuration patches.
pub const NS_CONFIG: &str = "config";

/// Reserved key in [`NS_PAGE`] pointing at the active page.
pub const CURRENT_PAGE_KEY: &str = "currentPage";

/// The three per-page content namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    Shapes,
    Bindings,
    Assets,
}

impl NamespaceKind {
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Shapes => "shapes",
            Self::Bindings => "bindings",
            Self::Assets => "assets",
        }
    }
}

/// Namespace name for one page's entity kind, e.g. `"page1-shapes"`.
#[must_use]
pub fn page_namespace(page_id: &str, kind: NamespaceKind) -> String {
    format!("{page_id}-{}", kind.suffix())
}

/// Split a page-scoped namespace back into `(page_id, kind)`.
///
/// Returns `None` for the flat namespaces (`users`, `page`, `config`).
#[must_use]
pub fn split_page_namespace(namespace: &str) -> Option<(&str, NamespaceKind)> {
    let (page_id, suffix) = namespace.rsplit_once('-')?;
    let kind = match suffix {
        "shapes" => NamespaceKind::Shapes,
        "bindings" => NamespaceKind::Bindings,
        "assets" => NamespaceKind::Assets,
        _ => return None,
    };
    Some((page_id, kind))
}

// =============================================================================
// DELTAS AND ERRORS
// =============================================================================

/// One observed mutation: `value` is `None` for deletions.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreDelta {
    pub namespace: String,
    pub key: String,
    pub value: Option<serde_json::Value>,
}

/// One entry of a bulk write.
#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub key: String,
    pub payload: serde_json::Value,
}

impl StoreEntry {
    #[must_use]
    pub fn new(key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { key: key.into(), payload }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend: {0}")]
    Backend(String),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        "E_STORE"
    }

    fn retryable(&self) -> bool {
        true
    }
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// Handle returned by every subscription. Dropping it (or calling
/// `unsubscribe`) detaches the sink; teardown therefore happens in the
/// reverse of registration order when guards are popped off a stack.
pub struct SubscriptionGuard {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    #[must_use]
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self { detach: Some(Box::new(detach)) }
    }

    /// Explicitly detach now instead of at drop.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

// =============================================================================
// CAPABILITY TRAITS
// =============================================================================

/// One namespace of the remote store.
#[async_trait::async_trait]
pub trait StoreHandle: Send + Sync {
    fn namespace(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    async fn get_all(&self) -> Result<HashMap<String, serde_json::Value>, StoreError>;

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError>;

    async fn bulk_set(&self, entries: Vec<StoreEntry>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn bulk_delete(&self, keys: Vec<String>) -> Result<(), StoreError>;

    /// Register a delta sink. `pattern` is `"*"` for all keys or a literal
    /// key prefix. Mutations from every writer — including this handle's
    /// own — are delivered in store order.
    fn subscribe(
        &self,
        pattern: &str,
        sink: mpsc::UnboundedSender<StoreDelta>,
    ) -> SubscriptionGuard;
}

/// The remote store as a whole.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Ensure a namespace exists and is synchronized before first use.
    async fn populate(&self, namespace: &str) -> Result<(), StoreError>;

    /// Open a handle onto a namespace.
    fn create(&self, namespace: &str) -> Arc<dyn StoreHandle>;
}

// =============================================================================
// BOUNDARY VALIDATION
// =============================================================================

/// Validate a raw store payload into a typed entity. Malformed payloads are
/// rejected as [`SyncError::InvalidPatch`] rather than propagated.
///
/// # Errors
///
/// Returns `InvalidPatch` naming the namespace and key on schema mismatch.
pub fn decode_entity<T: DeserializeOwned>(
    namespace: &str,
    key: &str,
    value: &serde_json::Value,
) -> Result<T, SyncError> {
    serde_json::from_value(value.clone())
        .map_err(|e| SyncError::invalid_patch(namespace, key, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_namespace_round_trip() {
        let ns = page_namespace("page1", NamespaceKind::Shapes);
        assert_eq!(ns, "page1-shapes");
        assert_eq!(split_page_namespace(&ns), Some(("page1", NamespaceKind::Shapes)));
    }

    #[test]
    fn page_ids_containing_dashes_survive_the_split() {
        let id = "3f2c-44aa-bb01";
        let ns = page_namespace(id, NamespaceKind::Bindings);
        assert_eq!(split_page_namespace(&ns), Some((id, NamespaceKind::Bindings)));
    }

    #[test]
    fn flat_namespaces_do_not_split() {
        assert!(split_page_namespace(NS_USERS).is_none());
        assert!(split_page_namespace(NS_PAGE).is_none());
        assert!(split_page_namespace(NS_CONFIG).is_none());
        assert!(split_page_namespace("page1-widgets").is_none());
    }

    #[test]
    fn decode_entity_rejects_malformed_payloads() {
        let bad = serde_json::json!({ "id": 42 });
        let result: Result<canvas::doc::Shape, _> = decode_entity("p1-shapes", "s1", &bad);
        let err = result.unwrap_err();
        assert_eq!(crate::error::ErrorCode::error_code(&err), "E_INVALID_PATCH");
    }

    #[test]
    fn subscription_guard_detaches_once() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        let guard = SubscriptionGuard::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        guard.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let counted = count.clone();
        drop(SubscriptionGuard::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
