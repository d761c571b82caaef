//! Asset lifecycle: binary storage boundary, shape synthesis, pending
//! archive.
//!
//! DESIGN
//! ======
//! An uploaded binary becomes an [`Asset`] record in the page's asset
//! namespace; every peer synthesizes an image shape for it the first time
//! the record is seen. A shape that arrives *before* its asset is parked in
//! the [`AssetArchive`] and materialized once the asset record lands, so
//! both arrival orders converge to the same document. Deleting the shape
//! deletes the backing binary exactly once.

#[cfg(test)]
#[path = "assets_test.rs"]
mod assets_test;

use std::collections::HashMap;
use std::time::Duration;

use canvas::camera::Viewport;
use canvas::doc::{self, Asset, Shape, ShapeKind, Style};

use crate::error::SyncError;

const REQUEST_TIMEOUT_SECS: u64 = 60;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Fraction of the viewport an oversized asset is scaled down to.
const VIEWPORT_FIT_FRACTION: f64 = 0.8;

// =============================================================================
// CAPABILITY TRAIT
// =============================================================================

/// The host's binary asset endpoints.
#[async_trait::async_trait]
pub trait AssetStore: Send + Sync {
    /// Upload a binary and return its download URL.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UploadFailure`] on I/O or protocol errors.
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, SyncError>;

    /// Delete the binary backing an asset.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DeleteFailure`] on I/O or protocol errors.
    async fn delete(&self, asset_id: &str) -> Result<(), SyncError>;
}

// =============================================================================
// HTTP BACKEND
// =============================================================================

/// HTTP implementation of the asset endpoints: `POST {base}/file` uploads a
/// multipart form, `DELETE {base}/file/{id}` removes the binary. Requests
/// carry a bearer token issued by the host session.
pub struct HttpAssetStore {
    http: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl HttpAssetStore {
    /// Build the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `UploadFailure` if the client cannot be constructed.
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| SyncError::UploadFailure(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            auth_token: auth_token.into(),
        })
    }
}

#[derive(serde::Deserialize)]
struct UploadResponse {
    link: String,
}

#[async_trait::async_trait]
impl AssetStore for HttpAssetStore {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, SyncError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_owned());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/file", self.base_url))
            .bearer_auth(&self.auth_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SyncError::UploadFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::UploadFailure(format!("status {status}")));
        }
        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| SyncError::UploadFailure(e.to_string()))?;
        Ok(format!("{}/file/{}", self.base_url, body.link))
    }

    async fn delete(&self, asset_id: &str) -> Result<(), SyncError> {
        let response = self
            .http
            .delete(format!("{}/file/{asset_id}", self.base_url))
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(|e| SyncError::DeleteFailure {
                asset_id: asset_id.to_owned(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::DeleteFailure {
                asset_id: asset_id.to_owned(),
                reason: format!("status {status}"),
            });
        }
        Ok(())
    }
}

// =============================================================================
// IN-MEMORY BACKEND
// =============================================================================

/// Recording asset store for tests and offline use.
#[derive(Default)]
pub struct MemoryAssetStore {
    state: std::sync::Mutex<MemoryAssetState>,
}

#[derive(Default)]
struct MemoryAssetState {
    uploads: Vec<String>,
    deletes: Vec<String>,
    fail_requests: bool,
}

impl MemoryAssetStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent uploads and deletes fail, for error-path tests.
    pub fn fail_requests(&self, fail: bool) {
        self.state.lock().expect("asset store lock poisoned").fail_requests = fail;
    }

    /// File names uploaded so far.
    #[must_use]
    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().expect("asset store lock poisoned").uploads.clone()
    }

    /// Asset ids deleted so far.
    #[must_use]
    pub fn deletes(&self) -> Vec<String> {
        self.state.lock().expect("asset store lock poisoned").deletes.clone()
    }
}

#[async_trait::async_trait]
impl AssetStore for MemoryAssetStore {
    async fn upload(&self, file_name: &str, _bytes: Vec<u8>) -> Result<String, SyncError> {
        let mut state = self.state.lock().expect("asset store lock poisoned");
        if state.fail_requests {
            return Err(SyncError::UploadFailure("injected failure".into()));
        }
        state.uploads.push(file_name.to_owned());
        Ok(format!("mem://file/{file_name}"))
    }

    async fn delete(&self, asset_id: &str) -> Result<(), SyncError> {
        let mut state = self.state.lock().expect("asset store lock poisoned");
        if state.fail_requests {
            return Err(SyncError::DeleteFailure {
                asset_id: asset_id.to_owned(),
                reason: "injected failure".into(),
            });
        }
        state.deletes.push(asset_id.to_owned());
        Ok(())
    }
}

// =============================================================================
// SHAPE SYNTHESIS
// =============================================================================

/// Scale an asset's natural size so it fits the viewport: assets
/// proportionally taller than the viewport are scaled to a fraction of the
/// viewport height, everything else keeps its natural size.
#[must_use]
pub fn fit_asset_size(size: [f64; 2], viewport: &Viewport) -> [f64; 2] {
    let [width, height] = size;
    if width <= 0.0 || viewport.width <= 0.0 {
        return size;
    }
    let ratio = height / width;
    let viewport_ratio = viewport.height / viewport.width;
    if ratio > viewport_ratio {
        [
            (viewport.height / ratio) * VIEWPORT_FIT_FRACTION,
            viewport.height * VIEWPORT_FIT_FRACTION,
        ]
    } else {
        size
    }
}

/// Build the image shape rendering an asset on first sight. The shape takes
/// the asset's recorded position when present, otherwise it is centered in
/// the viewport.
#[must_use]
pub fn synthesize_shape(asset: &Asset, page_id: &str, viewport: &Viewport) -> Shape {
    let size = fit_asset_size(asset.size, viewport);
    let point = asset.point.unwrap_or([
        (viewport.width - size[0]) / 2.0,
        (viewport.height - size[1]) / 2.0,
    ]);
    Shape {
        id: doc::new_id(),
        kind: ShapeKind::Image,
        parent_id: page_id.to_owned(),
        point,
        size: Some(size),
        rotation: 0.0,
        style: Style::default(),
        asset_id: Some(asset.id.clone()),
    }
}

// =============================================================================
// PENDING ARCHIVE
// =============================================================================

/// Holding area for shapes whose referenced asset has not arrived yet,
/// keyed by asset id.
#[derive(Debug, Default)]
pub struct AssetArchive {
    pending: HashMap<String, Shape>,
}

impl AssetArchive {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a shape until its asset arrives. A newer shape for the same
    /// asset replaces the parked one.
    pub fn insert(&mut self, asset_id: impl Into<String>, shape: Shape) {
        self.pending.insert(asset_id.into(), shape);
    }

    /// Claim the parked shape for an asset, if any.
    pub fn take(&mut self, asset_id: &str) -> Option<Shape> {
        self.pending.remove(asset_id)
    }

    #[must_use]
    pub fn contains(&self, asset_id: &str) -> bool {
        self.pending.contains_key(asset_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
