//! Document-engine model for the collaborative whiteboard sync core.
//!
//! This crate owns the local, in-memory side of the shared document: typed
//! entities (shapes, bindings, assets, pages, presence users), the multi-page
//! document store, and the camera. The sync layer in the root crate drives it
//! through [`engine::Engine`] — applying remote mutations, diffing local edit
//! batches, and steering the camera while following a peer. Rendering,
//! hit-testing, and tool gestures belong to the host drawing surface, not
//! here.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`engine`] | Engine facade the sync layer programs against |
//! | [`doc`] | Entity types and the multi-page document store |
//! | [`camera`] | Pan/zoom camera, content bounds, fit math |

pub mod camera;
pub mod doc;
pub mod engine;
