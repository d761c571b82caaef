//! Synchronization core for a multiplayer whiteboard.
//!
//! Reconciles each participant's local document engine with a shared,
//! eventually-consistent key/value store, while running a presence/follow
//! protocol over a low-latency broadcast channel: peer roster and live
//! cursors, follow-request handshakes with chain propagation, transitive
//! unfollow, and camera following with viewport-ratio correction.
//!
//! The drawing surface, the store, the event channel, and the binary asset
//! endpoints are external collaborators consumed through capability traits
//! ([`store::RemoteStore`], [`bus::EventBus`], [`assets::AssetStore`]);
//! in-memory reference implementations back tests and offline rooms. A
//! [`session::Session`] wires one participant's components together.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`session`] | Per-participant wiring and host-facing callbacks |
//! | [`reconciler`] | Store ↔ document reconciliation engine |
//! | [`follow`] | Follow/unfollow state machine |
//! | [`presence`] | Peer roster and throttled presence broadcasts |
//! | [`camera`] | Follow camera, auto-fit, canvas limiting |
//! | [`pages`] | Page namespaces and the shared current-page pointer |
//! | [`assets`] | Binary asset endpoints and image-shape synthesis |
//! | [`store`] | Remote store boundary and schema validation |
//! | [`bus`] | Event bus boundary and typed messages |
//! | [`sched`] | Debounce/throttle with an injectable clock |
//! | [`config`] | Room configuration |
//! | [`error`] | Error taxonomy |
//! | [`telemetry`] | Tracing bootstrap |

pub mod assets;
pub mod bus;
pub mod camera;
pub mod config;
pub mod error;
pub mod follow;
pub mod pages;
pub mod presence;
pub mod reconciler;
pub mod sched;
pub mod session;
pub mod store;
pub mod telemetry;

pub use config::{Role, RoomConfig};
pub use error::{ErrorCode, SyncError};
pub use session::{Session, SessionIdentity};
