//! Error taxonomy for the sync core.
//!
//! ERROR HANDLING
//! ==============
//! Nothing in this crate is fatal to the process. Patch application is
//! guarded per entity so one bad payload never aborts a batch; binary I/O
//! failures are surfaced to the user and never retried automatically. The
//! worst case is a dropped mutation, recoverable by the next edit or a full
//! resync. Stale cross-page writes are expected during concurrent
//! multi-page editing and are dropped silently rather than surfaced — they
//! appear as a reconciler outcome, not as an error here.

use crate::bus::BusError;
use crate::store::StoreError;

/// Grepable error code and retryable flag for structured error reporting.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    /// Whether the user may reasonably re-attempt the operation.
    fn retryable(&self) -> bool {
        false
    }
}

/// Everything that can go wrong inside the sync core.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The document engine rejected a patch, or a store payload failed
    /// schema validation at the boundary.
    #[error("invalid patch for {namespace}/{key}: {reason}")]
    InvalidPatch {
        namespace: String,
        key: String,
        reason: String,
    },
    /// Binary asset upload failed.
    #[error("asset upload failed: {0}")]
    UploadFailure(String),
    /// Binary asset delete failed.
    #[error("asset delete failed for {asset_id}: {reason}")]
    DeleteFailure { asset_id: String, reason: String },
    /// The target of a follow request is already following the local user.
    #[error("can't follow {0}: they are following you")]
    FollowCycleRejected(String),
    /// A roster entry was missing its required id or failed to decode.
    #[error("unusable roster entry: {0}")]
    UserLoadFailure(String),
    /// Export was requested on a board with no shapes.
    #[error("can't capture an empty board")]
    EmptyBoard,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("event bus error: {0}")]
    Bus(#[from] BusError),
    #[error("document error: {0}")]
    Doc(#[from] canvas::doc::DocError),
}

impl ErrorCode for SyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPatch { .. } => "E_INVALID_PATCH",
            Self::UploadFailure(_) => "E_UPLOAD_FAILED",
            Self::DeleteFailure { .. } => "E_DELETE_FAILED",
            Self::FollowCycleRejected(_) => "E_FOLLOW_CYCLE",
            Self::UserLoadFailure(_) => "E_USER_LOAD",
            Self::EmptyBoard => "E_EMPTY_BOARD",
            Self::Store(_) => "E_STORE",
            Self::Bus(_) => "E_BUS",
            Self::Doc(_) => "E_DOC",
        }
    }

    fn retryable(&self) -> bool {
        matches!(
            self,
            Self::UploadFailure(_) | Self::DeleteFailure { .. } | Self::Store(_) | Self::Bus(_)
        )
    }
}

impl SyncError {
    /// Build an `InvalidPatch` from a failed schema validation or a rejected
    /// engine call.
    pub fn invalid_patch(
        namespace: impl Into<String>,
        key: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::InvalidPatch {
            namespace: namespace.into(),
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            SyncError::invalid_patch("p1-shapes", "s1", "bad").error_code(),
            "E_INVALID_PATCH"
        );
        assert_eq!(SyncError::EmptyBoard.error_code(), "E_EMPTY_BOARD");
        assert_eq!(
            SyncError::FollowCycleRejected("u2".into()).error_code(),
            "E_FOLLOW_CYCLE"
        );
    }

    #[test]
    fn io_failures_are_retryable() {
        assert!(SyncError::UploadFailure("timeout".into()).retryable());
        assert!(
            SyncError::DeleteFailure { asset_id: "a1".into(), reason: "410".into() }.retryable()
        );
        assert!(!SyncError::EmptyBoard.retryable());
        assert!(!SyncError::FollowCycleRejected("u2".into()).retryable());
    }

    #[test]
    fn display_names_the_entity() {
        let err = SyncError::invalid_patch("p1-shapes", "s9", "missing field `point`");
        let text = err.to_string();
        assert!(text.contains("p1-shapes"));
        assert!(text.contains("s9"));
    }
}
