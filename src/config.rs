//! Room configuration and environment loading.
//!
//! The host environment sets the initial configuration once at session
//! start; remote `config` patches override individual fields at runtime.
//! A viewer role turns the whole outbound path into a no-op, and a
//! configured `follow` target forces the session into follow mode
//! regardless of manual follow state.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use serde::{Deserialize, Serialize};

/// What the local participant is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Editor,
    Viewer,
}

/// Process-wide room configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomConfig {
    pub role: Role,
    /// Forced followee: when set, the session always tracks this peer.
    pub follow: Option<String>,
    /// Fit the camera to content after remote mutations.
    pub auto_scale: bool,
    pub dark_mode: bool,
    pub zen_mode: bool,
    /// When false the camera is clamped to the content bounds.
    pub infinite_canvas: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            role: Role::Editor,
            follow: None,
            auto_scale: true,
            dark_mode: false,
            zen_mode: false,
            infinite_canvas: true,
        }
    }
}

impl RoomConfig {
    /// Load configuration from `SYNCBOARD_*` environment variables,
    /// falling back to defaults. Reads a `.env` file if present.
    #[must_use]
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let role = match std::env::var("SYNCBOARD_ROLE").ok().as_deref() {
            Some("viewer") => Role::Viewer,
            _ => Role::Editor,
        };
        Self {
            role,
            follow: std::env::var("SYNCBOARD_FOLLOW").ok().filter(|v| !v.is_empty()),
            auto_scale: env_parse("SYNCBOARD_AUTO_SCALE", true),
            dark_mode: env_parse("SYNCBOARD_DARK_MODE", false),
            zen_mode: env_parse("SYNCBOARD_ZEN_MODE", false),
            infinite_canvas: env_parse("SYNCBOARD_INFINITE_CANVAS", true),
        }
    }

    /// Apply a partial remote patch. Only keys present in the patch change;
    /// an explicit `null` clears the forced follow.
    pub fn apply_patch(&mut self, patch: &serde_json::Value) {
        let Some(map) = patch.as_object() else {
            return;
        };
        if let Some(role) = map.get("role").and_then(|v| v.as_str()) {
            self.role = if role == "viewer" { Role::Viewer } else { Role::Editor };
        }
        if let Some(follow) = map.get("follow") {
            self.follow = follow.as_str().filter(|s| !s.is_empty()).map(str::to_owned);
        }
        if let Some(v) = map.get("autoScale").and_then(serde_json::Value::as_bool) {
            self.auto_scale = v;
        }
        if let Some(v) = map.get("darkMode").and_then(serde_json::Value::as_bool) {
            self.dark_mode = v;
        }
        if let Some(v) = map.get("zenMode").and_then(serde_json::Value::as_bool) {
            self.zen_mode = v;
        }
        if let Some(v) = map.get("infiniteCanvas").and_then(serde_json::Value::as_bool) {
            self.infinite_canvas = v;
        }
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.role == Role::Viewer
    }
}

/// Parse an environment variable, falling back to a default.
pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
