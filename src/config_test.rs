use super::*;

// =============================================================
// Defaults
// =============================================================

#[test]
fn defaults_are_editor_with_auto_scale() {
    let config = RoomConfig::default();
    assert_eq!(config.role, Role::Editor);
    assert!(config.follow.is_none());
    assert!(config.auto_scale);
    assert!(config.infinite_canvas);
    assert!(!config.dark_mode);
    assert!(!config.zen_mode);
    assert!(!config.is_read_only());
}

// =============================================================
// Remote patches
// =============================================================

#[test]
fn patch_overrides_only_present_keys() {
    let mut config = RoomConfig::default();
    config.apply_patch(&serde_json::json!({ "role": "viewer", "darkMode": true }));
    assert_eq!(config.role, Role::Viewer);
    assert!(config.is_read_only());
    assert!(config.dark_mode);
    // untouched keys keep their defaults
    assert!(config.auto_scale);
    assert!(config.follow.is_none());
}

#[test]
fn patch_sets_and_clears_forced_follow() {
    let mut config = RoomConfig::default();
    config.apply_patch(&serde_json::json!({ "follow": "host-1" }));
    assert_eq!(config.follow.as_deref(), Some("host-1"));

    config.apply_patch(&serde_json::json!({ "follow": null }));
    assert!(config.follow.is_none());

    config.apply_patch(&serde_json::json!({ "follow": "" }));
    assert!(config.follow.is_none());
}

#[test]
fn patch_ignores_non_object_payloads() {
    let mut config = RoomConfig::default();
    config.apply_patch(&serde_json::json!("viewer"));
    assert_eq!(config, RoomConfig::default());
}

#[test]
fn unknown_role_falls_back_to_editor() {
    let mut config = RoomConfig::default();
    config.apply_patch(&serde_json::json!({ "role": "viewer" }));
    config.apply_patch(&serde_json::json!({ "role": "presenter" }));
    assert_eq!(config.role, Role::Editor);
}

// =============================================================
// Serde round trip
// =============================================================

#[test]
fn config_serde_uses_camel_case() {
    let config = RoomConfig { auto_scale: false, ..RoomConfig::default() };
    let value = serde_json::to_value(&config).unwrap();
    assert_eq!(value.get("autoScale"), Some(&serde_json::json!(false)));
    assert_eq!(value.get("infiniteCanvas"), Some(&serde_json::json!(true)));

    let restored: RoomConfig = serde_json::from_value(value).unwrap();
    assert_eq!(restored, config);
}
