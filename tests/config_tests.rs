// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use camera_core::capture::Facing;
use camera_core::config::ConfigError;
use camera_core::notifications::Importance;
use camera_core::{Config, TeardownPolicy};
use std::path::PathBuf;

#[test]
fn test_config_default() {
    // Test that default config can be created
    let config = Config::default();

    // Check sensible defaults
    assert_eq!(config.default_facing, Facing::Back);
    assert_eq!(config.teardown_policy, TeardownPolicy::CompleteInBackground);
    assert_eq!(config.notification.channel_id, "default");
    assert_eq!(config.notification.capture_title, "Photo Captured");
    assert_eq!(config.notification.channel.importance, Importance::Max);
    assert!(config.push_project_id.is_none());
}

#[test]
fn test_config_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let mut config = Config::default();
    config.default_facing = Facing::Front;
    config.teardown_policy = TeardownPolicy::Abandon;
    config.photos_dir = Some(PathBuf::from("/tmp/photos"));
    config.push_project_id = Some("project-1".to_string());
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.photos_dir(), PathBuf::from("/tmp/photos"));
}

#[test]
fn test_partial_config_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "default_facing": "front" }"#).unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.default_facing, Facing::Front);
    assert_eq!(config.teardown_policy, TeardownPolicy::CompleteInBackground);
    assert_eq!(config.notification, Config::default().notification);
}

#[test]
fn test_missing_config_falls_back_to_default() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_or_default(&dir.path().join("absent.json")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_invalid_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(
        Config::load_or_default(&path),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn test_explicit_state_files_are_used() {
    let config = Config {
        permissions_file: Some(PathBuf::from("/state/permissions.json")),
        pending_notifications_file: Some(PathBuf::from("/state/queue.json")),
        ..Config::default()
    };

    assert_eq!(
        config.permissions_file().unwrap(),
        PathBuf::from("/state/permissions.json")
    );
    assert_eq!(
        config.pending_notifications_file().unwrap(),
        PathBuf::from("/state/queue.json")
    );
}
