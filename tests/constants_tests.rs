// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use camera_core::constants::{self, file_formats};

#[test]
fn test_image_extensions() {
    for ext in ["jpg", "jpeg", "png"] {
        assert!(file_formats::is_image_extension(ext), "{} should be accepted", ext);
    }
    assert!(!file_formats::is_image_extension("mp4"));
    assert!(!file_formats::is_image_extension("txt"));
}

#[test]
fn test_extensions_are_lowercase() {
    // Callers lowercase before checking
    for ext in file_formats::IMAGE_EXTENSIONS {
        assert_eq!(*ext, ext.to_ascii_lowercase());
    }
}

#[test]
fn test_default_channel() {
    assert_eq!(constants::DEFAULT_CHANNEL_ID, "default");
    assert_eq!(constants::DEFAULT_VIBRATION_PATTERN, [0, 250, 250, 250]);
    assert_eq!(constants::DEFAULT_LIGHT_COLOR, "#FF231F7C");
}
