// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

/// Application identifier, used for config and data directories
pub const APP_ID: &str = "camera-core";

/// Application name shown by the notification daemon
pub const APP_NAME: &str = "Camera";

/// Prefix of stored photo file names
pub const PHOTO_FILE_PREFIX: &str = "IMG";

/// Notification defaults
pub const DEFAULT_CHANNEL_ID: &str = "default";
pub const DEFAULT_VIBRATION_PATTERN: [u32; 4] = [0, 250, 250, 250];
pub const DEFAULT_LIGHT_COLOR: &str = "#FF231F7C";

/// Title of the notification sent after a photo was saved
pub const CAPTURE_NOTIFICATION_TITLE: &str = "Photo Captured";

/// File names inside the config directory
pub mod files {
    pub const CONFIG: &str = "config.json";
    pub const PERMISSIONS: &str = "permissions.json";
    pub const PENDING_NOTIFICATIONS: &str = "pending_notifications.json";
}

/// Image extensions accepted as still sources
pub mod file_formats {
    pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "tiff", "tif"];

    pub fn is_image_extension(ext: &str) -> bool {
        IMAGE_EXTENSIONS.contains(&ext)
    }
}
