// SPDX-License-Identifier: GPL-3.0-only

//! Host implementations behind the capability traits
//!
//! The orchestration layer only sees the traits; this module provides the
//! implementations it runs against:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │   PermissionGate / CaptureController /      │
//! │   PersistenceSink / NotificationDispatcher  │
//! └────────────────────┬────────────────────────┘
//!                      │ traits
//! ┌────────────────────┴────────────────────────┐
//! │  desktop                 │  memory          │
//! │  prompt      (terminal)  │  scriptable      │
//! │  file_source (stills)    │  fakes for       │
//! │  library     (dir)       │  tests and       │
//! │  freedesktop (D-Bus)     │  demos           │
//! └─────────────────────────────────────────────┘
//! ```

pub mod file_source;
pub mod freedesktop;
pub mod library;
pub mod memory;
pub mod prompt;

use crate::capture::CaptureHost;
use crate::config::{Config, ConfigError};
use crate::notifications::NotificationHost;
use crate::permissions::PermissionHost;
use crate::storage::StorageHost;
use std::sync::Arc;

pub use file_source::FileCamera;
pub use freedesktop::DesktopNotifier;
pub use library::PhotoLibrary;
pub use prompt::TerminalPermissions;

/// The desktop host set built from user configuration
pub struct DesktopHosts {
    pub permissions: Arc<TerminalPermissions>,
    pub camera: Arc<FileCamera>,
    pub library: Arc<PhotoLibrary>,
    pub notifier: Arc<DesktopNotifier>,
}

impl DesktopHosts {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            permissions: Arc::new(TerminalPermissions::new(config.permissions_file()?)),
            camera: Arc::new(FileCamera::new(config.capture_sources.clone())),
            library: Arc::new(PhotoLibrary::new(config.photos_dir())),
            notifier: Arc::new(DesktopNotifier::new(
                config.notification.channel.importance,
                Some(config.pending_notifications_file()?),
            )),
        })
    }

    pub fn permission_host(&self) -> Arc<dyn PermissionHost> {
        self.permissions.clone()
    }

    pub fn capture_host(&self) -> Arc<dyn CaptureHost> {
        self.camera.clone()
    }

    pub fn storage_host(&self) -> Arc<dyn StorageHost> {
        self.library.clone()
    }

    pub fn notification_host(&self) -> Arc<dyn NotificationHost> {
        self.notifier.clone()
    }
}
