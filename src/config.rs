// SPDX-License-Identifier: GPL-3.0-only

//! User configuration, stored as JSON in the config directory

use crate::capture::Facing;
use crate::constants::{self, files};
use crate::notifications::{ChannelConfig, PresentationOptions};
use crate::pipeline::TeardownPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No config directory on this system")]
    NoConfigDir,
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Notification settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Channel used for capture notifications
    pub channel_id: String,
    pub channel: ChannelConfig,
    /// Title of the notification sent after a capture
    pub capture_title: String,
    pub presentation: PresentationOptions,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            channel_id: constants::DEFAULT_CHANNEL_ID.to_string(),
            channel: ChannelConfig::default(),
            capture_title: constants::CAPTURE_NOTIFICATION_TITLE.to_string(),
            presentation: PresentationOptions::default(),
        }
    }
}

/// Still images standing in for each lens on desktop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSources {
    pub front: Option<PathBuf>,
    pub back: Option<PathBuf>,
}

impl CaptureSources {
    pub fn for_facing(&self, facing: Facing) -> Option<&Path> {
        match facing {
            Facing::Front => self.front.as_deref(),
            Facing::Back => self.back.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where photos are stored (default: ~/Pictures/camera-core)
    pub photos_dir: Option<PathBuf>,
    /// Lens used when none is requested
    pub default_facing: Facing,
    /// What happens to a capture when the screen goes away mid-flight
    pub teardown_policy: TeardownPolicy,
    pub notification: NotificationSettings,
    /// Project used to request push tokens
    pub push_project_id: Option<String>,
    pub capture_sources: CaptureSources,
    /// Remembered permission answers (default: <config dir>/permissions.json)
    pub permissions_file: Option<PathBuf>,
    /// Queue of delayed notifications (default: <config dir>/pending_notifications.json)
    pub pending_notifications_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            photos_dir: None,
            default_facing: Facing::Back,
            teardown_policy: TeardownPolicy::default(),
            notification: NotificationSettings::default(),
            push_project_id: None,
            capture_sources: CaptureSources::default(),
            permissions_file: None,
            pending_notifications_file: None,
        }
    }
}

impl Config {
    /// Directory holding the config file and other state
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(constants::APP_ID))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Default location of the config file
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(files::CONFIG))
    }

    /// Load a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Load a config file, falling back to defaults if it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Write the config file, creating its directory
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, text).map_err(io_error)?;

        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Resolved photo directory
    pub fn photos_dir(&self) -> PathBuf {
        self.photos_dir.clone().unwrap_or_else(|| {
            dirs::picture_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(constants::APP_ID)
        })
    }

    /// Resolved permission store path
    pub fn permissions_file(&self) -> Result<PathBuf, ConfigError> {
        match &self.permissions_file {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join(files::PERMISSIONS)),
        }
    }

    /// Resolved delayed-notification queue path
    pub fn pending_notifications_file(&self) -> Result<PathBuf, ConfigError> {
        match &self.pending_notifications_file {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join(files::PENDING_NOTIFICATIONS)),
        }
    }
}
