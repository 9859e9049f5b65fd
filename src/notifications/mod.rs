// SPDX-License-Identifier: GPL-3.0-only

//! User-visible notifications
//!
//! Notifications are side effects: a failed notification is logged and
//! reported to an error sink, but never undoes work that already happened.

pub mod center;
pub mod dispatcher;

pub use dispatcher::{ErrorSink, NotificationDispatcher};

use crate::constants;
use crate::errors::HostError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// When a notification should fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    /// As soon as the host accepts it
    Immediate,
    /// At a wall-clock time; survives app suspension
    DelayedUntil(DateTime<Utc>),
}

/// A notification to show to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub trigger: Trigger,
    pub channel_id: String,
    /// Arbitrary payload handed back to the app when the user taps it
    #[serde(default)]
    pub data: serde_json::Value,
}

impl NotificationRequest {
    /// Immediate notification on the default channel
    pub fn immediate(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            trigger: Trigger::Immediate,
            channel_id: constants::DEFAULT_CHANNEL_ID.to_string(),
            data: serde_json::Value::Null,
        }
    }

    /// Delayed notification on the default channel
    pub fn delayed(
        title: impl Into<String>,
        body: impl Into<String>,
        fire_at: DateTime<Utc>,
    ) -> Self {
        Self {
            trigger: Trigger::DelayedUntil(fire_at),
            ..Self::immediate(title, body)
        }
    }

    pub fn on_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = channel_id.into();
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Channel importance (maps to urgency on hosts without channels)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Importance {
    Min,
    Low,
    #[default]
    Default,
    High,
    Max,
}

/// Platform notification channel settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub importance: Importance,
    /// Alternating off/on durations in milliseconds
    pub vibration_pattern: Vec<u32>,
    /// ARGB hex colour, e.g. "#FF231F7C"
    pub light_color: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: constants::DEFAULT_CHANNEL_ID.to_string(),
            importance: Importance::Max,
            vibration_pattern: constants::DEFAULT_VIBRATION_PATTERN.to_vec(),
            light_color: constants::DEFAULT_LIGHT_COLOR.to_string(),
        }
    }
}

/// How notifications are presented while the app is in the foreground
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationOptions {
    pub show_alert: bool,
    pub play_sound: bool,
    pub set_badge: bool,
}

impl Default for PresentationOptions {
    fn default() -> Self {
        Self {
            show_alert: true,
            play_sound: false,
            set_badge: false,
        }
    }
}

/// Caller-side handle of a scheduled notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationHandle(pub Uuid);

impl std::fmt::Display for NotificationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier the host assigned to a presented or queued notification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostNotificationId(pub String);

/// Push registration for this install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRegistration {
    pub token: String,
    /// Channel set up for push delivery on hosts that need one
    pub channel: Option<ChannelConfig>,
    pub registered_at: DateTime<Utc>,
}

/// Host notification subsystem
#[async_trait]
pub trait NotificationHost: Send + Sync {
    /// Whether notifications must target a configured channel
    fn requires_channels(&self) -> bool;

    async fn configure_channel(&self, id: &str, config: &ChannelConfig) -> Result<(), HostError>;

    /// Hand a notification to the host
    ///
    /// Returns once the host accepted it. Delayed triggers are queued by the
    /// host and must survive app suspension.
    async fn present(
        &self,
        request: &NotificationRequest,
        presentation: &PresentationOptions,
    ) -> Result<HostNotificationId, HostError>;

    /// Remove a queued or displayed notification
    async fn cancel(&self, id: &HostNotificationId) -> Result<(), HostError>;

    /// Obtain a push token for the given project
    async fn push_token(&self, project_id: &str) -> Result<String, HostError>;
}
