// SPDX-License-Identifier: GPL-3.0-only

//! Desktop notifications via the freedesktop notification daemon
//!
//! Immediate notifications go straight to `org.freedesktop.Notifications`
//! on the session bus. The daemon has no scheduling, so delayed ones are
//! held by a timer task and mirrored to a JSON queue file; a later process
//! picks them up again with [`DesktopNotifier::restore_pending`].

use crate::constants;
use crate::errors::HostError;
use crate::notifications::{
    ChannelConfig, HostNotificationId, Importance, NotificationHost, NotificationRequest,
    PresentationOptions, Trigger,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zbus::zvariant::Value;

const BUS_NAME: &str = "org.freedesktop.Notifications";
const OBJECT_PATH: &str = "/org/freedesktop/Notifications";
const INTERFACE: &str = "org.freedesktop.Notifications";
const APP_ICON: &str = "camera-photo";
const PENDING_PREFIX: &str = "pending-";

/// Delayed notification as stored in the queue file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueuedNotification {
    id: String,
    request: NotificationRequest,
    presentation: PresentationOptions,
}

struct Pending {
    queued: QueuedNotification,
    task: JoinHandle<()>,
}

struct Inner {
    app_name: String,
    importance: Importance,
    queue_path: Option<PathBuf>,
    pending: Mutex<HashMap<String, Pending>>,
    /// Held from snapshot to rename so the newest snapshot lands last
    persist_lock: tokio::sync::Mutex<()>,
    connection: OnceCell<zbus::Connection>,
}

/// Notification host talking to the desktop notification daemon
pub struct DesktopNotifier {
    inner: Arc<Inner>,
}

impl DesktopNotifier {
    /// Create a notifier; `queue_path` persists delayed notifications
    pub fn new(importance: Importance, queue_path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                app_name: constants::APP_NAME.to_string(),
                importance,
                queue_path,
                pending: Mutex::new(HashMap::new()),
                persist_lock: tokio::sync::Mutex::new(()),
                connection: OnceCell::new(),
            }),
        }
    }

    /// Re-arm delayed notifications left in the queue file by an earlier run
    ///
    /// Notifications whose time has passed fire right away.
    pub async fn restore_pending(&self) -> Result<usize, HostError> {
        let Some(path) = self.inner.queue_path.as_ref() else {
            return Ok(0);
        };

        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let queued: Vec<QueuedNotification> = serde_json::from_str(&text)
            .map_err(|e| HostError::Other(format!("invalid {}: {}", path.display(), e)))?;

        let mut count = 0;
        for entry in queued {
            if self.inner.lock_pending().contains_key(&entry.id) {
                continue;
            }
            self.inner.arm(entry);
            count += 1;
        }

        info!(count, "Restored pending notifications");
        Ok(count)
    }

    /// Number of delayed notifications waiting to fire
    pub fn pending_count(&self) -> usize {
        self.inner.lock_pending().len()
    }
}

impl std::fmt::Debug for DesktopNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DesktopNotifier")
            .field("importance", &self.inner.importance)
            .field("queue_path", &self.inner.queue_path)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Inner {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn connection(&self) -> Result<&zbus::Connection, HostError> {
        self.connection
            .get_or_try_init(|| async {
                zbus::Connection::session().await.map_err(|e| {
                    HostError::Unsupported(format!("Failed to connect to session D-Bus: {}", e))
                })
            })
            .await
    }

    async fn notify(
        &self,
        request: &NotificationRequest,
        presentation: &PresentationOptions,
    ) -> Result<u32, HostError> {
        let connection = self.connection().await?;
        let proxy = zbus::Proxy::new(connection, BUS_NAME, OBJECT_PATH, INTERFACE)
            .await
            .map_err(|e| HostError::Unsupported(format!("Failed to create notification proxy: {}", e)))?;

        let mut hints: HashMap<&str, Value> = HashMap::new();
        hints.insert("urgency", Value::new(urgency(self.importance)));
        hints.insert("desktop-entry", Value::new(constants::APP_ID));
        if !presentation.play_sound {
            hints.insert("suppress-sound", Value::new(true));
        }
        let actions: Vec<&str> = Vec::new();
        let replaces_id = 0u32;
        let expire_timeout = -1i32;

        let id: u32 = proxy
            .call(
                "Notify",
                &(
                    self.app_name.as_str(),
                    replaces_id,
                    APP_ICON,
                    request.title.as_str(),
                    request.body.as_str(),
                    actions,
                    hints,
                    expire_timeout,
                ),
            )
            .await
            .map_err(|e| HostError::Rejected(format!("Notify failed: {}", e)))?;

        debug!(id, title = %request.title, "Notification shown");
        Ok(id)
    }

    async fn close(&self, id: u32) -> Result<(), HostError> {
        let connection = self.connection().await?;
        let proxy = zbus::Proxy::new(connection, BUS_NAME, OBJECT_PATH, INTERFACE)
            .await
            .map_err(|e| HostError::Unsupported(format!("Failed to create notification proxy: {}", e)))?;

        let () = proxy
            .call("CloseNotification", &(id,))
            .await
            .map_err(|e| HostError::Rejected(format!("CloseNotification failed: {}", e)))?;
        Ok(())
    }

    /// Start the timer for a delayed notification and track it
    fn arm(self: &Arc<Self>, queued: QueuedNotification) {
        let delay = match queued.request.trigger {
            Trigger::DelayedUntil(at) => (at - Utc::now()).to_std().unwrap_or_default(),
            Trigger::Immediate => std::time::Duration::ZERO,
        };

        let inner = Arc::clone(self);
        let entry = queued.clone();

        // Held across spawn so the task cannot finish before it is tracked
        let mut pending = self.lock_pending();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if let Err(e) = inner.notify(&entry.request, &entry.presentation).await {
                error!(id = %entry.id, error = %e, "Failed to show delayed notification");
            }

            inner.lock_pending().remove(&entry.id);
            inner.persist().await;
        });

        debug!(id = %queued.id, delay_secs = delay.as_secs(), "Delayed notification armed");
        pending.insert(queued.id.clone(), Pending { queued, task });
    }

    /// Mirror pending notifications to the queue file
    async fn persist(&self) {
        let Some(path) = self.queue_path.as_ref() else {
            return;
        };

        let _persisting = self.persist_lock.lock().await;
        let queued: Vec<QueuedNotification> = {
            let pending = self.lock_pending();
            let mut queued: Vec<_> = pending.values().map(|p| p.queued.clone()).collect();
            queued.sort_by(|a, b| a.id.cmp(&b.id));
            queued
        };

        let text = match serde_json::to_string_pretty(&queued) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode notification queue");
                return;
            }
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %parent.display(), error = %e, "Failed to create queue directory");
                return;
            }
        }
        let partial = path.with_extension("json.partial");
        if let Err(e) = tokio::fs::write(&partial, text).await {
            warn!(path = %partial.display(), error = %e, "Failed to write notification queue");
            return;
        }
        if let Err(e) = tokio::fs::rename(&partial, path).await {
            warn!(path = %path.display(), error = %e, "Failed to replace notification queue");
            let _ = tokio::fs::remove_file(&partial).await;
        }
    }
}

/// Freedesktop urgency levels: 0 low, 1 normal, 2 critical
fn urgency(importance: Importance) -> u8 {
    match importance {
        Importance::Min | Importance::Low => 0,
        Importance::Default | Importance::High => 1,
        Importance::Max => 2,
    }
}

#[async_trait]
impl NotificationHost for DesktopNotifier {
    fn requires_channels(&self) -> bool {
        false
    }

    async fn configure_channel(&self, id: &str, _config: &ChannelConfig) -> Result<(), HostError> {
        debug!(channel = id, "Desktop notifications have no channels");
        Ok(())
    }

    async fn present(
        &self,
        request: &NotificationRequest,
        presentation: &PresentationOptions,
    ) -> Result<HostNotificationId, HostError> {
        match request.trigger {
            Trigger::Immediate => {
                if !presentation.show_alert {
                    debug!(title = %request.title, "Alerts disabled, notification suppressed");
                    return Ok(HostNotificationId(format!("silent-{}", uuid::Uuid::new_v4())));
                }
                let id = self.inner.notify(request, presentation).await?;
                Ok(HostNotificationId(id.to_string()))
            }
            Trigger::DelayedUntil(at) => {
                let id = format!("{}{}", PENDING_PREFIX, uuid::Uuid::new_v4());
                self.inner.arm(QueuedNotification {
                    id: id.clone(),
                    request: request.clone(),
                    presentation: *presentation,
                });
                self.inner.persist().await;

                info!(id = %id, at = %at, "Notification scheduled");
                Ok(HostNotificationId(id))
            }
        }
    }

    async fn cancel(&self, id: &HostNotificationId) -> Result<(), HostError> {
        if id.0.starts_with(PENDING_PREFIX) {
            let removed = self.inner.lock_pending().remove(&id.0);
            if let Some(pending) = removed {
                pending.task.abort();
                self.inner.persist().await;
                debug!(id = %id.0, "Pending notification cancelled");
            }
            return Ok(());
        }

        match id.0.parse::<u32>() {
            Ok(daemon_id) => self.inner.close(daemon_id).await,
            Err(_) => Ok(()),
        }
    }

    async fn push_token(&self, _project_id: &str) -> Result<String, HostError> {
        Err(HostError::Unsupported(
            "push notifications are not available on the desktop".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn read_queue(path: &std::path::Path) -> Vec<QueuedNotification> {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_urgency_mapping() {
        assert_eq!(urgency(Importance::Min), 0);
        assert_eq!(urgency(Importance::Default), 1);
        assert_eq!(urgency(Importance::Max), 2);
    }

    #[tokio::test]
    async fn test_delayed_notifications_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let queue = dir.path().join("pending.json");
        let request = NotificationRequest::delayed("Reminder", "Later", Utc::now() + Duration::hours(1));

        let notifier = DesktopNotifier::new(Importance::Max, Some(queue.clone()));
        let id = notifier
            .present(&request, &PresentationOptions::default())
            .await
            .unwrap();
        assert!(id.0.starts_with(PENDING_PREFIX));
        assert_eq!(notifier.pending_count(), 1);

        let stored = read_queue(&queue);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].request, request);

        let restarted = DesktopNotifier::new(Importance::Max, Some(queue.clone()));
        assert_eq!(restarted.restore_pending().await.unwrap(), 1);
        assert_eq!(restarted.pending_count(), 1);

        restarted.cancel(&id).await.unwrap();
        assert_eq!(restarted.pending_count(), 0);
        assert!(read_queue(&queue).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queue_file_matches_pending_after_concurrent_updates() {
        let dir = tempfile::tempdir().unwrap();
        let queue = dir.path().join("pending.json");
        let notifier = Arc::new(DesktopNotifier::new(Importance::Max, Some(queue.clone())));
        let fire_at = Utc::now() + Duration::hours(1);

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let notifier = notifier.clone();
                tokio::spawn(async move {
                    let request =
                        NotificationRequest::delayed(format!("Reminder {}", i), "Later", fire_at);
                    let id = notifier
                        .present(&request, &PresentationOptions::default())
                        .await
                        .unwrap();
                    if i % 2 == 0 {
                        notifier.cancel(&id).await.unwrap();
                    }
                })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap();
        }

        assert_eq!(notifier.pending_count(), 8);
        let stored = read_queue(&queue);
        assert_eq!(stored.len(), 8);
        // Only the odd reminders were left uncancelled
        for queued in &stored {
            let n: u32 = queued.request.title["Reminder ".len()..].parse().unwrap();
            assert_eq!(n % 2, 1, "{}", queued.request.title);
        }
        assert!(!dir.path().join("pending.json.partial").exists());
    }

    #[tokio::test]
    async fn test_push_is_unsupported() {
        let notifier = DesktopNotifier::new(Importance::Default, None);
        assert!(!notifier.requires_channels());
        assert!(matches!(
            notifier.push_token("project").await,
            Err(HostError::Unsupported(_))
        ));
        assert_eq!(notifier.restore_pending().await.unwrap(), 0);
    }
}
