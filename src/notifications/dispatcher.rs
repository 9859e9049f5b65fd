// SPDX-License-Identifier: GPL-3.0-only

//! Notification scheduling, channel setup and push registration

use super::{
    ChannelConfig, HostNotificationId, NotificationHandle, NotificationHost, NotificationRequest,
    PresentationOptions, PushRegistration, Trigger,
};
use crate::errors::{CaptureError, CaptureResult, HostError};
use crate::permissions::{Capability, PermissionGate, PermissionStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Receives failures of detached notification tasks
pub type ErrorSink = Arc<dyn Fn(CaptureError) + Send + Sync>;

/// A delayed notification the host has not fired yet
#[derive(Debug, Clone)]
struct Scheduled {
    host_id: HostNotificationId,
    fire_at: DateTime<Utc>,
}

/// Schedules notifications and owns the device-level notification state
pub struct NotificationDispatcher {
    gate: Arc<PermissionGate>,
    host: Arc<dyn NotificationHost>,
    presentation: PresentationOptions,
    push_project_id: Option<String>,
    channels: Mutex<HashMap<String, ChannelConfig>>,
    /// Serializes channel setup so concurrent callers configure once
    channel_lock: tokio::sync::Mutex<()>,
    scheduled: Mutex<HashMap<NotificationHandle, Scheduled>>,
    push: tokio::sync::Mutex<Option<PushRegistration>>,
}

impl NotificationDispatcher {
    pub fn new(gate: Arc<PermissionGate>, host: Arc<dyn NotificationHost>) -> Self {
        Self {
            gate,
            host,
            presentation: PresentationOptions::default(),
            push_project_id: None,
            channels: Mutex::new(HashMap::new()),
            channel_lock: tokio::sync::Mutex::new(()),
            scheduled: Mutex::new(HashMap::new()),
            push: tokio::sync::Mutex::new(None),
        }
    }

    /// Set the foreground presentation handler
    pub fn with_presentation(mut self, presentation: PresentationOptions) -> Self {
        self.presentation = presentation;
        self
    }

    /// Set the project used to request push tokens
    pub fn with_push_project(mut self, project_id: impl Into<String>) -> Self {
        self.push_project_id = Some(project_id.into());
        self
    }

    pub fn presentation(&self) -> PresentationOptions {
        self.presentation
    }

    /// Configure a notification channel; idempotent
    ///
    /// No-op on hosts without channels.
    pub async fn configure_channel(&self, id: &str, config: ChannelConfig) -> CaptureResult<()> {
        if !self.host.requires_channels() {
            debug!(channel = id, "Host has no notification channels, skipping setup");
            return Ok(());
        }

        let _guard = self.channel_lock.lock().await;
        if self.channels().get(id) == Some(&config) {
            return Ok(());
        }

        self.host
            .configure_channel(id, &config)
            .await
            .map_err(|e| CaptureError::NotificationFailed(format!("channel `{}`: {}", id, e)))?;

        info!(channel = id, importance = ?config.importance, "Notification channel configured");
        self.channels().insert(id.to_string(), config);
        Ok(())
    }

    pub fn is_channel_configured(&self, id: &str) -> bool {
        !self.host.requires_channels() || self.channels().contains_key(id)
    }

    /// Ask for notification authorization (single prompt, never re-prompts a denial)
    pub async fn request_authorization(&self) -> PermissionStatus {
        self.gate.ensure(Capability::Notifications).await
    }

    /// Re-read notification authorization; drops the push registration if revoked
    pub async fn refresh_authorization(&self) -> PermissionStatus {
        let status = self.gate.refresh(Capability::Notifications).await;
        if !status.is_granted() && self.push.lock().await.take().is_some() {
            info!("Notification authorization revoked, push registration invalidated");
        }
        status
    }

    pub fn authorization(&self) -> PermissionStatus {
        self.gate.status(Capability::Notifications)
    }

    /// Hand a notification to the host
    ///
    /// Returns once the host accepted it, not once it is displayed.
    pub async fn schedule(&self, request: NotificationRequest) -> CaptureResult<NotificationHandle> {
        let status = self.authorization();
        if !status.is_granted() {
            debug!(status = %status, title = %request.title, "Notification not authorized");
            return Err(CaptureError::NotificationUnauthorized);
        }

        if !self.is_channel_configured(&request.channel_id) {
            return Err(CaptureError::NotificationFailed(format!(
                "channel `{}` is not configured",
                request.channel_id
            )));
        }

        let mut request = request;
        if let Trigger::DelayedUntil(at) = request.trigger {
            if at <= Utc::now() {
                debug!(fire_at = %at, "Delayed trigger already due, delivering now");
                request.trigger = Trigger::Immediate;
            }
        }

        let host_id = self
            .host
            .present(&request, &self.presentation)
            .await
            .map_err(|e| CaptureError::NotificationFailed(e.to_string()))?;

        let handle = NotificationHandle(Uuid::new_v4());
        info!(
            handle = %handle,
            title = %request.title,
            trigger = ?request.trigger,
            "Notification accepted"
        );

        // Immediate notifications are delivered already and cannot be cancelled
        if let Trigger::DelayedUntil(fire_at) = request.trigger {
            let mut scheduled = self.scheduled();
            prune_delivered(&mut scheduled);
            scheduled.insert(handle, Scheduled { host_id, fire_at });
        }
        Ok(handle)
    }

    /// Schedule on a detached task
    ///
    /// The result is never joined into the caller's work: failures are
    /// logged and passed to `sink`.
    pub fn spawn_schedule(
        self: &Arc<Self>,
        request: NotificationRequest,
        sink: Option<ErrorSink>,
    ) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let title = request.title.clone();
            if let Err(e) = dispatcher.schedule(request).await {
                warn!(title = %title, error = %e, "Notification not delivered");
                if let Some(sink) = sink {
                    sink(e);
                }
            }
        })
    }

    /// Cancel a notification; best effort, no-op if unknown or delivered
    pub async fn cancel(&self, handle: NotificationHandle) {
        let entry = {
            let mut scheduled = self.scheduled();
            prune_delivered(&mut scheduled);
            scheduled.remove(&handle)
        };
        let Some(entry) = entry else {
            debug!(handle = %handle, "Nothing to cancel, unknown or already delivered");
            return;
        };

        match self.host.cancel(&entry.host_id).await {
            Ok(()) => info!(handle = %handle, fire_at = %entry.fire_at, "Notification cancelled"),
            Err(e) => debug!(handle = %handle, error = %e, "Cancel ignored by host"),
        }
    }

    /// Number of delayed notifications that have not fired or been cancelled
    pub fn scheduled_count(&self) -> usize {
        let mut scheduled = self.scheduled();
        prune_delivered(&mut scheduled);
        scheduled.len()
    }

    /// Register this install for push notifications
    ///
    /// Requests authorization if needed, then asks the host for a token. The
    /// registration is created once and reused until authorization is revoked.
    pub async fn register_push(&self) -> CaptureResult<PushRegistration> {
        let mut push = self.push.lock().await;
        if let Some(existing) = push.as_ref() {
            if self.authorization().is_granted() {
                return Ok(existing.clone());
            }
            *push = None;
        }

        if !self.request_authorization().await.is_granted() {
            warn!("Push registration refused: notifications not authorized");
            return Err(CaptureError::NotificationUnauthorized);
        }

        let Some(project_id) = self.push_project_id.as_deref() else {
            return Err(CaptureError::PushUnavailable(
                "no push project configured".to_string(),
            ));
        };

        let token = self.host.push_token(project_id).await.map_err(|e| {
            warn!(error = %e, "Push token unavailable");
            match e {
                HostError::Unsupported(msg) => CaptureError::PushUnavailable(msg),
                other => CaptureError::PushUnavailable(other.to_string()),
            }
        })?;

        let channel = if self.host.requires_channels() {
            let config = ChannelConfig::default();
            self.configure_channel(crate::constants::DEFAULT_CHANNEL_ID, config.clone())
                .await?;
            Some(config)
        } else {
            None
        };

        let registration = PushRegistration {
            token,
            channel,
            registered_at: Utc::now(),
        };
        info!(token_len = registration.token.len(), "Registered for push notifications");

        *push = Some(registration.clone());
        Ok(registration)
    }

    /// Current push registration, if any
    pub async fn push_registration(&self) -> Option<PushRegistration> {
        self.push.lock().await.clone()
    }

    fn channels(&self) -> std::sync::MutexGuard<'_, HashMap<String, ChannelConfig>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scheduled(&self) -> std::sync::MutexGuard<'_, HashMap<NotificationHandle, Scheduled>> {
        self.scheduled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Forget delayed notifications whose fire time has passed
fn prune_delivered(scheduled: &mut HashMap<NotificationHandle, Scheduled>) {
    let now = Utc::now();
    scheduled.retain(|_, entry| entry.fire_at > now);
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("authorization", &self.authorization())
            .field("presentation", &self.presentation)
            .field("scheduled", &self.scheduled_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::{MemoryNotifier, MemoryPermissions};
    use chrono::Duration;

    async fn dispatcher_with(
        status: PermissionStatus,
    ) -> (Arc<NotificationDispatcher>, Arc<MemoryNotifier>, Arc<MemoryPermissions>) {
        let permissions = Arc::new(MemoryPermissions::new());
        permissions.set(Capability::Notifications, status);
        let gate = Arc::new(PermissionGate::new(permissions.clone()));
        gate.ensure(Capability::Notifications).await;

        let notifier = Arc::new(MemoryNotifier::new());
        let dispatcher = NotificationDispatcher::new(gate, notifier.clone())
            .with_push_project("test-project");
        (Arc::new(dispatcher), notifier, permissions)
    }

    #[tokio::test]
    async fn test_schedule_requires_authorization() {
        let (dispatcher, notifier, _) = dispatcher_with(PermissionStatus::Denied).await;
        let result = dispatcher
            .schedule(NotificationRequest::immediate("Title", "Body"))
            .await;
        assert_eq!(result, Err(CaptureError::NotificationUnauthorized));
        assert!(notifier.presented().is_empty());
    }

    #[tokio::test]
    async fn test_immediate_and_delayed() {
        let (dispatcher, notifier, _) = dispatcher_with(PermissionStatus::Granted).await;

        dispatcher
            .schedule(NotificationRequest::immediate("Now", "Body"))
            .await
            .unwrap();
        let later = Utc::now() + Duration::minutes(5);
        let handle = dispatcher
            .schedule(NotificationRequest::delayed("Later", "Body", later))
            .await
            .unwrap();

        let presented = notifier.presented();
        assert_eq!(presented.len(), 2);
        assert_eq!(presented[0].trigger, Trigger::Immediate);
        assert_eq!(presented[1].trigger, Trigger::DelayedUntil(later));
        assert_eq!(dispatcher.scheduled_count(), 1);

        dispatcher.cancel(handle).await;
        assert_eq!(notifier.cancelled().len(), 1);
        assert_eq!(dispatcher.scheduled_count(), 0);

        // Second cancel is a no-op
        dispatcher.cancel(handle).await;
        assert_eq!(notifier.cancelled().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_skips_delivered_notifications() {
        let (dispatcher, notifier, _) = dispatcher_with(PermissionStatus::Granted).await;

        let mut handles = Vec::new();
        for i in 0..4 {
            let request = NotificationRequest::immediate(format!("Photo {}", i), "Body");
            handles.push(dispatcher.schedule(request).await.unwrap());
        }
        assert_eq!(dispatcher.scheduled_count(), 0);

        dispatcher.cancel(handles[0]).await;
        assert!(notifier.cancelled().is_empty());

        // A delayed notification whose time has passed counts as delivered
        let soon = Utc::now() + Duration::milliseconds(50);
        let handle = dispatcher
            .schedule(NotificationRequest::delayed("Soon", "Body", soon))
            .await
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(80));
        assert_eq!(dispatcher.scheduled_count(), 0);
        dispatcher.cancel(handle).await;
        assert!(notifier.cancelled().is_empty());
    }

    #[tokio::test]
    async fn test_past_delay_delivers_immediately() {
        let (dispatcher, notifier, _) = dispatcher_with(PermissionStatus::Granted).await;
        let past = Utc::now() - Duration::seconds(1);
        dispatcher
            .schedule(NotificationRequest::delayed("Late", "Body", past))
            .await
            .unwrap();
        assert_eq!(notifier.presented()[0].trigger, Trigger::Immediate);
    }

    #[tokio::test]
    async fn test_channels_required_and_idempotent() {
        let (dispatcher, notifier, _) = dispatcher_with(PermissionStatus::Granted).await;
        notifier.set_requires_channels(true);

        let request = NotificationRequest::immediate("Title", "Body");
        let result = dispatcher.schedule(request.clone()).await;
        assert!(matches!(result, Err(CaptureError::NotificationFailed(_))));

        let configure = (0..4).map(|_| {
            dispatcher.configure_channel(&request.channel_id, ChannelConfig::default())
        });
        for result in futures::future::join_all(configure).await {
            assert!(result.is_ok());
        }
        assert_eq!(notifier.configure_calls(), 1);
        assert!(dispatcher.schedule(request).await.is_ok());
    }

    #[tokio::test]
    async fn test_detached_failure_reaches_sink() {
        let (dispatcher, notifier, _) = dispatcher_with(PermissionStatus::Granted).await;
        notifier.fail_present(Some(HostError::Rejected("daemon gone".to_string())));

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink: ErrorSink = {
            let errors = Arc::clone(&errors);
            Arc::new(move |e: CaptureError| errors.lock().unwrap().push(e))
        };

        dispatcher
            .spawn_schedule(NotificationRequest::immediate("Title", "Body"), Some(sink))
            .await
            .unwrap();

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], CaptureError::NotificationFailed(_)));
    }

    #[tokio::test]
    async fn test_push_unavailable_on_unsupported_device() {
        let (dispatcher, notifier, _) = dispatcher_with(PermissionStatus::Granted).await;
        notifier.set_push_token(None);

        let result = dispatcher.register_push().await;
        assert!(matches!(result, Err(CaptureError::PushUnavailable(_))));
        assert!(dispatcher.push_registration().await.is_none());
    }

    #[tokio::test]
    async fn test_push_registration_cached_until_revoked() {
        let (dispatcher, notifier, permissions) = dispatcher_with(PermissionStatus::Granted).await;
        notifier.set_requires_channels(true);

        let first = dispatcher.register_push().await.unwrap();
        assert_eq!(first.channel, Some(ChannelConfig::default()));
        let second = dispatcher.register_push().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(notifier.push_token_calls(), 1);

        permissions.set(Capability::Notifications, PermissionStatus::Denied);
        assert_eq!(
            dispatcher.refresh_authorization().await,
            PermissionStatus::Denied
        );
        assert!(dispatcher.push_registration().await.is_none());
        assert_eq!(
            dispatcher.register_push().await,
            Err(CaptureError::NotificationUnauthorized)
        );
    }
}
