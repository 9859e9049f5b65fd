// SPDX-License-Identifier: GPL-3.0-only

//! Capture pipeline coordinator
//!
//! ```text
//! request_capture(facing)
//!   │
//!   ├─ ensure(Capture) ┐
//!   ├─ ensure(Storage) ┘ concurrently, both must be Granted
//!   │
//!   ├─ CaptureController::capture     failure → stop
//!   ├─ PersistenceSink::store         failure → stop, artifact discarded
//!   └─ NotificationDispatcher (detached, failure only logged)
//! ```

use crate::capture::{CaptureController, Facing};
use crate::constants;
use crate::errors::{CaptureError, CaptureResult};
use crate::notifications::{ErrorSink, NotificationDispatcher, NotificationRequest};
use crate::permissions::{Capability, PermissionGate};
use crate::storage::{PersistedRecord, PersistenceSink};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What happens to a capture whose screen is torn down mid-flight
///
/// Under both policies a write that already reached the storage host runs
/// to completion and no capture notification is sent after teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TeardownPolicy {
    /// Teardown waits for an outstanding capture; its frame is still persisted
    #[default]
    CompleteInBackground,
    /// Teardown closes the session at once; frames not yet handed to
    /// storage are dropped and the request returns `Abandoned`
    Abandon,
}

/// Pipeline settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub teardown: TeardownPolicy,
    pub notification_title: String,
    pub channel_id: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            teardown: TeardownPolicy::default(),
            notification_title: constants::CAPTURE_NOTIFICATION_TITLE.to_string(),
            channel_id: constants::DEFAULT_CHANNEL_ID.to_string(),
        }
    }
}

/// Coordinates permission → capture → persist → notify for one screen
pub struct CapturePipeline {
    gate: Arc<PermissionGate>,
    controller: Arc<CaptureController>,
    sink: Arc<PersistenceSink>,
    notifier: Arc<NotificationDispatcher>,
    settings: PipelineSettings,
    error_sink: Option<ErrorSink>,
    torn_down: AtomicBool,
    side_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CapturePipeline {
    pub fn new(
        gate: Arc<PermissionGate>,
        controller: Arc<CaptureController>,
        sink: Arc<PersistenceSink>,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            gate,
            controller,
            sink,
            notifier,
            settings: PipelineSettings::default(),
            error_sink: None,
            torn_down: AtomicBool::new(false),
            side_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Receive notification failures, which never reach `request_capture`'s result
    pub fn with_error_sink(mut self, sink: ErrorSink) -> Self {
        self.error_sink = Some(sink);
        self
    }

    pub fn controller(&self) -> &Arc<CaptureController> {
        &self.controller
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Capture a photo, store it and announce it
    ///
    /// # Errors
    /// * `PermissionDenied` - capture or storage not granted; hardware untouched
    /// * capture errors from [`CaptureController::capture`], unchanged
    /// * storage errors from [`PersistenceSink::store`], unchanged
    /// * `Abandoned` - the pipeline was torn down (see [`TeardownPolicy`])
    ///
    /// Notification failures never fail this call.
    pub async fn request_capture(&self, facing: Facing) -> CaptureResult<PersistedRecord> {
        if self.is_torn_down() {
            return Err(CaptureError::Abandoned);
        }

        info!(facing = %facing, "Capture requested");

        let (capture, storage) = tokio::join!(
            self.gate.ensure(Capability::Capture),
            self.gate.ensure(Capability::Storage)
        );

        // Prompts may outlive the screen; their answer no longer matters
        if self.is_torn_down() {
            debug!("Permission prompts resolved after teardown, ignoring");
            return Err(CaptureError::Abandoned);
        }

        if !capture.is_granted() {
            info!(status = %capture, "Capture permission not granted");
            return Err(CaptureError::PermissionDenied(Capability::Capture));
        }
        if !storage.is_granted() {
            info!(status = %storage, "Storage permission not granted");
            return Err(CaptureError::PermissionDenied(Capability::Storage));
        }

        self.controller.ensure_open(facing).await?;
        if self.is_torn_down() {
            // Teardown ran while the session was opening
            self.controller.close().await;
            return Err(CaptureError::Abandoned);
        }

        let artifact = match self.controller.capture().await {
            Ok(artifact) => artifact,
            Err(e) if self.is_torn_down() => {
                info!(error = %e, "Capture discarded by teardown");
                return Err(CaptureError::Abandoned);
            }
            Err(e) => return Err(e),
        };

        if self.is_torn_down() && self.settings.teardown == TeardownPolicy::Abandon {
            info!(artifact = %artifact.id(), "Torn down before persistence, discarding capture");
            return Err(CaptureError::Abandoned);
        }

        let record = self.sink.store(&artifact).await?;

        if self.is_torn_down() {
            info!(uri = %record.storage_uri, "Torn down, skipping capture notification");
            return Ok(record);
        }

        self.announce(&record);
        Ok(record)
    }

    fn announce(&self, record: &PersistedRecord) {
        let request = NotificationRequest::immediate(
            self.settings.notification_title.clone(),
            format!("Saved to {}", record.storage_uri),
        )
        .on_channel(self.settings.channel_id.clone())
        .with_data(serde_json::json!({
            "artifact": record.artifact_id,
            "uri": record.storage_uri,
        }));

        let task = self
            .notifier
            .spawn_schedule(request, self.error_sink.clone());

        let mut tasks = self.side_tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    /// Wait for detached notification tasks started so far
    pub async fn flush_notifications(&self) {
        let tasks: Vec<_> = {
            let mut tasks = self.side_tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.drain(..).collect()
        };

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Notification task failed");
            }
        }
    }

    /// Tear the screen down; idempotent
    ///
    /// Under `CompleteInBackground` this waits for an outstanding capture
    /// before releasing the hardware. Under `Abandon` the session closes at
    /// once and the outstanding request returns `Abandoned`.
    pub async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(policy = ?self.settings.teardown, "Tearing down capture pipeline");
        match self.settings.teardown {
            TeardownPolicy::CompleteInBackground => self.controller.close_when_idle().await,
            TeardownPolicy::Abandon => self.controller.close().await,
        }
    }
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePipeline")
            .field("settings", &self.settings)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::{MemoryCamera, MemoryLibrary, MemoryNotifier, MemoryPermissions};
    use crate::permissions::PermissionStatus;

    fn pipeline(permissions: Arc<MemoryPermissions>) -> (CapturePipeline, Arc<MemoryCamera>) {
        let gate = Arc::new(PermissionGate::new(permissions));
        let camera = Arc::new(MemoryCamera::new());
        let controller = Arc::new(CaptureController::new(gate.clone(), camera.clone()));
        let sink = Arc::new(PersistenceSink::new(
            gate.clone(),
            Arc::new(MemoryLibrary::new()),
        ));
        let notifier = Arc::new(NotificationDispatcher::new(
            gate.clone(),
            Arc::new(MemoryNotifier::new()),
        ));
        (
            CapturePipeline::new(gate, controller, sink, notifier),
            camera,
        )
    }

    #[tokio::test]
    async fn test_storage_denied_never_opens_camera() {
        let permissions = Arc::new(MemoryPermissions::new());
        permissions.set(Capability::Capture, PermissionStatus::Granted);
        permissions.answer(Capability::Storage, PermissionStatus::Denied);
        let (pipeline, camera) = pipeline(permissions);

        let result = pipeline.request_capture(Facing::Back).await;
        assert_eq!(result, Err(CaptureError::PermissionDenied(Capability::Storage)));
        assert_eq!(camera.open_calls(), 0);
    }

    #[tokio::test]
    async fn test_request_after_teardown_is_abandoned() {
        let permissions = Arc::new(MemoryPermissions::granting_all());
        let (pipeline, camera) = pipeline(permissions);

        pipeline.teardown().await;
        pipeline.teardown().await;
        assert!(pipeline.is_torn_down());

        let result = pipeline.request_capture(Facing::Back).await;
        assert_eq!(result, Err(CaptureError::Abandoned));
        assert_eq!(camera.capture_calls(), 0);
    }
}
