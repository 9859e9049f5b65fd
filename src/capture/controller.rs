// SPDX-License-Identifier: GPL-3.0-only

//! Capture session lifecycle and the single in-flight capture lock
//!
//! State machine:
//!
//! ```text
//! Closed ──open (capture Granted)──▶ Open ──capture──▶ Capturing
//!   ▲                                 ▲                   │
//!   │                                 └───────────────────┘
//!   └──────────── close (from any state) ─────────────────
//! ```

use super::{ArtifactMetadata, CaptureHost, CapturedArtifact, DeviceHandle, Facing, RawImage};
use crate::errors::{CaptureError, CaptureResult, HostError};
use crate::permissions::{Capability, PermissionGate};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Observable controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
    /// Transient, while a capture call is outstanding
    Capturing,
}

/// Snapshot of the open hardware session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSession {
    pub id: Uuid,
    pub facing: Facing,
    pub active: bool,
    pub in_flight: bool,
}

/// Exclusive claim on the camera hardware
///
/// Controllers built with clones of the same claim cannot hold sessions at
/// the same time.
#[derive(Debug, Clone, Default)]
pub struct HardwareClaim(Arc<AtomicBool>);

impl HardwareClaim {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn try_acquire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Scoped ownership of the in-flight flag; released on drop, so every exit
/// path (return, error, cancelled future) frees it and wakes idle waiters.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
    idle: &'a Notify,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool, idle: &'a Notify) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag, idle })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.idle.notify_waiters();
    }
}

struct OpenSession {
    id: Uuid,
    facing: Facing,
    handle: DeviceHandle,
}

/// Owns the capture session of one screen
pub struct CaptureController {
    gate: Arc<PermissionGate>,
    host: Arc<dyn CaptureHost>,
    claim: HardwareClaim,
    session: tokio::sync::Mutex<Option<OpenSession>>,
    in_flight: AtomicBool,
    idle: Notify,
}

impl CaptureController {
    /// Create a controller with its own hardware claim
    pub fn new(gate: Arc<PermissionGate>, host: Arc<dyn CaptureHost>) -> Self {
        Self::with_claim(gate, host, HardwareClaim::new())
    }

    /// Create a controller sharing a hardware claim with other controllers
    pub fn with_claim(
        gate: Arc<PermissionGate>,
        host: Arc<dyn CaptureHost>,
        claim: HardwareClaim,
    ) -> Self {
        Self {
            gate,
            host,
            claim,
            session: tokio::sync::Mutex::new(None),
            in_flight: AtomicBool::new(false),
            idle: Notify::new(),
        }
    }

    /// Open a session on the requested lens
    ///
    /// Fails with `CaptureUnavailable` if capture is not authorized, the lens
    /// does not exist, or the hardware is already claimed.
    pub async fn open(&self, facing: Facing) -> CaptureResult<CaptureSession> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            return Err(CaptureError::CaptureUnavailable(
                "a capture session is already open".to_string(),
            ));
        }
        self.open_locked(&mut slot, facing).await
    }

    /// Open a session, or reuse the current one switching lens if needed
    pub async fn ensure_open(&self, facing: Facing) -> CaptureResult<CaptureSession> {
        let mut slot = self.session.lock().await;
        match slot.as_ref() {
            Some(current) if current.facing == facing => Ok(self.snapshot(current)),
            Some(_) => self.switch_locked(&mut slot, facing).await,
            None => self.open_locked(&mut slot, facing).await,
        }
    }

    /// Switch lens; no-op without an open session
    pub async fn set_facing(&self, facing: Facing) -> CaptureResult<()> {
        let mut slot = self.session.lock().await;
        match slot.as_ref() {
            None => {
                debug!(facing = %facing, "No open session, ignoring facing change");
                Ok(())
            }
            Some(current) if current.facing == facing => Ok(()),
            Some(_) => self.switch_locked(&mut slot, facing).await.map(|_| ()),
        }
    }

    /// Take one still picture
    ///
    /// At most one capture runs at a time; overlapping calls fail with
    /// `CaptureInProgress`. A hardware failure leaves the session usable.
    pub async fn capture(&self) -> CaptureResult<CapturedArtifact> {
        let _guard = InFlightGuard::acquire(&self.in_flight, &self.idle).ok_or_else(|| {
            debug!("Capture requested while another is in flight");
            CaptureError::CaptureInProgress
        })?;

        let (session_id, facing, handle) = {
            let slot = self.session.lock().await;
            match slot.as_ref() {
                Some(session) => (session.id, session.facing, session.handle),
                None => {
                    return Err(CaptureError::CaptureUnavailable(
                        "no open capture session".to_string(),
                    ));
                }
            }
        };

        let status = self.gate.status(Capability::Capture);
        if !status.is_granted() {
            return Err(CaptureError::CaptureUnavailable(format!(
                "capture authorization is {}",
                status
            )));
        }

        let started = Instant::now();
        let image = self.host.capture_still(handle).await.map_err(|e| {
            warn!(error = %e, facing = %facing, "Hardware capture failed");
            CaptureError::CaptureFailed(e.to_string())
        })?;

        {
            let slot = self.session.lock().await;
            let still_current = matches!(
                slot.as_ref(),
                Some(session) if session.id == session_id && session.handle == handle
            );
            if !still_current {
                warn!("Session closed while capture was outstanding, discarding frame");
                return Err(CaptureError::CaptureUnavailable(
                    "capture session closed during capture".to_string(),
                ));
            }
        }

        let metadata = describe(&image, facing);
        let artifact = CapturedArtifact::new(image, facing, metadata);

        info!(
            artifact = %artifact.id(),
            facing = %facing,
            bytes = artifact.image().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Still captured"
        );

        Ok(artifact)
    }

    /// Release the hardware; idempotent
    pub async fn close(&self) {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.take() {
            self.host.close_device(session.handle).await;
            self.claim.release();
            info!(session = %session.id, "Capture session closed");
        }
    }

    /// Let an outstanding capture finish, then release the hardware
    pub async fn close_when_idle(&self) {
        self.wait_idle().await;
        self.close().await;
    }

    /// Resolve once no capture is in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a guard dropped in between still wakes us
            notified.as_mut().enable();
            if !self.is_capturing() {
                return;
            }
            debug!("Waiting for the in-flight capture to finish");
            notified.await;
        }
    }

    pub async fn state(&self) -> SessionState {
        let slot = self.session.lock().await;
        match slot.as_ref() {
            None => SessionState::Closed,
            Some(_) if self.is_capturing() => SessionState::Capturing,
            Some(_) => SessionState::Open,
        }
    }

    /// Snapshot of the current session, if any
    pub async fn session(&self) -> Option<CaptureSession> {
        let slot = self.session.lock().await;
        slot.as_ref().map(|session| self.snapshot(session))
    }

    pub fn is_capturing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn snapshot(&self, session: &OpenSession) -> CaptureSession {
        CaptureSession {
            id: session.id,
            facing: session.facing,
            active: true,
            in_flight: self.is_capturing(),
        }
    }

    async fn open_locked(
        &self,
        slot: &mut Option<OpenSession>,
        facing: Facing,
    ) -> CaptureResult<CaptureSession> {
        let status = self.gate.status(Capability::Capture);
        if !status.is_granted() {
            return Err(CaptureError::CaptureUnavailable(format!(
                "capture authorization is {}",
                status
            )));
        }

        if !self.host.supports(facing) {
            return Err(CaptureError::CaptureUnavailable(format!(
                "no {} camera on this device",
                facing
            )));
        }

        if !self.claim.try_acquire() {
            return Err(CaptureError::CaptureUnavailable(
                "camera hardware is claimed by another session".to_string(),
            ));
        }

        let handle = match self.host.open_device(facing).await {
            Ok(handle) => handle,
            Err(e) => {
                self.claim.release();
                return Err(open_error(e));
            }
        };

        let session = OpenSession {
            id: Uuid::new_v4(),
            facing,
            handle,
        };
        info!(session = %session.id, facing = %facing, "Capture session opened");

        let snapshot = self.snapshot(&session);
        *slot = Some(session);
        Ok(snapshot)
    }

    async fn switch_locked(
        &self,
        slot: &mut Option<OpenSession>,
        facing: Facing,
    ) -> CaptureResult<CaptureSession> {
        if !self.host.supports(facing) {
            return Err(CaptureError::CaptureUnavailable(format!(
                "no {} camera on this device",
                facing
            )));
        }

        if self.is_capturing() {
            return Err(CaptureError::CaptureInProgress);
        }

        let Some(mut session) = slot.take() else {
            return self.open_locked(slot, facing).await;
        };

        self.host.close_device(session.handle).await;
        match self.host.open_device(facing).await {
            Ok(handle) => {
                info!(session = %session.id, from = %session.facing, to = %facing, "Switched lens");
                session.handle = handle;
                session.facing = facing;
                let snapshot = self.snapshot(&session);
                *slot = Some(session);
                Ok(snapshot)
            }
            Err(e) => {
                // Old lens is already released; the session is gone
                self.claim.release();
                warn!(session = %session.id, error = %e, "Lens switch failed, session closed");
                Err(open_error(e))
            }
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        let Ok(mut slot) = self.session.try_lock() else {
            return;
        };
        if slot.take().is_some() {
            self.claim.release();
            warn!("Capture controller dropped with an open session");
        }
    }
}

impl std::fmt::Debug for CaptureController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureController")
            .field("claimed", &self.claim.is_claimed())
            .field("in_flight", &self.is_capturing())
            .finish()
    }
}

fn open_error(err: HostError) -> CaptureError {
    match err {
        HostError::Busy => {
            CaptureError::CaptureUnavailable("camera hardware is busy".to_string())
        }
        HostError::Unsupported(msg) => CaptureError::CaptureUnavailable(msg),
        other => CaptureError::CaptureUnavailable(format!("failed to open camera: {}", other)),
    }
}

/// Facing tag plus dimensions read from the image header (best effort)
fn describe(image: &RawImage, facing: Facing) -> ArtifactMetadata {
    let mut metadata = ArtifactMetadata::default();
    metadata
        .tags
        .insert("facing".to_string(), facing.to_string());

    let reader = match image::ImageReader::new(std::io::Cursor::new(&image.data[..]))
        .with_guessed_format()
    {
        Ok(reader) => reader,
        Err(_) => return metadata,
    };

    if let Some(format) = reader.format() {
        metadata
            .tags
            .insert("format".to_string(), format!("{:?}", format).to_lowercase());
    }

    match reader.into_dimensions() {
        Ok((width, height)) => {
            metadata.width = Some(width);
            metadata.height = Some(height);
        }
        Err(e) => debug!(error = %e, "Could not read image dimensions"),
    }

    metadata
}
