// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture core
//!
//! Two layers:
//! - [`HostError`]: what a host subsystem (permissions, camera, library,
//!   notification daemon) reports across the boundary
//! - [`CaptureError`]: what callers of the core see; every variant is
//!   recoverable at the pipeline boundary

use crate::permissions::Capability;
use thiserror::Error;

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Errors surfaced by the capture core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// A required capability was not granted
    #[error("Permission denied: {0}")]
    PermissionDenied(Capability),
    /// No usable capture session (not authorized, hardware claimed, unsupported lens)
    #[error("Camera unavailable: {0}")]
    CaptureUnavailable(String),
    /// Another capture is still outstanding on this controller
    #[error("Capture already in progress")]
    CaptureInProgress,
    /// Hardware or driver failure; the session stays usable
    #[error("Capture failed: {0}")]
    CaptureFailed(String),
    /// Storage authorization is not granted
    #[error("Storage access not authorized")]
    StorageUnauthorized,
    /// Disk full or I/O fault while writing to the library
    #[error("Storage failed: {0}")]
    StorageFailed(String),
    /// The artifact was already handed to the persistence sink
    #[error("Artifact was already stored")]
    DuplicateStore,
    /// Notification authorization is not granted
    #[error("Notifications not authorized")]
    NotificationUnauthorized,
    /// The notification host rejected a request
    #[error("Notification failed: {0}")]
    NotificationFailed(String),
    /// Push tokens cannot be obtained on this device
    #[error("Push notifications unavailable: {0}")]
    PushUnavailable(String),
    /// The requesting pipeline was torn down before the work could finish
    #[error("Capture abandoned after teardown")]
    Abandoned,
}

impl CaptureError {
    /// Capability the UI should offer an explicit "request again" action for
    ///
    /// Returns `None` for errors that are not caused by a missing authorization.
    pub fn retry_capability(&self) -> Option<Capability> {
        match self {
            CaptureError::PermissionDenied(capability) => Some(*capability),
            CaptureError::StorageUnauthorized => Some(Capability::Storage),
            CaptureError::NotificationUnauthorized => Some(Capability::Notifications),
            _ => None,
        }
    }
}

/// Failure reported by a host subsystem
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The capability or operation does not exist on this device
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// The device is held by someone else
    #[error("Device busy")]
    Busy,
    /// No space left on the target volume
    #[error("Disk full")]
    DiskFull,
    /// General I/O error
    #[error("I/O error: {0}")]
    Io(String),
    /// The host refused the request
    #[error("Rejected: {0}")]
    Rejected(String),
    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::StorageFull => HostError::DiskFull,
            std::io::ErrorKind::Unsupported => HostError::Unsupported(err.to_string()),
            _ => HostError::Io(err.to_string()),
        }
    }
}
