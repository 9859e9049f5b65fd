// SPDX-License-Identifier: GPL-3.0-only

//! Camera Core - permission, capture, persistence and notification orchestration
//!
//! This library coordinates the lifecycle of taking a photo: obtaining
//! capture and storage authorization, holding exclusive access to the
//! camera, saving the frame to the photo library exactly once and
//! announcing it with a notification. Every host facility sits behind a
//! trait so the same logic runs against desktop services or in-memory
//! fakes.
//!
//! # Architecture
//!
//! - [`permissions`]: per-capability authorization with single-flight prompts
//! - [`capture`]: exclusive camera sessions and single-shot capture
//! - [`storage`]: exactly-once persistence of captured artifacts
//! - [`notifications`]: channels, scheduling and push registration
//! - [`pipeline`]: permission → capture → persist → notify coordination
//! - [`backends`]: desktop and in-memory host implementations
//! - [`config`]: user configuration handling
//!
//! # Example
//!
//! ```ignore
//! let gate = Arc::new(PermissionGate::new(hosts.permission_host()));
//! let controller = Arc::new(CaptureController::new(gate.clone(), hosts.capture_host()));
//! let sink = Arc::new(PersistenceSink::new(gate.clone(), hosts.storage_host()));
//! let pipeline = CapturePipeline::new(gate, controller, sink, notifier);
//! let record = pipeline.request_capture(Facing::Back).await?;
//! ```

pub mod backends;
pub mod capture;
pub mod config;
pub mod constants;
pub mod errors;
pub mod notifications;
pub mod permissions;
pub mod pipeline;
pub mod storage;

// Re-export commonly used types
pub use capture::{CaptureController, CapturedArtifact, Facing};
pub use config::Config;
pub use errors::{CaptureError, CaptureResult, HostError};
pub use notifications::{NotificationDispatcher, NotificationRequest};
pub use permissions::{Capability, PermissionGate, PermissionStatus};
pub use pipeline::{CapturePipeline, TeardownPolicy};
pub use storage::{PersistedRecord, PersistenceSink};
