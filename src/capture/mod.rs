// SPDX-License-Identifier: GPL-3.0-only

//! Still capture from the camera hardware
//!
//! ```text
//! ┌──────────────────────┐
//! │   CapturePipeline    │
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │  CaptureController   │  ← session lifecycle, single in-flight capture
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │ CaptureHost (trait)  │  ← platform camera
//! └──────────────────────┘
//! ```

pub mod controller;

pub use controller::{CaptureController, CaptureSession, HardwareClaim, SessionState};

use crate::errors::HostError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Camera lens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    /// User-facing (selfie) lens
    Front,
    /// World-facing lens
    #[default]
    Back,
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Facing::Front => write!(f, "front"),
            Facing::Back => write!(f, "back"),
        }
    }
}

impl std::str::FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" | "user" => Ok(Facing::Front),
            "back" | "rear" | "environment" => Ok(Facing::Back),
            other => Err(format!("Unknown facing: {}", other)),
        }
    }
}

/// Opaque handle to an open camera device, issued by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// Encoded still image as delivered by the camera host
#[derive(Clone)]
pub struct RawImage {
    /// Encoded image bytes (shared, never copied through the pipeline)
    pub data: Arc<[u8]>,
    /// File extension matching the encoding, e.g. "jpg"
    pub extension: String,
}

impl RawImage {
    pub fn new(data: impl Into<Arc<[u8]>>, extension: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            extension: extension.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for RawImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawImage({} bytes, {})", self.data.len(), self.extension)
    }
}

/// Identity of a captured artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub Uuid);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, for file names and logs
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optional structured tags attached to a capture
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Free-form tags (lens, orientation, ...)
    pub tags: BTreeMap<String, String>,
}

/// Result of one capture call; immutable
#[derive(Debug, Clone)]
pub struct CapturedArtifact {
    id: ArtifactId,
    image: RawImage,
    facing: Facing,
    captured_at: DateTime<Utc>,
    metadata: ArtifactMetadata,
}

impl CapturedArtifact {
    pub fn new(image: RawImage, facing: Facing, metadata: ArtifactMetadata) -> Self {
        Self {
            id: ArtifactId::new(),
            image,
            facing,
            captured_at: Utc::now(),
            metadata,
        }
    }

    pub fn id(&self) -> ArtifactId {
        self.id
    }

    pub fn image(&self) -> &RawImage {
        &self.image
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }
}

/// Host camera hardware
#[async_trait]
pub trait CaptureHost: Send + Sync {
    /// Whether the device has a lens with this facing
    fn supports(&self, facing: Facing) -> bool;

    /// Claim the device and start the lens
    async fn open_device(&self, facing: Facing) -> Result<DeviceHandle, HostError>;

    /// Take one still picture
    async fn capture_still(&self, handle: DeviceHandle) -> Result<RawImage, HostError>;

    /// Release the device; must tolerate already-closed handles
    async fn close_device(&self, handle: DeviceHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facing_parsing() {
        assert_eq!("front".parse::<Facing>(), Ok(Facing::Front));
        assert_eq!("REAR".parse::<Facing>(), Ok(Facing::Back));
        assert!("side".parse::<Facing>().is_err());
        assert_eq!(Facing::default(), Facing::Back);
    }

    #[test]
    fn test_artifact_ids_are_unique() {
        let image = RawImage::new(vec![1u8, 2, 3], "jpg");
        let a = CapturedArtifact::new(image.clone(), Facing::Back, ArtifactMetadata::default());
        let b = CapturedArtifact::new(image, Facing::Back, ArtifactMetadata::default());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().short().len(), 8);
    }
}
