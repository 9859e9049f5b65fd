// SPDX-License-Identifier: GPL-3.0-only

//! Capture host that serves still images from disk
//!
//! Each lens is backed by an image file from [`CaptureSources`]. Opening a
//! lens validates the file; capturing reads it fresh, so a file replaced
//! between shots yields the new frame.

use crate::capture::{CaptureHost, DeviceHandle, Facing, RawImage};
use crate::config::CaptureSources;
use crate::constants::file_formats;
use crate::errors::HostError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct OpenDevice {
    handle: DeviceHandle,
    facing: Facing,
    path: PathBuf,
}

/// Capture host reading frames from configured image files
#[derive(Debug)]
pub struct FileCamera {
    sources: CaptureSources,
    device: Mutex<Option<OpenDevice>>,
    next_handle: AtomicU64,
}

impl FileCamera {
    pub fn new(sources: CaptureSources) -> Self {
        Self {
            sources,
            device: Mutex::new(None),
            next_handle: AtomicU64::new(1),
        }
    }

    fn device(&self) -> std::sync::MutexGuard<'_, Option<OpenDevice>> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn image_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    file_formats::is_image_extension(&ext).then_some(ext)
}

#[async_trait]
impl CaptureHost for FileCamera {
    fn supports(&self, facing: Facing) -> bool {
        self.sources.for_facing(facing).is_some()
    }

    async fn open_device(&self, facing: Facing) -> Result<DeviceHandle, HostError> {
        let Some(path) = self.sources.for_facing(facing).map(Path::to_path_buf) else {
            return Err(HostError::Unsupported(format!("no {} source configured", facing)));
        };

        if image_extension(&path).is_none() {
            return Err(HostError::Unsupported(format!(
                "{} is not a supported image",
                path.display()
            )));
        }

        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(HostError::Unsupported(format!(
                "{} is not a file",
                path.display()
            )));
        }

        let mut device = self.device();
        if let Some(open) = device.as_ref() {
            debug!(facing = %open.facing, "Source already open");
            return Err(HostError::Busy);
        }

        let handle = DeviceHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        info!(facing = %facing, path = %path.display(), handle = handle.0, "Opened file source");
        *device = Some(OpenDevice {
            handle,
            facing,
            path,
        });
        Ok(handle)
    }

    async fn capture_still(&self, handle: DeviceHandle) -> Result<RawImage, HostError> {
        let path = match self.device().as_ref() {
            Some(open) if open.handle == handle => open.path.clone(),
            _ => return Err(HostError::Rejected("device is not open".to_string())),
        };

        let extension = image_extension(&path)
            .ok_or_else(|| HostError::Unsupported(format!("{} is not an image", path.display())))?;
        let data = tokio::fs::read(&path).await?;

        debug!(path = %path.display(), bytes = data.len(), "Read frame from file source");
        Ok(RawImage::new(data, extension))
    }

    async fn close_device(&self, handle: DeviceHandle) {
        let mut device = self.device();
        if device.as_ref().is_some_and(|open| open.handle == handle) {
            *device = None;
            debug!(handle = handle.0, "Closed file source");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(back: PathBuf) -> CaptureSources {
        CaptureSources {
            front: None,
            back: Some(back),
        }
    }

    #[tokio::test]
    async fn test_capture_reads_configured_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("back.PNG");
        std::fs::write(&path, b"frame").unwrap();

        let camera = FileCamera::new(sources(path));
        assert!(camera.supports(Facing::Back));
        assert!(!camera.supports(Facing::Front));

        let handle = camera.open_device(Facing::Back).await.unwrap();
        let image = camera.capture_still(handle).await.unwrap();
        assert_eq!(&image.data[..], b"frame");
        assert_eq!(image.extension, "png");

        camera.close_device(handle).await;
        assert!(matches!(
            camera.capture_still(handle).await,
            Err(HostError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_second_open_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("back.jpg");
        std::fs::write(&path, b"frame").unwrap();

        let camera = FileCamera::new(sources(path));
        let first = camera.open_device(Facing::Back).await.unwrap();
        assert_eq!(camera.open_device(Facing::Back).await, Err(HostError::Busy));

        camera.close_device(first).await;
        let second = camera.open_device(Facing::Back).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_open_rejects_missing_and_non_image_sources() {
        let dir = tempfile::tempdir().unwrap();

        let missing = FileCamera::new(sources(dir.path().join("gone.png")));
        assert!(missing.open_device(Facing::Back).await.is_err());

        let text = dir.path().join("notes.txt");
        std::fs::write(&text, b"hello").unwrap();
        let wrong = FileCamera::new(sources(text));
        assert!(matches!(
            wrong.open_device(Facing::Back).await,
            Err(HostError::Unsupported(_))
        ));

        let unconfigured = FileCamera::new(CaptureSources::default());
        assert!(matches!(
            unconfigured.open_device(Facing::Front).await,
            Err(HostError::Unsupported(_))
        ));
    }
}
