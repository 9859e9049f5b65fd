// SPDX-License-Identifier: GPL-3.0-only

//! Photo library in a directory on disk
//!
//! Photos are written to a hidden temporary file, flushed with `sync_all`
//! and hard-linked into place, so a crash never leaves a truncated photo
//! behind and an existing photo is never replaced.

use crate::capture::RawImage;
use crate::errors::HostError;
use crate::storage::StorageHost;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Storage host writing photos into a directory
#[derive(Debug, Clone)]
pub struct PhotoLibrary {
    dir: PathBuf,
}

impl PhotoLibrary {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl StorageHost for PhotoLibrary {
    async fn write_to_library(
        &self,
        image: &RawImage,
        name_hint: &str,
    ) -> Result<String, HostError> {
        let dir = self.dir.clone();
        let file_name = format!("{}.{}", name_hint, image.extension);
        let data = image.data.clone();

        let path = tokio::task::spawn_blocking(move || write_atomic(&dir, &file_name, &data))
            .await
            .map_err(|e| HostError::Other(format!("Save task error: {}", e)))??;

        info!(path = %path.display(), bytes = image.len(), "Photo saved");
        Ok(format!("file://{}", path.display()))
    }
}

fn write_atomic(dir: &Path, file_name: &str, data: &[u8]) -> Result<PathBuf, HostError> {
    std::fs::create_dir_all(dir)?;

    let target = dir.join(file_name);
    let partial = dir.join(format!(".{}.{}.partial", file_name, uuid::Uuid::new_v4().simple()));
    debug!(path = %partial.display(), "Writing photo");

    // hard_link fails if the target exists, so an existing photo is never replaced
    let written = std::fs::File::create(&partial)
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        })
        .and_then(|_| std::fs::hard_link(&partial, &target));

    if let Err(cleanup) = std::fs::remove_file(&partial) {
        warn!(path = %partial.display(), error = %cleanup, "Failed to remove partial photo");
    }

    match written {
        Ok(()) => Ok(target),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(HostError::Rejected(
            format!("{} already exists", target.display()),
        )),
        Err(e) => Err(e.into()),
    }
}
