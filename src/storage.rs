// SPDX-License-Identifier: GPL-3.0-only

//! Durable storage of captured artifacts
//!
//! Each artifact may be stored exactly once. The write itself runs in a
//! detached task so it never blocks the interactive path and is not torn
//! down half-way if the caller goes away.

use crate::capture::{ArtifactId, CapturedArtifact, RawImage};
use crate::constants::PHOTO_FILE_PREFIX;
use crate::errors::{CaptureError, CaptureResult, HostError};
use crate::permissions::{Capability, PermissionGate};
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};

/// Host media library
#[async_trait]
pub trait StorageHost: Send + Sync {
    /// Write the image atomically and return its locator
    ///
    /// Either the whole file is visible at the returned uri or nothing is.
    async fn write_to_library(&self, image: &RawImage, name_hint: &str)
    -> Result<String, HostError>;
}

/// Result of a successful store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    /// Opaque locator returned by the host
    pub storage_uri: String,
    /// Back-reference to the stored artifact
    pub artifact_id: ArtifactId,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Writing,
    Stored(String),
}

/// One slot per artifact this sink has seen
///
/// Entries are never evicted: the ledger grows by one short uri per stored
/// photo for the sink's lifetime, which is one capture screen. Build a new
/// sink per screen rather than sharing one across the process.
type Ledger = Arc<Mutex<HashMap<ArtifactId, Slot>>>;

/// Stores captured artifacts in the host library
pub struct PersistenceSink {
    gate: Arc<PermissionGate>,
    host: Arc<dyn StorageHost>,
    ledger: Ledger,
}

impl PersistenceSink {
    pub fn new(gate: Arc<PermissionGate>, host: Arc<dyn StorageHost>) -> Self {
        Self {
            gate,
            host,
            ledger: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Persist an artifact
    ///
    /// # Errors
    /// * `StorageUnauthorized` - storage authorization is not granted
    /// * `DuplicateStore` - the artifact was already stored or is being stored
    /// * `StorageFailed` - the host write failed; the artifact may be stored again
    pub async fn store(&self, artifact: &CapturedArtifact) -> CaptureResult<PersistedRecord> {
        let status = self.gate.status(Capability::Storage);
        if !status.is_granted() {
            warn!(artifact = %artifact.id(), status = %status, "Storage not authorized");
            return Err(CaptureError::StorageUnauthorized);
        }

        let id = artifact.id();
        {
            let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
            if ledger.contains_key(&id) {
                error!(artifact = %id, "Artifact handed to persistence twice");
                return Err(CaptureError::DuplicateStore);
            }
            ledger.insert(id, Slot::Writing);
        }

        let name = file_stem(artifact);
        let image = artifact.image().clone();
        let host = Arc::clone(&self.host);
        let ledger = Arc::clone(&self.ledger);

        info!(artifact = %id, name = %name, bytes = image.len(), "Persisting artifact");

        let write = tokio::spawn(async move {
            let result = host.write_to_library(&image, &name).await;
            let mut ledger = ledger.lock().unwrap_or_else(PoisonError::into_inner);
            match &result {
                Ok(uri) => {
                    ledger.insert(id, Slot::Stored(uri.clone()));
                }
                Err(_) => {
                    ledger.remove(&id);
                }
            }
            result
        });

        let storage_uri = match write.await {
            Ok(Ok(uri)) => uri,
            Ok(Err(e)) => {
                warn!(artifact = %id, error = %e, "Library write failed");
                return Err(CaptureError::StorageFailed(e.to_string()));
            }
            Err(e) => {
                self.release(id);
                error!(artifact = %id, error = %e, "Library write task failed");
                return Err(CaptureError::StorageFailed(format!("write task failed: {}", e)));
            }
        };

        info!(artifact = %id, uri = %storage_uri, "Artifact persisted");

        Ok(PersistedRecord {
            storage_uri,
            artifact_id: id,
            stored_at: Utc::now(),
        })
    }

    /// Whether the artifact has been durably stored
    pub fn is_stored(&self, id: ArtifactId) -> bool {
        let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(ledger.get(&id), Some(Slot::Stored(_)))
    }

    /// Locator of a stored artifact
    pub fn uri_of(&self, id: ArtifactId) -> Option<String> {
        let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        match ledger.get(&id) {
            Some(Slot::Stored(uri)) => Some(uri.clone()),
            _ => None,
        }
    }

    fn release(&self, id: ArtifactId) {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        if ledger.get(&id) == Some(&Slot::Writing) {
            ledger.remove(&id);
        }
    }
}

/// `IMG_<local timestamp>_<short id>`, extension added by the host
fn file_stem(artifact: &CapturedArtifact) -> String {
    let timestamp = artifact
        .captured_at()
        .with_timezone(&Local)
        .format("%Y%m%d_%H%M%S");
    format!("{}_{}_{}", PHOTO_FILE_PREFIX, timestamp, artifact.id().short())
}
