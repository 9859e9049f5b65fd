// SPDX-License-Identifier: GPL-3.0-only

//! Permission gate for capture, storage and notification capabilities
//!
//! Each capability has its own authorization cell with an explicit state
//! machine:
//!
//! ```text
//!                 prompt / host query
//! Undetermined ─────────────────────────┬──▶ Granted
//!                                       └──▶ Denied
//!
//! Denied ──retry (user initiated)──▶ Granted
//! Granted ──revoked (host query)───▶ Denied
//! ```
//!
//! A capability that has been denied is never prompted again unless the user
//! explicitly asks for it through [`PermissionGate::retry`].

mod authorization;

pub use authorization::{TransitionOrigin, transition};

use crate::errors::HostError;
use async_trait::async_trait;
use authorization::Authorization;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Authorization state of one capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PermissionStatus {
    /// The user has not been asked yet
    #[default]
    Undetermined,
    /// The user refused access
    Denied,
    /// The user allowed access
    Granted,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        self == PermissionStatus::Granted
    }
}

impl std::fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionStatus::Undetermined => write!(f, "undetermined"),
            PermissionStatus::Denied => write!(f, "denied"),
            PermissionStatus::Granted => write!(f, "granted"),
        }
    }
}

/// A gated platform feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Camera hardware
    Capture,
    /// Writing to the media library
    Storage,
    /// User-visible notifications
    Notifications,
}

impl Capability {
    /// All capabilities, for status listings
    pub const ALL: [Capability; 3] = [
        Capability::Capture,
        Capability::Storage,
        Capability::Notifications,
    ];

    fn index(self) -> usize {
        match self {
            Capability::Capture => 0,
            Capability::Storage => 1,
            Capability::Notifications => 2,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Capture => write!(f, "capture"),
            Capability::Storage => write!(f, "storage"),
            Capability::Notifications => write!(f, "notifications"),
        }
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "capture" | "camera" => Ok(Capability::Capture),
            "storage" | "library" => Ok(Capability::Storage),
            "notifications" | "notification" => Ok(Capability::Notifications),
            other => Err(format!("Unknown capability: {}", other)),
        }
    }
}

/// Host permission subsystem
///
/// `query` must not show any UI. `prompt` presents the modal system dialog
/// and resolves once the user answered it.
#[async_trait]
pub trait PermissionHost: Send + Sync {
    /// Current status as known by the platform
    async fn query(&self, capability: Capability) -> Result<PermissionStatus, HostError>;

    /// Show the system prompt and wait for the answer
    async fn prompt(&self, capability: Capability) -> Result<PermissionStatus, HostError>;
}

/// Tracks and requests authorization for every [`Capability`]
pub struct PermissionGate {
    host: Arc<dyn PermissionHost>,
    cells: [Authorization; 3],
}

impl PermissionGate {
    pub fn new(host: Arc<dyn PermissionHost>) -> Self {
        Self {
            host,
            cells: Capability::ALL.map(Authorization::new),
        }
    }

    fn cell(&self, capability: Capability) -> &Authorization {
        &self.cells[capability.index()]
    }

    /// Cached status, no side effect
    pub fn status(&self, capability: Capability) -> PermissionStatus {
        self.cell(capability).status()
    }

    /// Resolve the status, prompting only if it is still undetermined
    ///
    /// Concurrent calls for the same capability share one prompt. Denied and
    /// Granted return immediately. Never fails: a prompt the platform cannot
    /// show resolves to [`PermissionStatus::Denied`].
    pub async fn ensure(&self, capability: Capability) -> PermissionStatus {
        self.cell(capability).ensure(self.host.as_ref()).await
    }

    /// Explicit, user-initiated "request again"
    pub async fn retry(&self, capability: Capability) -> PermissionStatus {
        debug!(capability = %capability, "User requested permission retry");
        self.cell(capability).retry(self.host.as_ref()).await
    }

    /// Re-read the platform status to observe revocation
    pub async fn refresh(&self, capability: Capability) -> PermissionStatus {
        self.cell(capability).refresh(self.host.as_ref()).await
    }

    /// Number of interactive prompts actually shown for a capability
    pub fn prompt_count(&self, capability: Capability) -> u64 {
        self.cell(capability).prompt_count()
    }
}

impl std::fmt::Debug for PermissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionGate")
            .field("capture", &self.status(Capability::Capture))
            .field("storage", &self.status(Capability::Storage))
            .field("notifications", &self.status(Capability::Notifications))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryPermissions;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ensure_prompts_once_when_undetermined() {
        let host = Arc::new(MemoryPermissions::new());
        host.answer(Capability::Capture, PermissionStatus::Granted);
        let gate = PermissionGate::new(host.clone());

        assert_eq!(gate.status(Capability::Capture), PermissionStatus::Undetermined);
        assert_eq!(gate.ensure(Capability::Capture).await, PermissionStatus::Granted);
        assert_eq!(gate.ensure(Capability::Capture).await, PermissionStatus::Granted);
        assert_eq!(host.prompts(Capability::Capture), 1);
        assert_eq!(gate.prompt_count(Capability::Capture), 1);
    }

    #[tokio::test]
    async fn test_denied_is_not_reprompted() {
        let host = Arc::new(MemoryPermissions::new());
        host.answer(Capability::Storage, PermissionStatus::Denied);
        let gate = PermissionGate::new(host.clone());

        assert_eq!(gate.ensure(Capability::Storage).await, PermissionStatus::Denied);
        host.answer(Capability::Storage, PermissionStatus::Granted);
        assert_eq!(gate.ensure(Capability::Storage).await, PermissionStatus::Denied);
        assert_eq!(host.prompts(Capability::Storage), 1);

        // Only the explicit retry path asks again
        assert_eq!(gate.retry(Capability::Storage).await, PermissionStatus::Granted);
        assert_eq!(host.prompts(Capability::Storage), 2);
    }

    #[tokio::test]
    async fn test_host_known_status_skips_prompt() {
        let host = Arc::new(MemoryPermissions::new());
        host.set(Capability::Capture, PermissionStatus::Granted);
        let gate = PermissionGate::new(host.clone());

        assert_eq!(gate.ensure(Capability::Capture).await, PermissionStatus::Granted);
        assert_eq!(host.prompts(Capability::Capture), 0);
    }

    #[tokio::test]
    async fn test_prompt_failure_resolves_denied() {
        let host = Arc::new(MemoryPermissions::new());
        host.fail_prompts(Capability::Capture);
        let gate = PermissionGate::new(host);

        assert_eq!(gate.ensure(Capability::Capture).await, PermissionStatus::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_ensure_coalesces() {
        let host = Arc::new(MemoryPermissions::new());
        host.answer(Capability::Capture, PermissionStatus::Granted);
        host.set_prompt_delay(Duration::from_millis(200));
        let gate = PermissionGate::new(host.clone());

        let calls = (0..8).map(|_| gate.ensure(Capability::Capture));
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|s| *s == PermissionStatus::Granted));
        assert_eq!(host.prompts(Capability::Capture), 1);
    }

    #[tokio::test]
    async fn test_refresh_observes_revocation() {
        let host = Arc::new(MemoryPermissions::new());
        host.set(Capability::Notifications, PermissionStatus::Granted);
        let gate = PermissionGate::new(host.clone());
        assert_eq!(
            gate.ensure(Capability::Notifications).await,
            PermissionStatus::Granted
        );

        host.set(Capability::Notifications, PermissionStatus::Denied);
        assert_eq!(
            gate.refresh(Capability::Notifications).await,
            PermissionStatus::Denied
        );

        // The system never regrants on its own
        host.set(Capability::Notifications, PermissionStatus::Granted);
        assert_eq!(
            gate.refresh(Capability::Notifications).await,
            PermissionStatus::Denied
        );
    }

    #[test]
    fn test_capability_parsing() {
        assert_eq!("camera".parse::<Capability>(), Ok(Capability::Capture));
        assert_eq!("Storage".parse::<Capability>(), Ok(Capability::Storage));
        assert!("microphone".parse::<Capability>().is_err());
    }
}
