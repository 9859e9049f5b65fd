// SPDX-License-Identifier: GPL-3.0-only

//! Single-capability authorization cell

use super::{Capability, PermissionHost, PermissionStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// What caused a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOrigin {
    /// Status read from the platform without any UI
    HostQuery,
    /// Answer to the first interactive prompt
    Prompt,
    /// Answer to an explicit user-initiated re-prompt
    Retry,
}

/// Next status for a proposed change, or `None` if the change is not allowed
///
/// Nothing ever returns to Undetermined, and Denied only becomes Granted
/// through [`TransitionOrigin::Retry`].
pub fn transition(
    from: PermissionStatus,
    to: PermissionStatus,
    origin: TransitionOrigin,
) -> Option<PermissionStatus> {
    use PermissionStatus::*;

    match (from, to) {
        (a, b) if a == b => None,
        (_, Undetermined) => None,
        (Undetermined, next) => Some(next),
        (Denied, Granted) if origin == TransitionOrigin::Retry => Some(Granted),
        (Denied, Granted) => None,
        (Granted, Denied) => Some(Denied),
        _ => None,
    }
}

pub(super) struct Authorization {
    capability: Capability,
    status: Mutex<PermissionStatus>,
    /// Held for the duration of a prompt; makes prompting single-flight
    prompt_lock: tokio::sync::Mutex<()>,
    /// Bumped each time a prompt round finishes
    epoch: AtomicU64,
    prompts: AtomicU64,
}

impl Authorization {
    pub(super) fn new(capability: Capability) -> Self {
        Self {
            capability,
            status: Mutex::new(PermissionStatus::Undetermined),
            prompt_lock: tokio::sync::Mutex::new(()),
            epoch: AtomicU64::new(0),
            prompts: AtomicU64::new(0),
        }
    }

    pub(super) fn status(&self) -> PermissionStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn prompt_count(&self) -> u64 {
        self.prompts.load(Ordering::Relaxed)
    }

    fn apply(&self, next: PermissionStatus, origin: TransitionOrigin) -> PermissionStatus {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        match transition(*status, next, origin) {
            Some(updated) => {
                info!(
                    capability = %self.capability,
                    from = %*status,
                    to = %updated,
                    origin = ?origin,
                    "Permission status changed"
                );
                *status = updated;
            }
            None if next != *status => {
                debug!(
                    capability = %self.capability,
                    current = %*status,
                    proposed = %next,
                    origin = ?origin,
                    "Ignoring disallowed permission transition"
                );
            }
            None => {}
        }
        *status
    }

    async fn prompt(&self, host: &dyn PermissionHost) -> PermissionStatus {
        self.prompts.fetch_add(1, Ordering::Relaxed);
        info!(capability = %self.capability, "Prompting user for permission");

        match host.prompt(self.capability).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(capability = %self.capability, error = %e, "Permission prompt unavailable");
                PermissionStatus::Denied
            }
        }
    }

    pub(super) async fn ensure(&self, host: &dyn PermissionHost) -> PermissionStatus {
        // Epoch is read before status so a prompt finishing in between is noticed
        let epoch = self.epoch.load(Ordering::Acquire);
        let current = self.status();
        if current != PermissionStatus::Undetermined {
            return current;
        }

        let _guard = self.prompt_lock.lock().await;

        // A prompt finished while we were waiting: adopt its answer
        let current = self.status();
        if current != PermissionStatus::Undetermined
            || self.epoch.load(Ordering::Acquire) != epoch
        {
            return current;
        }

        let known = match host.query(self.capability).await {
            Ok(status) => status,
            Err(e) => {
                debug!(capability = %self.capability, error = %e, "Permission query failed");
                PermissionStatus::Undetermined
            }
        };

        let resolved = if known != PermissionStatus::Undetermined {
            self.apply(known, TransitionOrigin::HostQuery)
        } else {
            let answer = self.prompt(host).await;
            self.apply(answer, TransitionOrigin::Prompt)
        };

        self.epoch.fetch_add(1, Ordering::Release);
        resolved
    }

    pub(super) async fn retry(&self, host: &dyn PermissionHost) -> PermissionStatus {
        let epoch = self.epoch.load(Ordering::Acquire);
        let _guard = self.prompt_lock.lock().await;

        if self.epoch.load(Ordering::Acquire) != epoch {
            return self.status();
        }

        let current = self.status();
        if current == PermissionStatus::Granted {
            return current;
        }

        let answer = self.prompt(host).await;
        let resolved = self.apply(answer, TransitionOrigin::Retry);
        self.epoch.fetch_add(1, Ordering::Release);
        resolved
    }

    pub(super) async fn refresh(&self, host: &dyn PermissionHost) -> PermissionStatus {
        match host.query(self.capability).await {
            Ok(status) => self.apply(status, TransitionOrigin::HostQuery),
            Err(e) => {
                debug!(capability = %self.capability, error = %e, "Permission query failed");
                self.status()
            }
        }
    }
}
