// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide notification dispatcher
//!
//! Channel configuration and push registration are device-level state, so the
//! app keeps exactly one dispatcher. [`init`] is the single initialization
//! point; it is idempotent and the first call wins.

use super::NotificationDispatcher;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

static CENTER: OnceLock<Arc<NotificationDispatcher>> = OnceLock::new();

/// Install the process-wide dispatcher
///
/// Later calls return the already installed dispatcher and drop the
/// candidate, so concurrent initializers are safe.
pub fn init(dispatcher: NotificationDispatcher) -> Arc<NotificationDispatcher> {
    let mut installed = false;
    let center = CENTER.get_or_init(|| {
        installed = true;
        Arc::new(dispatcher)
    });

    if installed {
        info!(presentation = ?center.presentation(), "Notification center initialized");
    } else {
        debug!("Notification center already initialized");
    }

    Arc::clone(center)
}

/// The process-wide dispatcher, if [`init`] has run
pub fn global() -> Option<Arc<NotificationDispatcher>> {
    CENTER.get().cloned()
}
