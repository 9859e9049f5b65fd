// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - Taking a photo through the full capture pipeline
//! - Inspecting and re-requesting permissions
//! - Sending notifications and registering for push

use camera_core::backends::DesktopHosts;
use camera_core::capture::{CaptureController, Facing};
use camera_core::config::Config;
use camera_core::errors::CaptureError;
use camera_core::notifications::{ErrorSink, NotificationDispatcher, NotificationRequest, center};
use camera_core::permissions::{Capability, PermissionGate, PermissionStatus};
use camera_core::pipeline::{CapturePipeline, PipelineSettings};
use camera_core::storage::PersistenceSink;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Longest wait for a delayed notification after its due time
const DELIVERY_GRACE: Duration = Duration::from_secs(5);

/// Everything a command needs, built from the config file
struct Context {
    config: Config,
    hosts: DesktopHosts,
    gate: Arc<PermissionGate>,
}

impl Context {
    fn load(config_path: Option<PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = match config_path {
            Some(path) => path,
            None => Config::default_path()?,
        };
        let config = Config::load_or_default(&path)?;
        let hosts = DesktopHosts::from_config(&config)?;
        let gate = Arc::new(PermissionGate::new(hosts.permission_host()));

        Ok(Self {
            config,
            hosts,
            gate,
        })
    }

    /// Install the process-wide dispatcher and re-arm queued notifications
    async fn dispatcher(&self) -> Arc<NotificationDispatcher> {
        let mut dispatcher = NotificationDispatcher::new(self.gate.clone(), self.hosts.notification_host())
            .with_presentation(self.config.notification.presentation);
        if let Some(project_id) = &self.config.push_project_id {
            dispatcher = dispatcher.with_push_project(project_id.clone());
        }
        let dispatcher = center::init(dispatcher);

        if let Err(e) = self.hosts.notifier.restore_pending().await {
            warn!(error = %e, "Failed to restore pending notifications");
        }

        dispatcher
    }

    /// Ask for notification permission and set up the configured channel
    ///
    /// Notifications are optional, so failures only log.
    async fn prepare_notifications(&self, dispatcher: &NotificationDispatcher) {
        let status = dispatcher.request_authorization().await;
        if !status.is_granted() {
            info!(status = %status, "Notifications not authorized");
            return;
        }

        let settings = &self.config.notification;
        if let Err(e) = dispatcher
            .configure_channel(&settings.channel_id, settings.channel.clone())
            .await
        {
            warn!(channel = %settings.channel_id, error = %e, "Failed to configure channel");
        }
    }
}

/// Take a photo and save it to the library
pub async fn capture(config_path: Option<PathBuf>, facing: Option<Facing>) -> CliResult {
    let ctx = Context::load(config_path)?;
    let facing = facing.unwrap_or(ctx.config.default_facing);

    let dispatcher = ctx.dispatcher().await;
    ctx.prepare_notifications(&dispatcher).await;

    let controller = Arc::new(CaptureController::new(
        ctx.gate.clone(),
        ctx.hosts.capture_host(),
    ));
    let sink = Arc::new(PersistenceSink::new(
        ctx.gate.clone(),
        ctx.hosts.storage_host(),
    ));

    let settings = PipelineSettings {
        teardown: ctx.config.teardown_policy,
        notification_title: ctx.config.notification.capture_title.clone(),
        channel_id: ctx.config.notification.channel_id.clone(),
    };
    let error_sink: ErrorSink = Arc::new(|e: CaptureError| {
        eprintln!("Notification not delivered: {}", e);
    });
    let pipeline = CapturePipeline::new(ctx.gate.clone(), controller, sink, dispatcher)
        .with_settings(settings)
        .with_error_sink(error_sink);

    let result = pipeline.request_capture(facing).await;
    pipeline.flush_notifications().await;
    pipeline.teardown().await;

    match result {
        Ok(record) => {
            println!("Photo saved: {}", record.storage_uri);
            Ok(())
        }
        Err(CaptureError::PermissionDenied(capability)) => {
            println!("Permission denied: {}", capability);
            println!(
                "Run `{} retry {}` to request it again.",
                camera_core::constants::APP_ID,
                capability
            );
            Err(CaptureError::PermissionDenied(capability).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Print the known status of every capability without prompting
pub async fn permissions(config_path: Option<PathBuf>) -> CliResult {
    let ctx = Context::load(config_path)?;

    println!("Permissions:");
    for capability in Capability::ALL {
        let status = ctx.gate.refresh(capability).await;
        println!("  {:<14} {}", capability, status);
    }

    Ok(())
}

/// Ask again for a capability the user denied earlier
pub async fn retry(config_path: Option<PathBuf>, capability: Capability) -> CliResult {
    let ctx = Context::load(config_path)?;

    let before = ctx.gate.refresh(capability).await;
    if before == PermissionStatus::Granted {
        println!("{}: already granted", capability);
        return Ok(());
    }

    let status = ctx.gate.retry(capability).await;
    println!("{}: {}", capability, status);
    Ok(())
}

/// Send a notification, optionally after a delay
pub async fn notify(
    config_path: Option<PathBuf>,
    title: String,
    body: String,
    delay: Option<u64>,
) -> CliResult {
    let ctx = Context::load(config_path)?;
    let dispatcher = ctx.dispatcher().await;
    ctx.prepare_notifications(&dispatcher).await;

    let request = match delay {
        Some(seconds) => {
            let fire_at = Utc::now() + chrono::Duration::seconds(seconds as i64);
            NotificationRequest::delayed(title, body, fire_at)
        }
        None => NotificationRequest::immediate(title, body),
    }
    .on_channel(ctx.config.notification.channel_id.clone());

    let handle = dispatcher.schedule(request).await?;
    println!("Notification scheduled: {}", handle.0);

    if let Some(seconds) = delay {
        // Delayed notifications live in this process until they fire
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        let deadline = tokio::time::Instant::now() + DELIVERY_GRACE;
        while ctx.hosts.notifier.pending_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    Ok(())
}

/// Register for push notifications and print the token
pub async fn push(config_path: Option<PathBuf>) -> CliResult {
    let ctx = Context::load(config_path)?;
    let dispatcher = ctx.dispatcher().await;

    let registration = dispatcher.register_push().await?;
    println!("Push token: {}", registration.token);
    Ok(())
}
