// SPDX-License-Identifier: GPL-3.0-only

//! In-memory hosts
//!
//! Scriptable stand-ins for the platform subsystems, used by simulators and
//! tests. Every host counts its calls so callers can check that a
//! collaborator was (or was not) touched.

use crate::capture::{CaptureHost, DeviceHandle, Facing, RawImage};
use crate::errors::HostError;
use crate::notifications::{
    ChannelConfig, HostNotificationId, NotificationHost, NotificationRequest, PresentationOptions,
};
use crate::permissions::{Capability, PermissionHost, PermissionStatus};
use crate::storage::StorageHost;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ===== Permissions =====

#[derive(Debug, Clone)]
struct PermissionEntry {
    /// What the platform reports without asking
    status: PermissionStatus,
    /// What the user answers when prompted
    answer: PermissionStatus,
    fail_prompts: bool,
    prompts: u64,
    queries: u64,
}

impl Default for PermissionEntry {
    fn default() -> Self {
        Self {
            status: PermissionStatus::Undetermined,
            answer: PermissionStatus::Denied,
            fail_prompts: false,
            prompts: 0,
            queries: 0,
        }
    }
}

/// Permission subsystem with scripted answers
///
/// Every capability starts undetermined and a prompt answers Denied unless
/// told otherwise with [`MemoryPermissions::answer`].
#[derive(Debug, Default)]
pub struct MemoryPermissions {
    entries: Mutex<HashMap<Capability, PermissionEntry>>,
    prompt_delay: Mutex<Option<Duration>>,
}

impl MemoryPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// All capabilities already granted on the platform
    pub fn granting_all() -> Self {
        let permissions = Self::new();
        for capability in Capability::ALL {
            permissions.set(capability, PermissionStatus::Granted);
        }
        permissions
    }

    /// Set the platform status returned by `query`
    pub fn set(&self, capability: Capability, status: PermissionStatus) {
        lock(&self.entries).entry(capability).or_default().status = status;
    }

    /// Set what the user answers the next prompts
    pub fn answer(&self, capability: Capability, answer: PermissionStatus) {
        lock(&self.entries).entry(capability).or_default().answer = answer;
    }

    /// Make the prompt impossible to show
    pub fn fail_prompts(&self, capability: Capability) {
        lock(&self.entries).entry(capability).or_default().fail_prompts = true;
    }

    /// Time the user takes to answer
    pub fn set_prompt_delay(&self, delay: Duration) {
        *lock(&self.prompt_delay) = Some(delay);
    }

    pub fn prompts(&self, capability: Capability) -> u64 {
        lock(&self.entries)
            .get(&capability)
            .map_or(0, |entry| entry.prompts)
    }

    pub fn queries(&self, capability: Capability) -> u64 {
        lock(&self.entries)
            .get(&capability)
            .map_or(0, |entry| entry.queries)
    }
}

#[async_trait]
impl PermissionHost for MemoryPermissions {
    async fn query(&self, capability: Capability) -> Result<PermissionStatus, HostError> {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(capability).or_default();
        entry.queries += 1;
        Ok(entry.status)
    }

    async fn prompt(&self, capability: Capability) -> Result<PermissionStatus, HostError> {
        lock(&self.entries).entry(capability).or_default().prompts += 1;

        let delay = *lock(&self.prompt_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut entries = lock(&self.entries);
        let entry = entries.entry(capability).or_default();
        if entry.fail_prompts {
            return Err(HostError::Unsupported(format!(
                "no {} prompt on this device",
                capability
            )));
        }
        entry.status = entry.answer;
        Ok(entry.answer)
    }
}

// ===== Camera =====

#[derive(Debug)]
struct CameraState {
    next_handle: u64,
    open: HashSet<u64>,
    busy: bool,
    fail_next: Option<HostError>,
    image: RawImage,
    opens: usize,
    closes: usize,
}

/// Camera that returns a fixed still
#[derive(Debug)]
pub struct MemoryCamera {
    facings: Vec<Facing>,
    state: Mutex<CameraState>,
    capture_delay: Mutex<Option<Duration>>,
    captures: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MemoryCamera {
    /// Camera with front and back lenses
    pub fn new() -> Self {
        Self::with_facings(&[Facing::Front, Facing::Back])
    }

    pub fn with_facings(facings: &[Facing]) -> Self {
        Self {
            facings: facings.to_vec(),
            state: Mutex::new(CameraState {
                next_handle: 1,
                open: HashSet::new(),
                busy: false,
                fail_next: None,
                image: sample_image(),
                opens: 0,
                closes: 0,
            }),
            capture_delay: Mutex::new(None),
            captures: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Pretend another process holds the device
    pub fn set_busy(&self, busy: bool) {
        lock(&self.state).busy = busy;
    }

    pub fn set_capture_delay(&self, delay: Duration) {
        *lock(&self.capture_delay) = Some(delay);
    }

    pub fn set_image(&self, image: RawImage) {
        lock(&self.state).image = image;
    }

    pub fn fail_next_capture(&self, error: HostError) {
        lock(&self.state).fail_next = Some(error);
    }

    pub fn open_calls(&self) -> usize {
        lock(&self.state).opens
    }

    pub fn close_calls(&self) -> usize {
        lock(&self.state).closes
    }

    pub fn capture_calls(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    /// Highest number of `capture_still` calls that overlapped
    pub fn max_concurrent_captures(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn open_devices(&self) -> usize {
        lock(&self.state).open.len()
    }
}

impl Default for MemoryCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureHost for MemoryCamera {
    fn supports(&self, facing: Facing) -> bool {
        self.facings.contains(&facing)
    }

    async fn open_device(&self, facing: Facing) -> Result<DeviceHandle, HostError> {
        let mut state = lock(&self.state);
        state.opens += 1;
        if state.busy {
            return Err(HostError::Busy);
        }
        if !self.facings.contains(&facing) {
            return Err(HostError::Unsupported(format!("no {} lens", facing)));
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.open.insert(handle);
        Ok(DeviceHandle(handle))
    }

    async fn capture_still(&self, _handle: DeviceHandle) -> Result<RawImage, HostError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let delay = *lock(&self.capture_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let mut state = lock(&self.state);
        match state.fail_next.take() {
            Some(error) => Err(error),
            None => Ok(state.image.clone()),
        }
    }

    async fn close_device(&self, handle: DeviceHandle) {
        let mut state = lock(&self.state);
        state.closes += 1;
        state.open.remove(&handle.0);
    }
}

/// 2x2 PNG, so image metadata can be read
fn sample_image() -> RawImage {
    let mut bytes = Vec::new();
    let encoded = image::RgbImage::new(2, 2).write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    );
    if encoded.is_err() {
        bytes.clear();
    }
    RawImage::new(bytes, "png")
}

// ===== Library =====

#[derive(Debug, Default)]
struct LibraryState {
    records: Vec<String>,
    fail_next: Option<HostError>,
    writes: usize,
    write_delay: Option<Duration>,
}

/// Media library that keeps uris in memory
#[derive(Debug, Default)]
pub struct MemoryLibrary {
    state: Mutex<LibraryState>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_write(&self, error: HostError) {
        lock(&self.state).fail_next = Some(error);
    }

    /// Make every write take this long before it lands
    pub fn set_write_delay(&self, delay: Duration) {
        lock(&self.state).write_delay = Some(delay);
    }

    pub fn write_calls(&self) -> usize {
        lock(&self.state).writes
    }

    /// Uris of stored images, in write order
    pub fn records(&self) -> Vec<String> {
        lock(&self.state).records.clone()
    }
}

#[async_trait]
impl StorageHost for MemoryLibrary {
    async fn write_to_library(
        &self,
        image: &RawImage,
        name_hint: &str,
    ) -> Result<String, HostError> {
        let delay = lock(&self.state).write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        state.writes += 1;
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        let uri = format!("memory://library/{}.{}", name_hint, image.extension);
        state.records.push(uri.clone());
        Ok(uri)
    }
}

// ===== Notifications =====

#[derive(Debug)]
struct NotifierState {
    requires_channels: bool,
    presented: Vec<NotificationRequest>,
    presentations: Vec<PresentationOptions>,
    cancelled: Vec<HostNotificationId>,
    channels: Vec<(String, ChannelConfig)>,
    fail_present: Option<HostError>,
    push_token: Option<String>,
    push_calls: usize,
}

/// Notification subsystem that records everything it is asked to show
#[derive(Debug)]
pub struct MemoryNotifier {
    state: Mutex<NotifierState>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NotifierState {
                requires_channels: false,
                presented: Vec::new(),
                presentations: Vec::new(),
                cancelled: Vec::new(),
                channels: Vec::new(),
                fail_present: None,
                push_token: Some("MemoryPushToken[0000]".to_string()),
                push_calls: 0,
            }),
        }
    }

    pub fn set_requires_channels(&self, requires: bool) {
        lock(&self.state).requires_channels = requires;
    }

    /// Reject every `present` call with this error (`None` to accept again)
    pub fn fail_present(&self, error: Option<HostError>) {
        lock(&self.state).fail_present = error;
    }

    /// Token handed out by `push_token`; `None` behaves like a simulator
    pub fn set_push_token(&self, token: Option<String>) {
        lock(&self.state).push_token = token;
    }

    pub fn presented(&self) -> Vec<NotificationRequest> {
        lock(&self.state).presented.clone()
    }

    pub fn presentations(&self) -> Vec<PresentationOptions> {
        lock(&self.state).presentations.clone()
    }

    pub fn cancelled(&self) -> Vec<HostNotificationId> {
        lock(&self.state).cancelled.clone()
    }

    pub fn configure_calls(&self) -> usize {
        lock(&self.state).channels.len()
    }

    pub fn push_token_calls(&self) -> usize {
        lock(&self.state).push_calls
    }
}

impl Default for MemoryNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationHost for MemoryNotifier {
    fn requires_channels(&self) -> bool {
        lock(&self.state).requires_channels
    }

    async fn configure_channel(&self, id: &str, config: &ChannelConfig) -> Result<(), HostError> {
        lock(&self.state)
            .channels
            .push((id.to_string(), config.clone()));
        Ok(())
    }

    async fn present(
        &self,
        request: &NotificationRequest,
        presentation: &PresentationOptions,
    ) -> Result<HostNotificationId, HostError> {
        let mut state = lock(&self.state);
        if let Some(error) = state.fail_present.clone() {
            return Err(error);
        }
        state.presented.push(request.clone());
        state.presentations.push(*presentation);
        Ok(HostNotificationId(format!("memory-{}", state.presented.len())))
    }

    async fn cancel(&self, id: &HostNotificationId) -> Result<(), HostError> {
        lock(&self.state).cancelled.push(id.clone());
        Ok(())
    }

    async fn push_token(&self, project_id: &str) -> Result<String, HostError> {
        let mut state = lock(&self.state);
        state.push_calls += 1;
        state.push_token.clone().ok_or_else(|| {
            HostError::Unsupported(format!(
                "push notifications for {} need a physical device",
                project_id
            ))
        })
    }
}
