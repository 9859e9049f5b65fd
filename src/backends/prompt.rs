// SPDX-License-Identifier: GPL-3.0-only

//! Terminal permission prompts with remembered answers
//!
//! Desktop systems have no permission dialog for these capabilities, so the
//! question is asked on the controlling terminal and the answer is stored in
//! a JSON file, the way a mobile OS remembers it across launches.

use crate::constants;
use crate::errors::HostError;
use crate::permissions::{Capability, PermissionHost, PermissionStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Shows a question and returns the line typed in reply; runs on a blocking thread
type AskFn = Arc<dyn Fn(&str) -> std::io::Result<String> + Send + Sync>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredDecisions {
    #[serde(default)]
    decisions: BTreeMap<Capability, PermissionStatus>,
}

/// Permission host backed by terminal prompts and a decisions file
pub struct TerminalPermissions {
    path: PathBuf,
    /// Serializes read-modify-write of the decisions file
    file_lock: tokio::sync::Mutex<()>,
    /// One question on the terminal at a time, so each typed line answers its own prompt
    terminal: tokio::sync::Mutex<()>,
    ask: AskFn,
}

impl TerminalPermissions {
    pub fn new(path: PathBuf) -> Self {
        Self::with_ask(path, Arc::new(ask_on_terminal))
    }

    fn with_ask(path: PathBuf, ask: AskFn) -> Self {
        Self {
            path,
            file_lock: tokio::sync::Mutex::new(()),
            terminal: tokio::sync::Mutex::new(()),
            ask,
        }
    }

    async fn load(&self) -> Result<StoredDecisions, HostError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                HostError::Other(format!("invalid {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredDecisions::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remember a decision for later queries
    pub async fn record(
        &self,
        capability: Capability,
        status: PermissionStatus,
    ) -> Result<(), HostError> {
        let _guard = self.file_lock.lock().await;
        let mut stored = self.load().await?;
        stored.decisions.insert(capability, status);

        let text = serde_json::to_string_pretty(&stored)
            .map_err(|e| HostError::Other(format!("failed to encode decisions: {}", e)))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, text).await?;

        debug!(capability = %capability, status = %status, "Permission decision stored");
        Ok(())
    }
}

#[async_trait]
impl PermissionHost for TerminalPermissions {
    async fn query(&self, capability: Capability) -> Result<PermissionStatus, HostError> {
        let _guard = self.file_lock.lock().await;
        let stored = self.load().await?;
        Ok(stored
            .decisions
            .get(&capability)
            .copied()
            .unwrap_or_default())
    }

    async fn prompt(&self, capability: Capability) -> Result<PermissionStatus, HostError> {
        let question = format!(
            "Allow {} to {}? [y/N] ",
            constants::APP_NAME,
            describe(capability)
        );

        let answer = {
            let _terminal = self.terminal.lock().await;
            let ask = Arc::clone(&self.ask);
            tokio::task::spawn_blocking(move || ask(&question))
                .await
                .map_err(|e| HostError::Other(format!("Prompt task error: {}", e)))??
        };

        let status = parse_answer(&answer);
        info!(capability = %capability, status = %status, "User answered permission prompt");

        self.record(capability, status).await?;
        Ok(status)
    }
}

impl std::fmt::Debug for TerminalPermissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalPermissions")
            .field("path", &self.path)
            .finish()
    }
}

fn ask_on_terminal(question: &str) -> std::io::Result<String> {
    if !std::io::stdin().is_terminal() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "no interactive terminal to ask for permission",
        ));
    }

    let mut stdout = std::io::stdout();
    stdout.write_all(question.as_bytes())?;
    stdout.flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

fn describe(capability: Capability) -> &'static str {
    match capability {
        Capability::Capture => "use the camera",
        Capability::Storage => "save photos to your library",
        Capability::Notifications => "send you notifications",
    }
}

fn parse_answer(line: &str) -> PermissionStatus {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => PermissionStatus::Granted,
        _ => PermissionStatus::Denied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers "y" for the camera and "n" otherwise, recording the transcript
    fn scripted(
        transcript: Arc<Mutex<Vec<String>>>,
        active: Arc<AtomicUsize>,
        max: Arc<AtomicUsize>,
    ) -> AskFn {
        Arc::new(move |question: &str| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            max.fetch_max(now, Ordering::SeqCst);
            transcript.lock().unwrap().push(question.to_string());
            std::thread::sleep(Duration::from_millis(50));
            let answer = if question.contains("camera") { "y\n" } else { "n\n" };
            transcript.lock().unwrap().push(answer.to_string());
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(answer.to_string())
        })
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("y\n"), PermissionStatus::Granted);
        assert_eq!(parse_answer(" YES "), PermissionStatus::Granted);
        assert_eq!(parse_answer("\n"), PermissionStatus::Denied);
        assert_eq!(parse_answer("nope"), PermissionStatus::Denied);
    }

    #[tokio::test]
    async fn test_decisions_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let host = TerminalPermissions::new(dir.path().join("state").join("permissions.json"));

        assert_eq!(
            host.query(Capability::Capture).await,
            Ok(PermissionStatus::Undetermined)
        );

        host.record(Capability::Capture, PermissionStatus::Granted)
            .await
            .unwrap();
        host.record(Capability::Storage, PermissionStatus::Denied)
            .await
            .unwrap();

        let reopened = TerminalPermissions::new(dir.path().join("state").join("permissions.json"));
        assert_eq!(
            reopened.query(Capability::Capture).await,
            Ok(PermissionStatus::Granted)
        );
        assert_eq!(
            reopened.query(Capability::Storage).await,
            Ok(PermissionStatus::Denied)
        );
    }

    #[tokio::test]
    async fn test_decisions_file_lists_capabilities_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");
        let host = TerminalPermissions::new(path.clone());

        host.record(Capability::Notifications, PermissionStatus::Granted)
            .await
            .unwrap();
        host.record(Capability::Capture, PermissionStatus::Denied)
            .await
            .unwrap();
        host.record(Capability::Storage, PermissionStatus::Granted)
            .await
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let capture = text.find("\"capture\"").unwrap();
        let storage = text.find("\"storage\"").unwrap();
        let notifications = text.find("\"notifications\"").unwrap();
        assert!(capture < storage && storage < notifications, "{}", text);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_prompts_take_turns_on_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = Arc::new(Mutex::new(Vec::new()));
        let active = Arc::new(AtomicUsize::new(0));
        let max = Arc::new(AtomicUsize::new(0));
        let host = TerminalPermissions::with_ask(
            dir.path().join("permissions.json"),
            scripted(transcript.clone(), active, max.clone()),
        );

        let (capture, storage) = tokio::join!(
            host.prompt(Capability::Capture),
            host.prompt(Capability::Storage)
        );

        assert_eq!(capture, Ok(PermissionStatus::Granted));
        assert_eq!(storage, Ok(PermissionStatus::Denied));
        assert_eq!(max.load(Ordering::SeqCst), 1);

        // Every question is followed by its own answer
        let transcript = transcript.lock().unwrap().clone();
        assert_eq!(transcript.len(), 4);
        for pair in transcript.chunks(2) {
            assert!(pair[0].starts_with("Allow"));
            assert!(!pair[1].starts_with("Allow"));
        }
        assert_eq!(host.query(Capability::Capture).await, Ok(PermissionStatus::Granted));
        assert_eq!(host.query(Capability::Storage).await, Ok(PermissionStatus::Denied));
    }
}
