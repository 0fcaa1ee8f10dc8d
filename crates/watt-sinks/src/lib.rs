//! Notification channels
//!
//! Delivery to phones or browsers is owned by an external worker; these
//! notifiers hand notifications off to it (outbox file) or to the log.

use anyhow::Result;
use std::fs::{create_dir_all, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use watt_core::{Notification, Notifier};

/// Appends each notification as one JSON line to `notifications.jsonl`
pub struct OutboxNotifier {
    file: PathBuf,
    lock: Mutex<()>,
}

impl OutboxNotifier {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        create_dir_all(dir)?;
        Ok(Self {
            file: dir.join("notifications.jsonl"),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.file
    }
}

#[async_trait::async_trait]
impl Notifier for OutboxNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let line = serde_json::to_string(notification)?;
        let _guard = self.lock.lock().await;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file)?;
        f.write_all(line.as_bytes())?;
        f.write_all(b"\n")?;
        Ok(())
    }
}

/// Logs notifications instead of delivering them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            device_id = %notification.device_id,
            title = %notification.title,
            body = %notification.body,
            "Notification"
        );
        Ok(())
    }
}

/// Sends to every inner notifier; fails if any of them failed
pub struct FanoutNotifier {
    inner: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(inner: Vec<Arc<dyn Notifier>>) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let mut failures = Vec::new();
        for notifier in &self.inner {
            if let Err(e) = notifier.notify(notification).await {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "{} of {} notifiers failed: {}",
                failures.len(),
                self.inner.len(),
                failures.join("; ")
            )
        }
    }
}
