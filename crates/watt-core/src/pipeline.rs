use anyhow::Result;

use crate::Notification;

/// Fire-and-forget delivery of alert and anomaly notifications.
///
/// Callers treat failures as best-effort: the stored event is the record of
/// truth, a failed notification is only logged.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Notifier that drops everything, for deployments without a push channel
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait::async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _notification: &Notification) -> Result<()> {
        Ok(())
    }
}
