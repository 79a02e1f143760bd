//! Notification channel used by lifecycle and approval actions.
//!
//! Only the interface the engine's actions need: a typed notification kind,
//! a recipient list, and a one-line body. Template rendering and transport
//! live behind [`Notifier`] implementations outside this crate; the
//! [`LogNotifier`] and [`MemoryNotifier`] here cover the service logs, the
//! demo, and the tests.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
}

/// What happened, from the recipient's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    ConnectorFailed,
    DbaApproved,
    FullyApproved,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub subject_id: String,
    pub recipients: Vec<String>,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the tracing subscriber; the default for the
/// service until a real channel is wired in.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            kind = ?notification.kind,
            subject = %notification.subject_id,
            recipients = %notification.recipients.join(", "),
            body = %notification.body,
            "notification sent"
        );
        Ok(())
    }
}

/// Collects notifications in memory for assertions.
#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}
