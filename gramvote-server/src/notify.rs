//! Outbound notification seam.
//!
//! Delivery is an external concern (email, push). The engine records
//! the notification row transactionally and then hands the message to a
//! `Notifier` after commit; a delivery failure is logged and swallowed,
//! never rolled back into the publish transaction.

use async_trait::async_trait;

use crate::model::NotificationMessage;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &NotificationMessage) -> anyhow::Result<()>;

    /// Retract a previously dispatched announcement, if the channel
    /// supports it. Best-effort, like `notify`.
    async fn retract(&self, message: &NotificationMessage) -> anyhow::Result<()>;
}

/// Notifier that only logs. The default until a real delivery channel
/// is wired in.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &NotificationMessage) -> anyhow::Result<()> {
        tracing::info!(
            "notification [{}] {}: {}",
            message.kind,
            message.title,
            message.message
        );
        Ok(())
    }

    async fn retract(&self, message: &NotificationMessage) -> anyhow::Result<()> {
        tracing::info!("retracting notification [{}] {}", message.kind, message.title);
        Ok(())
    }
}

/// Notifier that captures every message, for tests.
#[cfg(test)]
pub struct RecordingNotifier {
    pub sent: std::sync::Mutex<Vec<NotificationMessage>>,
    pub retracted: std::sync::Mutex<Vec<NotificationMessage>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            retracted: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &NotificationMessage) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn retract(&self, message: &NotificationMessage) -> anyhow::Result<()> {
        self.retracted.lock().unwrap().push(message.clone());
        Ok(())
    }
}
