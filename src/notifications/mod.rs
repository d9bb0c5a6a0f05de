//! Outbound alert and callout delivery.
//!
//! The polling engine only talks to [`AlertChannel`] and [`CalloutChannel`];
//! [`service::NotificationService`] implements both on top of the configured
//! senders.
use async_trait::async_trait;
use thiserror::Error;
use tracing::error;

pub mod senders;
pub mod service;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Sender error: {0}")]
    SenderError(#[from] senders::SenderError),
    #[error("No callout channel is configured")]
    CalloutUnavailable,
}

/// Passive chat notifications.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send_text(&self, group: i64, message: &str) -> Result<(), NotificationError>;

    /// Sends to the technical error group.
    async fn send_error(&self, message: &str) -> Result<(), NotificationError>;
}

/// Paging of the on-call responder.
#[async_trait]
pub trait CalloutChannel: Send + Sync {
    async fn invoke_callout(
        &self,
        group: i64,
        title: &str,
        message: &str,
    ) -> Result<(), NotificationError>;
}

/// Fire-and-forget wrapper around [`AlertChannel::send_error`].
pub async fn report_error(alerts: &dyn AlertChannel, message: &str) {
    if let Err(e) = alerts.send_error(message).await {
        error!(error = %e, message = %message, "Failed to deliver error notification.");
    }
}

/// Fire-and-forget wrapper around [`AlertChannel::send_text`].
pub async fn notify(alerts: &dyn AlertChannel, group: i64, message: &str) {
    if let Err(e) = alerts.send_text(group, message).await {
        error!(group = group, error = %e, "Failed to deliver notification.");
    }
}
