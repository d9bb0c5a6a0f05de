use async_trait::async_trait;
use thiserror::Error;

pub mod hal;
pub mod telegram;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// A delivery backend for plain text notifications.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Sends `message` to `destination`, a backend specific group or chat identifier.
    async fn send(&self, destination: &str, message: &str) -> Result<(), SenderError>;
}

/// Turns a non-success response into [`SenderError::SendFailed`].
pub(crate) async fn check_status(
    backend: &str,
    response: reqwest::Response,
) -> Result<(), SenderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let error_body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error body".to_string());
    Err(SenderError::SendFailed(format!(
        "{backend} returned non-success status: {status}. Body: {error_body}"
    )))
}
