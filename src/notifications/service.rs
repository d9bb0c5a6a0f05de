use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::senders::{hal::HalSender, telegram::TelegramSender, NotificationSender};
use super::{AlertChannel, CalloutChannel, NotificationError};
use crate::config::MonitorConfig;

/// Routes alert text through the configured sender and callouts through HAL.
pub struct NotificationService {
    sender: Option<Arc<dyn NotificationSender>>,
    callout: Option<Arc<HalSender>>,
    error_group: i64,
}

impl NotificationService {
    pub fn new(
        sender: Option<Arc<dyn NotificationSender>>,
        callout: Option<Arc<HalSender>>,
        error_group: i64,
    ) -> Self {
        Self {
            sender,
            callout,
            error_group,
        }
    }

    /// HAL takes precedence when both HAL and Telegram are configured; callouts
    /// are only available through HAL.
    pub fn from_config(client: Client, config: &MonitorConfig) -> Self {
        let hal = config
            .hal_endpoint
            .as_deref()
            .map(|endpoint| Arc::new(HalSender::new(client.clone(), endpoint)));

        let sender: Option<Arc<dyn NotificationSender>> = match (&hal, &config.telegram_bot_token) {
            (Some(hal), _) => Some(hal.clone() as Arc<dyn NotificationSender>),
            (None, Some(token)) => Some(Arc::new(TelegramSender::new(client, token))),
            (None, None) => None,
        };

        match (&sender, &hal) {
            (Some(_), Some(_)) => info!("Notifications and callouts go through HAL."),
            (Some(_), None) => info!("Notifications go through Telegram; callouts are disabled."),
            _ => warn!("No notification backend configured; alerts will only be logged."),
        }

        Self::new(sender, hal, config.error_group)
    }

    async fn deliver(&self, group: i64, message: &str) -> Result<(), NotificationError> {
        let message = message.replace('_', " ");
        match &self.sender {
            Some(sender) => {
                sender.send(&group.to_string(), &message).await?;
                debug!(group = group, "Notification delivered.");
            }
            None => info!(group = group, message = %message, "Notification (no backend)."),
        }
        Ok(())
    }
}

#[async_trait]
impl AlertChannel for NotificationService {
    async fn send_text(&self, group: i64, message: &str) -> Result<(), NotificationError> {
        self.deliver(group, message).await
    }

    async fn send_error(&self, message: &str) -> Result<(), NotificationError> {
        self.deliver(self.error_group, message).await
    }
}

#[async_trait]
impl CalloutChannel for NotificationService {
    async fn invoke_callout(
        &self,
        group: i64,
        title: &str,
        message: &str,
    ) -> Result<(), NotificationError> {
        let hal = self
            .callout
            .as_ref()
            .ok_or(NotificationError::CalloutUnavailable)?;
        hal.send_callout(group, title, message).await?;
        info!(group = group, title = %title, "Callout invoked.");
        Ok(())
    }
}
