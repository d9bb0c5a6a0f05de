use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Serialize;

use super::{check_status, NotificationSender, SenderError};

/// A sender for the HAL bot gateway, which fans messages out to chat groups
/// and owns the callout (paging) integration.
pub struct HalSender {
    client: Client,
    endpoint: String,
}

#[derive(Serialize)]
struct CalloutRequest<'a> {
    title: &'a str,
    message: &'a str,
}

impl HalSender {
    pub fn new(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    pub async fn send_callout(
        &self,
        group: i64,
        title: &str,
        message: &str,
    ) -> Result<(), SenderError> {
        let url = format!("{}/api/callout/{group}", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&CalloutRequest { title, message })
            .send()
            .await?;
        check_status("HAL callout", response).await
    }
}

#[async_trait]
impl NotificationSender for HalSender {
    async fn send(&self, destination: &str, message: &str) -> Result<(), SenderError> {
        if destination.is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "HAL group must not be empty.".to_string(),
            ));
        }
        let url = format!("{}/api/alert/{destination}", self.endpoint);
        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/text")
            .body(message.to_string())
            .send()
            .await?;
        check_status("HAL", response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn posts_text_alert_to_group() {
        let server = MockServer::start_async().await;
        let alert = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/alert/12").body("node down");
                then.status(200);
            })
            .await;

        let sender = HalSender::new(Client::new(), &format!("{}/", server.base_url()));
        sender.send("12", "node down").await.unwrap();
        alert.assert_async().await;
    }

    #[tokio::test]
    async fn posts_callout_as_json() {
        let server = MockServer::start_async().await;
        let callout = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/callout/3")
                    .json_body(serde_json::json!({"title": "t", "message": "m"}));
                then.status(200);
            })
            .await;

        let sender = HalSender::new(Client::new(), &server.base_url());
        sender.send_callout(3, "t", "m").await.unwrap();
        callout.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/alert/1");
                then.status(502).body("gateway down");
            })
            .await;

        let sender = HalSender::new(Client::new(), &server.base_url());
        let err = sender.send("1", "x").await.unwrap_err();
        assert!(err.to_string().contains("502"));
    }
}
