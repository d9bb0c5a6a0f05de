use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{check_status, NotificationSender, SenderError};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// A sender for pushing notifications via the Telegram Bot API.
/// The destination is used as the chat id.
pub struct TelegramSender {
    client: Client,
    api_base: String,
    bot_token: String,
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

impl TelegramSender {
    pub fn new(client: Client, bot_token: &str) -> Self {
        Self::with_api_base(client, TELEGRAM_API, bot_token)
    }

    pub fn with_api_base(client: Client, api_base: &str, bot_token: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
        }
    }
}

/// Escapes text for Telegram MarkdownV2.
fn escape_markdown_v2(text: &str) -> String {
    let mut escaped_text = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|'
                | '{' | '}' | '.' | '!'
        ) {
            escaped_text.push('\\');
        }
        escaped_text.push(c);
    }
    escaped_text
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send(&self, destination: &str, message: &str) -> Result<(), SenderError> {
        if self.bot_token.is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "Telegram bot token is empty.".to_string(),
            ));
        }
        let api_url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let escaped_message = escape_markdown_v2(message);
        let payload = TelegramMessage {
            chat_id: destination,
            text: &escaped_message,
            parse_mode: "MarkdownV2",
        };

        let response = self.client.post(&api_url).json(&payload).send().await?;
        check_status("Telegram API", response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn escapes_markdown_control_characters() {
        assert_eq!(escape_markdown_v2("3.5% (high)!"), "3\\.5% \\(high\\)\\!");
        assert_eq!(escape_markdown_v2("plain"), "plain");
    }

    #[tokio::test]
    async fn sends_escaped_message_to_chat() {
        let server = MockServer::start_async().await;
        let api = server
            .mock_async(|when, then| {
                when.method(POST).path("/botTOKEN/sendMessage").json_body(serde_json::json!({
                    "chat_id": "-100",
                    "text": "a\\.b",
                    "parse_mode": "MarkdownV2"
                }));
                then.status(200).json_body(serde_json::json!({"ok": true}));
            })
            .await;

        let sender = TelegramSender::with_api_base(Client::new(), &server.base_url(), "TOKEN");
        sender.send("-100", "a.b").await.unwrap();
        api.assert_async().await;
    }
}
