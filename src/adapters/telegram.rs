//! Telegram Bot API messenger
//!
//! The engine only needs a narrow send primitive; message templating and the
//! rest of the bot surface live elsewhere.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::{Result, TradegramError};

/// Outbound messaging collaborator, narrowed to a single send primitive
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Deliver `text` to `recipient` (a Telegram chat id)
    async fn send(&self, recipient: &str, text: &str) -> Result<()>;
}

/// Telegram notification client
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    send_url: String,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

impl TelegramNotifier {
    pub fn new(api_url: &str, bot_token: &str) -> Self {
        Self {
            client: Client::new(),
            send_url: format!("{}/bot{}/sendMessage", api_url.trim_end_matches('/'), bot_token),
        }
    }
}

#[async_trait]
impl Messenger for TelegramNotifier {
    async fn send(&self, recipient: &str, text: &str) -> Result<()> {
        let body = SendMessageRequest {
            chat_id: recipient,
            text,
            parse_mode: "HTML",
        };

        let resp = self
            .client
            .post(&self.send_url)
            .json(&body)
            .send()
            .await?;

        if resp.status().is_success() {
            debug!(chat_id = recipient, "Telegram notification sent");
            Ok(())
        } else {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            error!(chat_id = recipient, %status, "Telegram notification failed: {detail}");
            Err(TradegramError::Delivery(format!("HTTP {status}: {detail}")))
        }
    }
}
