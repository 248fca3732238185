// src/notify.rs
//
// Notification sinks. Delivery is best effort: failures are logged and the
// message is dropped.

use crate::error::{MonitorError, Result};
use crate::traits::{Notifier, SharedNotifier};
use async_trait::async_trait;
use log::{info, warn};
use serde_json::json;
use std::time::Duration;

pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Sends messages to one Telegram chat via the Bot API.
pub struct TelegramNotifier {
    api_url: String,
    bot_token: String,
    chat_id: String,
    http_client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(api_url: &str, bot_token: String, chat_id: String) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token,
            chat_id,
            http_client,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);
        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        let response = self
            .http_client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MonitorError::NotificationDelivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MonitorError::NotificationDelivery(format!(
                "telegram returned HTTP {}",
                response.status()
            )));
        }
        info!("TelegramNotifier: Message delivered");
        Ok(())
    }
}

/// Fallback sink used when no transport is configured.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        info!("Notification (no transport configured): {}", text.replace('\n', " | "));
        Ok(())
    }
}

/// Sends and logs the outcome. Never fails.
pub async fn deliver(notifier: &SharedNotifier, text: &str) {
    if let Err(e) = notifier.send(text).await {
        warn!("Notification dropped: {}", e);
    }
}

/// Fire-and-forget delivery on a separate task.
pub fn dispatch(notifier: &SharedNotifier, text: String) {
    let notifier = notifier.clone();
    tokio::spawn(async move {
        deliver(&notifier, &text).await;
    });
}
