//! Chat webhook notifier
//!
//! Posts `{"content": "..."}` to a Discord-style incoming webhook.

use std::time::Duration;

use async_trait::async_trait;
use enroll_core::{EnrollError, Notification, Notifier, Result};
use serde::Serialize;

#[derive(Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
}

/// Notifier backed by an incoming chat webhook
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub const TIMEOUT_SECS: u64 = 5;

    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(Self::TIMEOUT_SECS))
            .build()
            .map_err(|e| EnrollError::Config(e.to_string()))?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// Create from `DISCORD_WEBHOOK`
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("DISCORD_WEBHOOK")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| EnrollError::Config("DISCORD_WEBHOOK not set".into()))?;
        Self::new(url)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) {
        let text = notification.text();
        tracing::info!(notification = %text, "Sending notification");

        let result = self
            .http
            .post(&self.url)
            .json(&WebhookMessage { content: &text })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        if let Err(e) = result {
            tracing::warn!(error = %e, "Notification webhook failed");
        }
    }
}
