//! Slack incoming-webhook client.
//!
//! Alerts are posted once with a one second timeout. A slow or failing
//! Slack never holds up the poll loop for longer than that, and failures
//! are only logged.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::alert::Alerter;
use crate::error::ReportError;

/// Request timeout for webhook calls.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(1);

/// Settings for [`SlackClient`].
#[derive(Debug, Clone)]
pub struct SlackConfig {
    /// Incoming webhook URL.
    pub webhook_url: String,
    /// Name the bot posts as.
    pub username: String,
    /// Emoji shown as the bot's avatar.
    pub icon_emoji: String,
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    channel: &'a str,
    username: &'a str,
    text: &'a str,
    icon_emoji: &'a str,
}

/// Posts alerts through a Slack incoming webhook.
pub struct SlackClient {
    client: reqwest::Client,
    config: SlackConfig,
}

impl SlackClient {
    /// Build a client with the webhook timeout applied.
    pub fn new(config: SlackConfig) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| ReportError::Alert(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Post one message, reporting failures to the caller.
    pub async fn send(&self, channel: &str, text: &str) -> Result<(), ReportError> {
        let body = WebhookMessage {
            channel,
            username: &self.config.username,
            text,
            icon_emoji: &self.config.icon_emoji,
        };
        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ReportError::Alert(format!("Slack request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(ReportError::Alert(format!(
                "Slack returned {status}: {error_body}"
            )));
        }
        debug!(channel = channel, "alert posted to Slack");
        Ok(())
    }
}

#[async_trait]
impl Alerter for SlackClient {
    async fn post_message(&self, channel: &str, text: &str) {
        if let Err(e) = self.send(channel, text).await {
            warn!(channel = channel, error = %e, "failed to post alert");
        }
    }
}
