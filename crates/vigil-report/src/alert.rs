//! The chat alerting interface.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::warn;

/// Posts operator alerts to a chat channel.
///
/// Delivery is best effort: implementations log failures and never retry.
#[async_trait]
pub trait Alerter: Send + Sync {
    /// Post `text` to `channel`.
    async fn post_message(&self, channel: &str, text: &str);
}

/// An [`Alerter`] that only writes alerts to the log. Used when no webhook
/// is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn post_message(&self, channel: &str, text: &str) {
        warn!(channel = channel, alert = text, "alert (no chat webhook configured)");
    }
}

/// One alert captured by [`RecordingAlerter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Channel the alert was posted to.
    pub channel: String,
    /// Alert text.
    pub text: String,
}

/// An [`Alerter`] that keeps every alert in memory.
#[derive(Debug, Default)]
pub struct RecordingAlerter {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerter {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts posted so far, oldest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Alerter for RecordingAlerter {
    async fn post_message(&self, channel: &str, text: &str) {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Alert {
                channel: channel.to_owned(),
                text: text.to_owned(),
            });
    }
}
