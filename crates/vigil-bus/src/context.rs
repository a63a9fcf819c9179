//! The reply context handed to listeners with every packet.

use serde_json::Value;
use tracing::debug;

use crate::error::BusError;
use crate::log::RecordProducer;
use crate::record::RecordMetadata;

/// Per-record context: where the record came from and a way to publish
/// correlated messages back onto the rapid.
pub struct MessageContext<'a> {
    key: Option<&'a str>,
    metadata: &'a RecordMetadata,
    producer: &'a dyn RecordProducer,
}

impl<'a> MessageContext<'a> {
    /// Bind a context to one record.
    pub const fn new(
        key: Option<&'a str>,
        metadata: &'a RecordMetadata,
        producer: &'a dyn RecordProducer,
    ) -> Self {
        Self {
            key,
            metadata,
            producer,
        }
    }

    /// Key of the triggering record.
    pub const fn key(&self) -> Option<&'a str> {
        self.key
    }

    /// Topic, partition, and offset of the triggering record.
    pub const fn metadata(&self) -> &'a RecordMetadata {
        self.metadata
    }

    /// Publish `message` keyed like the triggering record, so it lands on
    /// the same partition and stays ordered with it.
    pub async fn publish(&self, message: &Value) -> Result<(), BusError> {
        self.publish_with_key(self.key, message).await
    }

    /// Publish `message` with an explicit key.
    pub async fn publish_with_key(
        &self,
        key: Option<&str>,
        message: &Value,
    ) -> Result<(), BusError> {
        let payload = serde_json::to_vec(message)?;
        let event_name = message
            .get("@event_name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        debug!(
            key = key.unwrap_or_default(),
            event_name = event_name,
            "publishing message"
        );
        self.producer.send(key, payload).await
    }
}
