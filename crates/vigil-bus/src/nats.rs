//! NATS `JetStream` implementation of the rapid log.
//!
//! The rapid maps onto one stream with one subject per partition,
//! `<prefix>.<partition>`. A record's key travels in the [`KEY_HEADER`]
//! header and selects the partition via [`partition_for`]. Each consumer
//! group is a durable pull consumer with explicit acknowledgement, and the
//! stream sequence number serves as the record offset.

use std::time::Duration;

use async_nats::jetstream::{self, AckKind, consumer::pull, stream};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::error::BusError;
use crate::log::{RecordConsumer, RecordProducer};
use crate::record::{Record, RecordMetadata, partition_for};

/// Header carrying the record key.
pub const KEY_HEADER: &str = "Rapid-Key";

/// Delay before `JetStream` redelivers a record whose listener failed.
pub const REDELIVERY_DELAY: Duration = Duration::from_secs(5);

/// Deliveries per record before `JetStream` gives up on it.
pub const MAX_DELIVER: i64 = 20;

/// Connection settings for the NATS-backed rapid.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// `JetStream` stream holding the rapid.
    pub stream: String,
    /// Subject prefix; partitions are published on `<prefix>.<n>`.
    pub subject_prefix: String,
    /// Number of partitions keys are spread over.
    pub partitions: u32,
    /// Durable consumer name shared by every instance of the service.
    pub group: String,
}

impl NatsConfig {
    fn wildcard(&self) -> String {
        format!("{}.>", self.subject_prefix)
    }
}

/// Connect to NATS, make sure the stream exists, and build both halves of
/// the log.
///
/// # Errors
///
/// Returns [`BusError::Nats`] if the connection or stream setup fails.
pub async fn connect(config: &NatsConfig) -> Result<(NatsConsumer, NatsProducer), BusError> {
    info!(url = %config.url, stream = %config.stream, "connecting to NATS server");
    let client = async_nats::connect(config.url.as_str())
        .await
        .map_err(|e| BusError::Nats(format!("failed to connect to {}: {e}", config.url)))?;
    let context = jetstream::new(client.clone());

    context
        .get_or_create_stream(stream::Config {
            name: config.stream.clone(),
            subjects: vec![config.wildcard()],
            ..Default::default()
        })
        .await
        .map_err(|e| BusError::Nats(format!("failed to set up stream {}: {e}", config.stream)))?;
    info!(stream = %config.stream, "NATS JetStream stream ready");

    let consumer = NatsConsumer {
        context: context.clone(),
        config: config.clone(),
        consumer: None,
        pending: Vec::new(),
    };
    let producer = NatsProducer {
        client,
        context,
        subject_prefix: config.subject_prefix.clone(),
        partitions: config.partitions,
    };
    Ok((consumer, producer))
}

/// Durable pull consumer for one consumer group.
pub struct NatsConsumer {
    context: jetstream::Context,
    config: NatsConfig,
    consumer: Option<jetstream::consumer::Consumer<pull::Config>>,
    pending: Vec<(u64, jetstream::Message)>,
}

impl NatsConsumer {
    fn to_record(&self, message: &jetstream::Message) -> Result<Record, BusError> {
        let info = message
            .info()
            .map_err(|e| BusError::Nats(format!("message without JetStream info: {e}")))?;
        let topic = message.message.subject.to_string();
        let partition = topic
            .strip_prefix(&self.config.subject_prefix)
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(|rest| rest.parse::<u32>().ok())
            .unwrap_or(0);
        let key = message
            .message
            .headers
            .as_ref()
            .and_then(|headers| headers.get(KEY_HEADER))
            .map(|value| value.as_str().to_owned());
        Ok(Record {
            key,
            value: message.message.payload.to_vec(),
            metadata: RecordMetadata {
                topic,
                partition,
                offset: info.stream_sequence,
            },
        })
    }
}

#[async_trait]
impl RecordConsumer for NatsConsumer {
    async fn subscribe(&mut self) -> Result<(), BusError> {
        let stream = self
            .context
            .get_stream(&self.config.stream)
            .await
            .map_err(|e| BusError::Nats(format!("failed to open stream {}: {e}", self.config.stream)))?;
        let consumer = stream
            .get_or_create_consumer(
                &self.config.group,
                pull::Config {
                    durable_name: Some(self.config.group.clone()),
                    filter_subject: self.config.wildcard(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    max_deliver: MAX_DELIVER,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                BusError::Nats(format!(
                    "failed to create consumer {}: {e}",
                    self.config.group
                ))
            })?;
        info!(group = %self.config.group, "subscribed to rapid");
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn poll(
        &mut self,
        timeout: Duration,
        max_records: usize,
    ) -> Result<Vec<Record>, BusError> {
        let consumer = self.consumer.as_ref().ok_or(BusError::Closed)?;
        let mut batch = consumer
            .batch()
            .max_messages(max_records)
            .expires(timeout)
            .messages()
            .await
            .map_err(|e| BusError::Nats(format!("failed to fetch batch: {e}")))?;

        let mut records = Vec::new();
        while let Some(next) = batch.next().await {
            let message =
                next.map_err(|e| BusError::Nats(format!("failed to receive message: {e}")))?;
            let record = self.to_record(&message)?;
            self.pending.push((record.metadata.offset, message));
            records.push(record);
        }
        if !records.is_empty() {
            debug!(count = records.len(), "polled records");
        }
        Ok(records)
    }

    async fn commit(&mut self, retry: &[u64]) -> Result<(), BusError> {
        for (offset, message) in self.pending.drain(..) {
            let kind = if retry.contains(&offset) {
                AckKind::Nak(Some(REDELIVERY_DELAY))
            } else {
                AckKind::Ack
            };
            message
                .ack_with(kind)
                .await
                .map_err(|e| BusError::Nats(format!("failed to ack message {offset}: {e}")))?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BusError> {
        if !self.pending.is_empty() {
            warn!(
                count = self.pending.len(),
                "closing consumer with unacknowledged records; they will be redelivered"
            );
            self.pending.clear();
        }
        self.consumer = None;
        Ok(())
    }
}

/// Publishes keyed records onto the rapid.
pub struct NatsProducer {
    client: async_nats::Client,
    context: jetstream::Context,
    subject_prefix: String,
    partitions: u32,
}

#[async_trait]
impl RecordProducer for NatsProducer {
    async fn send(&self, key: Option<&str>, value: Vec<u8>) -> Result<(), BusError> {
        let partition = partition_for(key, self.partitions);
        let subject = format!("{}.{partition}", self.subject_prefix);
        let mut headers = async_nats::HeaderMap::new();
        if let Some(key) = key {
            headers.insert(KEY_HEADER, key);
        }
        let ack = self
            .context
            .publish_with_headers(subject.clone(), headers, value.into())
            .await
            .map_err(|e| BusError::Nats(format!("failed to publish to {subject}: {e}")))?;
        ack.await
            .map_err(|e| BusError::Nats(format!("publish to {subject} not acknowledged: {e}")))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::Nats(format!("failed to flush: {e}")))?;
        Ok(())
    }
}
