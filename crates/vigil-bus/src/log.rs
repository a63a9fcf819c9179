//! The consumer and producer halves of an event log.
//!
//! The [`Rapid`](crate::Rapid) only talks to the log through these traits.
//! [`nats`](crate::nats) provides the production implementation and
//! [`memory`](crate::memory) an in-process one.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::BusError;
use crate::record::Record;

/// Reading side of the log.
///
/// Delivery is at-least-once: records returned by [`poll`](Self::poll) are
/// acknowledged by the next [`commit`](Self::commit), except the ones it is
/// asked to retry. Anything polled but not committed is redelivered.
#[async_trait]
pub trait RecordConsumer: Send {
    /// Join the consumer group and start receiving records.
    async fn subscribe(&mut self) -> Result<(), BusError>;

    /// Wait up to `timeout` for at most `max_records` records.
    ///
    /// Returns an empty batch when nothing arrived in time.
    async fn poll(&mut self, timeout: Duration, max_records: usize)
    -> Result<Vec<Record>, BusError>;

    /// Acknowledge every record returned by previous polls, except those
    /// whose offset is in `retry`: they are handed back for redelivery.
    async fn commit(&mut self, retry: &[u64]) -> Result<(), BusError>;

    /// Leave the consumer group and release the underlying handles.
    async fn close(&mut self) -> Result<(), BusError>;
}

/// Writing side of the log.
#[async_trait]
pub trait RecordProducer: Send + Sync {
    /// Append a record, partitioned by `key`.
    async fn send(&self, key: Option<&str>, value: Vec<u8>) -> Result<(), BusError>;

    /// Flush anything buffered and release the underlying handles.
    async fn close(&self) -> Result<(), BusError>;
}
