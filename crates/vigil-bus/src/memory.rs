//! In-process rapid log.
//!
//! [`MemoryLog`] behaves like a single shared stream: records appended by
//! tests and records sent through a [`MemoryProducer`] land in the same
//! queue, so rivers see their own replies just as they would on NATS.
//! Every produced record is also kept in a separate list for inspection.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::error::BusError;
use crate::log::{RecordConsumer, RecordProducer};
use crate::record::{Record, RecordMetadata, partition_for};

#[derive(Debug, Default)]
struct LogState {
    queue: VecDeque<Record>,
    published: Vec<Record>,
    next_offset: u64,
    committed_through: Option<u64>,
}

impl LogState {
    fn push(&mut self, topic: &str, partitions: u32, key: Option<&str>, value: Vec<u8>) -> Record {
        let record = Record {
            key: key.map(str::to_owned),
            value,
            metadata: RecordMetadata {
                topic: topic.to_owned(),
                partition: partition_for(key, partitions),
                offset: self.next_offset,
            },
        };
        self.next_offset = self.next_offset.saturating_add(1);
        self.queue.push_back(record.clone());
        record
    }
}

#[derive(Debug)]
struct Shared {
    topic: String,
    partitions: u32,
    state: Mutex<LogState>,
    arrived: Notify,
}

/// A shared in-memory log. Clones refer to the same log.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    shared: Arc<Shared>,
}

impl MemoryLog {
    /// Create an empty log for `topic` with a single partition.
    pub fn new(topic: &str) -> Self {
        Self::with_partitions(topic, 1)
    }

    /// Create an empty log spreading keys over `partitions` partitions.
    pub fn with_partitions(topic: &str, partitions: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                topic: topic.to_owned(),
                partitions,
                state: Mutex::new(LogState::default()),
                arrived: Notify::new(),
            }),
        }
    }

    /// Append a record as an external producer would. Returns the stored
    /// record with its assigned metadata.
    pub async fn append(&self, key: Option<&str>, value: Vec<u8>) -> Record {
        let record = self.shared.state.lock().await.push(
            &self.shared.topic,
            self.shared.partitions,
            key,
            value,
        );
        self.shared.arrived.notify_one();
        record
    }

    /// A consumer reading this log from the start.
    pub fn consumer(&self) -> MemoryConsumer {
        MemoryConsumer {
            shared: Arc::clone(&self.shared),
            subscribed: false,
            in_flight: Vec::new(),
        }
    }

    /// A producer writing to this log.
    pub fn producer(&self) -> MemoryProducer {
        MemoryProducer {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Every record sent through a [`MemoryProducer`], in send order.
    pub async fn published(&self) -> Vec<Record> {
        self.shared.state.lock().await.published.clone()
    }

    /// Records appended or published but not yet polled.
    pub async fn pending(&self) -> usize {
        self.shared.state.lock().await.queue.len()
    }

    /// Drop queued and published records. Offsets keep increasing.
    pub async fn clear(&self) {
        let mut state = self.shared.state.lock().await;
        state.queue.clear();
        state.published.clear();
    }

    /// Highest offset acknowledged by a consumer commit.
    pub async fn committed_offset(&self) -> Option<u64> {
        self.shared.state.lock().await.committed_through
    }
}

/// Consumer half of a [`MemoryLog`].
#[derive(Debug)]
pub struct MemoryConsumer {
    shared: Arc<Shared>,
    subscribed: bool,
    in_flight: Vec<Record>,
}

impl MemoryConsumer {
    async fn take(&self, max_records: usize) -> Vec<Record> {
        loop {
            {
                let mut state = self.shared.state.lock().await;
                if !state.queue.is_empty() {
                    let count = max_records.min(state.queue.len());
                    return state.queue.drain(..count).collect();
                }
            }
            self.shared.arrived.notified().await;
        }
    }
}

#[async_trait]
impl RecordConsumer for MemoryConsumer {
    async fn subscribe(&mut self) -> Result<(), BusError> {
        self.subscribed = true;
        Ok(())
    }

    async fn poll(
        &mut self,
        timeout: Duration,
        max_records: usize,
    ) -> Result<Vec<Record>, BusError> {
        if !self.subscribed {
            return Err(BusError::Closed);
        }
        let batch = tokio::time::timeout(timeout, self.take(max_records.max(1)))
            .await
            .unwrap_or_default();
        self.in_flight.extend(batch.iter().cloned());
        Ok(batch)
    }

    /// Records in `retry` go back to the head of the queue. The committed
    /// offset stops short of the first of them, as a partition offset would.
    async fn commit(&mut self, retry: &[u64]) -> Result<(), BusError> {
        let in_flight = std::mem::take(&mut self.in_flight);
        let first_retry = retry.iter().min().copied();
        let (requeue, done): (Vec<Record>, Vec<Record>) = in_flight
            .into_iter()
            .partition(|record| retry.contains(&record.metadata.offset));

        let committed = done
            .iter()
            .map(|record| record.metadata.offset)
            .filter(|offset| first_retry.is_none_or(|first| *offset < first))
            .max();

        let mut state = self.shared.state.lock().await;
        if committed > state.committed_through {
            state.committed_through = committed;
        }
        if !requeue.is_empty() {
            for record in requeue.into_iter().rev() {
                state.queue.push_front(record);
            }
            drop(state);
            self.shared.arrived.notify_one();
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BusError> {
        self.subscribed = false;
        self.in_flight.clear();
        Ok(())
    }
}

/// Producer half of a [`MemoryLog`].
#[derive(Debug, Clone)]
pub struct MemoryProducer {
    shared: Arc<Shared>,
}

#[async_trait]
impl RecordProducer for MemoryProducer {
    async fn send(&self, key: Option<&str>, value: Vec<u8>) -> Result<(), BusError> {
        {
            let mut state = self.shared.state.lock().await;
            let record = state.push(&self.shared.topic, self.shared.partitions, key, value);
            state.published.push(record);
        }
        self.shared.arrived.notify_one();
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn poll_returns_records_in_order_with_offsets() {
        let log = MemoryLog::new("rapid");
        log.append(Some("a"), b"1".to_vec()).await;
        log.append(Some("a"), b"2".to_vec()).await;
        let mut consumer = log.consumer();
        consumer.subscribe().await.unwrap();

        let batch = consumer.poll(Duration::from_millis(10), 10).await.unwrap();
        let offsets: Vec<u64> = batch.iter().map(|r| r.metadata.offset).collect();
        assert_eq!(offsets, vec![0, 1]);
        assert_eq!(log.committed_offset().await, None);

        consumer.commit(&[]).await.unwrap();
        assert_eq!(log.committed_offset().await, Some(1));
    }

    #[tokio::test]
    async fn retried_records_are_redelivered_and_hold_back_the_offset() {
        let log = MemoryLog::new("rapid");
        for n in 0..3_u8 {
            log.append(Some("a"), vec![n]).await;
        }
        let mut consumer = log.consumer();
        consumer.subscribe().await.unwrap();

        let batch = consumer.poll(Duration::from_millis(10), 10).await.unwrap();
        assert_eq!(batch.len(), 3);
        consumer.commit(&[1]).await.unwrap();
        assert_eq!(log.committed_offset().await, Some(0));
        assert_eq!(log.pending().await, 1);

        let again = consumer.poll(Duration::from_millis(10), 10).await.unwrap();
        let offsets: Vec<u64> = again.iter().map(|r| r.metadata.offset).collect();
        assert_eq!(offsets, vec![1]);
        consumer.commit(&[]).await.unwrap();
        assert_eq!(log.committed_offset().await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_poll_times_out() {
        let log = MemoryLog::new("rapid");
        let mut consumer = log.consumer();
        consumer.subscribe().await.unwrap();
        let batch = consumer.poll(Duration::from_secs(1), 10).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn produced_records_loop_back_and_are_kept() {
        let log = MemoryLog::new("rapid");
        log.producer().send(Some("k"), b"{}".to_vec()).await.unwrap();
        assert_eq!(log.published().await.len(), 1);
        assert_eq!(log.pending().await, 1);
    }

    #[tokio::test]
    async fn poll_before_subscribe_fails() {
        let log = MemoryLog::new("rapid");
        let mut consumer = log.consumer();
        assert!(matches!(
            consumer.poll(Duration::from_millis(1), 1).await,
            Err(BusError::Closed)
        ));
    }
}
