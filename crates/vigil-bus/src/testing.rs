//! Drive rivers without a running log.
//!
//! [`TestRapid`] dispatches messages synchronously to its registered rivers
//! and records everything they publish, which makes listener behaviour easy
//! to assert on:
//!
//! ```
//! # async fn demo() {
//! use vigil_bus::TestRapid;
//!
//! let rapid = TestRapid::new();
//! rapid.send_test_message(r#"{"@event_name":"ping"}"#).await;
//! assert!(rapid.published().await.is_empty());
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::memory::{MemoryLog, MemoryProducer};
use crate::rapid::dispatch;
use crate::record::{Record, RecordMetadata};
use crate::river::{Delivery, River, RiverRegistry};

const TEST_TOPIC: &str = "test-rapid";

/// An in-process stand-in for [`Rapid`](crate::Rapid).
#[derive(Debug)]
pub struct TestRapid {
    rivers: Vec<River>,
    log: MemoryLog,
    producer: MemoryProducer,
    next_offset: AtomicU64,
}

impl Default for TestRapid {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRapid {
    /// An empty test rapid.
    pub fn new() -> Self {
        let log = MemoryLog::new(TEST_TOPIC);
        let producer = log.producer();
        Self {
            rivers: Vec::new(),
            log,
            producer,
            next_offset: AtomicU64::new(0),
        }
    }

    /// Dispatch an unkeyed message. Returns what each river did with it.
    pub async fn send_test_message(&self, message: &str) -> Vec<Delivery> {
        self.dispatch(None, message).await
    }

    /// Dispatch a message with a record key.
    pub async fn send_test_message_with_key(&self, key: &str, message: &str) -> Vec<Delivery> {
        self.dispatch(Some(key), message).await
    }

    async fn dispatch(&self, key: Option<&str>, message: &str) -> Vec<Delivery> {
        let record = Record {
            key: key.map(str::to_owned),
            value: message.as_bytes().to_vec(),
            metadata: RecordMetadata {
                topic: TEST_TOPIC.to_owned(),
                partition: 0,
                offset: self.next_offset.fetch_add(1, Ordering::SeqCst),
            },
        };
        dispatch(&self.rivers, &record, &self.producer).await
    }

    /// Records published by rivers, in publish order.
    pub async fn published_records(&self) -> Vec<Record> {
        self.log.published().await
    }

    /// Messages published by rivers, decoded. Records that are not JSON are
    /// left out.
    pub async fn published(&self) -> Vec<Value> {
        self.published_records()
            .await
            .iter()
            .filter_map(|record| serde_json::from_slice(&record.value).ok())
            .collect()
    }

    /// Published messages whose `@event_name` equals `event_name`.
    pub async fn published_events(&self, event_name: &str) -> Vec<Value> {
        self.published()
            .await
            .into_iter()
            .filter(|message| {
                message.get("@event_name").and_then(Value::as_str) == Some(event_name)
            })
            .collect()
    }

    /// Forget everything published so far. Rivers stay registered.
    pub async fn reset(&self) {
        self.log.clear().await;
    }
}

impl RiverRegistry for TestRapid {
    fn register(&mut self, river: River) {
        self.rivers.push(river);
    }
}
