//! The rapid: a shared, partitioned event log and the rivers that read it.
//!
//! A [`Rapid`] owns one log consumer and one producer. It polls batches of
//! records, decodes each record once, and offers the decoded message to every
//! registered [`River`] in registration order. Rivers that accept a message
//! get a [`MessageContext`] for publishing correlated replies keyed like the
//! triggering record.
//!
//! # Architecture
//!
//! ```text
//! RecordConsumer --poll--> Rapid --decode--> Message
//!                                  |
//!                                  +--> River 1 (Rules -> PacketListener)
//!                                  +--> River 2 ...
//!                                           |
//!                                           +--> MessageContext --> RecordProducer
//! ```
//!
//! # Modules
//!
//! - [`rapid`] -- the poll loop, lifecycle, and dispatch
//! - [`river`] -- rivers and the [`PacketListener`] callback trait
//! - [`context`] -- the per-record reply context
//! - [`record`] -- raw records and partitioning
//! - [`log`] -- consumer/producer traits the rapid runs on
//! - [`nats`] -- NATS `JetStream` implementation of the log
//! - [`memory`] -- in-process log for tests and local runs
//! - [`testing`] -- [`TestRapid`](testing::TestRapid) for driving rivers directly
//! - [`error`] -- shared error types

pub mod context;
pub mod error;
pub mod log;
pub mod memory;
pub mod nats;
pub mod rapid;
pub mod record;
pub mod river;
pub mod testing;

pub use context::MessageContext;
pub use error::BusError;
pub use log::{RecordConsumer, RecordProducer};
pub use memory::MemoryLog;
pub use nats::{NatsConfig, NatsConsumer, NatsProducer};
pub use rapid::{Rapid, RapidConfig, StopHandle};
pub use record::{Record, RecordMetadata};
pub use river::{BoxError, Delivery, ListenerResult, PacketListener, River, RiverRegistry};
pub use testing::TestRapid;
