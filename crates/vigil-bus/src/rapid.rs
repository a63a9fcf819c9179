//! The rapid runtime: poll loop, lifecycle, and dispatch.
//!
//! A [`Rapid`] moves through `Stopped -> Running -> Stopped` exactly once.
//! [`Rapid::start`] runs the poll loop on the calling task until a
//! [`StopHandle`] asks it to stop. A stop request abandons the in-flight poll
//! immediately; a batch that is already being dispatched is finished and
//! committed first.
//!
//! A record on which any listener failed is not acknowledged. The log hands
//! it back and every river sees it again, so listeners must tolerate
//! redelivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};
use vigil_message::Message;

use crate::context::MessageContext;
use crate::error::BusError;
use crate::log::{RecordConsumer, RecordProducer};
use crate::record::Record;
use crate::river::{Delivery, River, RiverRegistry};

/// Poll settings.
#[derive(Debug, Clone, Copy)]
pub struct RapidConfig {
    /// How long one poll waits for records.
    pub poll_timeout: Duration,
    /// Upper bound on records per poll.
    pub max_records: usize,
}

impl Default for RapidConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            max_records: 100,
        }
    }
}

#[derive(Debug, Default)]
struct Control {
    running: AtomicBool,
    stop_requested: AtomicBool,
    finished: AtomicBool,
    wake: Notify,
}

impl Control {
    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

/// Cloneable handle that stops a [`Rapid`] from any task.
#[derive(Debug, Clone)]
pub struct StopHandle {
    control: Arc<Control>,
}

impl StopHandle {
    /// Ask the rapid to stop. Safe to call repeatedly and before `start`.
    pub fn stop(&self) {
        if !self.control.stop_requested.swap(true, Ordering::SeqCst) {
            debug!("rapid stop requested");
        }
        self.control.wake.notify_one();
    }

    /// Whether the poll loop is currently running.
    pub fn is_running(&self) -> bool {
        self.control.running.load(Ordering::SeqCst)
    }
}

/// The event log consumer that feeds registered rivers.
pub struct Rapid<C, P> {
    consumer: C,
    producer: P,
    config: RapidConfig,
    rivers: Vec<River>,
    control: Arc<Control>,
}

impl<C, P> Rapid<C, P>
where
    C: RecordConsumer,
    P: RecordProducer,
{
    /// Create a stopped rapid over a consumer and producer.
    pub fn new(consumer: C, producer: P, config: RapidConfig) -> Self {
        Self {
            consumer,
            producer,
            config,
            rivers: Vec::new(),
            control: Arc::new(Control::default()),
        }
    }

    /// A handle for stopping the rapid from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            control: Arc::clone(&self.control),
        }
    }

    /// Ask the rapid to stop.
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Whether the poll loop is currently running.
    pub fn is_running(&self) -> bool {
        self.control.running.load(Ordering::SeqCst)
    }

    /// Registered rivers, in evaluation order.
    pub fn rivers(&self) -> &[River] {
        &self.rivers
    }

    /// Subscribe and run the poll loop until stopped.
    ///
    /// The consumer and producer are closed on the way out, whether the loop
    /// ended by request or on a poll or commit failure.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Stopped`] if this rapid already ran, or the
    /// consumer's error if polling or committing fails.
    pub async fn start(&mut self) -> Result<(), BusError> {
        if self.control.finished.load(Ordering::SeqCst) {
            return Err(BusError::Stopped);
        }
        self.consumer.subscribe().await?;
        self.control.running.store(true, Ordering::SeqCst);
        info!(rivers = self.rivers.len(), "rapid started");

        let outcome = self.run().await;

        self.control.running.store(false, Ordering::SeqCst);
        self.control.finished.store(true, Ordering::SeqCst);
        if let Err(e) = &outcome {
            warn!(error = %e, "rapid poll loop failed");
        }
        let closed = self.shutdown().await;
        info!("rapid stopped");
        outcome.and(closed)
    }

    async fn run(&mut self) -> Result<(), BusError> {
        while !self.control.stop_requested() {
            let batch = tokio::select! {
                biased;
                () = self.control.wake.notified() => break,
                polled = self.consumer.poll(self.config.poll_timeout, self.config.max_records) => polled?,
            };
            if batch.is_empty() {
                continue;
            }
            let mut retry = Vec::new();
            for record in &batch {
                let deliveries = dispatch(&self.rivers, record, &self.producer).await;
                if deliveries.contains(&Delivery::Failed) {
                    retry.push(record.metadata.offset);
                }
            }
            self.consumer.commit(&retry).await?;
            if retry.is_empty() {
                debug!(count = batch.len(), "batch committed");
            } else {
                warn!(
                    count = batch.len(),
                    retried = retry.len(),
                    "batch committed; records with failed listeners left for redelivery"
                );
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), BusError> {
        let consumer = self.consumer.close().await;
        let producer = self.producer.close().await;
        consumer.and(producer)
    }
}

impl<C, P> RiverRegistry for Rapid<C, P> {
    fn register(&mut self, river: River) {
        info!(river = river.name(), position = self.rivers.len(), "river registered");
        self.rivers.push(river);
    }
}

/// Decode one record and offer it to every river in order.
///
/// Returns one [`Delivery`] per river, or an empty list when the record
/// could not be decoded.
pub(crate) async fn dispatch(
    rivers: &[River],
    record: &Record,
    producer: &dyn RecordProducer,
) -> Vec<Delivery> {
    let message = match Message::parse(&record.value) {
        Ok(message) => message,
        Err(e) => {
            warn!(
                key = record.key.as_deref().unwrap_or_default(),
                topic = %record.metadata.topic,
                partition = record.metadata.partition,
                offset = record.metadata.offset,
                error = %e,
                "skipping undecodable record"
            );
            return Vec::new();
        }
    };
    let context = MessageContext::new(record.key.as_deref(), &record.metadata, producer);
    let mut deliveries = Vec::with_capacity(rivers.len());
    for river in rivers {
        deliveries.push(river.deliver(&message, &context).await);
    }
    deliveries
}
