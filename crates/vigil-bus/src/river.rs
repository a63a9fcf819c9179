//! Rivers: a rule set bound to a listener.
//!
//! The rapid offers every decoded message to each river in registration
//! order. A river evaluates its [`Rules`] and either ignores the message,
//! reports its problems to the listener's error callback, or hands the
//! listener an accepted [`Packet`].
//!
//! Listener failures stop at the river boundary: an error or a panic is
//! logged with the river name and record position, and the remaining rivers
//! still see the record.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, trace};
use vigil_message::{Message, Packet, Problems, Rules, Verdict};

use crate::context::MessageContext;

/// Error type listeners may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a listener callback.
pub type ListenerResult = Result<(), BoxError>;

/// Callbacks invoked by a [`River`].
#[async_trait]
pub trait PacketListener: Send + Sync {
    /// Handle a message that passed the river's rules.
    async fn on_packet(&self, packet: Packet<'_>, context: &MessageContext<'_>) -> ListenerResult;

    /// Handle a message the river is interested in but that broke one of
    /// its requirements. Logs at debug level unless overridden.
    async fn on_error(&self, problems: &Problems, context: &MessageContext<'_>) {
        debug!(
            key = context.key().unwrap_or_default(),
            offset = context.metadata().offset,
            problems = %problems,
            "message did not satisfy requirements"
        );
    }
}

/// What a river did with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A demand failed; the message was not of interest.
    Ignored,
    /// A requirement failed; the error callback was invoked.
    Rejected,
    /// The listener accepted and handled the packet.
    Handled,
    /// The listener returned an error or panicked.
    Failed,
}

/// A named rule set with its listener.
pub struct River {
    name: String,
    rules: Rules,
    listener: Arc<dyn PacketListener>,
}

impl River {
    /// Bind `rules` to `listener`. The name appears in every log line about
    /// this river.
    pub fn new(name: impl Into<String>, rules: Rules, listener: Arc<dyn PacketListener>) -> Self {
        Self {
            name: name.into(),
            rules,
            listener,
        }
    }

    /// The river's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The river's rules.
    pub const fn rules(&self) -> &Rules {
        &self.rules
    }

    /// Offer one message to the river.
    pub async fn deliver(&self, message: &Message, context: &MessageContext<'_>) -> Delivery {
        match self.rules.evaluate(message) {
            Verdict::NotInterested(reason) => {
                trace!(river = %self.name, reason = %reason, "not interested");
                Delivery::Ignored
            }
            Verdict::Malformed(problems) => {
                let callback = AssertUnwindSafe(self.listener.on_error(&problems, context));
                if let Err(panic) = callback.catch_unwind().await {
                    self.log_panic(context, panic.as_ref(), "error callback panicked");
                }
                Delivery::Rejected
            }
            Verdict::Accepted(packet) => {
                let callback = AssertUnwindSafe(self.listener.on_packet(packet, context));
                match callback.catch_unwind().await {
                    Ok(Ok(())) => Delivery::Handled,
                    Ok(Err(e)) => {
                        error!(
                            river = %self.name,
                            key = context.key().unwrap_or_default(),
                            offset = context.metadata().offset,
                            error = %e,
                            "listener failed"
                        );
                        Delivery::Failed
                    }
                    Err(panic) => {
                        self.log_panic(context, panic.as_ref(), "listener panicked");
                        Delivery::Failed
                    }
                }
            }
        }
    }

    fn log_panic(&self, context: &MessageContext<'_>, panic: &(dyn Any + Send), what: &str) {
        let cause = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        error!(
            river = %self.name,
            key = context.key().unwrap_or_default(),
            offset = context.metadata().offset,
            panic = %cause,
            "{what}"
        );
    }
}

impl std::fmt::Debug for River {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("River")
            .field("name", &self.name)
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

/// Anything rivers can be registered with.
///
/// Rivers are evaluated in registration order: the first registered river
/// sees each message first.
pub trait RiverRegistry {
    /// Append a river.
    fn register(&mut self, river: River);
}
