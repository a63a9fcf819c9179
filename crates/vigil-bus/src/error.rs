//! Error types for the rapid runtime.

/// Errors that can occur while consuming from or publishing to the rapid.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Failed to connect to or communicate with the NATS server.
    #[error("NATS error: {0}")]
    Nats(String),

    /// An outbound message could not be serialized.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// `start` was called on a rapid that has already been stopped.
    #[error("rapid has been stopped")]
    Stopped,

    /// The log handle was used after it was closed.
    #[error("log is closed")]
    Closed,
}
