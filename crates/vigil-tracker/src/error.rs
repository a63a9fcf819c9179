//! Error types for the tracker rivers.

use vigil_bus::BusError;
use vigil_db::DbError;
use vigil_message::FieldError;

/// Errors that abort the handling of one tracked event.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// An accepted packet could not be read.
    #[error("field error: {0}")]
    Field(#[from] FieldError),

    /// The state store failed; the record is left unacknowledged and
    /// redelivered.
    #[error("store error: {0}")]
    Store(#[from] DbError),

    /// A derived event could not be published.
    #[error("publish error: {0}")]
    Publish(#[from] BusError),
}
