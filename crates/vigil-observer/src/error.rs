//! Error types for the observer binary.

/// Errors raised while starting or running the observer.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// Configuration is invalid or missing.
    #[error("config error: {0}")]
    Config(String),

    /// The rapid could not be reached or stopped unexpectedly.
    #[error("rapid error: {0}")]
    Bus(#[from] vigil_bus::BusError),

    /// The state database could not be reached or migrated.
    #[error("database error: {0}")]
    Db(#[from] vigil_db::DbError),

    /// Metrics or alerting could not be set up.
    #[error("report error: {0}")]
    Report(#[from] vigil_report::ReportError),
}
