//! Error types for metrics and alerting.

/// Errors raised while recording a metric or delivering an alert.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// The Prometheus client rejected a metric definition or update.
    #[error("metric error: {0}")]
    Metric(#[from] ::prometheus::Error),

    /// A metric was used with a different label set than it was created
    /// with.
    #[error("metric {metric} expects labels {expected:?}")]
    LabelMismatch {
        /// Metric name.
        metric: String,
        /// Label names the metric was created with.
        expected: Vec<String>,
    },

    /// A metric name was reused for a different metric type.
    #[error("metric {metric} is already registered as a {kind}")]
    KindMismatch {
        /// Metric name.
        metric: String,
        /// The type it was first registered as.
        kind: &'static str,
    },

    /// The text exposition could not be produced.
    #[error("encode error: {0}")]
    Encode(String),

    /// A chat alert could not be delivered.
    #[error("alert error: {0}")]
    Alert(String),
}
