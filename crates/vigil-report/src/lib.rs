//! Outbound reporting for Vigil: metrics and chat alerts.
//!
//! Both concerns sit behind narrow traits so the tracker never depends on a
//! concrete backend:
//!
//! - [`Reporter`] -- counters, histograms and gauges, addressed by name and
//!   label pairs. [`PrometheusReporter`] owns its own registry and renders
//!   the text exposition format; [`RecordingReporter`] keeps values in memory
//!   for assertions.
//! - [`Alerter`] -- posts a text message to a channel. [`SlackClient`] calls
//!   an incoming webhook with a short timeout; [`LogAlerter`] only logs;
//!   [`RecordingAlerter`] keeps messages for assertions.
//!
//! Neither trait returns errors to the caller. Failures are logged and the
//! caller carries on.

pub mod alert;
pub mod error;
pub mod metrics;
pub mod reporter;
pub mod slack;

pub use alert::{Alert, Alerter, LogAlerter, RecordingAlerter};
pub use error::ReportError;
pub use metrics::PrometheusReporter;
pub use reporter::{Labels, RecordingReporter, Reporter};
pub use slack::{SlackClient, SlackConfig};
