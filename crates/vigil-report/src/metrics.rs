//! Prometheus-backed [`Reporter`].
//!
//! Each reporter owns its own [`Registry`]; nothing is registered globally.
//! Metric families are created on first use, with the help text and
//! histogram buckets configured up front through the builder methods.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use tracing::warn;

use crate::error::ReportError;
use crate::reporter::{Labels, Reporter};

/// Default histogram buckets: 1 s growing by 4x up to roughly 48 days, which
/// covers both quick hand-offs and periods stuck for weeks.
const DEFAULT_BUCKET_START: f64 = 1.0;
const DEFAULT_BUCKET_FACTOR: f64 = 4.0;
const DEFAULT_BUCKET_COUNT: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Counter,
    Histogram,
    Gauge,
}

impl Kind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Histogram => "histogram",
            Self::Gauge => "gauge",
        }
    }
}

#[derive(Clone)]
enum Family {
    Counter(CounterVec),
    Histogram(HistogramVec),
    Gauge(GaugeVec),
}

impl Family {
    const fn kind(&self) -> Kind {
        match self {
            Self::Counter(_) => Kind::Counter,
            Self::Histogram(_) => Kind::Histogram,
            Self::Gauge(_) => Kind::Gauge,
        }
    }
}

#[derive(Clone)]
struct Registered {
    family: Family,
    label_names: Vec<String>,
}

impl Registered {
    /// Label values in registration order, or `None` if the label names do
    /// not match.
    fn values<'a>(&self, labels: Labels<'a>) -> Option<Vec<&'a str>> {
        if labels.len() != self.label_names.len() {
            return None;
        }
        self.label_names
            .iter()
            .map(|name| labels.iter().find(|(k, _)| k == name).map(|(_, v)| *v))
            .collect()
    }
}

/// A [`Reporter`] writing into its own Prometheus registry.
pub struct PrometheusReporter {
    registry: Registry,
    help: HashMap<String, String>,
    buckets: HashMap<String, Vec<f64>>,
    families: Mutex<HashMap<String, Registered>>,
}

impl Default for PrometheusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusReporter {
    /// A reporter with an empty registry.
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            help: HashMap::new(),
            buckets: HashMap::new(),
            families: Mutex::new(HashMap::new()),
        }
    }

    /// Set the help text of a metric.
    #[must_use]
    pub fn with_help(mut self, metric: &str, help: &str) -> Self {
        self.help.insert(metric.to_owned(), help.to_owned());
        self
    }

    /// Set the buckets of a histogram.
    #[must_use]
    pub fn with_buckets(mut self, histogram: &str, buckets: Vec<f64>) -> Self {
        self.buckets.insert(histogram.to_owned(), buckets);
        self
    }

    /// The underlying registry.
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, ReportError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ReportError::Encode(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| ReportError::Encode(e.to_string()))
    }

    fn help_for(&self, name: &str) -> String {
        self.help.get(name).cloned().unwrap_or_else(|| name.replace('_', " "))
    }

    fn create(&self, name: &str, kind: Kind, label_names: &[&str]) -> Result<Family, ReportError> {
        let help = self.help_for(name);
        let family = match kind {
            Kind::Counter => Family::Counter(CounterVec::new(Opts::new(name, help), label_names)?),
            Kind::Histogram => {
                let buckets = match self.buckets.get(name) {
                    Some(buckets) => buckets.clone(),
                    None => prometheus::exponential_buckets(
                        DEFAULT_BUCKET_START,
                        DEFAULT_BUCKET_FACTOR,
                        DEFAULT_BUCKET_COUNT,
                    )?,
                };
                Family::Histogram(HistogramVec::new(
                    HistogramOpts::new(name, help).buckets(buckets),
                    label_names,
                )?)
            }
            Kind::Gauge => Family::Gauge(GaugeVec::new(Opts::new(name, help), label_names)?),
        };
        match &family {
            Family::Counter(vec) => self.registry.register(Box::new(vec.clone()))?,
            Family::Histogram(vec) => self.registry.register(Box::new(vec.clone()))?,
            Family::Gauge(vec) => self.registry.register(Box::new(vec.clone()))?,
        }
        Ok(family)
    }

    /// Find or create the family `name`, then resolve the label values.
    fn resolve<'a>(
        &self,
        name: &str,
        kind: Kind,
        labels: Labels<'a>,
    ) -> Result<(Family, Vec<&'a str>), ReportError> {
        let mut families = self.families.lock().unwrap_or_else(PoisonError::into_inner);
        let registered = match families.get(name) {
            Some(registered) => registered.clone(),
            None => {
                let label_names: Vec<&str> = labels.iter().map(|(k, _)| *k).collect();
                let registered = Registered {
                    family: self.create(name, kind, &label_names)?,
                    label_names: label_names.iter().map(|n| (*n).to_owned()).collect(),
                };
                families.insert(name.to_owned(), registered.clone());
                registered
            }
        };
        drop(families);

        if registered.family.kind() != kind {
            return Err(ReportError::KindMismatch {
                metric: name.to_owned(),
                kind: registered.family.kind().as_str(),
            });
        }
        let values = registered
            .values(labels)
            .ok_or_else(|| ReportError::LabelMismatch {
                metric: name.to_owned(),
                expected: registered.label_names.clone(),
            })?;
        Ok((registered.family, values))
    }

    fn update(&self, name: &str, kind: Kind, labels: Labels<'_>, value: f64) -> Result<(), ReportError> {
        let (family, values) = self.resolve(name, kind, labels)?;
        match family {
            Family::Counter(vec) => vec.get_metric_with_label_values(&values)?.inc(),
            Family::Histogram(vec) => vec.get_metric_with_label_values(&values)?.observe(value),
            Family::Gauge(vec) => vec.get_metric_with_label_values(&values)?.set(value),
        }
        Ok(())
    }
}

impl Reporter for PrometheusReporter {
    fn increment(&self, counter: &str, labels: Labels<'_>) {
        if let Err(e) = self.update(counter, Kind::Counter, labels, 1.0) {
            warn!(metric = counter, error = %e, "failed to increment counter");
        }
    }

    fn observe(&self, histogram: &str, value: f64, labels: Labels<'_>) {
        if let Err(e) = self.update(histogram, Kind::Histogram, labels, value) {
            warn!(metric = histogram, error = %e, "failed to observe histogram");
        }
    }

    fn set_gauge(&self, gauge: &str, labels: Labels<'_>, value: f64) {
        if let Err(e) = self.update(gauge, Kind::Gauge, labels, value) {
            warn!(metric = gauge, error = %e, "failed to set gauge");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn renders_all_metric_types() {
        let reporter = PrometheusReporter::new()
            .with_help("events_total", "Events seen on the rapid")
            .with_buckets("latency_seconds", vec![1.0, 10.0, 100.0]);
        reporter.increment("events_total", &[("event", "ping"), ("partition", "0")]);
        reporter.increment("events_total", &[("partition", "0"), ("event", "ping")]);
        reporter.observe("latency_seconds", 5.0, &[("state", "WAIT")]);
        reporter.set_gauge("periods", &[("state", "WAIT")], 4.0);

        let text = reporter.render().unwrap();
        assert!(text.contains("# HELP events_total Events seen on the rapid"));
        assert!(text.contains(r#"events_total{event="ping",partition="0"} 2"#));
        assert!(text.contains(r#"latency_seconds_bucket{state="WAIT",le="10"} 1"#));
        assert!(text.contains(r#"periods{state="WAIT"} 4"#));
    }

    #[test]
    fn mismatched_labels_are_rejected() {
        let reporter = PrometheusReporter::new();
        reporter.increment("events_total", &[("event", "ping")]);
        let err = reporter
            .update("events_total", Kind::Counter, &[("other", "x")], 1.0)
            .unwrap_err();
        assert!(matches!(err, ReportError::LabelMismatch { .. }));
        let err = reporter
            .update("events_total", Kind::Gauge, &[("event", "x")], 1.0)
            .unwrap_err();
        assert!(matches!(err, ReportError::KindMismatch { .. }));
    }

    #[test]
    fn separate_reporters_do_not_share_state() {
        let a = PrometheusReporter::new();
        let b = PrometheusReporter::new();
        a.increment("events_total", &[]);
        b.increment("events_total", &[("event", "ping")]);
        assert!(!a.render().unwrap().contains("ping"));
    }
}
