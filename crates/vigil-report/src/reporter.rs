//! The metrics reporting interface and an in-memory recorder.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Label pairs attached to one metric update, e.g.
/// `&[("state", "WAIT"), ("cause", "new_application")]`.
pub type Labels<'a> = &'a [(&'a str, &'a str)];

/// Sink for metric updates.
///
/// Metrics are created on first use with the label names of that first
/// update; later updates must use the same label names.
pub trait Reporter: Send + Sync {
    /// Add one to a counter.
    fn increment(&self, counter: &str, labels: Labels<'_>);

    /// Record one observation in a histogram.
    fn observe(&self, histogram: &str, value: f64, labels: Labels<'_>);

    /// Set a gauge to `value`.
    fn set_gauge(&self, gauge: &str, labels: Labels<'_>, value: f64);
}

type SeriesKey = (String, BTreeMap<String, String>);

fn series(name: &str, labels: Labels<'_>) -> SeriesKey {
    (
        name.to_owned(),
        labels
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect(),
    )
}

#[derive(Debug, Default)]
struct Recorded {
    counters: BTreeMap<SeriesKey, u64>,
    observations: Vec<(SeriesKey, f64)>,
    gauges: BTreeMap<SeriesKey, f64>,
}

/// A [`Reporter`] that keeps every update in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    recorded: Mutex<Recorded>,
}

impl RecordingReporter {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        let mut recorded = self.recorded.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut recorded)
    }

    /// Current value of a counter series. Label order does not matter.
    pub fn counter(&self, name: &str, labels: Labels<'_>) -> u64 {
        let key = series(name, labels);
        self.with(|r| r.counters.get(&key).copied().unwrap_or(0))
    }

    /// Sum of a counter over every label combination.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.with(|r| {
            r.counters
                .iter()
                .filter(|((n, _), _)| n == name)
                .fold(0_u64, |total, (_, count)| total.saturating_add(*count))
        })
    }

    /// Every observation recorded for a histogram series.
    pub fn observations(&self, name: &str, labels: Labels<'_>) -> Vec<f64> {
        let key = series(name, labels);
        self.with(|r| {
            r.observations
                .iter()
                .filter(|(k, _)| *k == key)
                .map(|(_, value)| *value)
                .collect()
        })
    }

    /// Last value set on a gauge series.
    pub fn gauge(&self, name: &str, labels: Labels<'_>) -> Option<f64> {
        let key = series(name, labels);
        self.with(|r| r.gauges.get(&key).copied())
    }

    /// Whether nothing has been reported yet.
    pub fn is_empty(&self) -> bool {
        self.with(|r| r.counters.is_empty() && r.observations.is_empty() && r.gauges.is_empty())
    }
}

impl Reporter for RecordingReporter {
    fn increment(&self, counter: &str, labels: Labels<'_>) {
        let key = series(counter, labels);
        self.with(|r| {
            let count = r.counters.entry(key).or_default();
            *count = count.saturating_add(1);
        });
    }

    fn observe(&self, histogram: &str, value: f64, labels: Labels<'_>) {
        let key = series(histogram, labels);
        self.with(|r| r.observations.push((key, value)));
    }

    fn set_gauge(&self, gauge: &str, labels: Labels<'_>, value: f64) {
        let key = series(gauge, labels);
        self.with(|r| {
            r.gauges.insert(key, value);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_order_does_not_split_series() {
        let reporter = RecordingReporter::new();
        reporter.increment("events_total", &[("event", "a"), ("topic", "t")]);
        reporter.increment("events_total", &[("topic", "t"), ("event", "a")]);
        reporter.increment("events_total", &[("event", "b"), ("topic", "t")]);

        assert_eq!(
            reporter.counter("events_total", &[("event", "a"), ("topic", "t")]),
            2
        );
        assert_eq!(reporter.counter_total("events_total"), 3);
    }

    #[test]
    fn gauges_keep_the_last_value() {
        let reporter = RecordingReporter::new();
        assert!(reporter.is_empty());
        reporter.set_gauge("periods", &[("state", "WAIT")], 3.0);
        reporter.set_gauge("periods", &[("state", "WAIT")], 1.0);
        assert_eq!(reporter.gauge("periods", &[("state", "WAIT")]), Some(1.0));
        assert_eq!(reporter.gauge("periods", &[("state", "DONE")]), None);
    }
}
