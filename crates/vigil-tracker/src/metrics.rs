//! Metric names and the cached per-state gauge.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};
use vigil_db::StateStore;
use vigil_report::Reporter;

/// Counter: accepted transitions, labelled `previous_state`, `state`,
/// `cause` and `has_warnings`.
pub const TRANSITIONS_TOTAL: &str = "period_state_transitions_total";
/// Histogram: seconds spent in a state, labelled `state`.
pub const STATE_LATENCY_SECONDS: &str = "period_state_latency_seconds";
/// Gauge: periods currently in each state, labelled `state`.
pub const CURRENT_STATES: &str = "period_current_states";
/// Counter: messages seen on the rapid, labelled `event`, `topic` and
/// `partition`.
pub const EVENTS_TOTAL: &str = "events_total";

/// Help texts for every metric above.
pub const HELP: &[(&str, &str)] = &[
    (
        TRANSITIONS_TOTAL,
        "State transitions of claim periods, by origin state and cause",
    ),
    (STATE_LATENCY_SECONDS, "Seconds a claim period spent in a state"),
    (CURRENT_STATES, "Claim periods currently in each state"),
    (EVENTS_TOTAL, "Events seen on the rapid"),
];

/// Buckets for [`STATE_LATENCY_SECONDS`]: a minute, an hour, half a day, a
/// day, a week and a month.
pub const LATENCY_BUCKETS: &[f64] = &[60.0, 3_600.0, 43_200.0, 86_400.0, 604_800.0, 2_592_000.0];

#[derive(Debug, Default)]
struct GaugeState {
    last_refresh: Option<Instant>,
    reported: BTreeSet<String>,
}

/// Per-state counts, recomputed from the store at most once per interval.
///
/// The cache is advisory: it only throttles store queries and is rebuilt
/// from scratch after a restart.
pub struct StateGauge {
    store: Arc<dyn StateStore>,
    reporter: Arc<dyn Reporter>,
    interval: Duration,
    state: Mutex<GaugeState>,
}

impl StateGauge {
    /// A gauge that has never been refreshed. `known_states` are reported
    /// as zero until periods enter them.
    pub fn new(
        store: Arc<dyn StateStore>,
        reporter: Arc<dyn Reporter>,
        interval: Duration,
        known_states: &[String],
    ) -> Self {
        Self {
            store,
            reporter,
            interval,
            state: Mutex::new(GaugeState {
                last_refresh: None,
                reported: known_states.iter().cloned().collect(),
            }),
        }
    }

    /// Claim the refresh slot if the interval has passed.
    fn claim(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let due = state
            .last_refresh
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        if due {
            state.last_refresh = Some(now);
        }
        due
    }

    /// Refresh the gauge if it is due. Returns whether a refresh happened.
    ///
    /// A failed query is logged and retried on the next call.
    pub async fn refresh_if_due(&self) -> bool {
        if !self.claim(Instant::now()) {
            return false;
        }
        match self.store.count_by_state().await {
            Ok(counts) => {
                self.publish(&counts);
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to refresh state gauge");
                self.state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .last_refresh = None;
                false
            }
        }
    }

    fn publish(&self, counts: &BTreeMap<String, u64>) {
        let states: BTreeSet<String> = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.reported.extend(counts.keys().cloned());
            state.reported.clone()
        };
        info!(states = states.len(), "refreshing state gauge");
        for name in &states {
            let count = counts.get(name).copied().unwrap_or(0);
            #[allow(clippy::cast_precision_loss)]
            self.reporter
                .set_gauge(CURRENT_STATES, &[("state", name.as_str())], count as f64);
        }
    }
}
