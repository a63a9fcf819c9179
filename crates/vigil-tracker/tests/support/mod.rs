//! Shared fixtures for tracker tests.

#![allow(dead_code, clippy::unwrap_used, clippy::missing_panics_doc)]

use std::sync::Arc;

use serde_json::{Value, json};
use vigil_bus::TestRapid;
use vigil_db::{MemoryStateStore, StateStore};
use vigil_report::{Alerter, RecordingAlerter, RecordingReporter, Reporter};
use vigil_tracker::{DwellTimeMonitor, EventMonitor, ReminderMonitor, StateTracker, TrackerConfig};

pub const PERSON: &str = "12345678901";
pub const EMPLOYER: &str = "987654321";
pub const ALERT_CHANNEL: &str = "#claims-alerts";

pub struct Harness {
    pub rapid: TestRapid,
    pub store: Arc<MemoryStateStore>,
    pub reporter: Arc<RecordingReporter>,
    pub alerter: Arc<RecordingAlerter>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    pub fn with_config(config: TrackerConfig) -> Self {
        let store = Arc::new(MemoryStateStore::new());
        let reporter = Arc::new(RecordingReporter::new());
        let alerter = Arc::new(RecordingAlerter::new());
        let mut rapid = TestRapid::new();

        let dyn_store: Arc<dyn StateStore> = store.clone();
        let dyn_reporter: Arc<dyn Reporter> = reporter.clone();
        let dyn_alerter: Arc<dyn Alerter> = alerter.clone();
        StateTracker::register(&mut rapid, &dyn_store, &dyn_reporter, config);
        DwellTimeMonitor::register(&mut rapid, &dyn_reporter, &dyn_alerter, ALERT_CHANNEL);
        ReminderMonitor::register(&mut rapid, &dyn_alerter, ALERT_CHANNEL);
        EventMonitor::register(&mut rapid, &dyn_reporter);

        Self {
            rapid,
            store,
            reporter,
            alerter,
        }
    }

    pub async fn send(&self, message: &Value) {
        self.rapid
            .send_test_message_with_key(PERSON, &message.to_string())
            .await;
    }

    pub async fn change(&self, period: &str, previous: &str, current: &str, created: &str) {
        self.send(&changed(period, previous, current, created)).await;
    }

    pub async fn time_in_state_events(&self) -> Vec<Value> {
        self.rapid
            .published_events("claim_period_time_in_state")
            .await
    }

    pub async fn loop_alarms(&self) -> Vec<Value> {
        self.rapid.published_events("claim_period_in_loop").await
    }
}

pub fn changed(period: &str, previous: &str, current: &str, created: &str) -> Value {
    json!({
        "@event_name": "claim_period_changed",
        "@id": "8a7c0a3e-7f43-4e8e-9d4c-0d2f6d3f3f10",
        "@created": created,
        "@caused_by": { "event_name": "new_application", "id": "c0ffee" },
        "personId": PERSON,
        "employerId": EMPLOYER,
        "periodId": period,
        "previousState": previous,
        "currentState": current,
        "hasWarnings": false
    })
}
