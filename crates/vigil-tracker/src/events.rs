//! Names and builders for the events the tracker reads and writes.
//!
//! Outbound events carry the standard envelope: `@event_name`, a fresh
//! `@id` and a local `@created` timestamp.

use chrono::{Local, NaiveDateTime};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// A period changed state.
pub const PERIOD_CHANGED: &str = "claim_period_changed";
/// Full snapshot of a person's periods.
pub const PERSON_RECONCILED: &str = "person_reconciled";
/// A reminder was scheduled for a period.
pub const REMINDER_SCHEDULED: &str = "reminder_scheduled";
/// A reminder was sent for a period.
pub const REMINDER: &str = "reminder";
/// Derived: how long a period stayed in a state.
pub const TIME_IN_STATE: &str = "claim_period_time_in_state";
/// Derived: a period keeps repeating the same transition.
pub const IN_LOOP: &str = "claim_period_in_loop";

/// Timestamp format used on outbound events.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Format an instant the way producers on the rapid write them.
pub fn format_instant(instant: NaiveDateTime) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

fn envelope(event_name: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("@event_name".to_owned(), Value::from(event_name));
    map.insert("@id".to_owned(), Value::from(Uuid::new_v4().to_string()));
    map.insert(
        "@created".to_owned(),
        Value::from(format_instant(Local::now().naive_local())),
    );
    map
}

fn with_envelope(event_name: &str, body: Value) -> Value {
    let mut map = envelope(event_name);
    if let Value::Object(fields) = body {
        map.extend(fields);
    }
    Value::Object(map)
}

/// Dwell time of one period in one state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeInState {
    /// Period id.
    pub period_id: String,
    /// Person the period belongs to.
    pub person_id: String,
    /// Employer the period belongs to.
    pub employer_id: String,
    /// State the period stayed in.
    pub state: String,
    /// State the period moved on to.
    pub new_state: String,
    /// When the period entered `state`.
    pub entered_at: NaiveDateTime,
    /// When the period left `state`.
    pub left_at: NaiveDateTime,
    /// Whole seconds spent in `state`.
    pub elapsed_seconds: i64,
    /// Expected seconds in `state`, zero when unknown.
    pub timeout_seconds: i64,
    /// Reminders sent while in `state`.
    pub reminder_count: i64,
}

impl TimeInState {
    /// Build the `claim_period_time_in_state` event.
    pub fn to_event(&self) -> Value {
        with_envelope(
            TIME_IN_STATE,
            json!({
                "periodId": self.period_id,
                "personId": self.person_id,
                "employerId": self.employer_id,
                "state": self.state,
                "newState": self.new_state,
                "enteredAt": format_instant(self.entered_at),
                "leftAt": format_instant(self.left_at),
                "elapsedSeconds": self.elapsed_seconds,
                "timeout": self.timeout_seconds,
                "reminderCount": self.reminder_count,
            }),
        )
    }
}

/// A period that repeated one transition too often.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InLoop {
    /// Period id.
    pub period_id: String,
    /// Person the period belongs to.
    pub person_id: String,
    /// State the repeated transition leaves.
    pub previous_state: String,
    /// State the repeated transition enters.
    pub state: String,
    /// How many times the transition was seen inside the window.
    pub occurrences: u64,
}

impl InLoop {
    /// Build the `claim_period_in_loop` event.
    pub fn to_event(&self) -> Value {
        with_envelope(
            IN_LOOP,
            json!({
                "periodId": self.period_id,
                "personId": self.person_id,
                "previousState": self.previous_state,
                "currentState": self.state,
                "occurrences": self.occurrences,
            }),
        )
    }
}
