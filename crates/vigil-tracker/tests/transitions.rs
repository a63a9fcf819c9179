//! Tracker behaviour for `claim_period_changed`: idempotent upserts, dwell
//! time, loop detection and counters.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::missing_panics_doc
)]

mod support;

use chrono::{NaiveDateTime, TimeDelta};
use serde_json::json;
use support::{Harness, changed};
use vigil_bus::Delivery;
use vigil_db::StateStore;
use vigil_report::RecordingReporter;
use vigil_tracker::TrackerConfig;

fn at(raw: &str) -> NaiveDateTime {
    raw.parse().unwrap()
}

fn stamp(instant: NaiveDateTime) -> String {
    instant.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

#[tokio::test]
async fn leaving_a_state_publishes_the_time_spent_in_it() {
    let harness = Harness::new();
    harness
        .change("E1", "START", "WAIT", "2024-03-01T10:00:00")
        .await;
    harness
        .change("E1", "WAIT", "DONE", "2024-03-01T10:05:00")
        .await;

    let events = harness.time_in_state_events().await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event["periodId"], "E1");
    assert_eq!(event["state"], "WAIT");
    assert_eq!(event["newState"], "DONE");
    assert_eq!(event["elapsedSeconds"], 300);
    assert_eq!(event["enteredAt"], "2024-03-01T10:00:00");
    assert_eq!(event["leftAt"], "2024-03-01T10:05:00");
    assert_eq!(event["personId"], support::PERSON);
    assert_eq!(event["employerId"], support::EMPLOYER);

    let keys: Vec<Option<String>> = harness
        .rapid
        .published_records()
        .await
        .into_iter()
        .map(|r| r.key)
        .collect();
    assert!(keys.iter().all(|k| k.as_deref() == Some(support::PERSON)));
}

#[tokio::test]
async fn reordered_and_replayed_events_leave_the_latest_state() {
    let harness = Harness::new();
    harness
        .change("E1", "WAIT", "DONE", "2024-03-01T10:05:00")
        .await;
    harness
        .change("E1", "START", "WAIT", "2024-03-01T10:00:00")
        .await;
    harness
        .change("E1", "WAIT", "DONE", "2024-03-01T10:05:00")
        .await;

    let record = harness.store.find("E1").await.unwrap().unwrap();
    assert_eq!(record.state, "DONE");
    assert_eq!(record.changed_at, at("2024-03-01T10:05:00"));
    assert!(harness.time_in_state_events().await.is_empty());
    assert_eq!(harness.store.history_len("E1").await, 2);
}

#[tokio::test]
async fn replay_does_not_double_count_dwell_time() {
    let harness = Harness::new();
    for _ in 0..2 {
        harness
            .change("E1", "START", "WAIT", "2024-03-01T10:00:00")
            .await;
        harness
            .change("E1", "WAIT", "DONE", "2024-03-01T10:05:00")
            .await;
    }
    assert_eq!(harness.time_in_state_events().await.len(), 1);
}

#[tokio::test]
async fn mismatched_previous_state_updates_without_dwell_event() {
    let harness = Harness::new();
    harness
        .change("E1", "START", "WAIT", "2024-03-01T10:00:00")
        .await;
    harness
        .change("E1", "ELSEWHERE", "DONE", "2024-03-01T10:05:00")
        .await;

    assert!(harness.time_in_state_events().await.is_empty());
    let record = harness.store.find("E1").await.unwrap().unwrap();
    assert_eq!(record.state, "DONE");
}

#[tokio::test]
async fn same_second_events_are_ordered_by_fraction() {
    let harness = Harness::new();
    harness
        .change("E1", "START", "WAIT", "2024-03-01T10:00:00.000000001")
        .await;
    harness
        .change("E1", "WAIT", "DONE", "2024-03-01T10:00:00.000000002")
        .await;
    harness
        .change("E1", "START", "WAIT", "2024-03-01T10:00:00.000000001")
        .await;

    let record = harness.store.find("E1").await.unwrap().unwrap();
    assert_eq!(record.state, "DONE");
    let events = harness.time_in_state_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["elapsedSeconds"], 0);
}

async fn bounce(harness: &Harness, from: &str, to: &str, start: NaiveDateTime, round_trips: i64) {
    for n in 0..round_trips {
        let there = start + TimeDelta::seconds(n * 2);
        let back = start + TimeDelta::seconds(n * 2 + 1);
        harness.change("E1", from, to, &stamp(there)).await;
        harness.change("E1", to, from, &stamp(back)).await;
    }
}

#[tokio::test]
async fn loop_alarm_fires_once_per_direction_at_the_threshold() {
    let harness = Harness::new();
    let start = at("2024-03-01T10:00:00");

    bounce(&harness, "A", "B", start, 9).await;
    assert!(harness.loop_alarms().await.is_empty());

    bounce(&harness, "A", "B", start + TimeDelta::seconds(18), 1).await;
    let alarms = harness.loop_alarms().await;
    assert_eq!(alarms.len(), 2);
    assert_eq!(alarms[0]["previousState"], "A");
    assert_eq!(alarms[0]["currentState"], "B");
    assert_eq!(alarms[1]["previousState"], "B");
    assert_eq!(alarms[1]["currentState"], "A");
    assert_eq!(alarms[0]["occurrences"], 10);

    bounce(&harness, "A", "B", start + TimeDelta::seconds(20), 5).await;
    assert_eq!(harness.loop_alarms().await.len(), 2);
}

#[tokio::test]
async fn a_sustained_loop_alarms_once_per_direction_per_window() {
    let harness = Harness::new();
    let start = at("2024-03-01T10:00:00");
    let mut alarms_after = Vec::new();
    for n in 0..20 {
        let there = start + TimeDelta::seconds(n * 390);
        let back = there + TimeDelta::seconds(195);
        harness.change("E1", "A", "B", &stamp(there)).await;
        harness.change("E1", "B", "A", &stamp(back)).await;
        alarms_after.push(harness.loop_alarms().await.len());
    }

    // Ten repetitions fit in the hour from the tenth one on. The next alarm
    // is due an hour after the first, at the twentieth repetition.
    assert_eq!(alarms_after[8], 0);
    assert_eq!(alarms_after[9], 2);
    assert_eq!(alarms_after[18], 2);
    assert_eq!(alarms_after[19], 4);

    let alarms = harness.loop_alarms().await;
    let forward = alarms
        .iter()
        .filter(|alarm| alarm["previousState"] == "A")
        .count();
    assert_eq!(forward, 2);
}

#[tokio::test]
async fn repetitions_outside_the_window_are_not_a_loop() {
    let harness = Harness::new();
    let start = at("2024-03-01T10:00:00");
    for n in 0..10 {
        let there = start + TimeDelta::minutes(n * 10);
        let back = there + TimeDelta::minutes(5);
        harness.change("E1", "A", "B", &stamp(there)).await;
        harness.change("E1", "B", "A", &stamp(back)).await;
    }
    assert!(harness.loop_alarms().await.is_empty());
}

#[tokio::test]
async fn threshold_and_window_are_configurable() {
    let harness = Harness::with_config(TrackerConfig {
        loop_threshold: 3,
        loop_window: TimeDelta::minutes(5),
        ..TrackerConfig::default()
    });
    bounce(&harness, "A", "B", at("2024-03-01T10:00:00"), 3).await;
    assert_eq!(harness.loop_alarms().await.len(), 2);
}

#[tokio::test]
async fn exempted_transitions_never_alarm() {
    let harness = Harness::new();
    bounce(
        &harness,
        "AWAITING_APPROVAL",
        "AWAITING_HISTORY",
        at("2024-03-01T10:00:00"),
        12,
    )
    .await;
    assert!(harness.loop_alarms().await.is_empty());
}

#[tokio::test]
async fn stale_transitions_are_not_loop_checked() {
    let harness = Harness::with_config(TrackerConfig {
        loop_threshold: 1,
        ..TrackerConfig::default()
    });
    harness
        .change("E1", "X", "Y", "2024-03-01T11:00:00")
        .await;
    assert_eq!(harness.loop_alarms().await.len(), 1);
    harness
        .change("E1", "A", "B", "2024-03-01T10:00:00")
        .await;
    assert_eq!(harness.loop_alarms().await.len(), 1);
}

#[tokio::test]
async fn every_accepted_transition_is_counted() {
    let harness = Harness::new();
    let mut warned = changed("E1", "START", "WAIT", "2024-03-01T10:00:00");
    warned["hasWarnings"] = json!(true);
    harness.send(&warned).await;
    harness
        .change("E1", "START", "WAIT", "2024-03-01T10:00:00")
        .await;

    let reporter: &RecordingReporter = &harness.reporter;
    let labels = |warnings| {
        [
            ("previous_state", "START"),
            ("state", "WAIT"),
            ("cause", "new_application"),
            ("has_warnings", warnings),
        ]
    };
    assert_eq!(
        reporter.counter("period_state_transitions_total", &labels("1")),
        1
    );
    assert_eq!(
        reporter.counter("period_state_transitions_total", &labels("0")),
        1
    );
}

#[tokio::test]
async fn malformed_transition_is_rejected_without_touching_the_store() {
    let harness = Harness::new();
    let mut broken = changed("E1", "START", "WAIT", "2024-03-01T10:00:00");
    broken.as_object_mut().unwrap().remove("currentState");

    let deliveries = harness
        .rapid
        .send_test_message(&broken.to_string())
        .await;

    assert_eq!(deliveries[0], Delivery::Rejected);
    assert!(harness.store.find("E1").await.unwrap().is_none());
    assert_eq!(
        harness.reporter.counter_total("period_state_transitions_total"),
        0
    );
}

#[tokio::test]
async fn unparsable_created_timestamp_is_rejected() {
    let harness = Harness::new();
    let mut broken = changed("E1", "START", "WAIT", "2024-03-01T10:00:00");
    broken["@created"] = json!("yesterday");
    let deliveries = harness
        .rapid
        .send_test_message(&broken.to_string())
        .await;
    assert_eq!(deliveries[0], Delivery::Rejected);
}
