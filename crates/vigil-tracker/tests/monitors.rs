//! Dwell-time and stuck-period alerting, and the per-event counter.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp,
    clippy::missing_panics_doc
)]

mod support;

use serde_json::{Value, json};
use support::{ALERT_CHANNEL, Harness};

fn time_in_state(elapsed: i64, timeout: i64) -> Value {
    json!({
        "@event_name": "claim_period_time_in_state",
        "@id": "5d1c3b0e-9a51-4f8a-bb53-8a3b6a1f3d22",
        "periodId": "P1",
        "state": "AWAITING_APPROVAL",
        "newState": "APPROVED",
        "enteredAt": "2024-03-01T10:00:00",
        "leftAt": "2024-03-02T10:00:00",
        "elapsedSeconds": elapsed,
        "timeout": timeout,
        "reminderCount": 0
    })
}

#[tokio::test]
async fn overstaying_posts_an_alert() {
    let harness = Harness::new();
    harness.send(&time_in_state(90_061, 3_600)).await;

    let alerts = harness.alerter.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].channel, ALERT_CHANNEL);
    assert_eq!(
        alerts[0].text,
        "Period P1 moved on from AWAITING_APPROVAL to APPROVED after 1 day, 1 hour, 1 minute, \
         1 second since 2024-03-01T10:00:00. Expected time in state was 1 hour"
    );
}

#[tokio::test]
async fn no_alert_without_a_timeout_or_within_it() {
    let harness = Harness::new();
    harness.send(&time_in_state(90_061, 0)).await;
    harness.send(&time_in_state(3_600, 3_600)).await;
    harness.send(&time_in_state(60, 3_600)).await;

    assert!(harness.alerter.alerts().is_empty());
    assert_eq!(
        harness.reporter.observations(
            "period_state_latency_seconds",
            &[("state", "AWAITING_APPROVAL")]
        ),
        vec![90_061.0, 3_600.0, 60.0]
    );
}

#[tokio::test]
async fn published_dwell_events_feed_the_monitor() {
    let harness = Harness::new();
    harness
        .change("P1", "START", "WAIT", "2024-03-01T10:00:00")
        .await;
    harness
        .send(&json!({
            "@event_name": "reminder_scheduled",
            "periodId": "P1",
            "state": "WAIT",
            "changedAt": "2024-03-01T10:00:00",
            "remindAt": "2024-03-01T11:00:00",
            "isFinished": false
        }))
        .await;
    harness
        .change("P1", "WAIT", "DONE", "2024-03-01T12:00:00")
        .await;

    for event in harness.time_in_state_events().await {
        harness.send(&event).await;
    }

    let alerts = harness.alerter.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].text.starts_with("Period P1 moved on from WAIT to DONE after 2 hours"));
    assert!(alerts[0].text.ends_with("Expected time in state was 1 hour"));
}

fn reminder(count: i64) -> Value {
    json!({
        "@event_name": "reminder",
        "@id": "0b6f9d5e-2c1a-4a7e-9f3d-6e8a1c2b4d5f",
        "periodId": "P1",
        "state": "AWAITING_HISTORY",
        "reminderCount": count,
        "stateChangedAt": "2024-03-01T10:00:00"
    })
}

#[tokio::test]
async fn repeated_reminders_report_a_stuck_period() {
    let harness = Harness::new();
    harness.send(&reminder(0)).await;
    harness.send(&reminder(1)).await;
    assert!(harness.alerter.alerts().is_empty());

    harness.send(&reminder(2)).await;
    harness.send(&reminder(5)).await;
    let alerts = harness.alerter.alerts();
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0].channel, ALERT_CHANNEL);
    assert_eq!(
        alerts[0].text,
        "Period P1 is stuck in state AWAITING_HISTORY. It has been reminded 2 times since \
         2024-03-01T10:00:00"
    );
    assert!(alerts[1].text.contains("reminded 5 times"));
}

#[tokio::test]
async fn reminders_without_the_state_change_instant_never_alert() {
    let harness = Harness::new();
    let mut message = reminder(3);
    message.as_object_mut().unwrap().remove("stateChangedAt");
    harness.send(&message).await;
    harness.send(&json!({
        "@event_name": "reminder",
        "periodId": "P1",
        "state": "AWAITING_HISTORY",
        "reminderCount": 3,
        "stateChangedAt": "yesterday"
    }))
    .await;
    assert!(harness.alerter.alerts().is_empty());
}

#[tokio::test]
async fn every_named_event_is_counted() {
    let harness = Harness::new();
    harness.send(&json!({ "@event_name": "ping" })).await;
    harness.send(&json!({ "@event_name": "ping" })).await;
    harness.send(&json!({ "no_name": true })).await;

    assert_eq!(
        harness.reporter.counter(
            "events_total",
            &[("event", "ping"), ("topic", "test-rapid"), ("partition", "0")]
        ),
        2
    );
    assert_eq!(harness.reporter.counter_total("events_total"), 2);
}
