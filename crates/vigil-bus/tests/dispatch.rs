//! River dispatch tests driven through [`TestRapid`].

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::missing_panics_doc
)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use vigil_bus::{
    Delivery, ListenerResult, MessageContext, PacketListener, River, RiverRegistry, TestRapid,
};
use vigil_message::{Packet, Problems, Rules, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    Record,
    Fail,
    Panic,
    Reply,
}

struct Recorder {
    label: &'static str,
    behaviour: Behaviour,
    journal: Arc<Mutex<Vec<String>>>,
    problems: Arc<Mutex<Vec<Problems>>>,
}

impl Recorder {
    fn new(label: &'static str, behaviour: Behaviour, journal: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            label,
            behaviour,
            journal: Arc::clone(journal),
            problems: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl PacketListener for Recorder {
    async fn on_packet(&self, packet: Packet<'_>, context: &MessageContext<'_>) -> ListenerResult {
        self.journal.lock().unwrap().push(self.label.to_owned());
        match self.behaviour {
            Behaviour::Record => Ok(()),
            Behaviour::Fail => Err("listener refused".into()),
            Behaviour::Panic => panic!("listener blew up"),
            Behaviour::Reply => {
                let period = packet.text("periodId")?;
                context
                    .publish(&json!({ "@event_name": "echo", "periodId": period }))
                    .await?;
                context
                    .publish_with_key(Some("other-key"), &json!({ "@event_name": "echo" }))
                    .await?;
                Ok(())
            }
        }
    }

    async fn on_error(&self, problems: &Problems, _context: &MessageContext<'_>) {
        self.problems.lock().unwrap().push(problems.clone());
    }
}

fn ping_rules() -> Rules {
    Rules::new()
        .demand_value("@event_name", "ping")
        .require_key("periodId")
        .require_typed("@created", ValueKind::DateTime)
}

fn river(label: &'static str, behaviour: Behaviour, journal: &Arc<Mutex<Vec<String>>>) -> (River, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::new(label, behaviour, journal));
    let river = River::new(label, ping_rules(), Arc::clone(&recorder) as Arc<dyn PacketListener>);
    (river, recorder)
}

#[tokio::test]
async fn disinterest_is_silent() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let mut rapid = TestRapid::new();
    let (r, recorder) = river("a", Behaviour::Record, &journal);
    rapid.register(r);

    let deliveries = rapid
        .send_test_message(r#"{"@event_name":"pong","periodId":"p-1"}"#)
        .await;

    assert_eq!(deliveries, vec![Delivery::Ignored]);
    assert!(journal.lock().unwrap().is_empty());
    assert!(recorder.problems.lock().unwrap().is_empty());
}

#[tokio::test]
async fn shape_violation_is_reported_once_with_key_name() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let mut rapid = TestRapid::new();
    let (r, recorder) = river("a", Behaviour::Record, &journal);
    rapid.register(r);

    let deliveries = rapid.send_test_message(r#"{"@event_name":"ping"}"#).await;

    assert_eq!(deliveries, vec![Delivery::Rejected]);
    assert!(journal.lock().unwrap().is_empty());
    let problems = recorder.problems.lock().unwrap();
    assert_eq!(problems.len(), 1);
    assert!(problems[0].mentions("periodId"));
}

#[tokio::test]
async fn undecodable_record_reaches_no_river() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let mut rapid = TestRapid::new();
    let (r, recorder) = river("a", Behaviour::Record, &journal);
    rapid.register(r);

    assert!(rapid.send_test_message("not json at all").await.is_empty());
    assert!(rapid.send_test_message("[1, 2, 3]").await.is_empty());
    assert!(journal.lock().unwrap().is_empty());
    assert!(recorder.problems.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rivers_run_in_registration_order() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let mut rapid = TestRapid::new();
    for label in ["first", "second", "third"] {
        let (r, _) = river(label, Behaviour::Record, &journal);
        rapid.register(r);
    }

    rapid
        .send_test_message(r#"{"@event_name":"ping","periodId":"p-1"}"#)
        .await;

    assert_eq!(*journal.lock().unwrap(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn failing_and_panicking_listeners_do_not_starve_later_rivers() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let mut rapid = TestRapid::new();
    for (label, behaviour) in [
        ("fails", Behaviour::Fail),
        ("panics", Behaviour::Panic),
        ("records", Behaviour::Record),
    ] {
        let (r, _) = river(label, behaviour, &journal);
        rapid.register(r);
    }

    let deliveries = rapid
        .send_test_message(r#"{"@event_name":"ping","periodId":"p-1"}"#)
        .await;

    assert_eq!(
        deliveries,
        vec![Delivery::Failed, Delivery::Failed, Delivery::Handled]
    );
    assert_eq!(*journal.lock().unwrap(), vec!["fails", "panics", "records"]);
}

#[tokio::test]
async fn replies_default_to_the_triggering_key() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let mut rapid = TestRapid::new();
    let (r, _) = river("echo", Behaviour::Reply, &journal);
    rapid.register(r);

    rapid
        .send_test_message_with_key("person-1", r#"{"@event_name":"ping","periodId":"p-9"}"#)
        .await;

    let records = rapid.published_records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].key.as_deref(), Some("person-1"));
    assert_eq!(records[1].key.as_deref(), Some("other-key"));
    let echoes = rapid.published_events("echo").await;
    assert_eq!(echoes[0]["periodId"], "p-9");

    rapid.reset().await;
    assert!(rapid.published().await.is_empty());
}

#[tokio::test]
async fn replies_publish_with_debug_logging_enabled() {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let journal = Arc::new(Mutex::new(Vec::new()));
    let mut rapid = TestRapid::new();
    let (r, _) = river("echo", Behaviour::Reply, &journal);
    rapid.register(r);

    let deliveries = rapid
        .send_test_message_with_key("person-1", r#"{"@event_name":"ping","periodId":"p-9"}"#)
        .await;

    assert_eq!(deliveries, vec![Delivery::Handled]);
    assert_eq!(rapid.published_events("echo").await.len(), 2);
}
