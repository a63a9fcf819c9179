//! Rapid observer entry point.
//!
//! Connects to the rapid and the state database, registers the monitors and
//! the state tracker, and consumes until interrupted.
//!
//! # Architecture
//!
//! ```text
//! NATS (rapid) --> EventMonitor
//!              --> StateTracker --> PostgreSQL
//!                               --> NATS (time in state, loop alarms)
//!              --> DwellTimeMonitor --> Slack
//!              --> ReminderMonitor  --> Slack
//! ```
//!
//! Registration order matters: every river sees each record in the order it
//! was registered, so the event counter runs before the tracker acts.

mod config;
mod error;

use std::sync::Arc;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use vigil_bus::{Rapid, nats};
use vigil_db::{PgStateStore, StateStore};
use vigil_report::{Alerter, LogAlerter, PrometheusReporter, Reporter, SlackClient};
use vigil_tracker::metrics::{HELP, LATENCY_BUCKETS, STATE_LATENCY_SECONDS};
use vigil_tracker::{DwellTimeMonitor, EventMonitor, ReminderMonitor, StateTracker};

use crate::config::{LogFormat, ObserverConfig};
use crate::error::ObserverError;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, a connection, or the poll loop fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ObserverConfig::from_env()?;
    init_tracing(config.log_format);

    info!(
        nats_url = config.nats.url,
        stream = config.nats.stream,
        partitions = config.nats.partitions,
        group = config.nats.group,
        loop_threshold = config.tracker.loop_threshold,
        loop_window_minutes = config.tracker.loop_window.num_minutes(),
        "vigil-observer starting"
    );

    run(config).await?;

    info!("vigil-observer stopped");
    Ok(())
}

/// Wire everything together and consume until interrupted.
async fn run(config: ObserverConfig) -> Result<(), ObserverError> {
    let (consumer, producer) = nats::connect(&config.nats).await?;

    let db = Arc::new(PgStateStore::connect(&config.database).await?);
    if config.run_migrations {
        db.migrate().await?;
    }
    let store: Arc<dyn StateStore> = Arc::<PgStateStore>::clone(&db);

    let prometheus = Arc::new(build_reporter());
    let reporter: Arc<dyn Reporter> = Arc::<PrometheusReporter>::clone(&prometheus);
    let alerter = build_alerter(&config)?;

    let mut rapid = Rapid::new(consumer, producer, config.rapid);
    EventMonitor::register(&mut rapid, &reporter);
    StateTracker::register(&mut rapid, &store, &reporter, config.tracker);
    DwellTimeMonitor::register(&mut rapid, &reporter, &alerter, &config.alert_channel);
    ReminderMonitor::register(&mut rapid, &alerter, &config.alert_channel);

    let stop = rapid.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping");
                stop.stop();
            }
            Err(e) => warn!(error = %e, "failed to listen for interrupt"),
        }
    });

    let outcome = rapid.start().await;

    match prometheus.render() {
        Ok(text) => debug!(metrics = %text, "final metrics"),
        Err(e) => warn!(error = %e, "failed to render metrics"),
    }
    db.close().await;
    outcome.map_err(Into::into)
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn build_reporter() -> PrometheusReporter {
    HELP.iter()
        .fold(PrometheusReporter::new(), |reporter, (metric, help)| {
            reporter.with_help(metric, help)
        })
        .with_buckets(STATE_LATENCY_SECONDS, LATENCY_BUCKETS.to_vec())
}

fn build_alerter(config: &ObserverConfig) -> Result<Arc<dyn Alerter>, ObserverError> {
    match &config.slack {
        Some(slack) => {
            info!(channel = config.alert_channel, "posting alerts to Slack");
            Ok(Arc::new(SlackClient::new(slack.clone())?))
        }
        None => {
            info!("SLACK_WEBHOOK_URL not set, alerts will only be logged");
            Ok(Arc::new(LogAlerter))
        }
    }
}
