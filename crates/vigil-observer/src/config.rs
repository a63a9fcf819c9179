//! Configuration loaded from environment variables.
//!
//! [`ObserverConfig::from_lookup`] takes any variable source, so tests feed
//! it a map instead of touching the process environment.

use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use vigil_bus::{NatsConfig, RapidConfig};
use vigil_db::PostgresConfig;
use vigil_report::SlackConfig;
use vigil_tracker::TrackerConfig;

use crate::error::ObserverError;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Complete observer configuration.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// NATS `JetStream` settings for the rapid.
    pub nats: NatsConfig,
    /// Poll timeout and batch size.
    pub rapid: RapidConfig,
    /// Database connection settings.
    pub database: PostgresConfig,
    /// Whether to apply pending migrations on startup.
    pub run_migrations: bool,
    /// Webhook settings; alerts are only logged when absent.
    pub slack: Option<SlackConfig>,
    /// Channel dwell-time alerts are posted to.
    pub alert_channel: String,
    /// Loop detection and gauge settings.
    pub tracker: TrackerConfig,
    /// Log line format.
    pub log_format: LogFormat,
}

impl ObserverConfig {
    /// Load configuration from the process environment.
    ///
    /// Required variables:
    /// - `NATS_URL` -- NATS server connection string
    /// - `DATABASE_URL` -- `PostgreSQL` connection string
    ///
    /// Optional variables:
    /// - `RAPID_STREAM` -- `JetStream` stream name (default `RAPID`)
    /// - `RAPID_SUBJECT_PREFIX` -- subject prefix (default `rapid`)
    /// - `RAPID_PARTITIONS` -- partitions keys are spread over (default 1)
    /// - `CONSUMER_GROUP` -- durable consumer name (default `vigil`)
    /// - `POLL_TIMEOUT_MS` -- poll wait in milliseconds (default 1000)
    /// - `POLL_BATCH_SIZE` -- records per poll (default 100)
    /// - `DATABASE_MAX_CONNECTIONS` -- pool size (default 10)
    /// - `RUN_MIGRATIONS` -- apply migrations on startup (default `true`)
    /// - `SLACK_WEBHOOK_URL` -- incoming webhook for alerts
    /// - `SLACK_CHANNEL` -- alert channel (default `#claims-alerts`)
    /// - `SLACK_USERNAME` -- bot name (default `vigil`)
    /// - `GAUGE_REFRESH_SECS` -- state gauge refresh interval (default 30)
    /// - `LOOP_THRESHOLD` -- repetitions that raise a loop alarm (default 10)
    /// - `LOOP_WINDOW_MINUTES` -- loop look-back window (default 60)
    /// - `LOG_FORMAT` -- `text` or `json` (default `text`)
    pub fn from_env() -> Result<Self, ObserverError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ObserverError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let nats = NatsConfig {
            url: vars.required("NATS_URL")?,
            stream: vars.or("RAPID_STREAM", "RAPID"),
            subject_prefix: vars.or("RAPID_SUBJECT_PREFIX", "rapid"),
            partitions: vars.parsed("RAPID_PARTITIONS", 1)?,
            group: vars.or("CONSUMER_GROUP", "vigil"),
        };
        if nats.partitions == 0 {
            return Err(ObserverError::Config(
                "RAPID_PARTITIONS must be at least 1".to_owned(),
            ));
        }

        let rapid = RapidConfig {
            poll_timeout: Duration::from_millis(vars.parsed("POLL_TIMEOUT_MS", 1000)?),
            max_records: vars.parsed("POLL_BATCH_SIZE", 100)?,
        };

        let database = PostgresConfig::new(&vars.required("DATABASE_URL")?)
            .with_max_connections(vars.parsed("DATABASE_MAX_CONNECTIONS", 10)?);

        let slack = vars.get("SLACK_WEBHOOK_URL").map(|webhook_url| SlackConfig {
            webhook_url,
            username: vars.or("SLACK_USERNAME", "vigil"),
            icon_emoji: ":rotating_light:".to_owned(),
        });

        let window_minutes: i64 = vars.parsed("LOOP_WINDOW_MINUTES", 60)?;
        let loop_window = TimeDelta::try_minutes(window_minutes)
            .filter(|window| *window > TimeDelta::zero())
            .ok_or_else(|| {
                ObserverError::Config(format!("invalid LOOP_WINDOW_MINUTES: {window_minutes}"))
            })?;

        let tracker = TrackerConfig {
            loop_threshold: vars.parsed("LOOP_THRESHOLD", 10)?,
            loop_window,
            gauge_refresh: Duration::from_secs(vars.parsed("GAUGE_REFRESH_SECS", 30)?),
            ..TrackerConfig::default()
        };

        let log_format = match vars.or("LOG_FORMAT", "text").to_lowercase().as_str() {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => {
                return Err(ObserverError::Config(format!(
                    "invalid LOG_FORMAT: {other}"
                )));
            }
        };

        Ok(Self {
            nats,
            rapid,
            database,
            run_migrations: vars.parsed("RUN_MIGRATIONS", true)?,
            slack,
            alert_channel: vars.or("SLACK_CHANNEL", "#claims-alerts"),
            tracker,
            log_format,
        })
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, name: &str) -> Result<String, ObserverError> {
        self.get(name)
            .ok_or_else(|| ObserverError::Config(format!("missing required env var {name}")))
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_owned())
    }

    fn parsed<T>(&self, name: &str, default: T) -> Result<T, ObserverError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(name).map_or(Ok(default), |raw| {
            raw.trim()
                .parse()
                .map_err(|e| ObserverError::Config(format!("invalid {name}: {e}")))
        })
    }
}
