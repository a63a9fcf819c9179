//! Monitors that turn rapid traffic into metrics and alerts.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};
use vigil_bus::{ListenerResult, MessageContext, PacketListener, River, RiverRegistry};
use vigil_message::{Packet, Rules, ValueKind};
use vigil_report::{Alerter, Reporter};

use crate::events::{REMINDER, TIME_IN_STATE, format_instant};
use crate::metrics::{EVENTS_TOTAL, STATE_LATENCY_SECONDS};

/// Render a number of seconds as text, largest unit first:
/// `"1 day, 2 hours, 5 seconds"`. Zero units are left out.
#[allow(clippy::arithmetic_side_effects)]
pub fn human_duration(seconds: i64) -> String {
    const UNITS: [(u64, &str); 4] = [(86_400, "day"), (3_600, "hour"), (60, "minute"), (1, "second")];

    let mut remaining = seconds.unsigned_abs();
    let mut parts = Vec::new();
    for (size, name) in UNITS {
        let count = remaining / size;
        remaining %= size;
        if count > 0 {
            let plural = if count == 1 { "" } else { "s" };
            parts.push(format!("{count} {name}{plural}"));
        }
    }
    if parts.is_empty() {
        return "0 seconds".to_owned();
    }
    let text = parts.join(", ");
    if seconds < 0 { format!("-{text}") } else { text }
}

/// Observes dwell times and alerts when a period overstayed its timeout.
pub struct DwellTimeMonitor {
    reporter: Arc<dyn Reporter>,
    alerter: Arc<dyn Alerter>,
    channel: String,
}

impl DwellTimeMonitor {
    /// Rules for `claim_period_time_in_state`.
    pub fn rules() -> Rules {
        Rules::new()
            .demand_value("@event_name", TIME_IN_STATE)
            .require_keys(&[
                "periodId",
                "state",
                "newState",
                "enteredAt",
                "elapsedSeconds",
                "timeout",
            ])
            .require_typed("enteredAt", ValueKind::DateTime)
            .require_typed("elapsedSeconds", ValueKind::Integer)
            .require_typed("timeout", ValueKind::Integer)
    }

    /// Register the monitor river, posting alerts to `channel`.
    pub fn register<R>(
        registry: &mut R,
        reporter: &Arc<dyn Reporter>,
        alerter: &Arc<dyn Alerter>,
        channel: &str,
    ) where
        R: RiverRegistry + ?Sized,
    {
        registry.register(River::new(
            "dwell-time",
            Self::rules(),
            Arc::new(Self {
                reporter: Arc::clone(reporter),
                alerter: Arc::clone(alerter),
                channel: channel.to_owned(),
            }),
        ));
    }
}

#[async_trait]
impl PacketListener for DwellTimeMonitor {
    async fn on_packet(&self, packet: Packet<'_>, _context: &MessageContext<'_>) -> ListenerResult {
        let state = packet.text("state")?;
        self.reporter.observe(
            STATE_LATENCY_SECONDS,
            packet.number("elapsedSeconds")?,
            &[("state", state)],
        );

        let elapsed = packet.integer("elapsedSeconds")?;
        let timeout = packet.integer("timeout")?;
        if timeout <= 0 || elapsed <= timeout {
            return Ok(());
        }

        let period_id = packet.text("periodId")?;
        let text = format!(
            "Period {period_id} moved on from {state} to {} after {} since {}. Expected time in state was {}",
            packet.text("newState")?,
            human_duration(elapsed),
            format_instant(packet.datetime("enteredAt")?),
            human_duration(timeout),
        );
        info!(
            period_id = period_id,
            state = state,
            elapsed_seconds = elapsed,
            timeout_seconds = timeout,
            "period overstayed its expected time in state"
        );
        self.alerter.post_message(&self.channel, &text).await;
        Ok(())
    }
}

/// Reminders after which a period counts as stuck.
pub const STUCK_AFTER_REMINDERS: i64 = 2;

/// Alerts when a period keeps being reminded without leaving its state.
pub struct ReminderMonitor {
    alerter: Arc<dyn Alerter>,
    channel: String,
}

impl ReminderMonitor {
    /// Rules for `reminder`, including when the state was entered.
    pub fn rules() -> Rules {
        Rules::new()
            .demand_value("@event_name", REMINDER)
            .require_keys(&["periodId", "state", "reminderCount", "stateChangedAt"])
            .require_typed("reminderCount", ValueKind::Integer)
            .require_typed("stateChangedAt", ValueKind::DateTime)
    }

    /// Register the monitor river, posting alerts to `channel`.
    pub fn register<R>(registry: &mut R, alerter: &Arc<dyn Alerter>, channel: &str)
    where
        R: RiverRegistry + ?Sized,
    {
        registry.register(River::new(
            "reminder-monitor",
            Self::rules(),
            Arc::new(Self {
                alerter: Arc::clone(alerter),
                channel: channel.to_owned(),
            }),
        ));
    }
}

#[async_trait]
impl PacketListener for ReminderMonitor {
    async fn on_packet(&self, packet: Packet<'_>, _context: &MessageContext<'_>) -> ListenerResult {
        let reminders = packet.integer("reminderCount")?;
        if reminders < STUCK_AFTER_REMINDERS {
            return Ok(());
        }

        let period_id = packet.text("periodId")?;
        let state = packet.text("state")?;
        let since = format_instant(packet.datetime("stateChangedAt")?);
        error!(
            period_id = period_id,
            state = state,
            reminder_count = reminders,
            state_changed_at = %since,
            "period is stuck in state"
        );
        let text = format!(
            "Period {period_id} is stuck in state {state}. It has been reminded {reminders} times since {since}"
        );
        self.alerter.post_message(&self.channel, &text).await;
        Ok(())
    }
}

/// Counts every event on the rapid by name, topic and partition.
pub struct EventMonitor {
    reporter: Arc<dyn Reporter>,
}

impl EventMonitor {
    /// Rules matching any message with an `@event_name`.
    pub fn rules() -> Rules {
        Rules::new().demand_key("@event_name")
    }

    /// Register the monitor river.
    pub fn register<R>(registry: &mut R, reporter: &Arc<dyn Reporter>)
    where
        R: RiverRegistry + ?Sized,
    {
        registry.register(River::new(
            "event-monitor",
            Self::rules(),
            Arc::new(Self {
                reporter: Arc::clone(reporter),
            }),
        ));
    }
}

#[async_trait]
impl PacketListener for EventMonitor {
    async fn on_packet(&self, packet: Packet<'_>, context: &MessageContext<'_>) -> ListenerResult {
        let metadata = context.metadata();
        let partition = metadata.partition.to_string();
        let event = packet
            .get("@event_name")?
            .and_then(|node| node.value().as_str())
            .unwrap_or("unknown");
        self.reporter.increment(
            EVENTS_TOTAL,
            &[
                ("event", event),
                ("topic", metadata.topic.as_str()),
                ("partition", partition.as_str()),
            ],
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_read_naturally() {
        assert_eq!(human_duration(0), "0 seconds");
        assert_eq!(human_duration(1), "1 second");
        assert_eq!(human_duration(300), "5 minutes");
        assert_eq!(human_duration(90_061), "1 day, 1 hour, 1 minute, 1 second");
        assert_eq!(human_duration(180_000), "2 days, 2 hours");
        assert_eq!(human_duration(-60), "-1 minute");
    }
}
