//! The state-transition tracker rivers.
//!
//! [`StateTracker::register`] attaches four rivers, in this order:
//!
//! 1. `claim_period_changed` -- conditional upsert, counters, loop detection
//!    and dwell-time events
//! 2. `person_reconciled` -- snapshot reconciliation
//! 3. `reminder_scheduled` -- expected time in state
//! 4. `reminder` -- reminder counter
//!
//! A store failure fails the listener for that event only, and the record is
//! redelivered. Nothing the tracker keeps in memory is needed to recover:
//! replaying the rapid converges on the same table.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tracing::{debug, error, info, warn};
use vigil_bus::{ListenerResult, MessageContext, PacketListener, River, RiverRegistry};
use vigil_db::{SnapshotState, StateChange, StateStore, TransitionOutcome, TransitionPair};
use vigil_message::{FieldError, Packet, Problems, Rules, ValueKind};
use vigil_report::Reporter;

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::events::{
    InLoop, PERIOD_CHANGED, PERSON_RECONCILED, REMINDER, REMINDER_SCHEDULED, TimeInState,
};
use crate::metrics::{StateGauge, TRANSITIONS_TOTAL};

/// Rules for `claim_period_changed`.
pub fn transition_rules() -> Rules {
    Rules::new()
        .demand_value("@event_name", PERIOD_CHANGED)
        .require_keys(&[
            "@id",
            "@caused_by",
            "@caused_by.event_name",
            "personId",
            "employerId",
            "periodId",
            "previousState",
            "currentState",
            "@created",
        ])
        .require_typed("@created", ValueKind::DateTime)
        .require_typed("deadline", ValueKind::DateTime)
        .interested_in(&["hasWarnings"])
}

/// Rules for `person_reconciled`.
pub fn reconciliation_rules() -> Rules {
    let period = Rules::new()
        .require_keys(&["id", "state", "updated"])
        .require_typed("updated", ValueKind::DateTime);
    Rules::new()
        .demand_value("@event_name", PERSON_RECONCILED)
        .require_key("personId")
        .require_array(
            "employers",
            Rules::new()
                .require_array("periods", period.clone())
                .require_array("discardedPeriods", period),
        )
}

/// Rules for `reminder_scheduled`.
pub fn reminder_scheduled_rules() -> Rules {
    Rules::new()
        .demand_value("@event_name", REMINDER_SCHEDULED)
        .require_keys(&["periodId", "state", "changedAt", "remindAt", "isFinished"])
        .require_typed("changedAt", ValueKind::DateTime)
        .require_typed("remindAt", ValueKind::DateTime)
        .require_typed("isFinished", ValueKind::Boolean)
}

/// Rules for `reminder`.
pub fn reminder_rules() -> Rules {
    Rules::new()
        .demand_value("@event_name", REMINDER)
        .require_keys(&["periodId", "state", "reminderCount"])
        .require_typed("reminderCount", ValueKind::Integer)
}

/// Entry point wiring the tracker rivers onto a rapid.
pub struct StateTracker;

impl StateTracker {
    /// Register every tracker river with `registry`.
    pub fn register<R>(
        registry: &mut R,
        store: &Arc<dyn StateStore>,
        reporter: &Arc<dyn Reporter>,
        config: TrackerConfig,
    ) where
        R: RiverRegistry + ?Sized,
    {
        let gauge = Arc::new(StateGauge::new(
            Arc::clone(store),
            Arc::clone(reporter),
            config.gauge_refresh,
            &config.known_states,
        ));
        registry.register(River::new(
            "period-transitions",
            transition_rules(),
            Arc::new(TransitionListener {
                store: Arc::clone(store),
                reporter: Arc::clone(reporter),
                gauge,
                config,
            }),
        ));
        registry.register(River::new(
            "person-reconciliation",
            reconciliation_rules(),
            Arc::new(ReconciliationListener {
                store: Arc::clone(store),
            }),
        ));
        registry.register(River::new(
            "reminder-scheduled",
            reminder_scheduled_rules(),
            Arc::new(ReminderScheduledListener {
                store: Arc::clone(store),
            }),
        ));
        registry.register(River::new(
            "reminders",
            reminder_rules(),
            Arc::new(ReminderListener {
                store: Arc::clone(store),
            }),
        ));
    }
}

/// One `claim_period_changed` event, read out of its packet.
#[derive(Debug, Clone)]
struct Transition {
    period_id: String,
    person_id: String,
    employer_id: String,
    previous_state: String,
    state: String,
    changed_at: NaiveDateTime,
    deadline: Option<NaiveDateTime>,
    cause: String,
    has_warnings: bool,
}

impl Transition {
    fn read(packet: &Packet<'_>) -> Result<Self, FieldError> {
        Ok(Self {
            period_id: packet.text("periodId")?.to_owned(),
            person_id: packet.text("personId")?.to_owned(),
            employer_id: packet.text("employerId")?.to_owned(),
            previous_state: packet.text("previousState")?.to_owned(),
            state: packet.text("currentState")?.to_owned(),
            changed_at: packet.datetime("@created")?,
            deadline: packet.optional_datetime("deadline")?,
            cause: packet.text("@caused_by.event_name")?.to_owned(),
            has_warnings: packet
                .get("hasWarnings")?
                .and_then(|node| node.value().as_bool())
                .unwrap_or(false),
        })
    }

    fn change(&self) -> StateChange {
        StateChange {
            entity_id: self.period_id.clone(),
            previous_state: self.previous_state.clone(),
            state: self.state.clone(),
            changed_at: self.changed_at,
            deadline: self.deadline,
        }
    }
}

struct TransitionListener {
    store: Arc<dyn StateStore>,
    reporter: Arc<dyn Reporter>,
    gauge: Arc<StateGauge>,
    config: TrackerConfig,
}

impl TransitionListener {
    async fn handle(
        &self,
        packet: Packet<'_>,
        context: &MessageContext<'_>,
    ) -> Result<(), TrackerError> {
        let transition = Transition::read(&packet)?;
        info!(
            period_id = %transition.period_id,
            previous_state = %transition.previous_state,
            state = %transition.state,
            changed_at = %transition.changed_at,
            "period changed state"
        );
        self.count(&transition).await;

        let outcome = self.store.record_transition(&transition.change()).await?;
        if !outcome.applied {
            debug!(
                period_id = %transition.period_id,
                changed_at = %transition.changed_at,
                "stale transition ignored"
            );
            return Ok(());
        }

        self.detect_loop(&transition, context).await?;
        self.publish_time_in_state(&transition, outcome, context).await
    }

    async fn count(&self, transition: &Transition) {
        self.gauge.refresh_if_due().await;
        self.reporter.increment(
            TRANSITIONS_TOTAL,
            &[
                ("previous_state", transition.previous_state.as_str()),
                ("state", transition.state.as_str()),
                ("cause", transition.cause.as_str()),
                ("has_warnings", if transition.has_warnings { "1" } else { "0" }),
            ],
        );
    }

    async fn detect_loop(
        &self,
        transition: &Transition,
        context: &MessageContext<'_>,
    ) -> Result<(), TrackerError> {
        if self
            .config
            .is_exempt(&transition.previous_state, &transition.state)
        {
            return Ok(());
        }
        let after = transition
            .changed_at
            .checked_sub_signed(self.config.loop_window)
            .unwrap_or(NaiveDateTime::MIN);
        let pair = TransitionPair {
            entity_id: &transition.period_id,
            previous_state: &transition.previous_state,
            state: &transition.state,
        };
        let occurrences = self
            .store
            .count_transitions(pair, after, transition.changed_at)
            .await?;
        if occurrences < self.config.loop_threshold {
            return Ok(());
        }
        if !self
            .store
            .claim_loop_alarm(pair, after, transition.changed_at)
            .await?
        {
            debug!(
                period_id = %transition.period_id,
                occurrences = occurrences,
                "loop already reported in this window"
            );
            return Ok(());
        }

        warn!(
            period_id = %transition.period_id,
            previous_state = %transition.previous_state,
            state = %transition.state,
            occurrences = occurrences,
            "period is in a loop"
        );
        let alarm = InLoop {
            period_id: transition.period_id.clone(),
            person_id: transition.person_id.clone(),
            previous_state: transition.previous_state.clone(),
            state: transition.state.clone(),
            occurrences,
        };
        context.publish(&alarm.to_event()).await?;
        Ok(())
    }

    async fn publish_time_in_state(
        &self,
        transition: &Transition,
        outcome: TransitionOutcome,
        context: &MessageContext<'_>,
    ) -> Result<(), TrackerError> {
        let Some(prior) = outcome.prior else {
            return Ok(());
        };
        if prior.state != transition.previous_state {
            debug!(
                period_id = %transition.period_id,
                stored_state = %prior.state,
                previous_state = %transition.previous_state,
                "stored state does not match previous state; no dwell time"
            );
            return Ok(());
        }

        let elapsed_seconds = transition
            .changed_at
            .signed_duration_since(prior.changed_at)
            .num_seconds();
        info!(
            period_id = %transition.period_id,
            state = %prior.state,
            new_state = %transition.state,
            elapsed_seconds = elapsed_seconds,
            "period left state"
        );
        let event = TimeInState {
            period_id: transition.period_id.clone(),
            person_id: transition.person_id.clone(),
            employer_id: transition.employer_id.clone(),
            state: prior.state,
            new_state: transition.state.clone(),
            entered_at: prior.changed_at,
            left_at: transition.changed_at,
            elapsed_seconds,
            timeout_seconds: prior.timeout_seconds,
            reminder_count: prior.reminder_count,
        };
        context.publish(&event.to_event()).await?;
        Ok(())
    }
}

#[async_trait]
impl PacketListener for TransitionListener {
    async fn on_packet(&self, packet: Packet<'_>, context: &MessageContext<'_>) -> ListenerResult {
        self.handle(packet, context).await.map_err(Into::into)
    }

    async fn on_error(&self, problems: &Problems, _context: &MessageContext<'_>) {
        error!(
            report = %problems.to_extended_report(),
            "could not understand {PERIOD_CHANGED}"
        );
    }
}

struct ReconciliationListener {
    store: Arc<dyn StateStore>,
}

impl ReconciliationListener {
    fn snapshot(packet: &Packet<'_>) -> Result<Vec<SnapshotState>, FieldError> {
        let mut snapshot = Vec::new();
        for employer in packet.elements("employers")? {
            for list in ["periods", "discardedPeriods"] {
                for period in employer.elements(list)? {
                    snapshot.push(SnapshotState {
                        entity_id: period.text("id")?.to_owned(),
                        state: period.text("state")?.to_owned(),
                        updated: period.datetime("updated")?,
                    });
                }
            }
        }
        Ok(snapshot)
    }

    async fn handle(&self, packet: Packet<'_>) -> Result<(), TrackerError> {
        let snapshot = Self::snapshot(&packet)?;
        let changed = self.store.reconcile(&snapshot).await?;
        if changed == 0 {
            return Ok(());
        }
        info!(
            periods = snapshot.len(),
            changed = changed,
            "reconciled period states"
        );
        debug!(person_id = %packet.text("personId")?, changed = changed, "reconciled person");
        Ok(())
    }
}

#[async_trait]
impl PacketListener for ReconciliationListener {
    async fn on_packet(&self, packet: Packet<'_>, _context: &MessageContext<'_>) -> ListenerResult {
        self.handle(packet).await.map_err(Into::into)
    }
}

struct ReminderScheduledListener {
    store: Arc<dyn StateStore>,
}

impl ReminderScheduledListener {
    async fn handle(&self, packet: Packet<'_>) -> Result<(), TrackerError> {
        let period_id = packet.text("periodId")?;
        let state = packet.text("state")?;
        let timeout_seconds = if packet.boolean("isFinished")? {
            0
        } else {
            packet
                .datetime("remindAt")?
                .signed_duration_since(packet.datetime("changedAt")?)
                .num_seconds()
        };
        let updated = self
            .store
            .update_timeout(period_id, state, timeout_seconds)
            .await?;
        debug!(
            period_id = period_id,
            state = state,
            timeout_seconds = timeout_seconds,
            updated = updated,
            "reminder scheduled"
        );
        Ok(())
    }
}

#[async_trait]
impl PacketListener for ReminderScheduledListener {
    async fn on_packet(&self, packet: Packet<'_>, _context: &MessageContext<'_>) -> ListenerResult {
        self.handle(packet).await.map_err(Into::into)
    }
}

struct ReminderListener {
    store: Arc<dyn StateStore>,
}

impl ReminderListener {
    async fn handle(&self, packet: Packet<'_>) -> Result<(), TrackerError> {
        let period_id = packet.text("periodId")?;
        let state = packet.text("state")?;
        let reminder_count = packet.integer("reminderCount")?;
        let updated = self
            .store
            .update_reminder_count(period_id, state, reminder_count)
            .await?;
        debug!(
            period_id = period_id,
            state = state,
            reminder_count = reminder_count,
            updated = updated,
            "reminder sent"
        );
        Ok(())
    }
}

#[async_trait]
impl PacketListener for ReminderListener {
    async fn on_packet(&self, packet: Packet<'_>, _context: &MessageContext<'_>) -> ListenerResult {
        self.handle(packet).await.map_err(Into::into)
    }
}
