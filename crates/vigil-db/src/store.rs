//! The state store interface and its value types.
//!
//! Every write is a single conditional statement keyed on the entity id, so
//! several consumers in one group converge on the same table regardless of
//! delivery order. The stored instant of an entity never moves backwards.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Timelike};

use crate::error::DbError;

/// One observed state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// Entity that changed state.
    pub entity_id: String,
    /// State the producer says the entity left.
    pub previous_state: String,
    /// State the entity entered.
    pub state: String,
    /// When the entity entered `state`.
    pub changed_at: NaiveDateTime,
    /// Deadline attached to the new state, if any.
    pub deadline: Option<NaiveDateTime>,
}

/// The stored record of an entity as it was before a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorState {
    /// Stored state.
    pub state: String,
    /// When the stored state was entered.
    pub changed_at: NaiveDateTime,
    /// Expected time in state, in seconds. Zero when unknown.
    pub timeout_seconds: i64,
    /// Reminders sent while in the stored state.
    pub reminder_count: i64,
}

/// Result of [`StateStore::record_transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// Whether the change replaced the stored record. `false` means the
    /// change was stale (its instant is not later than the stored one).
    pub applied: bool,
    /// The record as it was before the write, if one existed.
    pub prior: Option<PriorState>,
}

/// Current state of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityStateRecord {
    /// Entity id.
    pub entity_id: String,
    /// Current state.
    pub state: String,
    /// When the current state was entered.
    pub changed_at: NaiveDateTime,
    /// Deadline attached to the current state.
    pub deadline: Option<NaiveDateTime>,
    /// Expected time in state, in seconds.
    pub timeout_seconds: i64,
    /// Reminders sent while in the current state.
    pub reminder_count: i64,
}

/// One entity as seen by a full reconciliation snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotState {
    /// Entity id.
    pub entity_id: String,
    /// State according to the snapshot.
    pub state: String,
    /// When the snapshot says the state was entered.
    pub updated: NaiveDateTime,
}

/// A directed transition counted by loop detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPair<'a> {
    /// Entity id.
    pub entity_id: &'a str,
    /// State left.
    pub previous_state: &'a str,
    /// State entered.
    pub state: &'a str,
}

/// Durable entity state and transition history.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Apply a state change if it is newer than the stored record, append it
    /// to the history, and return the prior record. All in one statement.
    async fn record_transition(&self, change: &StateChange) -> Result<TransitionOutcome, DbError>;

    /// Apply snapshot states that are newer than, and different from, the
    /// stored records. Returns the number of records changed.
    async fn reconcile(&self, snapshot: &[SnapshotState]) -> Result<u64, DbError>;

    /// Count history rows for `pair` with an instant in `(after, up_to]`.
    async fn count_transitions(
        &self,
        pair: TransitionPair<'_>,
        after: NaiveDateTime,
        up_to: NaiveDateTime,
    ) -> Result<u64, DbError>;

    /// Claim the loop alarm for `pair` at instant `at`. The claim succeeds,
    /// and moves to `at`, unless an earlier claim for the pair is later than
    /// `after`. One alarm per pair per window.
    async fn claim_loop_alarm(
        &self,
        pair: TransitionPair<'_>,
        after: NaiveDateTime,
        at: NaiveDateTime,
    ) -> Result<bool, DbError>;

    /// Set the expected time in state if the entity is still in `state`.
    /// Returns whether a record was updated.
    async fn update_timeout(
        &self,
        entity_id: &str,
        state: &str,
        timeout_seconds: i64,
    ) -> Result<bool, DbError>;

    /// Set the reminder counter if the entity is still in `state`. Returns
    /// whether a record was updated.
    async fn update_reminder_count(
        &self,
        entity_id: &str,
        state: &str,
        reminder_count: i64,
    ) -> Result<bool, DbError>;

    /// Number of entities per current state.
    async fn count_by_state(&self) -> Result<BTreeMap<String, u64>, DbError>;

    /// Current record of one entity.
    async fn find(&self, entity_id: &str) -> Result<Option<EntityStateRecord>, DbError>;
}

/// Split an instant into whole seconds and the nanosecond remainder, the
/// way instants are persisted.
pub fn split_instant(instant: NaiveDateTime) -> (NaiveDateTime, i32) {
    let nanos = instant.nanosecond();
    let seconds = instant.with_nanosecond(0).unwrap_or(instant);
    (seconds, i32::try_from(nanos).unwrap_or(i32::MAX))
}

/// Inverse of [`split_instant`].
pub fn join_instant(seconds: NaiveDateTime, nanos: i32) -> Option<NaiveDateTime> {
    seconds.with_nanosecond(u32::try_from(nanos).ok()?)
}
