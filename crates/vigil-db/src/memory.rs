//! In-process [`StateStore`] with the same conditional-write semantics as
//! the `PostgreSQL` store. Used by tests and local runs.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::Mutex;

use crate::error::DbError;
use crate::store::{
    EntityStateRecord, PriorState, SnapshotState, StateChange, StateStore, TransitionOutcome,
    TransitionPair,
};

#[derive(Debug, Clone)]
struct HistoryRow {
    entity_id: String,
    changed_at: NaiveDateTime,
    previous_state: String,
    state: String,
}

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<String, EntityStateRecord>,
    history: BTreeMap<(String, NaiveDateTime), HistoryRow>,
    loop_alarms: HashMap<(String, String, String), NaiveDateTime>,
}

/// A [`StateStore`] held in memory.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    tables: Mutex<Tables>,
}

impl MemoryStateStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of history rows kept for `entity_id`.
    pub async fn history_len(&self, entity_id: &str) -> usize {
        self.tables
            .lock()
            .await
            .history
            .values()
            .filter(|row| row.entity_id == entity_id)
            .count()
    }

    /// Every distinct state currently stored.
    pub async fn states(&self) -> BTreeSet<String> {
        self.tables
            .lock()
            .await
            .records
            .values()
            .map(|record| record.state.clone())
            .collect()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn record_transition(&self, change: &StateChange) -> Result<TransitionOutcome, DbError> {
        let mut tables = self.tables.lock().await;

        tables
            .history
            .entry((change.entity_id.clone(), change.changed_at))
            .or_insert_with(|| HistoryRow {
                entity_id: change.entity_id.clone(),
                changed_at: change.changed_at,
                previous_state: change.previous_state.clone(),
                state: change.state.clone(),
            });

        let prior = tables.records.get(&change.entity_id).map(|record| PriorState {
            state: record.state.clone(),
            changed_at: record.changed_at,
            timeout_seconds: record.timeout_seconds,
            reminder_count: record.reminder_count,
        });
        let applied = prior
            .as_ref()
            .is_none_or(|prior| prior.changed_at < change.changed_at);
        if applied {
            tables.records.insert(
                change.entity_id.clone(),
                EntityStateRecord {
                    entity_id: change.entity_id.clone(),
                    state: change.state.clone(),
                    changed_at: change.changed_at,
                    deadline: change.deadline,
                    timeout_seconds: 0,
                    reminder_count: 0,
                },
            );
        }
        Ok(TransitionOutcome { applied, prior })
    }

    async fn reconcile(&self, snapshot: &[SnapshotState]) -> Result<u64, DbError> {
        let mut tables = self.tables.lock().await;
        let mut changed = 0_u64;
        for entry in snapshot {
            let newer = tables.records.get(&entry.entity_id).is_none_or(|record| {
                record.changed_at < entry.updated && record.state != entry.state
            });
            if newer {
                tables.records.insert(
                    entry.entity_id.clone(),
                    EntityStateRecord {
                        entity_id: entry.entity_id.clone(),
                        state: entry.state.clone(),
                        changed_at: entry.updated,
                        deadline: None,
                        timeout_seconds: 0,
                        reminder_count: 0,
                    },
                );
                changed = changed.saturating_add(1);
            }
        }
        Ok(changed)
    }

    async fn count_transitions(
        &self,
        pair: TransitionPair<'_>,
        after: NaiveDateTime,
        up_to: NaiveDateTime,
    ) -> Result<u64, DbError> {
        let tables = self.tables.lock().await;
        let count = tables
            .history
            .values()
            .filter(|row| {
                row.entity_id == pair.entity_id
                    && row.previous_state == pair.previous_state
                    && row.state == pair.state
                    && row.changed_at > after
                    && row.changed_at <= up_to
            })
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn claim_loop_alarm(
        &self,
        pair: TransitionPair<'_>,
        after: NaiveDateTime,
        at: NaiveDateTime,
    ) -> Result<bool, DbError> {
        let mut tables = self.tables.lock().await;
        let key = (
            pair.entity_id.to_owned(),
            pair.previous_state.to_owned(),
            pair.state.to_owned(),
        );
        let claimed = tables.loop_alarms.get(&key).is_none_or(|last| *last <= after);
        if claimed {
            tables.loop_alarms.insert(key, at);
        }
        Ok(claimed)
    }

    async fn update_timeout(
        &self,
        entity_id: &str,
        state: &str,
        timeout_seconds: i64,
    ) -> Result<bool, DbError> {
        let mut tables = self.tables.lock().await;
        match tables.records.get_mut(entity_id) {
            Some(record) if record.state == state => {
                record.timeout_seconds = timeout_seconds;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_reminder_count(
        &self,
        entity_id: &str,
        state: &str,
        reminder_count: i64,
    ) -> Result<bool, DbError> {
        let mut tables = self.tables.lock().await;
        match tables.records.get_mut(entity_id) {
            Some(record) if record.state == state => {
                record.reminder_count = reminder_count;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_by_state(&self) -> Result<BTreeMap<String, u64>, DbError> {
        let tables = self.tables.lock().await;
        let mut counts = BTreeMap::new();
        for record in tables.records.values() {
            let count: &mut u64 = counts.entry(record.state.clone()).or_default();
            *count = count.saturating_add(1);
        }
        Ok(counts)
    }

    async fn find(&self, entity_id: &str) -> Result<Option<EntityStateRecord>, DbError> {
        Ok(self.tables.lock().await.records.get(entity_id).cloned())
    }
}
