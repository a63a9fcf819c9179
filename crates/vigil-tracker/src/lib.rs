//! Idempotent state-transition tracking for claim periods.
//!
//! The tracker turns an at-least-once, possibly reordered stream of
//! `claim_period_changed` events into a current-state table, and derives
//! two things from it: dwell-time events when a period leaves a state, and
//! loop alarms when a period keeps repeating the same transition.
//!
//! # Rivers
//!
//! ```text
//! claim_period_changed --> upsert --> loop detection --> claim_period_in_loop
//!                                 \-> dwell time     --> claim_period_time_in_state
//! person_reconciled    --> snapshot upsert
//! reminder_scheduled   --> expected time in state
//! reminder             --> reminder counter
//!
//! claim_period_time_in_state --> DwellTimeMonitor --> histogram + alert
//! reminder                    --> ReminderMonitor  --> alert when stuck
//! any @event_name             --> EventMonitor     --> events_total
//! ```
//!
//! # Modules
//!
//! - [`tracker`] -- the tracker rivers and their rules
//! - [`monitors`] -- dwell-time, reminder and event monitors
//! - [`metrics`] -- metric names and the cached per-state gauge
//! - [`events`] -- event names and outbound event builders
//! - [`config`] -- thresholds, windows and loop exemptions
//! - [`error`] -- tracker error type

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod monitors;
pub mod tracker;

pub use config::{LoopExemption, TrackerConfig};
pub use error::TrackerError;
pub use monitors::{DwellTimeMonitor, EventMonitor, ReminderMonitor, human_duration};
pub use tracker::StateTracker;
