//! Tracker settings.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::TimeDelta;

/// Default number of identical transitions inside the window that raises a
/// loop alarm.
pub const DEFAULT_LOOP_THRESHOLD: u64 = 10;

/// Default loop look-back window, in minutes.
pub const DEFAULT_LOOP_WINDOW_MINUTES: i64 = 60;

/// Default minimum time between two refreshes of the per-state gauge.
pub const DEFAULT_GAUGE_REFRESH: Duration = Duration::from_secs(30);

/// States reported by the per-state gauge even when no period is in them.
pub const KNOWN_STATES: &[&str] = &[
    "START",
    "AWAITING_HISTORY",
    "AWAITING_INCOME_REPORT",
    "AWAITING_BLOCKING_PERIOD",
    "AWAITING_VALIDATION",
    "AWAITING_SIMULATION",
    "AWAITING_APPROVAL",
    "AWAITING_REVISION",
    "AWAITING_HISTORY_REVISION",
    "AWAITING_VALIDATION_REVISION",
    "AWAITING_SIMULATION_REVISION",
    "AWAITING_APPROVAL_REVISION",
    "AWAITING_ANNULMENT",
    "TO_PAYMENT",
    "TO_ANNULMENT",
    "TO_LEGACY_SYSTEM",
    "CLOSED",
    "CLOSED_WITHOUT_PAYMENT",
    "PAYMENT_FAILED",
    "REVISION_FAILED",
];

/// A pair of states whose back-and-forth is expected and never alarmed.
///
/// Matches `from -> to` and `to -> from` for every state in `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopExemption {
    /// States on one side of the exempted pair.
    pub from: BTreeSet<String>,
    /// State on the other side.
    pub to: String,
}

impl LoopExemption {
    /// Exempt transitions between any of `from` and `to`, in both directions.
    pub fn new(from: &[&str], to: &str) -> Self {
        Self {
            from: from.iter().map(|s| (*s).to_owned()).collect(),
            to: to.to_owned(),
        }
    }

    /// Whether the transition `previous -> state` is exempt.
    pub fn matches(&self, previous: &str, state: &str) -> bool {
        (self.from.contains(previous) && self.to == state)
            || (self.from.contains(state) && self.to == previous)
    }
}

/// Exemptions applied when none are configured: periods legitimately go
/// back to fetching history from approval and simulation.
pub fn default_exemptions() -> Vec<LoopExemption> {
    vec![
        LoopExemption::new(&["AWAITING_APPROVAL", "AWAITING_SIMULATION"], "AWAITING_HISTORY"),
        LoopExemption::new(
            &["AWAITING_APPROVAL_REVISION", "AWAITING_SIMULATION_REVISION"],
            "AWAITING_HISTORY_REVISION",
        ),
    ]
}

/// Settings for [`StateTracker`](crate::StateTracker).
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Count of identical transitions in the window that raises an alarm.
    pub loop_threshold: u64,
    /// Trailing window, measured back from the event instant.
    pub loop_window: TimeDelta,
    /// Transitions never counted as loops.
    pub exemptions: Vec<LoopExemption>,
    /// Minimum time between gauge refreshes.
    pub gauge_refresh: Duration,
    /// States always present in the gauge.
    pub known_states: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            loop_threshold: DEFAULT_LOOP_THRESHOLD,
            loop_window: TimeDelta::minutes(DEFAULT_LOOP_WINDOW_MINUTES),
            exemptions: default_exemptions(),
            gauge_refresh: DEFAULT_GAUGE_REFRESH,
            known_states: KNOWN_STATES.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

impl TrackerConfig {
    /// Whether `previous -> state` is covered by an exemption.
    pub fn is_exempt(&self, previous: &str, state: &str) -> bool {
        self.exemptions.iter().any(|e| e.matches(previous, state))
    }
}
