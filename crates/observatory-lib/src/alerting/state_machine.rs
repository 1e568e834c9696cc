//! Per-target UP/DOWN alert state machine
//!
//! Hysteresis is asymmetric: `failure_threshold` consecutive failures are
//! needed to go DOWN, a single success brings the target back UP. While a
//! target is DOWN further failures are counted but never re-alert.

use std::collections::BTreeMap;
use std::path::Path;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::{Availability, ProbeOutcome};
use crate::store::{load_json, write_json_atomic};

/// Default consecutive failures before a DOWN alert fires
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 2;

/// Mutable alert record for one target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertState {
    pub state: Availability,
    pub consecutive_failures: u32,
    pub last_alerted_at: Option<i64>,
    pub last_state_change_at: Option<i64>,
}

/// Direction of an availability transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Down,
    Recovery,
}

impl AlertKind {
    /// State the target is in after this transition
    pub fn new_state(&self) -> Availability {
        match self {
            AlertKind::Down => Availability::Down,
            AlertKind::Recovery => Availability::Up,
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::Down => write!(f, "DOWN"),
            AlertKind::Recovery => write!(f, "RECOVERY"),
        }
    }
}

impl AlertState {
    /// Apply one probe result. Returns the transition, if one occurred.
    ///
    /// Never fails; the caller is expected to invoke it exactly once per tick.
    pub fn apply(
        &mut self,
        success: bool,
        timestamp: i64,
        failure_threshold: u32,
    ) -> Option<AlertKind> {
        if success {
            self.consecutive_failures = 0;
            match self.state {
                Availability::Down => {
                    self.state = Availability::Up;
                    self.last_state_change_at = Some(timestamp);
                    self.last_alerted_at = Some(timestamp);
                    Some(AlertKind::Recovery)
                }
                Availability::Up => None,
            }
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            match self.state {
                Availability::Up if self.consecutive_failures >= failure_threshold => {
                    self.state = Availability::Down;
                    self.last_state_change_at = Some(timestamp);
                    self.last_alerted_at = Some(timestamp);
                    Some(AlertKind::Down)
                }
                // Below threshold, or already DOWN (no re-alert)
                _ => None,
            }
        }
    }
}

/// Probe detail attached to an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeDetail {
    fn from_outcome(outcome: &ProbeOutcome) -> Self {
        Self {
            status_code: outcome.status_code(),
            error: outcome.error().map(str::to_string),
        }
    }
}

/// Emitted once per UP/DOWN transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub target: String,
    pub kind: AlertKind,
    pub timestamp: i64,
    /// Failure streak that caused a DOWN transition, 0 on recovery
    pub consecutive_failures: u32,
    /// When the target went DOWN, for recovery events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_since: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<ProbeDetail>,
}

/// Owns the current alert state of every target
pub struct AlertStateMachine {
    states: DashMap<String, AlertState>,
    failure_threshold: u32,
}

impl Default for AlertStateMachine {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl AlertStateMachine {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            states: DashMap::new(),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Seed the machine with previously persisted states
    pub fn with_states(mut self, states: BTreeMap<String, AlertState>) -> Self {
        self.states = states.into_iter().collect();
        self
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Feed one probe outcome for `target` and return the alert to send, if any.
    ///
    /// Unseen targets start UP with no failures.
    pub fn observe(
        &self,
        target: &str,
        outcome: &ProbeOutcome,
        timestamp: i64,
    ) -> Option<AlertEvent> {
        let mut state = self.states.entry(target.to_string()).or_default();
        let down_since = state.last_state_change_at;
        let kind = state.apply(outcome.is_success(), timestamp, self.failure_threshold)?;

        Some(AlertEvent {
            target: target.to_string(),
            kind,
            timestamp,
            consecutive_failures: state.consecutive_failures,
            down_since: match kind {
                AlertKind::Recovery => down_since,
                AlertKind::Down => None,
            },
            detail: Some(ProbeDetail::from_outcome(outcome)),
        })
    }

    /// Current state for one target
    pub fn get(&self, target: &str) -> Option<AlertState> {
        self.states.get(target).map(|s| s.clone())
    }

    /// Point-in-time copy of every target's state
    pub fn snapshot(&self) -> BTreeMap<String, AlertState> {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Number of targets currently DOWN
    pub fn down_count(&self) -> usize {
        self.states
            .iter()
            .filter(|entry| entry.value().state == Availability::Down)
            .count()
    }

    /// Persist all states atomically
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_json_atomic(path, &self.snapshot())
    }

    /// Load persisted states, or an empty map on first start
    pub fn load_states(path: &Path) -> Result<BTreeMap<String, AlertState>, StoreError> {
        Ok(load_json(path)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ok() -> ProbeOutcome {
        ProbeOutcome::Completed {
            healthy: true,
            status_code: 200,
            response_time_ms: 42.0,
        }
    }

    fn fail() -> ProbeOutcome {
        ProbeOutcome::Failed {
            error: "connection refused".to_string(),
        }
    }

    #[test]
    fn test_initial_state_is_up() {
        let machine = AlertStateMachine::default();
        assert!(machine.get("blog").is_none());

        assert!(machine.observe("blog", &ok(), 100).is_none());
        let state = machine.get("blog").unwrap();
        assert_eq!(state.state, Availability::Up);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_alerted_at, None);
    }

    #[test]
    fn test_single_failure_stays_up() {
        let machine = AlertStateMachine::new(2);
        assert!(machine.observe("blog", &fail(), 100).is_none());

        let state = machine.get("blog").unwrap();
        assert_eq!(state.state, Availability::Up);
        assert_eq!(state.consecutive_failures, 1);
    }

    #[test]
    fn test_threshold_failures_flip_down_once() {
        let machine = AlertStateMachine::new(2);
        let mut events = Vec::new();
        for ts in [100, 400, 700] {
            events.extend(machine.observe("blog", &fail(), ts));
        }

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind, AlertKind::Down);
        assert_eq!(event.timestamp, 400);
        assert_eq!(event.consecutive_failures, 2);
        assert_eq!(event.detail.as_ref().unwrap().error.as_deref(), Some("connection refused"));

        let state = machine.get("blog").unwrap();
        assert_eq!(state.state, Availability::Down);
        assert_eq!(state.consecutive_failures, 3);
        assert_eq!(state.last_state_change_at, Some(400));
        assert_eq!(state.last_alerted_at, Some(400));
    }

    #[test]
    fn test_single_success_recovers() {
        let machine = AlertStateMachine::new(2);
        machine.observe("blog", &fail(), 100);
        machine.observe("blog", &fail(), 200);
        machine.observe("blog", &fail(), 300);

        let event = machine.observe("blog", &ok(), 900).unwrap();
        assert_eq!(event.kind, AlertKind::Recovery);
        assert_eq!(event.down_since, Some(200));
        assert_eq!(event.consecutive_failures, 0);

        let state = machine.get("blog").unwrap();
        assert_eq!(state.state, Availability::Up);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_state_change_at, Some(900));
        assert_eq!(state.last_alerted_at, Some(900));

        assert!(machine.observe("blog", &ok(), 1200).is_none());
    }

    #[test]
    fn test_success_before_threshold_resets_counter() {
        let machine = AlertStateMachine::new(3);
        machine.observe("blog", &fail(), 100);
        machine.observe("blog", &fail(), 200);
        machine.observe("blog", &ok(), 300);
        machine.observe("blog", &fail(), 400);
        machine.observe("blog", &fail(), 500);

        let state = machine.get("blog").unwrap();
        assert_eq!(state.state, Availability::Up);
        assert_eq!(state.consecutive_failures, 2);
    }

    #[test]
    fn test_unhealthy_status_counts_as_failure() {
        let machine = AlertStateMachine::new(1);
        let outcome = ProbeOutcome::Completed {
            healthy: false,
            status_code: 502,
            response_time_ms: 3.0,
        };

        let event = machine.observe("blog", &outcome, 100).unwrap();
        assert_eq!(event.kind, AlertKind::Down);
        assert_eq!(event.detail.unwrap().status_code, Some(502));
    }

    #[test]
    fn test_flapping_emits_one_alert_per_transition() {
        let machine = AlertStateMachine::new(2);
        let sequence = [false, false, true, false, false, false, true, true];

        let kinds: Vec<AlertKind> = sequence
            .iter()
            .enumerate()
            .filter_map(|(i, &success)| {
                let outcome = if success { ok() } else { fail() };
                machine.observe("blog", &outcome, i as i64 * 300)
            })
            .map(|e| e.kind)
            .collect();

        assert_eq!(
            kinds,
            vec![AlertKind::Down, AlertKind::Recovery, AlertKind::Down, AlertKind::Recovery]
        );
    }

    #[test]
    fn test_replay_is_deterministic() {
        let sequence = [true, false, false, false, true, false, true, false, false];

        let run = || {
            let machine = AlertStateMachine::new(2);
            let events: Vec<AlertEvent> = sequence
                .iter()
                .enumerate()
                .filter_map(|(i, &success)| {
                    let outcome = if success { ok() } else { fail() };
                    machine.observe("blog", &outcome, 1_000 + i as i64 * 300)
                })
                .collect();
            (machine.get("blog").unwrap(), events)
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn test_targets_are_independent() {
        let machine = AlertStateMachine::new(1);
        machine.observe("blog", &fail(), 100);
        machine.observe("drop", &ok(), 100);

        assert_eq!(machine.get("blog").unwrap().state, Availability::Down);
        assert_eq!(machine.get("drop").unwrap().state, Availability::Up);
        assert_eq!(machine.down_count(), 1);
    }

    #[test]
    fn test_states_persist_across_restart() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("alert_state.json");

        let machine = AlertStateMachine::new(2);
        machine.observe("blog", &fail(), 100);
        machine.observe("blog", &fail(), 200);
        machine.save(&path).unwrap();

        let restored =
            AlertStateMachine::new(2).with_states(AlertStateMachine::load_states(&path).unwrap());
        assert_eq!(restored.get("blog").unwrap().state, Availability::Down);

        // Still DOWN after restart, so another failure does not re-alert
        assert!(restored.observe("blog", &fail(), 300).is_none());
        let recovery = restored.observe("blog", &ok(), 400).unwrap();
        assert_eq!(recovery.down_since, Some(200));
    }

    #[test]
    fn test_load_states_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let states = AlertStateMachine::load_states(&temp_dir.path().join("none.json")).unwrap();
        assert!(states.is_empty());
    }
}
