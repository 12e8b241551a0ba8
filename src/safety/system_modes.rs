// system_modes.rs

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::events::{EventEmitter, SystemEventMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemMode {
    Normal,
    Emergency,
    Incident,
    FailSafe,
}

impl std::fmt::Display for SystemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SystemMode::Normal => "NORMAL",
            SystemMode::Emergency => "EMERGENCY",
            SystemMode::Incident => "INCIDENT",
            SystemMode::FailSafe => "FAIL_SAFE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeTransition {
    pub from: SystemMode,
    pub to: SystemMode,
    pub reason: String,
    pub operator_id: Option<String>,
    pub timestamp: f64,
}

/// The system-mode state machine.
///
/// Fail-safe may be entered automatically from any mode; leaving it
/// requires an operator id, recorded on the transition. Every transition
/// is appended to a capped in-memory log and emitted on the event bus
/// (a recorder task persists the full log as `system_events`).
pub struct SystemModeManager {
    current: SystemMode,
    history: VecDeque<ModeTransition>,
    max_history: usize,
    emitter: Arc<EventEmitter>,
}

impl SystemModeManager {
    pub fn new(emitter: Arc<EventEmitter>, max_history: usize) -> Self {
        Self {
            current: SystemMode::Normal,
            history: VecDeque::new(),
            max_history,
            emitter,
        }
    }

    pub fn get_current_mode(&self) -> SystemMode {
        self.current
    }

    /// Whether `from -> to` is a legal transition for a non-operator caller.
    pub fn can_transition(from: SystemMode, to: SystemMode) -> bool {
        if from == to {
            return false;
        }
        match (from, to) {
            // Fail-safe entry is always allowed.
            (_, SystemMode::FailSafe) => true,
            (SystemMode::Normal, SystemMode::Emergency) => true,
            (SystemMode::Normal, SystemMode::Incident) => true,
            (SystemMode::Emergency, SystemMode::Normal) => true,
            (SystemMode::Incident, SystemMode::Normal) => true,
            // Leaving fail-safe goes through exit_fail_safe only.
            (SystemMode::FailSafe, _) => false,
            _ => false,
        }
    }

    pub fn transition_to(&mut self, to: SystemMode, reason: &str, now: f64) -> bool {
        if !Self::can_transition(self.current, to) {
            log::warn!(
                "Rejected mode transition {} -> {} ({})",
                self.current,
                to,
                reason
            );
            return false;
        }
        self.record(to, reason, None, now);
        true
    }

    /// Automatic or operator-triggered fail-safe entry; allowed from any
    /// mode and idempotent when already in fail-safe.
    pub fn enter_fail_safe(&mut self, reason: &str, now: f64) {
        if self.current == SystemMode::FailSafe {
            return;
        }
        self.record(SystemMode::FailSafe, reason, None, now);
    }

    /// The only way out of fail-safe. The operator id is recorded on the
    /// transition.
    pub fn exit_fail_safe(&mut self, operator_id: &str, now: f64) -> bool {
        if self.current != SystemMode::FailSafe {
            return false;
        }
        if operator_id.trim().is_empty() {
            log::warn!("Fail-safe exit rejected: missing operator id");
            return false;
        }
        self.record(
            SystemMode::Normal,
            "Fail-safe exit authorized",
            Some(operator_id.to_string()),
            now,
        );
        true
    }

    fn record(&mut self, to: SystemMode, reason: &str, operator_id: Option<String>, now: f64) {
        let transition = ModeTransition {
            from: self.current,
            to,
            reason: reason.to_string(),
            operator_id: operator_id.clone(),
            timestamp: now,
        };
        log::info!("Mode transition {} -> {}: {}", transition.from, to, reason);

        if self.history.len() == self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(transition.clone());
        self.current = to;

        self.emitter.emit(SystemEventMessage::ModeChanged {
            from: transition.from,
            to,
            reason: reason.to_string(),
            operator_id,
            timestamp: now,
        });
    }

    /// Most recent transitions, newest last.
    pub fn get_transition_history(&self, limit: usize) -> Vec<ModeTransition> {
        let start = self.history.len().saturating_sub(limit);
        self.history.iter().skip(start).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SystemModeManager {
        SystemModeManager::new(Arc::new(EventEmitter::new(64)), 1024)
    }

    #[test]
    fn legal_transitions() {
        let mut m = manager();
        assert_eq!(m.get_current_mode(), SystemMode::Normal);

        assert!(m.transition_to(SystemMode::Emergency, "corridor request", 1.0));
        assert_eq!(m.get_current_mode(), SystemMode::Emergency);

        assert!(m.transition_to(SystemMode::Normal, "corridor cleared", 2.0));
        m.enter_fail_safe("conflict sweep violation", 3.0);
        assert_eq!(m.get_current_mode(), SystemMode::FailSafe);
    }

    #[test]
    fn rejected_transitions_leave_mode_unchanged() {
        let mut m = manager();
        m.transition_to(SystemMode::Emergency, "x", 1.0);
        assert!(!m.transition_to(SystemMode::Incident, "not allowed", 2.0));
        assert_eq!(m.get_current_mode(), SystemMode::Emergency);
    }

    #[test]
    fn fail_safe_exit_requires_operator() {
        let mut m = manager();
        m.enter_fail_safe("watchdog", 1.0);
        // Plain transition out is refused.
        assert!(!m.transition_to(SystemMode::Normal, "nope", 2.0));
        assert!(!m.exit_fail_safe("", 2.5));
        assert_eq!(m.get_current_mode(), SystemMode::FailSafe);

        assert!(m.exit_fail_safe("operator-1", 3.0));
        assert_eq!(m.get_current_mode(), SystemMode::Normal);
        let history = m.get_transition_history(10);
        let last = history.last().unwrap();
        assert_eq!(last.operator_id.as_deref(), Some("operator-1"));
    }

    #[test]
    fn transition_log_is_capped() {
        let mut m = SystemModeManager::new(Arc::new(EventEmitter::new(64)), 4);
        for i in 0..10 {
            let target = if i % 2 == 0 {
                SystemMode::Emergency
            } else {
                SystemMode::Normal
            };
            m.transition_to(target, "flip", i as f64);
        }
        assert_eq!(m.get_transition_history(100).len(), 4);
    }
}
