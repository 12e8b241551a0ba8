// manual_override.rs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::junction::{Direction, JunctionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideKind {
    ForceSignal,
    DisableAgent,
    EnableAgent,
    EmergencyStop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalTarget {
    pub junction_id: JunctionId,
    pub direction: Direction,
}

/// An operator-issued directive. Overrides are append-only; cancelling
/// records `cancelled_at` rather than deleting the entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Override {
    pub id: String,
    pub kind: OverrideKind,
    pub target: Option<SignalTarget>,
    /// Seconds of validity; None means until cancelled.
    pub duration: Option<f64>,
    pub operator_id: String,
    pub reason: String,
    pub created_at: f64,
    pub cancelled_at: Option<f64>,
}

impl Override {
    pub fn is_active(&self, now: f64) -> bool {
        if self.cancelled_at.is_some() {
            return false;
        }
        match self.duration {
            Some(duration) => self.created_at + duration > now,
            None => true,
        }
    }
}

/// Registry of operator overrides with an `active` view. Admission order
/// for a final signal action per (junction, direction) is
/// emergency stop > forced signal > agent decision.
pub struct ManualOverrideManager {
    overrides: Vec<Override>,
}

impl ManualOverrideManager {
    pub fn new() -> Self {
        Self {
            overrides: Vec::new(),
        }
    }

    fn push(&mut self, mut record: Override) -> String {
        record.id = format!("OVR-{}", Uuid::new_v4().simple());
        let id = record.id.clone();
        log::info!(
            "Override {} created by {}: {:?} ({})",
            id,
            record.operator_id,
            record.kind,
            record.reason
        );
        self.overrides.push(record);
        id
    }

    pub fn force_signal_state(
        &mut self,
        junction_id: &str,
        direction: Direction,
        duration: f64,
        operator_id: &str,
        reason: &str,
        now: f64,
    ) -> String {
        self.push(Override {
            id: String::new(),
            kind: OverrideKind::ForceSignal,
            target: Some(SignalTarget {
                junction_id: junction_id.to_string(),
                direction,
            }),
            duration: Some(duration),
            operator_id: operator_id.to_string(),
            reason: reason.to_string(),
            created_at: now,
            cancelled_at: None,
        })
    }

    pub fn disable_autonomous_agent(
        &mut self,
        operator_id: &str,
        reason: &str,
        now: f64,
    ) -> String {
        self.push(Override {
            id: String::new(),
            kind: OverrideKind::DisableAgent,
            target: None,
            duration: None,
            operator_id: operator_id.to_string(),
            reason: reason.to_string(),
            created_at: now,
            cancelled_at: None,
        })
    }

    /// Cancels any active DISABLE_AGENT override and records the enable
    /// for the audit trail. Returns false when the agent was not disabled.
    pub fn enable_autonomous_agent(&mut self, operator_id: &str, now: f64) -> bool {
        let mut found = false;
        for record in self.overrides.iter_mut() {
            if record.kind == OverrideKind::DisableAgent && record.is_active(now) {
                record.cancelled_at = Some(now);
                found = true;
            }
        }
        if found {
            self.push(Override {
                id: String::new(),
                kind: OverrideKind::EnableAgent,
                target: None,
                duration: None,
                operator_id: operator_id.to_string(),
                reason: "Agent re-enabled".to_string(),
                created_at: now,
                cancelled_at: Some(now),
            });
        }
        found
    }

    pub fn emergency_stop(&mut self, operator_id: &str, reason: &str, now: f64) -> String {
        self.push(Override {
            id: String::new(),
            kind: OverrideKind::EmergencyStop,
            target: None,
            duration: None,
            operator_id: operator_id.to_string(),
            reason: reason.to_string(),
            created_at: now,
            cancelled_at: None,
        })
    }

    pub fn cancel_override(&mut self, override_id: &str, operator_id: &str, now: f64) -> bool {
        for record in self.overrides.iter_mut() {
            if record.id == override_id && record.cancelled_at.is_none() {
                record.cancelled_at = Some(now);
                log::info!("Override {} cancelled by {}", override_id, operator_id);
                return true;
            }
        }
        false
    }

    pub fn get_active_overrides(&self, now: f64) -> Vec<Override> {
        self.overrides
            .iter()
            .filter(|o| o.is_active(now))
            .cloned()
            .collect()
    }

    /// Audit trail, newest last.
    pub fn get_override_history(&self, limit: usize) -> Vec<Override> {
        let start = self.overrides.len().saturating_sub(limit);
        self.overrides[start..].to_vec()
    }

    /// The active forced signal for a (junction, direction), if any.
    /// The newest matching override wins.
    pub fn active_force_signal(
        &self,
        junction_id: &str,
        direction: Direction,
        now: f64,
    ) -> Option<&Override> {
        self.overrides.iter().rev().find(|o| {
            o.kind == OverrideKind::ForceSignal
                && o.is_active(now)
                && o.target.as_ref().map_or(false, |t| {
                    t.junction_id == junction_id && t.direction == direction
                })
        })
    }

    pub fn emergency_stop_active(&self, now: f64) -> bool {
        self.overrides
            .iter()
            .any(|o| o.kind == OverrideKind::EmergencyStop && o.is_active(now))
    }

    /// False while a DISABLE_AGENT override is active.
    pub fn is_agent_enabled(&self, now: f64) -> bool {
        !self
            .overrides
            .iter()
            .any(|o| o.kind == OverrideKind::DisableAgent && o.is_active(now))
    }
}

impl Default for ManualOverrideManager {
    fn default() -> Self {
        Self::new()
    }
}
