// action.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::agent::decision::{AgentDecisions, SignalAction, SignalDecision};
use crate::control_system::signal_actuator::SignalActuator;
use crate::events::{EventEmitter, EventSeverity};
use crate::models::junction::SignalColor;
use crate::safety::conflict_validator::ChangeOrigin;
use crate::safety::SafetyKernel;

#[derive(Debug, Clone, Copy, Default)]
pub struct ActionOutcome {
    pub admitted: usize,
    pub rejected: usize,
    pub held: usize,
}

/// Executes agent decisions: admission through the safety kernel, then
/// the actuator, then a `signal:change` event. HOLD is a no-op and never
/// produces an event. Active force-signal overrides beat agent decisions
/// for the same (junction, direction).
pub struct ActionModule {
    kernel: Arc<SafetyKernel>,
    emitter: Arc<EventEmitter>,
    actions_executed: AtomicU64,
    actions_rejected: AtomicU64,
}

impl ActionModule {
    pub fn new(kernel: Arc<SafetyKernel>, emitter: Arc<EventEmitter>) -> Self {
        Self {
            kernel,
            emitter,
            actions_executed: AtomicU64::new(0),
            actions_rejected: AtomicU64::new(0),
        }
    }

    pub fn execute(&self, decisions: &AgentDecisions, now: f64) -> ActionOutcome {
        let mut outcome = ActionOutcome::default();

        // The emergency subsystem owns the signals.
        if decisions.emergency_override {
            return outcome;
        }

        for decision in &decisions.decisions {
            match decision.action {
                SignalAction::Hold => outcome.held += 1,
                _ => {
                    if self.execute_one(decision, now) {
                        outcome.admitted += 1;
                    } else {
                        outcome.rejected += 1;
                    }
                }
            }
        }
        outcome
    }

    fn execute_one(&self, decision: &SignalDecision, now: f64) -> bool {
        // Override precedence: an operator's forced signal wins.
        if self
            .kernel
            .forced_signal_active(&decision.junction_id, decision.direction, now)
        {
            log::debug!(
                "Skipping agent decision on {} {}: manual override active",
                decision.junction_id,
                decision.direction
            );
            self.actions_rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let color = match decision.action {
            SignalAction::Green => SignalColor::Green,
            SignalAction::Red => SignalColor::Red,
            SignalAction::Hold => return false,
        };

        let (admitted, reason) = self.kernel.validate_signal_change(
            &decision.junction_id,
            decision.direction,
            color,
            now,
            ChangeOrigin::Agent,
        );
        if !admitted {
            log::debug!(
                "Decision rejected on {} {}: {}",
                decision.junction_id,
                decision.direction,
                reason
            );
            self.actions_rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let previous = self
            .kernel
            .actuator()
            .signals(&decision.junction_id)
            .map(|s| s.get(decision.direction).current)
            .unwrap_or(SignalColor::Red);

        // One retry on actuator failure; persistent failure is left for
        // the watchdog to observe via the actuator ack.
        let mut applied = self.kernel.actuator().set_signal(
            &decision.junction_id,
            decision.direction,
            color,
            decision.duration,
            now,
        );
        if applied.is_err() {
            applied = self.kernel.actuator().set_signal(
                &decision.junction_id,
                decision.direction,
                color,
                decision.duration,
                now,
            );
        }
        if let Err(e) = applied {
            log::error!(
                "Actuator failure on {} {}: {}",
                decision.junction_id,
                decision.direction,
                e
            );
            self.emitter.emit_system_event(
                "ACTUATOR_FAILURE",
                EventSeverity::Error,
                format!("{} {}: {}", decision.junction_id, decision.direction, e),
                now,
            );
            self.actions_rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.emitter.emit_signal_change(
            &decision.junction_id,
            decision.direction,
            color,
            previous,
            decision.duration,
            now,
        );
        self.actions_executed.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn actions_executed(&self) -> u64 {
        self.actions_executed.load(Ordering::Relaxed)
    }

    pub fn actions_rejected(&self) -> u64 {
        self.actions_rejected.load(Ordering::Relaxed)
    }
}
