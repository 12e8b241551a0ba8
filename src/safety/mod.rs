//! Safety kernel: conflict validation, system modes, manual overrides,
//! emergency corridors, and the watchdog.
//!
//! The kernel is the composition root of the safety subsystem. Every
//! signal change in the system is admitted through it; the watchdog and
//! the agent hold handles to the kernel, while the kernel itself only
//! holds capability interfaces (the actuator and the event emitter),
//! never the concrete agent.

pub mod conflict_validator;
pub mod manual_override;
pub mod system_modes;
pub mod watchdog;

use std::sync::{Arc, Mutex};

use crate::config::{FailSafePattern, SafetyConfig};
use crate::control_system::signal_actuator::SignalActuator;
use crate::events::{EventEmitter, EventSeverity, SystemEventMessage};
use crate::models::junction::{Direction, SignalColor};

use conflict_validator::{ChangeOrigin, ConflictValidator};
use manual_override::{ManualOverrideManager, Override};
use system_modes::{ModeTransition, SystemMode, SystemModeManager};

/// Tracks the currently active emergency corridor, if any.
#[derive(Debug, Default)]
struct EmergencyTracker {
    active_corridor: Option<String>,
    /// Timestamp of the last moment a corridor was active.
    last_active: f64,
}

pub struct SafetyKernel {
    validator: ConflictValidator,
    modes: Mutex<SystemModeManager>,
    overrides: Mutex<ManualOverrideManager>,
    emergency: Mutex<EmergencyTracker>,
    actuator: Arc<dyn SignalActuator>,
    emitter: Arc<EventEmitter>,
    fail_safe_pattern: FailSafePattern,
    emergency_idle_revert: f64,
}

impl SafetyKernel {
    /// Builds the kernel and runs the validator self-check. A validator
    /// that contradicts itself is an unrecoverable startup failure; the
    /// caller must halt the process with a distinct exit code.
    pub fn new(
        config: &SafetyConfig,
        actuator: Arc<dyn SignalActuator>,
        emitter: Arc<EventEmitter>,
        now: f64,
    ) -> Result<Self, String> {
        let validator = ConflictValidator::new(config);
        if !validator.self_check(now) {
            return Err("conflict validator failed self-check".to_string());
        }
        Ok(Self {
            validator,
            modes: Mutex::new(SystemModeManager::new(
                emitter.clone(),
                config.transition_log_size,
            )),
            overrides: Mutex::new(ManualOverrideManager::new()),
            emergency: Mutex::new(EmergencyTracker::default()),
            actuator,
            emitter,
            fail_safe_pattern: config.fail_safe_pattern,
            emergency_idle_revert: config.emergency_idle_revert_s,
        })
    }

    pub fn validator(&self) -> &ConflictValidator {
        &self.validator
    }

    pub fn actuator(&self) -> &Arc<dyn SignalActuator> {
        &self.actuator
    }

    pub fn fail_safe_pattern(&self) -> FailSafePattern {
        self.fail_safe_pattern
    }

    // === Admission ===

    /// Validates a proposed change against the junction's live signal
    /// state. In fail-safe, new agent decisions are refused outright;
    /// operator changes still validate normally.
    pub fn validate_signal_change(
        &self,
        junction_id: &str,
        direction: Direction,
        color: SignalColor,
        now: f64,
        origin: ChangeOrigin,
    ) -> (bool, String) {
        if origin == ChangeOrigin::Agent && self.current_mode() == SystemMode::FailSafe {
            return (false, "Fail-safe active: agent decisions refused".to_string());
        }
        let signals = match self.actuator.signals(junction_id) {
            Some(signals) => signals,
            None => return (false, format!("Unknown junction: {}", junction_id)),
        };
        self.validator
            .validate_signal_change(junction_id, direction, color, &signals, now, origin)
    }

    /// Audits every junction; returns hard violations only.
    pub fn sweep_conflicts(&self, now: f64) -> Vec<String> {
        let mut violations = Vec::new();
        for junction_id in self.actuator.junction_ids() {
            if let Some(signals) = self.actuator.signals(&junction_id) {
                let (valid, issues) =
                    self.validator.validate_full_junction(&junction_id, &signals, now);
                if !valid {
                    violations.extend(issues.into_iter().filter(|i| !i.starts_with("WARNING:")));
                }
            }
        }
        violations
    }

    // === Modes ===

    pub fn current_mode(&self) -> SystemMode {
        self.modes.lock().unwrap_or_else(|e| e.into_inner()).get_current_mode()
    }

    pub fn change_mode(&self, to: SystemMode, reason: &str, now: f64) -> bool {
        if to == SystemMode::FailSafe {
            self.enter_fail_safe(reason, now);
            return true;
        }
        self.modes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .transition_to(to, reason, now)
    }

    /// Fail-safe entry: mode transition, safe signal pattern, event.
    /// Manual overrides are preserved; the agent is refused until an
    /// operator exits fail-safe.
    pub fn enter_fail_safe(&self, reason: &str, now: f64) {
        {
            let mut modes = self.modes.lock().unwrap_or_else(|e| e.into_inner());
            if modes.get_current_mode() == SystemMode::FailSafe {
                return;
            }
            modes.enter_fail_safe(reason, now);
        }
        self.actuator.apply_pattern(self.fail_safe_pattern, now);
        self.emitter.emit(SystemEventMessage::FailSafe {
            reason: reason.to_string(),
            pattern: self.fail_safe_pattern,
            timestamp: now,
        });
        log::error!("FAIL-SAFE entered: {}", reason);
    }

    pub fn exit_fail_safe(&self, operator_id: &str, now: f64) -> bool {
        self.modes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .exit_fail_safe(operator_id, now)
    }

    pub fn transition_history(&self, limit: usize) -> Vec<ModeTransition> {
        self.modes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_transition_history(limit)
    }

    // === Emergency corridors ===

    pub fn activate_emergency_corridor(&self, corridor: &str, now: f64) {
        {
            let mut tracker = self.emergency.lock().unwrap_or_else(|e| e.into_inner());
            tracker.active_corridor = Some(corridor.to_string());
            tracker.last_active = now;
        }
        self.change_mode(SystemMode::Emergency, &format!("Corridor {}", corridor), now);
        self.emitter.emit(SystemEventMessage::EmergencyActivated {
            corridor: corridor.to_string(),
            timestamp: now,
        });
    }

    pub fn clear_emergency_corridor(&self, now: f64) {
        let mut tracker = self.emergency.lock().unwrap_or_else(|e| e.into_inner());
        tracker.active_corridor = None;
        tracker.last_active = now;
    }

    pub fn active_corridor(&self) -> Option<String> {
        self.emergency
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active_corridor
            .clone()
    }

    /// Seconds the EMERGENCY mode has been idle (no corridor), or None
    /// when a corridor is active.
    pub fn emergency_idle_seconds(&self, now: f64) -> Option<f64> {
        let tracker = self.emergency.lock().unwrap_or_else(|e| e.into_inner());
        if tracker.active_corridor.is_some() {
            None
        } else {
            Some(now - tracker.last_active)
        }
    }

    pub fn emergency_idle_revert(&self) -> f64 {
        self.emergency_idle_revert
    }

    // === Manual overrides ===

    /// Forces GREEN on a (junction, direction) for `duration` seconds.
    /// The change still passes conflict validation.
    pub fn force_signal(
        &self,
        junction_id: &str,
        direction: Direction,
        duration: f64,
        operator_id: &str,
        reason: &str,
        now: f64,
    ) -> Result<String, String> {
        let (admitted, why) = self.validate_signal_change(
            junction_id,
            direction,
            SignalColor::Green,
            now,
            ChangeOrigin::Operator,
        );
        if !admitted {
            return Err(why);
        }
        let previous = self
            .actuator
            .signals(junction_id)
            .map(|s| s.get(direction).current)
            .unwrap_or(SignalColor::Red);
        self.actuator
            .set_signal(junction_id, direction, SignalColor::Green, duration, now)?;

        self.emitter
            .emit_signal_change(junction_id, direction, SignalColor::Green, previous, duration, now);

        let id = self
            .overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .force_signal_state(junction_id, direction, duration, operator_id, reason, now);
        Ok(id)
    }

    /// All signals to the safe pattern, agent refused, audit record kept.
    pub fn emergency_stop(&self, operator_id: &str, reason: &str, now: f64) -> String {
        self.actuator.apply_pattern(self.fail_safe_pattern, now);
        let id = self
            .overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .emergency_stop(operator_id, reason, now);
        self.emitter.emit_system_event(
            "EMERGENCY_STOP",
            EventSeverity::Critical,
            format!("Emergency stop by {}: {}", operator_id, reason),
            now,
        );
        id
    }

    pub fn disable_agent(&self, operator_id: &str, reason: &str, now: f64) -> String {
        self.overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .disable_autonomous_agent(operator_id, reason, now)
    }

    pub fn enable_agent(&self, operator_id: &str, now: f64) -> bool {
        self.overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .enable_autonomous_agent(operator_id, now)
    }

    pub fn cancel_override(&self, override_id: &str, operator_id: &str, now: f64) -> bool {
        self.overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel_override(override_id, operator_id, now)
    }

    pub fn active_overrides(&self, now: f64) -> Vec<Override> {
        self.overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_active_overrides(now)
    }

    pub fn override_history(&self, limit: usize) -> Vec<Override> {
        self.overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_override_history(limit)
    }

    pub fn forced_signal_active(&self, junction_id: &str, direction: Direction, now: f64) -> bool {
        self.overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active_force_signal(junction_id, direction, now)
            .is_some()
    }

    /// Whether the agent may run its decision stage this tick: requires a
    /// non-fail-safe, non-emergency-stopped system and no DISABLE_AGENT
    /// override. The agent keeps perceiving and monitoring regardless.
    pub fn agent_decisions_allowed(&self, now: f64) -> bool {
        let mode = self.current_mode();
        if mode == SystemMode::FailSafe {
            return false;
        }
        let overrides = self.overrides.lock().unwrap_or_else(|e| e.into_inner());
        overrides.is_agent_enabled(now) && !overrides.emergency_stop_active(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_system::signal_actuator::SimulatedActuator;
    use crate::models::network::create_default_network;

    fn kernel() -> Arc<SafetyKernel> {
        let network = create_default_network();
        let actuator = Arc::new(SimulatedActuator::new(&network, 0.0));
        let emitter = Arc::new(EventEmitter::new(64));
        Arc::new(SafetyKernel::new(&SafetyConfig::default(), actuator, emitter, 0.0).unwrap())
    }

    #[test]
    fn fail_safe_refuses_agent_but_not_operator() {
        let k = kernel();
        k.enter_fail_safe("test", 100.0);

        let (ok, reason) = k.validate_signal_change(
            "J-1",
            Direction::East,
            SignalColor::Green,
            200.0,
            ChangeOrigin::Agent,
        );
        assert!(!ok);
        assert!(reason.contains("Fail-safe"));

        let (ok, _) = k.validate_signal_change(
            "J-1",
            Direction::East,
            SignalColor::Green,
            200.0,
            ChangeOrigin::Operator,
        );
        assert!(ok);

        assert!(!k.agent_decisions_allowed(200.0));
        assert!(k.exit_fail_safe("operator-1", 300.0));
        assert!(k.agent_decisions_allowed(300.0));
    }

    #[test]
    fn fail_safe_applies_safe_pattern() {
        let k = kernel();
        k.enter_fail_safe("sweep violation", 50.0);
        for junction_id in k.actuator().junction_ids() {
            let signals = k.actuator().signals(&junction_id).unwrap();
            assert!(signals.green_directions().is_empty());
        }
        assert_eq!(k.current_mode(), SystemMode::FailSafe);
    }

    #[test]
    fn emergency_stop_applies_safe_pattern_and_refuses_agent() {
        let k = kernel();
        assert!(k.agent_decisions_allowed(10.0));

        let id = k.emergency_stop("operator-1", "spectators on roadway", 50.0);
        assert!(id.starts_with("OVR-"));
        for junction_id in k.actuator().junction_ids() {
            let signals = k.actuator().signals(&junction_id).unwrap();
            assert!(signals.green_directions().is_empty());
        }
        assert!(!k.agent_decisions_allowed(60.0));
    }

    #[test]
    fn emergency_stop_honors_configured_pattern() {
        let network = create_default_network();
        let actuator = Arc::new(SimulatedActuator::new(&network, 0.0));
        let emitter = Arc::new(EventEmitter::new(64));
        let mut config = SafetyConfig::default();
        config.fail_safe_pattern = FailSafePattern::BlinkYellow;
        let k = SafetyKernel::new(&config, actuator, emitter, 0.0).unwrap();

        k.emergency_stop("operator-1", "test", 50.0);
        let signals = k.actuator().signals("J-4").unwrap();
        assert_eq!(signals.north.current, SignalColor::Yellow);
        assert_eq!(signals.east.current, SignalColor::Yellow);
    }

    #[test]
    fn force_signal_validates_and_records_override() {
        let k = kernel();
        // North is GREEN since startup; forcing East GREEN conflicts.
        let err = k
            .force_signal("J-1", Direction::East, 30.0, "operator-1", "test", 100.0)
            .unwrap_err();
        assert!(err.contains("Conflict"));

        // Clear North first (dwell satisfied), then East is forceable.
        k.actuator()
            .set_signal("J-1", Direction::North, SignalColor::Red, 0.0, 100.0)
            .unwrap();
        let id = k
            .force_signal("J-1", Direction::East, 30.0, "operator-1", "test", 105.0)
            .unwrap();
        assert!(id.starts_with("OVR-"));
        assert!(k.forced_signal_active("J-1", Direction::East, 110.0));
        assert!(!k.active_overrides(110.0).is_empty());
    }

    #[test]
    fn emergency_corridor_drives_mode_coherence_inputs() {
        let k = kernel();
        k.activate_emergency_corridor("C-1", 10.0);
        assert_eq!(k.current_mode(), SystemMode::Emergency);
        assert_eq!(k.emergency_idle_seconds(20.0), None);

        k.clear_emergency_corridor(30.0);
        assert_eq!(k.emergency_idle_seconds(100.0), Some(70.0));
    }
}
