// conflict_validator.rs

use crate::config::SafetyConfig;
use crate::models::junction::{Direction, JunctionSignals, SignalColor};

/// Who is asking for the change. Fail-safe entry may force GREEN heads to
/// RED without waiting out the minimum green dwell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Agent,
    Operator,
    FailSafeEntry,
}

/// Pure conflict validation over a junction's signal state. Every signal
/// change in the system passes through `validate_signal_change` before it
/// reaches the actuator.
#[derive(Debug, Clone)]
pub struct ConflictValidator {
    pub min_red_time: f64,
    pub min_green_time: f64,
    pub max_red_time: f64,
    pub no_green_grace: f64,
    pub allow_opposing_pairs: bool,
}

impl ConflictValidator {
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            min_red_time: config.min_red_time_s,
            min_green_time: config.min_green_time_s,
            max_red_time: config.max_red_time_s,
            no_green_grace: config.no_green_grace_s,
            allow_opposing_pairs: config.allow_opposing_pairs,
        }
    }

    /// Admit or reject a proposed change with a human-readable reason.
    pub fn validate_signal_change(
        &self,
        junction_id: &str,
        target_direction: Direction,
        target_color: SignalColor,
        signals: &JunctionSignals,
        now: f64,
        origin: ChangeOrigin,
    ) -> (bool, String) {
        let target = signals.get(target_direction);

        match target_color {
            SignalColor::Green => {
                // Rule 1: at most one GREEN per junction.
                for (direction, head) in signals.iter() {
                    if direction == target_direction || head.current != SignalColor::Green {
                        continue;
                    }
                    let opposing = direction == target_direction.opposite();
                    if opposing && self.allow_opposing_pairs {
                        continue;
                    }
                    return (
                        false,
                        format!(
                            "Conflict: {} {} already GREEN while {} requested GREEN",
                            junction_id, direction, target_direction
                        ),
                    );
                }
                // Rule 2: minimum RED dwell before going GREEN.
                if target.current == SignalColor::Red && target.dwell(now) < self.min_red_time {
                    return (
                        false,
                        format!(
                            "min_red_time: {} {} has been RED only {:.1}s (minimum {:.1}s)",
                            junction_id,
                            target_direction,
                            target.dwell(now),
                            self.min_red_time
                        ),
                    );
                }
                (true, "OK".to_string())
            }
            SignalColor::Red => {
                // Rule 3: minimum GREEN dwell before dropping to RED, except
                // when the safety kernel itself is entering fail-safe.
                if target.current == SignalColor::Green
                    && origin != ChangeOrigin::FailSafeEntry
                    && target.dwell(now) < self.min_green_time
                {
                    return (
                        false,
                        format!(
                            "min_green_time: {} {} has been GREEN only {:.1}s (minimum {:.1}s)",
                            junction_id,
                            target_direction,
                            target.dwell(now),
                            self.min_green_time
                        ),
                    );
                }
                (true, "OK".to_string())
            }
            SignalColor::Yellow => (true, "OK".to_string()),
        }
    }

    /// Full-junction audit. Returns `(is_valid, issues)`; warnings are
    /// prefixed with `WARNING:` and do not invalidate the junction.
    pub fn validate_full_junction(
        &self,
        junction_id: &str,
        signals: &JunctionSignals,
        now: f64,
    ) -> (bool, Vec<String>) {
        let mut issues = Vec::new();
        let mut valid = true;

        let greens = signals.green_directions();
        if greens.len() > 1 {
            let opposing_pair = greens.len() == 2 && greens[0] == greens[1].opposite();
            if !(opposing_pair && self.allow_opposing_pairs) {
                valid = false;
                issues.push(format!(
                    "Multiple GREEN at {}: {:?}",
                    junction_id,
                    greens.iter().map(|d| d.short()).collect::<Vec<_>>()
                ));
            }
        }

        if greens.is_empty() {
            let since_any_green = Direction::ALL
                .iter()
                .map(|&d| now - signals.get(d).last_green_at)
                .fold(f64::INFINITY, f64::min);
            if since_any_green > self.no_green_grace {
                issues.push(format!(
                    "WARNING: {} has had no GREEN direction for {:.0}s",
                    junction_id, since_any_green
                ));
            }
        }

        for (direction, head) in signals.iter() {
            if head.current == SignalColor::Red && now - head.last_green_at > self.max_red_time {
                issues.push(format!(
                    "WARNING: {} {} stuck RED for {:.0}s",
                    junction_id,
                    direction,
                    now - head.last_green_at
                ));
            }
        }

        (valid, issues)
    }

    /// Startup sanity check: a fabricated double-GREEN must be rejected
    /// both by the audit and by a change proposal. Returns false when the
    /// validator contradicts itself, which is fatal upstream.
    pub fn self_check(&self, now: f64) -> bool {
        use crate::models::junction::create_default_signals;

        let mut signals = create_default_signals(Direction::North, now - 30.0);
        signals.get_mut(Direction::East).current = SignalColor::Green;

        let (audit_ok, issues) = self.validate_full_junction("SELF-CHECK", &signals, now);
        if audit_ok || issues.is_empty() {
            return false;
        }

        let single = create_default_signals(Direction::North, now - 30.0);
        let (admitted, reason) = self.validate_signal_change(
            "SELF-CHECK",
            Direction::East,
            SignalColor::Green,
            &single,
            now,
            ChangeOrigin::Agent,
        );
        !admitted && reason.contains("Conflict")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyConfig;
    use crate::models::junction::create_default_signals;

    fn validator() -> ConflictValidator {
        ConflictValidator::new(&SafetyConfig::default())
    }

    #[test]
    fn defaults() {
        let v = validator();
        assert_eq!(v.min_red_time, 2.0);
        assert_eq!(v.min_green_time, 10.0);
    }

    #[test]
    fn green_conflict_is_rejected() {
        let v = validator();
        // North GREEN for 1s, East RED for 30s; requesting GREEN on East.
        let now = 100.0;
        let mut signals = create_default_signals(Direction::North, now - 30.0);
        signals.get_mut(Direction::North).last_change = now - 1.0;

        let (ok, reason) = v.validate_signal_change(
            "J-1",
            Direction::East,
            SignalColor::Green,
            &signals,
            now,
            ChangeOrigin::Agent,
        );
        assert!(!ok);
        assert!(reason.contains("Conflict"), "reason was: {}", reason);
    }

    #[test]
    fn min_red_dwell_is_enforced() {
        let v = validator();
        // All RED, last change 1.5s ago.
        let now = 100.0;
        let mut signals = create_default_signals(Direction::North, now - 1.5);
        signals.get_mut(Direction::North).current = SignalColor::Red;

        let (ok, reason) = v.validate_signal_change(
            "J-1",
            Direction::North,
            SignalColor::Green,
            &signals,
            now,
            ChangeOrigin::Agent,
        );
        assert!(!ok);
        assert!(reason.contains("min_red_time"), "reason was: {}", reason);

        // After the dwell has elapsed the change is admitted.
        let (ok, _) = v.validate_signal_change(
            "J-1",
            Direction::North,
            SignalColor::Green,
            &signals,
            now + 1.0,
            ChangeOrigin::Agent,
        );
        assert!(ok);
    }

    #[test]
    fn min_green_dwell_bypassed_on_fail_safe_entry() {
        let v = validator();
        let now = 100.0;
        let signals = create_default_signals(Direction::North, now - 3.0);

        let (ok, _) = v.validate_signal_change(
            "J-1",
            Direction::North,
            SignalColor::Red,
            &signals,
            now,
            ChangeOrigin::Agent,
        );
        assert!(!ok);

        let (ok, _) = v.validate_signal_change(
            "J-1",
            Direction::North,
            SignalColor::Red,
            &signals,
            now,
            ChangeOrigin::FailSafeEntry,
        );
        assert!(ok);
    }

    #[test]
    fn full_junction_audit_flags_double_green() {
        let v = validator();
        let now = 100.0;
        let mut signals = create_default_signals(Direction::North, now - 30.0);
        signals.get_mut(Direction::East).current = SignalColor::Green;

        let (ok, issues) = v.validate_full_junction("J-1", &signals, now);
        assert!(!ok);
        assert!(issues[0].contains("Multiple GREEN"));
    }

    #[test]
    fn opposing_pairs_allowed_only_when_enabled() {
        let mut config = SafetyConfig::default();
        config.allow_opposing_pairs = true;
        let v = ConflictValidator::new(&config);
        let now = 100.0;
        let signals = create_default_signals(Direction::North, now - 30.0);
        let (ok, _) = v.validate_signal_change(
            "J-1",
            Direction::South,
            SignalColor::Green,
            &signals,
            now,
            ChangeOrigin::Agent,
        );
        assert!(ok);

        let (ok, _) = validator().validate_signal_change(
            "J-1",
            Direction::South,
            SignalColor::Green,
            &signals,
            now,
            ChangeOrigin::Agent,
        );
        assert!(!ok);
    }

    #[test]
    fn self_check_passes() {
        assert!(validator().self_check(1000.0));
    }
}
