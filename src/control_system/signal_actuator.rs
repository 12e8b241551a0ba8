// signal_actuator.rs

use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::FailSafePattern;
use crate::models::junction::{
    create_default_signals, Direction, JunctionId, JunctionSignals, SignalColor,
};
use crate::models::network::RoadNetwork;

/// The sole mutator of physical signal state.
///
/// Implementations must linearize concurrent commands per junction and
/// acknowledge every applied command by bumping `last_ack`.
pub trait SignalActuator: Send + Sync {
    fn junction_ids(&self) -> Vec<JunctionId>;
    fn signals(&self, junction_id: &str) -> Option<JunctionSignals>;
    fn set_signal(
        &self,
        junction_id: &str,
        direction: Direction,
        color: SignalColor,
        duration: f64,
        now: f64,
    ) -> Result<(), String>;
    /// Applies the fail-safe pattern to every junction.
    fn apply_pattern(&self, pattern: FailSafePattern, now: f64);
    /// Timestamp of the last acknowledged command.
    fn last_ack(&self) -> f64;
}

/// In-process actuator over a map of junction signal heads. Each junction
/// sits behind its own mutex, so commands for one junction apply in
/// program order while different junctions proceed independently.
pub struct SimulatedActuator {
    junctions: HashMap<JunctionId, Mutex<JunctionSignals>>,
    last_ack: Mutex<f64>,
}

impl SimulatedActuator {
    pub fn new(network: &RoadNetwork, now: f64) -> Self {
        let mut junctions = HashMap::new();
        for junction in &network.junctions {
            junctions.insert(
                junction.id.clone(),
                Mutex::new(create_default_signals(Direction::North, now)),
            );
        }
        Self {
            junctions,
            last_ack: Mutex::new(now),
        }
    }

    fn ack(&self, now: f64) {
        let mut last = self.last_ack.lock().unwrap_or_else(|e| e.into_inner());
        if now > *last {
            *last = now;
        }
    }
}

impl SignalActuator for SimulatedActuator {
    fn junction_ids(&self) -> Vec<JunctionId> {
        let mut ids: Vec<JunctionId> = self.junctions.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn signals(&self, junction_id: &str) -> Option<JunctionSignals> {
        self.junctions
            .get(junction_id)
            .map(|m| *m.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn set_signal(
        &self,
        junction_id: &str,
        direction: Direction,
        color: SignalColor,
        duration: f64,
        now: f64,
    ) -> Result<(), String> {
        let junction = self
            .junctions
            .get(junction_id)
            .ok_or_else(|| format!("Unknown junction: {}", junction_id))?;

        let mut signals = junction.lock().unwrap_or_else(|e| e.into_inner());
        let head = signals.get_mut(direction);
        if head.current != color {
            head.last_change = now;
        }
        if head.current == SignalColor::Green && color != SignalColor::Green {
            head.last_green_at = now;
        }
        head.current = color;
        head.duration = duration;
        if color == SignalColor::Green {
            head.last_green_at = now;
        }
        drop(signals);

        self.ack(now);
        Ok(())
    }

    fn apply_pattern(&self, pattern: FailSafePattern, now: f64) {
        let color = match pattern {
            FailSafePattern::AllRed => SignalColor::Red,
            FailSafePattern::BlinkYellow => SignalColor::Yellow,
        };
        for signals in self.junctions.values() {
            let mut signals = signals.lock().unwrap_or_else(|e| e.into_inner());
            for direction in Direction::ALL {
                let head = signals.get_mut(direction);
                if head.current == SignalColor::Green {
                    head.last_green_at = now;
                }
                if head.current != color {
                    head.last_change = now;
                }
                head.current = color;
                head.duration = 0.0;
            }
        }
        self.ack(now);
    }

    fn last_ack(&self) -> f64 {
        *self.last_ack.lock().unwrap_or_else(|e| e.into_inner())
    }
}
