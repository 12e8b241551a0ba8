// perception.rs

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::control_system::signal_actuator::SignalActuator;
use crate::density::tracker::DensityTracker;
use crate::density::JunctionDensityData;
use crate::models::junction::{JunctionId, JunctionSignals};
use crate::safety::system_modes::SystemMode;
use crate::safety::SafetyKernel;

/// The snapshot the decision stage runs against: junction densities,
/// live signals, the system mode, and the tick sequence number.
#[derive(Debug, Clone)]
pub struct PerceivedState {
    pub tick: u64,
    pub timestamp: f64,
    pub mode: SystemMode,
    /// Stable junction ordering used for the observation vector.
    pub junction_order: Vec<JunctionId>,
    pub junction_densities: HashMap<JunctionId, JunctionDensityData>,
    pub signals: HashMap<JunctionId, JunctionSignals>,
    pub emergency_active: bool,
    pub decisions_allowed: bool,
    /// Optional per-junction risk filled by the predict stage.
    pub forecast_risk: HashMap<JunctionId, f64>,
}

impl PerceivedState {
    /// Junctions ranked by max directional density, most congested first.
    pub fn top_congested_junctions(&self, k: usize) -> Vec<JunctionId> {
        let mut ranked: Vec<(&JunctionId, f64)> = self
            .junction_densities
            .iter()
            .map(|(id, data)| (id, data.max_density))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.into_iter().take(k).map(|(id, _)| id.clone()).collect()
    }
}

/// Assembles the perceived state each tick.
pub struct PerceptionModule {
    tracker: Arc<RwLock<DensityTracker>>,
    actuator: Arc<dyn SignalActuator>,
    kernel: Arc<SafetyKernel>,
}

impl PerceptionModule {
    pub fn new(
        tracker: Arc<RwLock<DensityTracker>>,
        actuator: Arc<dyn SignalActuator>,
        kernel: Arc<SafetyKernel>,
    ) -> Self {
        Self {
            tracker,
            actuator,
            kernel,
        }
    }

    pub fn perceive(&self, tick: u64, now: f64) -> PerceivedState {
        let junction_densities = {
            let tracker = self.tracker.read().unwrap_or_else(|e| e.into_inner());
            tracker.junction_densities().clone()
        };

        let junction_order = self.actuator.junction_ids();
        let mut signals = HashMap::new();
        for junction_id in &junction_order {
            if let Some(junction_signals) = self.actuator.signals(junction_id) {
                signals.insert(junction_id.clone(), junction_signals);
            }
        }

        PerceivedState {
            tick,
            timestamp: now,
            mode: self.kernel.current_mode(),
            junction_order,
            junction_densities,
            signals,
            emergency_active: self.kernel.active_corridor().is_some(),
            decisions_allowed: self.kernel.agent_decisions_allowed(now),
            forecast_risk: HashMap::new(),
        }
    }
}
