// decision.rs

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::agent::perception::PerceivedState;
use crate::models::junction::{Direction, JunctionId, SignalColor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyKind {
    Rl,
    RuleBased,
    Manual,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StrategyKind::Rl => "RL",
            StrategyKind::RuleBased => "RULE_BASED",
            StrategyKind::Manual => "MANUAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    Green,
    Red,
    Hold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDecision {
    pub junction_id: JunctionId,
    pub direction: Direction,
    pub action: SignalAction,
    pub duration: f64,
    pub reason: String,
    pub strategy: StrategyKind,
}

/// The output contract of every decision strategy. When
/// `emergency_override` is set the action stage is skipped entirely;
/// the emergency subsystem owns the signals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentDecisions {
    pub decisions: Vec<SignalDecision>,
    pub emergency_override: bool,
}

pub trait DecisionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;
    fn decide(&self, state: &PerceivedState) -> Result<AgentDecisions, String>;
}

/// HOLD for every junction's current green; used by the MANUAL strategy
/// and whenever the agent is suspended.
pub fn hold_all(state: &PerceivedState, strategy: StrategyKind) -> AgentDecisions {
    let decisions = state
        .junction_order
        .iter()
        .filter_map(|junction_id| {
            let signals = state.signals.get(junction_id)?;
            let green = signals.green_directions().into_iter().next()?;
            Some(SignalDecision {
                junction_id: junction_id.clone(),
                direction: green,
                action: SignalAction::Hold,
                duration: 0.0,
                reason: "holding current phase".to_string(),
                strategy,
            })
        })
        .collect();
    AgentDecisions {
        decisions,
        emergency_override: false,
    }
}

// === RULE_BASED ===

/// Serves the most congested approach: GREEN for the busiest direction
/// with a density-scaled duration, RED for whichever direction currently
/// holds GREEN. Already-green busiest approaches past the minimum dwell
/// simply HOLD.
pub struct RuleBasedStrategy {
    pub min_green_time: f64,
}

impl RuleBasedStrategy {
    pub fn new(min_green_time: f64) -> Self {
        Self { min_green_time }
    }

    fn green_duration(density_score: f64) -> f64 {
        (15.0 + 2.0 * density_score).clamp(15.0, 60.0)
    }
}

impl DecisionStrategy for RuleBasedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RuleBased
    }

    fn decide(&self, state: &PerceivedState) -> Result<AgentDecisions, String> {
        let mut decisions = Vec::new();

        for junction_id in &state.junction_order {
            let density = match state.junction_densities.get(junction_id) {
                Some(density) => density,
                None => continue,
            };
            let signals = match state.signals.get(junction_id) {
                Some(signals) => signals,
                None => continue,
            };

            let mut busiest = Direction::North;
            let mut busiest_score = f64::NEG_INFINITY;
            for direction in Direction::ALL {
                let score = density.directional(direction);
                if score > busiest_score {
                    busiest = direction;
                    busiest_score = score;
                }
            }

            let current_green = signals.green_directions().into_iter().next();

            if busiest_score <= 0.0 {
                // Nothing waiting anywhere; keep the current phase.
                if let Some(green) = current_green {
                    decisions.push(SignalDecision {
                        junction_id: junction_id.clone(),
                        direction: green,
                        action: SignalAction::Hold,
                        duration: 0.0,
                        reason: "no demand".to_string(),
                        strategy: self.kind(),
                    });
                }
                continue;
            }

            if current_green == Some(busiest) {
                // Busiest approach is already being served.
                decisions.push(SignalDecision {
                    junction_id: junction_id.clone(),
                    direction: busiest,
                    action: SignalAction::Hold,
                    duration: 0.0,
                    reason: format!("busiest approach {} already GREEN", busiest),
                    strategy: self.kind(),
                });
                continue;
            }

            // Release the current green first so the junction never holds
            // two GREENs; skip the RED while its dwell would be rejected.
            if let Some(green) = current_green {
                if signals.get(green).dwell(state.timestamp) >= self.min_green_time {
                    decisions.push(SignalDecision {
                        junction_id: junction_id.clone(),
                        direction: green,
                        action: SignalAction::Red,
                        duration: 0.0,
                        reason: format!("yielding to busier approach {}", busiest),
                        strategy: self.kind(),
                    });
                    decisions.push(SignalDecision {
                        junction_id: junction_id.clone(),
                        direction: busiest,
                        action: SignalAction::Green,
                        duration: Self::green_duration(busiest_score),
                        reason: format!("most congested approach ({:.0})", busiest_score),
                        strategy: self.kind(),
                    });
                } else {
                    decisions.push(SignalDecision {
                        junction_id: junction_id.clone(),
                        direction: green,
                        action: SignalAction::Hold,
                        duration: 0.0,
                        reason: "minimum green dwell not yet served".to_string(),
                        strategy: self.kind(),
                    });
                }
            } else {
                decisions.push(SignalDecision {
                    junction_id: junction_id.clone(),
                    direction: busiest,
                    action: SignalAction::Green,
                    duration: Self::green_duration(busiest_score),
                    reason: format!("most congested approach ({:.0})", busiest_score),
                    strategy: self.kind(),
                });
            }
        }

        Ok(AgentDecisions {
            decisions,
            emergency_override: false,
        })
    }
}

// === MANUAL ===

/// Operator-driven mode: the agent only holds; signal changes come from
/// manual overrides.
pub struct ManualStrategy;

impl DecisionStrategy for ManualStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Manual
    }

    fn decide(&self, state: &PerceivedState) -> Result<AgentDecisions, String> {
        Ok(hold_all(state, self.kind()))
    }
}

// === RL ===

pub const FEATURES_PER_JUNCTION: usize = 7;
pub const OBSERVATION_JUNCTIONS: usize = 9;

/// Deterministic per-junction policy: one action index in 0..=3 (the
/// direction to serve) per junction. The trained variant loads a model;
/// `GreedyPolicy` computes the same interface analytically.
pub trait Policy: Send + Sync {
    fn act(&self, observation: &[f64]) -> Result<Vec<usize>, String>;
}

/// Argmax over each junction's four directional densities.
pub struct GreedyPolicy;

impl Policy for GreedyPolicy {
    fn act(&self, observation: &[f64]) -> Result<Vec<usize>, String> {
        if observation.len() % FEATURES_PER_JUNCTION != 0 {
            return Err(format!(
                "observation length {} is not a multiple of {}",
                observation.len(),
                FEATURES_PER_JUNCTION
            ));
        }
        let actions = observation
            .chunks(FEATURES_PER_JUNCTION)
            .map(|features| {
                let mut best = 0;
                for i in 1..4 {
                    if features[i] > features[best] {
                        best = i;
                    }
                }
                best
            })
            .collect();
        Ok(actions)
    }
}

/// Builds the observation vector: 9 junctions x 7 features. Directional
/// densities normalized by 100, mean red dwell normalized by 120 s, the
/// green phase encoded as (index + 1) / 4, total vehicles normalized
/// by 50. Missing junctions pad with zeros.
pub fn build_observation(state: &PerceivedState) -> Vec<f64> {
    let mut observation = Vec::with_capacity(OBSERVATION_JUNCTIONS * FEATURES_PER_JUNCTION);

    for i in 0..OBSERVATION_JUNCTIONS {
        let junction_id = match state.junction_order.get(i) {
            Some(id) => id,
            None => {
                observation.extend([0.0; FEATURES_PER_JUNCTION]);
                continue;
            }
        };
        let density = state.junction_densities.get(junction_id);
        let signals = state.signals.get(junction_id);

        for direction in Direction::ALL {
            let score = density.map_or(0.0, |d| d.directional(direction));
            observation.push((score / 100.0).min(1.0));
        }

        let waiting = signals.map_or(0.0, |s| {
            let red_dwells: Vec<f64> = s
                .iter()
                .filter(|(_, head)| head.current == SignalColor::Red)
                .map(|(_, head)| head.dwell(state.timestamp))
                .collect();
            if red_dwells.is_empty() {
                0.0
            } else {
                red_dwells.iter().sum::<f64>() / red_dwells.len() as f64
            }
        });
        observation.push((waiting / 120.0).min(1.0));

        let phase = signals
            .and_then(|s| s.green_directions().into_iter().next())
            .map_or(0.0, |d| {
                (Direction::ALL.iter().position(|&x| x == d).unwrap_or(0) as f64 + 1.0) / 4.0
            });
        observation.push(phase);

        let total = density.map_or(0.0, |d| d.total_vehicles as f64);
        observation.push((total / 50.0).min(1.0));
    }

    observation
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InferenceStats {
    pub inference_count: u64,
    pub total_inference_ms: f64,
    pub max_inference_ms: f64,
    pub slow_inference_count: u64,
}

pub struct RlStrategy {
    policy: Arc<dyn Policy>,
    default_green_duration: f64,
    slow_threshold_ms: f64,
    stats: Mutex<InferenceStats>,
}

impl RlStrategy {
    pub fn new(policy: Arc<dyn Policy>, default_green_duration: f64, slow_threshold_ms: f64) -> Self {
        Self {
            policy,
            default_green_duration,
            slow_threshold_ms,
            stats: Mutex::new(InferenceStats::default()),
        }
    }

    pub fn stats(&self) -> InferenceStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl DecisionStrategy for RlStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Rl
    }

    fn decide(&self, state: &PerceivedState) -> Result<AgentDecisions, String> {
        let observation = build_observation(state);

        let started = Instant::now();
        let actions = self.policy.act(&observation)?;
        let inference_ms = started.elapsed().as_secs_f64() * 1000.0;

        {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.inference_count += 1;
            stats.total_inference_ms += inference_ms;
            stats.max_inference_ms = stats.max_inference_ms.max(inference_ms);
            if inference_ms > self.slow_threshold_ms {
                stats.slow_inference_count += 1;
                log::warn!("Slow inference: {:.1}ms", inference_ms);
            }
        }

        let mut decisions = Vec::new();
        for (i, junction_id) in state.junction_order.iter().enumerate() {
            let action_index = match actions.get(i) {
                Some(&index) => index,
                None => break,
            };
            let target = Direction::from_action_index(action_index)
                .ok_or_else(|| format!("policy produced invalid action {}", action_index))?;

            let current_green = state
                .signals
                .get(junction_id)
                .and_then(|s| s.green_directions().into_iter().next());
            if current_green == Some(target) {
                decisions.push(SignalDecision {
                    junction_id: junction_id.clone(),
                    direction: target,
                    action: SignalAction::Hold,
                    duration: 0.0,
                    reason: "policy keeps current phase".to_string(),
                    strategy: self.kind(),
                });
                continue;
            }
            if let Some(green) = current_green {
                decisions.push(SignalDecision {
                    junction_id: junction_id.clone(),
                    direction: green,
                    action: SignalAction::Red,
                    duration: 0.0,
                    reason: format!("policy selected {}", target),
                    strategy: self.kind(),
                });
            }
            decisions.push(SignalDecision {
                junction_id: junction_id.clone(),
                direction: target,
                action: SignalAction::Green,
                duration: self.default_green_duration,
                reason: "policy action".to_string(),
                strategy: self.kind(),
            });
        }

        Ok(AgentDecisions {
            decisions,
            emergency_override: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::perception::PerceivedState;
    use crate::density::JunctionDensityData;
    use crate::models::junction::create_default_signals;
    use crate::safety::system_modes::SystemMode;
    use std::collections::HashMap;

    fn state_with_junction(
        green: Direction,
        green_dwell: f64,
        densities: [f64; 4],
    ) -> PerceivedState {
        let now = 1000.0;
        let mut junction_densities = HashMap::new();
        let mut density = JunctionDensityData::new("J-1".to_string());
        density.density_north = densities[0];
        density.density_east = densities[1];
        density.density_south = densities[2];
        density.density_west = densities[3];
        density.max_density = densities.iter().copied().fold(0.0, f64::max);
        junction_densities.insert("J-1".to_string(), density);

        let mut signals = HashMap::new();
        signals.insert(
            "J-1".to_string(),
            create_default_signals(green, now - green_dwell),
        );

        PerceivedState {
            tick: 1,
            timestamp: now,
            mode: SystemMode::Normal,
            junction_order: vec!["J-1".to_string()],
            junction_densities,
            signals,
            emergency_active: false,
            decisions_allowed: true,
            forecast_risk: HashMap::new(),
        }
    }

    #[test]
    fn rule_based_serves_busiest_approach() {
        let strategy = RuleBasedStrategy::new(10.0);
        let state = state_with_junction(Direction::North, 30.0, [10.0, 80.0, 5.0, 0.0]);
        let decisions = strategy.decide(&state).unwrap().decisions;

        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].action, SignalAction::Red);
        assert_eq!(decisions[0].direction, Direction::North);
        assert_eq!(decisions[1].action, SignalAction::Green);
        assert_eq!(decisions[1].direction, Direction::East);
        // duration = clamp(15 + 2*80, 15, 60)
        assert_eq!(decisions[1].duration, 60.0);
    }

    #[test]
    fn rule_based_holds_when_busiest_is_green_or_dwell_unserved() {
        let strategy = RuleBasedStrategy::new(10.0);

        let state = state_with_junction(Direction::East, 30.0, [10.0, 80.0, 5.0, 0.0]);
        let decisions = strategy.decide(&state).unwrap().decisions;
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action, SignalAction::Hold);

        // Busiest elsewhere but the green is only 3 s old.
        let state = state_with_junction(Direction::North, 3.0, [10.0, 80.0, 5.0, 0.0]);
        let decisions = strategy.decide(&state).unwrap().decisions;
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action, SignalAction::Hold);
    }

    #[test]
    fn manual_strategy_only_holds() {
        let strategy = ManualStrategy;
        let state = state_with_junction(Direction::North, 30.0, [10.0, 80.0, 5.0, 0.0]);
        let decisions = strategy.decide(&state).unwrap().decisions;
        assert!(decisions.iter().all(|d| d.action == SignalAction::Hold));
    }

    #[test]
    fn observation_has_fixed_shape() {
        let state = state_with_junction(Direction::North, 30.0, [50.0, 25.0, 0.0, 0.0]);
        let observation = build_observation(&state);
        assert_eq!(observation.len(), 63);
        assert_eq!(observation[0], 0.5);
        assert_eq!(observation[1], 0.25);
        // Green phase North encodes as 1/4.
        assert_eq!(observation[5], 0.25);
        // Padding junctions are all zero.
        assert!(observation[7..].iter().skip(7).all(|&v| v == 0.0));
    }

    #[test]
    fn rl_strategy_maps_argmax_to_green() {
        let strategy = RlStrategy::new(Arc::new(GreedyPolicy), 30.0, 100.0);
        let state = state_with_junction(Direction::North, 30.0, [10.0, 80.0, 5.0, 0.0]);
        let decisions = strategy.decide(&state).unwrap().decisions;
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[1].direction, Direction::East);
        assert_eq!(decisions[1].action, SignalAction::Green);
        assert_eq!(decisions[1].duration, 30.0);
        assert_eq!(strategy.stats().inference_count, 1);
    }
}
