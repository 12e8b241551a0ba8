// runner.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::agent::action::{ActionModule, ActionOutcome};
use crate::agent::decision::{
    hold_all, AgentDecisions, DecisionStrategy, GreedyPolicy, ManualStrategy, RlStrategy,
    RuleBasedStrategy, StrategyKind,
};
use crate::agent::monitoring::MonitoringModule;
use crate::agent::perception::{PerceivedState, PerceptionModule};
use crate::config::AgentConfig;
use crate::density::tracker::DensityTracker;
use crate::events::{EventEmitter, EventSeverity};
use crate::models::junction::Direction;
use crate::models::network::RoadNetwork;
use crate::persistence::gateway::PersistenceGateway;
use crate::persistence::tables::{created_at_stamp, AgentLogRow};
use crate::prediction::engine::PredictionEngine;
use crate::safety::system_modes::SystemMode;
use crate::safety::watchdog::AgentHealth;
use crate::safety::SafetyKernel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Stopped,
    Starting,
    Running,
    Paused,
    Stopping,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Stopped => "STOPPED",
            AgentStatus::Starting => "STARTING",
            AgentStatus::Running => "RUNNING",
            AgentStatus::Paused => "PAUSED",
            AgentStatus::Stopping => "STOPPING",
        };
        f.write_str(s)
    }
}

/// State shared between the loop task and its observers. Implements the
/// watchdog's read-only health view.
pub struct AgentSharedState {
    status: Mutex<AgentStatus>,
    last_tick_ts: Mutex<f64>,
    idle_ticks: AtomicU64,
    tick_seq: AtomicU64,
    max_idle_ticks: u64,
}

impl AgentSharedState {
    fn new(max_idle_ticks: u64) -> Self {
        Self {
            status: Mutex::new(AgentStatus::Stopped),
            last_tick_ts: Mutex::new(0.0),
            idle_ticks: AtomicU64::new(0),
            tick_seq: AtomicU64::new(0),
            max_idle_ticks,
        }
    }

    fn set_status(&self, status: AgentStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn heartbeat(&self, now: f64) {
        *self.last_tick_ts.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }
}

impl AgentHealth for AgentSharedState {
    fn last_tick_timestamp(&self) -> f64 {
        *self.last_tick_ts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_running(&self) -> bool {
        matches!(
            self.status(),
            AgentStatus::Starting | AgentStatus::Running | AgentStatus::Paused
        )
    }

    fn idle_ticks(&self) -> u64 {
        self.idle_ticks.load(Ordering::Relaxed)
    }

    fn max_idle_ticks(&self) -> u64 {
        self.max_idle_ticks
    }
}

/// The autonomous perceive -> predict -> decide -> act -> monitor cycle.
pub struct AgentLoop {
    config: AgentConfig,
    shared: Arc<AgentSharedState>,
    perception: PerceptionModule,
    action: ActionModule,
    monitoring: Mutex<MonitoringModule>,
    strategy: Mutex<Arc<dyn DecisionStrategy>>,
    kernel: Arc<SafetyKernel>,
    tracker: Arc<RwLock<DensityTracker>>,
    network: Arc<RoadNetwork>,
    engine: Arc<PredictionEngine>,
    gateway: Arc<PersistenceGateway>,
    emitter: Arc<EventEmitter>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AgentLoop {
    pub fn new(
        config: AgentConfig,
        kernel: Arc<SafetyKernel>,
        tracker: Arc<RwLock<DensityTracker>>,
        network: Arc<RoadNetwork>,
        engine: Arc<PredictionEngine>,
        gateway: Arc<PersistenceGateway>,
        emitter: Arc<EventEmitter>,
    ) -> Self {
        let shared = Arc::new(AgentSharedState::new(config.max_idle_ticks));
        let perception = PerceptionModule::new(
            Arc::clone(&tracker),
            Arc::clone(kernel.actuator()),
            Arc::clone(&kernel),
        );
        let action = ActionModule::new(Arc::clone(&kernel), Arc::clone(&emitter));
        let default_strategy: Arc<dyn DecisionStrategy> =
            Arc::new(RuleBasedStrategy::new(kernel.validator().min_green_time));

        Self {
            config,
            shared,
            perception,
            action,
            monitoring: Mutex::new(MonitoringModule::new()),
            strategy: Mutex::new(default_strategy),
            kernel,
            tracker,
            network,
            engine,
            gateway,
            emitter,
            handle: Mutex::new(None),
        }
    }

    /// The watchdog's read-only view of this agent.
    pub fn health(&self) -> Arc<dyn AgentHealth> {
        Arc::clone(&self.shared) as Arc<dyn AgentHealth>
    }

    pub fn status(&self) -> AgentStatus {
        self.shared.status()
    }

    pub fn current_strategy(&self) -> StrategyKind {
        self.strategy.lock().unwrap_or_else(|e| e.into_inner()).kind()
    }

    fn build_strategy(&self, kind: StrategyKind) -> Arc<dyn DecisionStrategy> {
        match kind {
            StrategyKind::RuleBased => {
                Arc::new(RuleBasedStrategy::new(self.kernel.validator().min_green_time))
            }
            StrategyKind::Manual => Arc::new(ManualStrategy),
            StrategyKind::Rl => Arc::new(RlStrategy::new(
                Arc::new(GreedyPolicy),
                self.config.default_green_duration_s,
                self.config.slow_decision_ms,
            )),
        }
    }

    pub fn set_strategy(&self, kind: StrategyKind) {
        let strategy = self.build_strategy(kind);
        *self.strategy.lock().unwrap_or_else(|e| e.into_inner()) = strategy;
        log::info!("Agent strategy set to {}", kind);
    }

    pub fn start(self: &Arc<Self>, kind: StrategyKind) -> bool {
        if self.shared.status() != AgentStatus::Stopped {
            log::warn!("Agent start ignored: status is {}", self.shared.status());
            return false;
        }
        self.shared.set_status(AgentStatus::Starting);
        self.set_strategy(kind);
        self.shared.heartbeat(crate::current_timestamp());

        let agent = Arc::clone(self);
        let handle = tokio::spawn(async move {
            agent.run_loop().await;
        });
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        self.shared.set_status(AgentStatus::Running);
        log::info!("Agent loop started with {} strategy", kind);
        true
    }

    pub fn pause(&self) -> bool {
        if self.shared.status() == AgentStatus::Running {
            self.shared.set_status(AgentStatus::Paused);
            log::info!("Agent paused");
            return true;
        }
        false
    }

    pub fn resume(&self) -> bool {
        if self.shared.status() == AgentStatus::Paused {
            self.shared.set_status(AgentStatus::Running);
            log::info!("Agent resumed");
            return true;
        }
        false
    }

    /// Stops the loop, waiting at most two periods before force-aborting
    /// the task.
    pub async fn stop(&self) {
        let status = self.shared.status();
        if status == AgentStatus::Stopped || status == AgentStatus::Stopping {
            return;
        }
        self.shared.set_status(AgentStatus::Stopping);

        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let grace = Duration::from_secs_f64(self.config.loop_interval_s * 2.0);
            let abort = handle.abort_handle();
            if tokio::time::timeout(grace, handle).await.is_err() {
                log::warn!("Agent loop did not stop in time; aborting task");
                abort.abort();
            }
        }
        self.shared.set_status(AgentStatus::Stopped);
        log::info!("Agent stopped");
    }

    async fn run_loop(self: Arc<Self>) {
        let period = Duration::from_secs_f64(self.config.loop_interval_s);
        let mut ticker = tokio::time::interval(period);
        // Overrun ticks fire immediately and then realign.
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);

        loop {
            ticker.tick().await;
            match self.shared.status() {
                AgentStatus::Stopping | AgentStatus::Stopped => break,
                AgentStatus::Paused => {
                    // Still alive: keep the heartbeat fresh for the watchdog.
                    self.shared.heartbeat(crate::current_timestamp());
                    continue;
                }
                _ => {}
            }

            let started = Instant::now();
            self.run_tick(crate::current_timestamp());
            let elapsed = started.elapsed().as_secs_f64();
            if elapsed > self.config.loop_interval_s * 1.5 {
                log::warn!(
                    "Agent tick overran its period: {:.0}ms",
                    elapsed * 1000.0
                );
            }
        }
    }

    /// One full cycle. Public for tests driving a synthetic clock.
    pub fn run_tick(&self, now: f64) {
        let tick_started = Instant::now();
        let tick = self.shared.tick_seq.fetch_add(1, Ordering::Relaxed) + 1;

        // === 1. Perceive ===
        let mut state = self.perception.perceive(tick, now);
        self.shared.heartbeat(now);

        let strategy = {
            let guard = self.strategy.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(&*guard)
        };

        // === 2. Predict (optional) ===
        if strategy.kind() == StrategyKind::Rl {
            self.fill_forecasts(&mut state, now);
        }

        // === 3. Decide ===
        let decision_started = Instant::now();
        let decisions = self.decide(&strategy, &state, now);
        let decision_ms = decision_started.elapsed().as_secs_f64() * 1000.0;

        // === 4. Act ===
        let outcome = self.action.execute(&decisions, now);

        // === 5. Monitor ===
        self.track_idle_ticks(&state, outcome);
        let loop_ms = tick_started.elapsed().as_secs_f64() * 1000.0;
        let summary = {
            let mut monitoring = self.monitoring.lock().unwrap_or_else(|e| e.into_inner());
            monitoring.record_tick(loop_ms, decision_ms, outcome);
            monitoring.summary()
        };

        self.persist_agent_log(tick, now, &state, &decisions, decision_ms, &summary);
    }

    fn decide(
        &self,
        strategy: &Arc<dyn DecisionStrategy>,
        state: &PerceivedState,
        now: f64,
    ) -> AgentDecisions {
        if state.mode == SystemMode::Emergency || state.emergency_active {
            return AgentDecisions {
                decisions: Vec::new(),
                emergency_override: true,
            };
        }
        if !state.decisions_allowed {
            return hold_all(state, strategy.kind());
        }
        match strategy.decide(state) {
            Ok(decisions) => decisions,
            Err(e) => {
                // Strategy failure abandons the tick; the agent continues.
                log::error!("Decision strategy failed: {}", e);
                self.monitoring
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record_error();
                self.emitter.emit_system_event(
                    "STRATEGY_FAILURE",
                    EventSeverity::Warning,
                    e,
                    now,
                );
                AgentDecisions::default()
            }
        }
    }

    /// Junction risk for the top-K congested junctions: the worst
    /// predicted density across each junction's approach roads.
    fn fill_forecasts(&self, state: &mut PerceivedState, now: f64) {
        let top = state.top_congested_junctions(self.config.predict_top_k);
        let tracker = self.tracker.read().unwrap_or_else(|e| e.into_inner());
        for junction_id in top {
            let junction = match self.network.junction(&junction_id) {
                Some(junction) => junction,
                None => continue,
            };
            let mut worst: f64 = 0.0;
            for direction in Direction::ALL {
                if let Some(road_id) = junction.connected_roads.get(direction) {
                    let history = tracker.get_history(road_id, 300, now);
                    if let Some(prediction) = self.engine.predict(road_id, &history, now) {
                        for (_, density) in prediction.predictions {
                            worst = worst.max(density);
                        }
                    }
                }
            }
            state.forecast_risk.insert(junction_id, worst);
        }
    }

    fn track_idle_ticks(&self, state: &PerceivedState, outcome: ActionOutcome) {
        let attempted = outcome.admitted + outcome.rejected;
        let counts = state.mode == SystemMode::Normal && state.decisions_allowed;
        if counts && attempted > 0 && outcome.admitted == 0 {
            let idle = self.shared.idle_ticks.fetch_add(1, Ordering::Relaxed) + 1;
            if idle == self.config.idle_tick_warning {
                log::warn!("{} consecutive ticks with no admitted actions", idle);
                self.emitter.emit_system_event(
                    "AGENT_IDLE",
                    EventSeverity::Warning,
                    format!("{} consecutive ticks with no admitted actions", idle),
                    state.timestamp,
                );
            }
        } else {
            self.shared.idle_ticks.store(0, Ordering::Relaxed);
        }
    }

    fn persist_agent_log(
        &self,
        tick: u64,
        now: f64,
        state: &PerceivedState,
        decisions: &AgentDecisions,
        decision_ms: f64,
        summary: &crate::agent::monitoring::MonitoringSummary,
    ) {
        let decisions_json =
            serde_json::to_string(&decisions.decisions).unwrap_or_else(|_| "[]".to_string());
        let total_vehicles: u32 = state
            .junction_densities
            .values()
            .map(|d| d.total_vehicles)
            .sum();
        let max_density = state
            .junction_densities
            .values()
            .map(|d| d.max_density)
            .fold(0.0, f64::max);
        let state_summary = serde_json::json!({
            "tick": tick,
            "junctions": state.junction_order.len(),
            "totalVehicles": total_vehicles,
            "maxDensity": max_density,
            "emergency": state.emergency_active,
            "successRate": summary.action_success_rate,
        });

        self.gateway.insert_agent_log(AgentLogRow {
            id: tick,
            timestamp: now,
            mode: state.mode.to_string(),
            strategy: self
                .strategy
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .kind()
                .to_string(),
            decision_latency_ms: decision_ms,
            decisions_json,
            state_summary_json: state_summary.to_string(),
            created_at: created_at_stamp(),
        });
    }

    pub fn monitoring_summary(&self) -> crate::agent::monitoring::MonitoringSummary {
        self.monitoring.lock().unwrap_or_else(|e| e.into_inner()).summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DensityConfig};
    use crate::control_system::signal_actuator::{SignalActuator, SimulatedActuator};
    use crate::density::DensitySource;
    use crate::models::junction::SignalColor;
    use crate::models::network::create_default_network;
    use crate::models::vehicle::{VehicleObservation, VehicleType};
    use crate::prediction::engine::PredictionEngine;

    fn observation(road_id: &str, n: usize) -> VehicleObservation {
        VehicleObservation {
            vehicle_id: format!("v-{}", n),
            number_plate: format!("KA-{:04}", n),
            road_id: road_id.to_string(),
            x: 0.0,
            y: 0.0,
            speed: 30.0,
            vehicle_type: VehicleType::Car,
        }
    }

    fn build_agent(tag: &str) -> (Arc<AgentLoop>, Arc<SafetyKernel>, std::path::PathBuf) {
        let config = Config::default();
        let network = Arc::new(create_default_network());
        let actuator = Arc::new(SimulatedActuator::new(&network, 0.0));
        let emitter = Arc::new(EventEmitter::new(256));
        let kernel = Arc::new(
            SafetyKernel::new(&config.safety, actuator, emitter.clone(), 0.0).unwrap(),
        );
        let mut tracker = DensityTracker::new(&DensityConfig::default(), DensitySource::Simulation);
        tracker.initialize_roads(&network);
        let tracker = Arc::new(RwLock::new(tracker));

        let dir = std::env::temp_dir().join(format!("ti-agent-{}-{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let gateway = Arc::new(PersistenceGateway::new(&dir).unwrap());

        let agent = Arc::new(AgentLoop::new(
            config.agent.clone(),
            kernel.clone(),
            tracker.clone(),
            network,
            Arc::new(PredictionEngine::new(&config.prediction)),
            gateway,
            emitter,
        ));
        (agent, kernel, dir)
    }

    fn load_road(kernel: &Arc<SafetyKernel>, agent: &Arc<AgentLoop>, road: &str, count: usize, now: f64) {
        let vehicles: Vec<VehicleObservation> =
            (0..count).map(|n| observation(road, n)).collect();
        agent
            .tracker
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .update(&vehicles, now);
        let _ = kernel;
    }

    #[tokio::test]
    async fn tick_switches_signal_toward_congested_road() {
        let (agent, kernel, dir) = build_agent("switch");
        // Load J-1's eastbound road; J-1 starts with North GREEN (since 0).
        load_road(&kernel, &agent, "R-1-2", 35, 100.0);

        agent.shared.set_status(AgentStatus::Running);
        agent.set_strategy(StrategyKind::RuleBased);
        agent.run_tick(100.0);

        let signals = kernel.actuator().signals("J-1").unwrap();
        assert_eq!(signals.east.current, SignalColor::Green);
        assert_eq!(signals.north.current, SignalColor::Red);
        assert_eq!(agent.health().last_tick_timestamp(), 100.0);

        let summary = agent.monitoring_summary();
        assert_eq!(summary.ticks, 1);
        assert!(summary.actions_admitted >= 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn fail_safe_tick_only_holds() {
        let (agent, kernel, dir) = build_agent("failsafe");
        load_road(&kernel, &agent, "R-1-2", 35, 100.0);
        kernel.enter_fail_safe("test", 100.0);

        agent.shared.set_status(AgentStatus::Running);
        agent.run_tick(101.0);

        // No junction got a GREEN: the safe pattern holds.
        for junction_id in kernel.actuator().junction_ids() {
            let signals = kernel.actuator().signals(&junction_id).unwrap();
            assert!(signals.green_directions().is_empty());
        }
        assert_eq!(agent.monitoring_summary().actions_admitted, 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn emergency_mode_sets_override_flag_and_skips_actions() {
        let (agent, kernel, dir) = build_agent("emergency");
        load_road(&kernel, &agent, "R-1-2", 35, 100.0);
        kernel.activate_emergency_corridor("C-1", 100.0);

        agent.shared.set_status(AgentStatus::Running);
        agent.run_tick(101.0);

        // North is still GREEN from startup: the agent did not act.
        let signals = kernel.actuator().signals("J-1").unwrap();
        assert_eq!(signals.north.current, SignalColor::Green);
        assert_eq!(agent.monitoring_summary().actions_admitted, 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn start_and_stop_transition_status() {
        let (agent, _kernel, dir) = build_agent("lifecycle");
        assert_eq!(agent.status(), AgentStatus::Stopped);
        assert!(agent.start(StrategyKind::RuleBased));
        assert_eq!(agent.status(), AgentStatus::Running);
        assert!(!agent.start(StrategyKind::RuleBased));

        assert!(agent.pause());
        assert_eq!(agent.status(), AgentStatus::Paused);
        assert!(agent.resume());

        agent.stop().await;
        assert_eq!(agent.status(), AgentStatus::Stopped);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
