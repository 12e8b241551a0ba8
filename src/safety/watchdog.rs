// watchdog.rs

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::WatchdogConfig;
use crate::control_system::signal_actuator::SignalActuator;
use crate::events::{EventEmitter, EventSeverity};
use crate::safety::system_modes::SystemMode;
use crate::safety::SafetyKernel;

/// Read-only view of the agent's health, implemented by the agent loop.
/// The watchdog never touches the concrete agent.
pub trait AgentHealth: Send + Sync {
    /// Timestamp of the last completed tick (the heartbeat).
    fn last_tick_timestamp(&self) -> f64;
    /// True while the loop task is running (RUNNING or PAUSED).
    fn is_running(&self) -> bool;
    /// Consecutive ticks with no admitted actions.
    fn idle_ticks(&self) -> u64;
    /// Threshold at which idle ticks escalate.
    fn max_idle_ticks(&self) -> u64;
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub healthy: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub running: bool,
    pub healthy: bool,
    pub checks_run: u64,
    pub checks: Vec<CheckResult>,
}

/// Independent periodic health monitor. Inspects the agent heartbeat, the
/// actuator, signal-conflict state, and mode coherence; hard violations
/// push the system into fail-safe.
pub struct Watchdog {
    kernel: Arc<SafetyKernel>,
    agent: Arc<dyn AgentHealth>,
    emitter: Arc<EventEmitter>,
    interval: f64,
    max_agent_lag: f64,
    max_actuator_lag: f64,
    check_budget: Duration,
    running: AtomicBool,
    checks_run: AtomicU64,
    last_results: Mutex<Vec<CheckResult>>,
}

impl Watchdog {
    pub fn new(
        config: &WatchdogConfig,
        kernel: Arc<SafetyKernel>,
        agent: Arc<dyn AgentHealth>,
        emitter: Arc<EventEmitter>,
    ) -> Self {
        Self {
            kernel,
            agent,
            emitter,
            interval: config.interval_s,
            max_agent_lag: config.max_agent_lag_s,
            max_actuator_lag: config.max_actuator_lag_s,
            check_budget: Duration::from_millis(config.check_budget_ms),
            running: AtomicBool::new(false),
            checks_run: AtomicU64::new(0),
            last_results: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the periodic check loop.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let watchdog = Arc::clone(self);
        watchdog.running.store(true, Ordering::SeqCst);
        let period = Duration::from_secs_f64(watchdog.interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !watchdog.running.load(Ordering::SeqCst) {
                    break;
                }
                watchdog.run_checks_once(crate::current_timestamp());
            }
            log::info!("Watchdog stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// One full round of health checks. Public so tests can drive the
    /// watchdog with a synthetic clock.
    pub fn run_checks_once(&self, now: f64) {
        let started = Instant::now();
        let mut results = Vec::with_capacity(4);

        results.push(self.check_agent_heartbeat(now));
        results.push(self.check_actuator(now));

        // Each check carries a budget; skip the rest of the round rather
        // than overrun the watchdog period.
        if started.elapsed() < self.check_budget * 2 {
            results.push(self.check_conflicts(now));
        }
        if started.elapsed() < self.check_budget * 3 {
            results.push(self.check_mode_coherence(now));
        }

        for result in &results {
            if !result.healthy {
                log::warn!("Health check failed [{}]: {}", result.name, result.detail);
                self.emitter.emit_system_event(
                    "HEALTH_CHECK",
                    EventSeverity::Warning,
                    format!("{}: {}", result.name, result.detail),
                    now,
                );
            }
        }

        self.checks_run.fetch_add(1, Ordering::Relaxed);
        *self.last_results.lock().unwrap_or_else(|e| e.into_inner()) = results;

        let elapsed = started.elapsed();
        if elapsed > self.check_budget * 4 {
            log::warn!("Watchdog round overran budget: {:?}", elapsed);
        }
    }

    fn check_agent_heartbeat(&self, now: f64) -> CheckResult {
        if !self.agent.is_running() {
            return CheckResult {
                name: "agent_heartbeat".to_string(),
                healthy: true,
                detail: "agent not running".to_string(),
            };
        }

        let lag = now - self.agent.last_tick_timestamp();
        if lag > self.max_agent_lag {
            self.kernel.enter_fail_safe("agent unresponsive", now);
            return CheckResult {
                name: "agent_heartbeat".to_string(),
                healthy: false,
                detail: format!("heartbeat lag {:.1}s exceeds {:.1}s", lag, self.max_agent_lag),
            };
        }

        // Escalate an agent that keeps ticking but never lands an action.
        if self.kernel.current_mode() == SystemMode::Normal
            && self.kernel.agent_decisions_allowed(now)
            && self.agent.idle_ticks() >= self.agent.max_idle_ticks()
        {
            self.kernel
                .enter_fail_safe("agent produced no admitted actions", now);
            return CheckResult {
                name: "agent_heartbeat".to_string(),
                healthy: false,
                detail: format!("{} consecutive idle ticks", self.agent.idle_ticks()),
            };
        }

        CheckResult {
            name: "agent_heartbeat".to_string(),
            healthy: true,
            detail: format!("lag {:.1}s", lag),
        }
    }

    fn check_actuator(&self, now: f64) -> CheckResult {
        let lag = now - self.kernel.actuator().last_ack();
        // The actuator only acks on commands; tolerate quiet periods while
        // the agent is stopped.
        if self.agent.is_running() && lag > self.max_actuator_lag + self.max_agent_lag {
            self.kernel.enter_fail_safe("actuator unresponsive", now);
            return CheckResult {
                name: "actuator".to_string(),
                healthy: false,
                detail: format!("last ack {:.1}s ago", lag),
            };
        }
        CheckResult {
            name: "actuator".to_string(),
            healthy: true,
            detail: format!("last ack {:.1}s ago", lag),
        }
    }

    fn check_conflicts(&self, now: f64) -> CheckResult {
        let violations = self.kernel.sweep_conflicts(now);
        if !violations.is_empty() {
            self.kernel
                .enter_fail_safe(&format!("conflict sweep: {}", violations[0]), now);
            return CheckResult {
                name: "conflict_sweep".to_string(),
                healthy: false,
                detail: violations.join("; "),
            };
        }
        CheckResult {
            name: "conflict_sweep".to_string(),
            healthy: true,
            detail: "no conflicts".to_string(),
        }
    }

    fn check_mode_coherence(&self, now: f64) -> CheckResult {
        if self.kernel.current_mode() == SystemMode::Emergency {
            if let Some(idle) = self.kernel.emergency_idle_seconds(now) {
                if idle > self.kernel.emergency_idle_revert() {
                    self.kernel
                        .change_mode(SystemMode::Normal, "no active emergency corridor", now);
                    return CheckResult {
                        name: "mode_coherence".to_string(),
                        healthy: false,
                        detail: format!("EMERGENCY idle for {:.0}s, reverted to NORMAL", idle),
                    };
                }
            }
        }
        CheckResult {
            name: "mode_coherence".to_string(),
            healthy: true,
            detail: "coherent".to_string(),
        }
    }

    pub fn get_health_status(&self) -> HealthStatus {
        let checks = self
            .last_results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        HealthStatus {
            running: self.running.load(Ordering::SeqCst),
            healthy: checks.iter().all(|c| c.healthy),
            checks_run: self.checks_run.load(Ordering::Relaxed),
            checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyConfig;
    use crate::control_system::signal_actuator::{SignalActuator, SimulatedActuator};
    use crate::models::junction::{Direction, SignalColor};
    use crate::models::network::create_default_network;

    struct FakeAgent {
        last_tick: Mutex<f64>,
        running: bool,
        idle: u64,
    }

    impl AgentHealth for FakeAgent {
        fn last_tick_timestamp(&self) -> f64 {
            *self.last_tick.lock().unwrap()
        }
        fn is_running(&self) -> bool {
            self.running
        }
        fn idle_ticks(&self) -> u64 {
            self.idle
        }
        fn max_idle_ticks(&self) -> u64 {
            10
        }
    }

    fn setup(agent: FakeAgent) -> (Arc<SafetyKernel>, Watchdog) {
        let network = create_default_network();
        let actuator: Arc<SimulatedActuator> = Arc::new(SimulatedActuator::new(&network, 0.0));
        let emitter = Arc::new(EventEmitter::new(64));
        let kernel = Arc::new(
            SafetyKernel::new(&SafetyConfig::default(), actuator, emitter.clone(), 0.0).unwrap(),
        );
        let watchdog = Watchdog::new(
            &WatchdogConfig::default(),
            kernel.clone(),
            Arc::new(agent),
            emitter,
        );
        (kernel, watchdog)
    }

    #[test]
    fn stale_heartbeat_triggers_fail_safe() {
        let (kernel, watchdog) = setup(FakeAgent {
            last_tick: Mutex::new(10.0),
            running: true,
            idle: 0,
        });
        // Keep the actuator fresh so only the heartbeat check fires.
        kernel
            .actuator()
            .set_signal("J-1", Direction::North, SignalColor::Green, 30.0, 16.0)
            .unwrap();
        watchdog.run_checks_once(16.0);
        assert_eq!(kernel.current_mode(), SystemMode::FailSafe);
        let reasons = kernel.transition_history(5);
        assert!(reasons.last().unwrap().reason.contains("agent unresponsive"));
    }

    #[test]
    fn fresh_heartbeat_stays_normal() {
        let (kernel, watchdog) = setup(FakeAgent {
            last_tick: Mutex::new(15.0),
            running: true,
            idle: 0,
        });
        kernel
            .actuator()
            .set_signal("J-1", Direction::North, SignalColor::Green, 30.0, 16.0)
            .unwrap();
        watchdog.run_checks_once(16.0);
        assert_eq!(kernel.current_mode(), SystemMode::Normal);
        assert!(watchdog.get_health_status().healthy);
    }

    #[test]
    fn conflict_sweep_triggers_fail_safe() {
        let (kernel, watchdog) = setup(FakeAgent {
            last_tick: Mutex::new(16.0),
            running: true,
            idle: 0,
        });
        // Fabricate a double-GREEN directly on the actuator.
        kernel
            .actuator()
            .set_signal("J-2", Direction::North, SignalColor::Green, 30.0, 15.0)
            .unwrap();
        kernel
            .actuator()
            .set_signal("J-2", Direction::East, SignalColor::Green, 30.0, 16.0)
            .unwrap();
        watchdog.run_checks_once(16.0);
        assert_eq!(kernel.current_mode(), SystemMode::FailSafe);
    }

    #[test]
    fn idle_emergency_reverts_to_normal() {
        let (kernel, watchdog) = setup(FakeAgent {
            last_tick: Mutex::new(100.0),
            running: true,
            idle: 0,
        });
        kernel.activate_emergency_corridor("C-9", 0.0);
        kernel.clear_emergency_corridor(10.0);
        kernel
            .actuator()
            .set_signal("J-1", Direction::North, SignalColor::Green, 30.0, 100.0)
            .unwrap();
        watchdog.run_checks_once(100.0);
        assert_eq!(kernel.current_mode(), SystemMode::Normal);
    }
}
