// monitoring.rs

use std::collections::VecDeque;

use serde::Serialize;

use crate::agent::action::ActionOutcome;

const LATENCY_WINDOW: usize = 120;

/// Per-tick health counters for the agent loop.
#[derive(Debug)]
pub struct MonitoringModule {
    loop_latencies_ms: VecDeque<f64>,
    decision_latencies_ms: VecDeque<f64>,
    ticks: u64,
    errors: u64,
    actions_admitted: u64,
    actions_rejected: u64,
    actions_held: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringSummary {
    pub ticks: u64,
    pub errors: u64,
    pub actions_admitted: u64,
    pub actions_rejected: u64,
    pub actions_held: u64,
    pub action_success_rate: f64,
    pub avg_loop_latency_ms: f64,
    pub avg_decision_latency_ms: f64,
}

impl MonitoringModule {
    pub fn new() -> Self {
        Self {
            loop_latencies_ms: VecDeque::new(),
            decision_latencies_ms: VecDeque::new(),
            ticks: 0,
            errors: 0,
            actions_admitted: 0,
            actions_rejected: 0,
            actions_held: 0,
        }
    }

    pub fn record_tick(&mut self, loop_ms: f64, decision_ms: f64, outcome: ActionOutcome) {
        if self.loop_latencies_ms.len() == LATENCY_WINDOW {
            self.loop_latencies_ms.pop_front();
        }
        self.loop_latencies_ms.push_back(loop_ms);
        if self.decision_latencies_ms.len() == LATENCY_WINDOW {
            self.decision_latencies_ms.pop_front();
        }
        self.decision_latencies_ms.push_back(decision_ms);

        self.ticks += 1;
        self.actions_admitted += outcome.admitted as u64;
        self.actions_rejected += outcome.rejected as u64;
        self.actions_held += outcome.held as u64;
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    fn average(values: &VecDeque<f64>) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }

    pub fn summary(&self) -> MonitoringSummary {
        let attempted = self.actions_admitted + self.actions_rejected;
        MonitoringSummary {
            ticks: self.ticks,
            errors: self.errors,
            actions_admitted: self.actions_admitted,
            actions_rejected: self.actions_rejected,
            actions_held: self.actions_held,
            action_success_rate: if attempted > 0 {
                self.actions_admitted as f64 / attempted as f64
            } else {
                1.0
            },
            avg_loop_latency_ms: Self::average(&self.loop_latencies_ms),
            avg_decision_latency_ms: Self::average(&self.decision_latencies_ms),
        }
    }
}

impl Default for MonitoringModule {
    fn default() -> Self {
        Self::new()
    }
}
