// events.rs
//
// Typed fan-out of state changes. Transport-agnostic: in-process consumers
// subscribe to the broadcast channel; the RabbitMQ bridge republishes the
// same messages to queues for external processes.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::FailSafePattern;
use crate::density::CityWideDensityMetrics;
use crate::models::junction::{Direction, JunctionId, SignalColor};
use crate::prediction::classifier::CongestionAlert;
use crate::prediction::broadcast::PredictionSummary;
use crate::safety::system_modes::SystemMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventSeverity::Info => "INFO",
            EventSeverity::Warning => "WARNING",
            EventSeverity::Error => "ERROR",
            EventSeverity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Every message the control plane can fan out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SystemEventMessage {
    ConnectionAck {
        client_id: String,
        timestamp: f64,
    },
    VehicleUpdate {
        total_vehicles: usize,
        timestamp: f64,
    },
    SignalChange {
        junction_id: JunctionId,
        direction: Direction,
        new_state: SignalColor,
        previous_state: SignalColor,
        duration: f64,
        timestamp: f64,
    },
    DensityUpdate {
        metrics: CityWideDensityMetrics,
        timestamp: f64,
    },
    EmergencyActivated {
        corridor: String,
        timestamp: f64,
    },
    ViolationDetected {
        number_plate: String,
        junction_id: JunctionId,
        violation_type: String,
        timestamp: f64,
    },
    ChallanIssued {
        challan_id: String,
        number_plate: String,
        amount: f64,
        timestamp: f64,
    },
    PredictionUpdated {
        predictions: Vec<PredictionSummary>,
        timestamp: f64,
    },
    PredictionAlert {
        alerts: Vec<CongestionAlert>,
        timestamp: f64,
    },
    ModeChanged {
        from: SystemMode,
        to: SystemMode,
        reason: String,
        operator_id: Option<String>,
        timestamp: f64,
    },
    FailSafe {
        reason: String,
        pattern: FailSafePattern,
        timestamp: f64,
    },
    SystemEvent {
        event_type: String,
        severity: EventSeverity,
        message: String,
        timestamp: f64,
    },
}

impl SystemEventMessage {
    /// The queue/topic name for the bridge, mirroring the event taxonomy.
    pub fn kind(&self) -> &'static str {
        match self {
            SystemEventMessage::ConnectionAck { .. } => "connection:ack",
            SystemEventMessage::VehicleUpdate { .. } => "vehicle:update",
            SystemEventMessage::SignalChange { .. } => "signal:change",
            SystemEventMessage::DensityUpdate { .. } => "density:update",
            SystemEventMessage::EmergencyActivated { .. } => "emergency:activated",
            SystemEventMessage::ViolationDetected { .. } => "violation:detected",
            SystemEventMessage::ChallanIssued { .. } => "challan:issued",
            SystemEventMessage::PredictionUpdated { .. } => "prediction:updated",
            SystemEventMessage::PredictionAlert { .. } => "prediction:alert",
            SystemEventMessage::ModeChanged { .. } => "system:mode_changed",
            SystemEventMessage::FailSafe { .. } => "safety:failsafe",
            SystemEventMessage::SystemEvent { .. } => "system:event",
        }
    }
}

/// Fan-out hub. Sends never block; a slow subscriber lags and loses old
/// messages, which is acceptable for transient telemetry.
pub struct EventEmitter {
    tx: broadcast::Sender<SystemEventMessage>,
    emitted: AtomicU64,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            emitted: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SystemEventMessage> {
        self.tx.subscribe()
    }

    pub fn emit(&self, message: SystemEventMessage) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        // Err here only means nobody is subscribed right now.
        let _ = self.tx.send(message);
    }

    pub fn emit_signal_change(
        &self,
        junction_id: &str,
        direction: Direction,
        new_state: SignalColor,
        previous_state: SignalColor,
        duration: f64,
        timestamp: f64,
    ) {
        self.emit(SystemEventMessage::SignalChange {
            junction_id: junction_id.to_string(),
            direction,
            new_state,
            previous_state,
            duration,
            timestamp,
        });
    }

    pub fn emit_system_event(
        &self,
        event_type: &str,
        severity: EventSeverity,
        message: String,
        timestamp: f64,
    ) {
        self.emit(SystemEventMessage::SystemEvent {
            event_type: event_type.to_string(),
            severity,
            message,
            timestamp,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn emitted_total(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitted_messages_reach_subscribers() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();
        emitter.emit_system_event("TEST", EventSeverity::Info, "hello".to_string(), 1.0);
        match rx.recv().await.unwrap() {
            SystemEventMessage::SystemEvent { severity, message, .. } => {
                assert_eq!(severity, EventSeverity::Info);
                assert_eq!(message, "hello");
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(emitter.emitted_total(), 1);
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(4);
        emitter.emit_system_event("TEST", EventSeverity::Warning, "noop".to_string(), 2.0);
        assert_eq!(emitter.emitted_total(), 1);
    }
}
