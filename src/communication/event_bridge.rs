// event_bridge.rs
//
// Republishes control-plane events to RabbitMQ queues so external
// processes (the monitoring CLI, dashboards) can consume them. The
// blocking amiquip connection lives on its own blocking task; the async
// side forwards broadcast messages through a bounded channel.

use std::sync::Arc;

use amiquip::{Connection, Exchange, Publish, QueueDeclareOptions};
use tokio::sync::broadcast::error::RecvError;

use crate::events::{EventEmitter, SystemEventMessage};
use crate::global_variables::{
    ALL_QUEUES, QUEUE_DENSITY_UPDATES, QUEUE_PREDICTION_ALERTS, QUEUE_SIGNAL_CHANGES,
    QUEUE_SYSTEM_EVENTS,
};

fn queue_for(message: &SystemEventMessage) -> Option<&'static str> {
    match message {
        SystemEventMessage::SignalChange { .. } => Some(QUEUE_SIGNAL_CHANGES),
        SystemEventMessage::PredictionAlert { .. }
        | SystemEventMessage::PredictionUpdated { .. } => Some(QUEUE_PREDICTION_ALERTS),
        SystemEventMessage::ModeChanged { .. }
        | SystemEventMessage::FailSafe { .. }
        | SystemEventMessage::EmergencyActivated { .. }
        | SystemEventMessage::ViolationDetected { .. }
        | SystemEventMessage::ChallanIssued { .. }
        | SystemEventMessage::SystemEvent { .. } => Some(QUEUE_SYSTEM_EVENTS),
        SystemEventMessage::DensityUpdate { .. } | SystemEventMessage::VehicleUpdate { .. } => {
            Some(QUEUE_DENSITY_UPDATES)
        }
        SystemEventMessage::ConnectionAck { .. } => None,
    }
}

/// Starts the bridge. Returns immediately; the task runs until the
/// emitter closes or the broker connection dies.
pub fn start_event_bridge(
    emitter: Arc<EventEmitter>,
    amqp_url: String,
) -> tokio::task::JoinHandle<()> {
    let mut rx = emitter.subscribe();
    tokio::spawn(async move {
        let (tx, bridge_rx) = crossbeam_channel::bounded::<(&'static str, String)>(1024);

        let publisher = tokio::task::spawn_blocking(move || -> amiquip::Result<()> {
            let mut connection = Connection::insecure_open(&amqp_url)?;
            let channel = connection.open_channel(None)?;
            let exchange = Exchange::direct(&channel);
            for queue in ALL_QUEUES {
                channel.queue_declare(queue, QueueDeclareOptions::default())?;
            }
            log::info!("Event bridge connected to broker");
            for (queue, payload) in bridge_rx.iter() {
                exchange.publish(Publish::new(payload.as_bytes(), queue))?;
            }
            connection.close()
        });

        loop {
            match rx.recv().await {
                Ok(message) => {
                    let queue = match queue_for(&message) {
                        Some(queue) => queue,
                        None => continue,
                    };
                    let payload = match serde_json::to_string(&message) {
                        Ok(payload) => payload,
                        Err(e) => {
                            log::warn!("Event bridge serialization failed: {}", e);
                            continue;
                        }
                    };
                    // Drop on backpressure rather than stall the emitter.
                    if tx.try_send((queue, payload)).is_err() {
                        log::warn!("Event bridge queue full; dropping message");
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    log::warn!("Event bridge lagged; {} messages skipped", n);
                }
                Err(RecvError::Closed) => break,
            }
        }

        drop(tx);
        match publisher.await {
            Ok(Ok(())) => log::info!("Event bridge closed"),
            Ok(Err(e)) => log::error!("Event bridge broker error: {}", e),
            Err(e) => log::error!("Event bridge task error: {}", e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_routing_covers_operator_surface() {
        let message = SystemEventMessage::SystemEvent {
            event_type: "TEST".to_string(),
            severity: crate::events::EventSeverity::Info,
            message: "x".to_string(),
            timestamp: 0.0,
        };
        assert_eq!(queue_for(&message), Some(QUEUE_SYSTEM_EVENTS));

        let ack = SystemEventMessage::ConnectionAck {
            client_id: "c".to_string(),
            timestamp: 0.0,
        };
        assert_eq!(queue_for(&ack), None);
    }
}
