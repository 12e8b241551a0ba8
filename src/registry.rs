// registry.rs
//
// Explicit service registry: every subsystem is constructed here in
// dependency order, handed its collaborators, and torn down in reverse
// on shutdown. No hidden global state.

use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::agent::runner::AgentLoop;
use crate::config::Config;
use crate::control_system::signal_actuator::{SignalActuator, SimulatedActuator};
use crate::density::tracker::DensityTracker;
use crate::density::DensitySource;
use crate::detection::logger::DetectionLogger;
use crate::events::{EventEmitter, EventSeverity, SystemEventMessage};
use crate::feed::simulation_feed::SimulationFeed;
use crate::incident::inference::IncidentInferenceEngine;
use crate::models::network::{JunctionGraph, NetworkJunctionGraph, RoadNetwork};
use crate::persistence::gateway::PersistenceGateway;
use crate::persistence::tables::{created_at_stamp, SystemEventRow, TrafficHistoryRow};
use crate::prediction::broadcast::PredictionBroadcastService;
use crate::prediction::classifier::CongestionClassifier;
use crate::prediction::engine::PredictionEngine;
use crate::safety::watchdog::Watchdog;
use crate::safety::SafetyKernel;

pub struct ServiceRegistry {
    pub config: Config,
    pub network: Arc<RoadNetwork>,
    pub emitter: Arc<EventEmitter>,
    pub gateway: Arc<PersistenceGateway>,
    pub tracker: Arc<RwLock<DensityTracker>>,
    pub actuator: Arc<SimulatedActuator>,
    pub detection_logger: Arc<DetectionLogger>,
    pub kernel: Arc<SafetyKernel>,
    pub prediction_engine: Arc<PredictionEngine>,
    pub broadcast: Arc<PredictionBroadcastService>,
    pub agent: Arc<AgentLoop>,
    pub incidents: Arc<IncidentInferenceEngine>,
    pub watchdog: Arc<Watchdog>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ServiceRegistry {
    /// Builds the whole control plane. Returns Err on unrecoverable
    /// startup failures (persistence unavailable, safety self-check).
    pub fn start(config: Config, network: RoadNetwork) -> Result<Arc<Self>, String> {
        let now = crate::current_timestamp();
        let network = Arc::new(network);

        let emitter = Arc::new(EventEmitter::new(1024));
        let gateway = Arc::new(
            PersistenceGateway::new(Path::new(&config.persistence.data_dir))
                .map_err(|e| format!("persistence init failed: {}", e))?,
        );

        let mut tracker = DensityTracker::new(&config.density, DensitySource::Simulation);
        tracker.initialize_roads(&network);
        let tracker = Arc::new(RwLock::new(tracker));

        let actuator = Arc::new(SimulatedActuator::new(&network, now));
        let detection_logger = Arc::new(DetectionLogger::new(
            config.detection.clone(),
            Arc::clone(&gateway),
            Arc::clone(&emitter),
        ));

        let kernel = Arc::new(SafetyKernel::new(
            &config.safety,
            Arc::clone(&actuator) as Arc<dyn SignalActuator>,
            Arc::clone(&emitter),
            now,
        )?);

        let prediction_engine = Arc::new(PredictionEngine::new(&config.prediction));
        let classifier = Arc::new(Mutex::new(CongestionClassifier::new(&config.prediction)));
        let broadcast = Arc::new(PredictionBroadcastService::new(
            &config.prediction,
            Arc::clone(&tracker),
            Arc::clone(&prediction_engine),
            classifier,
            Arc::clone(&emitter),
        ));

        let agent = Arc::new(AgentLoop::new(
            config.agent.clone(),
            Arc::clone(&kernel),
            Arc::clone(&tracker),
            Arc::clone(&network),
            Arc::clone(&prediction_engine),
            Arc::clone(&gateway),
            Arc::clone(&emitter),
        ));

        let graph: Arc<dyn JunctionGraph> =
            Arc::new(NetworkJunctionGraph::from_network(&network));
        let incidents = Arc::new(IncidentInferenceEngine::new(
            Arc::clone(&gateway),
            Some(graph),
            config.incident.clone(),
        ));

        let watchdog = Arc::new(Watchdog::new(
            &config.watchdog,
            Arc::clone(&kernel),
            agent.health(),
            Arc::clone(&emitter),
        ));

        let registry = Arc::new(Self {
            config,
            network,
            emitter,
            gateway,
            tracker,
            actuator,
            detection_logger,
            kernel,
            prediction_engine,
            broadcast,
            agent,
            incidents,
            watchdog,
            tasks: Mutex::new(Vec::new()),
        });

        registry.spawn_background_tasks();
        registry.emitter.emit_system_event(
            "STARTUP",
            EventSeverity::Info,
            "Control plane started".to_string(),
            now,
        );
        Ok(registry)
    }

    fn spawn_background_tasks(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(self.detection_logger.start());
        tasks.push(self.broadcast.start());
        tasks.push(self.watchdog.start());
        tasks.push(self.spawn_event_recorder());
        tasks.push(self.spawn_history_sampler());
    }

    /// Drives the simulation feed: tracker updates, detections, vehicle
    /// and density telemetry, red-light violations.
    pub fn spawn_simulation_feed(self: &Arc<Self>, spawn_per_tick: usize, max_vehicles: usize) {
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut feed = SimulationFeed::new(
                Arc::clone(&registry.network),
                spawn_per_tick,
                max_vehicles,
            );
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut challan_seq: u64 = 0;

            loop {
                ticker.tick().await;
                let now = crate::current_timestamp();
                let output = feed.tick(now, registry.actuator.as_ref());

                {
                    let mut tracker =
                        registry.tracker.write().unwrap_or_else(|e| e.into_inner());
                    tracker.update(&output.observations, now);
                }

                for detection in output.detections {
                    registry.detection_logger.log_detection(detection);
                }

                for (number_plate, junction_id) in output.violations {
                    registry.emitter.emit(SystemEventMessage::ViolationDetected {
                        number_plate: number_plate.clone(),
                        junction_id: junction_id.clone(),
                        violation_type: "RED_LIGHT".to_string(),
                        timestamp: now,
                    });
                    challan_seq += 1;
                    registry.emitter.emit(SystemEventMessage::ChallanIssued {
                        challan_id: format!("CHL-{:06}", challan_seq),
                        number_plate,
                        amount: 500.0,
                        timestamp: now,
                    });
                }

                registry.emitter.emit(SystemEventMessage::VehicleUpdate {
                    total_vehicles: output.observations.len(),
                    timestamp: now,
                });
                let metrics = {
                    let tracker = registry.tracker.read().unwrap_or_else(|e| e.into_inner());
                    tracker.get_city_metrics(now)
                };
                registry.emitter.emit(SystemEventMessage::DensityUpdate {
                    metrics,
                    timestamp: now,
                });
            }
        });
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
    }

    /// Persists the durable slice of the event stream as system_events.
    fn spawn_event_recorder(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let gateway = Arc::clone(&self.gateway);
        let mut rx = self.emitter.subscribe();
        tokio::spawn(async move {
            let mut seq: u64 = 0;
            loop {
                let message = match rx.recv().await {
                    Ok(message) => message,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Event recorder lagged; {} events not persisted", n);
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                let (event_type, severity, text, timestamp) = match &message {
                    SystemEventMessage::ModeChanged { from, to, reason, timestamp, .. } => (
                        "MODE_CHANGE",
                        EventSeverity::Info,
                        format!("{} -> {}: {}", from, to, reason),
                        *timestamp,
                    ),
                    SystemEventMessage::FailSafe { reason, timestamp, .. } => (
                        "FAIL_SAFE",
                        EventSeverity::Critical,
                        reason.clone(),
                        *timestamp,
                    ),
                    SystemEventMessage::EmergencyActivated { corridor, timestamp } => (
                        "EMERGENCY",
                        EventSeverity::Warning,
                        format!("Corridor {} activated", corridor),
                        *timestamp,
                    ),
                    SystemEventMessage::ViolationDetected {
                        number_plate,
                        junction_id,
                        violation_type,
                        timestamp,
                    } => (
                        "VIOLATION",
                        EventSeverity::Warning,
                        format!("{} by {} at {}", violation_type, number_plate, junction_id),
                        *timestamp,
                    ),
                    SystemEventMessage::ChallanIssued { challan_id, number_plate, timestamp, .. } => (
                        "CHALLAN",
                        EventSeverity::Info,
                        format!("{} issued to {}", challan_id, number_plate),
                        *timestamp,
                    ),
                    SystemEventMessage::SystemEvent {
                        event_type,
                        severity,
                        message,
                        timestamp,
                    } => (event_type.as_str(), *severity, message.clone(), *timestamp),
                    // High-frequency telemetry is not persisted.
                    _ => continue,
                };

                seq += 1;
                let metadata = serde_json::to_string(&message).unwrap_or_default();
                gateway.insert_system_event(SystemEventRow {
                    id: seq,
                    timestamp,
                    event_type: event_type.to_string(),
                    severity: severity.to_string(),
                    message: text,
                    metadata_json: metadata,
                    created_at: created_at_stamp(),
                });
            }
        })
    }

    /// Samples road densities into traffic_history and enforces its
    /// retention window.
    fn spawn_history_sampler(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(&self.tracker);
        let gateway = Arc::clone(&self.gateway);
        let interval_s = self.config.persistence.history_sample_interval_s;
        let retention_s = self.config.persistence.history_retention_hours as f64 * 3600.0;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs_f64(interval_s));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut seq: u64 = 0;
            let mut samples_since_purge: u32 = 0;

            loop {
                ticker.tick().await;
                let now = crate::current_timestamp();
                let rows: Vec<TrafficHistoryRow> = {
                    let tracker = tracker.read().unwrap_or_else(|e| e.into_inner());
                    tracker
                        .road_densities()
                        .values()
                        .map(|data| {
                            seq += 1;
                            TrafficHistoryRow {
                                id: seq,
                                road_id: data.road_id.clone(),
                                congestion_level: data.classification.to_string(),
                                current_speed: None,
                                vehicle_count: Some(data.vehicle_count),
                                density_score: Some(data.density_score),
                                timestamp: now,
                                source: data.source.to_string(),
                                created_at: created_at_stamp(),
                            }
                        })
                        .collect()
                };
                gateway.insert_traffic_history(rows);

                samples_since_purge += 1;
                if samples_since_purge >= 120 {
                    samples_since_purge = 0;
                    gateway.purge_traffic_history(now - retention_s);
                }
            }
        })
    }

    /// Ordered shutdown, reverse of construction.
    pub async fn shutdown(&self) {
        let now = crate::current_timestamp();
        log::info!("Shutting down control plane");

        self.agent.stop().await;
        self.watchdog.stop();
        self.broadcast.stop();
        self.detection_logger.stop().await;

        self.emitter.emit_system_event(
            "SHUTDOWN",
            EventSeverity::Info,
            "Control plane stopped".to_string(),
            now,
        );
        // Give the recorder a beat before the remaining tasks go away.
        tokio::time::sleep(Duration::from_millis(50)).await;
        for task in self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            task.abort();
        }
        self.gateway.flush_and_stop();
        log::info!("Shutdown complete");
    }
}
