// broadcast.rs

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::PredictionConfig;
use crate::density::tracker::DensityTracker;
use crate::events::{EventEmitter, SystemEventMessage};
use crate::models::road::RoadId;
use crate::prediction::classifier::{CongestionAlert, CongestionClassifier, CongestionLevel};
use crate::prediction::engine::{CongestionPrediction, PredictionEngine};

/// Compact per-road forecast for fan-out frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub road_id: RoadId,
    pub current_density: f64,
    pub max_congestion_level: CongestionLevel,
    pub confidence: f64,
    pub horizons: Vec<HorizonForecast>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorizonForecast {
    pub minutes_ahead: u32,
    pub predicted_density: f64,
    pub congestion_level: CongestionLevel,
}

/// Periodic fan-out of fresh predictions and alerts on the event bus.
/// Newly generated alerts are pushed in the same round they appear.
pub struct PredictionBroadcastService {
    tracker: Arc<RwLock<DensityTracker>>,
    engine: Arc<PredictionEngine>,
    classifier: Arc<Mutex<CongestionClassifier>>,
    emitter: Arc<EventEmitter>,
    interval_s: f64,
    road_cap: usize,
    history_window_s: u64,
    running: AtomicBool,
    total_broadcasts: AtomicU64,
    total_alerts_sent: AtomicU64,
}

impl PredictionBroadcastService {
    pub fn new(
        config: &PredictionConfig,
        tracker: Arc<RwLock<DensityTracker>>,
        engine: Arc<PredictionEngine>,
        classifier: Arc<Mutex<CongestionClassifier>>,
        emitter: Arc<EventEmitter>,
    ) -> Self {
        Self {
            tracker,
            engine,
            classifier,
            emitter,
            interval_s: config.broadcast_interval_s,
            road_cap: config.broadcast_road_cap,
            history_window_s: 300,
            running: AtomicBool::new(false),
            total_broadcasts: AtomicU64::new(0),
            total_alerts_sent: AtomicU64::new(0),
        }
    }

    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        service.running.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs_f64(service.interval_s));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !service.running.load(Ordering::SeqCst) {
                    break;
                }
                service.broadcast_once(crate::current_timestamp());
            }
            log::info!("Prediction broadcast service stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// One broadcast round: predict every road, collect alerts, emit.
    /// Public so tests and the operator CLI can force a round.
    pub fn broadcast_once(&self, now: f64) -> usize {
        let predictions = self.predict_all_roads(now);
        if predictions.is_empty() {
            return 0;
        }

        let mut alerts: Vec<CongestionAlert> = Vec::new();
        {
            let mut classifier = self.classifier.lock().unwrap_or_else(|e| e.into_inner());
            for prediction in &predictions {
                alerts.extend(classifier.check_for_alerts(prediction, now));
            }
            classifier.prune_expired(now);
        }

        let summaries = self.summarize(&predictions);
        let count = summaries.len();
        self.emitter.emit(SystemEventMessage::PredictionUpdated {
            predictions: summaries,
            timestamp: now,
        });
        self.total_broadcasts.fetch_add(1, Ordering::Relaxed);

        if !alerts.is_empty() {
            self.total_alerts_sent
                .fetch_add(alerts.len() as u64, Ordering::Relaxed);
            self.emitter.emit(SystemEventMessage::PredictionAlert {
                alerts,
                timestamp: now,
            });
        }
        count
    }

    pub fn predict_all_roads(&self, now: f64) -> Vec<CongestionPrediction> {
        let tracker = self.tracker.read().unwrap_or_else(|e| e.into_inner());
        let mut road_ids: Vec<RoadId> = tracker.road_densities().keys().cloned().collect();
        road_ids.sort();

        road_ids
            .iter()
            .filter_map(|road_id| {
                let history = tracker.get_history(road_id, self.history_window_s, now);
                self.engine.predict(road_id, &history, now)
            })
            .collect()
    }

    fn summarize(&self, predictions: &[CongestionPrediction]) -> Vec<PredictionSummary> {
        let classifier = self.classifier.lock().unwrap_or_else(|e| e.into_inner());
        predictions
            .iter()
            .take(self.road_cap)
            .map(|prediction| {
                let horizons: Vec<HorizonForecast> = prediction
                    .predictions
                    .iter()
                    .take(5)
                    .map(|&(ts, density)| HorizonForecast {
                        minutes_ahead: ((ts - prediction.predicted_at) / 60.0).round() as u32,
                        predicted_density: density,
                        congestion_level: classifier.classify_density(density),
                    })
                    .collect();
                PredictionSummary {
                    road_id: prediction.road_id.clone(),
                    current_density: prediction.current_density,
                    max_congestion_level: classifier.max_predicted_level(prediction),
                    confidence: prediction.confidence,
                    horizons,
                }
            })
            .collect()
    }

    pub fn total_broadcasts(&self) -> u64 {
        self.total_broadcasts.load(Ordering::Relaxed)
    }

    pub fn total_alerts_sent(&self) -> u64 {
        self.total_alerts_sent.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DensityConfig, PredictionConfig};
    use crate::density::DensitySource;
    use crate::models::network::create_default_network;
    use crate::models::vehicle::{VehicleObservation, VehicleType};

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

    fn service() -> (Arc<PredictionBroadcastService>, Arc<EventEmitter>) {
        let mut tracker =
            DensityTracker::new(&DensityConfig::default(), DensitySource::Simulation);
        tracker.initialize_roads(&create_default_network());
        // Build a rising load on one road: 10..48 vehicles over 20 ticks.
        for tick in 0..20u32 {
            let vehicles: Vec<VehicleObservation> = (0..(10 + tick * 2) as usize)
                .map(|n| observation("R-1-2", n))
                .collect();
            tracker.update(&vehicles, 1000.0 + tick as f64);
        }

        let config = PredictionConfig::default();
        let emitter = Arc::new(EventEmitter::new(64));
        let service = Arc::new(PredictionBroadcastService::new(
            &config,
            Arc::new(RwLock::new(tracker)),
            Arc::new(PredictionEngine::new(&config)),
            Arc::new(Mutex::new(CongestionClassifier::new(&config))),
            emitter.clone(),
        ));
        (service, emitter)
    }

    #[tokio::test]
    async fn broadcast_emits_predictions_and_alerts() {
        let (service, emitter) = service();
        let mut rx = emitter.subscribe();

        let count = service.broadcast_once(1019.0);
        assert!(count > 0);
        assert_eq!(service.total_broadcasts(), 1);

        // First frame is the prediction update.
        match rx.recv().await.unwrap() {
            SystemEventMessage::PredictionUpdated { predictions, .. } => {
                assert!(!predictions.is_empty());
                let rising = predictions.iter().find(|p| p.road_id == "R-1-2").unwrap();
                assert!(rising.max_congestion_level >= CongestionLevel::Medium);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        // The rising road breaches the alert threshold.
        match rx.recv().await.unwrap() {
            SystemEventMessage::PredictionAlert { alerts, .. } => {
                assert!(alerts.iter().any(|a| a.road_id == "R-1-2"));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // A second round inside the cooldown repeats predictions but not
        // the same alert.
        let alerts_before = service.total_alerts_sent();
        service.broadcast_once(1049.0);
        assert_eq!(service.total_alerts_sent(), alerts_before);
    }
}
