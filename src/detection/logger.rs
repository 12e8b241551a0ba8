// logger.rs

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::DetectionConfig;
use crate::events::{EventEmitter, EventSeverity};
use crate::models::junction::{Direction, JunctionId};
use crate::models::road::RoadId;
use crate::models::vehicle::VehicleType;
use crate::persistence::gateway::PersistenceGateway;
use crate::persistence::tables::{created_at_stamp, DetectionRow};

/// One vehicle passage through a junction, as reported by a sensor or the
/// simulation feed. Immutable after creation.
#[derive(Debug, Clone)]
pub struct VehicleDetectionEvent {
    pub vehicle_id: String,
    pub number_plate: String,
    pub junction_id: JunctionId,
    pub direction: Direction,
    pub timestamp: f64,
    pub position_x: f64,
    pub position_y: f64,
    pub speed: f64,
    pub vehicle_type: VehicleType,
    pub incoming_road: Option<RoadId>,
    pub outgoing_road: Option<RoadId>,
    pub violation_detected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionStats {
    pub total_detections: u64,
    pub total_flushes: u64,
    pub buffer_size: usize,
    pub last_flush_time: f64,
    pub retention_hours: u64,
}

/// Buffered, asynchronous ingestion of junction passages.
///
/// `log_detection` only takes the buffer mutex and returns; the
/// background flusher drains the buffer when it reaches `buffer_size` or
/// every `flush_interval` seconds, whichever comes first. A failed batch
/// goes back to the head of the buffer; after `max_batch_retries`
/// consecutive failures it is quarantined so one poison row cannot block
/// the pipeline.
pub struct DetectionLogger {
    config: DetectionConfig,
    gateway: Arc<PersistenceGateway>,
    emitter: Arc<EventEmitter>,
    buffer: Mutex<Vec<DetectionRow>>,
    flush_signal: Notify,
    consecutive_failures: AtomicU32,
    total_detections: AtomicU64,
    total_flushes: AtomicU64,
    last_flush_time: Mutex<f64>,
    running: AtomicBool,
}

impl DetectionLogger {
    pub fn new(
        config: DetectionConfig,
        gateway: Arc<PersistenceGateway>,
        emitter: Arc<EventEmitter>,
    ) -> Self {
        Self {
            config,
            gateway,
            emitter,
            buffer: Mutex::new(Vec::new()),
            flush_signal: Notify::new(),
            consecutive_failures: AtomicU32::new(0),
            total_detections: AtomicU64::new(0),
            total_flushes: AtomicU64::new(0),
            last_flush_time: Mutex::new(0.0),
            running: AtomicBool::new(false),
        }
    }

    /// Non-blocking enqueue. Wakes the flusher when the buffer is full.
    pub fn log_detection(&self, event: VehicleDetectionEvent) {
        let row = DetectionRow {
            id: format!("det-{}", &Uuid::new_v4().simple().to_string()[..12]),
            vehicle_id: event.vehicle_id,
            number_plate: event.number_plate,
            junction_id: event.junction_id,
            timestamp: event.timestamp,
            direction: event.direction.short().to_string(),
            incoming_road: event.incoming_road,
            outgoing_road: event.outgoing_road,
            speed: event.speed,
            position_x: event.position_x,
            position_y: event.position_y,
            vehicle_type: event.vehicle_type.to_string(),
            violation_detected: event.violation_detected,
            created_at: created_at_stamp(),
        };

        let should_flush = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.push(row);
            buffer.len() >= self.config.buffer_size
        };
        self.total_detections.fetch_add(1, Ordering::Relaxed);

        if should_flush {
            self.flush_signal.notify_one();
        }
    }

    /// Background flusher plus retention purge. Runs until `stop`.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let logger = Arc::clone(self);
        logger.running.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            let mut flush_ticker =
                tokio::time::interval(Duration::from_secs_f64(logger.config.flush_interval_s));
            flush_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Purge roughly once an hour; the cutoff is what matters.
            let mut purge_ticker = tokio::time::interval(Duration::from_secs(3600));
            purge_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = flush_ticker.tick() => {}
                    _ = logger.flush_signal.notified() => {}
                    _ = purge_ticker.tick() => {
                        logger.purge_expired().await;
                        continue;
                    }
                }
                if !logger.running.load(Ordering::SeqCst) {
                    break;
                }
                logger.flush_buffer().await;
            }
            log::info!("Detection logger stopped");
        })
    }

    /// Drains the buffer immediately; used on shutdown with a bounded wait.
    pub async fn force_flush(&self) {
        self.flush_buffer().await;
    }

    pub async fn stop(self: &Arc<Self>) {
        self.running.store(false, Ordering::SeqCst);
        self.flush_signal.notify_one();
        let timeout = Duration::from_secs_f64(self.config.shutdown_flush_timeout_s);
        if tokio::time::timeout(timeout, self.force_flush()).await.is_err() {
            log::warn!("Shutdown flush timed out; remaining buffer dropped");
        }
    }

    async fn flush_buffer(&self) {
        let batch: Vec<DetectionRow> = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            if buffer.is_empty() {
                return;
            }
            std::mem::take(&mut *buffer)
        };

        let gateway = Arc::clone(&self.gateway);
        let to_write = batch.clone();
        let result = tokio::task::spawn_blocking(move || {
            gateway.insert_detections_blocking(to_write)
        })
        .await
        .unwrap_or_else(|e| Err(format!("flush task panicked: {}", e)));

        match result {
            Ok(count) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                self.total_flushes.fetch_add(1, Ordering::Relaxed);
                *self.last_flush_time.lock().unwrap_or_else(|e| e.into_inner()) =
                    crate::current_timestamp();
                log::debug!("Flushed {} detections", count);
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                log::error!("Detection flush failed (attempt {}): {}", failures, e);

                if failures >= self.config.max_batch_retries {
                    // Quarantine the batch instead of retrying forever.
                    let count = batch.len();
                    self.gateway.quarantine_detections(batch);
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    self.emitter.emit_system_event(
                        "DETECTION_QUARANTINE",
                        EventSeverity::Error,
                        format!("Quarantined {} detections after {} failed flushes", count, failures),
                        crate::current_timestamp(),
                    );
                } else {
                    // Return the batch to the head of the buffer.
                    let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
                    let mut restored = batch;
                    restored.append(&mut buffer);
                    *buffer = restored;
                }
            }
        }
    }

    async fn purge_expired(&self) {
        let cutoff = crate::current_timestamp() - self.config.retention_hours as f64 * 3600.0;
        let gateway = Arc::clone(&self.gateway);
        let result =
            tokio::task::spawn_blocking(move || gateway.purge_detections_blocking(cutoff)).await;
        match result {
            Ok(Ok(removed)) if removed > 0 => {
                log::info!("Detection retention purge removed {} rows", removed);
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log::error!("Detection purge failed: {}", e),
            Err(e) => log::error!("Detection purge task failed: {}", e),
        }
    }

    pub fn stats(&self) -> DetectionStats {
        DetectionStats {
            total_detections: self.total_detections.load(Ordering::Relaxed),
            total_flushes: self.total_flushes.load(Ordering::Relaxed),
            buffer_size: self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len(),
            last_flush_time: *self.last_flush_time.lock().unwrap_or_else(|e| e.into_inner()),
            retention_hours: self.config.retention_hours,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(plate: &str, junction: &str, ts: f64) -> VehicleDetectionEvent {
        VehicleDetectionEvent {
            vehicle_id: format!("v-{}", plate),
            number_plate: plate.to_string(),
            junction_id: junction.to_string(),
            direction: Direction::East,
            timestamp: ts,
            position_x: 10.0,
            position_y: 20.0,
            speed: 35.0,
            vehicle_type: VehicleType::Car,
            incoming_road: Some("R-4-5".to_string()),
            outgoing_road: Some("R-5-6".to_string()),
            violation_detected: false,
        }
    }

    fn temp_gateway(tag: &str) -> (Arc<PersistenceGateway>, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("ti-detlog-{}-{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        (Arc::new(PersistenceGateway::new(&dir).unwrap()), dir)
    }

    #[tokio::test]
    async fn buffered_events_flush_and_persist() {
        let (gateway, dir) = temp_gateway("flush");
        let logger = Arc::new(DetectionLogger::new(
            DetectionConfig::default(),
            gateway.clone(),
            Arc::new(EventEmitter::new(16)),
        ));

        for i in 0..5 {
            logger.log_detection(event("KA-77", "J-5", 100.0 + i as f64));
        }
        assert_eq!(logger.stats().buffer_size, 5);
        assert_eq!(logger.stats().total_detections, 5);

        logger.force_flush().await;
        assert_eq!(logger.stats().buffer_size, 0);
        assert_eq!(logger.stats().total_flushes, 1);

        let rows = gateway.query_detections_by_plate("KA-77", 0.0, 1000.0).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].direction, "E");

        gateway.flush_and_stop();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn empty_flush_is_a_no_op() {
        let (gateway, dir) = temp_gateway("empty");
        let logger = Arc::new(DetectionLogger::new(
            DetectionConfig::default(),
            gateway.clone(),
            Arc::new(EventEmitter::new(16)),
        ));
        logger.force_flush().await;
        assert_eq!(logger.stats().total_flushes, 0);
        gateway.flush_and_stop();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
