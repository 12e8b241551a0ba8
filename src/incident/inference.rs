// inference.rs

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::IncidentConfig;
use crate::models::junction::{Direction, JunctionId};
use crate::models::network::JunctionGraph;
use crate::persistence::gateway::PersistenceGateway;
use crate::persistence::tables::DetectionRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentType {
    HitAndRun,
    Accident,
    Stolen,
    VipTracking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Open,
    Inferred,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InferenceStatus {
    Located,
    LastKnownOnly,
    NoData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbableLocation {
    pub junction_id: JunctionId,
    pub probability: f64,
    pub hops: u32,
    pub distance_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResult {
    pub status: InferenceStatus,
    /// Ranked candidates, most probable first; probabilities sum to 1.
    pub locations: Vec<ProbableLocation>,
    pub confidence: f64,
    pub detections_used: Vec<DetectionRow>,
    pub computed_at: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: String,
    pub number_plate: String,
    pub reported_at: f64,
    pub incident_type: IncidentType,
    pub status: IncidentStatus,
    pub result: Option<InferenceResult>,
}

/// Reconstructs the probable location of a reported vehicle from its
/// detection history and the junction graph. Deterministic for fixed
/// inputs: candidate expansion and ranking use stable orderings.
pub struct IncidentInferenceEngine {
    gateway: Arc<PersistenceGateway>,
    graph: Option<Arc<dyn JunctionGraph>>,
    config: IncidentConfig,
    incidents: Mutex<HashMap<String, IncidentRecord>>,
}

impl IncidentInferenceEngine {
    pub fn new(
        gateway: Arc<PersistenceGateway>,
        graph: Option<Arc<dyn JunctionGraph>>,
        config: IncidentConfig,
    ) -> Self {
        Self {
            gateway,
            graph,
            config,
            incidents: Mutex::new(HashMap::new()),
        }
    }

    pub fn report_incident(
        &self,
        number_plate: &str,
        incident_type: IncidentType,
        reported_at: f64,
    ) -> String {
        let id = format!("INC-{}", Uuid::new_v4().simple());
        let record = IncidentRecord {
            id: id.clone(),
            number_plate: number_plate.to_string(),
            reported_at,
            incident_type,
            status: IncidentStatus::Open,
            result: None,
        };
        log::info!(
            "Incident {} opened for plate {} ({:?})",
            id,
            number_plate,
            incident_type
        );
        self.incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), record);
        id
    }

    pub fn get_incident(&self, incident_id: &str) -> Option<IncidentRecord> {
        self.incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(incident_id)
            .cloned()
    }

    pub fn close_incident(&self, incident_id: &str, operator_id: &str) -> bool {
        let mut incidents = self.incidents.lock().unwrap_or_else(|e| e.into_inner());
        match incidents.get_mut(incident_id) {
            Some(record) => {
                record.status = IncidentStatus::Closed;
                log::info!("Incident {} closed by {}", incident_id, operator_id);
                true
            }
            None => false,
        }
    }

    pub fn open_incidents(&self) -> Vec<IncidentRecord> {
        let mut records: Vec<IncidentRecord> = self
            .incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| r.status != IncidentStatus::Closed)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Runs (or re-runs) the reconstruction and caches the result on the
    /// incident record.
    pub fn run_inference(&self, incident_id: &str, now: f64) -> Result<InferenceResult, String> {
        let (plate, reported_at) = {
            let incidents = self.incidents.lock().unwrap_or_else(|e| e.into_inner());
            let record = incidents
                .get(incident_id)
                .ok_or_else(|| format!("Unknown incident: {}", incident_id))?;
            (record.number_plate.clone(), record.reported_at)
        };

        let lookback = self.config.lookback_minutes as f64 * 60.0;
        let detections = self
            .gateway
            .query_detections_by_plate(&plate, reported_at - lookback, reported_at)
            .map_err(|e| format!("detection query failed: {}", e))?;

        let result = self.reconstruct(&detections, reported_at, now);

        let mut incidents = self.incidents.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = incidents.get_mut(incident_id) {
            if result.status != InferenceStatus::NoData {
                record.status = IncidentStatus::Inferred;
            }
            record.result = Some(result.clone());
        }
        Ok(result)
    }

    pub fn get_inference_result(&self, incident_id: &str) -> Option<InferenceResult> {
        self.incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(incident_id)
            .and_then(|r| r.result.clone())
    }

    fn reconstruct(
        &self,
        detections: &[DetectionRow],
        reported_at: f64,
        now: f64,
    ) -> InferenceResult {
        let last = match detections.last() {
            Some(last) => last,
            None => {
                return InferenceResult {
                    status: InferenceStatus::NoData,
                    locations: Vec::new(),
                    confidence: 0.0,
                    detections_used: Vec::new(),
                    computed_at: now,
                }
            }
        };

        let delta = (reported_at - last.timestamp).max(0.0);
        let decay_confidence = (-delta / self.config.decay_tau_s).exp();

        let graph = match &self.graph {
            Some(graph) if graph.contains(&last.junction_id) => graph,
            _ => {
                // Degraded mode: last known location only.
                return InferenceResult {
                    status: InferenceStatus::LastKnownOnly,
                    locations: vec![ProbableLocation {
                        junction_id: last.junction_id.clone(),
                        probability: 1.0,
                        hops: 0,
                        distance_m: 0.0,
                    }],
                    confidence: decay_confidence,
                    detections_used: detections.to_vec(),
                    computed_at: now,
                };
            }
        };

        let max_speed_ms = self.config.max_speed_kmh / 3.6;
        let max_distance = delta * max_speed_ms;
        let heading = Direction::parse_short(&last.direction);
        let heading_neighbor =
            heading.and_then(|d| graph.neighbor_towards(&last.junction_id, d));

        // Breadth-first expansion bounded by reachable distance.
        let mut reached: HashMap<JunctionId, (u32, f64)> = HashMap::new();
        reached.insert(last.junction_id.clone(), (0, 0.0));
        let mut queue: VecDeque<JunctionId> = VecDeque::new();
        queue.push_back(last.junction_id.clone());

        while let Some(current) = queue.pop_front() {
            let (hops, distance) = reached[&current];
            let mut neighbors = graph.neighbors(&current);
            neighbors.sort_by(|a, b| a.0.cmp(&b.0));
            for (neighbor, edge_length) in neighbors {
                let next_distance = distance + edge_length;
                if next_distance > max_distance {
                    continue;
                }
                if !reached.contains_key(&neighbor) {
                    reached.insert(neighbor.clone(), (hops + 1, next_distance));
                    queue.push_back(neighbor);
                }
            }
        }

        // Score candidates: inverse graph distance, travel-time
        // plausibility, and a bonus for continuing in the last observed
        // heading.
        let mut scored: Vec<ProbableLocation> = reached
            .into_iter()
            .map(|(junction_id, (hops, distance))| {
                let travel_time = if max_speed_ms > 0.0 {
                    distance / max_speed_ms
                } else {
                    0.0
                };
                let plausibility = (-((delta - travel_time).abs() / delta.max(1.0))).exp();
                let mut weight = plausibility / (1.0 + hops as f64);
                if heading_neighbor.as_deref() == Some(junction_id.as_str()) {
                    weight *= 1.5;
                }
                ProbableLocation {
                    junction_id,
                    probability: weight,
                    hops,
                    distance_m: distance,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.junction_id.cmp(&b.junction_id))
        });
        scored.truncate(self.config.top_k);

        let total: f64 = scored.iter().map(|l| l.probability).sum();
        if total > 0.0 {
            for location in scored.iter_mut() {
                location.probability /= total;
            }
        }

        let confidence = scored.first().map(|l| l.probability).unwrap_or(0.0);
        InferenceResult {
            status: InferenceStatus::Located,
            locations: scored,
            confidence,
            detections_used: detections.to_vec(),
            computed_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::network::{create_default_network, NetworkJunctionGraph};
    use crate::persistence::tables::created_at_stamp;
    use std::path::PathBuf;

    fn detection(plate: &str, junction: &str, direction: &str, ts: f64) -> DetectionRow {
        DetectionRow {
            id: format!("det-{}-{}", junction, ts as u64),
            vehicle_id: format!("v-{}", plate),
            number_plate: plate.to_string(),
            junction_id: junction.to_string(),
            timestamp: ts,
            direction: direction.to_string(),
            incoming_road: None,
            outgoing_road: None,
            speed: 40.0,
            position_x: 0.0,
            position_y: 0.0,
            vehicle_type: "CAR".to_string(),
            violation_detected: false,
            created_at: created_at_stamp(),
        }
    }

    fn engine_with_graph(tag: &str) -> (IncidentInferenceEngine, Arc<PersistenceGateway>, PathBuf) {
        let dir = std::env::temp_dir().join(format!("ti-incident-{}-{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let gateway = Arc::new(PersistenceGateway::new(&dir).unwrap());
        let graph: Arc<dyn JunctionGraph> =
            Arc::new(NetworkJunctionGraph::from_network(&create_default_network()));
        let engine = IncidentInferenceEngine::new(
            gateway.clone(),
            Some(graph),
            IncidentConfig::default(),
        );
        (engine, gateway, dir)
    }

    #[test]
    fn no_detections_yields_no_data() {
        let (engine, gateway, dir) = engine_with_graph("nodata");
        let id = engine.report_incident("KA-404", IncidentType::Stolen, 10_000.0);
        let result = engine.run_inference(&id, 10_000.0).unwrap();
        assert_eq!(result.status, InferenceStatus::NoData);
        assert!(result.locations.is_empty());
        assert_eq!(engine.get_incident(&id).unwrap().status, IncidentStatus::Open);
        gateway.flush_and_stop();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn last_seen_junction_outranks_earlier_ones() {
        // Plate seen at J-5 going east at T-600, then J-6 going east at
        // T-300, then nothing. Reported at T.
        let (engine, gateway, dir) = engine_with_graph("rank");
        let t = 100_000.0;
        gateway
            .insert_detections_blocking(vec![
                detection("KA-01-HH-1234", "J-5", "E", t - 600.0),
                detection("KA-01-HH-1234", "J-6", "E", t - 300.0),
            ])
            .unwrap();

        let id = engine.report_incident("KA-01-HH-1234", IncidentType::HitAndRun, t);
        let result = engine.run_inference(&id, t).unwrap();

        assert_eq!(result.status, InferenceStatus::Located);
        assert_eq!(result.detections_used.len(), 2);
        let p = |junction: &str| {
            result
                .locations
                .iter()
                .find(|l| l.junction_id == junction)
                .map(|l| l.probability)
        };
        // The vehicle's last fix dominates its origin.
        let p_j6 = p("J-6").expect("J-6 missing from candidates");
        if let Some(p_j5) = p("J-5") {
            assert!(p_j6 > p_j5, "p(J-6)={} should beat p(J-5)={}", p_j6, p_j5);
        }
        assert_eq!(result.locations[0].junction_id, "J-6");

        // Probabilities normalize to 1.
        let sum: f64 = result.locations.iter().map(|l| l.probability).sum();
        assert!((sum - 1.0).abs() < 1e-9);

        // Result is cached and the incident is marked inferred.
        assert_eq!(
            engine.get_incident(&id).unwrap().status,
            IncidentStatus::Inferred
        );
        assert!(engine.get_inference_result(&id).is_some());

        // Deterministic: a second run yields the same ranking.
        let again = engine.run_inference(&id, t).unwrap();
        let first: Vec<&str> = result.locations.iter().map(|l| l.junction_id.as_str()).collect();
        let second: Vec<&str> = again.locations.iter().map(|l| l.junction_id.as_str()).collect();
        assert_eq!(first, second);

        gateway.flush_and_stop();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_graph_degrades_to_last_known() {
        let dir = std::env::temp_dir().join(format!("ti-incident-deg-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let gateway = Arc::new(PersistenceGateway::new(&dir).unwrap());
        let engine =
            IncidentInferenceEngine::new(gateway.clone(), None, IncidentConfig::default());

        let t = 50_000.0;
        gateway
            .insert_detections_blocking(vec![detection("KA-77", "J-2", "N", t - 300.0)])
            .unwrap();
        let id = engine.report_incident("KA-77", IncidentType::Accident, t);
        let result = engine.run_inference(&id, t).unwrap();

        assert_eq!(result.status, InferenceStatus::LastKnownOnly);
        assert_eq!(result.locations.len(), 1);
        assert_eq!(result.locations[0].junction_id, "J-2");
        assert_eq!(result.locations[0].probability, 1.0);
        // Confidence decays with the time since the last detection.
        let expected = (-300.0f64 / 600.0).exp();
        assert!((result.confidence - expected).abs() < 1e-9);

        gateway.flush_and_stop();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
