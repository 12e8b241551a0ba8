// tables.rs
//
// Row types for the four persisted tables. Column layout matches the
// platform schema; CSV files stand in for the relational store.

use serde::{Deserialize, Serialize};

pub fn created_at_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// detection_records: one row per vehicle passage through a junction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRow {
    pub id: String,
    pub vehicle_id: String,
    pub number_plate: String,
    pub junction_id: String,
    pub timestamp: f64,
    pub direction: String,
    pub incoming_road: Option<String>,
    pub outgoing_road: Option<String>,
    pub speed: f64,
    pub position_x: f64,
    pub position_y: f64,
    pub vehicle_type: String,
    pub violation_detected: bool,
    pub created_at: String,
}

/// agent_logs: one condensed row per agent tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLogRow {
    pub id: u64,
    pub timestamp: f64,
    pub mode: String,
    pub strategy: String,
    pub decision_latency_ms: f64,
    pub decisions_json: String,
    pub state_summary_json: String,
    pub created_at: String,
}

/// system_events: mode changes, errors, alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEventRow {
    pub id: u64,
    pub timestamp: f64,
    pub event_type: String,
    pub severity: String,
    pub message: String,
    pub metadata_json: String,
    pub created_at: String,
}

/// traffic_history: sampled road densities for long-horizon analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficHistoryRow {
    pub id: u64,
    pub road_id: String,
    pub congestion_level: String,
    pub current_speed: Option<f64>,
    pub vehicle_count: Option<u32>,
    pub density_score: Option<f64>,
    pub timestamp: f64,
    pub source: String,
    pub created_at: String,
}
