//! Road and junction density tracking.
//!
//! The tracker ingests vehicle observations once per tick, recomputes every
//! road's density score and classification, aggregates the four approaches
//! of each junction, and appends per-road snapshots into a bounded history
//! ring used by trend analysis and the prediction engine.

pub mod calculator;
pub mod city_metrics;
pub mod history;
pub mod junction_aggregator;
pub mod tracker;

use serde::{Deserialize, Serialize};

use crate::models::junction::{Direction, JunctionId};
use crate::models::road::RoadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DensityLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for DensityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DensityLevel::Low => "LOW",
            DensityLevel::Medium => "MEDIUM",
            DensityLevel::High => "HIGH",
        };
        f.write_str(s)
    }
}

/// Where a road's current density reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DensitySource {
    Api,
    Simulation,
    Manual,
}

impl std::fmt::Display for DensitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DensitySource::Api => "API",
            DensitySource::Simulation => "SIMULATION",
            DensitySource::Manual => "MANUAL",
        };
        f.write_str(s)
    }
}

/// Current density state of one road.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadDensityData {
    pub road_id: RoadId,
    pub vehicle_count: u32,
    pub capacity: u32,
    pub density_score: f64,
    pub classification: DensityLevel,
    pub last_update: f64,
    pub source: DensitySource,
}

/// Aggregated density across a junction's four approaches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JunctionDensityData {
    pub junction_id: JunctionId,
    pub density_north: f64,
    pub density_east: f64,
    pub density_south: f64,
    pub density_west: f64,
    pub total_vehicles: u32,
    pub max_density: f64,
    pub avg_density: f64,
    pub congestion_level: DensityLevel,
    pub timestamp: f64,
}

impl JunctionDensityData {
    pub fn new(junction_id: JunctionId) -> Self {
        Self {
            junction_id,
            density_north: 0.0,
            density_east: 0.0,
            density_south: 0.0,
            density_west: 0.0,
            total_vehicles: 0,
            max_density: 0.0,
            avg_density: 0.0,
            congestion_level: DensityLevel::Low,
            timestamp: 0.0,
        }
    }

    pub fn directional(&self, direction: Direction) -> f64 {
        match direction {
            Direction::North => self.density_north,
            Direction::East => self.density_east,
            Direction::South => self.density_south,
            Direction::West => self.density_west,
        }
    }

    pub fn set_directional(&mut self, direction: Direction, score: f64) {
        match direction {
            Direction::North => self.density_north = score,
            Direction::East => self.density_east = score,
            Direction::South => self.density_south = score,
            Direction::West => self.density_west = score,
        }
    }
}

/// City-wide aggregate, recomputed on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CityWideDensityMetrics {
    pub total_vehicles: u64,
    pub total_road_capacity: u64,
    pub avg_density_score: f64,
    pub low_density_roads: u32,
    pub medium_density_roads: u32,
    pub high_density_roads: u32,
    /// Number of HIGH-congestion junctions.
    pub congestion_points: u32,
    pub congestion_percentage: f64,
    pub peak_density_road: Option<RoadId>,
    pub peak_density_score: f64,
    pub timestamp: f64,
}
