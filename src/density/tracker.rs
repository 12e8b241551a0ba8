// tracker.rs

use std::collections::HashMap;

use serde::Serialize;

use crate::config::DensityConfig;
use crate::density::calculator::DensityCalculator;
use crate::density::city_metrics::CityDensityCalculator;
use crate::density::history::{DensityHistory, DensitySnapshot, TrendAnalyzer};
use crate::density::junction_aggregator::JunctionDensityAggregator;
use crate::density::{
    CityWideDensityMetrics, DensitySource, JunctionDensityData, RoadDensityData,
};
use crate::models::junction::JunctionId;
use crate::models::network::RoadNetwork;
use crate::models::road::{Junction, RoadId};
use crate::models::vehicle::VehicleObservation;

/// The authoritative traffic-state model.
///
/// One `update` call is a single atomic tick: vehicles are bucketed by
/// road, every road's `(count, score, classification)` is recomputed,
/// every junction aggregate is refreshed, and a snapshot per road lands in
/// the bounded history ring. Lookups are O(1) off the resulting maps.
pub struct DensityTracker {
    calculator: DensityCalculator,
    aggregator: JunctionDensityAggregator,
    city: CityDensityCalculator,
    trend: TrendAnalyzer,
    history: DensityHistory,

    junctions: Vec<Junction>,
    capacities: HashMap<RoadId, u32>,
    road_densities: HashMap<RoadId, RoadDensityData>,
    junction_densities: HashMap<JunctionId, JunctionDensityData>,

    source: DensitySource,
    tick_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackerStats {
    pub roads: usize,
    pub junctions: usize,
    pub tick_count: u64,
    pub history_entries: usize,
    pub retention_seconds: u64,
}

impl DensityTracker {
    pub fn new(config: &DensityConfig, source: DensitySource) -> Self {
        Self {
            calculator: DensityCalculator::new(config),
            aggregator: JunctionDensityAggregator::new(),
            city: CityDensityCalculator::new(),
            trend: TrendAnalyzer::new(config.trend_slope_threshold),
            history: DensityHistory::new(config.retention_seconds),
            junctions: Vec::new(),
            capacities: HashMap::new(),
            road_densities: HashMap::new(),
            junction_densities: HashMap::new(),
            source,
            tick_count: 0,
        }
    }

    /// Registers the road network and precomputes every road's capacity.
    /// Reloading a network drops all previous state and history.
    pub fn initialize_roads(&mut self, network: &RoadNetwork) {
        self.capacities.clear();
        self.road_densities.clear();
        self.junction_densities.clear();
        self.history.clear();
        self.tick_count = 0;

        for road in &network.roads {
            let capacity = self.calculator.calculate_road_capacity(road.length, road.lanes);
            self.capacities.insert(road.id.clone(), capacity);
            self.road_densities.insert(
                road.id.clone(),
                RoadDensityData {
                    road_id: road.id.clone(),
                    vehicle_count: 0,
                    capacity,
                    density_score: 0.0,
                    classification: self.calculator.classify_density(0),
                    last_update: 0.0,
                    source: self.source,
                },
            );
        }
        self.junctions = network.junctions.clone();
        for junction in &self.junctions {
            self.junction_densities
                .insert(junction.id.clone(), JunctionDensityData::new(junction.id.clone()));
        }

        log::info!(
            "Density tracker initialized with {} roads, {} junctions",
            self.capacities.len(),
            self.junctions.len()
        );
    }

    /// One tick: recompute all road and junction densities from the given
    /// observations and append history snapshots.
    pub fn update(&mut self, vehicles: &[VehicleObservation], now: f64) {
        // Bucket vehicles by road.
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for vehicle in vehicles {
            *counts.entry(vehicle.road_id.as_str()).or_insert(0) += 1;
        }

        // Per-road recompute plus history append.
        for (road_id, data) in self.road_densities.iter_mut() {
            let count = counts.get(road_id.as_str()).copied().unwrap_or(0);
            let capacity = self.capacities.get(road_id).copied().unwrap_or(1);
            data.vehicle_count = count;
            data.capacity = capacity;
            data.density_score = self.calculator.calculate_density_score(count, capacity);
            data.classification = self.calculator.classify_density(count);
            data.last_update = now;
            data.source = self.source;

            self.history.add_snapshot(DensitySnapshot {
                timestamp: now,
                road_id: road_id.clone(),
                vehicle_count: count,
                density_score: data.density_score,
                classification: data.classification,
            });
        }

        // Junction aggregates.
        for junction in &self.junctions {
            let data =
                self.aggregator
                    .calculate_junction_density(junction, &self.road_densities, now);
            self.junction_densities.insert(junction.id.clone(), data);
        }

        self.tick_count += 1;
    }

    pub fn get_road_density(&self, road_id: &str) -> Option<&RoadDensityData> {
        self.road_densities.get(road_id)
    }

    pub fn get_junction_density(&self, junction_id: &str) -> Option<&JunctionDensityData> {
        self.junction_densities.get(junction_id)
    }

    pub fn road_densities(&self) -> &HashMap<RoadId, RoadDensityData> {
        &self.road_densities
    }

    pub fn junction_densities(&self) -> &HashMap<JunctionId, JunctionDensityData> {
        &self.junction_densities
    }

    pub fn get_city_metrics(&self, now: f64) -> CityWideDensityMetrics {
        self.city
            .calculate_city_metrics(&self.road_densities, &self.junction_densities, now)
    }

    /// Snapshot suffix with `timestamp >= now - seconds`, chronological.
    pub fn get_history(&self, road_id: &str, seconds: u64, now: f64) -> Vec<DensitySnapshot> {
        self.history.get_history(road_id, seconds, now)
    }

    pub fn history(&self) -> &DensityHistory {
        &self.history
    }

    pub fn trend_analyzer(&self) -> &TrendAnalyzer {
        &self.trend
    }

    pub fn aggregator(&self) -> &JunctionDensityAggregator {
        &self.aggregator
    }

    pub fn calculator(&self) -> &DensityCalculator {
        &self.calculator
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            roads: self.road_densities.len(),
            junctions: self.junction_densities.len(),
            tick_count: self.tick_count,
            history_entries: self.history.total_entries(),
            retention_seconds: self.history.retention_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::network::create_default_network;
    use crate::models::vehicle::VehicleType;

    fn observation(road_id: &str, n: usize) -> VehicleObservation {
        VehicleObservation {
            vehicle_id: format!("v-{}", n),
            number_plate: format!("KA-{:04}", n),
            road_id: road_id.to_string(),
            x: 0.0,
            y: 0.0,
            speed: 40.0,
            vehicle_type: VehicleType::Car,
        }
    }

    fn tracker_with_network() -> DensityTracker {
        let mut tracker =
            DensityTracker::new(&DensityConfig::default(), DensitySource::Simulation);
        tracker.initialize_roads(&create_default_network());
        tracker
    }

    #[test]
    fn tick_updates_roads_and_junctions() {
        let mut tracker = tracker_with_network();
        let vehicles: Vec<VehicleObservation> =
            (0..30).map(|n| observation("R-4-5", n)).collect();
        tracker.update(&vehicles, 100.0);

        let road = tracker.get_road_density("R-4-5").unwrap();
        assert_eq!(road.vehicle_count, 30);
        assert_eq!(road.capacity, 40);
        assert_eq!(road.density_score, 75.0);

        // R-4-5 is J-4's eastbound road.
        let junction = tracker.get_junction_density("J-4").unwrap();
        assert_eq!(junction.density_east, 75.0);
        assert_eq!(junction.max_density, 75.0);
        assert!(junction.max_density >= junction.avg_density);
    }

    #[test]
    fn scores_stay_in_bounds_over_many_ticks() {
        let mut tracker = tracker_with_network();
        for tick in 0..50 {
            let vehicles: Vec<VehicleObservation> =
                (0..(tick * 7) % 120).map(|n| observation("R-1-2", n)).collect();
            tracker.update(&vehicles, tick as f64);
            for data in tracker.road_densities().values() {
                assert!(data.density_score >= 0.0 && data.density_score <= 100.0);
            }
        }
    }

    #[test]
    fn city_metrics_and_history() {
        let mut tracker = tracker_with_network();
        for tick in 0..5 {
            let vehicles: Vec<VehicleObservation> =
                (0..40).map(|n| observation("R-1-2", n)).collect();
            tracker.update(&vehicles, tick as f64);
        }
        let metrics = tracker.get_city_metrics(5.0);
        assert_eq!(metrics.total_vehicles, 40);
        assert_eq!(metrics.peak_density_road.as_deref(), Some("R-1-2"));
        assert_eq!(metrics.peak_density_score, 100.0);

        let history = tracker.get_history("R-1-2", 600, 5.0);
        assert_eq!(history.len(), 5);
    }
}
