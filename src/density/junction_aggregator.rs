// junction_aggregator.rs

use std::collections::HashMap;

use crate::density::{DensityLevel, JunctionDensityData, RoadDensityData};
use crate::models::junction::Direction;
use crate::models::road::{Junction, RoadId};

/// Combines the densities of a junction's four connected roads into one
/// junction-level view.
#[derive(Debug, Clone)]
pub struct JunctionDensityAggregator {
    high_threshold: f64,
    medium_threshold: f64,
}

impl JunctionDensityAggregator {
    pub fn new() -> Self {
        Self {
            high_threshold: 70.0,
            medium_threshold: 40.0,
        }
    }

    pub fn with_thresholds(medium: f64, high: f64) -> Self {
        Self {
            high_threshold: high,
            medium_threshold: medium,
        }
    }

    /// Aggregates N/E/S/W road densities; the congestion level derives
    /// from the maximum directional density.
    pub fn calculate_junction_density(
        &self,
        junction: &Junction,
        road_densities: &HashMap<RoadId, RoadDensityData>,
        now: f64,
    ) -> JunctionDensityData {
        let mut data = JunctionDensityData::new(junction.id.clone());
        let mut densities = Vec::with_capacity(4);
        let mut total_vehicles: u32 = 0;

        for direction in Direction::ALL {
            if let Some(road_id) = junction.connected_roads.get(direction) {
                if let Some(road_data) = road_densities.get(road_id) {
                    data.set_directional(direction, road_data.density_score);
                    densities.push(road_data.density_score);
                    total_vehicles += road_data.vehicle_count;
                }
            }
        }

        if !densities.is_empty() {
            data.avg_density = densities.iter().sum::<f64>() / densities.len() as f64;
            data.max_density = densities.iter().copied().fold(0.0, f64::max);
        }
        data.total_vehicles = total_vehicles;

        data.congestion_level = if data.max_density >= self.high_threshold {
            DensityLevel::High
        } else if data.max_density >= self.medium_threshold {
            DensityLevel::Medium
        } else {
            DensityLevel::Low
        };
        data.timestamp = now;

        data
    }

    /// The approach with the highest density.
    pub fn most_congested_direction(&self, data: &JunctionDensityData) -> Direction {
        let mut best = Direction::North;
        let mut best_score = f64::NEG_INFINITY;
        for direction in Direction::ALL {
            let score = data.directional(direction);
            if score > best_score {
                best = direction;
                best_score = score;
            }
        }
        best
    }

    /// Approaches ordered by density, highest first.
    pub fn congestion_priority_order(&self, data: &JunctionDensityData) -> Vec<Direction> {
        let mut order = Direction::ALL.to_vec();
        order.sort_by(|a, b| {
            data.directional(*b)
                .partial_cmp(&data.directional(*a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order
    }

    /// Density imbalance across the four approaches: twice the standard
    /// deviation of the directional scores, capped at 100.
    pub fn imbalance_score(&self, data: &JunctionDensityData) -> f64 {
        let densities = [
            data.density_north,
            data.density_east,
            data.density_south,
            data.density_west,
        ];
        let max = densities.iter().copied().fold(0.0, f64::max);
        if max == 0.0 {
            return 0.0;
        }
        let avg = densities.iter().sum::<f64>() / densities.len() as f64;
        let variance =
            densities.iter().map(|d| (d - avg).powi(2)).sum::<f64>() / densities.len() as f64;
        (variance.sqrt() * 2.0).min(100.0)
    }
}

impl Default for JunctionDensityAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density::DensitySource;
    use crate::models::road::ConnectedRoads;

    fn road_data(id: &str, count: u32, score: f64) -> RoadDensityData {
        RoadDensityData {
            road_id: id.to_string(),
            vehicle_count: count,
            capacity: 40,
            density_score: score,
            classification: DensityLevel::Low,
            last_update: 0.0,
            source: DensitySource::Simulation,
        }
    }

    fn junction_with_four_roads() -> Junction {
        Junction {
            id: "J-5".to_string(),
            name: "Junction 5".to_string(),
            x: 0.0,
            y: 0.0,
            connected_roads: ConnectedRoads {
                north: Some("R-n".to_string()),
                east: Some("R-e".to_string()),
                south: Some("R-s".to_string()),
                west: Some("R-w".to_string()),
            },
        }
    }

    #[test]
    fn aggregate_respects_max_and_avg() {
        let aggregator = JunctionDensityAggregator::new();
        let mut roads = HashMap::new();
        roads.insert("R-n".to_string(), road_data("R-n", 10, 80.0));
        roads.insert("R-e".to_string(), road_data("R-e", 4, 20.0));
        roads.insert("R-s".to_string(), road_data("R-s", 6, 40.0));
        roads.insert("R-w".to_string(), road_data("R-w", 2, 10.0));

        let data = aggregator.calculate_junction_density(&junction_with_four_roads(), &roads, 50.0);
        assert_eq!(data.max_density, 80.0);
        assert_eq!(data.avg_density, 37.5);
        assert!(data.max_density >= data.avg_density);
        assert_eq!(data.total_vehicles, 22);
        assert_eq!(data.congestion_level, DensityLevel::High);
        assert_eq!(
            aggregator.most_congested_direction(&data),
            Direction::North
        );
        let order = aggregator.congestion_priority_order(&data);
        assert_eq!(order[0], Direction::North);
        assert_eq!(order[3], Direction::West);
    }

    #[test]
    fn level_thresholds_and_imbalance() {
        let aggregator = JunctionDensityAggregator::new();
        let mut roads = HashMap::new();
        roads.insert("R-n".to_string(), road_data("R-n", 5, 45.0));
        roads.insert("R-e".to_string(), road_data("R-e", 5, 45.0));
        roads.insert("R-s".to_string(), road_data("R-s", 5, 45.0));
        roads.insert("R-w".to_string(), road_data("R-w", 5, 45.0));

        let data = aggregator.calculate_junction_density(&junction_with_four_roads(), &roads, 0.0);
        assert_eq!(data.congestion_level, DensityLevel::Medium);
        // Perfectly even distribution has zero imbalance.
        assert_eq!(aggregator.imbalance_score(&data), 0.0);
    }
}
