// city_metrics.rs

use std::collections::HashMap;

use crate::density::{
    CityWideDensityMetrics, DensityLevel, JunctionDensityData, RoadDensityData,
};
use crate::models::junction::JunctionId;
use crate::models::road::RoadId;

/// City-wide aggregation over all roads and junctions.
#[derive(Debug, Clone, Default)]
pub struct CityDensityCalculator;

impl CityDensityCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn calculate_city_metrics(
        &self,
        road_densities: &HashMap<RoadId, RoadDensityData>,
        junction_densities: &HashMap<JunctionId, JunctionDensityData>,
        now: f64,
    ) -> CityWideDensityMetrics {
        let mut metrics = CityWideDensityMetrics::default();
        let mut total_density = 0.0;
        let mut road_count: u32 = 0;

        for (road_id, data) in road_densities {
            metrics.total_vehicles += data.vehicle_count as u64;
            metrics.total_road_capacity += data.capacity as u64;
            total_density += data.density_score;
            road_count += 1;

            match data.classification {
                DensityLevel::Low => metrics.low_density_roads += 1,
                DensityLevel::Medium => metrics.medium_density_roads += 1,
                DensityLevel::High => metrics.high_density_roads += 1,
            }

            if data.density_score > metrics.peak_density_score {
                metrics.peak_density_score = data.density_score;
                metrics.peak_density_road = Some(road_id.clone());
            }
        }

        if road_count > 0 {
            metrics.avg_density_score = total_density / road_count as f64;
        }

        metrics.congestion_points = junction_densities
            .values()
            .filter(|jd| jd.congestion_level == DensityLevel::High)
            .count() as u32;

        let total_junctions = junction_densities.len();
        if total_junctions > 0 {
            metrics.congestion_percentage =
                (metrics.congestion_points as f64 / total_junctions as f64) * 100.0;
        }

        metrics.timestamp = now;
        metrics
    }

    /// Roads at or above `threshold`, sorted by density descending.
    pub fn congestion_hotspots(
        &self,
        road_densities: &HashMap<RoadId, RoadDensityData>,
        threshold: f64,
    ) -> Vec<(RoadId, f64)> {
        let mut hotspots: Vec<(RoadId, f64)> = road_densities
            .iter()
            .filter(|(_, data)| data.density_score >= threshold)
            .map(|(id, data)| (id.clone(), data.density_score))
            .collect();
        hotspots.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hotspots
    }

    /// Distribution statistics over all road scores.
    pub fn density_distribution(
        &self,
        road_densities: &HashMap<RoadId, RoadDensityData>,
    ) -> DensityDistribution {
        let mut scores: Vec<f64> = road_densities.values().map(|d| d.density_score).collect();
        if scores.is_empty() {
            return DensityDistribution::default();
        }
        scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = scores.len();
        DensityDistribution {
            min: scores[0],
            max: scores[n - 1],
            mean: scores.iter().sum::<f64>() / n as f64,
            median: scores[n / 2],
            percentile_90: scores[(((n as f64) * 0.9) as usize).min(n - 1)],
        }
    }

    /// Crude vehicles/hour throughput estimate; efficiency degrades
    /// quadratically with utilization.
    pub fn throughput_estimate(&self, metrics: &CityWideDensityMetrics) -> f64 {
        if metrics.total_road_capacity == 0 {
            return 0.0;
        }
        let utilization = metrics.total_vehicles as f64 / metrics.total_road_capacity as f64;
        let efficiency = (1.0 - utilization.powi(2)).max(0.1);
        let base_throughput = 30.0;
        metrics.total_vehicles as f64 * base_throughput * efficiency
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DensityDistribution {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub percentile_90: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density::DensitySource;

    fn road(id: &str, count: u32, capacity: u32, score: f64, level: DensityLevel) -> RoadDensityData {
        RoadDensityData {
            road_id: id.to_string(),
            vehicle_count: count,
            capacity,
            density_score: score,
            classification: level,
            last_update: 0.0,
            source: DensitySource::Simulation,
        }
    }

    #[test]
    fn metrics_aggregate_roads_and_junctions() {
        let calc = CityDensityCalculator::new();
        let mut roads = HashMap::new();
        roads.insert(
            "R-1".to_string(),
            road("R-1", 30, 40, 75.0, DensityLevel::High),
        );
        roads.insert(
            "R-2".to_string(),
            road("R-2", 4, 40, 10.0, DensityLevel::Low),
        );

        let mut junctions = HashMap::new();
        let mut high = JunctionDensityData::new("J-1".to_string());
        high.congestion_level = DensityLevel::High;
        junctions.insert("J-1".to_string(), high);
        junctions.insert("J-2".to_string(), JunctionDensityData::new("J-2".to_string()));

        let metrics = calc.calculate_city_metrics(&roads, &junctions, 10.0);
        assert_eq!(metrics.total_vehicles, 34);
        assert_eq!(metrics.total_road_capacity, 80);
        assert_eq!(metrics.avg_density_score, 42.5);
        assert_eq!(metrics.high_density_roads, 1);
        assert_eq!(metrics.low_density_roads, 1);
        assert_eq!(metrics.congestion_points, 1);
        assert_eq!(metrics.congestion_percentage, 50.0);
        assert_eq!(metrics.peak_density_road.as_deref(), Some("R-1"));
    }

    #[test]
    fn hotspots_sorted_descending() {
        let calc = CityDensityCalculator::new();
        let mut roads = HashMap::new();
        roads.insert("R-1".to_string(), road("R-1", 0, 1, 72.0, DensityLevel::High));
        roads.insert("R-2".to_string(), road("R-2", 0, 1, 95.0, DensityLevel::High));
        roads.insert("R-3".to_string(), road("R-3", 0, 1, 30.0, DensityLevel::Low));

        let hotspots = calc.congestion_hotspots(&roads, 70.0);
        assert_eq!(hotspots.len(), 2);
        assert_eq!(hotspots[0].0, "R-2");
    }
}
