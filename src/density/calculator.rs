// calculator.rs

use crate::config::DensityConfig;
use crate::density::DensityLevel;

/// Density scores and classifications for road segments.
///
/// Two classification methods exist and are used in different contexts:
/// count-based (absolute vehicle numbers) and score-based (normalized
/// occupancy). Both partition the same monotone scale.
#[derive(Debug, Clone)]
pub struct DensityCalculator {
    low_threshold: u32,
    medium_threshold: u32,
    low_score_threshold: f64,
    medium_score_threshold: f64,
    vehicle_space: f64,
}

impl DensityCalculator {
    pub fn new(config: &DensityConfig) -> Self {
        Self {
            low_threshold: config.low_vehicles,
            medium_threshold: config.medium_vehicles,
            low_score_threshold: config.low_score,
            medium_score_threshold: config.medium_score,
            vehicle_space: config.vehicle_length + config.safety_gap,
        }
    }

    /// Density score in [0, 100]: `100 * count / capacity`, clamped.
    /// A road with zero capacity scores 0.
    pub fn calculate_density_score(&self, vehicle_count: u32, capacity: u32) -> f64 {
        if capacity == 0 {
            return 0.0;
        }
        let score = (vehicle_count as f64 / capacity as f64) * 100.0;
        score.min(100.0)
    }

    /// Classification from an absolute vehicle count.
    pub fn classify_density(&self, vehicle_count: u32) -> DensityLevel {
        if vehicle_count < self.low_threshold {
            DensityLevel::Low
        } else if vehicle_count < self.medium_threshold {
            DensityLevel::Medium
        } else {
            DensityLevel::High
        }
    }

    /// Classification from a density score.
    pub fn classify_by_score(&self, density_score: f64) -> DensityLevel {
        if density_score < self.low_score_threshold {
            DensityLevel::Low
        } else if density_score < self.medium_score_threshold {
            DensityLevel::Medium
        } else {
            DensityLevel::High
        }
    }

    /// Road capacity from length and lane count. One vehicle slot is a
    /// body length plus a safety gap (30 m by default); minimum 1.
    pub fn calculate_road_capacity(&self, length: f64, lanes: u32) -> u32 {
        let vehicles_per_lane = (length / self.vehicle_space).floor();
        let total = (vehicles_per_lane * lanes as f64) as u32;
        total.max(1)
    }

    /// Occupancy ratio in [0, 1].
    pub fn congestion_ratio(&self, vehicle_count: u32, capacity: u32) -> f64 {
        if capacity == 0 {
            return 0.0;
        }
        (vehicle_count as f64 / capacity as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DensityConfig;

    fn calculator() -> DensityCalculator {
        DensityCalculator::new(&DensityConfig::default())
    }

    #[test]
    fn score_is_clamped_and_zero_capacity_is_zero() {
        let calc = calculator();
        assert_eq!(calc.calculate_density_score(6, 20), 30.0);
        assert_eq!(calc.calculate_density_score(50, 20), 100.0);
        assert_eq!(calc.calculate_density_score(5, 0), 0.0);
    }

    #[test]
    fn classification_thresholds() {
        let calc = calculator();
        // Road with capacity 20 and 6 vehicles: score 30, LOW by score,
        // MEDIUM by count.
        let score = calc.calculate_density_score(6, 20);
        assert_eq!(score, 30.0);
        assert_eq!(calc.classify_by_score(score), DensityLevel::Low);
        assert_eq!(calc.classify_density(6), DensityLevel::Medium);

        assert_eq!(calc.classify_density(4), DensityLevel::Low);
        assert_eq!(calc.classify_density(12), DensityLevel::High);
        assert_eq!(calc.classify_by_score(39.9), DensityLevel::Low);
        assert_eq!(calc.classify_by_score(40.0), DensityLevel::Medium);
        assert_eq!(calc.classify_by_score(70.0), DensityLevel::High);
    }

    #[test]
    fn capacity_formula() {
        let calc = calculator();
        // 600 m, 2 lanes, 30 m per slot -> 40 vehicles.
        assert_eq!(calc.calculate_road_capacity(600.0, 2), 40);
        // Tiny road still has capacity 1.
        assert_eq!(calc.calculate_road_capacity(10.0, 1), 1);
    }
}
