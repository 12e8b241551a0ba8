// engine.rs

use serde::{Deserialize, Serialize};

use crate::config::{PredictionAlgorithm, PredictionConfig};
use crate::density::history::DensitySnapshot;
use crate::models::road::RoadId;

/// Short-horizon congestion forecast for one road.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongestionPrediction {
    pub road_id: RoadId,
    pub predicted_at: f64,
    pub current_density: f64,
    /// Ordered `(future_ts, predicted_density)` pairs, one per horizon.
    pub predictions: Vec<(f64, f64)>,
    pub confidence: f64,
    pub algorithm: PredictionAlgorithm,
}

/// Time-series forecasting over the density history.
///
/// The statistical methods assume the nominal one-snapshot-per-second
/// cadence of the density tracker.
pub struct PredictionEngine {
    algorithm: PredictionAlgorithm,
    horizons_min: Vec<u32>,
    history_window: usize,
    alpha: f64,
    beta: f64,
}

impl PredictionEngine {
    pub fn new(config: &PredictionConfig) -> Self {
        let algorithm = match config.algorithm {
            PredictionAlgorithm::NeuralNetwork => {
                log::warn!("No neural predictor available; falling back to exponential smoothing");
                PredictionAlgorithm::ExponentialSmoothing
            }
            PredictionAlgorithm::RlValue => {
                // The RL value function is an auxiliary junction-risk signal,
                // not a road forecaster; roads use exponential smoothing.
                log::info!("RL value predictions are junction-scoped; roads use exponential smoothing");
                PredictionAlgorithm::ExponentialSmoothing
            }
            other => other,
        };
        Self {
            algorithm,
            horizons_min: config.horizons_min.clone(),
            history_window: config.history_window,
            alpha: config.smoothing_alpha,
            beta: config.trend_beta,
        }
    }

    pub fn algorithm(&self) -> PredictionAlgorithm {
        self.algorithm
    }

    /// Forecast for one road from its history; None when the history is
    /// too short to say anything (< 2 snapshots).
    pub fn predict(
        &self,
        road_id: &str,
        history: &[DensitySnapshot],
        now: f64,
    ) -> Option<CongestionPrediction> {
        self.predict_with_horizons(road_id, history, &self.horizons_min, now)
    }

    pub fn predict_with_horizons(
        &self,
        road_id: &str,
        history: &[DensitySnapshot],
        horizons_min: &[u32],
        now: f64,
    ) -> Option<CongestionPrediction> {
        if history.len() < 2 {
            return None;
        }
        let window_start = history.len().saturating_sub(self.history_window.max(2));
        let window = &history[window_start..];
        let current_density = window[window.len() - 1].density_score;

        let predictions: Vec<(f64, f64)> = horizons_min
            .iter()
            .map(|&minutes| {
                let horizon_s = minutes as f64 * 60.0;
                let value = match self.algorithm {
                    PredictionAlgorithm::MovingAverage => self.moving_average(window),
                    PredictionAlgorithm::LinearTrend => self.linear_trend(window, horizon_s),
                    _ => self.exponential_smoothing(window, horizon_s),
                };
                (now + horizon_s, value.clamp(0.0, 100.0))
            })
            .collect();

        Some(CongestionPrediction {
            road_id: road_id.to_string(),
            predicted_at: now,
            current_density,
            predictions,
            confidence: (window.len() as f64 / 60.0).min(1.0),
            algorithm: self.algorithm,
        })
    }

    /// Constant forecast: the mean of the window.
    fn moving_average(&self, window: &[DensitySnapshot]) -> f64 {
        window.iter().map(|s| s.density_score).sum::<f64>() / window.len() as f64
    }

    /// Least-squares line over the window, extrapolated `horizon_s` ahead.
    fn linear_trend(&self, window: &[DensitySnapshot], horizon_s: f64) -> f64 {
        let t0 = window[0].timestamp;
        let n = window.len() as f64;
        let mut sum_t = 0.0;
        let mut sum_y = 0.0;
        let mut sum_ty = 0.0;
        let mut sum_t2 = 0.0;
        for s in window {
            let t = s.timestamp - t0;
            sum_t += t;
            sum_y += s.density_score;
            sum_ty += t * s.density_score;
            sum_t2 += t * t;
        }
        let denominator = n * sum_t2 - sum_t * sum_t;
        if denominator == 0.0 {
            return window[window.len() - 1].density_score;
        }
        let a = (n * sum_ty - sum_t * sum_y) / denominator;
        let b = (sum_y - a * sum_t) / n;
        let t_future = (window[window.len() - 1].timestamp - t0) + horizon_s;
        a * t_future + b
    }

    /// Holt double exponential smoothing: level plus trend, projected
    /// `horizon_s` steps ahead at the 1 Hz snapshot cadence.
    fn exponential_smoothing(&self, window: &[DensitySnapshot], horizon_s: f64) -> f64 {
        let mut level = window[0].density_score;
        let mut trend = window[1].density_score - window[0].density_score;
        for s in &window[1..] {
            let previous_level = level;
            level = self.alpha * s.density_score + (1.0 - self.alpha) * (level + trend);
            trend = self.beta * (level - previous_level) + (1.0 - self.beta) * trend;
        }
        level + horizon_s * trend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density::DensityLevel;

    fn ramp(from: f64, step: f64, count: usize) -> Vec<DensitySnapshot> {
        (0..count)
            .map(|i| DensitySnapshot {
                timestamp: 1000.0 + i as f64,
                road_id: "R-1-2".to_string(),
                vehicle_count: 0,
                density_score: from + step * i as f64,
                classification: DensityLevel::Low,
            })
            .collect()
    }

    fn engine(algorithm: PredictionAlgorithm) -> PredictionEngine {
        let mut config = PredictionConfig::default();
        config.algorithm = algorithm;
        PredictionEngine::new(&config)
    }

    #[test]
    fn too_short_history_yields_none() {
        let e = engine(PredictionAlgorithm::ExponentialSmoothing);
        assert!(e.predict("R-1-2", &ramp(30.0, 2.0, 1), 2000.0).is_none());
    }

    #[test]
    fn rising_history_predicts_above_current() {
        // 20 samples climbing 30 -> 68 at 1 s spacing.
        let history = ramp(30.0, 2.0, 20);
        let e = engine(PredictionAlgorithm::ExponentialSmoothing);
        let prediction = e
            .predict_with_horizons("R-1-2", &history, &[3], 1019.0)
            .unwrap();
        let (ts, value) = prediction.predictions[0];
        assert_eq!(ts, 1019.0 + 180.0);
        assert!(value > 68.0, "predicted {} not above current", value);
        assert!(value <= 100.0);
        assert!(prediction.confidence > 0.0 && prediction.confidence <= 1.0);
    }

    #[test]
    fn moving_average_is_flat() {
        let history = ramp(40.0, 0.0, 30);
        let e = engine(PredictionAlgorithm::MovingAverage);
        let prediction = e.predict("R-1-2", &history, 2000.0).unwrap();
        for (_, value) in prediction.predictions {
            assert_eq!(value, 40.0);
        }
    }

    #[test]
    fn linear_trend_extrapolates_and_clamps() {
        let history = ramp(10.0, 1.0, 30);
        let e = engine(PredictionAlgorithm::LinearTrend);
        let prediction = e
            .predict_with_horizons("R-1-2", &history, &[1, 10], 1030.0)
            .unwrap();
        // One minute out: 39 + 60 ~= 99; ten minutes out clamps at 100.
        assert!(prediction.predictions[0].1 > 90.0);
        assert_eq!(prediction.predictions[1].1, 100.0);

        let falling = ramp(50.0, -2.0, 30);
        let prediction = e
            .predict_with_horizons("R-1-2", &falling, &[10], 1030.0)
            .unwrap();
        assert_eq!(prediction.predictions[0].1, 0.0);
    }

    #[test]
    fn nn_config_falls_back_to_smoothing() {
        let e = engine(PredictionAlgorithm::NeuralNetwork);
        assert_eq!(e.algorithm(), PredictionAlgorithm::ExponentialSmoothing);
    }
}
