// rl_value.rs
//
// Congestion risk extracted from an RL critic. The value function V(s)
// estimates expected future reward; lower values correlate with worse
// upcoming traffic states, which we fold into a per-junction risk score.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::junction::JunctionId;

/// Seam for a trained critic. Returns None when no estimate is available
/// for the observation.
pub trait ValueEstimator: Send + Sync {
    fn estimate(&self, observation: &[f64]) -> Option<f64>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlValuePrediction {
    pub junction_id: JunctionId,
    /// 0-100, higher is worse.
    pub congestion_risk: f64,
    pub value_estimate: f64,
    pub confidence: f64,
    pub timestamp: f64,
}

pub struct RlValuePredictor {
    estimator: Option<Arc<dyn ValueEstimator>>,
    features_per_junction: usize,
}

impl RlValuePredictor {
    pub fn new(estimator: Option<Arc<dyn ValueEstimator>>) -> Self {
        Self {
            estimator,
            features_per_junction: 7,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.estimator.is_some()
    }

    /// Maps a raw value estimate onto a 0-100 congestion risk. Positive
    /// values mean a healthy state, negative a degrading one.
    pub fn value_to_congestion_risk(value: f64) -> f64 {
        let risk = if value > 0.0 {
            50.0 - value / 10.0
        } else {
            50.0 + value.abs() / 20.0
        };
        risk.clamp(0.0, 100.0)
    }

    /// Per-junction risk, blending the network-wide value estimate 50/50
    /// with each junction's local directional density.
    pub fn predict(
        &self,
        observation: &[f64],
        junction_ids: &[JunctionId],
        now: f64,
    ) -> HashMap<JunctionId, RlValuePrediction> {
        let estimator = match &self.estimator {
            Some(estimator) => estimator,
            None => return HashMap::new(),
        };
        let value = match estimator.estimate(observation) {
            Some(value) => value,
            None => return HashMap::new(),
        };

        let overall_risk = Self::value_to_congestion_risk(value);
        let confidence = if value.abs() > 10.0 { 0.7 } else { 0.5 };
        let mut predictions = HashMap::new();

        for (i, junction_id) in junction_ids.iter().enumerate() {
            let start = i * self.features_per_junction;
            let end = start + self.features_per_junction;
            let local_risk = if end <= observation.len() {
                // First four features are the normalized directional
                // densities; scale back up to 0-100.
                let local_density =
                    observation[start..start + 4].iter().sum::<f64>() / 4.0 * 100.0;
                ((overall_risk * 0.5) + (local_density * 0.5)).clamp(0.0, 100.0)
            } else {
                overall_risk
            };

            predictions.insert(
                junction_id.clone(),
                RlValuePrediction {
                    junction_id: junction_id.clone(),
                    congestion_risk: local_risk,
                    value_estimate: value,
                    confidence,
                    timestamp: now,
                },
            );
        }
        predictions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEstimator(f64);
    impl ValueEstimator for FixedEstimator {
        fn estimate(&self, _observation: &[f64]) -> Option<f64> {
            Some(self.0)
        }
    }

    #[test]
    fn risk_mapping() {
        assert_eq!(RlValuePredictor::value_to_congestion_risk(0.0), 50.0);
        assert_eq!(RlValuePredictor::value_to_congestion_risk(100.0), 40.0);
        assert_eq!(RlValuePredictor::value_to_congestion_risk(-200.0), 60.0);
        assert_eq!(RlValuePredictor::value_to_congestion_risk(1000.0), 0.0);
        assert_eq!(RlValuePredictor::value_to_congestion_risk(-2000.0), 100.0);
    }

    #[test]
    fn no_estimator_means_no_predictions() {
        let predictor = RlValuePredictor::new(None);
        assert!(!predictor.is_ready());
        assert!(predictor
            .predict(&[0.0; 63], &["J-1".to_string()], 0.0)
            .is_empty());
    }

    #[test]
    fn local_density_shifts_risk() {
        let predictor = RlValuePredictor::new(Some(Arc::new(FixedEstimator(-100.0))));
        // Overall risk 55; junction 1 is fully congested locally,
        // junction 2 completely empty.
        let mut observation = vec![0.0; 14];
        for v in observation.iter_mut().take(4) {
            *v = 1.0;
        }
        let junctions = vec!["J-1".to_string(), "J-2".to_string()];
        let predictions = predictor.predict(&observation, &junctions, 5.0);
        let j1 = &predictions["J-1"];
        let j2 = &predictions["J-2"];
        assert!(j1.congestion_risk > j2.congestion_risk);
        assert_eq!(j1.confidence, 0.7);
        assert_eq!(j1.congestion_risk, 0.5 * 55.0 + 0.5 * 100.0);
        assert_eq!(j2.congestion_risk, 0.5 * 55.0);
    }
}
