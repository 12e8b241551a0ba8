// classifier.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PredictionConfig;
use crate::models::road::RoadId;
use crate::prediction::engine::CongestionPrediction;

/// Predicted congestion bands; JAM only exists for forecasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CongestionLevel {
    Low,
    Medium,
    High,
    Jam,
}

impl std::fmt::Display for CongestionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CongestionLevel::Low => "LOW",
            CongestionLevel::Medium => "MEDIUM",
            CongestionLevel::High => "HIGH",
            CongestionLevel::Jam => "JAM",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongestionAlert {
    pub alert_id: String,
    pub road_id: RoadId,
    pub predicted_level: CongestionLevel,
    pub severity: AlertSeverity,
    /// When the predicted congestion is expected to occur.
    pub predicted_at_time: f64,
    pub created_at: f64,
    pub message: String,
}

/// Maps predicted densities to congestion levels and generates
/// deduplicated alerts: at most one active alert per `(road, level)`
/// inside the cooldown window.
pub struct CongestionClassifier {
    low_score: f64,
    medium_score: f64,
    high_score: f64,
    alert_threshold: CongestionLevel,
    cooldown_s: f64,
    /// `(road, level)` -> created_at of the last alert.
    recent_alerts: HashMap<(RoadId, CongestionLevel), f64>,
    total_alerts: u64,
}

impl CongestionClassifier {
    pub fn new(config: &PredictionConfig) -> Self {
        Self {
            low_score: config.low_score,
            medium_score: config.medium_score,
            high_score: config.high_score,
            alert_threshold: CongestionLevel::High,
            cooldown_s: config.alert_cooldown_s,
            recent_alerts: HashMap::new(),
            total_alerts: 0,
        }
    }

    pub fn classify_density(&self, density: f64) -> CongestionLevel {
        if density < self.low_score {
            CongestionLevel::Low
        } else if density < self.medium_score {
            CongestionLevel::Medium
        } else if density < self.high_score {
            CongestionLevel::High
        } else {
            CongestionLevel::Jam
        }
    }

    /// The worst level across all of a prediction's horizons.
    pub fn max_predicted_level(&self, prediction: &CongestionPrediction) -> CongestionLevel {
        prediction
            .predictions
            .iter()
            .map(|&(_, density)| self.classify_density(density))
            .max()
            .unwrap_or(CongestionLevel::Low)
    }

    /// Emits an alert when the worst predicted level reaches the
    /// threshold and no alert for the same `(road, level)` was created
    /// inside the cooldown window.
    pub fn check_for_alerts(
        &mut self,
        prediction: &CongestionPrediction,
        now: f64,
    ) -> Vec<CongestionAlert> {
        let mut alerts = Vec::new();

        // Worst horizon drives the alert.
        let worst = prediction
            .predictions
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let (predicted_ts, predicted_density) = match worst {
            Some(&pair) => pair,
            None => return alerts,
        };
        let level = self.classify_density(predicted_density);
        if level < self.alert_threshold {
            return alerts;
        }

        let key = (prediction.road_id.clone(), level);
        if let Some(&last) = self.recent_alerts.get(&key) {
            if now - last < self.cooldown_s {
                return alerts;
            }
        }
        self.recent_alerts.insert(key, now);

        let severity = match level {
            CongestionLevel::Jam => AlertSeverity::Critical,
            CongestionLevel::High => AlertSeverity::Warning,
            _ => AlertSeverity::Info,
        };
        let minutes_ahead = ((predicted_ts - now) / 60.0).max(0.0).round() as u64;
        let alert = CongestionAlert {
            alert_id: format!("ALERT-{}", Uuid::new_v4().simple()),
            road_id: prediction.road_id.clone(),
            predicted_level: level,
            severity,
            predicted_at_time: predicted_ts,
            created_at: now,
            message: format!(
                "{} congestion predicted on {} in ~{} min (density {:.0})",
                level, prediction.road_id, minutes_ahead, predicted_density
            ),
        };
        self.total_alerts += 1;
        log::warn!("Congestion alert: {}", alert.message);
        alerts.push(alert);
        alerts
    }

    /// Drops cooldown bookkeeping older than the window.
    pub fn prune_expired(&mut self, now: f64) {
        let cooldown = self.cooldown_s;
        self.recent_alerts.retain(|_, &mut ts| now - ts < cooldown);
    }

    pub fn total_alerts(&self) -> u64 {
        self.total_alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PredictionAlgorithm;

    fn classifier() -> CongestionClassifier {
        CongestionClassifier::new(&PredictionConfig::default())
    }

    fn prediction(road: &str, density: f64, now: f64) -> CongestionPrediction {
        CongestionPrediction {
            road_id: road.to_string(),
            predicted_at: now,
            current_density: density,
            predictions: vec![(now + 180.0, density)],
            confidence: 0.8,
            algorithm: PredictionAlgorithm::ExponentialSmoothing,
        }
    }

    #[test]
    fn level_bands() {
        let c = classifier();
        assert_eq!(c.classify_density(10.0), CongestionLevel::Low);
        assert_eq!(c.classify_density(40.0), CongestionLevel::Medium);
        assert_eq!(c.classify_density(70.0), CongestionLevel::High);
        assert_eq!(c.classify_density(95.0), CongestionLevel::Jam);
    }

    #[test]
    fn alerts_only_at_or_above_high() {
        let mut c = classifier();
        assert!(c.check_for_alerts(&prediction("R-1", 50.0, 0.0), 0.0).is_empty());

        let alerts = c.check_for_alerts(&prediction("R-1", 75.0, 0.0), 0.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert_eq!(alerts[0].predicted_level, CongestionLevel::High);

        let alerts = c.check_for_alerts(&prediction("R-2", 95.0, 0.0), 0.0);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn duplicate_alerts_suppressed_within_cooldown() {
        let mut c = classifier();
        assert_eq!(c.check_for_alerts(&prediction("R-1", 75.0, 0.0), 0.0).len(), 1);
        // Same road and level inside the 120 s window: suppressed.
        assert!(c.check_for_alerts(&prediction("R-1", 78.0, 60.0), 60.0).is_empty());
        // A different level is a different alert key.
        assert_eq!(c.check_for_alerts(&prediction("R-1", 95.0, 61.0), 61.0).len(), 1);
        // After the cooldown the same key fires again.
        assert_eq!(
            c.check_for_alerts(&prediction("R-1", 75.0, 121.0), 121.0).len(),
            1
        );
        assert_eq!(c.total_alerts(), 3);
    }
}
