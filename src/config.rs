// config.rs
//
// All tunables for the control plane, loadable from a JSON file
// (config/traffic.json by default). Every field has a default so a missing
// or partial file still yields a runnable configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub density: DensityConfig,
    pub safety: SafetyConfig,
    pub watchdog: WatchdogConfig,
    pub agent: AgentConfig,
    pub detection: DetectionConfig,
    pub prediction: PredictionConfig,
    pub incident: IncidentConfig,
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Loads configuration from a JSON file, falling back to defaults when
    /// the file is missing or unreadable.
    pub fn load(path: &Path) -> Config {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(config) => {
                    log::info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Bad config file {}: {}. Using defaults.", path.display(), e);
                    Config::default()
                }
            },
            Err(_) => {
                log::info!("No config file at {}, using defaults", path.display());
                Config::default()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DensityConfig {
    /// Per-road history ring capacity, in seconds (one snapshot per second).
    pub retention_seconds: u64,
    /// Count-based classification thresholds.
    pub low_vehicles: u32,
    pub medium_vehicles: u32,
    /// Score-based classification thresholds.
    pub low_score: f64,
    pub medium_score: f64,
    /// Average vehicle body length plus safety gap, for capacity.
    pub vehicle_length: f64,
    pub safety_gap: f64,
    /// Trend slope magnitude below which density counts as stable.
    pub trend_slope_threshold: f64,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            retention_seconds: 600,
            low_vehicles: 5,
            medium_vehicles: 12,
            low_score: 40.0,
            medium_score: 70.0,
            vehicle_length: 20.0,
            safety_gap: 10.0,
            trend_slope_threshold: 5.0,
        }
    }
}

/// Signal pattern applied on fail-safe entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailSafePattern {
    #[serde(rename = "ALL_RED")]
    AllRed,
    #[serde(rename = "BLINK_YELLOW")]
    BlinkYellow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub min_red_time_s: f64,
    pub min_green_time_s: f64,
    /// A direction stuck RED longer than this raises an audit warning.
    pub max_red_time_s: f64,
    /// Grace period before "no direction GREEN" becomes an audit warning.
    pub no_green_grace_s: f64,
    /// Allow opposing pairs (N/S, E/W) to share GREEN.
    pub allow_opposing_pairs: bool,
    pub fail_safe_pattern: FailSafePattern,
    /// Retained mode transitions in memory.
    pub transition_log_size: usize,
    /// EMERGENCY mode with no active corridor reverts to NORMAL after this.
    pub emergency_idle_revert_s: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            min_red_time_s: 2.0,
            min_green_time_s: 10.0,
            max_red_time_s: 300.0,
            no_green_grace_s: 60.0,
            allow_opposing_pairs: false,
            fail_safe_pattern: FailSafePattern::AllRed,
            transition_log_size: 1024,
            emergency_idle_revert_s: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub interval_s: f64,
    pub max_agent_lag_s: f64,
    pub max_actuator_lag_s: f64,
    /// Budget per individual health check.
    pub check_budget_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_s: 2.0,
            max_agent_lag_s: 5.0,
            max_actuator_lag_s: 3.0,
            check_budget_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub loop_interval_s: f64,
    /// GREEN duration used by the RL strategy.
    pub default_green_duration_s: f64,
    /// Consecutive ticks with no admitted actions before a warning.
    pub idle_tick_warning: u64,
    /// Consecutive idle ticks before the watchdog escalates.
    pub max_idle_ticks: u64,
    /// Decision latency above this is logged as slow.
    pub slow_decision_ms: f64,
    /// Junctions handed to the prediction stage each tick.
    pub predict_top_k: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            loop_interval_s: 1.0,
            default_green_duration_s: 30.0,
            idle_tick_warning: 3,
            max_idle_ticks: 10,
            slow_decision_ms: 100.0,
            predict_top_k: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub buffer_size: usize,
    pub flush_interval_s: f64,
    pub retention_hours: u64,
    /// Consecutive failures before a batch is quarantined.
    pub max_batch_retries: u32,
    /// Bounded wait for the shutdown flush.
    pub shutdown_flush_timeout_s: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            flush_interval_s: 5.0,
            retention_hours: 24,
            max_batch_retries: 3,
            shutdown_flush_timeout_s: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionAlgorithm {
    #[serde(rename = "MA")]
    MovingAverage,
    #[serde(rename = "LINEAR")]
    LinearTrend,
    #[serde(rename = "EXP")]
    ExponentialSmoothing,
    #[serde(rename = "NN")]
    NeuralNetwork,
    #[serde(rename = "RL")]
    RlValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub algorithm: PredictionAlgorithm,
    /// Horizons in minutes.
    pub horizons_min: Vec<u32>,
    /// Snapshots consumed by the statistical methods.
    pub history_window: usize,
    pub smoothing_alpha: f64,
    pub trend_beta: f64,
    pub broadcast_interval_s: f64,
    pub alert_cooldown_s: f64,
    /// Classifier thresholds.
    pub low_score: f64,
    pub medium_score: f64,
    pub high_score: f64,
    /// Roads included per broadcast frame.
    pub broadcast_road_cap: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            algorithm: PredictionAlgorithm::ExponentialSmoothing,
            horizons_min: vec![3, 5, 10],
            history_window: 30,
            smoothing_alpha: 0.3,
            trend_beta: 0.1,
            broadcast_interval_s: 30.0,
            alert_cooldown_s: 120.0,
            low_score: 40.0,
            medium_score: 70.0,
            high_score: 90.0,
            broadcast_road_cap: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentConfig {
    /// Detection lookback window before the reported time.
    pub lookback_minutes: u64,
    /// Assumed maximum vehicle speed for reachability, km/h.
    pub max_speed_kmh: f64,
    pub top_k: usize,
    /// Confidence decay constant for the degraded last-known-only result.
    pub decay_tau_s: f64,
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            lookback_minutes: 30,
            max_speed_kmh: 60.0,
            top_k: 5,
            decay_tau_s: 600.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub data_dir: String,
    /// Period for sampling road densities into traffic_history.
    pub history_sample_interval_s: f64,
    pub history_retention_hours: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            history_sample_interval_s: 30.0,
            history_retention_hours: 24,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_manifest() {
        let config = Config::default();
        assert_eq!(config.density.retention_seconds, 600);
        assert_eq!(config.density.low_vehicles, 5);
        assert_eq!(config.density.medium_vehicles, 12);
        assert_eq!(config.safety.min_red_time_s, 2.0);
        assert_eq!(config.safety.min_green_time_s, 10.0);
        assert_eq!(config.safety.fail_safe_pattern, FailSafePattern::AllRed);
        assert_eq!(config.watchdog.interval_s, 2.0);
        assert_eq!(config.watchdog.max_agent_lag_s, 5.0);
        assert_eq!(config.agent.loop_interval_s, 1.0);
        assert_eq!(config.detection.buffer_size, 100);
        assert_eq!(config.detection.flush_interval_s, 5.0);
        assert_eq!(config.detection.retention_hours, 24);
        assert_eq!(
            config.prediction.algorithm,
            PredictionAlgorithm::ExponentialSmoothing
        );
        assert_eq!(config.prediction.broadcast_interval_s, 30.0);
        assert_eq!(config.prediction.alert_cooldown_s, 120.0);
    }

    #[test]
    fn partial_json_overlays_defaults() {
        let raw = r#"{"safety": {"fail_safe_pattern": "BLINK_YELLOW"}, "detection": {"buffer_size": 10}}"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.safety.fail_safe_pattern, FailSafePattern::BlinkYellow);
        assert_eq!(config.safety.min_red_time_s, 2.0);
        assert_eq!(config.detection.buffer_size, 10);
        assert_eq!(config.detection.retention_hours, 24);
    }
}
