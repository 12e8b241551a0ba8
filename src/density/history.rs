// history.rs

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::density::DensityLevel;
use crate::models::road::RoadId;

/// Immutable density measurement at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensitySnapshot {
    pub timestamp: f64,
    pub road_id: RoadId,
    pub vehicle_count: u32,
    pub density_score: f64,
    pub classification: DensityLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DensityTrend {
    Decreasing,
    Stable,
    Increasing,
}

/// Per-road density history with bounded memory.
///
/// Each road owns a ring of at most `retention_seconds` snapshots (one per
/// second at the nominal tick rate); entries older than the retention
/// window are purged lazily on every append.
#[derive(Debug)]
pub struct DensityHistory {
    retention_seconds: u64,
    max_entries: usize,
    road_history: HashMap<RoadId, VecDeque<DensitySnapshot>>,
}

impl DensityHistory {
    pub fn new(retention_seconds: u64) -> Self {
        Self {
            retention_seconds,
            max_entries: retention_seconds as usize,
            road_history: HashMap::new(),
        }
    }

    pub fn add_snapshot(&mut self, snapshot: DensitySnapshot) {
        let now = snapshot.timestamp;
        let ring = self
            .road_history
            .entry(snapshot.road_id.clone())
            .or_insert_with(VecDeque::new);

        if ring.len() == self.max_entries {
            ring.pop_front();
        }
        ring.push_back(snapshot);

        // Drop entries that have aged out of the retention window.
        let cutoff = now - self.retention_seconds as f64;
        while ring.front().map_or(false, |s| s.timestamp < cutoff) {
            ring.pop_front();
        }
    }

    /// Chronological snapshots for the last `duration_seconds`, relative to
    /// the caller-visible `now`. Entries newer than `now` are excluded.
    pub fn get_history(&self, road_id: &str, duration_seconds: u64, now: f64) -> Vec<DensitySnapshot> {
        let cutoff = now - duration_seconds as f64;
        match self.road_history.get(road_id) {
            Some(ring) => ring
                .iter()
                .filter(|s| s.timestamp >= cutoff && s.timestamp <= now)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn latest(&self, road_id: &str) -> Option<&DensitySnapshot> {
        self.road_history.get(road_id).and_then(|ring| ring.back())
    }

    pub fn average_density(&self, road_id: &str, duration_seconds: u64, now: f64) -> f64 {
        let history = self.get_history(road_id, duration_seconds, now);
        if history.is_empty() {
            return 0.0;
        }
        history.iter().map(|s| s.density_score).sum::<f64>() / history.len() as f64
    }

    pub fn road_ids(&self) -> Vec<RoadId> {
        self.road_history.keys().cloned().collect()
    }

    pub fn len(&self, road_id: &str) -> usize {
        self.road_history.get(road_id).map_or(0, |r| r.len())
    }

    pub fn total_entries(&self) -> usize {
        self.road_history.values().map(|r| r.len()).sum()
    }

    pub fn retention_seconds(&self) -> u64 {
        self.retention_seconds
    }

    pub fn clear(&mut self) {
        self.road_history.clear();
    }
}

/// Trend analysis over a history window.
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    slope_threshold: f64,
}

impl TrendAnalyzer {
    pub fn new(slope_threshold: f64) -> Self {
        Self { slope_threshold }
    }

    /// Least-squares slope of density score against time normalized to
    /// [0, 1]; slopes beyond the threshold classify as INCREASING or
    /// DECREASING, everything else as STABLE.
    pub fn calculate_trend(&self, history: &[DensitySnapshot], window_seconds: u64) -> DensityTrend {
        if history.len() < 2 {
            return DensityTrend::Stable;
        }

        let current_time = history[history.len() - 1].timestamp;
        let cutoff = current_time - window_seconds as f64;
        let recent: Vec<&DensitySnapshot> =
            history.iter().filter(|s| s.timestamp >= cutoff).collect();
        if recent.len() < 2 {
            return DensityTrend::Stable;
        }

        let t_min = recent.iter().map(|s| s.timestamp).fold(f64::INFINITY, f64::min);
        let t_max = recent
            .iter()
            .map(|s| s.timestamp)
            .fold(f64::NEG_INFINITY, f64::max);
        let t_range = t_max - t_min;
        if t_range == 0.0 {
            return DensityTrend::Stable;
        }

        let n = recent.len() as f64;
        let mut sum_t = 0.0;
        let mut sum_d = 0.0;
        let mut sum_td = 0.0;
        let mut sum_t2 = 0.0;
        for s in &recent {
            let t = (s.timestamp - t_min) / t_range;
            sum_t += t;
            sum_d += s.density_score;
            sum_td += t * s.density_score;
            sum_t2 += t * t;
        }

        let denominator = n * sum_t2 - sum_t * sum_t;
        if denominator == 0.0 {
            return DensityTrend::Stable;
        }
        let slope = (n * sum_td - sum_t * sum_d) / denominator;

        if slope > self.slope_threshold {
            DensityTrend::Increasing
        } else if slope < -self.slope_threshold {
            DensityTrend::Decreasing
        } else {
            DensityTrend::Stable
        }
    }

    /// Vehicles/second change rate across the window.
    pub fn rate_of_change(&self, history: &[DensitySnapshot]) -> f64 {
        if history.len() < 2 {
            return 0.0;
        }
        let first = &history[0];
        let last = &history[history.len() - 1];
        let time_diff = last.timestamp - first.timestamp;
        if time_diff == 0.0 {
            return 0.0;
        }
        (last.vehicle_count as f64 - first.vehicle_count as f64) / time_diff
    }

    /// Standard deviation of the density scores.
    pub fn volatility(&self, history: &[DensitySnapshot]) -> f64 {
        if history.len() < 2 {
            return 0.0;
        }
        let scores: Vec<f64> = history.iter().map(|s| s.density_score).collect();
        let avg = scores.iter().sum::<f64>() / scores.len() as f64;
        let variance = scores.iter().map(|d| (d - avg).powi(2)).sum::<f64>() / scores.len() as f64;
        variance.sqrt()
    }

    /// Rough estimate of seconds until the density score reaches
    /// `threshold`, or None when the current rate will never get there.
    pub fn time_to_threshold(&self, history: &[DensitySnapshot], threshold: f64) -> Option<f64> {
        if history.len() < 2 {
            return None;
        }
        let current = history[history.len() - 1].density_score;
        if current >= threshold {
            return Some(0.0);
        }
        let rate = self.rate_of_change(history);
        if rate <= 0.0 {
            return None;
        }
        // Approximate one vehicle as ten points of density.
        Some(((threshold - current) / (rate * 10.0)).max(0.0))
    }
}
