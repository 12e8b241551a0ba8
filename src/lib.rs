// lib.rs
//
// Control plane of the urban traffic intelligence platform: density
// tracking, the autonomous signal agent, the safety kernel, congestion
// prediction, detection logging, and incident inference.

pub mod agent;
pub mod communication;
pub mod config;
pub mod control_system;
pub mod density;
pub mod detection;
pub mod events;
pub mod feed;
pub mod global_variables;
pub mod incident;
pub mod models;
pub mod persistence;
pub mod prediction;
pub mod registry;
pub mod safety;

use std::time::{SystemTime, UNIX_EPOCH};

/// Exit code for unrecoverable safety-kernel failures.
pub const EXIT_SAFETY_FAULT: i32 = 70;

/// Seconds since the Unix epoch, with sub-second precision.
pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
