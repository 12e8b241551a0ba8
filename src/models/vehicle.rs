// vehicle.rs

use serde::{Deserialize, Serialize};

use crate::models::road::RoadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleType {
    Car,
    Bus,
    Truck,
    EmergencyVan,
}

impl std::fmt::Display for VehicleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VehicleType::Car => "CAR",
            VehicleType::Bus => "BUS",
            VehicleType::Truck => "TRUCK",
            VehicleType::EmergencyVan => "EMERGENCY_VAN",
        };
        f.write_str(s)
    }
}

/// One observed vehicle position, as pushed by a sensor feed or simulator.
/// The density tracker buckets these by `road_id` every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleObservation {
    pub vehicle_id: String,
    pub number_plate: String,
    pub road_id: RoadId,
    pub x: f64,
    pub y: f64,
    pub speed: f64,
    pub vehicle_type: VehicleType,
}
