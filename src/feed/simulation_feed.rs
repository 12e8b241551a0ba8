// simulation_feed.rs
//
// Synthetic vehicle feed used to exercise the control plane without a
// real sensor network. Vehicles spawn at random junctions, follow random
// road routes, stop at red lights, and occasionally run them.

use std::sync::Arc;

use rand::Rng;

use crate::control_system::signal_actuator::SignalActuator;
use crate::detection::logger::VehicleDetectionEvent;
use crate::models::junction::{Direction, JunctionId, SignalColor};
use crate::models::network::RoadNetwork;
use crate::models::road::{Road, RoadId};
use crate::models::vehicle::{VehicleObservation, VehicleType};

/// Travel heading of a road, derived from its endpoint coordinates.
pub fn road_heading(network: &RoadNetwork, road: &Road) -> Direction {
    let from = network.junction(&road.from_junction);
    let to = network.junction(&road.to_junction);
    match (from, to) {
        (Some(from), Some(to)) => {
            if (to.x - from.x).abs() > (to.y - from.y).abs() {
                if to.x > from.x {
                    Direction::East
                } else {
                    Direction::West
                }
            } else if to.y > from.y {
                Direction::South
            } else {
                Direction::North
            }
        }
        _ => Direction::North,
    }
}

#[derive(Debug)]
struct SimulatedVehicle {
    vehicle_id: String,
    number_plate: String,
    vehicle_type: VehicleType,
    speed_kmh: f64,
    route: Vec<RoadId>,
    route_index: usize,
    progress_m: f64,
}

pub struct FeedOutput {
    pub observations: Vec<VehicleObservation>,
    pub detections: Vec<VehicleDetectionEvent>,
    /// `(plate, junction)` pairs for red-light runs this tick.
    pub violations: Vec<(String, JunctionId)>,
}

pub struct SimulationFeed {
    network: Arc<RoadNetwork>,
    vehicles: Vec<SimulatedVehicle>,
    next_vehicle_id: u64,
    spawn_per_tick: usize,
    max_vehicles: usize,
}

impl SimulationFeed {
    pub fn new(network: Arc<RoadNetwork>, spawn_per_tick: usize, max_vehicles: usize) -> Self {
        Self {
            network,
            vehicles: Vec::new(),
            next_vehicle_id: 1,
            spawn_per_tick,
            max_vehicles,
        }
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Spawn a vehicle on a random route of 3-6 consecutive roads.
    fn spawn_vehicle(&mut self) {
        let mut rng = rand::rng();
        if self.network.junctions.is_empty() {
            return;
        }
        let start = &self.network.junctions[rng.random_range(0..self.network.junctions.len())];

        let mut route: Vec<RoadId> = Vec::new();
        let mut current = start.id.clone();
        let hops = rng.random_range(3..=6);
        for _ in 0..hops {
            let outgoing: Vec<&Road> = self
                .network
                .roads
                .iter()
                .filter(|r| r.from_junction == current)
                .collect();
            if outgoing.is_empty() {
                break;
            }
            let road = outgoing[rng.random_range(0..outgoing.len())];
            route.push(road.id.clone());
            current = road.to_junction.clone();
        }
        if route.is_empty() {
            return;
        }

        // Car 50%, Truck 25%, Bus 15%, EmergencyVan 10%.
        let roll: f64 = rng.random_range(0.0..1.0);
        let vehicle_type = if roll < 0.50 {
            VehicleType::Car
        } else if roll < 0.75 {
            VehicleType::Truck
        } else if roll < 0.90 {
            VehicleType::Bus
        } else {
            VehicleType::EmergencyVan
        };
        let speed_kmh = match vehicle_type {
            VehicleType::Car => rng.random_range(35.0..60.0),
            VehicleType::Bus => rng.random_range(30.0..50.0),
            VehicleType::Truck => rng.random_range(25.0..45.0),
            VehicleType::EmergencyVan => rng.random_range(50.0..80.0),
        };

        let id = self.next_vehicle_id;
        self.next_vehicle_id += 1;
        self.vehicles.push(SimulatedVehicle {
            vehicle_id: format!("veh-{}", id),
            number_plate: format!("KA-{:02}-{:04}", id % 78 + 1, 1000 + id % 9000),
            vehicle_type,
            speed_kmh,
            route,
            route_index: 0,
            progress_m: 0.0,
        });
    }

    /// One second of simulated movement. Returns the observations for the
    /// density tracker and the junction passages for the detection logger.
    pub fn tick(&mut self, now: f64, actuator: &dyn SignalActuator) -> FeedOutput {
        for _ in 0..self.spawn_per_tick {
            if self.vehicles.len() >= self.max_vehicles {
                break;
            }
            self.spawn_vehicle();
        }

        let mut output = FeedOutput {
            observations: Vec::with_capacity(self.vehicles.len()),
            detections: Vec::new(),
            violations: Vec::new(),
        };
        let mut finished: Vec<usize> = Vec::new();
        let mut rng = rand::rng();

        for (index, vehicle) in self.vehicles.iter_mut().enumerate() {
            let road = match self
                .network
                .road(&vehicle.route[vehicle.route_index])
            {
                Some(road) => road.clone(),
                None => {
                    finished.push(index);
                    continue;
                }
            };
            let heading = road_heading(&self.network, &road);
            let junction = self.network.junction(&road.to_junction);

            let speed_ms = vehicle.speed_kmh / 3.6;
            let at_stop_line = vehicle.progress_m + speed_ms >= road.length;

            let mut may_cross = true;
            let mut ran_red = false;
            if at_stop_line {
                // The approach head faces the side the vehicle arrives on.
                let approach = heading.opposite();
                if let Some(signals) = actuator.signals(&road.to_junction) {
                    if signals.get(approach).current != SignalColor::Green {
                        // Emergency vans and the odd scofflaw run the red.
                        if vehicle.vehicle_type == VehicleType::EmergencyVan
                            || rng.random_bool(0.02)
                        {
                            ran_red = vehicle.vehicle_type != VehicleType::EmergencyVan;
                            may_cross = true;
                        } else {
                            may_cross = false;
                        }
                    }
                }
            }

            if at_stop_line && may_cross {
                let outgoing = vehicle
                    .route
                    .get(vehicle.route_index + 1)
                    .cloned();
                output.detections.push(VehicleDetectionEvent {
                    vehicle_id: vehicle.vehicle_id.clone(),
                    number_plate: vehicle.number_plate.clone(),
                    junction_id: road.to_junction.clone(),
                    direction: heading,
                    timestamp: now,
                    position_x: junction.map_or(0.0, |j| j.x),
                    position_y: junction.map_or(0.0, |j| j.y),
                    speed: vehicle.speed_kmh,
                    vehicle_type: vehicle.vehicle_type,
                    incoming_road: Some(road.id.clone()),
                    outgoing_road: outgoing,
                    violation_detected: ran_red,
                });
                if ran_red {
                    output
                        .violations
                        .push((vehicle.number_plate.clone(), road.to_junction.clone()));
                }

                vehicle.route_index += 1;
                vehicle.progress_m = 0.0;
                if vehicle.route_index >= vehicle.route.len() {
                    finished.push(index);
                    continue;
                }
            } else if !at_stop_line {
                vehicle.progress_m += speed_ms;
            }

            let current_road = &vehicle.route[vehicle.route_index];
            let position = junction.map(|j| (j.x, j.y)).unwrap_or((0.0, 0.0));
            output.observations.push(VehicleObservation {
                vehicle_id: vehicle.vehicle_id.clone(),
                number_plate: vehicle.number_plate.clone(),
                road_id: current_road.clone(),
                x: position.0,
                y: position.1,
                speed: if may_cross { vehicle.speed_kmh } else { 0.0 },
                vehicle_type: vehicle.vehicle_type,
            });
        }

        // Remove vehicles that completed their route, back to front.
        for index in finished.into_iter().rev() {
            self.vehicles.swap_remove(index);
        }

        output
    }
}
