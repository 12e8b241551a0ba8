// network.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::junction::{Direction, JunctionId};
use crate::models::road::{ConnectedRoads, Junction, Road, RoadId};

/// The static road network the control plane operates on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoadNetwork {
    pub roads: Vec<Road>,
    pub junctions: Vec<Junction>,
}

impl RoadNetwork {
    pub fn road(&self, id: &str) -> Option<&Road> {
        self.roads.iter().find(|r| r.id == id)
    }

    pub fn junction(&self, id: &str) -> Option<&Junction> {
        self.junctions.iter().find(|j| j.id == id)
    }

    pub fn junction_ids(&self) -> Vec<JunctionId> {
        self.junctions.iter().map(|j| j.id.clone()).collect()
    }
}

/// Read-only junction adjacency used by incident inference.
///
/// `neighbors` returns `(junction_id, edge_length_meters)` pairs for every
/// junction directly reachable from `junction_id`.
pub trait JunctionGraph: Send + Sync {
    fn contains(&self, junction_id: &str) -> bool;
    fn neighbors(&self, junction_id: &str) -> Vec<(JunctionId, f64)>;
    /// The neighbor reached when leaving `junction_id` heading `direction`.
    fn neighbor_towards(&self, junction_id: &str, direction: Direction) -> Option<JunctionId>;
}

/// Adjacency precomputed from a `RoadNetwork`.
pub struct NetworkJunctionGraph {
    adjacency: HashMap<JunctionId, Vec<(JunctionId, f64)>>,
    headings: HashMap<(JunctionId, Direction), JunctionId>,
}

impl NetworkJunctionGraph {
    pub fn from_network(network: &RoadNetwork) -> Self {
        let mut adjacency: HashMap<JunctionId, Vec<(JunctionId, f64)>> = HashMap::new();
        let mut headings = HashMap::new();

        for junction in &network.junctions {
            adjacency.entry(junction.id.clone()).or_default();
        }
        for road in &network.roads {
            adjacency
                .entry(road.from_junction.clone())
                .or_default()
                .push((road.to_junction.clone(), road.length));
        }
        // Each junction side holds its outgoing road in that heading, so
        // the heading neighbor is that road's other endpoint.
        for junction in &network.junctions {
            for direction in Direction::ALL {
                if let Some(road_id) = junction.connected_roads.get(direction) {
                    if let Some(road) = network.road(road_id) {
                        let other = if road.from_junction == junction.id {
                            road.to_junction.clone()
                        } else {
                            road.from_junction.clone()
                        };
                        if other != junction.id {
                            headings.insert((junction.id.clone(), direction), other);
                        }
                    }
                }
            }
        }

        Self { adjacency, headings }
    }
}

impl JunctionGraph for NetworkJunctionGraph {
    fn contains(&self, junction_id: &str) -> bool {
        self.adjacency.contains_key(junction_id)
    }

    fn neighbors(&self, junction_id: &str) -> Vec<(JunctionId, f64)> {
        self.adjacency.get(junction_id).cloned().unwrap_or_default()
    }

    fn neighbor_towards(&self, junction_id: &str, direction: Direction) -> Option<JunctionId> {
        self.headings
            .get(&(junction_id.to_string(), direction))
            .cloned()
    }
}

/// Builds the default 3x3 signal grid (J-1..J-9, row-major from the
/// north-west corner) with bidirectional 600 m two-lane segments.
pub fn create_default_network() -> RoadNetwork {
    const SIDE: usize = 3;
    const BLOCK_LENGTH: f64 = 600.0;

    let mut junctions = Vec::new();
    for row in 0..SIDE {
        for col in 0..SIDE {
            let index = row * SIDE + col + 1;
            junctions.push(Junction {
                id: format!("J-{}", index),
                name: format!("Junction {}", index),
                x: col as f64 * BLOCK_LENGTH,
                y: row as f64 * BLOCK_LENGTH,
                connected_roads: ConnectedRoads::default(),
            });
        }
    }

    let mut roads = Vec::new();
    let mut add_road = |from: usize, to: usize| -> RoadId {
        let id = format!("R-{}-{}", from, to);
        roads.push(Road {
            id: id.clone(),
            name: format!("Road {} to {}", from, to),
            length: BLOCK_LENGTH,
            lanes: 2,
            from_junction: format!("J-{}", from),
            to_junction: format!("J-{}", to),
            speed_limit: 60.0,
        });
        id
    };

    for row in 0..SIDE {
        for col in 0..SIDE {
            let index = row * SIDE + col + 1;
            // East-west pairs.
            if col + 1 < SIDE {
                let east = index + 1;
                let out = add_road(index, east);
                let back = add_road(east, index);
                junctions[index - 1].connected_roads.set(Direction::East, out);
                junctions[east - 1].connected_roads.set(Direction::West, back);
            }
            // North-south pairs (rows grow southward).
            if row + 1 < SIDE {
                let south = index + SIDE;
                let down = add_road(index, south);
                let up = add_road(south, index);
                junctions[index - 1].connected_roads.set(Direction::South, down);
                junctions[south - 1].connected_roads.set(Direction::North, up);
            }
        }
    }

    RoadNetwork { roads, junctions }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grid_shape() {
        let network = create_default_network();
        assert_eq!(network.junctions.len(), 9);
        // 12 undirected edges, two directed roads each.
        assert_eq!(network.roads.len(), 24);
        // Center junction has all four approaches wired.
        let center = network.junction("J-5").unwrap();
        for d in Direction::ALL {
            assert!(center.connected_roads.get(d).is_some(), "missing {}", d);
        }
    }

    #[test]
    fn graph_adjacency_and_headings() {
        let network = create_default_network();
        let graph = NetworkJunctionGraph::from_network(&network);
        assert!(graph.contains("J-1"));
        let neighbors = graph.neighbors("J-5");
        assert_eq!(neighbors.len(), 4);
        assert_eq!(
            graph.neighbor_towards("J-5", Direction::East),
            Some("J-6".to_string())
        );
        assert_eq!(graph.neighbor_towards("J-6", Direction::East), None);
    }
}
