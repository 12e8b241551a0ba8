// road.rs

use serde::{Deserialize, Serialize};

use crate::models::junction::{Direction, JunctionId};

/// Identifier for a road segment, e.g. "R-1-2".
pub type RoadId = String;

/// A directed road segment between two junctions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Road {
    pub id: RoadId,
    pub name: String,
    /// Segment length in meters.
    pub length: f64,
    pub lanes: u32,
    pub from_junction: JunctionId,
    pub to_junction: JunctionId,
    /// Speed limit in km/h.
    pub speed_limit: f64,
}

/// The four roads feeding a junction, keyed by approach direction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectedRoads {
    pub north: Option<RoadId>,
    pub east: Option<RoadId>,
    pub south: Option<RoadId>,
    pub west: Option<RoadId>,
}

impl ConnectedRoads {
    pub fn get(&self, direction: Direction) -> Option<&RoadId> {
        match direction {
            Direction::North => self.north.as_ref(),
            Direction::East => self.east.as_ref(),
            Direction::South => self.south.as_ref(),
            Direction::West => self.west.as_ref(),
        }
    }

    pub fn set(&mut self, direction: Direction, road_id: RoadId) {
        match direction {
            Direction::North => self.north = Some(road_id),
            Direction::East => self.east = Some(road_id),
            Direction::South => self.south = Some(road_id),
            Direction::West => self.west = Some(road_id),
        }
    }
}

/// A signal-controlled junction (node) in the road network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Junction {
    pub id: JunctionId,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub connected_roads: ConnectedRoads,
}
