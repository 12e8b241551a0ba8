// junction.rs

use serde::{Deserialize, Serialize};

/// Identifier for a junction, e.g. "J-5".
pub type JunctionId = String;

/// The four approach directions of a junction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// Short form used in detection records and reasons ("N"/"E"/"S"/"W").
    pub fn short(&self) -> &'static str {
        match self {
            Direction::North => "N",
            Direction::East => "E",
            Direction::South => "S",
            Direction::West => "W",
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }

    /// Maps a policy action index (0..=3) onto a direction.
    pub fn from_action_index(index: usize) -> Option<Direction> {
        Direction::ALL.get(index).copied()
    }

    pub fn parse_short(s: &str) -> Option<Direction> {
        match s {
            "N" => Some(Direction::North),
            "E" => Some(Direction::East),
            "S" => Some(Direction::South),
            "W" => Some(Direction::West),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalColor {
    Red,
    Yellow,
    Green,
}

impl std::fmt::Display for SignalColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalColor::Red => "RED",
            SignalColor::Yellow => "YELLOW",
            SignalColor::Green => "GREEN",
        };
        f.write_str(s)
    }
}

/// The signal head state for a single approach direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalState {
    pub current: SignalColor,
    /// Commanded phase duration in seconds.
    pub duration: f64,
    /// Timestamp of the last color change.
    pub last_change: f64,
    /// Timestamp of the last moment this direction held GREEN.
    pub last_green_at: f64,
}

impl SignalState {
    pub fn new(color: SignalColor, duration: f64, now: f64) -> Self {
        let last_green_at = if color == SignalColor::Green { now } else { 0.0 };
        Self {
            current: color,
            duration,
            last_change: now,
            last_green_at,
        }
    }

    /// Seconds since the last color change on this head.
    pub fn dwell(&self, now: f64) -> f64 {
        (now - self.last_change).max(0.0)
    }
}

/// Four-way signal state at one junction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JunctionSignals {
    pub north: SignalState,
    pub east: SignalState,
    pub south: SignalState,
    pub west: SignalState,
}

impl JunctionSignals {
    pub fn get(&self, direction: Direction) -> &SignalState {
        match direction {
            Direction::North => &self.north,
            Direction::East => &self.east,
            Direction::South => &self.south,
            Direction::West => &self.west,
        }
    }

    pub fn get_mut(&mut self, direction: Direction) -> &mut SignalState {
        match direction {
            Direction::North => &mut self.north,
            Direction::East => &mut self.east,
            Direction::South => &mut self.south,
            Direction::West => &mut self.west,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Direction, &SignalState)> {
        Direction::ALL.into_iter().map(move |d| (d, self.get(d)))
    }

    /// All directions currently showing GREEN.
    pub fn green_directions(&self) -> Vec<Direction> {
        Direction::ALL
            .iter()
            .copied()
            .filter(|&d| self.get(d).current == SignalColor::Green)
            .collect()
    }
}

/// Standard startup state: one direction GREEN, the rest RED.
pub fn create_default_signals(green: Direction, now: f64) -> JunctionSignals {
    let mut signals = JunctionSignals {
        north: SignalState::new(SignalColor::Red, 30.0, now),
        east: SignalState::new(SignalColor::Red, 30.0, now),
        south: SignalState::new(SignalColor::Red, 30.0, now),
        west: SignalState::new(SignalColor::Red, 30.0, now),
    };
    *signals.get_mut(green) = SignalState::new(SignalColor::Green, 30.0, now);
    signals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_signals_have_single_green() {
        let signals = create_default_signals(Direction::North, 100.0);
        assert_eq!(signals.green_directions(), vec![Direction::North]);
        assert_eq!(signals.east.current, SignalColor::Red);
    }

    #[test]
    fn direction_round_trip() {
        for d in Direction::ALL {
            assert_eq!(Direction::parse_short(d.short()), Some(d));
        }
        assert_eq!(Direction::North.opposite(), Direction::South);
        assert_eq!(Direction::from_action_index(1), Some(Direction::East));
        assert_eq!(Direction::from_action_index(4), None);
    }
}
