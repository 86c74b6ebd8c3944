//! Input handling.
//!
//! Turns sampled movement keys (or typed direction names) into the direction
//! and running flag a step request needs.

use motion_shared::math::Direction;

/// Movement keys held at a moment in time, in world axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    /// -1 west, +1 east.
    pub east: i8,
    /// -1 north, +1 south.
    pub south: i8,
    pub running: bool,
}

impl InputState {
    /// Keys held towards `dir`.
    pub fn toward(dir: Direction, running: bool) -> Self {
        let (east, south) = dir.delta();
        Self {
            east: east as i8,
            south: south as i8,
            running,
        }
    }

    /// Direction the keys point in, `None` when idle.
    pub fn direction(self) -> Option<Direction> {
        let wanted = (self.east.signum() as i32, self.south.signum() as i32);
        Direction::ALL.into_iter().find(|d| d.delta() == wanted)
    }
}

/// Parses `n`, `ne`, `east`, `south-west`, ... (case-insensitive).
pub fn parse_direction(s: &str) -> Option<Direction> {
    let key: String = s
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let dir = match key.as_str() {
        "n" | "north" => Direction::North,
        "ne" | "northeast" => Direction::NorthEast,
        "e" | "east" => Direction::East,
        "se" | "southeast" => Direction::SouthEast,
        "s" | "south" => Direction::South,
        "sw" | "southwest" => Direction::SouthWest,
        "w" | "west" => Direction::West,
        "nw" | "northwest" => Direction::NorthWest,
        _ => return None,
    };
    Some(dir)
}
