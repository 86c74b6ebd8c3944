//! Tile and pixel math.
//!
//! World positions are whole tiles (`TilePos`); everything between two tiles is
//! a screen-space pixel offset (`Vec3`) layered on top by the renderer.
//! This module stays small and deterministic.

use serde::{Deserialize, Serialize};

/// Wire bit marking a running step in a packed direction byte.
pub const RUNNING_FLAG: u8 = 0x80;

/// Pixels of vertical screen offset contributed by one unit of Z.
pub const PIXELS_PER_Z: f32 = 4.0;

/// Eight-way facing, numbered the way the protocol numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum Direction {
    #[default]
    North = 0,
    NorthEast = 1,
    East = 2,
    SouthEast = 3,
    South = 4,
    SouthWest = 5,
    West = 6,
    NorthWest = 7,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    /// Decodes a wire byte. The running flag and any other high bits are ignored.
    pub fn from_byte(b: u8) -> Self {
        Self::ALL[(b & 0x07) as usize]
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Tile delta for one step in this direction.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::NorthEast => (1, -1),
            Direction::East => (1, 0),
            Direction::SouthEast => (1, 1),
            Direction::South => (0, 1),
            Direction::SouthWest => (-1, 1),
            Direction::West => (-1, 0),
            Direction::NorthWest => (-1, -1),
        }
    }

    /// Screen pixels travelled across one full tile step.
    pub fn pixel_stride(self) -> (f32, f32) {
        match self {
            Direction::North => (22.0, -22.0),
            Direction::NorthEast => (44.0, 0.0),
            Direction::East => (22.0, 22.0),
            Direction::SouthEast => (0.0, 44.0),
            Direction::South => (-22.0, 22.0),
            Direction::SouthWest => (-44.0, 0.0),
            Direction::West => (-22.0, -22.0),
            Direction::NorthWest => (0.0, -44.0),
        }
    }

    /// Direction of travel from one tile towards another, `None` when they coincide.
    pub fn between(from: TilePos, to: TilePos) -> Option<Self> {
        let dx = (to.x as i32 - from.x as i32).signum();
        let dy = (to.y as i32 - from.y as i32).signum();
        Self::ALL.into_iter().find(|d| d.delta() == (dx, dy))
    }
}

/// Absolute world tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct TilePos {
    pub x: u16,
    pub y: u16,
    pub z: i8,
}

impl TilePos {
    pub const fn new(x: u16, y: u16, z: i8) -> Self {
        Self { x, y, z }
    }

    /// Neighbouring tile in `dir`, saturating at the map edges.
    pub fn step(self, dir: Direction) -> Self {
        let (dx, dy) = dir.delta();
        Self {
            x: (self.x as i32 + dx).clamp(0, u16::MAX as i32) as u16,
            y: (self.y as i32 + dy).clamp(0, u16::MAX as i32) as u16,
            z: self.z,
        }
    }

    /// `self - offset`, used to place a passenger relative to its vehicle.
    pub fn sub_offset(self, offset: TileOffset) -> Self {
        Self {
            x: (self.x as i32 - offset.x).clamp(0, u16::MAX as i32) as u16,
            y: (self.y as i32 - offset.y).clamp(0, u16::MAX as i32) as u16,
            z: (self.z as i32 - offset.z).clamp(i8::MIN as i32, i8::MAX as i32) as i8,
        }
    }

    /// The offset that maps `other` onto `self` via [`TilePos::sub_offset`].
    pub fn offset_to(self, other: TilePos) -> TileOffset {
        TileOffset {
            x: self.x as i32 - other.x as i32,
            y: self.y as i32 - other.y as i32,
            z: self.z as i32 - other.z as i32,
        }
    }
}

/// Signed tile delta in a vehicle's frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct TileOffset {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl TileOffset {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Screen-space pixel offset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(
            self.x + (to.x - self.x) * t,
            self.y + (to.y - self.y) * t,
            self.z + (to.z - self.z) * t,
        )
    }
}
