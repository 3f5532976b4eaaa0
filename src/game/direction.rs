//! Facing Directions
//!
//! The single direction table. Every forward vector, index and 180 degree
//! rotation in the arena is derived from [`Direction`]; nothing else encodes
//! directions.
//!
//! Screen coordinates: x grows to the right, y grows downwards.

use std::convert::TryFrom;
use serde::{Serialize, Deserialize};

use crate::core::vec2::{GridPosition, Vec2};

/// One of the four facings a player can have.
///
/// Serialized as its table index (`0..=3`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Direction {
    /// Towards y = 0
    Up = 0,
    /// Towards x = width
    Right = 1,
    /// Towards y = height
    Down = 2,
    /// Towards x = 0
    Left = 3,
}

/// Forward step for each direction, indexed by `Direction as usize`.
const FORWARD: [(i32, i32); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];

impl Direction {
    /// All directions in table order.
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Right,
        Direction::Down,
        Direction::Left,
    ];

    /// Number of table entries.
    pub const COUNT: usize = 4;

    /// Table index of this direction.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Look up a direction by raw index (as received from a client).
    pub fn from_index(index: i64) -> Option<Direction> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Integer grid step one cell forward.
    #[inline]
    pub const fn step(self) -> (i32, i32) {
        FORWARD[self as usize]
    }

    /// Unit forward vector in continuous space.
    #[inline]
    pub fn unit(self) -> Vec2 {
        let (x, y) = self.step();
        Vec2::new(x as f64, y as f64)
    }

    /// The direction rotated by 180 degrees.
    #[inline]
    pub const fn opposite(self) -> Direction {
        Self::ALL[(self as usize + 2) % Self::COUNT]
    }

    /// The axis-aligned direction that best points from `from` towards `to`.
    ///
    /// The dominant axis wins; horizontal wins ties. `None` if the cells are equal.
    pub fn closest_towards(from: GridPosition, to: GridPosition) -> Option<Direction> {
        let dx = to.x - from.x;
        let dy = to.y - from.y;
        if dx == 0 && dy == 0 {
            return None;
        }
        let direction = if dx.abs() >= dy.abs() {
            if dx > 0 { Direction::Right } else { Direction::Left }
        } else if dy > 0 {
            Direction::Down
        } else {
            Direction::Up
        };
        Some(direction)
    }
}

impl From<Direction> for u8 {
    fn from(direction: Direction) -> u8 {
        direction as u8
    }
}

impl TryFrom<u8> for Direction {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Direction::from_index(value as i64)
            .ok_or_else(|| format!("invalid direction index {}", value))
    }
}

// =============================================================================
// TESTS
// =============================================================================
