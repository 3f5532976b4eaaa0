//! Arena Map Geometry
//!
//! Rectangular arena with static circular obstacles. The map never changes
//! during a game and is shipped inside every snapshot.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};

use crate::core::vec2::{GridPosition, Vec2};
use crate::game::collision::CircleBox;
use crate::game::rules::{MAP_HEIGHT, MAP_WIDTH};

/// Obstacles of the standard arena as `(x, y, radius)`.
const DEFAULT_OBSTACLES: [(f64, f64, f64); 11] = [
    (120.5, 12.3, 3.5),
    (91.0, 40.0, 7.0),
    (83.5, 41.5, 4.0),
    (89.0, 76.0, 4.5),
    (135.0, 59.0, 4.5),
    (40.0, 53.0, 3.7),
    (36.0, 55.5, 3.7),
    (31.5, 59.0, 3.7),
    (21.0, 41.0, 4.0),
    (15.0, 15.0, 4.5),
    (57.0, 22.0, 13.0),
];

/// Arena bounds and obstacles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArenaMap {
    /// Width in grid units
    pub width: i32,
    /// Height in grid units
    pub height: i32,
    /// Static obstacles
    pub obstacles: Vec<CircleBox>,
}

impl Default for ArenaMap {
    fn default() -> Self {
        Self::standard()
    }
}

impl ArenaMap {
    /// The standard 160x90 arena.
    pub fn standard() -> Self {
        let obstacles = DEFAULT_OBSTACLES
            .iter()
            .map(|&(x, y, r)| CircleBox::new(Vec2::new(x, y), r))
            .collect();
        Self {
            width: MAP_WIDTH,
            height: MAP_HEIGHT,
            obstacles,
        }
    }

    /// An arena without obstacles.
    pub fn empty(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            obstacles: Vec::new(),
        }
    }

    /// Builder: add an obstacle.
    pub fn with_obstacle(mut self, center: Vec2, radius: f64) -> Self {
        self.obstacles.push(CircleBox::new(center, radius));
        self
    }

    /// True if a circle of `radius` at `center` lies fully inside the arena.
    pub fn contains_circle(&self, center: Vec2, radius: f64) -> bool {
        center.x - radius >= 0.0
            && center.y - radius >= 0.0
            && center.x + radius <= self.width as f64
            && center.y + radius <= self.height as f64
    }

    /// True if a circle of `radius` at `center` overlaps an obstacle.
    pub fn hits_obstacle(&self, center: Vec2, radius: f64) -> bool {
        CircleBox::new(center, radius).intersects_any(&self.obstacles)
    }

    /// Every cell `(0..=width, 0..=height)` where a circle of `radius` could
    /// never stand: outside the bounds or overlapping an obstacle.
    ///
    /// Path planners use this to prune their search space once per map.
    pub fn unreachable_positions(&self, radius: f64) -> BTreeSet<GridPosition> {
        let mut blocked = BTreeSet::new();
        for x in 0..=self.width {
            for y in 0..=self.height {
                let cell = GridPosition::new(x, y);
                let center = cell.to_vec2();
                if !self.contains_circle(center, radius) || self.hits_obstacle(center, radius) {
                    blocked.insert(cell);
                }
            }
        }
        blocked
    }
}

// =============================================================================
// TESTS
// =============================================================================
