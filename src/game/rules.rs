//! Gameplay Constants
//!
//! Tunable rules of the arena. Defaults reproduce the standard game; the
//! whole struct travels inside snapshots so followers run with the same rules.

use serde::{Serialize, Deserialize};

/// Simulation tick rate (Hz)
pub const TICKS_PER_SECOND: u64 = 15;

/// Ticks a dead player must wait before respawning (5 seconds)
pub const MIN_RESPAWN_TICKS: u64 = 5 * TICKS_PER_SECOND;

/// Arena width in grid units
pub const MAP_WIDTH: i32 = 160;

/// Arena height in grid units
pub const MAP_HEIGHT: i32 = 90;

/// Player collision radius
pub const PLAYER_RADIUS: f64 = 2.01;

/// Bullet radius, used to place new bullets clear of the shooter
pub const BULLET_RADIUS: f64 = 1.0;

/// Bullet travel per tick
pub const BULLET_SPEED: f64 = 5.0;

/// Longest distance a bullet or line-of-sight ray can cover
pub const BULLET_RAY_LENGTH: f64 = (MAP_WIDTH + MAP_HEIGHT) as f64;

/// Ticks after which an unhit bullet is removed
pub const MAX_BULLET_AGE: u64 = (BULLET_RAY_LENGTH / BULLET_SPEED) as u64;

/// Extra gap between a fresh bullet and its shooter
const SPAWN_EPSILON: f64 = 1e-5;

/// Static description of a gun model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GunSpec {
    /// Display name
    pub name: String,
    /// Magazine size
    pub full_ammo_count: u32,
    /// Ticks between consecutive shots
    pub cooldown_ticks: u64,
    /// Ticks from the last shot until an empty magazine refills; `None` never reloads
    pub reload_ticks: Option<u64>,
}

impl GunSpec {
    /// The standard five-round revolver.
    pub fn revolver() -> Self {
        Self {
            name: "revolver".to_string(),
            full_ammo_count: 5,
            cooldown_ticks: TICKS_PER_SECOND / 2,
            reload_ticks: Some(5 * TICKS_PER_SECOND),
        }
    }
}

impl Default for GunSpec {
    fn default() -> Self {
        Self::revolver()
    }
}

/// Gameplay configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameRules {
    /// Player collision radius
    pub player_radius: f64,
    /// Bullet radius
    pub bullet_radius: f64,
    /// Bullet travel per tick
    pub bullet_speed: f64,
    /// Maximum bullet lifetime in ticks
    pub max_bullet_age: u64,
    /// Length of line-of-sight rays
    pub ray_length: f64,
    /// Respawn delay in ticks
    pub min_respawn_ticks: u64,
    /// Random cells tried before giving up on a spawn
    pub spawn_attempts: u32,
    /// Gun every new player receives
    pub gun: GunSpec,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            player_radius: PLAYER_RADIUS,
            bullet_radius: BULLET_RADIUS,
            bullet_speed: BULLET_SPEED,
            max_bullet_age: MAX_BULLET_AGE,
            ray_length: BULLET_RAY_LENGTH,
            min_respawn_ticks: MIN_RESPAWN_TICKS,
            spawn_attempts: 1000,
            gun: GunSpec::revolver(),
        }
    }
}

impl GameRules {
    /// Distance from a player's center to where its bullets appear.
    #[inline]
    pub fn gun_offset(&self) -> f64 {
        self.player_radius + self.bullet_radius + SPAWN_EPSILON
    }
}
