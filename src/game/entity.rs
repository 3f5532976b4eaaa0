//! Arena Entities
//!
//! Players, their guns, and bullets in flight.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::vec2::{GridPosition, Vec2};
use crate::game::collision::{CircleBox, Segment};
use crate::game::direction::Direction;
use crate::game::rules::{GameRules, GunSpec};

// =============================================================================
// PLAYER ID
// =============================================================================

/// Unique player identifier.
///
/// Remote players use an email-shaped id validated by the network layer;
/// local games may use any string. Implements Ord for deterministic
/// BTreeMap ordering.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Wrap a string without validation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Player color as RGB.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color(pub [u8; 3]);

impl Color {
    /// Validate a raw color coming from a client: exactly three 0..=255 channels.
    pub fn from_raw(raw: &[i64]) -> Option<Color> {
        match raw {
            [r, g, b] => Some(Color([
                u8::try_from(*r).ok()?,
                u8::try_from(*g).ok()?,
                u8::try_from(*b).ok()?,
            ])),
            _ => None,
        }
    }
}

// =============================================================================
// GUN
// =============================================================================

/// A player's gun with its magazine and timers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gun {
    /// Model name
    pub name: String,
    /// Magazine size
    pub full_ammo_count: u32,
    /// Rounds left, never above `full_ammo_count`
    ammo_count: u32,
    /// Ticks between shots
    pub cooldown_ticks: u64,
    /// Ticks from the last shot until an empty magazine refills
    pub reload_ticks: Option<u64>,
    /// Tick of the last ammo decrease (or respawn with an empty magazine)
    cooldown_start: Option<u64>,
}

impl Gun {
    /// A loaded gun of the given model.
    pub fn from_spec(spec: &GunSpec) -> Self {
        Self {
            name: spec.name.clone(),
            full_ammo_count: spec.full_ammo_count,
            ammo_count: spec.full_ammo_count,
            cooldown_ticks: spec.cooldown_ticks,
            reload_ticks: spec.reload_ticks,
            cooldown_start: None,
        }
    }

    /// Rounds left.
    #[inline]
    pub fn ammo_count(&self) -> u32 {
        self.ammo_count
    }

    /// Reference tick for cooldown and reload timers.
    #[inline]
    pub fn cooldown_start(&self) -> Option<u64> {
        self.cooldown_start
    }

    /// Can fire at `tick`?
    pub fn can_shoot(&self, tick: u64) -> bool {
        if self.ammo_count == 0 {
            return false;
        }
        match self.cooldown_start {
            Some(start) => start + self.cooldown_ticks <= tick,
            None => true,
        }
    }

    /// Has the empty magazine finished reloading by `tick`?
    pub fn can_reload(&self, tick: u64) -> bool {
        if self.ammo_count > 0 {
            return false;
        }
        match (self.reload_ticks, self.cooldown_start) {
            (Some(reload), Some(start)) => start + reload <= tick,
            _ => false,
        }
    }

    /// Set the magazine; a decrease restarts the cooldown at `tick`.
    pub fn set_ammo(&mut self, count: u32, tick: u64) {
        let count = count.min(self.full_ammo_count);
        if count < self.ammo_count {
            self.cooldown_start = Some(tick);
        }
        self.ammo_count = count;
    }

    /// Restart the cooldown/reload timer at `tick`.
    pub fn restart_timer(&mut self, tick: u64) {
        self.cooldown_start = Some(tick);
    }
}

// =============================================================================
// PLAYER
// =============================================================================

/// A live player.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// Unique id
    pub id: PlayerId,
    /// Cell the player stands on
    pub position: GridPosition,
    /// Facing
    pub direction: Direction,
    /// Display color
    pub color: Option<Color>,
    /// Equipped gun
    pub gun: Gun,
}

impl Player {
    /// A freshly spawned player with a loaded gun.
    pub fn new(id: PlayerId, position: GridPosition, direction: Direction, gun: Gun) -> Self {
        Self {
            id,
            position,
            direction,
            color: None,
            gun,
        }
    }

    /// Cell one step forward.
    #[inline]
    pub fn step_target(&self) -> GridPosition {
        self.position.offset(self.direction.step())
    }

    /// Collision circle of the player.
    #[inline]
    pub fn bounding_box(&self, radius: f64) -> CircleBox {
        CircleBox::new(self.position.to_vec2(), radius)
    }

    /// Where a bullet fired now would appear.
    pub fn muzzle(&self, rules: &GameRules) -> Vec2 {
        self.position.to_vec2() + self.direction.unit() * rules.gun_offset()
    }

    /// Full-length firing line from the muzzle.
    pub fn bullet_ray(&self, rules: &GameRules) -> Segment {
        let dir = self.direction.unit();
        let end = self.position.to_vec2() + dir * rules.ray_length;
        Segment::new(self.muzzle(rules), end, dir)
    }
}

/// Record kept for a dead player until it respawns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeadPlayer {
    /// The player as it was when it died
    pub player: Player,
    /// Tick of death
    pub death_tick: u64,
}

// =============================================================================
// BULLET
// =============================================================================

/// A bullet in flight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bullet {
    /// Unique id, `bullet{tick}-{shooter}`
    pub id: String,
    /// Tick the bullet was fired
    pub start_tick: u64,
    /// Muzzle position at firing
    pub origin: Vec2,
    /// Unit travel direction
    pub direction: Vec2,
    /// Shooter credited with a kill
    pub reward_receiver: PlayerId,
}

impl Bullet {
    /// Id for a bullet fired by `shooter` at `tick`.
    pub fn make_id(tick: u64, shooter: &PlayerId) -> String {
        format!("bullet{}-{}", tick, shooter)
    }

    /// Ticks since firing.
    #[inline]
    pub fn age(&self, tick: u64) -> u64 {
        tick.saturating_sub(self.start_tick)
    }

    /// Distance covered during the tick ending at `tick`.
    ///
    /// `None` on the firing tick itself.
    pub fn trajectory(&self, tick: u64, speed: f64) -> Option<Segment> {
        let elapsed = self.age(tick);
        if elapsed == 0 {
            return None;
        }
        let end = self.origin + self.direction * (elapsed as f64 * speed);
        let start = end - self.direction * speed;
        Some(Segment::new(start, end, self.direction))
    }
}

// =============================================================================
// TESTS
// =============================================================================
