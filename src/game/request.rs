//! Update Requests
//!
//! Untrusted commands from players. A request is checked against the current
//! state and turned into zero or more [`Update`]s; it never mutates anything
//! by itself.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::rng::DeterministicRng;
use crate::game::direction::Direction;
use crate::game::entity::{Bullet, Color, PlayerId};
use crate::game::state::Game;
use crate::game::update::Update;

/// What a player asks for. Raw values are validated during resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestKind {
    /// Step one cell forward
    Move,
    /// Face a direction given by table index
    Rotate {
        /// Raw direction index
        direction: i64,
    },
    /// Fire the gun
    Shoot,
    /// Enter the arena
    Spawn {
        /// Raw RGB triple
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<Vec<i64>>,
    },
}

/// A request tagged with its sender and the tick it was created for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Sender
    pub player_id: PlayerId,
    /// Tick the request was created for
    pub tick: u64,
    /// The command
    pub kind: RequestKind,
}

/// Why a request produced no state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Target cell is blocked; silently ignored
    #[error("move blocked")]
    Collision,

    /// Player is dead or never spawned
    #[error("player {0} is not spawned")]
    NotSpawned(PlayerId),

    /// Spawn requested by a live player
    #[error("player {0} is already spawned")]
    AlreadySpawned(PlayerId),

    /// Spawn requested before the respawn delay elapsed
    #[error("player {player} can respawn in {remaining} ticks")]
    RespawnTooSoon {
        /// Requesting player
        player: PlayerId,
        /// Ticks left to wait
        remaining: u64,
    },

    /// No ammo or gun still cooling down
    #[error("player {0} cannot shoot now")]
    CannotShoot(PlayerId),

    /// Direction index outside the table
    #[error("invalid direction {0}")]
    InvalidDirection(i64),

    /// Color is not three channels in 0..=255
    #[error("invalid color {0:?}")]
    InvalidColor(Vec<i64>),

    /// Random search found no free cell
    #[error("no free spawn point found")]
    NoSpawnPoint,

    /// Player sent more than one request in a tick
    #[error("player {0} tried more than one request in a tick")]
    DuplicateRequest(PlayerId),
}

impl RequestError {
    /// Errors that are reported back to the sender.
    pub fn is_visible(&self) -> bool {
        !matches!(self, RequestError::Collision)
    }
}

impl UpdateRequest {
    /// Create a request.
    pub fn new(player_id: PlayerId, tick: u64, kind: RequestKind) -> Self {
        Self { player_id, tick, kind }
    }

    /// Check this request against `game` and derive its updates.
    ///
    /// Pure with respect to `game`; spawn placement draws from `rng`.
    pub fn resolve(&self, game: &Game, rng: &mut DeterministicRng) -> Result<Vec<Update>, RequestError> {
        let id = &self.player_id;
        match &self.kind {
            RequestKind::Move => {
                let player = game
                    .get_player(id)
                    .ok_or_else(|| RequestError::NotSpawned(id.clone()))?;
                let target = player.step_target();
                if !game.can_player_step_on(target, Some(id)) {
                    return Err(RequestError::Collision);
                }
                Ok(vec![Update::moved(id.clone(), target)])
            }
            RequestKind::Rotate { direction } => {
                if !game.player_is_spawned(id) {
                    return Err(RequestError::NotSpawned(id.clone()));
                }
                let direction = Direction::from_index(*direction)
                    .ok_or(RequestError::InvalidDirection(*direction))?;
                Ok(vec![Update::rotated(id.clone(), direction)])
            }
            RequestKind::Shoot => {
                let player = game
                    .get_player(id)
                    .ok_or_else(|| RequestError::NotSpawned(id.clone()))?;
                if !player.gun.can_shoot(game.tick()) {
                    return Err(RequestError::CannotShoot(id.clone()));
                }
                Ok(vec![
                    Update::GunStateChange {
                        player_id: id.clone(),
                        ammo_count: player.gun.ammo_count() - 1,
                    },
                    Update::AddBullet {
                        bullet_id: Bullet::make_id(game.tick(), id),
                        position: player.muzzle(game.rules()),
                        direction: player.direction.unit(),
                        reward_receiver: id.clone(),
                    },
                ])
            }
            RequestKind::Spawn { color } => {
                if game.player_is_spawned(id) {
                    return Err(RequestError::AlreadySpawned(id.clone()));
                }
                if let Some(elapsed) = game.ticks_from_death(id) {
                    let wait = game.rules().min_respawn_ticks;
                    if elapsed < wait {
                        return Err(RequestError::RespawnTooSoon {
                            player: id.clone(),
                            remaining: wait - elapsed,
                        });
                    }
                }
                let color = match color {
                    Some(raw) => Some(
                        Color::from_raw(raw).ok_or_else(|| RequestError::InvalidColor(raw.clone()))?,
                    ),
                    None => None,
                };
                let position = game
                    .find_spawn_point(rng)
                    .ok_or(RequestError::NoSpawnPoint)?;
                let direction = Direction::ALL[rng.next_int(Direction::COUNT as u32) as usize];
                Ok(vec![Update::spawned(id.clone(), position, direction, color)])
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
