//! State Updates
//!
//! The only things that mutate a [`Game`]. The authority derives updates
//! from validated requests and cron effects; followers replay them verbatim.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::vec2::{GridPosition, Vec2};
use crate::game::direction::Direction;
use crate::game::entity::{Bullet, Color, DeadPlayer, Gun, Player, PlayerId};
use crate::game::state::Game;

/// Failure to replay an update onto a replica.
///
/// The authority never produces these for its own state; a follower hitting
/// one has diverged and must resynchronize.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// Update refers to a player that is not alive
    #[error("player {0} is not alive")]
    UnknownPlayer(PlayerId),

    /// New player spawned without a position or facing
    #[error("spawn of {0} lacks position or direction")]
    IncompleteSpawn(PlayerId),
}

/// One atomic change of game state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Update {
    /// Partial change of a player; `alive` spawns or kills.
    PlayerStateChange {
        /// Target player
        player_id: PlayerId,
        /// New cell
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<GridPosition>,
        /// New facing
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<Direction>,
        /// Spawn (`true`) or kill (`false`)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alive: Option<bool>,
        /// New color
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<Color>,
    },
    /// New magazine level.
    GunStateChange {
        /// Gun owner
        player_id: PlayerId,
        /// Rounds after the change
        ammo_count: u32,
    },
    /// A bullet leaves a muzzle.
    AddBullet {
        /// Bullet id
        bullet_id: String,
        /// Muzzle position
        position: Vec2,
        /// Unit travel direction
        direction: Vec2,
        /// Shooter
        reward_receiver: PlayerId,
    },
    /// A bullet hit something or expired.
    RemoveBullet {
        /// Bullet id
        bullet_id: String,
        /// Player killed by the bullet, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hit_player_id: Option<PlayerId>,
        /// Shooter
        reward_receiver_id: PlayerId,
    },
    /// A rejected request, reported to its sender. Changes nothing.
    Error {
        /// Sender of the rejected request
        player_id: PlayerId,
        /// Human-readable reason
        message: String,
    },
}

impl Update {
    /// Move a player to a new cell.
    pub fn moved(player_id: PlayerId, position: GridPosition) -> Self {
        Update::PlayerStateChange {
            player_id,
            position: Some(position),
            direction: None,
            alive: None,
            color: None,
        }
    }

    /// Turn a player.
    pub fn rotated(player_id: PlayerId, direction: Direction) -> Self {
        Update::PlayerStateChange {
            player_id,
            position: None,
            direction: Some(direction),
            alive: None,
            color: None,
        }
    }

    /// Kill a player.
    pub fn killed(player_id: PlayerId) -> Self {
        Update::PlayerStateChange {
            player_id,
            position: None,
            direction: None,
            alive: Some(false),
            color: None,
        }
    }

    /// Spawn (or respawn) a player.
    pub fn spawned(
        player_id: PlayerId,
        position: GridPosition,
        direction: Direction,
        color: Option<Color>,
    ) -> Self {
        Update::PlayerStateChange {
            player_id,
            position: Some(position),
            direction: Some(direction),
            alive: Some(true),
            color,
        }
    }

    /// Report a rejected request to its sender.
    pub fn error(player_id: PlayerId, message: impl Into<String>) -> Self {
        Update::Error {
            player_id,
            message: message.into(),
        }
    }

    /// Recipient of an error update.
    pub fn error_recipient(&self) -> Option<&PlayerId> {
        match self {
            Update::Error { player_id, .. } => Some(player_id),
            _ => None,
        }
    }

    /// Apply this update to `game` at its current tick.
    pub fn apply(&self, game: &mut Game) -> Result<(), ApplyError> {
        let tick = game.tick;
        match self {
            Update::PlayerStateChange { player_id, position, direction, alive, color } => {
                match alive {
                    Some(false) => {
                        kill(game, player_id);
                        return Ok(());
                    }
                    Some(true) => spawn(game, player_id, *position, *direction)?,
                    None => {}
                }
                let player = game
                    .players
                    .get_mut(player_id)
                    .ok_or_else(|| ApplyError::UnknownPlayer(player_id.clone()))?;
                if let Some(position) = position {
                    player.position = *position;
                }
                if let Some(direction) = direction {
                    player.direction = *direction;
                }
                if let Some(color) = color {
                    player.color = Some(*color);
                }
            }
            Update::GunStateChange { player_id, ammo_count } => {
                let player = game
                    .players
                    .get_mut(player_id)
                    .ok_or_else(|| ApplyError::UnknownPlayer(player_id.clone()))?;
                player.gun.set_ammo(*ammo_count, tick);
            }
            Update::AddBullet { bullet_id, position, direction, reward_receiver } => {
                game.bullets.push(Bullet {
                    id: bullet_id.clone(),
                    start_tick: tick,
                    origin: *position,
                    direction: *direction,
                    reward_receiver: reward_receiver.clone(),
                });
            }
            Update::RemoveBullet { bullet_id, .. } => {
                game.bullets.retain(|bullet| &bullet.id != bullet_id);
            }
            Update::Error { .. } => {}
        }
        Ok(())
    }
}

/// Move a live player into the dead set. Absent players are ignored.
fn kill(game: &mut Game, player_id: &PlayerId) {
    if let Some(player) = game.players.remove(player_id) {
        game.dead_players.insert(
            player_id.clone(),
            DeadPlayer {
                player,
                death_tick: game.tick,
            },
        );
    }
}

/// Bring a player to life, restoring its dead record when there is one.
fn spawn(
    game: &mut Game,
    player_id: &PlayerId,
    position: Option<GridPosition>,
    direction: Option<Direction>,
) -> Result<(), ApplyError> {
    if game.players.contains_key(player_id) {
        return Ok(());
    }
    let player = match game.dead_players.remove(player_id) {
        Some(DeadPlayer { mut player, .. }) => {
            // An empty magazine starts reloading from the respawn.
            if player.gun.ammo_count() == 0 {
                player.gun.restart_timer(game.tick);
            }
            player
        }
        None => match (position, direction) {
            (Some(position), Some(direction)) => Player::new(
                player_id.clone(),
                position,
                direction,
                Gun::from_spec(&game.rules.gun),
            ),
            _ => return Err(ApplyError::IncompleteSpawn(player_id.clone())),
        },
    };
    game.players.insert(player_id.clone(), player);
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
