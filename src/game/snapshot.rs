//! Game Snapshots
//!
//! Versioned, read-only copies of the game built once per tick. New
//! connections receive one during the handshake; collaborators read them
//! without touching the live state.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::hash::{compute_state_hash, StateHash, StateHasher};
use crate::core::rng::DeterministicRng;
use crate::game::entity::{Bullet, DeadPlayer, Gun, Player};
use crate::game::map::ArenaMap;
use crate::game::rules::GameRules;
use crate::game::state::Game;

/// Snapshot layout version.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Snapshot could not be turned back into a game.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// Produced by an incompatible server
    #[error("unsupported snapshot format {0}")]
    UnsupportedFormat(u32),
}

/// Complete read-only state at one tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    /// Layout version
    pub format_version: u32,
    /// Tick of the state
    pub tick: u64,
    /// Rules the game runs with
    pub rules: GameRules,
    /// Arena geometry
    pub map: ArenaMap,
    /// Live players in id order
    pub players: Vec<Player>,
    /// Dead player records in id order
    pub dead_players: Vec<DeadPlayer>,
    /// Bullets in flight, oldest first
    pub bullets: Vec<Bullet>,
    /// Hex SHA-256 of the state
    pub digest: String,
}

impl Game {
    /// Deterministic digest of the tick, players, dead records and bullets.
    pub fn state_digest(&self) -> StateHash {
        compute_state_hash(self.tick, |hasher| {
            hasher.update_u64(self.players.len() as u64);
            for player in self.players.values() {
                hash_player(hasher, player);
            }

            hasher.update_u64(self.dead_players.len() as u64);
            for dead in self.dead_players.values() {
                hash_player(hasher, &dead.player);
                hasher.update_u64(dead.death_tick);
            }

            hasher.update_u64(self.bullets.len() as u64);
            for bullet in &self.bullets {
                hasher.update_str(&bullet.id);
                hasher.update_u64(bullet.start_tick);
                hasher.update_vec2(bullet.origin);
                hasher.update_vec2(bullet.direction);
                hasher.update_str(bullet.reward_receiver.as_str());
            }
        })
    }

    /// Build a read-only snapshot of the current state.
    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            tick: self.tick,
            rules: self.rules.clone(),
            map: self.map.clone(),
            players: self.players.values().cloned().collect(),
            dead_players: self.dead_players.values().cloned().collect(),
            bullets: self.bullets.clone(),
            digest: hex::encode(self.state_digest()),
        }
    }

    /// Rebuild a game from a snapshot (follower start-up).
    ///
    /// The RNG is fresh; followers never resolve spawn requests.
    pub fn from_snapshot(snapshot: &GameSnapshot, seed: u64) -> Result<Game, SnapshotError> {
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedFormat(snapshot.format_version));
        }
        Ok(Game {
            tick: snapshot.tick,
            players: snapshot
                .players
                .iter()
                .map(|player| (player.id.clone(), player.clone()))
                .collect(),
            dead_players: snapshot
                .dead_players
                .iter()
                .map(|dead| (dead.player.id.clone(), dead.clone()))
                .collect(),
            bullets: snapshot.bullets.clone(),
            pending: Vec::new(),
            rules: snapshot.rules.clone(),
            map: snapshot.map.clone(),
            rng: DeterministicRng::new(seed),
        })
    }
}

fn hash_player(hasher: &mut StateHasher, player: &Player) {
    hasher.update_str(player.id.as_str());
    hasher.update_cell(player.position);
    hasher.update_u8(player.direction as u8);
    match player.color {
        Some(color) => {
            hasher.update_bool(true);
            hasher.update_bytes(&color.0);
        }
        None => hasher.update_bool(false),
    }
    hash_gun(hasher, &player.gun);
}

fn hash_gun(hasher: &mut StateHasher, gun: &Gun) {
    hasher.update_u32(gun.ammo_count());
    hasher.update_u64(gun.cooldown_start().unwrap_or(u64::MAX));
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::GridPosition;
    use crate::game::direction::Direction;
    use crate::game::entity::{Color, PlayerId};
    use crate::game::request::{RequestKind, UpdateRequest};
    use crate::game::update::Update;

    fn populated() -> Game {
        let mut game = Game::standard(4);
        Update::spawned(PlayerId::new("a@x.io"), GridPosition::new(100, 80), Direction::Left, Some(Color([5, 5, 5])))
            .apply(&mut game)
            .unwrap();
        game.accept([UpdateRequest::new(PlayerId::new("a@x.io"), 0, RequestKind::Shoot)]);
        game.step();
        game
    }

    #[test]
    fn test_snapshot_round_trip_keeps_digest() {
        let game = populated();
        let snapshot = game.snapshot();
        assert_eq!(snapshot.tick, 1);
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.bullets.len(), 1);

        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: GameSnapshot = serde_json::from_str(&json).unwrap();
        let rebuilt = Game::from_snapshot(&decoded, 0).unwrap();
        assert_eq!(hex::encode(rebuilt.state_digest()), snapshot.digest);
        assert_eq!(rebuilt.players(), game.players());
    }

    #[test]
    fn test_digest_tracks_state() {
        let mut game = populated();
        let before = game.state_digest();
        game.step();
        assert_ne!(game.state_digest(), before);
    }

    #[test]
    fn test_rejects_unknown_format() {
        let mut snapshot = populated().snapshot();
        snapshot.format_version = 99;
        assert_eq!(
            Game::from_snapshot(&snapshot, 0).unwrap_err(),
            SnapshotError::UnsupportedFormat(99)
        );
    }
}
