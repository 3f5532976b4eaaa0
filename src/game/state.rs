//! Game State
//!
//! The [`Game`] aggregate root and the read-only queries collaborators use.
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;

use crate::core::rng::DeterministicRng;
use crate::core::vec2::GridPosition;
use crate::game::collision::{nearest_hit, CircleBox, Segment};
use crate::game::entity::{Bullet, DeadPlayer, Player, PlayerId};
use crate::game::map::ArenaMap;
use crate::game::request::{RequestError, UpdateRequest};
use crate::game::rules::GameRules;
use crate::game::update::Update;

/// What a segment ran into first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HitTarget {
    /// A live player
    Player(PlayerId),
    /// Map obstacle by index
    Obstacle(usize),
    /// Caller-supplied extra box by index
    Extra(usize),
}

/// Complete simulation state of one arena.
#[derive(Clone, Debug)]
pub struct Game {
    pub(crate) tick: u64,
    pub(crate) players: BTreeMap<PlayerId, Player>,
    pub(crate) dead_players: BTreeMap<PlayerId, DeadPlayer>,
    pub(crate) bullets: Vec<Bullet>,
    pub(crate) pending: Vec<UpdateRequest>,
    pub(crate) rules: GameRules,
    pub(crate) map: ArenaMap,
    pub(crate) rng: DeterministicRng,
}

impl Game {
    /// Create an empty game at tick 0.
    pub fn new(rules: GameRules, map: ArenaMap, seed: u64) -> Self {
        Self {
            tick: 0,
            players: BTreeMap::new(),
            dead_players: BTreeMap::new(),
            bullets: Vec::new(),
            pending: Vec::new(),
            rules,
            map,
            rng: DeterministicRng::new(seed),
        }
    }

    /// Standard rules on the standard map.
    pub fn standard(seed: u64) -> Self {
        Self::new(GameRules::default(), ArenaMap::standard(), seed)
    }

    // ===== ACCESSORS =====

    /// Current tick.
    #[inline]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Gameplay rules.
    #[inline]
    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    /// Arena geometry.
    #[inline]
    pub fn map(&self) -> &ArenaMap {
        &self.map
    }

    /// Live players by id.
    #[inline]
    pub fn players(&self) -> &BTreeMap<PlayerId, Player> {
        &self.players
    }

    /// Dead player records by id.
    #[inline]
    pub fn dead_players(&self) -> &BTreeMap<PlayerId, DeadPlayer> {
        &self.dead_players
    }

    /// Bullets in flight, oldest first.
    #[inline]
    pub fn bullets(&self) -> &[Bullet] {
        &self.bullets
    }

    /// Requests accepted but not yet stepped.
    #[inline]
    pub fn pending_requests(&self) -> &[UpdateRequest] {
        &self.pending
    }

    // ===== COMMANDS =====

    /// Queue requests for the next step. Nothing is validated here.
    pub fn accept<I>(&mut self, requests: I)
    where
        I: IntoIterator<Item = UpdateRequest>,
    {
        self.pending.extend(requests);
    }

    /// Dry-run a request against the current state.
    ///
    /// Duplicate detection only happens inside a step.
    pub fn check(&self, request: &UpdateRequest) -> Result<Vec<Update>, RequestError> {
        let mut rng = self.rng.clone();
        request.resolve(self, &mut rng)
    }

    /// True if the request would currently produce updates.
    pub fn validate(&self, request: &UpdateRequest) -> bool {
        self.check(request).is_ok()
    }

    // ===== QUERIES =====

    /// Live player by id.
    pub fn get_player(&self, player_id: &PlayerId) -> Option<&Player> {
        self.players.get(player_id)
    }

    /// Is the player alive?
    pub fn player_is_spawned(&self, player_id: &PlayerId) -> bool {
        self.players.contains_key(player_id)
    }

    /// Ticks since the player died, `None` if it is not dead.
    pub fn ticks_from_death(&self, player_id: &PlayerId) -> Option<u64> {
        self.dead_players
            .get(player_id)
            .map(|dead| self.tick.saturating_sub(dead.death_tick))
    }

    /// Would a spawn request pass the liveness and respawn-delay checks?
    pub fn can_spawn(&self, player_id: &PlayerId) -> bool {
        if self.player_is_spawned(player_id) {
            return false;
        }
        match self.ticks_from_death(player_id) {
            Some(elapsed) => elapsed >= self.rules.min_respawn_ticks,
            None => true,
        }
    }

    /// Is the player alive with a gun ready to fire?
    pub fn can_player_shoot(&self, player_id: &PlayerId) -> bool {
        self.get_player(player_id)
            .map(|player| player.gun.can_shoot(self.tick))
            .unwrap_or(false)
    }

    /// Live players other than `player_id`.
    pub fn opponents_of<'a>(&'a self, player_id: &'a PlayerId) -> impl Iterator<Item = &'a Player> + 'a {
        self.players
            .values()
            .filter(move |player| &player.id != player_id)
    }

    /// Can a player stand on `position`? `ignore` excludes one player (the mover).
    pub fn can_player_step_on(&self, position: GridPosition, ignore: Option<&PlayerId>) -> bool {
        let radius = self.rules.player_radius;
        let center = position.to_vec2();
        if !self.map.contains_circle(center, radius) {
            return false;
        }
        let body = CircleBox::new(center, radius);
        let others = self
            .players
            .values()
            .filter(|player| Some(&player.id) != ignore)
            .map(|player| player.bounding_box(radius));
        for other in others {
            if other.intersects_circle(body.center, body.radius) {
                return false;
            }
        }
        !self.map.hits_obstacle(center, radius)
    }

    /// Random free cell, drawn from `rng` with a bounded number of attempts.
    pub fn find_spawn_point(&self, rng: &mut DeterministicRng) -> Option<GridPosition> {
        for _ in 0..self.rules.spawn_attempts {
            let position = GridPosition::new(
                rng.next_int_range(0, self.map.width),
                rng.next_int_range(0, self.map.height),
            );
            if self.can_player_step_on(position, None) {
                return Some(position);
            }
        }
        None
    }

    /// First thing `segment` runs into: live players, then obstacles, then `extra`.
    pub fn get_nearest_hit(&self, segment: &Segment, extra: &[CircleBox]) -> Option<HitTarget> {
        let radius = self.rules.player_radius;
        let players = self
            .players
            .values()
            .map(|player| (player.bounding_box(radius), HitTarget::Player(player.id.clone())));
        let obstacles = self
            .map
            .obstacles
            .iter()
            .enumerate()
            .map(|(i, obstacle)| (*obstacle, HitTarget::Obstacle(i)));
        let extras = extra
            .iter()
            .enumerate()
            .map(|(i, shape)| (*shape, HitTarget::Extra(i)));
        nearest_hit(segment, players.chain(obstacles).chain(extras))
    }

    /// Would a bullet fired by `shooter` right now reach `target` first?
    pub fn has_clear_bullet_path(&self, shooter: &PlayerId, target: &PlayerId) -> bool {
        let Some(player) = self.get_player(shooter) else {
            return false;
        };
        let ray = player.bullet_ray(&self.rules);
        self.get_nearest_hit(&ray, &[]) == Some(HitTarget::Player(target.clone()))
    }
}

// =============================================================================
// TESTS
// =============================================================================
