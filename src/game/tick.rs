//! Authoritative Simulation Tick
//!
//! One step of the arena: resolve the pending requests, derive cron effects
//! (reloads, bullet travel), apply everything, advance the tick.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::game::request::RequestError;
use crate::game::state::{Game, HitTarget};
use crate::game::update::{ApplyError, Update};

/// Result of a tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickResult {
    /// Tick reached after the step
    pub tick: u64,
    /// Updates applied during the step, in order
    pub updates: Vec<Update>,
}

impl Game {
    /// Run one authoritative step.
    ///
    /// Pending requests are resolved in arrival order, each against the state
    /// left by the previous ones. At most one request per player counts; later
    /// ones are rejected. Cron updates are computed after all requests and see
    /// their effects. The tick advances by exactly one.
    pub fn step(&mut self) -> TickResult {
        let requests = std::mem::take(&mut self.pending);
        let mut updates = Vec::new();
        let mut seen = BTreeSet::new();

        for request in requests {
            if !seen.insert(request.player_id.clone()) {
                let error = RequestError::DuplicateRequest(request.player_id.clone());
                updates.push(Update::error(request.player_id, error.to_string()));
                continue;
            }

            let mut rng = self.rng.clone();
            let resolved = request.resolve(self, &mut rng);
            self.rng = rng;

            match resolved {
                Ok(batch) => {
                    for update in &batch {
                        self.apply_authoritative(update);
                    }
                    updates.extend(batch);
                }
                Err(error) if !error.is_visible() => {
                    debug!(player = %request.player_id, tick = self.tick, %error, "request dropped");
                }
                Err(error) => {
                    debug!(player = %request.player_id, tick = self.tick, %error, "request rejected");
                    updates.push(Update::error(request.player_id, error.to_string()));
                }
            }
        }

        let cron = self.cron_updates();
        for update in &cron {
            self.apply_authoritative(update);
        }
        updates.extend(cron);

        self.tick += 1;
        TickResult {
            tick: self.tick,
            updates,
        }
    }

    /// Replay an authoritative batch without validation, then advance the tick.
    pub fn external_step(&mut self, updates: &[Update]) -> Result<(), ApplyError> {
        for update in updates {
            update.apply(self)?;
        }
        self.tick += 1;
        Ok(())
    }

    /// Time-driven updates for the current state.
    ///
    /// All updates are computed before any is applied.
    fn cron_updates(&self) -> Vec<Update> {
        let mut updates = Vec::new();

        for player in self.players.values() {
            if player.gun.can_reload(self.tick) {
                updates.push(Update::GunStateChange {
                    player_id: player.id.clone(),
                    ammo_count: player.gun.full_ammo_count,
                });
            }
        }

        for bullet in &self.bullets {
            let hit = bullet
                .trajectory(self.tick, self.rules.bullet_speed)
                .and_then(|segment| self.get_nearest_hit(&segment, &[]));

            let hit_player_id = match hit {
                Some(HitTarget::Player(victim)) => {
                    updates.push(Update::killed(victim.clone()));
                    Some(victim)
                }
                Some(_) => None,
                None if bullet.age(self.tick) > self.rules.max_bullet_age => None,
                None => continue,
            };

            updates.push(Update::RemoveBullet {
                bullet_id: bullet.id.clone(),
                hit_player_id,
                reward_receiver_id: bullet.reward_receiver.clone(),
            });
        }

        updates
    }

    /// Apply an update the authority produced itself.
    fn apply_authoritative(&mut self, update: &Update) {
        if let Err(error) = update.apply(self) {
            warn!(tick = self.tick, %error, ?update, "authoritative update failed to apply");
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
