//! Session Hub
//!
//! Per-player connection slots shared between connection workers and the
//! tick loop. One lock guards all slots, the outgoing buffers and the latest
//! snapshot, so registering a player and reading its starting snapshot is a
//! single atomic step with respect to publishing a tick.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::entity::PlayerId;
use crate::game::request::UpdateRequest;
use crate::game::snapshot::GameSnapshot;
use crate::network::lag::{CommandQueue, SubmitReport};
use crate::network::protocol::{CommandBatch, UpdateGroup};

/// Default cap on speculative commands per batch.
pub const MAX_FUTURE_REQUESTS: usize = 10;

/// Default cap on unflushed update groups (5 seconds of ticks).
pub const MAX_UPDATE_BACKLOG: usize = 75;

/// Weight of the previous estimate in the RTT moving average.
const RTT_SMOOTHING: f64 = 0.95;

/// Session hub configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unflushed groups tolerated before a client is dropped
    pub max_backlog: usize,
    /// Speculative commands accepted per batch
    pub max_future_requests: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_backlog: MAX_UPDATE_BACKLOG,
            max_future_requests: MAX_FUTURE_REQUESTS,
        }
    }
}

/// Why the hub ended a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Another connection registered the same player
    Replaced,
    /// Client stopped reading updates
    Backlog,
    /// Server is stopping
    Shutdown,
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Slot is gone or belongs to a newer connection
    #[error("player {0} is not connected")]
    NotConnected(PlayerId),

    /// Batch carries more speculative commands than allowed
    #[error("{got} future requests exceed the limit of {max}")]
    TooManyFutureRequests {
        /// Commands received
        got: usize,
        /// Limit
        max: usize,
    },
}

/// Handle returned to a newly registered connection.
#[derive(Debug)]
pub struct Registration {
    /// Identifies this connection's slot
    pub connection_id: Uuid,
    /// State the client starts replaying from
    pub snapshot: Arc<GameSnapshot>,
    /// Fires when the hub ends the connection
    pub kicked: watch::Receiver<Option<DisconnectReason>>,
}

/// Round-trip estimate between flushing updates and receiving the answer.
#[derive(Debug, Default, Clone, Copy)]
struct RttEstimate {
    smoothed: Option<f64>,
}

impl RttEstimate {
    fn record(&mut self, sample: Duration) {
        let sample = sample.as_secs_f64();
        self.smoothed = Some(match self.smoothed {
            Some(previous) => RTT_SMOOTHING * previous + (1.0 - RTT_SMOOTHING) * sample,
            None => sample,
        });
    }
}

struct PlayerSlot {
    connection_id: Uuid,
    commands: CommandQueue,
    outgoing: Vec<Arc<UpdateGroup>>,
    last_flushed_tick: u64,
    /// Group tick produced by the step that consumed the fresh command
    fresh_lands_at: Option<u64>,
    flushed_at: Option<Instant>,
    rtt: RttEstimate,
    kick_tx: watch::Sender<Option<DisconnectReason>>,
}

impl PlayerSlot {
    fn kick(&self, reason: DisconnectReason) {
        let _ = self.kick_tx.send(Some(reason));
    }
}

struct HubState {
    slots: BTreeMap<PlayerId, PlayerSlot>,
    latest: Arc<GameSnapshot>,
}

impl HubState {
    fn slot_mut(&mut self, player_id: &PlayerId, connection_id: Uuid) -> Result<&mut PlayerSlot, SessionError> {
        self.slots
            .get_mut(player_id)
            .filter(|slot| slot.connection_id == connection_id)
            .ok_or_else(|| SessionError::NotConnected(player_id.clone()))
    }
}

/// Shared state between connection workers and the tick loop.
pub struct SessionHub {
    state: Mutex<HubState>,
    pulse_tx: watch::Sender<u64>,
    config: SessionConfig,
}

impl SessionHub {
    /// Create a hub starting from `initial`.
    pub fn new(initial: Arc<GameSnapshot>, config: SessionConfig) -> Self {
        let (pulse_tx, _) = watch::channel(initial.tick);
        Self {
            state: Mutex::new(HubState {
                slots: BTreeMap::new(),
                latest: initial,
            }),
            pulse_tx,
            config,
        }
    }

    /// Hub configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Receiver woken after every published tick.
    pub fn subscribe_pulse(&self) -> watch::Receiver<u64> {
        self.pulse_tx.subscribe()
    }

    /// Register a connection for `player_id`, replacing any existing one.
    ///
    /// The returned snapshot is exactly the state before the first group
    /// that will be buffered for the new connection.
    pub async fn register(&self, player_id: PlayerId) -> Registration {
        let (kick_tx, kicked) = watch::channel(None);
        let connection_id = Uuid::new_v4();

        let mut state = self.state.lock().await;
        let snapshot = state.latest.clone();
        let slot = PlayerSlot {
            connection_id,
            commands: CommandQueue::new(),
            outgoing: Vec::new(),
            last_flushed_tick: snapshot.tick,
            fresh_lands_at: None,
            flushed_at: Some(Instant::now()),
            rtt: RttEstimate::default(),
            kick_tx,
        };
        if let Some(previous) = state.slots.insert(player_id.clone(), slot) {
            info!(player = %player_id, "replacing existing connection");
            previous.kick(DisconnectReason::Replaced);
        }

        Registration {
            connection_id,
            snapshot,
            kicked,
        }
    }

    /// Queue a client's command batch.
    pub async fn submit(
        &self,
        player_id: &PlayerId,
        connection_id: Uuid,
        batch: CommandBatch,
    ) -> Result<SubmitReport, SessionError> {
        if batch.future.len() > self.config.max_future_requests {
            return Err(SessionError::TooManyFutureRequests {
                got: batch.future.len(),
                max: self.config.max_future_requests,
            });
        }

        let mut state = self.state.lock().await;
        let slot = state.slot_mut(player_id, connection_id)?;
        if let Some(flushed_at) = slot.flushed_at.take() {
            slot.rtt.record(flushed_at.elapsed());
        }
        let report = slot.commands.submit(batch, slot.last_flushed_tick);
        slot.fresh_lands_at = None;
        if report.confirmed > 0 {
            debug!(player = %player_id, confirmed = report.confirmed, "late batch matched future requests");
        }
        Ok(report)
    }

    /// Pretick phase: take one command per player for the step starting at `tick`.
    pub async fn pretick(&self, tick: u64) -> Vec<UpdateRequest> {
        let mut state = self.state.lock().await;
        let mut requests = Vec::new();
        for (player_id, slot) in state.slots.iter_mut() {
            if slot.commands.has_fresh() {
                slot.fresh_lands_at = Some(tick + 1);
            }
            if let Some(Some(kind)) = slot.commands.pop(tick + 1) {
                requests.push(UpdateRequest::new(player_id.clone(), tick, kind));
            }
        }
        requests
    }

    /// Tick phase: buffer `group` for every player, store the snapshot,
    /// drop backlogged clients and wake the workers.
    ///
    /// Returns the players that were dropped.
    pub async fn publish(&self, group: UpdateGroup, snapshot: Arc<GameSnapshot>) -> Vec<PlayerId> {
        let tick = group.tick;
        let group = Arc::new(group);
        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock().await;
            state.latest = snapshot;
            for (player_id, slot) in state.slots.iter_mut() {
                slot.outgoing.push(group.clone());
                if slot.outgoing.len() > self.config.max_backlog {
                    evicted.push(player_id.clone());
                }
            }
            for player_id in &evicted {
                if let Some(slot) = state.slots.remove(player_id) {
                    warn!(player = %player_id, backlog = slot.outgoing.len(), "dropping client that stopped reading");
                    slot.kick(DisconnectReason::Backlog);
                }
            }
        }
        self.pulse_tx.send_replace(tick);
        evicted
    }

    /// Drain the outgoing buffer once the group of the player's fresh
    /// command has been published.
    ///
    /// `Ok(None)` means the fresh command is still queued, its group is not
    /// out yet, or nothing was published since the last flush; wait for
    /// another pulse.
    pub async fn take_outgoing(
        &self,
        player_id: &PlayerId,
        connection_id: Uuid,
    ) -> Result<Option<Vec<Arc<UpdateGroup>>>, SessionError> {
        let mut state = self.state.lock().await;
        let slot = state.slot_mut(player_id, connection_id)?;
        if slot.commands.has_fresh() {
            return Ok(None);
        }
        let published_up_to = slot.outgoing.last().map(|group| group.tick);
        match (published_up_to, slot.fresh_lands_at) {
            (None, _) => return Ok(None),
            (Some(last), Some(lands_at)) if last < lands_at => return Ok(None),
            _ => {}
        }
        let groups = std::mem::take(&mut slot.outgoing);
        if let Some(last) = groups.last() {
            slot.last_flushed_tick = last.tick;
        }
        slot.flushed_at = Some(Instant::now());
        Ok(Some(groups))
    }

    /// Remove the slot if it still belongs to `connection_id`.
    ///
    /// Safe to call any number of times.
    pub async fn disconnect(&self, player_id: &PlayerId, connection_id: Uuid) -> bool {
        let mut state = self.state.lock().await;
        let owned = state
            .slots
            .get(player_id)
            .is_some_and(|slot| slot.connection_id == connection_id);
        if owned {
            state.slots.remove(player_id);
        }
        owned
    }

    /// End every connection.
    pub async fn disconnect_all(&self, reason: DisconnectReason) {
        let mut state = self.state.lock().await;
        for (_, slot) in std::mem::take(&mut state.slots) {
            slot.kick(reason);
        }
    }

    /// Latest published snapshot.
    pub async fn latest_snapshot(&self) -> Arc<GameSnapshot> {
        self.state.lock().await.latest.clone()
    }

    /// Number of connected players.
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.slots.len()
    }

    /// Smoothed round-trip time per player, for those with a sample.
    pub async fn rtt_report(&self) -> Vec<(PlayerId, Duration)> {
        let state = self.state.lock().await;
        state
            .slots
            .iter()
            .filter_map(|(player_id, slot)| {
                slot.rtt
                    .smoothed
                    .map(|secs| (player_id.clone(), Duration::from_secs_f64(secs)))
            })
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::GridPosition;
    use crate::game::direction::Direction;
    use crate::game::map::ArenaMap;
    use crate::game::request::RequestKind;
    use crate::game::rules::GameRules;
    use crate::game::state::Game;
    use crate::game::update::Update;

    fn pid(s: &str) -> PlayerId {
        PlayerId::new(s)
    }

    fn test_game() -> Game {
        Game::new(GameRules::default(), ArenaMap::empty(100, 100), 3)
    }

    fn hub_for(game: &Game, config: SessionConfig) -> SessionHub {
        SessionHub::new(Arc::new(game.snapshot()), config)
    }

    /// One tick-loop iteration.
    async fn run_tick(hub: &SessionHub, game: &mut Game) -> Vec<PlayerId> {
        let requests = hub.pretick(game.tick()).await;
        game.accept(requests);
        let result = game.step();
        let snapshot = Arc::new(game.snapshot());
        hub.publish(result.into(), snapshot).await
    }

    #[tokio::test]
    async fn test_register_submit_tick_flush() {
        let mut game = test_game();
        let hub = hub_for(&game, SessionConfig::default());
        let id = pid("a@x.io");

        let reg = hub.register(id.clone()).await;
        assert_eq!(reg.snapshot.tick, 0);
        assert_eq!(hub.connection_count().await, 1);

        hub.submit(&id, reg.connection_id, CommandBatch::single(Some(RequestKind::Spawn { color: None })))
            .await
            .unwrap();
        assert_eq!(hub.take_outgoing(&id, reg.connection_id).await.unwrap(), None);

        run_tick(&hub, &mut game).await;
        let groups = hub.take_outgoing(&id, reg.connection_id).await.unwrap().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].tick, 1);
        assert!(matches!(
            groups[0].updates[0],
            Update::PlayerStateChange { alive: Some(true), .. }
        ));
        assert!(game.player_is_spawned(&id));
        assert_eq!(hub.latest_snapshot().await.tick, 1);
    }

    #[tokio::test]
    async fn test_pulse_carries_tick() {
        let mut game = test_game();
        let hub = hub_for(&game, SessionConfig::default());
        let mut pulse = hub.subscribe_pulse();
        pulse.borrow_and_update();

        run_tick(&hub, &mut game).await;
        pulse.changed().await.unwrap();
        assert_eq!(*pulse.borrow(), 1);
    }

    #[tokio::test]
    async fn test_replacement_kicks_old_connection() {
        let game = test_game();
        let hub = hub_for(&game, SessionConfig::default());
        let id = pid("a@x.io");

        let mut old = hub.register(id.clone()).await;
        let new = hub.register(id.clone()).await;
        old.kicked.changed().await.unwrap();
        assert_eq!(*old.kicked.borrow(), Some(DisconnectReason::Replaced));

        // The stale connection can neither submit nor remove the new slot.
        let err = hub.submit(&id, old.connection_id, CommandBatch::default()).await.unwrap_err();
        assert_eq!(err, SessionError::NotConnected(id.clone()));
        assert!(!hub.disconnect(&id, old.connection_id).await);
        assert_eq!(hub.connection_count().await, 1);

        assert!(hub.disconnect(&id, new.connection_id).await);
        assert!(!hub.disconnect(&id, new.connection_id).await);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_backlog_eviction() {
        let mut game = test_game();
        let hub = hub_for(&game, SessionConfig { max_backlog: 3, ..Default::default() });
        let id = pid("slow@x.io");
        let mut reg = hub.register(id.clone()).await;

        for _ in 0..3 {
            assert!(run_tick(&hub, &mut game).await.is_empty());
        }
        assert_eq!(run_tick(&hub, &mut game).await, vec![id.clone()]);
        assert_eq!(hub.connection_count().await, 0);
        reg.kicked.changed().await.unwrap();
        assert_eq!(*reg.kicked.borrow(), Some(DisconnectReason::Backlog));
    }

    #[tokio::test]
    async fn test_too_many_future_requests() {
        let game = test_game();
        let hub = hub_for(&game, SessionConfig { max_future_requests: 2, ..Default::default() });
        let id = pid("a@x.io");
        let reg = hub.register(id.clone()).await;

        let batch = CommandBatch::with_future(None, vec![None, None, None]);
        assert_eq!(
            hub.submit(&id, reg.connection_id, batch).await,
            Err(SessionError::TooManyFutureRequests { got: 3, max: 2 })
        );
    }

    #[tokio::test]
    async fn test_flush_waits_for_group_of_fresh_command() {
        let mut game = test_game();
        let hub = hub_for(&game, SessionConfig::default());
        let id = pid("a@x.io");
        let conn = hub.register(id.clone()).await.connection_id;

        run_tick(&hub, &mut game).await;
        hub.submit(&id, conn, CommandBatch::single(Some(RequestKind::Spawn { color: None })))
            .await
            .unwrap();

        // The tick loop has taken the command but not published its group yet.
        let requests = hub.pretick(game.tick()).await;
        assert_eq!(requests.len(), 1);
        assert_eq!(hub.take_outgoing(&id, conn).await.unwrap(), None);

        game.accept(requests);
        let result = game.step();
        hub.publish(result.into(), Arc::new(game.snapshot())).await;

        let groups = hub.take_outgoing(&id, conn).await.unwrap().unwrap();
        assert_eq!(groups.iter().map(|g| g.tick).collect::<Vec<_>>(), vec![1, 2]);
        assert!(matches!(
            groups[1].updates[0],
            Update::PlayerStateChange { alive: Some(true), .. }
        ));
    }

    #[tokio::test]
    async fn test_late_client_neither_loses_nor_repeats_commands() {
        let id = pid("a@x.io");
        let mut served = test_game();
        Update::spawned(id.clone(), GridPosition::new(20, 20), Direction::Right, None)
            .apply(&mut served)
            .unwrap();
        // Same intent delivered one command per tick.
        let mut reference = served.clone();

        let hub = hub_for(&served, SessionConfig::default());
        let conn = hub.register(id.clone()).await.connection_id;
        let step = || Some(RequestKind::Move);

        // Tick 1: move, with moves planned for ticks 2 to 4.
        hub.submit(&id, conn, CommandBatch::with_future(step(), vec![step(), step(), step()]))
            .await
            .unwrap();
        run_tick(&hub, &mut served).await;
        let first = hub.take_outgoing(&id, conn).await.unwrap().unwrap();
        assert_eq!(first.len(), 1);

        // Answers for ticks 2 and 3 are late: the planned moves run.
        run_tick(&hub, &mut served).await;
        run_tick(&hub, &mut served).await;
        assert_eq!(served.get_player(&id).unwrap().position, GridPosition::new(23, 20));

        // The late answer was computed after tick 1 and repeats the plan.
        let report = hub
            .submit(
                &id,
                conn,
                CommandBatch::with_future(step(), vec![step(), step(), Some(RequestKind::Rotate { direction: 2 })]),
            )
            .await
            .unwrap();
        assert_eq!(report.confirmed, 2);
        assert_eq!(report.queued, 2);

        run_tick(&hub, &mut served).await;
        let groups = hub.take_outgoing(&id, conn).await.unwrap().unwrap();
        assert_eq!(groups.iter().map(|g| g.tick).collect::<Vec<_>>(), vec![2, 3, 4]);

        for _ in 0..4 {
            reference.accept([UpdateRequest::new(id.clone(), reference.tick(), RequestKind::Move)]);
            reference.step();
        }

        assert_eq!(served.tick(), reference.tick());
        assert_eq!(served.players(), reference.players());
        assert_eq!(served.get_player(&id).unwrap().position, GridPosition::new(24, 20));
        assert_eq!(served.get_player(&id).unwrap().direction, Direction::Right);
    }

    #[tokio::test]
    async fn test_rtt_recorded_between_flush_and_answer() {
        let mut game = test_game();
        let hub = hub_for(&game, SessionConfig::default());
        let id = pid("a@x.io");
        let reg = hub.register(id.clone()).await;

        hub.submit(&id, reg.connection_id, CommandBatch::default()).await.unwrap();
        run_tick(&hub, &mut game).await;
        hub.take_outgoing(&id, reg.connection_id).await.unwrap().unwrap();

        let report = hub.rtt_report().await;
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].0, id);
    }

    #[tokio::test]
    async fn test_disconnect_all() {
        let game = test_game();
        let hub = hub_for(&game, SessionConfig::default());
        let mut a = hub.register(pid("a@x.io")).await;
        let _b = hub.register(pid("b@x.io")).await;

        hub.disconnect_all(DisconnectReason::Shutdown).await;
        assert_eq!(hub.connection_count().await, 0);
        a.kicked.changed().await.unwrap();
        assert_eq!(*a.kicked.borrow(), Some(DisconnectReason::Shutdown));
    }
}
