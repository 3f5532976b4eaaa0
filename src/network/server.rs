//! Arena Server
//!
//! TCP server running one authoritative arena. A single tick loop owns the
//! [`Game`]; every connection runs its own worker task and talks to the tick
//! loop only through the [`SessionHub`].

use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::core::hash::short_hex;
use crate::game::entity::PlayerId;
use crate::game::rules::TICKS_PER_SECOND;
use crate::game::state::Game;
use crate::game::update::Update;
use crate::network::frame::{read_frame, write_frame};
use crate::network::identity::parse_player_id;
use crate::network::protocol::{
    CommandBatch, Handshake, HandshakeReply, ProtocolError, UpdateGroup, DISCONNECTED_FRAME,
};
use crate::network::session::{
    DisconnectReason, Registration, SessionConfig, SessionError, SessionHub, MAX_FUTURE_REQUESTS,
    MAX_UPDATE_BACKLOG,
};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 7777;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Time a client has to complete the handshake.
    pub handshake_timeout: Duration,
    /// Simulation tick rate (Hz).
    pub tick_rate: u32,
    /// Seed of the authority's random generator.
    pub rng_seed: u64,
    /// Unflushed update groups tolerated per client.
    pub max_backlog: usize,
    /// Speculative commands accepted per batch.
    pub max_future_requests: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 256,
            handshake_timeout: Duration::from_secs(5),
            tick_rate: TICKS_PER_SECOND as u32,
            rng_seed: 0,
            max_backlog: MAX_UPDATE_BACKLOG,
            max_future_requests: MAX_FUTURE_REQUESTS,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Variable present but unparsable or out of range.
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
        /// Parse failure
        reason: String,
    },
}

impl ServerConfig {
    /// Load configuration from `ARENA_*` environment variables.
    ///
    /// Unset variables keep their default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let tick_rate: u32 = parse_var(&lookup, "ARENA_TICK_RATE", defaults.tick_rate)?;
        if tick_rate == 0 {
            return Err(ConfigError::Invalid {
                var: "ARENA_TICK_RATE",
                value: tick_rate.to_string(),
                reason: "tick rate must be positive".to_string(),
            });
        }
        let timeout_ms = parse_var(
            &lookup,
            "ARENA_HANDSHAKE_TIMEOUT_MS",
            defaults.handshake_timeout.as_millis() as u64,
        )?;

        Ok(Self {
            bind_addr: parse_var(&lookup, "ARENA_BIND_ADDR", defaults.bind_addr)?,
            max_connections: parse_var(&lookup, "ARENA_MAX_CONNECTIONS", defaults.max_connections)?,
            handshake_timeout: Duration::from_millis(timeout_ms),
            tick_rate,
            rng_seed: parse_var(&lookup, "ARENA_RNG_SEED", defaults.rng_seed)?,
            max_backlog: parse_var(&lookup, "ARENA_MAX_BACKLOG", defaults.max_backlog)?,
            max_future_requests: parse_var(
                &lookup,
                "ARENA_MAX_FUTURE_REQUESTS",
                defaults.max_future_requests,
            )?,
            version: defaults.version,
        })
    }

    /// Wall-clock length of one tick.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.tick_rate.max(1) as u64)
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_backlog: self.max_backlog,
            max_future_requests: self.max_future_requests,
        }
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

// =============================================================================
// ERRORS & REPORTS
// =============================================================================

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind or inspect the listener.
    #[error("Failed to bind: {0}")]
    Bind(#[from] std::io::Error),

    /// The tick loop panicked or stopped.
    #[error("Tick loop stopped: {0}")]
    TickLoop(String),

    /// `serve` was called a second time.
    #[error("Server is already running")]
    AlreadyRunning,
}

/// How a connection worker ended without a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Peer closed the socket.
    PeerClosed,
    /// Hub ended the connection.
    Kicked(DisconnectReason),
}

/// Sent by every connection worker to the supervisor when it ends.
#[derive(Debug)]
pub struct WorkerReport {
    /// Peer address.
    pub addr: SocketAddr,
    /// Player, once the handshake succeeded.
    pub player_id: Option<PlayerId>,
    /// Exit reason.
    pub outcome: Result<WorkerExit, ProtocolError>,
}

fn log_report(report: &WorkerReport) {
    let player = report.player_id.as_ref().map(PlayerId::as_str).unwrap_or("-");
    match &report.outcome {
        Ok(exit) => info!(addr = %report.addr, player, ?exit, "connection closed"),
        Err(e) if e.is_disconnect() => info!(addr = %report.addr, player, "peer went away"),
        Err(ProtocolError::HandshakeTimeout) => debug!(addr = %report.addr, "handshake timed out"),
        Err(e) => warn!(addr = %report.addr, player, error = %e, "protocol violation"),
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// The arena server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Connection slots shared with the tick loop.
    hub: Arc<SessionHub>,
    /// Authority state until `serve` hands it to the tick loop.
    game: Mutex<Option<Game>>,
    /// Open sockets, including those still handshaking.
    active: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server running the standard arena.
    pub fn new(config: ServerConfig) -> Self {
        let game = Game::standard(config.rng_seed);
        Self::with_game(config, game)
    }

    /// Create a server running `game`.
    pub fn with_game(config: ServerConfig, game: Game) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let hub = SessionHub::new(Arc::new(game.snapshot()), config.session_config());

        Self {
            config,
            hub: Arc::new(hub),
            game: Mutex::new(Some(game)),
            active: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from `listener` until shutdown or tick loop failure.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let game = self.game.lock().await.take().ok_or(GameServerError::AlreadyRunning)?;
        info!(
            "Arena server v{} listening on {} at {} Hz",
            self.config.version,
            listener.local_addr()?,
            self.config.tick_rate
        );

        let mut tick_handle = tokio::spawn(run_tick_loop(
            game,
            self.hub.clone(),
            self.config.tick_duration(),
        ));
        let stats_handle = tokio::spawn(run_stats_loop(self.hub.clone()));
        let (report_tx, mut report_rx) = mpsc::channel::<WorkerReport>(64);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let result = loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            if self.active.load(Ordering::SeqCst) >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr, report_tx.clone());
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(report) = report_rx.recv() => {
                    log_report(&report);
                }
                joined = &mut tick_handle => {
                    let reason = match joined {
                        Ok(()) => "exited".to_string(),
                        Err(e) => e.to_string(),
                    };
                    error!("Tick loop stopped: {}", reason);
                    break Err(GameServerError::TickLoop(reason));
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break Ok(());
                }
            }
        };

        tick_handle.abort();
        stats_handle.abort();
        self.hub.disconnect_all(DisconnectReason::Shutdown).await;
        result
    }

    /// Spawn a worker for a new socket.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, reports: mpsc::Sender<WorkerReport>) {
        let active = self.active.clone();
        active.fetch_add(1, Ordering::SeqCst);

        let mut worker = ConnectionWorker {
            stream,
            addr,
            hub: self.hub.clone(),
            handshake_timeout: self.config.handshake_timeout,
            claimed_id: None,
            session: None,
        };

        tokio::spawn(async move {
            let outcome = worker.run().await;
            if let Some((player_id, connection_id)) = &worker.session {
                worker.hub.disconnect(player_id, *connection_id).await;
            }
            active.fetch_sub(1, Ordering::SeqCst);

            let report = WorkerReport {
                addr,
                player_id: worker.session.map(|(player_id, _)| player_id),
                outcome,
            };
            if let Err(mpsc::error::SendError(report)) = reports.send(report).await {
                log_report(&report);
            }
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Open sockets, including those still handshaking.
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Players currently registered.
    pub async fn player_count(&self) -> usize {
        self.hub.connection_count().await
    }

    /// Latest published tick.
    pub async fn current_tick(&self) -> u64 {
        self.hub.latest_snapshot().await.tick
    }
}

// =============================================================================
// BACKGROUND LOOPS
// =============================================================================

/// Pretick, step, snapshot and publish once per interval. Never returns.
async fn run_tick_loop(mut game: Game, hub: Arc<SessionHub>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let requests = hub.pretick(game.tick()).await;
        game.accept(requests);
        let result = game.step();

        let snapshot = Arc::new(game.snapshot());
        debug!(
            tick = result.tick,
            updates = result.updates.len(),
            digest = %short_hex(&game.state_digest()),
            "tick"
        );

        let evicted = hub.publish(result.into(), snapshot).await;
        if !evicted.is_empty() {
            info!(tick = game.tick(), count = evicted.len(), "evicted backlogged clients");
        }
    }
}

/// Log connection statistics every second.
async fn run_stats_loop(hub: Arc<SessionHub>) {
    let mut ticker = interval(Duration::from_secs(1));

    loop {
        ticker.tick().await;

        let report = hub.rtt_report().await;
        for (player_id, rtt) in &report {
            debug!(player = %player_id, rtt_ms = rtt.as_secs_f64() * 1000.0, "round trip");
        }
        let players = hub.connection_count().await;
        debug!(players, "connection stats");
    }
}

// =============================================================================
// CONNECTION WORKER
// =============================================================================

struct ConnectionWorker {
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<SessionHub>,
    handshake_timeout: Duration,
    /// Raw id from the handshake, for addressing a rejection
    claimed_id: Option<String>,
    session: Option<(PlayerId, Uuid)>,
}

impl ConnectionWorker {
    async fn run(&mut self) -> Result<WorkerExit, ProtocolError> {
        let handshake = match timeout(self.handshake_timeout, self.handshake()).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::HandshakeTimeout),
        };
        let (player_id, mut registration) = match handshake {
            Ok(accepted) => accepted,
            Err(e) => {
                self.reject(&e).await;
                return Err(e);
            }
        };

        let outcome = self.lockstep(&player_id, &mut registration).await;
        match &outcome {
            Ok(WorkerExit::Kicked(_)) => {
                let _ = write_frame(&mut self.stream, DISCONNECTED_FRAME).await;
            }
            Err(e) if !e.is_disconnect() => {
                let _ = write_frame(&mut self.stream, DISCONNECTED_FRAME).await;
            }
            _ => {}
        }
        outcome
    }

    /// Validate the first frame, register the player and send the snapshot.
    async fn handshake(&mut self) -> Result<(PlayerId, Registration), ProtocolError> {
        let payload = read_frame(&mut self.stream).await?;
        let handshake: Handshake = serde_json::from_slice(&payload)?;
        self.claimed_id = Some(handshake.player_id.clone());

        let player_id = parse_player_id(&handshake.player_id)?;
        let version = handshake.version.ok_or(ProtocolError::MissingVersion)?;

        let registration = self.hub.register(player_id.clone()).await;
        self.session = Some((player_id.clone(), registration.connection_id));
        info!(
            addr = %self.addr,
            player = %player_id,
            client_version = %version,
            tick = registration.snapshot.tick,
            "player joined"
        );

        let reply = HandshakeReply {
            tick: registration.snapshot.tick,
            state: registration.snapshot.clone(),
        };
        self.send_json(&reply).await?;
        Ok((player_id, registration))
    }

    /// Answer a failed handshake with an error group and `disconnected`.
    async fn reject(&mut self, error: &ProtocolError) {
        if error.is_disconnect() {
            return;
        }
        let tick = self.hub.latest_snapshot().await.tick + 1;
        let recipient = PlayerId::new(self.claimed_id.clone().unwrap_or_default());
        let group = UpdateGroup {
            updates: vec![Update::error(recipient, error.to_string())],
            tick,
        };
        if self.send_json(&group).await.is_ok() {
            let _ = write_frame(&mut self.stream, DISCONNECTED_FRAME).await;
        }
    }

    /// Read a batch, wait until its head has run, flush, repeat.
    async fn lockstep(
        &mut self,
        player_id: &PlayerId,
        registration: &mut Registration,
    ) -> Result<WorkerExit, ProtocolError> {
        let connection_id = registration.connection_id;
        let mut pulse = self.hub.subscribe_pulse();

        loop {
            let payload = tokio::select! {
                frame = read_frame(&mut self.stream) => {
                    match frame {
                        Ok(payload) => payload,
                        Err(e) if e.is_disconnect() => return Ok(WorkerExit::PeerClosed),
                        Err(e) => return Err(e.into()),
                    }
                }
                _ = registration.kicked.changed() => {
                    return Ok(kick_reason(&registration.kicked));
                }
            };

            let batch: CommandBatch = serde_json::from_slice(&payload)?;
            match self.hub.submit(player_id, connection_id, batch).await {
                Ok(_) => {}
                Err(SessionError::NotConnected(_)) => return Ok(kick_reason(&registration.kicked)),
                Err(SessionError::TooManyFutureRequests { got, max }) => {
                    return Err(ProtocolError::TooManyFutureRequests { got, max });
                }
            }

            let groups = loop {
                match self.hub.take_outgoing(player_id, connection_id).await {
                    Ok(Some(groups)) => break groups,
                    Ok(None) => {}
                    Err(SessionError::NotConnected(_)) => return Ok(kick_reason(&registration.kicked)),
                    Err(SessionError::TooManyFutureRequests { .. }) => {}
                }
                tokio::select! {
                    changed = pulse.changed() => {
                        if changed.is_err() {
                            return Ok(WorkerExit::Kicked(DisconnectReason::Shutdown));
                        }
                    }
                    _ = registration.kicked.changed() => {
                        return Ok(kick_reason(&registration.kicked));
                    }
                }
            };

            self.send_json(&groups).await?;
        }
    }

    async fn send_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ProtocolError> {
        let bytes = serde_json::to_vec(value)?;
        write_frame(&mut self.stream, &bytes).await?;
        Ok(())
    }
}

fn kick_reason(kicked: &watch::Receiver<Option<DisconnectReason>>) -> WorkerExit {
    WorkerExit::Kicked(kicked.borrow().unwrap_or(DisconnectReason::Shutdown))
}
