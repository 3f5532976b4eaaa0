//! Follower Client
//!
//! Connects to an arena server, rebuilds the game from the handshake
//! snapshot and keeps a replica in sync by replaying update groups.

use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info, instrument, warn};

use crate::core::hash::short_hex;
use crate::game::entity::PlayerId;
use crate::game::state::Game;
use crate::game::update::Update;
use crate::network::frame::{read_frame, write_frame, FrameError};
use crate::network::protocol::{
    CommandBatch, Handshake, HandshakeResponse, ProtocolError, UpdateGroup, DISCONNECTED_FRAME,
};

/// Seed for the replica's generator. Followers never resolve requests, so
/// it never influences replicated state.
const FOLLOWER_SEED: u64 = 0;

/// A connected player with a local replica of the arena.
pub struct ArenaClient {
    stream: TcpStream,
    player_id: PlayerId,
    game: Game,
}

impl ArenaClient {
    /// Connect and complete the handshake.
    #[instrument(skip(addr, version))]
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        player_id: &str,
        version: &str,
    ) -> Result<Self, ProtocolError> {
        let mut stream = TcpStream::connect(addr).await.map_err(FrameError::from)?;

        let handshake = Handshake {
            player_id: player_id.to_string(),
            version: Some(version.to_string()),
        };
        write_frame(&mut stream, &serde_json::to_vec(&handshake)?).await?;

        let payload = read_frame(&mut stream).await?;
        match serde_json::from_slice::<HandshakeResponse>(&payload)? {
            HandshakeResponse::Accepted(reply) => {
                let game = Game::from_snapshot(&reply.state, FOLLOWER_SEED)?;
                info!(
                    tick = reply.tick,
                    digest = %short_hex(&game.state_digest()),
                    "joined arena"
                );
                Ok(Self {
                    stream,
                    player_id: PlayerId::new(player_id),
                    game,
                })
            }
            HandshakeResponse::Rejected(group) => {
                let message = group
                    .updates
                    .iter()
                    .find_map(|update| match update {
                        Update::Error { message, .. } => Some(message.clone()),
                        _ => None,
                    })
                    .unwrap_or_else(|| "no reason given".to_string());
                Err(ProtocolError::Rejected(message))
            }
        }
    }

    /// This client's player id.
    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    /// Local replica.
    pub fn game(&self) -> &Game {
        &self.game
    }

    /// Send commands for the upcoming tick and beyond.
    pub async fn send(&mut self, batch: &CommandBatch) -> Result<(), ProtocolError> {
        let bytes = serde_json::to_vec(batch)?;
        write_frame(&mut self.stream, &bytes).await?;
        Ok(())
    }

    /// Receive one frame of update groups and replay them.
    ///
    /// Every group must continue exactly where the replica stands.
    pub async fn receive(&mut self) -> Result<Vec<UpdateGroup>, ProtocolError> {
        let payload = read_frame(&mut self.stream).await?;
        if payload == DISCONNECTED_FRAME {
            return Err(ProtocolError::Disconnected);
        }

        let groups: Vec<UpdateGroup> = serde_json::from_slice(&payload)?;
        for group in &groups {
            let expected = self.game.tick() + 1;
            if group.tick != expected {
                return Err(ProtocolError::TickGap {
                    expected,
                    got: group.tick,
                });
            }

            for update in &group.updates {
                if let Update::Error { player_id, message } = update {
                    if *player_id == self.player_id {
                        warn!(tick = group.tick, %message, "server rejected request");
                    }
                }
            }
            self.game.external_step(&group.updates)?;
        }

        debug!(tick = self.game.tick(), groups = groups.len(), "replica advanced");
        Ok(groups)
    }

    /// Send a batch and wait for the groups answering it.
    pub async fn exchange(&mut self, batch: &CommandBatch) -> Result<Vec<UpdateGroup>, ProtocolError> {
        self.send(batch).await?;
        self.receive().await
    }
}
