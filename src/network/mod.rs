//! Network Layer
//!
//! Length-prefixed JSON over TCP, session slots and lag compensation.
//! This layer is **non-deterministic** - all game logic runs through `game/`.

pub mod frame;
pub mod identity;
pub mod protocol;
pub mod lag;
pub mod session;
pub mod server;
pub mod client;

pub use frame::{read_frame, write_frame, FrameError, MAX_FRAME_LEN};
pub use identity::{parse_player_id, IdentityError};
pub use protocol::{
    Command, CommandBatch, Handshake, HandshakeReply, HandshakeResponse, ProtocolError,
    UpdateGroup, DISCONNECTED_FRAME,
};
pub use lag::{CommandQueue, SubmitReport};
pub use session::{DisconnectReason, Registration, SessionConfig, SessionError, SessionHub};
pub use server::{ConfigError, GameServer, GameServerError, ServerConfig, WorkerExit, WorkerReport};
pub use client::ArenaClient;
