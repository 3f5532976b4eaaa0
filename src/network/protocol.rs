//! Protocol Messages
//!
//! Wire format for client-server communication over length-prefixed frames.
//! All payloads are JSON, except the literal `disconnected` frame.

use std::sync::Arc;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::request::RequestKind;
use crate::game::snapshot::{GameSnapshot, SnapshotError};
use crate::game::tick::TickResult;
use crate::game::update::{ApplyError, Update};
use crate::network::frame::FrameError;
use crate::network::identity::IdentityError;

/// Raw payload telling a client its connection is over.
pub const DISCONNECTED_FRAME: &[u8] = b"disconnected";

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// First message on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Email-shaped player id
    pub player_id: String,
    /// Client version; required
    #[serde(default)]
    pub version: Option<String>,
}

/// One command slot; `None` means "do nothing this tick".
pub type Command = Option<RequestKind>;

/// A client's command for the upcoming tick plus speculative follow-ups.
///
/// On the wire: `null`, a single command object, or `[head, future...]`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawBatch", into = "RawBatch")]
pub struct CommandBatch {
    /// Command for the next tick
    pub head: Command,
    /// Commands to use, in order, for ticks the client fails to answer
    pub future: Vec<Command>,
}

impl CommandBatch {
    /// A batch without future requests.
    pub fn single(head: Command) -> Self {
        Self { head, future: Vec::new() }
    }

    /// A batch with future requests.
    pub fn with_future(head: Command, future: Vec<Command>) -> Self {
        Self { head, future }
    }

    /// Head followed by the future requests.
    pub fn into_commands(self) -> impl Iterator<Item = Command> {
        std::iter::once(self.head).chain(self.future)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawBatch {
    Many(Vec<Command>),
    One(Command),
}

impl From<RawBatch> for CommandBatch {
    fn from(raw: RawBatch) -> Self {
        match raw {
            RawBatch::One(head) => CommandBatch::single(head),
            RawBatch::Many(commands) => {
                let mut commands = commands.into_iter();
                let head = commands.next().flatten();
                CommandBatch::with_future(head, commands.collect())
            }
        }
    }
}

impl From<CommandBatch> for RawBatch {
    fn from(batch: CommandBatch) -> Self {
        if batch.future.is_empty() {
            RawBatch::One(batch.head)
        } else {
            RawBatch::Many(batch.into_commands().collect())
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Successful handshake: the state the client starts replaying from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeReply {
    /// Tick of `state`
    pub tick: u64,
    /// Full game snapshot
    pub state: Arc<GameSnapshot>,
}

/// Updates produced by one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateGroup {
    /// Updates in application order
    pub updates: Vec<Update>,
    /// Tick reached after applying them
    pub tick: u64,
}

impl From<TickResult> for UpdateGroup {
    fn from(result: TickResult) -> Self {
        Self {
            updates: result.updates,
            tick: result.tick,
        }
    }
}

/// What the server answers to a handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HandshakeResponse {
    /// Snapshot to start from
    Accepted(HandshakeReply),
    /// Error group; a `disconnected` frame follows
    Rejected(UpdateGroup),
}

// =============================================================================
// ERRORS
// =============================================================================

/// Protocol-level failures. All of them end the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Framing or socket failure
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Payload is not the expected JSON
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Handshake carried a bad player id
    #[error("invalid player id: {0}")]
    InvalidPlayerId(#[from] IdentityError),

    /// Handshake without a version
    #[error("handshake is missing the client version")]
    MissingVersion,

    /// Peer did not complete the handshake in time
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// Handshake rejected by the server
    #[error("handshake rejected: {0}")]
    Rejected(String),

    /// Too many speculative commands in one batch
    #[error("{got} future requests exceed the limit of {max}")]
    TooManyFutureRequests {
        /// Commands received
        got: usize,
        /// Limit
        max: usize,
    },

    /// Follower received a group out of sequence
    #[error("tick gap: replica at {expected}, group for {got}")]
    TickGap {
        /// Tick the replica reached
        expected: u64,
        /// Tick the group claims
        got: u64,
    },

    /// Follower failed to apply an update
    #[error("replica diverged: {0}")]
    Apply(#[from] ApplyError),

    /// Handshake snapshot cannot be loaded
    #[error("bad snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Server ended the connection
    #[error("disconnected by server")]
    Disconnected,
}

impl ProtocolError {
    /// True if the peer went away rather than misbehaving.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::Frame(e) => e.is_disconnect(),
            ProtocolError::Disconnected => true,
            _ => false,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::PlayerId;

    #[test]
    fn test_command_batch_forms() {
        let idle: CommandBatch = serde_json::from_str("null").unwrap();
        assert_eq!(idle, CommandBatch::single(None));

        let single: CommandBatch = serde_json::from_str(r#"{"type":"move"}"#).unwrap();
        assert_eq!(single, CommandBatch::single(Some(RequestKind::Move)));

        let list: CommandBatch =
            serde_json::from_str(r#"[{"type":"shoot"}, null, {"type":"rotate","direction":2}]"#).unwrap();
        assert_eq!(list.head, Some(RequestKind::Shoot));
        assert_eq!(list.future, vec![None, Some(RequestKind::Rotate { direction: 2 })]);

        let empty: CommandBatch = serde_json::from_str("[]").unwrap();
        assert_eq!(empty, CommandBatch::default());
    }

    #[test]
    fn test_command_batch_serializes_compactly() {
        let single = CommandBatch::single(Some(RequestKind::Move));
        assert_eq!(serde_json::to_string(&single).unwrap(), r#"{"type":"move"}"#);

        let many = CommandBatch::with_future(None, vec![Some(RequestKind::Shoot)]);
        assert_eq!(serde_json::to_string(&many).unwrap(), r#"[null,{"type":"shoot"}]"#);
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(serde_json::from_str::<CommandBatch>(r#"{"type":"teleport"}"#).is_err());
    }

    #[test]
    fn test_handshake_version_optional_on_wire() {
        let hs: Handshake = serde_json::from_str(r#"{"player_id":"a@b.cz"}"#).unwrap();
        assert_eq!(hs.version, None);
    }

    #[test]
    fn test_handshake_response_variants() {
        let rejected = UpdateGroup {
            updates: vec![Update::error(PlayerId::new("x"), "bad id")],
            tick: 4,
        };
        let json = serde_json::to_string(&rejected).unwrap();
        match serde_json::from_str::<HandshakeResponse>(&json).unwrap() {
            HandshakeResponse::Rejected(group) => assert_eq!(group, rejected),
            other => panic!("unexpected {:?}", other),
        }

        let game = crate::game::state::Game::standard(1);
        let accepted = HandshakeReply { tick: 0, state: Arc::new(game.snapshot()) };
        let json = serde_json::to_string(&accepted).unwrap();
        assert!(matches!(
            serde_json::from_str::<HandshakeResponse>(&json).unwrap(),
            HandshakeResponse::Accepted(_)
        ));
    }
}
