//! Game Logic Module
//!
//! The arena simulation. Deterministic given the same seed and request stream.
//!
//! ## Module Structure
//!
//! - `direction`: The four facings and their grid steps
//! - `rules`: Gameplay constants and gun specs
//! - `collision`: Circles, segments and nearest-hit resolution
//! - `map`: Arena bounds and obstacles
//! - `entity`: Players, guns, bullets
//! - `request`: Player intents and their validation
//! - `update`: State changes, the only way a game mutates
//! - `state`: The game and its queries
//! - `tick`: Authoritative and follower stepping
//! - `snapshot`: Read-only copies for clients

pub mod direction;
pub mod rules;
pub mod collision;
pub mod map;
pub mod entity;
pub mod request;
pub mod update;
pub mod state;
pub mod tick;
pub mod snapshot;

// Re-export key types
pub use direction::Direction;
pub use rules::{GameRules, GunSpec};
pub use collision::{CircleBox, Segment};
pub use map::ArenaMap;
pub use entity::{Bullet, Color, DeadPlayer, Gun, Player, PlayerId};
pub use request::{RequestError, RequestKind, UpdateRequest};
pub use update::{ApplyError, Update};
pub use state::{Game, HitTarget};
pub use tick::TickResult;
pub use snapshot::{GameSnapshot, SnapshotError};
