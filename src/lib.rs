//! # Arena Core
//!
//! Tick-synchronous authoritative server for a multiplayer grid arena.
//! Remote bots move, rotate, shoot and respawn; the server is the single
//! source of truth and streams every state change to every client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ARENA CORE                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── vec2.rs     - Continuous vectors and grid cells         │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  └── hash.rs     - State digests                             │
//! │                                                              │
//! │  game/           - Game logic (deterministic)                │
//! │  ├── entity.rs   - Players, guns, bullets                    │
//! │  ├── request.rs  - Player intents and validation             │
//! │  ├── update.rs   - State changes                             │
//! │  ├── state.rs    - Game state and queries                    │
//! │  ├── tick.rs     - Authoritative and follower steps          │
//! │  ├── collision.rs- Circles, segments, nearest hit            │
//! │  └── snapshot.rs - Read-only state for clients               │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── frame.rs    - Length-prefixed framing                   │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── lag.rs      - Future requests                           │
//! │  ├── session.rs  - Per-player slots and fan-out              │
//! │  ├── server.rs   - Tick loop and connection workers          │
//! │  └── client.rs   - Follower replica                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tick Flow
//!
//! Each tick the server takes at most one command per connected player
//! (pretick), resolves them in order, applies time-driven updates
//! (reloads, bullets), advances the tick and fans the resulting update
//! group out to every client. Clients replay the groups on their own copy
//! of the game.
//!
//! ## Determinism
//!
//! The `core/` and `game/` modules are deterministic:
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time dependencies
//! - All randomness from seeded Xorshift128+
//!
//! Followers never draw random numbers: spawn positions arrive as updates.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::vec2::{GridPosition, Vec2};
pub use core::rng::DeterministicRng;
pub use game::direction::Direction;
pub use game::state::Game;
pub use game::entity::PlayerId;
pub use game::request::{RequestKind, UpdateRequest};
pub use game::update::Update;
pub use network::{ArenaClient, CommandBatch, GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
