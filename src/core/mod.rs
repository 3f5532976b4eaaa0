//! Core deterministic primitives.
//!
//! Geometry, the seeded generator and state hashing. Nothing here touches
//! I/O, wall-clock time or unordered collections.

pub mod vec2;
pub mod rng;
pub mod hash;

// Re-export core types
pub use vec2::{GridPosition, Vec2};
pub use rng::DeterministicRng;
pub use hash::{compute_state_hash, StateHash, StateHasher};
