//! Core primitives.
//!
//! Value types shared by the game and network layers.

pub mod point;
pub mod code;

// Re-export core types
pub use point::{MapPoint, SPAWN_X, SPAWN_Y};
pub use code::{SessionCode, DEFAULT_CODE_LENGTH};
