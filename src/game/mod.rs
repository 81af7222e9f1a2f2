//! Game State Module
//!
//! The synchronized map state and the mutations clients may apply to it.
//! Nothing here touches the network; every operation is a plain method call.
//!
//! ## Module Structure
//!
//! - `state`: Shared game state and its mutation rules
//! - `events`: Applied-mutation records handed to the broadcast layer

pub mod state;
pub mod events;

// Re-export key types
pub use state::{SharedGameState, MIN_REVEAL_RADIUS, MAX_REVEAL_RADIUS, DEFAULT_REVEAL_RADIUS};
pub use events::StateChange;
