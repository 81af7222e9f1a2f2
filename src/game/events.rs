//! State Changes
//!
//! One variant per kind of mutation applied to a [`SharedGameState`].
//! The network layer turns each change into the matching outbound event.
//!
//! [`SharedGameState`]: crate::game::state::SharedGameState

use crate::core::point::MapPoint;

/// A mutation that was applied to shared state, carrying the values as stored.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// Token moved and trail replaced.
    Moved {
        /// New token position, clamped.
        token_pos: MapPoint,
        /// Full reveal trail after the move.
        explored_areas: Vec<MapPoint>,
    },

    /// Reveal radius changed.
    RadiusChanged {
        /// Radius as stored, within [1, 25].
        reveal_radius_percent: f64,
    },

    /// GM torchlight toggled.
    TorchToggled {
        /// Torchlight on or off.
        enabled: bool,
    },

    /// New map uploaded.
    MapChanged {
        /// Uploaded image payload.
        map_image: String,
    },

    /// Token returned to its default position, trail cleared.
    Reset {
        /// Position the token returned to.
        token_pos: MapPoint,
    },
}

impl StateChange {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StateChange::Moved { .. } => "move",
            StateChange::RadiusChanged { .. } => "radius",
            StateChange::TorchToggled { .. } => "torchToggle",
            StateChange::MapChanged { .. } => "map",
            StateChange::Reset { .. } => "reset",
        }
    }
}
