//! Shared Game State
//!
//! The single authoritative record synchronized across a session: token
//! position, reveal trail, map payload and fog parameters. All mutation goes
//! through the methods here so the clamping and reset rules live in one place.

use serde::{Serialize, Deserialize};

use crate::core::point::{MapPoint, clamp_trail};
use crate::game::events::StateChange;

/// Smallest reveal radius, as percent of map width.
pub const MIN_REVEAL_RADIUS: f64 = 1.0;

/// Largest reveal radius, as percent of map width.
pub const MAX_REVEAL_RADIUS: f64 = 25.0;

/// Reveal radius of a fresh session.
pub const DEFAULT_REVEAL_RADIUS: f64 = 8.0;

/// Clamp a requested reveal radius into the valid range.
///
/// Returns `None` for non-finite input, which has no safe nearest value.
pub fn clamp_reveal_radius(percent: f64) -> Option<f64> {
    if percent.is_finite() {
        Some(percent.clamp(MIN_REVEAL_RADIUS, MAX_REVEAL_RADIUS))
    } else {
        None
    }
}

/// Full game state of one session.
///
/// Serializes with the exact field names clients expect in a `gameState`
/// snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedGameState {
    /// Current token position.
    pub token_pos: MapPoint,
    /// Position restored by a reset; follows every committed move.
    pub default_token_pos: MapPoint,
    /// Ordered reveal trail. Later entries may override earlier ones when rendered.
    pub explored_areas: Vec<MapPoint>,
    /// Last uploaded map (Data URI), if any.
    pub map_image: Option<String>,
    /// Fog reveal radius in percent of map width, within `[1, 25]`.
    pub reveal_radius_percent: f64,
    /// When set, players only see around the current token position.
    pub gm_torchlight: bool,
}

impl Default for SharedGameState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedGameState {
    /// Fresh state: token at spawn, empty trail, no map, radius 8, torch off.
    pub fn new() -> Self {
        Self {
            token_pos: MapPoint::SPAWN,
            default_token_pos: MapPoint::SPAWN,
            explored_areas: Vec::new(),
            map_image: None,
            reveal_radius_percent: DEFAULT_REVEAL_RADIUS,
            gm_torchlight: false,
        }
    }

    /// Overwrite token position and trail (last writer wins, no merge).
    ///
    /// The committed position also becomes the new reset target.
    pub fn apply_move(&mut self, token_pos: MapPoint, explored_areas: Vec<MapPoint>) -> StateChange {
        let token_pos = token_pos.clamped();
        let explored_areas = clamp_trail(explored_areas);

        self.token_pos = token_pos;
        self.default_token_pos = token_pos;
        self.explored_areas = explored_areas.clone();

        StateChange::Moved { token_pos, explored_areas }
    }

    /// Set the reveal radius, clamped to `[1, 25]`.
    ///
    /// Non-finite values leave the state untouched and yield `None`.
    pub fn set_reveal_radius(&mut self, percent: f64) -> Option<StateChange> {
        let percent = clamp_reveal_radius(percent)?;
        self.reveal_radius_percent = percent;
        Some(StateChange::RadiusChanged { reveal_radius_percent: percent })
    }

    /// Toggle GM torchlight.
    pub fn set_torchlight(&mut self, enabled: bool) -> StateChange {
        self.gm_torchlight = enabled;
        StateChange::TorchToggled { enabled }
    }

    /// Replace the map. Clears the trail and returns the token to spawn.
    pub fn set_map(&mut self, map_image: String) -> StateChange {
        self.map_image = Some(map_image.clone());
        self.explored_areas.clear();
        self.token_pos = MapPoint::SPAWN;
        self.default_token_pos = MapPoint::SPAWN;
        StateChange::MapChanged { map_image }
    }

    /// Move the token back to its default position and clear the trail.
    pub fn reset(&mut self) -> StateChange {
        self.token_pos = self.default_token_pos;
        self.explored_areas.clear();
        StateChange::Reset { token_pos: self.token_pos }
    }

    /// Size of the stored map payload in bytes (0 when absent).
    pub fn map_bytes(&self) -> usize {
        self.map_image.as_ref().map(String::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pt(x: f64, y: f64) -> MapPoint {
        MapPoint::new(x, y)
    }

    #[test]
    fn test_initial_state() {
        let state = SharedGameState::new();
        assert_eq!(state.token_pos, MapPoint::SPAWN);
        assert_eq!(state.default_token_pos, MapPoint::SPAWN);
        assert!(state.explored_areas.is_empty());
        assert!(state.map_image.is_none());
        assert_eq!(state.reveal_radius_percent, 8.0);
        assert!(!state.gm_torchlight);
    }

    #[test]
    fn test_move_updates_default() {
        let mut state = SharedGameState::new();
        state.apply_move(pt(0.3, 0.4), vec![pt(0.3, 0.4)]);
        assert_eq!(state.token_pos, pt(0.3, 0.4));
        assert_eq!(state.default_token_pos, pt(0.3, 0.4));
        assert_eq!(state.explored_areas, vec![pt(0.3, 0.4)]);
    }

    #[test]
    fn test_move_clamps_coordinates() {
        let mut state = SharedGameState::new();
        let change = state.apply_move(pt(1.5, -0.2), vec![pt(-1.0, 3.0)]);
        assert_eq!(state.token_pos, pt(1.0, 0.0));
        assert_eq!(state.default_token_pos, pt(1.0, 0.0));
        assert_eq!(state.explored_areas, vec![pt(0.0, 1.0)]);
        assert_eq!(change, StateChange::Moved {
            token_pos: pt(1.0, 0.0),
            explored_areas: vec![pt(0.0, 1.0)],
        });
    }

    #[test]
    fn test_reset_restores_default_and_clears_trail() {
        let mut state = SharedGameState::new();
        state.apply_move(pt(0.3, 0.4), vec![pt(0.3, 0.4), pt(0.31, 0.4)]);
        let change = state.reset();
        assert_eq!(state.token_pos, pt(0.3, 0.4));
        assert!(state.explored_areas.is_empty());
        assert_eq!(change, StateChange::Reset { token_pos: pt(0.3, 0.4) });
    }

    #[test]
    fn test_reset_on_fresh_state_returns_spawn() {
        let mut state = SharedGameState::new();
        assert_eq!(state.reset(), StateChange::Reset { token_pos: MapPoint::SPAWN });
    }

    #[test]
    fn test_map_upload_resets_positions_and_trail() {
        let mut state = SharedGameState::new();
        state.apply_move(pt(0.1, 0.2), vec![pt(0.1, 0.2), pt(0.15, 0.2)]);
        state.set_map("data:image/png;base64,AAAA".into());
        assert_eq!(state.token_pos, MapPoint::SPAWN);
        assert_eq!(state.default_token_pos, MapPoint::SPAWN);
        assert!(state.explored_areas.is_empty());
        assert_eq!(state.map_image.as_deref(), Some("data:image/png;base64,AAAA"));
        assert_eq!(state.map_bytes(), 26);
    }

    #[test]
    fn test_radius_is_clamped() {
        let mut state = SharedGameState::new();
        state.set_reveal_radius(40.0);
        assert_eq!(state.reveal_radius_percent, 25.0);
        state.set_reveal_radius(0.0);
        assert_eq!(state.reveal_radius_percent, 1.0);
        state.set_reveal_radius(12.5);
        assert_eq!(state.reveal_radius_percent, 12.5);
    }

    #[test]
    fn test_non_finite_radius_is_ignored() {
        let mut state = SharedGameState::new();
        assert!(state.set_reveal_radius(f64::NAN).is_none());
        assert_eq!(state.reveal_radius_percent, DEFAULT_REVEAL_RADIUS);
    }

    #[test]
    fn test_torchlight() {
        let mut state = SharedGameState::new();
        assert_eq!(state.set_torchlight(true), StateChange::TorchToggled { enabled: true });
        assert!(state.gm_torchlight);
    }

    #[test]
    fn test_snapshot_field_names() {
        let value = serde_json::to_value(SharedGameState::new()).unwrap();
        for key in [
            "tokenPos",
            "defaultTokenPos",
            "exploredAreas",
            "mapImage",
            "revealRadiusPercent",
            "gmTorchlight",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert!(value["mapImage"].is_null());
    }

    fn arb_point() -> impl Strategy<Value = MapPoint> {
        (0.0f64..=1.0, 0.0f64..=1.0).prop_map(|(x, y)| MapPoint::new(x, y))
    }

    proptest! {
        #[test]
        fn prop_moves_are_last_writer_wins(
            moves in proptest::collection::vec(
                (arb_point(), proptest::collection::vec(arb_point(), 0..8)),
                1..20,
            )
        ) {
            let mut state = SharedGameState::new();
            for (pos, trail) in &moves {
                state.apply_move(*pos, trail.clone());
            }
            let (last_pos, last_trail) = moves.last().unwrap();
            prop_assert_eq!(state.token_pos, *last_pos);
            prop_assert_eq!(&state.explored_areas, last_trail);
        }

        #[test]
        fn prop_reset_returns_to_last_move(
            moves in proptest::collection::vec(arb_point(), 1..10),
        ) {
            let mut state = SharedGameState::new();
            for pos in &moves {
                state.apply_move(*pos, vec![*pos]);
            }
            state.reset();
            prop_assert_eq!(state.token_pos, *moves.last().unwrap());
            prop_assert!(state.explored_areas.is_empty());
        }

        #[test]
        fn prop_map_upload_always_respawns(
            pos in arb_point(),
            trail in proptest::collection::vec(arb_point(), 0..8),
        ) {
            let mut state = SharedGameState::new();
            state.apply_move(pos, trail);
            state.set_map("data:,".into());
            prop_assert_eq!(state.token_pos, MapPoint::SPAWN);
            prop_assert_eq!(state.default_token_pos, MapPoint::SPAWN);
            prop_assert!(state.explored_areas.is_empty());
        }

        #[test]
        fn prop_radius_always_in_range(r in proptest::num::f64::NORMAL) {
            let mut state = SharedGameState::new();
            state.set_reveal_radius(r);
            prop_assert!((MIN_REVEAL_RADIUS..=MAX_REVEAL_RADIUS).contains(&state.reveal_radius_percent));
        }
    }
}
