//! Normalized Map Coordinates
//!
//! Every position exchanged with clients is a fraction of the map's
//! width/height, so `(0, 0)` is the top-left corner and `(1, 1)` the
//! bottom-right, independent of the uploaded image's pixel size.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Canonical spawn X used for new sessions, map uploads and reset fallbacks.
pub const SPAWN_X: f64 = 0.85;

/// Canonical spawn Y.
pub const SPAWN_Y: f64 = 0.85;

/// A point in normalized map space.
#[derive(Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MapPoint {
    /// Horizontal position, 0 = left edge, 1 = right edge.
    pub x: f64,
    /// Vertical position, 0 = top edge, 1 = bottom edge.
    pub y: f64,
}

impl MapPoint {
    /// The canonical spawn point `(0.85, 0.85)`.
    pub const SPAWN: Self = Self { x: SPAWN_X, y: SPAWN_Y };

    /// Create a point without clamping.
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Return this point with both axes clamped into `[0, 1]`.
    ///
    /// Non-finite components have no meaningful nearest value, so they
    /// collapse onto the spawn coordinate of that axis.
    #[inline]
    pub fn clamped(self) -> Self {
        Self {
            x: clamp_unit(self.x, SPAWN_X),
            y: clamp_unit(self.y, SPAWN_Y),
        }
    }

    /// Whether both components already lie in `[0, 1]`.
    #[inline]
    pub fn is_normalized(self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

#[inline]
fn clamp_unit(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

/// Clamp every point of a reveal trail, preserving order.
pub fn clamp_trail(trail: Vec<MapPoint>) -> Vec<MapPoint> {
    trail.into_iter().map(MapPoint::clamped).collect()
}

impl fmt::Debug for MapPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MapPoint({:.4}, {:.4})", self.x, self.y)
    }
}

impl fmt::Display for MapPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}
