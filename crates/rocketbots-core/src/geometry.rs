//! Geometry value types shared across the simulation.

use serde::{Deserialize, Serialize};

const FULL_TURN: f32 = std::f32::consts::TAU;
const HALF_TURN: f32 = std::f32::consts::PI;

/// Wrap an angle into `(-pi, pi]`.
#[must_use]
pub fn wrap_signed_angle(mut angle: f32) -> f32 {
    if angle.is_nan() {
        return 0.0;
    }
    while angle <= -HALF_TURN {
        angle += FULL_TURN;
    }
    while angle > HALF_TURN {
        angle -= FULL_TURN;
    }
    angle
}

/// An x/y point in arena units. Equality is exact-value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub x: f32,
    pub y: f32,
}

impl Location {
    /// Construct a new location.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another location.
    #[must_use]
    pub fn distance_to(self, other: Self) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Absolute bearing from this location to another, in radians.
    #[must_use]
    pub fn bearing_to(self, other: Self) -> f32 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    /// Translate `distance` units along `heading`.
    #[must_use]
    pub fn advanced(self, heading: f32, distance: f32) -> Self {
        Self {
            x: self.x + distance * heading.cos(),
            y: self.y + distance * heading.sin(),
        }
    }

    /// Rotate the point around the origin by `angle` radians.
    #[must_use]
    pub fn rotated(self, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            x: self.x * cos - self.y * sin,
            y: self.x * sin + self.y * cos,
        }
    }
}

/// Axis-aligned arena extents; the walls sit at `x = 0..width`, `y = 0..height`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bounds {
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    /// Construct new bounds.
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Whether a circle fits fully inside the walls.
    #[must_use]
    pub fn contains_circle(&self, center: Location, radius: f32) -> bool {
        center.x - radius > 0.0
            && center.y - radius > 0.0
            && center.x + radius < self.width
            && center.y + radius < self.height
    }

    /// Whether a circle touches or crosses a wall.
    #[must_use]
    pub fn touches_wall(&self, center: Location, radius: f32) -> bool {
        !self.contains_circle(center, radius)
    }

    /// Distance from `origin` to the nearest wall along `heading`, or `None`
    /// when the origin already lies outside the walls.
    #[must_use]
    pub fn wall_distance(&self, origin: Location, heading: f32) -> Option<f32> {
        if origin.x < 0.0 || origin.y < 0.0 || origin.x > self.width || origin.y > self.height {
            return None;
        }
        let (sin, cos) = heading.sin_cos();
        let tx = if cos > f32::EPSILON {
            (self.width - origin.x) / cos
        } else if cos < -f32::EPSILON {
            -origin.x / cos
        } else {
            f32::INFINITY
        };
        let ty = if sin > f32::EPSILON {
            (self.height - origin.y) / sin
        } else if sin < -f32::EPSILON {
            -origin.y / sin
        } else {
            f32::INFINITY
        };
        Some(tx.min(ty).max(0.0))
    }
}
