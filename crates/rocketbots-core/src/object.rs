//! The physical object model: every arena occupant is a moving circle.

use crate::color::Color;
use crate::geometry::{wrap_signed_angle, Location};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discriminates the arena occupants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Robot,
    Target,
    Obstacle,
    StationaryLight,
    MovingLight,
}

/// What a sensor looks for; both light variants read as lights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SenseCategory {
    Light,
    Robot,
    Obstacle,
    Target,
}

impl ObjectKind {
    /// The sensing category this kind belongs to.
    #[must_use]
    pub const fn category(self) -> SenseCategory {
        match self {
            Self::Robot => SenseCategory::Robot,
            Self::Target => SenseCategory::Target,
            Self::Obstacle => SenseCategory::Obstacle,
            Self::StationaryLight | Self::MovingLight => SenseCategory::Light,
        }
    }

    /// Solid objects block movement; targets and lights are passable.
    #[must_use]
    pub const fn is_solid(self) -> bool {
        matches!(self, Self::Robot | Self::Obstacle)
    }
}

/// Errors raised by object constructors and setters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjectError {
    #[error("radius must be positive and finite")]
    InvalidRadius,
    #[error("speed must be non-negative and finite")]
    InvalidSpeed,
}

/// Position, pose, and paint for one arena occupant.
///
/// Owned exclusively by the [`Arena`](crate::arena::Arena) once added;
/// everything mutates in place through the setters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PhysicalObject {
    pub kind: ObjectKind,
    location: Location,
    orientation: f32,
    radius: f32,
    speed: f32,
    color: Color,
}

impl PhysicalObject {
    /// Build a stationary object; the radius invariant is checked here and by
    /// every later `set_radius`.
    pub fn new(
        kind: ObjectKind,
        location: Location,
        orientation: f32,
        radius: f32,
        color: Color,
    ) -> Result<Self, ObjectError> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(ObjectError::InvalidRadius);
        }
        Ok(Self {
            kind,
            location,
            orientation: wrap_signed_angle(orientation),
            radius,
            speed: 0.0,
            color,
        })
    }

    #[must_use]
    pub const fn location(&self) -> Location {
        self.location
    }

    #[must_use]
    pub const fn orientation(&self) -> f32 {
        self.orientation
    }

    #[must_use]
    pub const fn radius(&self) -> f32 {
        self.radius
    }

    #[must_use]
    pub const fn speed(&self) -> f32 {
        self.speed
    }

    #[must_use]
    pub const fn color(&self) -> Color {
        self.color
    }

    pub fn set_location(&mut self, location: Location) {
        self.location = location;
    }

    /// Set the heading; any finite angle is accepted and wrapped.
    pub fn set_orientation(&mut self, orientation: f32) {
        self.orientation = wrap_signed_angle(orientation);
    }

    /// Rotate by a relative angle.
    pub fn rotate(&mut self, delta: f32) {
        self.set_orientation(self.orientation + delta);
    }

    pub fn set_speed(&mut self, speed: f32) -> Result<(), ObjectError> {
        if !(speed.is_finite() && speed >= 0.0) {
            return Err(ObjectError::InvalidSpeed);
        }
        self.speed = speed;
        Ok(())
    }

    pub fn set_radius(&mut self, radius: f32) -> Result<(), ObjectError> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(ObjectError::InvalidRadius);
        }
        self.radius = radius;
        Ok(())
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = color;
    }

    /// Advance along the current heading by `speed * dt`. No boundary wrap;
    /// wall handling is the stepping pipeline's job.
    pub fn advance(&mut self, dt: f32) {
        if self.speed > 0.0 {
            self.location = self.location.advanced(self.orientation, self.speed * dt);
        }
    }

    /// Sole collision authority: circles overlap when their center distance
    /// is below the radius sum.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.overlaps_circle(other.location, other.radius)
    }

    /// Overlap test against a bare circle.
    #[must_use]
    pub fn overlaps_circle(&self, center: Location, radius: f32) -> bool {
        self.location.distance_to(center) < self.radius + radius
    }

    /// Turn in place to face another object.
    pub fn point_to(&mut self, other: &Self) {
        self.set_orientation(self.location.bearing_to(other.location));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, PI};

    fn obstacle(x: f32, y: f32, radius: f32) -> PhysicalObject {
        PhysicalObject::new(
            ObjectKind::Obstacle,
            Location::new(x, y),
            0.0,
            radius,
            Color::default(),
        )
        .expect("valid object")
    }

    #[test]
    fn radius_must_stay_positive() {
        assert_eq!(
            PhysicalObject::new(
                ObjectKind::Target,
                Location::default(),
                0.0,
                0.0,
                Color::default()
            )
            .expect_err("zero radius"),
            ObjectError::InvalidRadius
        );
        let mut object = obstacle(0.0, 0.0, 5.0);
        assert_eq!(object.set_radius(-1.0), Err(ObjectError::InvalidRadius));
        assert_eq!(object.radius(), 5.0);
        object.set_radius(2.5).expect("positive radius");
        assert_eq!(object.radius(), 2.5);
    }

    #[test]
    fn overlap_is_strict_on_the_radius_sum() {
        let a = obstacle(0.0, 0.0, 5.0);
        let touching = obstacle(10.0, 0.0, 5.0);
        let apart = obstacle(10.1, 0.0, 5.0);
        let inside = obstacle(9.9, 0.0, 5.0);
        assert!(!a.overlaps(&touching));
        assert!(!a.overlaps(&apart));
        assert!(a.overlaps(&inside));
    }

    #[test]
    fn advance_moves_by_speed_per_tick() {
        let mut object = obstacle(10.0, 10.0, 2.0);
        object.set_speed(30.0).expect("speed");
        object.set_orientation(FRAC_PI_2);
        object.advance(0.1);
        assert!((object.location().x - 10.0).abs() < 1e-4);
        assert!((object.location().y - 13.0).abs() < 1e-4);
    }

    #[test]
    fn orientation_wraps_into_signed_range() {
        let mut object = obstacle(0.0, 0.0, 1.0);
        object.set_orientation(3.0 * PI);
        assert!((object.orientation() - PI).abs() < 1e-5);
        object.rotate(PI);
        assert!(object.orientation().abs() < 1e-5);
    }

    #[test]
    fn point_to_faces_the_other_object() {
        let mut object = obstacle(0.0, 0.0, 1.0);
        let east = obstacle(10.0, 0.0, 1.0);
        object.point_to(&east);
        assert!(object.orientation().abs() < 1e-6);
    }

    #[test]
    fn kind_classification() {
        assert!(ObjectKind::Robot.is_solid());
        assert!(ObjectKind::Obstacle.is_solid());
        assert!(!ObjectKind::Target.is_solid());
        assert!(!ObjectKind::MovingLight.is_solid());
        assert_eq!(ObjectKind::MovingLight.category(), SenseCategory::Light);
        assert_eq!(ObjectKind::StationaryLight.category(), SenseCategory::Light);
    }
}
