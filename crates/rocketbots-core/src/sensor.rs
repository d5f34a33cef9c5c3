//! Angle-limited proximity sensing over a registry snapshot.

use crate::arena::ObjectSnapshot;
use crate::config::SimConfig;
use crate::geometry::{wrap_signed_angle, Bounds, Location};
use crate::object::{PhysicalObject, SenseCategory};
use crate::ObjectId;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// A detector mounted on a robot.
///
/// The sensor owns no world state: its absolute pose is derived from the
/// parent's pose on every [`sense`](Sensor::sense) call, and a reading never
/// outlives the tick that produced it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Sensor {
    /// Mount point relative to the parent center, in the parent's frame.
    pub offset: Location,
    /// Mount heading relative to the parent heading.
    pub mount_angle: f32,
    /// Cone half-angle; candidates at or beyond it read zero.
    pub half_angle: f32,
    /// Category of object this sensor reacts to.
    pub category: SenseCategory,
}

impl Sensor {
    /// Construct a sensor.
    #[must_use]
    pub const fn new(
        offset: Location,
        mount_angle: f32,
        half_angle: f32,
        category: SenseCategory,
    ) -> Self {
        Self {
            offset,
            mount_angle,
            half_angle,
            category,
        }
    }

    /// Absolute position and heading derived from the parent pose.
    #[must_use]
    pub fn world_pose(&self, parent: &PhysicalObject) -> (Location, f32) {
        let rotated = self.offset.rotated(parent.orientation());
        let origin = Location::new(
            parent.location().x + rotated.x,
            parent.location().y + rotated.y,
        );
        let heading = wrap_signed_angle(parent.orientation() + self.mount_angle);
        (origin, heading)
    }

    /// Read the nearest matching object strictly inside the cone.
    ///
    /// The reading is `focus(bearing) / (1 + falloff * distance^2)` scaled by
    /// the configured gain and clamped to `[0, 1]`: zero when nothing is in
    /// view, monotonically falling with distance. The parent is always
    /// excluded; `restrict` narrows the match to one specific object (used by
    /// target channels, which only see their own target). Obstacle sensors
    /// additionally read the arena walls as obstacles.
    #[must_use]
    pub fn sense(
        &self,
        parent: &PhysicalObject,
        parent_id: ObjectId,
        restrict: Option<ObjectId>,
        snapshot: &[ObjectSnapshot],
        bounds: Bounds,
        config: &SimConfig,
    ) -> f32 {
        let (origin, heading) = self.world_pose(parent);

        let nearest = snapshot
            .iter()
            .filter(|object| object.id != parent_id)
            .filter(|object| object.kind.category() == self.category)
            .filter(|object| restrict.is_none_or(|only| object.id == only))
            .filter_map(|object| {
                let bearing = wrap_signed_angle(origin.bearing_to(object.location) - heading);
                (bearing.abs() < self.half_angle)
                    .then(|| (origin.distance_to(object.location), bearing))
            })
            .min_by_key(|(distance, _)| OrderedFloat(*distance));

        let mut strength = nearest.map_or(0.0, |(distance, bearing)| {
            Self::focus(bearing, self.half_angle) * Self::falloff(distance, config.sensor_falloff)
        });

        if self.category == SenseCategory::Obstacle
            && config.wall_gain > 0.0
            && let Some(distance) = bounds.wall_distance(origin, heading)
        {
            strength += config.wall_gain * Self::falloff(distance, config.sensor_falloff);
        }

        (strength * config.sensor_gain).clamp(0.0, 1.0)
    }

    /// Gaussian attenuation by bearing: 1 dead ahead, falling toward the cone
    /// edge.
    #[inline]
    fn focus(bearing: f32, half_angle: f32) -> f32 {
        (-3.0 * (bearing / half_angle).powi(2)).exp()
    }

    /// Inverse-square attenuation by distance.
    #[inline]
    fn falloff(distance: f32, coefficient: f32) -> f32 {
        1.0 / (1.0 + coefficient * distance * distance)
    }
}
