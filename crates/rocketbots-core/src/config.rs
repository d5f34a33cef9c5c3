//! Static configuration for a rocketbots world.

use crate::color::{Color, NamedColor};
use crate::geometry::{Bounds, Location};
use rand::{rngs::SmallRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while validating configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Tunable parameters for the arena, the robots, and their sensors.
///
/// Dimensions are fixed for the lifetime of a world; everything else may be
/// swapped at runtime through `refresh_configuration`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimConfig {
    /// Arena width in arena units.
    pub arena_width: f32,
    /// Arena height in arena units.
    pub arena_height: f32,
    /// Stepping rate of the simulation thread.
    pub ticks_per_second: u32,
    /// Optional RNG seed for reproducible worlds.
    pub rng_seed: Option<u64>,
    /// Attempt budget for randomized placement before giving up.
    pub placement_retries: u32,
    /// Radius assigned to new robots.
    pub robot_radius: f32,
    /// Radius assigned to new targets.
    pub target_radius: f32,
    /// Radius assigned to new light sources.
    pub light_radius: f32,
    /// Smallest radius drawn for a new obstacle.
    pub obstacle_radius_min: f32,
    /// Largest radius drawn for a new obstacle.
    pub obstacle_radius_max: f32,
    /// Wheel speed fed to policies as the cruising baseline.
    pub robot_default_speed: f32,
    /// Lower clamp for wheel speeds.
    pub robot_min_speed: f32,
    /// Upper clamp for wheel speeds.
    pub robot_max_speed: f32,
    /// Speed assigned to targets (they wander).
    pub target_speed: f32,
    /// Speed assigned to moving light sources.
    pub light_speed: f32,
    /// Factor converting a sensor reading into wheel speed.
    pub speed_scale: f32,
    /// Extra factor applied to network policy outputs.
    pub neural_speed_scale: f32,
    /// Factor converting wheel differential into turn radians.
    pub rotation_scale: f32,
    /// Turn clamp per tick, radians.
    pub max_turn: f32,
    /// Half-angle of every sensor cone, radians.
    pub sensor_half_angle: f32,
    /// Mount point of the left sensor in the robot frame (x forward, y left);
    /// the right sensor mirrors the lateral component.
    pub sensor_offset: Location,
    /// Mount heading of the left sensor relative to the robot heading; the
    /// right sensor mirrors the sign.
    pub sensor_mount_angle: f32,
    /// Distance attenuation coefficient for sensor readings.
    pub sensor_falloff: f32,
    /// Overall gain applied to sensor readings before clamping.
    pub sensor_gain: f32,
    /// Gain for the wall term fed into obstacle sensors.
    pub wall_gain: f32,
    /// Gain applied to target readings before they enter a network policy.
    pub target_sensor_gain: f32,
    /// Rotation applied when a move is blocked, radians.
    pub reorient_angle: f32,
    /// Nudge distance attempted after a blocked move reorients.
    pub reorient_distance: f32,
    /// Robots (with targets) placed by the default population.
    pub default_robots: u32,
    /// Obstacles placed by the default population.
    pub default_obstacles: u32,
    /// Moving lights placed by the default population.
    pub default_lights: u32,
    /// Palette cycled when picking a fresh robot/target pair color.
    pub target_palette: Vec<NamedColor>,
    /// Channel tolerance when deciding a palette color is already in use.
    pub color_delta: f32,
    /// Body color for new robots.
    pub robot_color: Color,
    /// Body color for new obstacles.
    pub obstacle_color: Color,
    /// Body color for new light sources.
    pub light_color: Color,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            arena_width: 800.0,
            arena_height: 600.0,
            ticks_per_second: 30,
            rng_seed: None,
            placement_retries: 100,
            robot_radius: 20.0,
            target_radius: 15.0,
            light_radius: 25.0,
            obstacle_radius_min: 10.0,
            obstacle_radius_max: 50.0,
            robot_default_speed: 60.0,
            robot_min_speed: 0.0,
            robot_max_speed: 120.0,
            target_speed: 30.0,
            light_speed: 45.0,
            speed_scale: 90.0,
            neural_speed_scale: 1.5,
            rotation_scale: 0.01,
            max_turn: 0.3,
            sensor_half_angle: PI / 3.0,
            sensor_offset: Location::new(8.0, 5.0),
            sensor_mount_angle: PI / 4.0,
            sensor_falloff: 0.0005,
            sensor_gain: 1.0,
            wall_gain: 0.25,
            target_sensor_gain: 4.0,
            reorient_angle: 0.7,
            reorient_distance: 4.0,
            default_robots: 4,
            default_obstacles: 6,
            default_lights: 2,
            target_palette: vec![
                NamedColor::Red,
                NamedColor::Orange,
                NamedColor::Yellow,
                NamedColor::Green,
                NamedColor::Blue,
                NamedColor::Violet,
                NamedColor::White,
            ],
            color_delta: 0.1,
            robot_color: Color::new(0.8, 0.8, 0.8),
            obstacle_color: Color::new(0.5, 0.35, 0.2),
            light_color: Color::new(1.0, 0.95, 0.6),
        }
    }
}

impl SimConfig {
    /// Validate every tunable; returns the first offending parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.arena_width.is_finite() && self.arena_width > 0.0)
            || !(self.arena_height.is_finite() && self.arena_height > 0.0)
        {
            return Err(ConfigError::Invalid("arena dimensions must be positive"));
        }
        if self.ticks_per_second == 0 {
            return Err(ConfigError::Invalid("ticks_per_second must be non-zero"));
        }
        if self.placement_retries == 0 {
            return Err(ConfigError::Invalid("placement_retries must be non-zero"));
        }
        let radii = [
            self.robot_radius,
            self.target_radius,
            self.light_radius,
            self.obstacle_radius_min,
            self.obstacle_radius_max,
        ];
        if radii.iter().any(|r| !(r.is_finite() && *r > 0.0)) {
            return Err(ConfigError::Invalid("object radii must be positive"));
        }
        if self.obstacle_radius_min > self.obstacle_radius_max {
            return Err(ConfigError::Invalid(
                "obstacle_radius_min cannot exceed obstacle_radius_max",
            ));
        }
        let largest = self
            .obstacle_radius_max
            .max(self.robot_radius)
            .max(self.light_radius);
        if 2.0 * largest >= self.arena_width.min(self.arena_height) {
            return Err(ConfigError::Invalid(
                "the largest object must fit between the arena walls",
            ));
        }
        if self.robot_min_speed > self.robot_max_speed {
            return Err(ConfigError::Invalid(
                "robot_min_speed cannot exceed robot_max_speed",
            ));
        }
        if self.robot_min_speed < 0.0
            || self.target_speed < 0.0
            || self.light_speed < 0.0
            || self.robot_default_speed < 0.0
        {
            return Err(ConfigError::Invalid("speeds must be non-negative"));
        }
        if !(self.sensor_half_angle > 0.0 && self.sensor_half_angle <= PI) {
            return Err(ConfigError::Invalid(
                "sensor_half_angle must lie in (0, pi]",
            ));
        }
        if self.sensor_falloff <= 0.0 || self.sensor_gain <= 0.0 {
            return Err(ConfigError::Invalid(
                "sensor_falloff and sensor_gain must be positive",
            ));
        }
        if self.wall_gain < 0.0 || self.target_sensor_gain < 0.0 {
            return Err(ConfigError::Invalid("sensor gains must be non-negative"));
        }
        if self.rotation_scale < 0.0 || self.max_turn <= 0.0 {
            return Err(ConfigError::Invalid(
                "rotation_scale must be non-negative and max_turn positive",
            ));
        }
        if self.reorient_distance < 0.0 {
            return Err(ConfigError::Invalid(
                "reorient_distance must be non-negative",
            ));
        }
        if self.target_palette.is_empty() {
            return Err(ConfigError::Invalid("target_palette cannot be empty"));
        }
        if !(self.color_delta > 0.0 && self.color_delta < 1.0) {
            return Err(ConfigError::Invalid("color_delta must lie in (0, 1)"));
        }
        Ok(())
    }

    /// Arena extents derived from the dimensions.
    #[must_use]
    pub const fn bounds(&self) -> Bounds {
        Bounds::new(self.arena_width, self.arena_height)
    }

    /// Seconds simulated by one tick.
    #[must_use]
    pub fn dt(&self) -> f32 {
        1.0 / self.ticks_per_second as f32
    }

    /// Wall-clock budget of one tick for the stepping thread.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.ticks_per_second))
    }

    /// Returns the configured RNG, generating a seed from entropy if absent.
    #[must_use]
    pub fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configuration_is_valid() {
        SimConfig::default().validate().expect("default config");
    }

    #[test]
    fn bad_values_are_named() {
        let mut config = SimConfig::default();
        config.ticks_per_second = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Invalid("ticks_per_second must be non-zero"))
        );

        let mut config = SimConfig::default();
        config.obstacle_radius_min = 60.0;
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.arena_width = 30.0;
        assert!(config.validate().is_err(), "objects no longer fit");
    }

    #[test]
    fn dt_matches_the_tick_rate() {
        let mut config = SimConfig::default();
        config.ticks_per_second = 50;
        assert!((config.dt() - 0.02).abs() < 1e-6);
        assert_eq!(config.tick_interval(), Duration::from_millis(20));
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        use rand::Rng;
        let mut config = SimConfig::default();
        config.rng_seed = Some(99);
        let mut a = config.seeded_rng();
        let mut b = config.seeded_rng();
        assert_eq!(a.random::<u64>(), b.random::<u64>());
    }
}
