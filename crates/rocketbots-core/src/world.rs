//! World state and the per-tick stepping pipeline.
//!
//! One tick runs in three phases: a locked snapshot of the registry, a
//! lock-free decide pass over every robot (parallelized with rayon), and a
//! locked apply pass that moves objects, resolves collisions, and captures
//! reached targets. The registry lock is never held across the whole tick, so
//! control commands from the embedding thread interleave freely.

use crate::arena::{Arena, ArenaInner, ArenaObject, ObjectSnapshot, PlacementError};
use crate::color::Color;
use crate::config::{ConfigError, SimConfig};
use crate::geometry::Bounds;
use crate::object::{ObjectKind, PhysicalObject};
use crate::robot::{ControlPolicy, MotorCommand, RobotState};
use crate::{ObjectId, Tick};
use rand::rngs::SmallRng;
use rand::Rng;
use rayon::prelude::*;
use std::f32::consts::{PI, TAU};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// A robot reaching its bound target removes both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capture {
    pub robot: ObjectId,
    pub target: ObjectId,
}

/// Events emitted after processing a world tick.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TickEvents {
    pub tick: Tick,
    pub captures: Vec<Capture>,
}

/// Handles returned when a robot (and optionally its target) is spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RobotHandles {
    pub robot: ObjectId,
    pub target: Option<ObjectId>,
}

/// Per-category handles reported after a world file install, so the control
/// layer can rebuild its removal bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    pub robots: Vec<(ObjectId, Option<ObjectId>)>,
    /// Targets not bound to any robot.
    pub targets: Vec<ObjectId>,
    pub obstacles: Vec<ObjectId>,
    pub lights: Vec<ObjectId>,
}

struct Clock {
    tick: Tick,
    rng: SmallRng,
}

/// The simulation world: registry, configuration, clock, and RNG.
pub struct World {
    arena: Arena,
    config: Mutex<SimConfig>,
    clock: Mutex<Clock>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("tick", &self.tick())
            .field("object_count", &self.arena.len())
            .finish()
    }
}

impl World {
    /// Build a world from a validated configuration.
    pub fn new(config: SimConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rng = config.seeded_rng();
        let arena = Arena::new(config.bounds());
        Ok(Self {
            arena,
            config: Mutex::new(config),
            clock: Mutex::new(Clock {
                tick: Tick::zero(),
                rng,
            }),
        })
    }

    fn lock_config(&self) -> MutexGuard<'_, SimConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_clock(&self) -> MutexGuard<'_, Clock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> SimConfig {
        self.lock_config().clone()
    }

    /// Swap tunable parameters without touching object identities. The arena
    /// dimensions are fixed at boot and cannot change here.
    pub fn refresh_configuration(&self, config: SimConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let mut current = self.lock_config();
        if config.arena_width != current.arena_width
            || config.arena_height != current.arena_height
        {
            return Err(ConfigError::Invalid(
                "arena dimensions cannot change at runtime",
            ));
        }
        *current = config;
        debug!("configuration refreshed");
        Ok(())
    }

    /// The object registry.
    #[must_use]
    pub const fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Current simulation tick.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.lock_clock().tick
    }

    /// Wall-clock budget of one tick.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        self.lock_config().tick_interval()
    }

    /// Read-only drawing snapshot, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ObjectSnapshot> {
        self.arena.snapshot()
    }

    /// Drop every object and rewind the clock.
    pub fn reset(&self) {
        self.arena.clear();
        self.lock_clock().tick = Tick::zero();
    }

    /// Swap in a freshly loaded object set and rewind the clock. The two
    /// locks are taken one after the other, never together.
    pub(crate) fn install_population(&self, inner: ArenaInner) {
        self.arena.install(inner);
        self.lock_clock().tick = Tick::zero();
    }

    /// Execute one tick: snapshot, decide, apply.
    pub fn step(&self) -> TickEvents {
        let config = self.config();
        let bounds = self.arena.bounds();
        let (snapshot, robots) = self.arena.observe();

        let decisions: Vec<(ObjectId, MotorCommand)> = robots
            .par_iter()
            .map(|view| {
                let command = view
                    .state
                    .decide(&view.body, view.id, &snapshot, bounds, &config);
                (view.id, command)
            })
            .collect();

        let mut clock = self.lock_clock();
        let captures = self.arena.with_inner(|inner| {
            apply_decisions(inner, bounds, &config, &decisions, &mut clock.rng)
        });
        clock.tick = clock.tick.next();
        let events = TickEvents {
            tick: clock.tick,
            captures,
        };
        drop(clock);
        if !events.captures.is_empty() {
            debug!(
                tick = events.tick.0,
                captures = events.captures.len(),
                "robots reached their targets"
            );
        }
        events
    }

    /// Place a new obstacle with a randomized radius.
    pub fn add_obstacle(&self) -> Result<ObjectId, PlacementError> {
        let config = self.config();
        let mut clock = self.lock_clock();
        let radius = clock
            .rng
            .random_range(config.obstacle_radius_min..=config.obstacle_radius_max);
        let location =
            self.arena
                .find_open_location(radius, config.placement_retries, &mut clock.rng)?;
        let heading = clock.rng.random_range(-PI..PI);
        let body =
            PhysicalObject::new(ObjectKind::Obstacle, location, heading, radius, config.obstacle_color)
                .expect("config validation keeps radii positive");
        let id = self.arena.add(ArenaObject::passive(body))?;
        debug!(?id, "added obstacle");
        Ok(id)
    }

    /// Place a new light source; moving lights wander at the configured speed.
    pub fn add_light(&self, moving: bool) -> Result<ObjectId, PlacementError> {
        let config = self.config();
        let mut clock = self.lock_clock();
        let location = self.arena.find_open_location(
            config.light_radius,
            config.placement_retries,
            &mut clock.rng,
        )?;
        let kind = if moving {
            ObjectKind::MovingLight
        } else {
            ObjectKind::StationaryLight
        };
        let heading = clock.rng.random_range(-PI..PI);
        let mut body =
            PhysicalObject::new(kind, location, heading, config.light_radius, config.light_color)
                .expect("config validation keeps radii positive");
        if moving {
            body.set_speed(config.light_speed)
                .expect("config validation keeps speeds non-negative");
        }
        let id = self.arena.add(ArenaObject::passive(body))?;
        debug!(?id, moving, "added light source");
        Ok(id)
    }

    /// Place a standalone target. With no explicit color the palette picks
    /// the next free one.
    pub fn add_target(&self, color: Option<Color>) -> Result<ObjectId, PlacementError> {
        let config = self.config();
        let color = color.unwrap_or_else(|| self.next_pair_color(&config));
        let mut clock = self.lock_clock();
        let location = self.arena.find_open_location(
            config.target_radius,
            config.placement_retries,
            &mut clock.rng,
        )?;
        let heading = clock.rng.random_range(-PI..PI);
        let mut body =
            PhysicalObject::new(ObjectKind::Target, location, heading, config.target_radius, color)
                .expect("config validation keeps radii positive");
        body.set_speed(config.target_speed)
            .expect("config validation keeps speeds non-negative");
        let id = self.arena.add(ArenaObject::passive(body))?;
        debug!(?id, "added target");
        Ok(id)
    }

    /// Place a robot, optionally paired with a fresh target it will seek.
    /// The pair shares a palette color not already on screen.
    pub fn add_robot(
        &self,
        policy: ControlPolicy,
        with_target: bool,
    ) -> Result<RobotHandles, PlacementError> {
        let config = self.config();
        let pair_color = self.next_pair_color(&config);
        let target = if with_target {
            Some(self.add_target(Some(pair_color))?)
        } else {
            None
        };

        let mut clock = self.lock_clock();
        let placed = self
            .arena
            .find_open_location(config.robot_radius, config.placement_retries, &mut clock.rng)
            .and_then(|location| {
                let heading = clock.rng.random_range(-PI..PI);
                let mut body = PhysicalObject::new(
                    ObjectKind::Robot,
                    location,
                    heading,
                    config.robot_radius,
                    config.robot_color,
                )
                .expect("config validation keeps radii positive");
                body.set_speed(config.robot_default_speed)
                    .expect("config validation keeps speeds non-negative");
                let state = RobotState::new(pair_color, target, policy.clone(), &config);
                self.arena.add(ArenaObject::robot(body, state))
            });
        drop(clock);

        match placed {
            Ok(robot) => {
                debug!(?robot, ?target, policy = policy.kind_label(), "added robot");
                Ok(RobotHandles { robot, target })
            }
            Err(err) => {
                // Do not leave a half-placed pair behind.
                if let Some(target) = target {
                    self.arena.remove(target);
                }
                warn!(%err, "robot placement failed");
                Err(err)
            }
        }
    }

    /// Seed the configured default population: lights first so they sit under
    /// everything, then robot/target pairs, then obstacles.
    pub fn populate_default(&self) -> Result<(), PlacementError> {
        let config = self.config();
        for _ in 0..config.default_lights {
            self.add_light(true)?;
        }
        for _ in 0..config.default_robots {
            self.add_robot(ControlPolicy::Simple, true)?;
        }
        for _ in 0..config.default_obstacles {
            self.add_obstacle()?;
        }
        Ok(())
    }

    /// First palette color not already similar to a body or line color on
    /// screen; falls back to the last palette entry.
    fn next_pair_color(&self, config: &SimConfig) -> Color {
        let snapshot = self.arena.snapshot();
        let in_use = |candidate: Color| {
            snapshot.iter().any(|object| {
                object.color.is_similar(candidate, config.color_delta)
                    || object
                        .line_color
                        .is_some_and(|line| line.is_similar(candidate, config.color_delta))
            })
        };
        config
            .target_palette
            .iter()
            .map(|&name| Color::from(name))
            .find(|&candidate| !in_use(candidate))
            .unwrap_or_else(|| {
                Color::from(*config.target_palette.last().expect("palette is non-empty"))
            })
    }
}

/// The locked apply pass of one tick.
fn apply_decisions(
    inner: &mut ArenaInner,
    bounds: Bounds,
    config: &SimConfig,
    decisions: &[(ObjectId, MotorCommand)],
    rng: &mut SmallRng,
) -> Vec<Capture> {
    let dt = config.dt();
    let mut captures = Vec::new();

    for &(id, command) in decisions {
        // The embedding thread may have removed the robot mid-tick.
        let Some(object) = inner.get_mut(id) else {
            continue;
        };
        object.body.rotate(command.turn);
        let speed = if command.speed.is_finite() {
            command.speed
        } else {
            warn!(?id, "policy produced a non-finite speed; stopping the robot");
            0.0
        };
        object
            .body
            .set_speed(speed.max(0.0))
            .expect("finite non-negative by construction");

        translate(inner, id, dt, bounds, config, rng);
        if let Some(capture) = try_capture(inner, id) {
            captures.push(capture);
        }
    }

    // Targets and moving lights wander on their own.
    let movers: Vec<ObjectId> = inner
        .order()
        .iter()
        .copied()
        .filter(|&id| {
            inner
                .get(id)
                .is_some_and(|object| object.robot.is_none() && object.body.speed() > 0.0)
        })
        .collect();
    for id in movers {
        translate(inner, id, dt, bounds, config, rng);
    }

    captures
}

/// Move one object along its heading, handling blocked moves: robots turn
/// away and nudge; targets and lights pick a fresh random heading.
fn translate(
    inner: &mut ArenaInner,
    id: ObjectId,
    dt: f32,
    bounds: Bounds,
    config: &SimConfig,
    rng: &mut SmallRng,
) {
    let Some(object) = inner.get(id) else {
        return;
    };
    let body = object.body;
    if body.speed() <= 0.0 {
        return;
    }
    let own_target = object.robot.as_ref().and_then(|state| state.target);
    let is_robot = object.robot.is_some();
    let distance = body.speed() * dt;

    if try_move_to(inner, id, distance, bounds, own_target) {
        return;
    }

    if is_robot {
        // Turn away from the blocker, then try a small nudge on the new
        // heading so robots do not freeze against obstacles.
        if let Some(object) = inner.get_mut(id) {
            object.body.rotate(-config.reorient_angle);
        }
        try_move_to(inner, id, config.reorient_distance, bounds, own_target);
    } else if let Some(object) = inner.get_mut(id) {
        object.body.set_orientation(rng.random_range(0.0..TAU));
    }
}

/// Attempt a straight move of `distance`; returns whether it succeeded.
fn try_move_to(
    inner: &mut ArenaInner,
    id: ObjectId,
    distance: f32,
    bounds: Bounds,
    own_target: Option<ObjectId>,
) -> bool {
    let Some(object) = inner.get(id) else {
        return false;
    };
    let body = object.body;
    let candidate = body.location().advanced(body.orientation(), distance);
    if bounds.touches_wall(candidate, body.radius()) {
        return false;
    }
    if body.kind.is_solid()
        && inner
            .blocking_solid(candidate, body.radius(), id, own_target)
            .is_some()
    {
        return false;
    }
    if let Some(object) = inner.get_mut(id) {
        object.body.set_location(candidate);
    }
    true
}

/// Remove a robot and its target when they overlap.
fn try_capture(inner: &mut ArenaInner, robot_id: ObjectId) -> Option<Capture> {
    let object = inner.get(robot_id)?;
    let target_id = object.robot.as_ref()?.target?;
    let target = inner.get(target_id)?;
    if !object.body.overlaps(&target.body) {
        return None;
    }
    inner.remove(robot_id);
    inner.remove(target_id);
    Some(Capture {
        robot: robot_id,
        target: target_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Location;
    use crate::robot::{ComplexParams, SensorChannel};

    fn quiet_config() -> SimConfig {
        SimConfig {
            rng_seed: Some(42),
            ..SimConfig::default()
        }
    }

    fn place_robot_facing_target(world: &World, policy: ControlPolicy) -> (ObjectId, ObjectId) {
        // Deterministic geometry: robot at the west end facing east, target
        // dead ahead.
        let config = world.config();
        let target_body = PhysicalObject::new(
            ObjectKind::Target,
            Location::new(500.0, 300.0),
            0.0,
            config.target_radius,
            Color::from(crate::color::NamedColor::Green),
        )
        .expect("body");
        let target = world
            .arena()
            .add(ArenaObject::passive(target_body))
            .expect("target");

        let mut robot_body = PhysicalObject::new(
            ObjectKind::Robot,
            Location::new(100.0, 300.0),
            0.0,
            config.robot_radius,
            config.robot_color,
        )
        .expect("body");
        robot_body.set_speed(config.robot_default_speed).expect("speed");
        let state = RobotState::new(
            Color::from(crate::color::NamedColor::Green),
            Some(target),
            policy,
            &config,
        );
        let robot = world
            .arena()
            .add(ArenaObject::robot(robot_body, state))
            .expect("robot");
        (robot, target)
    }

    fn seeker_params() -> ComplexParams {
        ComplexParams {
            target: SensorChannel {
                enabled: true,
                crossed: false,
                scale: 1.0,
            },
            default_speed: 30.0,
            ..ComplexParams::default()
        }
    }

    #[test]
    fn step_advances_the_clock() {
        let world = World::new(quiet_config()).expect("world");
        assert_eq!(world.tick(), Tick(0));
        world.step();
        world.step();
        assert_eq!(world.tick(), Tick(2));
    }

    #[test]
    fn a_complex_seeker_closes_on_its_target_monotonically() {
        let world = World::new(quiet_config()).expect("world");
        let (robot, target) =
            place_robot_facing_target(&world, ControlPolicy::Complex(seeker_params()));

        let mut last_distance = f32::INFINITY;
        let mut captured = false;
        for _ in 0..600 {
            let events = world.step();
            if events.captures.iter().any(|c| c.robot == robot) {
                captured = true;
                break;
            }
            let snapshot = world.snapshot();
            let robot_loc = snapshot.iter().find(|o| o.id == robot).expect("robot").location;
            let target_loc = snapshot.iter().find(|o| o.id == target).expect("target").location;
            let distance = robot_loc.distance_to(target_loc);
            assert!(
                distance < last_distance + 1e-3,
                "distance must not grow while seeking"
            );
            last_distance = distance;
        }
        assert!(captured, "seeker should reach its target");
        assert!(!world.arena().contains(robot));
        assert!(!world.arena().contains(target));
    }

    #[test]
    fn a_simple_robot_drives_straight_and_ignores_targets() {
        let world = World::new(quiet_config()).expect("world");
        // Target beside the path: a simple robot drives straight past.
        let config = world.config();
        let target_body = PhysicalObject::new(
            ObjectKind::Target,
            Location::new(400.0, 450.0),
            0.0,
            config.target_radius,
            Color::from(crate::color::NamedColor::Blue),
        )
        .expect("body");
        let target = world
            .arena()
            .add(ArenaObject::passive(target_body))
            .expect("target");

        let mut robot_body = PhysicalObject::new(
            ObjectKind::Robot,
            Location::new(100.0, 300.0),
            0.0,
            config.robot_radius,
            config.robot_color,
        )
        .expect("body");
        robot_body.set_speed(config.robot_default_speed).expect("speed");
        let state = RobotState::new(
            Color::from(crate::color::NamedColor::Blue),
            Some(target),
            ControlPolicy::Simple,
            &config,
        );
        let robot = world
            .arena()
            .add(ArenaObject::robot(robot_body, state))
            .expect("robot");

        for _ in 0..60 {
            world.step();
        }
        let snapshot = world.snapshot();
        let robot_now = snapshot.iter().find(|o| o.id == robot).expect("robot");
        assert!(
            (robot_now.location.y - 300.0).abs() < 1e-2,
            "a simple robot holds its heading"
        );
        assert!(robot_now.location.x > 100.0, "and keeps moving forward");
        assert!(world.arena().contains(target));
    }

    #[test]
    fn spawn_helpers_respect_the_overlap_invariant() {
        let world = World::new(quiet_config()).expect("world");
        world.populate_default().expect("populate");
        let snapshot = world.snapshot();
        assert!(!snapshot.is_empty());
        for (i, a) in snapshot.iter().enumerate() {
            for b in snapshot.iter().skip(i + 1) {
                let paired = a.target == Some(b.id) || b.target == Some(a.id);
                if !paired {
                    assert!(
                        a.location.distance_to(b.location) >= a.radius + b.radius - 1e-3,
                        "{:?} and {:?} overlap",
                        a.kind,
                        b.kind
                    );
                }
            }
        }
    }

    #[test]
    fn pair_colors_avoid_colors_already_on_screen() {
        let world = World::new(quiet_config()).expect("world");
        let first = world.add_robot(ControlPolicy::Simple, true).expect("first");
        let second = world.add_robot(ControlPolicy::Simple, true).expect("second");
        let snapshot = world.snapshot();
        let line = |handles: RobotHandles| {
            snapshot
                .iter()
                .find(|o| o.id == handles.robot)
                .and_then(|o| o.line_color)
                .expect("line color")
        };
        let config = world.config();
        assert!(
            !line(first).is_similar(line(second), config.color_delta),
            "pairs must take distinct palette colors"
        );
    }

    #[test]
    fn refresh_keeps_dimensions_fixed() {
        let world = World::new(quiet_config()).expect("world");
        let mut config = world.config();
        config.speed_scale = 10.0;
        world.refresh_configuration(config).expect("tunables swap");

        let mut config = world.config();
        config.arena_width += 100.0;
        assert_eq!(
            world.refresh_configuration(config),
            Err(ConfigError::Invalid("arena dimensions cannot change at runtime"))
        );
    }

    #[test]
    fn reset_clears_objects_and_clock() {
        let world = World::new(quiet_config()).expect("world");
        world.populate_default().expect("populate");
        world.step();
        world.reset();
        assert!(world.arena().is_empty());
        assert_eq!(world.tick(), Tick(0));
    }

    #[test]
    fn blocked_robots_reorient_instead_of_tunnelling() {
        let world = World::new(quiet_config()).expect("world");
        let config = world.config();
        // A wall of obstacle directly ahead of the robot.
        let obstacle_body = PhysicalObject::new(
            ObjectKind::Obstacle,
            Location::new(160.0, 300.0),
            0.0,
            30.0,
            config.obstacle_color,
        )
        .expect("body");
        let obstacle = world
            .arena()
            .add(ArenaObject::passive(obstacle_body))
            .expect("obstacle");

        let mut robot_body = PhysicalObject::new(
            ObjectKind::Robot,
            Location::new(108.0, 300.0),
            0.0,
            config.robot_radius,
            config.robot_color,
        )
        .expect("body");
        robot_body.set_speed(config.robot_default_speed).expect("speed");
        let state = RobotState::new(
            config.robot_color,
            None,
            ControlPolicy::Simple,
            &config,
        );
        let robot = world
            .arena()
            .add(ArenaObject::robot(robot_body, state))
            .expect("robot");

        for _ in 0..10 {
            world.step();
            let snapshot = world.snapshot();
            let robot_now = snapshot.iter().find(|o| o.id == robot).expect("robot");
            let obstacle_now = snapshot.iter().find(|o| o.id == obstacle).expect("obstacle");
            assert!(
                robot_now.location.distance_to(obstacle_now.location)
                    >= robot_now.radius + obstacle_now.radius - 1e-3,
                "the robot must not end a tick inside the obstacle"
            );
        }
    }
}
