//! The `Simulation` controller: run-state machine, command set, and the
//! bookkeeping that backs per-category removal.
//!
//! Every command is synchronous and individually atomic against the stepping
//! thread through the arena's own lock; nothing here panics across the
//! control boundary.

use crate::stepper::{self, Gate};
use rocketbots_brain::{FormatError, NeuralNetwork};
use rocketbots_core::worldfile::{self, WorldFileError};
use rocketbots_core::{
    ComplexParams, ConfigError, ControlPolicy, InstallReport, NeuralPolicy, ObjectId,
    ObjectSnapshot, PlacementError, PolicyError, RobotHandles, SimConfig, Tick, World,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Where the stepping loop currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Paused,
}

/// Errors returned across the control boundary.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: RunState,
    },
    #[error(transparent)]
    Placement(#[from] PlacementError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    WorldFile(#[from] WorldFileError),
    #[error("network file {path}: {source}")]
    Network {
        path: PathBuf,
        #[source]
        source: FormatError,
    },
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("no {category} left to remove")]
    NothingToRemove { category: &'static str },
    #[error("configuration snapshot failed: {0}")]
    Serialization(String),
}

/// Last-in-first-out removal bookkeeping per category, mirroring how the
/// add/remove buttons of an embedding UI behave. Entries may be stale when a
/// robot captured its target since; removal skips those.
#[derive(Debug, Default)]
struct RemovalStacks {
    robots: Vec<(ObjectId, Option<ObjectId>)>,
    targets: Vec<ObjectId>,
    obstacles: Vec<ObjectId>,
    lights: Vec<ObjectId>,
}

impl RemovalStacks {
    fn clear(&mut self) {
        self.robots.clear();
        self.targets.clear();
        self.obstacles.clear();
        self.lights.clear();
    }

    fn install(&mut self, report: InstallReport) {
        self.robots = report.robots;
        self.targets = report.targets;
        self.obstacles = report.obstacles;
        self.lights = report.lights;
    }
}

/// The simulation controller handed to an embedding application.
///
/// Owns the world, the stepping thread, and the run-state gate. Commands may
/// be issued from any thread, in any run state, at any time; the stepping
/// loop and the command surface only ever meet inside the arena's lock.
pub struct Simulation {
    world: Arc<World>,
    gate: Arc<Gate>,
    stacks: Mutex<RemovalStacks>,
    last_opened: Mutex<Option<PathBuf>>,
    stepper: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("state", &self.run_state())
            .field("tick", &self.tick())
            .finish()
    }
}

impl Simulation {
    /// Boot a world from a validated configuration, seed the default
    /// population, and spawn the (initially idle) stepping thread.
    pub fn new(config: SimConfig) -> Result<Self, ControlError> {
        let world = Arc::new(World::new(config)?);
        let gate = Arc::new(Gate::new());
        let stepper = Some(stepper::spawn(Arc::clone(&world), Arc::clone(&gate)));
        let simulation = Self {
            world,
            gate,
            stacks: Mutex::new(RemovalStacks::default()),
            last_opened: Mutex::new(None),
            stepper,
        };
        simulation.populate_default()?;
        Ok(simulation)
    }

    fn lock_stacks(&self) -> MutexGuard<'_, RemovalStacks> {
        self.stacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_last_opened(&self) -> MutexGuard<'_, Option<PathBuf>> {
        self.last_opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed the configured default population through the tracked add
    /// commands: lights first so they draw under everything, then
    /// robot/target pairs, then obstacles.
    fn populate_default(&self) -> Result<(), ControlError> {
        let config = self.world.config();
        for _ in 0..config.default_lights {
            self.add_moving_light()?;
        }
        for _ in 0..config.default_robots {
            self.add_simple_robot(true)?;
        }
        for _ in 0..config.default_obstacles {
            self.add_obstacle()?;
        }
        Ok(())
    }

    // --- run-state machine ---

    #[must_use]
    pub fn run_state(&self) -> RunState {
        self.gate.run_state()
    }

    /// Stopped -> Running. Re-validates the configuration before the loop
    /// begins.
    pub fn start(&self) -> Result<(), ControlError> {
        self.world.config().validate()?;
        self.gate
            .transition(RunState::Stopped, RunState::Running)
            .map_err(|state| ControlError::InvalidTransition {
                action: "start",
                state,
            })?;
        info!("simulation started");
        Ok(())
    }

    /// Running -> Paused. An in-flight tick always completes; only the next
    /// tick is held back.
    pub fn pause(&self) -> Result<(), ControlError> {
        self.gate
            .transition(RunState::Running, RunState::Paused)
            .map_err(|state| ControlError::InvalidTransition {
                action: "pause",
                state,
            })?;
        info!("simulation paused");
        Ok(())
    }

    /// Paused -> Running.
    pub fn resume(&self) -> Result<(), ControlError> {
        self.gate
            .transition(RunState::Paused, RunState::Running)
            .map_err(|state| ControlError::InvalidTransition {
                action: "resume",
                state,
            })?;
        info!("simulation resumed");
        Ok(())
    }

    /// Any state -> Stopped: clear the world, then re-populate from the last
    /// opened file or, when none was opened, from the default population.
    /// Waits out any in-flight tick first, so nothing lands on the fresh
    /// world.
    pub fn reset(&self) -> Result<(), ControlError> {
        self.gate.force_and_quiesce(RunState::Stopped);
        self.world.reset();
        self.lock_stacks().clear();
        let last = self.lock_last_opened().clone();
        match last {
            Some(path) => {
                let report = worldfile::open(&self.world, &path)?;
                self.lock_stacks().install(report);
            }
            None => self.populate_default()?,
        }
        info!("simulation reset");
        Ok(())
    }

    // --- add commands (valid in any state) ---

    /// Add a straight-driving baseline robot, optionally paired with a fresh
    /// target.
    pub fn add_simple_robot(&self, with_target: bool) -> Result<RobotHandles, ControlError> {
        self.add_robot(ControlPolicy::Simple, with_target)
    }

    /// Add a reflex-wired robot with the given channel weights.
    pub fn add_complex_robot(
        &self,
        params: ComplexParams,
        with_target: bool,
    ) -> Result<RobotHandles, ControlError> {
        self.add_robot(ControlPolicy::Complex(params), with_target)
    }

    /// Add a network-driven robot, loading its network from a description
    /// file.
    pub fn add_neural_robot(
        &self,
        network_file: impl AsRef<Path>,
        with_target: bool,
    ) -> Result<RobotHandles, ControlError> {
        let path = network_file.as_ref();
        let network = NeuralNetwork::load(path).map_err(|err| ControlError::Network {
            path: path.to_path_buf(),
            source: err,
        })?;
        let policy = ControlPolicy::Neural(NeuralPolicy::new(path, network)?);
        self.add_robot(policy, with_target)
    }

    /// Add a robot with an explicit policy.
    pub fn add_robot(
        &self,
        policy: ControlPolicy,
        with_target: bool,
    ) -> Result<RobotHandles, ControlError> {
        let handles = self.world.add_robot(policy, with_target)?;
        self.lock_stacks()
            .robots
            .push((handles.robot, handles.target));
        Ok(handles)
    }

    /// Add a free-roaming target not bound to any robot.
    pub fn add_target(&self) -> Result<ObjectId, ControlError> {
        let id = self.world.add_target(None)?;
        self.lock_stacks().targets.push(id);
        Ok(id)
    }

    /// Add an obstacle with a randomized radius.
    pub fn add_obstacle(&self) -> Result<ObjectId, ControlError> {
        let id = self.world.add_obstacle()?;
        self.lock_stacks().obstacles.push(id);
        Ok(id)
    }

    pub fn add_stationary_light(&self) -> Result<ObjectId, ControlError> {
        let id = self.world.add_light(false)?;
        self.lock_stacks().lights.push(id);
        Ok(id)
    }

    pub fn add_moving_light(&self) -> Result<ObjectId, ControlError> {
        let id = self.world.add_light(true)?;
        self.lock_stacks().lights.push(id);
        Ok(id)
    }

    // --- remove commands (valid in any state, newest first) ---

    /// Remove the most recently added robot still alive, along with its
    /// paired target.
    pub fn remove_robot(&self) -> Result<ObjectId, ControlError> {
        let mut stacks = self.lock_stacks();
        while let Some((robot, target)) = stacks.robots.pop() {
            let removed = self.world.arena().remove(robot).is_some();
            if let Some(target) = target {
                self.world.arena().remove(target);
            }
            if removed {
                debug!(?robot, "removed robot");
                return Ok(robot);
            }
            // Captured since it was added; try the next one down.
        }
        Err(ControlError::NothingToRemove { category: "robots" })
    }

    /// Remove the most recently added free-roaming target still alive.
    pub fn remove_target(&self) -> Result<ObjectId, ControlError> {
        Self::pop_live(&self.world, &mut self.lock_stacks().targets, "targets")
    }

    pub fn remove_obstacle(&self) -> Result<ObjectId, ControlError> {
        Self::pop_live(&self.world, &mut self.lock_stacks().obstacles, "obstacles")
    }

    pub fn remove_light(&self) -> Result<ObjectId, ControlError> {
        Self::pop_live(&self.world, &mut self.lock_stacks().lights, "lights")
    }

    fn pop_live(
        world: &World,
        stack: &mut Vec<ObjectId>,
        category: &'static str,
    ) -> Result<ObjectId, ControlError> {
        while let Some(id) = stack.pop() {
            if world.arena().remove(id).is_some() {
                debug!(?id, category, "removed object");
                return Ok(id);
            }
        }
        Err(ControlError::NothingToRemove { category })
    }

    /// Remove every tracked robot (and paired target); returns how many
    /// robots were still alive.
    pub fn remove_all_robots(&self) -> usize {
        let mut stacks = self.lock_stacks();
        let mut count = 0;
        while let Some((robot, target)) = stacks.robots.pop() {
            if self.world.arena().remove(robot).is_some() {
                count += 1;
            }
            if let Some(target) = target {
                self.world.arena().remove(target);
            }
        }
        count
    }

    pub fn remove_all_targets(&self) -> usize {
        Self::drain_live(&self.world, &mut self.lock_stacks().targets)
    }

    pub fn remove_all_obstacles(&self) -> usize {
        Self::drain_live(&self.world, &mut self.lock_stacks().obstacles)
    }

    pub fn remove_all_lights(&self) -> usize {
        Self::drain_live(&self.world, &mut self.lock_stacks().lights)
    }

    fn drain_live(world: &World, stack: &mut Vec<ObjectId>) -> usize {
        let mut count = 0;
        while let Some(id) = stack.pop() {
            if world.arena().remove(id).is_some() {
                count += 1;
            }
        }
        count
    }

    // --- persistence ---

    /// Replace the world with the contents of `path`. The file is parsed and
    /// validated completely before the old world is discarded; on any error
    /// the previous world and run state are untouched. A successful open
    /// stops the loop and becomes the world `reset` restores.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<(), ControlError> {
        let path = path.as_ref();
        let loaded = match worldfile::load(&self.world, path) {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(path = %path.display(), %err, "world file rejected");
                return Err(err.into());
            }
        };
        // Stop the loop and wait out any in-flight tick before the swap, so
        // stale per-robot decisions never land on the fresh object set.
        self.gate.force_and_quiesce(RunState::Stopped);
        let report = worldfile::install(&self.world, loaded);
        self.lock_stacks().install(report);
        *self.lock_last_opened() = Some(path.to_path_buf());
        Ok(())
    }

    /// Write the current world to `path`; a consistent snapshot even while
    /// running.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ControlError> {
        worldfile::save(&self.world, path.as_ref())?;
        Ok(())
    }

    /// Swap tunable parameters without touching object identities.
    pub fn refresh_configuration(&self, config: SimConfig) -> Result<(), ControlError> {
        self.world.refresh_configuration(config)?;
        Ok(())
    }

    // --- read-only views ---

    /// Drawing snapshot for the rendering layer, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ObjectSnapshot> {
        self.world.snapshot()
    }

    #[must_use]
    pub fn tick(&self) -> Tick {
        self.world.tick()
    }

    #[must_use]
    pub fn config(&self) -> SimConfig {
        self.world.config()
    }

    /// JSON view of the configuration for embedding UIs.
    pub fn config_json(&self) -> Result<Value, ControlError> {
        serde_json::to_value(self.world.config())
            .map_err(|err| ControlError::Serialization(err.to_string()))
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.gate.shutdown();
        if let Some(stepper) = self.stepper.take() {
            let _ = stepper.join();
        }
    }
}
