//! Core types for the rocketbots arena simulation.
//!
//! The crate is organised leaves-first: geometry and color value types, the
//! physical object model, the sensing model, robot control policies, the
//! lock-owning [`Arena`] registry, and the [`World`] stepping pipeline on
//! top. Everything rendering- or UI-shaped lives outside this crate; the
//! control surface in `rocketbots-app` is the only intended caller of the
//! mutating operations.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

pub mod arena;
pub mod color;
pub mod config;
pub mod geometry;
pub mod object;
pub mod robot;
pub mod sensor;
pub mod world;
pub mod worldfile;

pub use arena::{Arena, ArenaObject, ObjectSnapshot, PlacementError, RobotView};
pub use color::{Color, NamedColor};
pub use config::{ConfigError, SimConfig};
pub use geometry::{Bounds, Location};
pub use object::{ObjectError, ObjectKind, PhysicalObject, SenseCategory};
pub use robot::{
    ComplexParams, ControlPolicy, MotorCommand, NeuralPolicy, PairReading, PolicyError,
    RobotState, SensorChannel, SensorReadings, SensorRig, WheelSpeeds, NETWORK_INPUTS,
    NETWORK_OUTPUTS,
};
pub use sensor::Sensor;
pub use world::{Capture, InstallReport, RobotHandles, TickEvents, World};
pub use worldfile::{LoadedWorld, ObjectRecord, PolicyRecord, RobotRecord, WorldFileError};

new_key_type! {
    /// Stable handle for arena objects backed by a generational slot map.
    pub struct ObjectId;
}

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}
