//! Control surface for the rocketbots simulation.
//!
//! An embedding application (UI, trainer, headless harness) talks to the
//! core exclusively through [`Simulation`]: the run-state machine, the
//! dedicated stepping thread, add/remove commands per object category,
//! world-file open/save, and a read-only drawing snapshot.

pub mod control;
mod stepper;

pub use control::{ControlError, RunState, Simulation};
