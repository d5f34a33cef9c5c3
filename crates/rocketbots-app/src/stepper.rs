//! The dedicated stepping thread and its run-state gate.

use crate::control::RunState;
use rocketbots_core::World;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Stopped,
    Running,
    Paused,
    Shutdown,
}

impl From<RunState> for GateState {
    fn from(state: RunState) -> Self {
        match state {
            RunState::Stopped => Self::Stopped,
            RunState::Running => Self::Running,
            RunState::Paused => Self::Paused,
        }
    }
}

#[derive(Debug)]
struct GateInner {
    state: GateState,
    /// Whether the loop is currently inside `World::step`.
    in_tick: bool,
}

/// Mutex+condvar gate the command surface uses to steer the stepping loop.
/// A stopped or paused loop sleeps on the condvar instead of spinning, and
/// the gate knows when a tick is in flight so reset can wait it out.
pub(crate) struct Gate {
    inner: Mutex<GateInner>,
    changed: Condvar,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(GateInner {
                state: GateState::Stopped,
                in_tick: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn as_run_state(state: GateState) -> RunState {
        match state {
            GateState::Running => RunState::Running,
            GateState::Paused => RunState::Paused,
            GateState::Stopped | GateState::Shutdown => RunState::Stopped,
        }
    }

    /// Current state as seen by the command surface.
    pub(crate) fn run_state(&self) -> RunState {
        Self::as_run_state(self.lock().state)
    }

    /// Move `from` to `to`; fails with the actual state on a mismatch.
    pub(crate) fn transition(&self, from: RunState, to: RunState) -> Result<(), RunState> {
        let mut inner = self.lock();
        if inner.state != GateState::from(from) {
            return Err(Self::as_run_state(inner.state));
        }
        inner.state = to.into();
        self.changed.notify_all();
        Ok(())
    }

    /// Force `to` and block until any in-flight tick has finished, so the
    /// caller can rework the world without a tick landing afterwards.
    pub(crate) fn force_and_quiesce(&self, to: RunState) {
        let mut inner = self.lock();
        if inner.state != GateState::Shutdown {
            inner.state = to.into();
            self.changed.notify_all();
        }
        while inner.in_tick {
            inner = self
                .changed
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn shutdown(&self) {
        self.lock().state = GateState::Shutdown;
        self.changed.notify_all();
    }

    /// Block until the loop should run a tick; `false` means shut down.
    fn begin_tick(&self) -> bool {
        let mut inner = self.lock();
        loop {
            match inner.state {
                GateState::Running => {
                    inner.in_tick = true;
                    return true;
                }
                GateState::Shutdown => return false,
                GateState::Stopped | GateState::Paused => {
                    inner = self
                        .changed
                        .wait(inner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    fn end_tick(&self) {
        self.lock().in_tick = false;
        self.changed.notify_all();
    }
}

/// Spawn the stepping thread: wait until running, step, sleep the rest of the
/// tick budget, repeat. Pausing never interrupts an in-flight tick; it only
/// holds back the next one.
pub(crate) fn spawn(world: Arc<World>, gate: Arc<Gate>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("rocketbots-step".into())
        .spawn(move || {
            debug!("stepping thread up");
            while gate.begin_tick() {
                let started = Instant::now();
                world.step();
                gate.end_tick();
                if let Some(rest) = world.tick_interval().checked_sub(started.elapsed()) {
                    thread::sleep(rest);
                }
            }
            debug!("stepping thread down");
        })
        .expect("failed to spawn the stepping thread")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_enforce_the_expected_source_state() {
        let gate = Gate::new();
        assert_eq!(gate.run_state(), RunState::Stopped);
        assert_eq!(
            gate.transition(RunState::Running, RunState::Paused),
            Err(RunState::Stopped)
        );
        gate.transition(RunState::Stopped, RunState::Running)
            .expect("start");
        gate.transition(RunState::Running, RunState::Paused)
            .expect("pause");
        assert_eq!(gate.run_state(), RunState::Paused);
    }

    #[test]
    fn shutdown_wins_over_later_forces() {
        let gate = Gate::new();
        gate.shutdown();
        gate.force_and_quiesce(RunState::Running);
        assert!(!gate.begin_tick());
    }

    #[test]
    fn quiesce_waits_for_the_tick_in_flight() {
        let gate = Arc::new(Gate::new());
        gate.transition(RunState::Stopped, RunState::Running)
            .expect("start");
        assert!(gate.begin_tick());

        let worker = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                thread::sleep(std::time::Duration::from_millis(50));
                gate.end_tick();
            })
        };
        gate.force_and_quiesce(RunState::Stopped);
        assert!(!gate.lock().in_tick, "quiesce must outlast the tick");
        worker.join().expect("worker");
    }
}
