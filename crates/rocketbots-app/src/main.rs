use anyhow::Result;
use rocketbots_app::Simulation;
use rocketbots_core::{ObjectKind, SimConfig};
use std::thread;
use std::time::Duration;
use tracing::info;

/// Headless harness: boot the default world, run it for a few seconds while
/// logging progress, and optionally save the result to the path given as the
/// first argument.
fn main() -> Result<()> {
    init_tracing();

    let config = SimConfig::default();
    let simulation = Simulation::new(config)?;
    info!(objects = simulation.snapshot().len(), "world populated");

    simulation.start()?;
    for _ in 0..6 {
        thread::sleep(Duration::from_millis(500));
        let snapshot = simulation.snapshot();
        let robots = snapshot
            .iter()
            .filter(|object| object.kind == ObjectKind::Robot)
            .count();
        let targets = snapshot
            .iter()
            .filter(|object| object.kind == ObjectKind::Target)
            .count();
        info!(tick = simulation.tick().0, robots, targets, "progress");
    }
    simulation.pause()?;

    if let Some(path) = std::env::args().nth(1) {
        simulation.save(&path)?;
        info!(path = %path, "world saved");
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
