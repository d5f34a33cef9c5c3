//! End-to-end checks of the stepping thread against the command surface.

use rocketbots_app::{RunState, Simulation};
use rocketbots_core::{SimConfig, Tick};
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

fn fast_config(seed: u64) -> SimConfig {
    SimConfig {
        rng_seed: Some(seed),
        ticks_per_second: 120,
        ..SimConfig::default()
    }
}

fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn temp_path(name: &str) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "rocketbots_e2e_{name}_{}_{timestamp}.world",
        std::process::id()
    ))
}

#[test]
fn the_loop_advances_only_while_running() {
    let simulation = Simulation::new(fast_config(21)).expect("simulation");
    let interval = simulation.config().tick_interval();

    // Stopped: no ticks.
    thread::sleep(interval * 4);
    assert_eq!(simulation.tick(), Tick(0));

    simulation.start().expect("start");
    assert!(
        wait_until(|| simulation.tick() > Tick(0), Duration::from_secs(2)),
        "the loop must advance while running"
    );

    simulation.pause().expect("pause");
    // Let the at-most-one in-flight tick land before sampling.
    thread::sleep(interval * 2);
    let settled = simulation.tick();
    thread::sleep(interval * 6);
    assert_eq!(simulation.tick(), settled, "a paused loop must not tick");

    simulation.resume().expect("resume");
    assert!(
        wait_until(|| simulation.tick() > settled, Duration::from_secs(2)),
        "resume must restart the loop"
    );

    simulation.reset().expect("reset");
    assert_eq!(simulation.run_state(), RunState::Stopped);
    assert_eq!(simulation.tick(), Tick(0));
}

#[test]
fn commands_interleave_with_a_running_loop() {
    let simulation = Simulation::new(fast_config(22)).expect("simulation");
    simulation.start().expect("start");

    for round in 0..12 {
        // Placement can legitimately fail in a crowded moment; only panics
        // would be wrong here.
        let _ = simulation.add_obstacle();
        let _ = simulation.add_target();
        if round % 3 == 0 {
            let _ = simulation.add_simple_robot(true);
        }
        if round % 4 == 0 {
            let _ = simulation.remove_obstacle();
        }
        thread::sleep(Duration::from_millis(10));
    }

    let config = simulation.config();
    let snapshot = simulation.snapshot();
    assert!(!snapshot.is_empty());
    for object in &snapshot {
        assert!(
            object.location.x >= 0.0
                && object.location.y >= 0.0
                && object.location.x <= config.arena_width
                && object.location.y <= config.arena_height,
            "objects must stay inside the walls"
        );
    }
    // Solid objects never interpenetrate, however the commands interleaved.
    for (index, a) in snapshot.iter().enumerate() {
        if !a.kind.is_solid() {
            continue;
        }
        for b in snapshot.iter().skip(index + 1) {
            if !b.kind.is_solid() {
                continue;
            }
            assert!(
                a.location.distance_to(b.location) >= a.radius + b.radius - 1e-2,
                "{:?} and {:?} interpenetrate",
                a.kind,
                b.kind
            );
        }
    }
}

#[test]
fn saving_while_running_produces_a_loadable_file() {
    let simulation = Simulation::new(fast_config(23)).expect("simulation");
    simulation.start().expect("start");
    assert!(
        wait_until(|| simulation.tick() > Tick(5), Duration::from_secs(2)),
        "warm the world up first"
    );

    let path = temp_path("live_save");
    simulation.save(&path).expect("save while running");
    let file_objects = fs::read_to_string(&path)
        .expect("read")
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .count();
    assert!(file_objects > 0);

    let reloaded = Simulation::new(SimConfig {
        default_robots: 0,
        default_obstacles: 0,
        default_lights: 0,
        ..fast_config(24)
    })
    .expect("fresh simulation");
    reloaded.open(&path).expect("open");
    assert_eq!(reloaded.snapshot().len(), file_objects);
    let _ = fs::remove_file(&path);
}
