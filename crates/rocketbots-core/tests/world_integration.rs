//! Whole-pipeline checks: populate, step for a while, and hold the world to
//! its invariants.

use rocketbots_core::{worldfile, ObjectKind, SimConfig, Tick, World};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn seeded_config(seed: u64) -> SimConfig {
    SimConfig {
        rng_seed: Some(seed),
        ..SimConfig::default()
    }
}

fn temp_path(name: &str) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "rocketbots_core_{name}_{}_{timestamp}.world",
        std::process::id()
    ))
}

#[test]
fn seeded_worlds_advance_deterministically() {
    let world_a = World::new(seeded_config(0xDEAD_BEEF)).expect("world_a");
    let world_b = World::new(seeded_config(0xDEAD_BEEF)).expect("world_b");
    world_a.populate_default().expect("populate a");
    world_b.populate_default().expect("populate b");

    for _ in 0..50 {
        world_a.step();
        world_b.step();
    }

    assert_eq!(world_a.tick(), Tick(50));
    assert_eq!(
        world_a.snapshot(),
        world_b.snapshot(),
        "identical seeds must yield identical worlds"
    );
}

#[test]
fn long_runs_keep_solids_apart_and_everything_inside_the_walls() {
    let world = World::new(seeded_config(99)).expect("world");
    world.populate_default().expect("populate");

    for _ in 0..300 {
        world.step();
    }

    let config = world.config();
    let snapshot = world.snapshot();
    assert!(!snapshot.is_empty());
    for object in &snapshot {
        assert!(
            object.location.x - object.radius > -1e-3
                && object.location.y - object.radius > -1e-3
                && object.location.x + object.radius < config.arena_width + 1e-3
                && object.location.y + object.radius < config.arena_height + 1e-3,
            "{:?} escaped the walls at {:?}",
            object.kind,
            object.location
        );
    }
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
                "solid {:?} and {:?} interpenetrate after stepping",
                a.kind,
                b.kind
            );
        }
    }
}

#[test]
fn a_stepped_world_round_trips_through_its_file() {
    let world = World::new(seeded_config(7)).expect("world");
    world.populate_default().expect("populate");
    for _ in 0..120 {
        world.step();
    }

    let path = temp_path("roundtrip");
    worldfile::save(&world, &path).expect("save");

    let reloaded = World::new(seeded_config(8)).expect("fresh world");
    worldfile::open(&reloaded, &path).expect("open");

    let before = world.snapshot();
    let after = reloaded.snapshot();
    assert_eq!(before.len(), after.len());
    for (a, b) in before.iter().zip(&after) {
        assert_eq!(a.kind, b.kind);
        assert!((a.location.x - b.location.x).abs() < 1e-3);
        assert!((a.location.y - b.location.y).abs() < 1e-3);
        assert!((a.orientation - b.orientation).abs() < 1e-3);
        assert!((a.radius - b.radius).abs() < 1e-3);
        assert_eq!(a.color, b.color);
        assert_eq!(a.line_color, b.line_color);
    }

    // Target bindings survive through file ordinals even though the handles
    // themselves are new.
    let ordinal_of = |snapshot: &[rocketbots_core::ObjectSnapshot], id| {
        snapshot.iter().position(|object| object.id == id)
    };
    for (a, b) in before.iter().zip(&after) {
        if a.kind != ObjectKind::Robot {
            continue;
        }
        assert_eq!(
            a.target.and_then(|id| ordinal_of(&before, id)),
            b.target.and_then(|id| ordinal_of(&after, id)),
        );
    }

    let _ = fs::remove_file(&path);
}
