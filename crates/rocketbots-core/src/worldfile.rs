//! The textual world description used by save and open.
//!
//! Line-oriented, comma-separated: a `width,height` header, then one line per
//! object in registry order. Robot lines carry their policy parameters; a
//! neural policy stores the path of its network description file. Opening a
//! file parses and validates everything (including referenced networks)
//! before the old object set is discarded, so a malformed file never leaves a
//! partial world behind.

use crate::arena::{ArenaInner, ArenaObject, PlacementError};
use crate::color::Color;
use crate::geometry::{Bounds, Location};
use crate::object::{ObjectError, ObjectKind, PhysicalObject};
use crate::robot::{ComplexParams, ControlPolicy, NeuralPolicy, PolicyError, RobotState, SensorChannel};
use crate::world::{InstallReport, World};
use crate::ObjectId;
use rocketbots_brain::{FormatError, NeuralNetwork};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Errors raised while reading or writing a world file.
#[derive(Debug, Error)]
pub enum WorldFileError {
    #[error("i/o error on world file: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: unknown object kind {kind:?}")]
    UnknownKind { line: usize, kind: String },
    #[error("line {line}: unknown policy {policy:?}")]
    UnknownPolicy { line: usize, policy: String },
    #[error("line {line}: target ordinal {ordinal} does not name a target object")]
    BadTarget { line: usize, ordinal: i64 },
    #[error("network file {path}: {source}")]
    Network {
        path: PathBuf,
        #[source]
        source: FormatError,
    },
    #[error("file describes a {found:?} arena but the world is {expected:?}")]
    BoundsMismatch { expected: Bounds, found: Bounds },
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("loaded objects violate placement: {0}")]
    Placement(#[from] PlacementError),
}

/// One parsed object line.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    pub kind: ObjectKind,
    pub radius: f32,
    pub location: Location,
    pub color: Color,
    pub orientation: f32,
    pub speed: f32,
    /// Present exactly when `kind` is [`ObjectKind::Robot`].
    pub robot: Option<RobotRecord>,
}

/// The robot continuation of an object line.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotRecord {
    /// File ordinal of the bound target, if any.
    pub target: Option<usize>,
    pub line_color: Color,
    pub policy: PolicyRecord,
}

/// A robot's policy as persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyRecord {
    Simple,
    Complex(ComplexParams),
    /// Path of the network description file, as written in the world file.
    Neural(PathBuf),
}

fn kind_tag(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Robot => "robot",
        ObjectKind::Target => "target",
        ObjectKind::Obstacle => "obstacle",
        ObjectKind::StationaryLight => "stationary_light",
        ObjectKind::MovingLight => "moving_light",
    }
}

fn parse_kind(token: &str) -> Option<ObjectKind> {
    Some(match token {
        "robot" => ObjectKind::Robot,
        "target" => ObjectKind::Target,
        "obstacle" => ObjectKind::Obstacle,
        "stationary_light" => ObjectKind::StationaryLight,
        "moving_light" => ObjectKind::MovingLight,
        _ => return None,
    })
}

/// Comma-separated field cursor over one line, tracking the line number for
/// error reporting.
struct Fields<'a> {
    line: usize,
    tokens: std::str::Split<'a, char>,
}

impl<'a> Fields<'a> {
    fn new(line: usize, content: &'a str) -> Self {
        Self {
            line,
            tokens: content.split(','),
        }
    }

    fn syntax(&self, message: impl Into<String>) -> WorldFileError {
        WorldFileError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn token(&mut self, what: &'static str) -> Result<&'a str, WorldFileError> {
        self.tokens
            .next()
            .map(str::trim)
            .ok_or_else(|| self.syntax(format!("missing field: {what}")))
    }

    fn f32(&mut self, what: &'static str) -> Result<f32, WorldFileError> {
        let token = self.token(what)?;
        token
            .parse()
            .map_err(|_| self.syntax(format!("{what} {token:?} is not a number")))
    }

    fn i64(&mut self, what: &'static str) -> Result<i64, WorldFileError> {
        let token = self.token(what)?;
        token
            .parse()
            .map_err(|_| self.syntax(format!("{what} {token:?} is not an integer")))
    }

    fn flag(&mut self, what: &'static str) -> Result<bool, WorldFileError> {
        match self.token(what)? {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(self.syntax(format!("{what} {other:?} is not 0 or 1"))),
        }
    }

    fn color(&mut self, what: &'static str) -> Result<Color, WorldFileError> {
        Ok(Color::new(self.f32(what)?, self.f32(what)?, self.f32(what)?))
    }

    fn finish(mut self) -> Result<(), WorldFileError> {
        match self.tokens.next() {
            None => Ok(()),
            Some(extra) => Err(self.syntax(format!("unexpected trailing field {:?}", extra.trim()))),
        }
    }
}

/// Parse a complete world description from a reader.
pub fn parse(reader: impl BufRead) -> Result<(Bounds, Vec<ObjectRecord>), WorldFileError> {
    let mut lines = reader
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line));

    let (header_line, header) = loop {
        match lines.next() {
            Some((number, line)) => {
                let line = line?;
                if !line.trim().is_empty() {
                    break (number, line);
                }
            }
            None => {
                return Err(WorldFileError::Syntax {
                    line: 0,
                    message: "empty world file".into(),
                });
            }
        }
    };
    let mut fields = Fields::new(header_line, header.trim());
    let bounds = Bounds::new(fields.f32("arena width")?, fields.f32("arena height")?);
    fields.finish()?;

    let mut records = Vec::new();
    let mut record_lines = Vec::new();
    for (number, line) in lines {
        let line = line?;
        let content = line.trim();
        if content.is_empty() {
            continue;
        }
        records.push(parse_record(number, content)?);
        record_lines.push(number);
    }

    // Target ordinals may point forward, so they can only be checked once the
    // whole file is in.
    for (record, &line) in records.iter().zip(&record_lines) {
        if let Some(robot) = &record.robot
            && let Some(ordinal) = robot.target
            && records.get(ordinal).is_none_or(|r| r.kind != ObjectKind::Target)
        {
            return Err(WorldFileError::BadTarget {
                line,
                ordinal: ordinal as i64,
            });
        }
    }

    Ok((bounds, records))
}

/// Parse a world description held in a string.
pub fn parse_str(text: &str) -> Result<(Bounds, Vec<ObjectRecord>), WorldFileError> {
    parse(text.as_bytes())
}

fn parse_record(line: usize, content: &str) -> Result<ObjectRecord, WorldFileError> {
    let mut fields = Fields::new(line, content);
    let kind_token = fields.token("kind")?;
    let Some(kind) = parse_kind(kind_token) else {
        return Err(WorldFileError::UnknownKind {
            line,
            kind: kind_token.to_string(),
        });
    };
    let radius = fields.f32("radius")?;
    let location = Location::new(fields.f32("x")?, fields.f32("y")?);
    let color = fields.color("color channel")?;
    let orientation = fields.f32("orientation")?;
    let speed = fields.f32("speed")?;

    let robot = if kind == ObjectKind::Robot {
        Some(parse_robot(&mut fields)?)
    } else {
        None
    };
    fields.finish()?;

    Ok(ObjectRecord {
        kind,
        radius,
        location,
        color,
        orientation,
        speed,
        robot,
    })
}

fn parse_robot(fields: &mut Fields<'_>) -> Result<RobotRecord, WorldFileError> {
    let policy_token = fields.token("policy")?;
    let target = match fields.i64("target ordinal")? {
        -1 => None,
        ordinal if ordinal >= 0 => Some(ordinal as usize),
        ordinal => {
            return Err(WorldFileError::BadTarget {
                line: fields.line,
                ordinal,
            });
        }
    };
    let line_color = fields.color("line color channel")?;

    let policy = match policy_token {
        "simple" => PolicyRecord::Simple,
        "complex" => {
            let mut channels = [SensorChannel::default(); 4];
            for channel in &mut channels {
                channel.enabled = fields.flag("sensor enable")?;
            }
            for channel in &mut channels {
                channel.crossed = fields.flag("sensor crossed")?;
            }
            for channel in &mut channels {
                channel.scale = fields.f32("sensor scale")?;
            }
            let [light, robot, obstacle, target] = channels;
            PolicyRecord::Complex(ComplexParams {
                light,
                robot,
                obstacle,
                target,
                default_speed: fields.f32("default speed")?,
            })
        }
        "neural" => PolicyRecord::Neural(PathBuf::from(fields.token("network file")?)),
        other => {
            return Err(WorldFileError::UnknownPolicy {
                line: fields.line,
                policy: other.to_string(),
            });
        }
    };

    Ok(RobotRecord {
        target,
        line_color,
        policy,
    })
}

/// Write the world's current object set to `path`. The registry lock is held
/// for the whole write, so the file is a consistent snapshot even while the
/// stepping thread runs.
pub fn save(world: &World, path: impl AsRef<Path>) -> Result<(), WorldFileError> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    let bounds = world.arena().bounds();
    world
        .arena()
        .with_inner(|inner| write_world(&mut writer, bounds, inner))?;
    writer.flush()?;
    info!(path = %path.display(), "world saved");
    Ok(())
}

fn write_world(out: &mut impl Write, bounds: Bounds, inner: &ArenaInner) -> io::Result<()> {
    writeln!(out, "{},{}", bounds.width, bounds.height)?;
    let ordinals: HashMap<ObjectId, usize> = inner
        .order()
        .iter()
        .enumerate()
        .map(|(ordinal, &id)| (id, ordinal))
        .collect();

    for &id in inner.order() {
        let Some(object) = inner.get(id) else {
            continue;
        };
        let body = &object.body;
        let color = body.color();
        write!(
            out,
            "{},{},{},{},{},{},{},{},{}",
            kind_tag(body.kind),
            body.radius(),
            body.location().x,
            body.location().y,
            color.red,
            color.green,
            color.blue,
            body.orientation(),
            body.speed(),
        )?;
        if let Some(state) = &object.robot {
            // A dangling binding (target captured since) saves as unbound.
            let ordinal = state
                .target
                .and_then(|target| ordinals.get(&target))
                .map_or(-1, |&ordinal| ordinal as i64);
            write!(
                out,
                ",{},{},{},{},{}",
                state.policy.kind_label(),
                ordinal,
                state.line_color.red,
                state.line_color.green,
                state.line_color.blue,
            )?;
            match &state.policy {
                ControlPolicy::Simple => {}
                ControlPolicy::Complex(params) => {
                    let channels = [&params.light, &params.robot, &params.obstacle, &params.target];
                    for channel in channels {
                        write!(out, ",{}", u8::from(channel.enabled))?;
                    }
                    for channel in channels {
                        write!(out, ",{}", u8::from(channel.crossed))?;
                    }
                    for channel in channels {
                        write!(out, ",{}", channel.scale)?;
                    }
                    write!(out, ",{}", params.default_speed)?;
                }
                ControlPolicy::Neural(policy) => {
                    write!(out, ",{}", policy.source().display())?;
                }
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

/// A parsed and fully validated object set, ready to swap into the world it
/// was loaded against.
pub struct LoadedWorld {
    inner: ArenaInner,
    report: InstallReport,
}

/// Parse `path` and, only if the whole file (networks included) is valid,
/// replace the world's object set with its contents. On any error the
/// previous world is left untouched. Callers running a stepping thread
/// should [`load`] first, quiesce the loop, then [`install`], so no
/// in-flight tick lands on the fresh object set.
pub fn open(world: &World, path: impl AsRef<Path>) -> Result<InstallReport, WorldFileError> {
    let loaded = load(world, path)?;
    Ok(install(world, loaded))
}

/// Parse and validate `path` against the running world (bounds, policies,
/// referenced networks, placement invariants) without touching it.
pub fn load(world: &World, path: impl AsRef<Path>) -> Result<LoadedWorld, WorldFileError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let (bounds, records) = parse(BufReader::new(file))?;

    let expected = world.arena().bounds();
    if (bounds.width - expected.width).abs() > 1e-3
        || (bounds.height - expected.height).abs() > 1e-3
    {
        return Err(WorldFileError::BoundsMismatch {
            expected,
            found: bounds,
        });
    }

    let config = world.config();
    let dir = path.parent();
    let mut inner = ArenaInner::default();
    let mut ids = Vec::with_capacity(records.len());
    for record in &records {
        let mut body = PhysicalObject::new(
            record.kind,
            record.location,
            record.orientation,
            record.radius,
            record.color,
        )?;
        body.set_speed(record.speed)?;
        let object = match &record.robot {
            None => ArenaObject::passive(body),
            Some(robot) => {
                let policy = build_policy(&robot.policy, dir)?;
                // Targets bind after every ordinal has a handle.
                ArenaObject::robot(body, RobotState::new(robot.line_color, None, policy, &config))
            }
        };
        ids.push(inner.insert_raw(object));
    }

    for (record, &id) in records.iter().zip(&ids) {
        if let Some(robot) = &record.robot
            && let Some(ordinal) = robot.target
            && let Some(object) = inner.get_mut(id)
            && let Some(state) = object.robot.as_mut()
        {
            state.target = Some(ids[ordinal]);
        }
    }
    inner.check_invariants(expected)?;

    let report = build_report(&records, &ids);
    info!(path = %path.display(), objects = records.len(), "world file loaded");
    Ok(LoadedWorld { inner, report })
}

/// Swap a loaded object set into the world, discarding the previous one and
/// rewinding the clock.
pub fn install(world: &World, loaded: LoadedWorld) -> InstallReport {
    world.install_population(loaded.inner);
    loaded.report
}

fn build_policy(record: &PolicyRecord, dir: Option<&Path>) -> Result<ControlPolicy, WorldFileError> {
    match record {
        PolicyRecord::Simple => Ok(ControlPolicy::Simple),
        PolicyRecord::Complex(params) => Ok(ControlPolicy::Complex(*params)),
        PolicyRecord::Neural(source) => {
            // Relative network paths resolve against the world file's
            // directory; the stored source keeps the text as written.
            let resolved = match dir {
                Some(dir) if source.is_relative() => dir.join(source),
                _ => source.clone(),
            };
            let network = NeuralNetwork::load(&resolved).map_err(|err| WorldFileError::Network {
                path: resolved.clone(),
                source: err,
            })?;
            Ok(ControlPolicy::Neural(NeuralPolicy::new(
                source.clone(),
                network,
            )?))
        }
    }
}

fn build_report(records: &[ObjectRecord], ids: &[ObjectId]) -> InstallReport {
    let mut report = InstallReport::default();
    for (record, &id) in records.iter().zip(ids) {
        match record.kind {
            ObjectKind::Robot => {
                let target = record
                    .robot
                    .as_ref()
                    .and_then(|robot| robot.target)
                    .map(|ordinal| ids[ordinal]);
                report.robots.push((id, target));
            }
            ObjectKind::Obstacle => report.obstacles.push(id),
            ObjectKind::StationaryLight | ObjectKind::MovingLight => report.lights.push(id),
            ObjectKind::Target => {}
        }
    }
    let bound: HashSet<ObjectId> = report
        .robots
        .iter()
        .filter_map(|&(_, target)| target)
        .collect();
    for (record, &id) in records.iter().zip(ids) {
        if record.kind == ObjectKind::Target && !bound.contains(&id) {
            report.targets.push(id);
        }
    }
    report
}
