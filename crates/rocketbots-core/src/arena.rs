//! The thread-safe object registry.
//!
//! The arena owns the only lock in the simulation. Every public operation is
//! individually atomic; callers never touch the lock themselves. Handles are
//! generational slot-map keys, so removing an object never invalidates other
//! handles and a freed slot is never confused with its previous occupant.

use crate::color::Color;
use crate::geometry::{Bounds, Location};
use crate::object::{ObjectKind, PhysicalObject};
use crate::robot::RobotState;
use crate::ObjectId;
use rand::rngs::SmallRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Errors raised when dropping a new object into the arena.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlacementError {
    #[error("object overlaps an existing object")]
    Overlap,
    #[error("object does not fit inside the arena walls")]
    OutOfBounds,
    #[error("no open location found after {attempts} attempts")]
    NoOpenLocation { attempts: u32 },
}

/// One registry entry: the circle body, plus robot state when the object is
/// a robot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArenaObject {
    pub body: PhysicalObject,
    pub robot: Option<RobotState>,
}

impl ArenaObject {
    /// An entry with no control policy (obstacle, target, light).
    #[must_use]
    pub const fn passive(body: PhysicalObject) -> Self {
        Self { body, robot: None }
    }

    /// A robot entry.
    #[must_use]
    pub const fn robot(body: PhysicalObject, state: RobotState) -> Self {
        Self {
            body,
            robot: Some(state),
        }
    }

    /// Whether this object is allowed to overlap `other` at placement time:
    /// only a robot and its own declared target are exempt.
    fn overlap_exempt(&self, other: ObjectId) -> bool {
        self.robot
            .as_ref()
            .is_some_and(|state| state.target == Some(other))
    }
}

/// Kinematic state of one object, copied out under the lock. This is what
/// sensing, rendering, and save all read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectSnapshot {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub location: Location,
    pub orientation: f32,
    pub radius: f32,
    pub speed: f32,
    pub color: Color,
    /// Heading-line color when the object is a robot.
    pub line_color: Option<Color>,
    /// Bound target when the object is a robot.
    pub target: Option<ObjectId>,
}

/// A robot's full state copied out for the lock-free decide phase.
#[derive(Debug, Clone)]
pub struct RobotView {
    pub id: ObjectId,
    pub body: PhysicalObject,
    pub state: RobotState,
}

#[derive(Debug, Default)]
pub(crate) struct ArenaInner {
    objects: SlotMap<ObjectId, ArenaObject>,
    order: Vec<ObjectId>,
}

impl ArenaInner {
    pub(crate) fn get(&self, id: ObjectId) -> Option<&ArenaObject> {
        self.objects.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: ObjectId) -> Option<&mut ArenaObject> {
        self.objects.get_mut(id)
    }

    /// Insertion-order handles.
    pub(crate) fn order(&self) -> &[ObjectId] {
        &self.order
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }

    /// First solid object whose circle overlaps the probe, skipping
    /// `exclude` and (if given) `ignore`.
    pub(crate) fn blocking_solid(
        &self,
        center: Location,
        radius: f32,
        exclude: ObjectId,
        ignore: Option<ObjectId>,
    ) -> Option<ObjectId> {
        self.order
            .iter()
            .copied()
            .filter(|&id| id != exclude && Some(id) != ignore)
            .find(|&id| {
                self.objects.get(id).is_some_and(|object| {
                    object.body.kind.is_solid() && object.body.overlaps_circle(center, radius)
                })
            })
    }

    fn overlaps_any(
        &self,
        center: Location,
        radius: f32,
        exempt: impl Fn(ObjectId) -> bool,
    ) -> bool {
        self.objects.iter().any(|(id, object)| {
            !exempt(id) && object.body.overlaps_circle(center, radius)
        })
    }

    /// Validate bounds and the no-overlap invariant, then insert.
    pub(crate) fn insert_validated(
        &mut self,
        bounds: Bounds,
        object: ArenaObject,
    ) -> Result<ObjectId, PlacementError> {
        let center = object.body.location();
        let radius = object.body.radius();
        if !bounds.contains_circle(center, radius) {
            return Err(PlacementError::OutOfBounds);
        }
        if self.overlaps_any(center, radius, |id| object.overlap_exempt(id)) {
            return Err(PlacementError::Overlap);
        }
        Ok(self.insert_raw(object))
    }

    /// Insert without validation. The world-file loader uses this to build a
    /// complete candidate set first (target handles are patched in afterward),
    /// then runs [`check_invariants`](Self::check_invariants) over the whole
    /// set before the arena accepts it.
    pub(crate) fn insert_raw(&mut self, object: ArenaObject) -> ObjectId {
        let id = self.objects.insert(object);
        self.order.push(id);
        id
    }

    /// Re-check what stepping preserves: every object inside the walls, and
    /// no two solid objects interpenetrating. Passable objects (targets,
    /// lights) may legitimately drift over others in a world saved mid-run,
    /// so only solid pairs are held to the overlap invariant here.
    pub(crate) fn check_invariants(&self, bounds: Bounds) -> Result<(), PlacementError> {
        for (index, &id) in self.order.iter().enumerate() {
            let Some(object) = self.objects.get(id) else {
                continue;
            };
            if !bounds.contains_circle(object.body.location(), object.body.radius()) {
                return Err(PlacementError::OutOfBounds);
            }
            if !object.body.kind.is_solid() {
                continue;
            }
            for &other_id in &self.order[index + 1..] {
                let Some(other) = self.objects.get(other_id) else {
                    continue;
                };
                if other.body.kind.is_solid()
                    && object.body.overlaps(&other.body)
                    && !object.overlap_exempt(other_id)
                    && !other.overlap_exempt(id)
                {
                    return Err(PlacementError::Overlap);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: ObjectId) -> Option<ArenaObject> {
        let removed = self.objects.remove(id)?;
        self.order.retain(|&kept| kept != id);
        Some(removed)
    }

    pub(crate) fn snapshot(&self) -> Vec<ObjectSnapshot> {
        self.order
            .iter()
            .filter_map(|&id| {
                self.objects.get(id).map(|object| ObjectSnapshot {
                    id,
                    kind: object.body.kind,
                    location: object.body.location(),
                    orientation: object.body.orientation(),
                    radius: object.body.radius(),
                    speed: object.body.speed(),
                    color: object.body.color(),
                    line_color: object.robot.as_ref().map(|state| state.line_color),
                    target: object.robot.as_ref().and_then(|state| state.target),
                })
            })
            .collect()
    }

    fn robot_views(&self) -> Vec<RobotView> {
        self.order
            .iter()
            .filter_map(|&id| {
                let object = self.objects.get(id)?;
                let state = object.robot.clone()?;
                Some(RobotView {
                    id,
                    body: object.body,
                    state,
                })
            })
            .collect()
    }
}

/// The registry of all live objects.
pub struct Arena {
    bounds: Bounds,
    inner: Mutex<ArenaInner>,
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("bounds", &self.bounds)
            .field("object_count", &self.len())
            .finish()
    }
}

impl Arena {
    /// An empty arena with the given wall extents.
    #[must_use]
    pub fn new(bounds: Bounds) -> Self {
        Self {
            bounds,
            inner: Mutex::new(ArenaInner::default()),
        }
    }

    /// Recover the guard even if a panicking tick poisoned the lock.
    fn lock(&self) -> MutexGuard<'_, ArenaInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a closure under the registry lock. Crate-internal: the stepping
    /// pipeline's apply pass and the world-file installer use this; public
    /// callers get the individually atomic operations below.
    pub(crate) fn with_inner<R>(&self, f: impl FnOnce(&mut ArenaInner) -> R) -> R {
        f(&mut self.lock())
    }

    /// Replace the whole object set in one atomic swap.
    pub(crate) fn install(&self, inner: ArenaInner) {
        *self.lock() = inner;
    }

    #[must_use]
    pub const fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Validate and insert a new object, returning its stable handle.
    pub fn add(&self, object: ArenaObject) -> Result<ObjectId, PlacementError> {
        self.with_inner(|inner| inner.insert_validated(self.bounds, object))
    }

    /// Remove one object. Other handles remain valid; the removed handle
    /// dereferences to `None` from now on.
    pub fn remove(&self, id: ObjectId) -> Option<ArenaObject> {
        self.lock().remove(id)
    }

    /// Remove every object.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.objects.clear();
        inner.order.clear();
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a handle still refers to a live object.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.lock().objects.contains_key(id)
    }

    /// Copy out one object, or `None` if the handle is stale.
    #[must_use]
    pub fn get(&self, id: ObjectId) -> Option<ArenaObject> {
        self.lock().objects.get(id).cloned()
    }

    /// Live handles in insertion order.
    #[must_use]
    pub fn ids(&self) -> Vec<ObjectId> {
        self.lock().order.clone()
    }

    /// Consistent kinematic snapshot of every object, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ObjectSnapshot> {
        self.lock().snapshot()
    }

    /// One-lock copy of the snapshot plus every robot's full state, for the
    /// stepping pipeline's lock-free decide phase.
    #[must_use]
    pub fn observe(&self) -> (Vec<ObjectSnapshot>, Vec<RobotView>) {
        let inner = self.lock();
        (inner.snapshot(), inner.robot_views())
    }

    /// Sample random in-bounds locations until one fits a circle of `radius`
    /// without overlapping anything, or the attempt budget runs out.
    pub fn find_open_location(
        &self,
        radius: f32,
        max_attempts: u32,
        rng: &mut SmallRng,
    ) -> Result<Location, PlacementError> {
        let x_max = self.bounds.width - radius;
        let y_max = self.bounds.height - radius;
        if radius >= x_max || radius >= y_max {
            return Err(PlacementError::OutOfBounds);
        }
        let inner = self.lock();
        for _ in 0..max_attempts {
            let candidate = Location::new(
                rng.random_range(radius..x_max),
                rng.random_range(radius..y_max),
            );
            if !inner.overlaps_any(candidate, radius, |_| false) {
                return Ok(candidate);
            }
        }
        Err(PlacementError::NoOpenLocation {
            attempts: max_attempts,
        })
    }
}
