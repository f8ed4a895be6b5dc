//! Model state, simulation clock and the buffer of past tendencies.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::boundary::FieldBoundaryConditions;
use crate::field::Field;
use crate::grid::{Grid, Location};

/// Names of the fields every model carries.
pub const RESERVED_NAMES: [&str; 4] = ["u", "v", "w", "eta"];

/// Simulated time and iteration count.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Clock {
    pub time: f64,
    pub iteration: usize,
    /// Size of the last completed time step.
    pub last_dt: Option<f64>,
}

/// Prognostic and diagnostic fields of a model together with its clock.
///
/// `u`, `v` and `eta` and the tracers are prognostic, `w` is diagnosed from continuity.
/// Auxiliary fields are read-only inputs, e.g. for forcing functions.
#[derive(Debug)]
pub struct ModelState<G> {
    pub clock: Clock,
    pub u: Field<G>,
    pub v: Field<G>,
    pub w: Field<G>,
    pub eta: Field<G>,
    pub tracers: BTreeMap<String, Field<G>>,
    pub auxiliary: BTreeMap<String, Field<G>>,
}

impl<G> Clone for ModelState<G> {
    fn clone(&self) -> Self {
        Self {
            clock: self.clock,
            u: self.u.clone(),
            v: self.v.clone(),
            w: self.w.clone(),
            eta: self.eta.clone(),
            tracers: self.tracers.clone(),
            auxiliary: self.auxiliary.clone(),
        }
    }
}

impl<G: Grid> ModelState<G> {
    /// Zero initialized state with the given tracers.
    pub fn new<'a>(
        grid: &Arc<G>,
        tracers: impl IntoIterator<Item = &'a str>,
        auxiliary: BTreeMap<String, Field<G>>,
    ) -> Self {
        let field = |loc| Field::new(Arc::clone(grid), loc);
        Self {
            clock: Clock::default(),
            u: field(Location::U),
            v: field(Location::V),
            w: field(Location::W),
            eta: field(Location::SURFACE),
            tracers: tracers
                .into_iter()
                .map(|name| (name.to_string(), field(Location::CENTER)))
                .collect(),
            auxiliary,
        }
    }

    /// Look up a field by name. Tracers shadow nothing, the names of the velocities and
    /// the free surface are reserved.
    pub fn field(&self, name: &str) -> Option<&Field<G>> {
        match name {
            "u" => Some(&self.u),
            "v" => Some(&self.v),
            "w" => Some(&self.w),
            "eta" => Some(&self.eta),
            _ => self
                .tracers
                .get(name)
                .or_else(|| self.auxiliary.get(name)),
        }
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field<G>> {
        match name {
            "u" => Some(&mut self.u),
            "v" => Some(&mut self.v),
            "w" => Some(&mut self.w),
            "eta" => Some(&mut self.eta),
            _ => match self.tracers.get_mut(name) {
                Some(f) => Some(f),
                None => self.auxiliary.get_mut(name),
            },
        }
    }

    /// Names of the evolving fields: velocities, free surface and tracers.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        RESERVED_NAMES
            .into_iter()
            .chain(self.tracers.keys().map(String::as_str))
    }

    /// Fill the halos of all evolving fields. Fields without an entry in `bcs` use `default`.
    pub fn fill_halos(
        &mut self,
        bcs: &BTreeMap<String, FieldBoundaryConditions>,
        default: &FieldBoundaryConditions,
    ) {
        let pick = |name: &str| bcs.get(name).unwrap_or(default);
        self.u.fill_halo(pick("u"));
        self.v.fill_halo(pick("v"));
        self.w.fill_halo(pick("w"));
        self.eta.fill_halo(pick("eta"));
        for (name, tracer) in self.tracers.iter_mut() {
            tracer.fill_halo(pick(name));
        }
    }
}

/// Right-hand sides of the prognostic equations at one instant.
#[derive(Debug)]
pub struct Tendencies<G> {
    pub u: Field<G>,
    pub v: Field<G>,
    pub tracers: BTreeMap<String, Field<G>>,
}

impl<G> Clone for Tendencies<G> {
    fn clone(&self) -> Self {
        Self {
            u: self.u.clone(),
            v: self.v.clone(),
            tracers: self.tracers.clone(),
        }
    }
}

impl<G: Grid> Tendencies<G> {
    /// Zero tendencies matching the layout of `state`.
    pub fn like(state: &ModelState<G>) -> Self {
        Self {
            u: state.u.similar(),
            v: state.v.similar(),
            tracers: state
                .tracers
                .iter()
                .map(|(name, f)| (name.clone(), f.similar()))
                .collect(),
        }
    }
}

/// Bounded buffer of past [`Tendencies`], oldest first.
///
/// Once the buffer is full, pushing drops the oldest element.
#[derive(Debug)]
pub struct TendencyHistory<G> {
    inner: VecDeque<Tendencies<G>>,
    capacity: usize,
}

impl<G> TendencyHistory<G> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, elem: Tendencies<G>) {
        if self.inner.len() == self.capacity {
            self.inner.pop_front();
        }
        self.inner.push_back(elem);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Forget all past tendencies, e.g. after a change of the time step.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// The last `n` elements, oldest first.
    pub fn last(&self, n: usize) -> impl Iterator<Item = &Tendencies<G>> {
        self.inner.iter().skip(self.inner.len().saturating_sub(n))
    }
}
