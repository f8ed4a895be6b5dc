//! Quantities computed from the model state while it evolves.
//!
//! A [`Diagnostic`] is evaluated on a [`Schedule`]. Fatal diagnostics inspect the
//! candidate state of a step before it is committed and may veto the step.

use crate::error::{Error, Result};
use crate::field::Field;
use crate::grid::{Axis, Grid, Loc, Location};
use crate::operators::{shift, volume};
use crate::state::{Clock, ModelState};

/// Result of a diagnostic evaluation.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiagnosticValue {
    Scalar(f64),
    /// One value per vertical level, bottom first.
    Profile(Vec<f64>),
    /// Nothing to report, e.g. a check that passed.
    None,
}

impl DiagnosticValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            DiagnosticValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_profile(&self) -> Option<&[f64]> {
        match self {
            DiagnosticValue::Profile(p) => Some(p),
            _ => None,
        }
    }
}

/// A quantity derived from the model state.
pub trait Diagnostic<G>: Send {
    fn evaluate(&mut self, state: &ModelState<G>) -> Result<DiagnosticValue>;

    /// Fatal diagnostics run on the candidate state of a step. An error aborts the step.
    fn is_fatal(&self) -> bool {
        false
    }
}

/// One recorded evaluation.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiagnosticRecord {
    pub iteration: usize,
    pub time: f64,
    pub value: DiagnosticValue,
}

/// When a diagnostic or an output writer is triggered.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Schedule {
    /// Every `n` iterations.
    IterationInterval(usize),
    /// Whenever the simulated time passes a multiple of the interval.
    TimeInterval(f64),
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::IterationInterval(1)
    }
}

impl Schedule {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Schedule::IterationInterval(0) => {
                Err(Error::validation("iteration interval must be positive"))
            }
            Schedule::TimeInterval(dt) if !(dt.is_finite() && dt > 0.0) => Err(
                Error::validation(format!("time interval must be positive, got {dt}")),
            ),
            _ => Ok(()),
        }
    }
}

/// Keeps track of when a [`Schedule`] fires next.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduleTracker {
    schedule: Schedule,
    next_time: f64,
}

impl ScheduleTracker {
    pub fn new(schedule: Schedule, start: &Clock) -> Result<Self> {
        schedule.validate()?;
        let next_time = match schedule {
            Schedule::TimeInterval(dt) => ((start.time / dt).floor() + 1.0) * dt,
            Schedule::IterationInterval(_) => f64::INFINITY,
        };
        Ok(Self {
            schedule,
            next_time,
        })
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn is_due(&self, clock: &Clock) -> bool {
        match self.schedule {
            Schedule::IterationInterval(n) => clock.iteration % n == 0,
            Schedule::TimeInterval(dt) => clock.time >= self.next_time - 1e-9 * dt,
        }
    }

    /// Mark the schedule as fired at `clock`.
    pub fn fired(&mut self, clock: &Clock) {
        if let Schedule::TimeInterval(dt) = self.schedule {
            while self.next_time - 1e-9 * dt <= clock.time {
                self.next_time += dt;
            }
        }
    }
}

fn lookup<'a, G: Grid>(state: &'a ModelState<G>, name: &str) -> Result<&'a Field<G>> {
    state
        .field(name)
        .ok_or_else(|| Error::validation(format!("unknown field `{name}`")))
}

/// Value of `f` interpolated to the cell center `idx`.
fn at_center<G: Grid>(f: &Field<G>, idx: [isize; 3]) -> f64 {
    let loc = f.location();
    let faces: Vec<Axis> = Axis::ALL
        .into_iter()
        .filter(|&a| loc.along(a) == Loc::Face)
        .collect();
    let corners = 1usize << faces.len();
    let total: f64 = (0..corners)
        .map(|mask| {
            let p = faces
                .iter()
                .enumerate()
                .fold(idx, |p, (b, &axis)| shift(p, axis, ((mask >> b) & 1) as isize));
            f[p]
        })
        .sum();
    total / corners as f64
}

/// Volume weighted horizontal average of `value(idx)` on every level of `loc`.
fn level_average<G: Grid>(
    grid: &G,
    loc: Location,
    size: [usize; 3],
    value: impl Fn([isize; 3]) -> f64,
) -> Vec<f64> {
    (0..size[2] as isize)
        .map(|k| {
            let (mut sum, mut weight) = (0.0, 0.0);
            for j in 0..size[1] as isize {
                for i in 0..size[0] as isize {
                    let w = volume(grid, loc, [i, j, k]);
                    sum += w * value([i, j, k]);
                    weight += w;
                }
            }
            sum / weight
        })
        .collect()
}

/// Horizontally averaged vertical profile of a field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HorizontalAverage {
    pub field: String,
}

impl HorizontalAverage {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl<G: Grid> Diagnostic<G> for HorizontalAverage {
    fn evaluate(&mut self, state: &ModelState<G>) -> Result<DiagnosticValue> {
        let f = lookup(state, &self.field)?;
        let profile = level_average(f.grid().as_ref(), f.location(), f.size(), |idx| f[idx]);
        Ok(DiagnosticValue::Profile(profile))
    }
}

/// Horizontally averaged product of two fields, both interpolated to cell centers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductAverage {
    pub first: String,
    pub second: String,
}

impl ProductAverage {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
        }
    }
}

impl<G: Grid> Diagnostic<G> for ProductAverage {
    fn evaluate(&mut self, state: &ModelState<G>) -> Result<DiagnosticValue> {
        let (a, b) = (lookup(state, &self.first)?, lookup(state, &self.second)?);
        let grid = a.grid().as_ref();
        let profile = level_average(grid, Location::CENTER, grid.size(), |idx| {
            at_center(a, idx) * at_center(b, idx)
        });
        Ok(DiagnosticValue::Profile(profile))
    }
}

/// Raises [`Error::NumericalInstability`] if a listed field holds a non-finite value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NaNChecker {
    pub fields: Vec<String>,
}

impl NaNChecker {
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl<G: Grid> Diagnostic<G> for NaNChecker {
    fn evaluate(&mut self, state: &ModelState<G>) -> Result<DiagnosticValue> {
        for name in &self.fields {
            if lookup(state, name)?.first_non_finite().is_some() {
                return Err(Error::NumericalInstability {
                    field: name.clone(),
                    iteration: state.clock.iteration,
                    time: state.clock.time,
                });
            }
        }
        Ok(DiagnosticValue::None)
    }

    fn is_fatal(&self) -> bool {
        true
    }
}

/// Largest absolute interior value of a field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldMaximum {
    pub field: String,
}

impl FieldMaximum {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl<G: Grid> Diagnostic<G> for FieldMaximum {
    fn evaluate(&mut self, state: &ModelState<G>) -> Result<DiagnosticValue> {
        Ok(DiagnosticValue::Scalar(lookup(state, &self.field)?.max_abs()))
    }
}

/// Largest advective Courant number `|u| Δt / Δx` over all velocity components for the
/// time step of the last completed step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AdvectiveCfl;

impl<G: Grid> Diagnostic<G> for AdvectiveCfl {
    fn evaluate(&mut self, state: &ModelState<G>) -> Result<DiagnosticValue> {
        let Some(dt) = state.clock.last_dt else {
            return Ok(DiagnosticValue::None);
        };
        let grid = state.u.grid();
        let courant = |f: &Field<G>, spacing: &dyn Fn([isize; 3]) -> f64| {
            f.interior_indices()
                .map(|idx| f[idx].abs() * dt / spacing(idx))
                .fold(0.0, f64::max)
        };
        let cfl = courant(&state.u, &|[_, j, _]| grid.dx(Loc::Center, j))
            .max(courant(&state.v, &|[_, j, _]| grid.dy(Loc::Face, j)))
            .max(courant(&state.w, &|[_, _, k]| grid.dz(Loc::Face, k)));
        Ok(DiagnosticValue::Scalar(cfl))
    }
}
