//! The hydrostatic free surface model and its builder.
//!
//! A model is assembled with a [`ModelBuilder`], which checks all options against the grid
//! and against each other. Stepping is atomic: a step is computed on a copy of the state
//! and committed only if the free surface solve and all fatal diagnostics succeed.
//!
//! # Examples
//! ```
//! use std::sync::Arc;
//! use oceanfv::grid::{RectilinearGrid, Topology};
//! use oceanfv::model::{HydrostaticFreeSurfaceModel, InitialCondition};
//!
//! let grid = RectilinearGrid::builder([16, 1, 4])
//!     .x((0.0, 1.6e5))
//!     .y((0.0, 1e4))
//!     .z((-100.0, 0.0))
//!     .topology([Topology::Bounded, Topology::Periodic, Topology::Bounded])
//!     .build()
//!     .unwrap();
//! let mut model = HydrostaticFreeSurfaceModel::builder(Arc::new(grid))
//!     .tracers(["T"])
//!     .build()
//!     .unwrap();
//! model
//!     .set_initial_conditions([
//!         ("eta", InitialCondition::function(|x, _, _| 0.1 * (-(x - 8e4).powi(2) / 1e9).exp())),
//!         ("T", 20.0.into()),
//!     ])
//!     .unwrap();
//! model.time_step(60.0).unwrap();
//!
//! assert_eq!(model.clock().iteration, 1);
//! assert!(model.state().u.max_abs() > 0.0);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use crate::advection::{MomentumAdvection, TracerAdvection};
use crate::architecture::Architecture;
use crate::boundary::FieldBoundaryConditions;
use crate::closure::Closure;
use crate::coriolis::Coriolis;
use crate::diagnostics::{Diagnostic, DiagnosticRecord, DiagnosticValue, Schedule, ScheduleTracker};
use crate::error::{Error, Result};
use crate::field::Field;
use crate::forcing::{Forcing, ForcingContext};
use crate::free_surface::{FreeSurface, FreeSurfaceSolver};
use crate::grid::{Grid, Loc, Location, Topology};
use crate::operators::horizontal_divergence;
use crate::state::{Clock, ModelState, Tendencies, TendencyHistory, RESERVED_NAMES};
use crate::timestepping::{integrate, TimeStepper};

/// Lifecycle of a model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Built, initial conditions may be set.
    Initialized,
    /// At least one step was taken.
    Stepping,
    /// Halted by a numerical instability or because a simulation reached its stop
    /// criterion. No further steps are possible.
    Stopped,
}

/// Initial value of a field.
pub enum InitialCondition {
    Constant(f64),
    /// Function of the node coordinates `(x, y, z)`.
    Function(Box<dyn Fn(f64, f64, f64) -> f64>),
}

impl InitialCondition {
    pub fn function(f: impl Fn(f64, f64, f64) -> f64 + 'static) -> Self {
        InitialCondition::Function(Box::new(f))
    }
}

impl From<f64> for InitialCondition {
    fn from(value: f64) -> Self {
        InitialCondition::Constant(value)
    }
}

impl fmt::Debug for InitialCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitialCondition::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            InitialCondition::Function(_) => f.write_str("Function(..)"),
        }
    }
}

struct RegisteredDiagnostic<G> {
    diagnostic: Box<dyn Diagnostic<G>>,
    tracker: ScheduleTracker,
    records: Vec<DiagnosticRecord>,
}

/// Builder of a [`HydrostaticFreeSurfaceModel`].
pub struct ModelBuilder<G> {
    grid: Arc<G>,
    architecture: Architecture,
    momentum_advection: MomentumAdvection,
    tracer_advection: TracerAdvection,
    free_surface: FreeSurface,
    coriolis: Coriolis,
    closures: Vec<Closure>,
    tracers: Vec<String>,
    forcing: BTreeMap<String, Forcing<G>>,
    boundary_conditions: BTreeMap<String, FieldBoundaryConditions>,
    auxiliary: BTreeMap<String, Field<G>>,
    time_stepper: TimeStepper,
}

impl<G: Grid> ModelBuilder<G> {
    pub fn new(grid: Arc<G>) -> Self {
        Self {
            grid,
            architecture: Architecture::default(),
            momentum_advection: MomentumAdvection::default(),
            tracer_advection: TracerAdvection::default(),
            free_surface: FreeSurface::default(),
            coriolis: Coriolis::default(),
            closures: Vec::new(),
            tracers: Vec::new(),
            forcing: BTreeMap::new(),
            boundary_conditions: BTreeMap::new(),
            auxiliary: BTreeMap::new(),
            time_stepper: TimeStepper::default(),
        }
    }

    pub fn architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    pub fn momentum_advection(mut self, scheme: MomentumAdvection) -> Self {
        self.momentum_advection = scheme;
        self
    }

    pub fn tracer_advection(mut self, scheme: TracerAdvection) -> Self {
        self.tracer_advection = scheme;
        self
    }

    pub fn free_surface(mut self, free_surface: FreeSurface) -> Self {
        self.free_surface = free_surface;
        self
    }

    pub fn coriolis(mut self, coriolis: Coriolis) -> Self {
        self.coriolis = coriolis;
        self
    }

    /// Add a closure. Several closures add up.
    pub fn closure(mut self, closure: Closure) -> Self {
        self.closures.push(closure);
        self
    }

    pub fn tracers<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.tracers.extend(names.into_iter().map(Into::into));
        self
    }

    /// Force the prognostic field `name` (`u`, `v` or a tracer).
    pub fn forcing(mut self, name: impl Into<String>, forcing: Forcing<G>) -> Self {
        self.forcing.insert(name.into(), forcing);
        self
    }

    pub fn boundary_conditions(mut self, name: impl Into<String>, bcs: FieldBoundaryConditions) -> Self {
        self.boundary_conditions.insert(name.into(), bcs);
        self
    }

    /// Attach a read-only field, visible to discrete forcing functions and diagnostics.
    pub fn auxiliary_field(mut self, name: impl Into<String>, field: Field<G>) -> Self {
        self.auxiliary.insert(name.into(), field);
        self
    }

    pub fn time_stepper(mut self, time_stepper: TimeStepper) -> Self {
        self.time_stepper = time_stepper;
        self
    }

    fn location_of(&self, name: &str) -> Option<Location> {
        match name {
            "u" => Some(Location::U),
            "v" => Some(Location::V),
            "w" => Some(Location::W),
            "eta" => Some(Location::SURFACE),
            _ if self.tracers.iter().any(|t| t == name) => Some(Location::CENTER),
            _ => None,
        }
    }

    fn validate(&self) -> Result<()> {
        let grid = self.grid.as_ref();
        let kind = grid.kind();
        if grid.topology()[2] != Topology::Bounded {
            return Err(Error::configuration("the vertical axis must be bounded"));
        }
        if !self.architecture.is_available() {
            return Err(Error::configuration(format!(
                "architecture {:?} is not available, enable the `parallel` feature",
                self.architecture
            )));
        }
        self.momentum_advection.validate(kind)?;
        self.coriolis.validate(kind)?;
        for closure in &self.closures {
            closure.validate(kind, grid.halo())?;
        }
        self.free_surface.validate()?;

        for (n, name) in self.tracers.iter().enumerate() {
            if name.is_empty() || RESERVED_NAMES.contains(&name.as_str()) {
                return Err(Error::validation(format!("`{name}` is not a valid tracer name")));
            }
            if self.tracers[..n].contains(name) {
                return Err(Error::validation(format!("tracer `{name}` given twice")));
            }
        }
        for name in self.forcing.keys() {
            if matches!(name.as_str(), "w" | "eta") || self.location_of(name).is_none() {
                return Err(Error::validation(format!(
                    "forcing given for `{name}`, which is not a velocity or tracer"
                )));
            }
        }
        for (name, bcs) in &self.boundary_conditions {
            let location = self.location_of(name).ok_or_else(|| {
                Error::validation(format!("boundary conditions given for unknown field `{name}`"))
            })?;
            bcs.validate(grid.topology(), location, name)?;
        }
        for (name, field) in &self.auxiliary {
            if self.location_of(name).is_some() {
                return Err(Error::validation(format!(
                    "auxiliary field `{name}` shadows a model field"
                )));
            }
            if !Arc::ptr_eq(field.grid(), &self.grid) {
                return Err(Error::validation(format!(
                    "auxiliary field `{name}` lives on a different grid"
                )));
            }
        }
        Ok(())
    }

    pub fn build(self) -> Result<HydrostaticFreeSurfaceModel<G>> {
        self.validate()?;
        let free_surface = FreeSurfaceSolver::new(&self.grid, self.free_surface, self.architecture)?;
        let topology = self.grid.topology();
        let mut state = ModelState::new(
            &self.grid,
            self.tracers.iter().map(String::as_str),
            self.auxiliary,
        );
        let default_bcs = FieldBoundaryConditions::from_topology(topology);
        state.fill_halos(&self.boundary_conditions, &default_bcs);
        debug!(
            "model on a {:?} grid of size {:?}, tracers {:?}, {:?}",
            self.grid.kind(),
            self.grid.size(),
            self.tracers,
            self.time_stepper
        );
        Ok(HydrostaticFreeSurfaceModel {
            walls: [topology[0] == Topology::Bounded, topology[1] == Topology::Bounded],
            grid: self.grid,
            architecture: self.architecture,
            momentum_advection: self.momentum_advection,
            tracer_advection: self.tracer_advection,
            free_surface_config: self.free_surface,
            free_surface,
            coriolis: self.coriolis,
            closures: self.closures,
            forcing: self.forcing,
            boundary_conditions: self.boundary_conditions,
            default_bcs,
            history: TendencyHistory::new(self.time_stepper.history_capacity()),
            time_stepper: self.time_stepper,
            state,
            phase: Phase::Initialized,
            diagnostics: BTreeMap::new(),
        })
    }
}

/// Hydrostatic Boussinesq ocean model with a free surface.
pub struct HydrostaticFreeSurfaceModel<G> {
    grid: Arc<G>,
    architecture: Architecture,
    momentum_advection: MomentumAdvection,
    tracer_advection: TracerAdvection,
    free_surface_config: FreeSurface,
    free_surface: FreeSurfaceSolver<G>,
    coriolis: Coriolis,
    closures: Vec<Closure>,
    forcing: BTreeMap<String, Forcing<G>>,
    boundary_conditions: BTreeMap<String, FieldBoundaryConditions>,
    default_bcs: FieldBoundaryConditions,
    time_stepper: TimeStepper,
    history: TendencyHistory<G>,
    /// bounded x and y
    walls: [bool; 2],
    state: ModelState<G>,
    phase: Phase,
    diagnostics: BTreeMap<String, RegisteredDiagnostic<G>>,
}

impl<G: Grid> fmt::Debug for HydrostaticFreeSurfaceModel<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HydrostaticFreeSurfaceModel")
            .field("grid", &self.grid)
            .field("architecture", &self.architecture)
            .field("time_stepper", &self.time_stepper)
            .field("free_surface", &self.free_surface_config)
            .field("clock", &self.state.clock)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl<G: Grid> HydrostaticFreeSurfaceModel<G> {
    pub fn builder(grid: Arc<G>) -> ModelBuilder<G> {
        ModelBuilder::new(grid)
    }

    pub fn grid(&self) -> &Arc<G> {
        &self.grid
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn time_stepper(&self) -> TimeStepper {
        self.time_stepper
    }

    pub fn free_surface(&self) -> &FreeSurface {
        &self.free_surface_config
    }

    pub fn coriolis(&self) -> &Coriolis {
        &self.coriolis
    }

    pub fn closures(&self) -> &[Closure] {
        &self.closures
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &ModelState<G> {
        &self.state
    }

    pub fn clock(&self) -> &Clock {
        &self.state.clock
    }

    pub fn field(&self, name: &str) -> Option<&Field<G>> {
        self.state.field(name)
    }

    /// Mutable access to a field for direct manipulation between steps. Halos are
    /// refreshed at the beginning of the next step.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field<G>> {
        self.state.field_mut(name)
    }

    pub fn tracer_names(&self) -> impl Iterator<Item = &str> {
        self.state.tracers.keys().map(String::as_str)
    }

    /// Halt the model for good once a run is complete.
    pub(crate) fn stop(&mut self) {
        self.phase = Phase::Stopped;
    }

    /// Set fields before the first time step.
    ///
    /// The vertical velocity is diagnosed and cannot be set. Wall normal velocities are
    /// forced to zero.
    pub fn set_initial_conditions<'a>(
        &mut self,
        conditions: impl IntoIterator<Item = (&'a str, InitialCondition)>,
    ) -> Result<()> {
        if self.phase != Phase::Initialized {
            return Err(Error::InvalidState(
                "initial conditions can only be set before the first time step".into(),
            ));
        }
        let conditions: Vec<_> = conditions.into_iter().collect();
        for (name, _) in &conditions {
            if *name == "w" {
                return Err(Error::validation("the vertical velocity is diagnosed and cannot be set"));
            }
            if self.state.field(name).is_none() || self.state.auxiliary.contains_key(*name) {
                return Err(Error::validation(format!("unknown field `{name}`")));
            }
        }
        for (name, condition) in conditions {
            if let Some(field) = self.state.field_mut(name) {
                match condition {
                    InitialCondition::Constant(v) => field.set(|_, _, _| v),
                    InitialCondition::Function(f) => field.set(f),
                }
            }
        }
        self.enforce_walls();
        prepare(
            self.architecture,
            &self.boundary_conditions,
            &self.default_bcs,
            &mut self.state,
        );
        Ok(())
    }

    fn enforce_walls(&mut self) {
        let [nx, ny, nz] = self.grid.size();
        if self.walls[0] {
            for k in 0..nz as isize {
                for j in 0..ny as isize {
                    self.state.u[[0, j, k]] = 0.0;
                }
            }
        }
        if self.walls[1] {
            for k in 0..nz as isize {
                for i in 0..nx as isize {
                    self.state.v[[i, 0, k]] = 0.0;
                }
            }
        }
    }

    /// Register a diagnostic under `name`.
    pub fn add_diagnostic(
        &mut self,
        name: impl Into<String>,
        diagnostic: impl Diagnostic<G> + 'static,
        schedule: Schedule,
    ) -> Result<()> {
        let name = name.into();
        if self.diagnostics.contains_key(&name) {
            return Err(Error::validation(format!("diagnostic `{name}` registered twice")));
        }
        let tracker = ScheduleTracker::new(schedule, &self.state.clock)?;
        self.diagnostics.insert(
            name,
            RegisteredDiagnostic {
                diagnostic: Box::new(diagnostic),
                tracker,
                records: Vec::new(),
            },
        );
        Ok(())
    }

    /// All recorded values of a diagnostic, oldest first.
    pub fn diagnostic_records(&self, name: &str) -> Option<&[DiagnosticRecord]> {
        self.diagnostics.get(name).map(|d| d.records.as_slice())
    }

    pub fn latest_diagnostic(&self, name: &str) -> Option<&DiagnosticValue> {
        self.diagnostics
            .get(name)
            .and_then(|d| d.records.last())
            .map(|r| &r.value)
    }

    /// Advance the model by `dt`.
    ///
    /// Multistep schemes restart from a single step whenever `dt` differs from the previous
    /// step. On error the state is left as it was before the call. A numerical instability
    /// stops the model, any other error leaves it ready for another attempt, e.g. with a
    /// smaller time step.
    pub fn time_step(&mut self, dt: f64) -> Result<()> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(Error::validation(format!("time step must be positive, got {dt}")));
        }
        if self.phase == Phase::Stopped {
            return Err(Error::InvalidState("the model is stopped".into()));
        }
        let clock = self.state.clock;
        for (name, forcing) in self.forcing.iter_mut() {
            if let Some(field) = self.state.field(name) {
                forcing.refresh(field, &clock);
            }
        }

        // fixed Adams-Bashforth weights assume a constant step
        let restart = clock
            .last_dt
            .is_some_and(|last| (last - dt).abs() > 1e-12 * dt);
        if restart && self.time_stepper.is_multistep() {
            debug!("time step changed to {dt} s, restarting {:?}", self.time_stepper);
        }

        let mut candidate = self.state.clone();
        let result = self
            .advance(&mut candidate, dt, restart)
            .and_then(|newest| Ok((newest, self.check(&candidate)?)));
        let (newest, fatal_records) = match result {
            Ok(ok) => ok,
            Err(err) => {
                let err = err.at_clock(clock.iteration + 1, clock.time + dt);
                if err.is_fatal() {
                    warn!("stopping model: {err}");
                    self.phase = Phase::Stopped;
                }
                return Err(err);
            }
        };

        self.state = candidate;
        if restart {
            self.history.clear();
        }
        if let Some(tendencies) = newest {
            self.history.push(tendencies);
        }
        self.phase = Phase::Stepping;
        let clock = self.state.clock;
        for (name, value) in fatal_records {
            if let Some(entry) = self.diagnostics.get_mut(&name) {
                entry.records.push(DiagnosticRecord {
                    iteration: clock.iteration,
                    time: clock.time,
                    value,
                });
                entry.tracker.fired(&clock);
            }
        }
        for (name, entry) in self.diagnostics.iter_mut() {
            if entry.diagnostic.is_fatal() || !entry.tracker.is_due(&clock) {
                continue;
            }
            match entry.diagnostic.evaluate(&self.state) {
                Ok(value) => entry.records.push(DiagnosticRecord {
                    iteration: clock.iteration,
                    time: clock.time,
                    value,
                }),
                Err(err) => warn!("diagnostic `{name}` failed: {err}"),
            }
            entry.tracker.fired(&clock);
        }
        Ok(())
    }

    /// Run the fatal diagnostics that are due on the candidate state.
    fn check(&mut self, candidate: &ModelState<G>) -> Result<Vec<(String, DiagnosticValue)>> {
        let mut records = Vec::new();
        for (name, entry) in self.diagnostics.iter_mut() {
            if entry.diagnostic.is_fatal() && entry.tracker.is_due(&candidate.clock) {
                records.push((name.clone(), entry.diagnostic.evaluate(candidate)?));
            }
        }
        Ok(records)
    }

    /// Compute one full step on `s`. Returns the tendencies to remember for multistep
    /// schemes. With `restart` past tendencies are ignored.
    fn advance(
        &mut self,
        s: &mut ModelState<G>,
        dt: f64,
        restart: bool,
    ) -> Result<Option<Tendencies<G>>> {
        let stepper = self.time_stepper;
        let start = s.clock.time;
        let mut elapsed = 0.0;
        let mut stages: Vec<Tendencies<G>> = Vec::new();
        let mut newest = None;
        let explicit_surface = matches!(self.free_surface, FreeSurfaceSolver::Explicit(_));
        let available = if restart { 0 } else { self.history.len() };

        for stage in 0..stepper.stage_count() {
            prepare(
                self.architecture,
                &self.boundary_conditions,
                &self.default_bcs,
                s,
            );
            let g = self.tendencies(s);
            let before = explicit_surface.then(|| s.clone());
            let fraction = if stepper == TimeStepper::RungeKutta3 {
                stages.push(g);
                let st = stepper.stage(stage, stages.len());
                let first = stages.len() - st.coefficients.len();
                let past: Vec<&Tendencies<G>> = stages[first..].iter().collect();
                step_fields(self.architecture, st.coefficients, &past, dt, s);
                st.dt_fraction
            } else {
                let st = stepper.stage(0, available + 1);
                let mut past: Vec<&Tendencies<G>> =
                    self.history.last(st.coefficients.len() - 1).collect();
                past.push(&g);
                step_fields(self.architecture, st.coefficients, &past, dt, s);
                if stepper.is_multistep() {
                    newest = Some(g);
                }
                st.dt_fraction
            };

            let stage_dt = fraction * dt;
            let before = before.as_ref().unwrap_or(&self.state);
            self.free_surface.step(before, s, stage_dt)?;
            if s.eta.first_non_finite().is_some() {
                return Err(Error::NumericalInstability {
                    field: "eta".into(),
                    iteration: 0,
                    time: 0.0,
                });
            }
            elapsed += stage_dt;
            s.clock.time = start + elapsed;
        }

        s.clock.time = start + dt;
        s.clock.iteration += 1;
        s.clock.last_dt = Some(dt);
        prepare(
            self.architecture,
            &self.boundary_conditions,
            &self.default_bcs,
            s,
        );
        for name in s.names() {
            if let Some(field) = s.field(name) {
                if field.first_non_finite().is_some() {
                    return Err(Error::NumericalInstability {
                        field: name.to_string(),
                        iteration: 0,
                        time: 0.0,
                    });
                }
            }
        }
        Ok(newest)
    }

    /// Right-hand sides of all prognostic equations for the state `s`.
    fn tendencies(&self, s: &ModelState<G>) -> Tendencies<G> {
        let mut g = Tendencies::like(s);
        let arch = self.architecture;
        let grid = self.grid.as_ref();
        let walls = self.walls;
        let advection = self.momentum_advection;
        let coriolis = &self.coriolis;
        let closures = &self.closures;
        let forcing = &self.forcing;
        // explicit part of the surface pressure gradient
        let surface = match self.free_surface_config {
            FreeSurface::Implicit(fs) => (1.0 - fs.implicitness) * fs.gravitational_acceleration,
            FreeSurface::Explicit(_) => 0.0,
        };
        let force = |name: &str, field: &Field<G>, location, idx| {
            forcing.get(name).map_or(0.0, |f| {
                f.evaluate(&ForcingContext {
                    index: idx,
                    location,
                    clock: &s.clock,
                    state: s,
                    field,
                })
            })
        };

        g.u.compute_interior(arch, |idx| {
            let [i, j, _] = idx;
            if walls[0] && i == 0 {
                return 0.0;
            }
            let mut t = advection.u_tendency(s, idx) + coriolis.u_tendency(s, idx);
            t += closures.iter().map(|c| c.u_tendency(s, idx)).sum::<f64>();
            if surface != 0.0 {
                t -= surface * (s.eta[[i, j, 0]] - s.eta[[i - 1, j, 0]]) / grid.dx(Loc::Center, j);
            }
            t + force("u", &s.u, Location::U, idx)
        });
        g.v.compute_interior(arch, |idx| {
            let [i, j, _] = idx;
            if walls[1] && j == 0 {
                return 0.0;
            }
            let mut t = advection.v_tendency(s, idx) + coriolis.v_tendency(s, idx);
            t += closures.iter().map(|c| c.v_tendency(s, idx)).sum::<f64>();
            if surface != 0.0 {
                t -= surface * (s.eta[[i, j, 0]] - s.eta[[i, j - 1, 0]]) / grid.dy(Loc::Face, j);
            }
            t + force("v", &s.v, Location::V, idx)
        });
        for (name, gc) in g.tracers.iter_mut() {
            let c = &s.tracers[name];
            let scheme = self.tracer_advection;
            gc.compute_interior(arch, |idx| {
                scheme.tendency(s, c, idx)
                    + closures.iter().map(|cl| cl.tracer_tendency(c, idx)).sum::<f64>()
                    + force(name.as_str(), c, Location::CENTER, idx)
            });
        }
        g
    }
}

/// Combine the tendencies `past` and advance all prognostic fields but the free surface.
fn step_fields<G: Grid>(
    arch: Architecture,
    coefficients: &[f64],
    past: &[&Tendencies<G>],
    dt: f64,
    s: &mut ModelState<G>,
) {
    let u: Vec<&Field<G>> = past.iter().map(|t| &t.u).collect();
    integrate(arch, coefficients, &u, dt, &mut s.u);
    let v: Vec<&Field<G>> = past.iter().map(|t| &t.v).collect();
    integrate(arch, coefficients, &v, dt, &mut s.v);
    for (name, c) in s.tracers.iter_mut() {
        let gc: Vec<&Field<G>> = past.iter().map(|t| &t.tracers[name]).collect();
        integrate(arch, coefficients, &gc, dt, c);
    }
}

/// Fill all halos and diagnose the vertical velocity from continuity.
fn prepare<G: Grid>(
    arch: Architecture,
    bcs: &BTreeMap<String, FieldBoundaryConditions>,
    default: &FieldBoundaryConditions,
    s: &mut ModelState<G>,
) {
    s.fill_halos(bcs, default);
    diagnose_vertical_velocity(arch, s);
    s.w.fill_halo(bcs.get("w").unwrap_or(default));
}

/// `w` at the bottom is zero, above it follows from integrating `∂w/∂z = -∇ₕ·u` upwards.
fn diagnose_vertical_velocity<G: Grid>(arch: Architecture, s: &mut ModelState<G>) {
    let grid = Arc::clone(s.u.grid());
    let nz = grid.size()[2] as isize;
    let mut divergence = Field::new(Arc::clone(&grid), Location::CENTER);
    let (u, v) = (&s.u, &s.v);
    divergence.compute_interior(arch, |idx| {
        horizontal_divergence(u, v, idx) * grid.dz(Loc::Center, idx[2])
    });
    let [nx, ny, _] = grid.size();
    for j in 0..ny as isize {
        for i in 0..nx as isize {
            let mut w = 0.0;
            s.w[[i, j, 0]] = 0.0;
            for k in 1..nz {
                w -= divergence[[i, j, k - 1]];
                s.w[[i, j, k]] = w;
            }
        }
    }
}
