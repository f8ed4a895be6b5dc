//! Free surface solvers.
//!
//! The free surface couples the depth integrated flow through the barotropic pressure
//! gradient `-g ∇η`. It is either treated implicitly, which requires the solution of an
//! elliptic problem for `η` every stage, or by sub-cycling an explicit barotropic system
//! within each stage. Both keep the new state in discrete agreement with the vertically
//! integrated continuity equation `∂η/∂t = -∇·U`.

use std::sync::Arc;

use log::debug;

use crate::architecture::Architecture;
use crate::array::cyclic_shift;
use crate::error::{Error, Result};
use crate::field::Field;
use crate::grid::{Axis, Grid, Loc, Location};
use crate::solver::{LinearOperator, PcgConfig, PcgResult, PcgSolver};
use crate::state::ModelState;

/// Standard gravity in m/s².
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Settings of the implicit free surface.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImplicitFreeSurface {
    pub gravitational_acceleration: f64,
    /// Weight `γ` of the new free surface in the pressure gradient.
    pub implicitness: f64,
    pub solver: PcgConfig,
}

impl Default for ImplicitFreeSurface {
    fn default() -> Self {
        Self {
            gravitational_acceleration: STANDARD_GRAVITY,
            implicitness: 1.0,
            solver: PcgConfig::default(),
        }
    }
}

/// Settings of the sub-cycled explicit free surface.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExplicitFreeSurface {
    pub gravitational_acceleration: f64,
    /// Courant number of the surface gravity waves per substep.
    pub cfl: f64,
    /// Fixed number of substeps per stage. Derived from `cfl` if not set.
    pub substeps: Option<usize>,
}

impl Default for ExplicitFreeSurface {
    fn default() -> Self {
        Self {
            gravitational_acceleration: STANDARD_GRAVITY,
            cfl: 0.7,
            substeps: None,
        }
    }
}

/// Treatment of the free surface.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FreeSurface {
    Implicit(ImplicitFreeSurface),
    Explicit(ExplicitFreeSurface),
}

impl Default for FreeSurface {
    fn default() -> Self {
        FreeSurface::Implicit(ImplicitFreeSurface::default())
    }
}

impl FreeSurface {
    pub fn gravitational_acceleration(&self) -> f64 {
        match self {
            FreeSurface::Implicit(fs) => fs.gravitational_acceleration,
            FreeSurface::Explicit(fs) => fs.gravitational_acceleration,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let g = self.gravitational_acceleration();
        if !(g.is_finite() && g > 0.0) {
            return Err(Error::validation(format!(
                "gravitational acceleration must be positive, got {g}"
            )));
        }
        match self {
            FreeSurface::Implicit(fs) => {
                if !(fs.implicitness.is_finite() && fs.implicitness > 0.0) {
                    return Err(Error::validation(format!(
                        "implicitness must be positive, got {}",
                        fs.implicitness
                    )));
                }
                fs.solver.validate()
            }
            FreeSurface::Explicit(fs) => {
                if !(fs.cfl > 0.0 && fs.cfl <= 1.0) {
                    return Err(Error::validation(format!(
                        "free surface cfl must lie in (0, 1], got {}",
                        fs.cfl
                    )));
                }
                if fs.substeps == Some(0) {
                    return Err(Error::validation("at least one substep is needed"));
                }
                Ok(())
            }
        }
    }
}

/// Vertically integrated geometry of the water columns.
///
/// Columns are numbered `c = j * nx + i`. The x face `c` is the western face of column `c`,
/// the y face `c` its southern face. Faces on a bounded edge carry zero coefficients; the
/// eastern and northern walls are not stored.
#[derive(Debug)]
struct ColumnGeometry<G> {
    grid: Arc<G>,
    nx: usize,
    ny: usize,
    periodic: [bool; 2],
    /// horizontal cell area
    area: Vec<f64>,
    /// vertically integrated face area
    ax: Vec<f64>,
    ay: Vec<f64>,
    /// integrated face area over the spacing across the face
    cx: Vec<f64>,
    cy: Vec<f64>,
}

/// Neighbour of a column through one of its faces.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Link {
    axis: Axis,
    /// index of the face in `ax`/`cx` or `ay`/`cy`
    face: usize,
    neighbour: usize,
    /// `+1` if the face lies on the upper side of the column
    sign: f64,
}

impl<G: Grid> ColumnGeometry<G> {
    fn new(grid: &Arc<G>) -> Self {
        let [nx, ny, nz] = grid.size();
        let periodic = [grid.is_periodic(Axis::X), grid.is_periodic(Axis::Y)];
        let n = nx * ny;
        let mut area = vec![0.0; n];
        let mut ax = vec![0.0; n];
        let mut ay = vec![0.0; n];
        let mut cx = vec![0.0; n];
        let mut cy = vec![0.0; n];
        for j in 0..ny {
            let jj = j as isize;
            let ax_col: f64 = (0..nz as isize)
                .map(|k| grid.area_x(Loc::Center, jj, Loc::Center, k))
                .sum();
            let ay_col: f64 = (0..nz as isize)
                .map(|k| grid.area_y(Loc::Face, jj, Loc::Center, k))
                .sum();
            for i in 0..nx {
                let c = j * nx + i;
                area[c] = grid.area_z(Loc::Center, jj);
                if i > 0 || periodic[0] {
                    ax[c] = ax_col;
                    cx[c] = ax_col / grid.dx(Loc::Center, jj);
                }
                if j > 0 || periodic[1] {
                    ay[c] = ay_col;
                    cy[c] = ay_col / grid.dy(Loc::Face, jj);
                }
            }
        }
        Self {
            grid: Arc::clone(grid),
            nx,
            ny,
            periodic,
            area,
            ax,
            ay,
            cx,
            cy,
        }
    }

    fn len(&self) -> usize {
        self.nx * self.ny
    }

    /// Faces of column `c` that connect it to another column, or to itself on a periodic
    /// axis with a single cell.
    fn links(&self, c: usize) -> impl Iterator<Item = Link> {
        let (nx, ny) = (self.nx, self.ny);
        let (i, j) = (c % nx, c / nx);
        let col = move |i: usize, j: usize| j * nx + i;
        let west = (i > 0 || self.periodic[0]).then(|| Link {
            axis: Axis::X,
            face: c,
            neighbour: col(cyclic_shift(i, -1, nx), j),
            sign: -1.0,
        });
        let east = (i + 1 < nx || self.periodic[0]).then(|| Link {
            axis: Axis::X,
            face: col(cyclic_shift(i, 1, nx), j),
            neighbour: col(cyclic_shift(i, 1, nx), j),
            sign: 1.0,
        });
        let south = (j > 0 || self.periodic[1]).then(|| Link {
            axis: Axis::Y,
            face: c,
            neighbour: col(i, cyclic_shift(j, -1, ny)),
            sign: -1.0,
        });
        let north = (j + 1 < ny || self.periodic[1]).then(|| Link {
            axis: Axis::Y,
            face: col(i, cyclic_shift(j, 1, ny)),
            neighbour: col(i, cyclic_shift(j, 1, ny)),
            sign: 1.0,
        });
        [west, east, south, north].into_iter().flatten()
    }

    fn coefficient(&self, link: &Link) -> f64 {
        match link.axis {
            Axis::X => self.cx[link.face],
            _ => self.cy[link.face],
        }
    }

    /// Vertically integrated transports through the western and southern faces.
    fn transports(&self, u: &Field<G>, v: &Field<G>) -> (Vec<f64>, Vec<f64>) {
        let nz = self.grid.size()[2] as isize;
        let mut ut = vec![0.0; self.len()];
        let mut vt = vec![0.0; self.len()];
        for c in 0..self.len() {
            let (i, j) = ((c % self.nx) as isize, (c / self.nx) as isize);
            if self.ax[c] != 0.0 {
                ut[c] = (0..nz)
                    .map(|k| u[[i, j, k]] * self.grid.area_x(Loc::Center, j, Loc::Center, k))
                    .sum();
            }
            if self.ay[c] != 0.0 {
                vt[c] = (0..nz)
                    .map(|k| v[[i, j, k]] * self.grid.area_y(Loc::Face, j, Loc::Center, k))
                    .sum();
            }
        }
        (ut, vt)
    }

    /// Net outflow of every column given face transports.
    fn divergence(&self, ut: &[f64], vt: &[f64]) -> Vec<f64> {
        (0..self.len())
            .map(|c| {
                self.links(c)
                    .map(|l| {
                        let t = match l.axis {
                            Axis::X => ut[l.face],
                            _ => vt[l.face],
                        };
                        l.sign * t
                    })
                    .sum()
            })
            .collect()
    }

    /// Subtract `scale * (η[c] - η[neighbour]) / spacing` from every level of the velocity
    /// normal to each interior face.
    fn apply_gradient(&self, u: &mut Field<G>, v: &mut Field<G>, eta: &[f64], scale: f64) {
        let nz = self.grid.size()[2] as isize;
        for c in 0..self.len() {
            let (i, j) = (c % self.nx, c / self.nx);
            let (ii, jj) = (i as isize, j as isize);
            if self.ax[c] != 0.0 {
                let west = j * self.nx + cyclic_shift(i, -1, self.nx);
                let du = scale * (eta[c] - eta[west]) / self.grid.dx(Loc::Center, jj);
                for k in 0..nz {
                    u[[ii, jj, k]] -= du;
                }
            }
            if self.ay[c] != 0.0 {
                let south = cyclic_shift(j, -1, self.ny) * self.nx + i;
                let dv = scale * (eta[c] - eta[south]) / self.grid.dy(Loc::Face, jj);
                for k in 0..nz {
                    v[[ii, jj, k]] -= dv;
                }
            }
        }
    }

    fn read(&self, f: &Field<G>) -> Vec<f64> {
        (0..self.len())
            .map(|c| f[[(c % self.nx) as isize, (c / self.nx) as isize, 0]])
            .collect()
    }

    fn write(&self, values: &[f64], f: &mut Field<G>) {
        for (c, value) in values.iter().enumerate() {
            f[[(c % self.nx) as isize, (c / self.nx) as isize, 0]] = *value;
        }
    }
}

/// Area weighted implicit free surface operator
/// `M η = Az η - γ g Δt² ∇·(A ∇η)`, which is symmetric positive definite.
struct ImplicitOperator<'a, G> {
    geometry: &'a ColumnGeometry<G>,
    coefficient: f64,
    arch: Architecture,
}

impl<G: Grid> LinearOperator for ImplicitOperator<'_, G> {
    fn len(&self) -> usize {
        self.geometry.len()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        let geo = self.geometry;
        let coefficient = self.coefficient;
        self.arch.update(y, |c, _| {
            let exchange: f64 = geo
                .links(c)
                .map(|l| geo.coefficient(&l) * (x[l.neighbour] - x[c]))
                .sum();
            geo.area[c] * x[c] - coefficient * exchange
        });
    }

    fn diagonal(&self) -> Vec<f64> {
        let geo = self.geometry;
        (0..geo.len())
            .map(|c| {
                let off: f64 = geo
                    .links(c)
                    .filter(|l| l.neighbour != c)
                    .map(|l| geo.coefficient(&l))
                    .sum();
                geo.area[c] + self.coefficient * off
            })
            .collect()
    }
}

/// Solver of the implicit free surface problem
///
/// `(Az - γ g Δt² ∇·(A∇)) η_new = Az η_old - Δt ∇·U*`
///
/// where `U*` is the vertically integrated transport of the explicitly advanced velocity.
#[derive(Debug)]
pub struct ImplicitFreeSurfaceSolver<G> {
    geometry: ColumnGeometry<G>,
    config: ImplicitFreeSurface,
    arch: Architecture,
    pcg: PcgSolver,
}

impl<G: Grid> ImplicitFreeSurfaceSolver<G> {
    pub fn new(grid: &Arc<G>, config: ImplicitFreeSurface, arch: Architecture) -> Result<Self> {
        FreeSurface::Implicit(config).validate()?;
        let geometry = ColumnGeometry::new(grid);
        let pcg = PcgSolver::new(config.solver, arch, geometry.len());
        Ok(Self {
            geometry,
            config,
            arch,
            pcg,
        })
    }

    pub fn config(&self) -> &ImplicitFreeSurface {
        &self.config
    }

    fn coefficient(&self, dt: f64) -> f64 {
        self.config.implicitness * self.config.gravitational_acceleration * dt * dt
    }

    fn operator(&self, dt: f64) -> ImplicitOperator<'_, G> {
        ImplicitOperator {
            geometry: &self.geometry,
            coefficient: self.coefficient(dt),
            arch: self.arch,
        }
    }

    /// Right-hand side per unit area, `η_old - (Δt/Az) ∇·U*`.
    pub fn right_hand_side(&self, u: &Field<G>, v: &Field<G>, eta: &Field<G>, dt: f64) -> Field<G> {
        let geo = &self.geometry;
        let (ut, vt) = geo.transports(u, v);
        let div = geo.divergence(&ut, &vt);
        let old = geo.read(eta);
        let rhs: Vec<f64> = (0..geo.len())
            .map(|c| old[c] - dt * div[c] / geo.area[c])
            .collect();
        let mut out = eta.similar();
        geo.write(&rhs, &mut out);
        out
    }

    /// The implicit operator applied to `eta`, per unit area.
    pub fn linear_operation(&self, eta: &Field<G>, dt: f64) -> Field<G> {
        let geo = &self.geometry;
        let x = geo.read(eta);
        let mut y = vec![0.0; geo.len()];
        self.operator(dt).apply(&x, &mut y);
        let per_area: Vec<f64> = y.iter().zip(&geo.area).map(|(y, a)| y / a).collect();
        let mut out = eta.similar();
        geo.write(&per_area, &mut out);
        out
    }

    /// Solve for the new free surface given the right-hand side per unit area. The current
    /// content of `eta` is the initial guess.
    pub fn solve(&mut self, rhs: &Field<G>, dt: f64, eta: &mut Field<G>) -> Result<PcgResult> {
        let b: Vec<f64> = self
            .geometry
            .read(rhs)
            .iter()
            .zip(&self.geometry.area)
            .map(|(r, a)| r * a)
            .collect();
        let mut x = self.geometry.read(eta);
        let op = ImplicitOperator {
            geometry: &self.geometry,
            coefficient: self.config.implicitness * self.config.gravitational_acceleration * dt * dt,
            arch: self.arch,
        };
        let result = self.pcg.solve(&op, &b, &mut x)?;
        self.geometry.write(&x, eta);
        Ok(result)
    }

    /// Apply the implicit pressure gradient `-γ g Δt ∇η` to the velocities.
    pub fn correct_velocities(&self, u: &mut Field<G>, v: &mut Field<G>, eta: &Field<G>, dt: f64) {
        let eta = self.geometry.read(eta);
        let scale = self.config.implicitness * self.config.gravitational_acceleration * dt;
        self.geometry.apply_gradient(u, v, &eta, scale);
    }

    /// Advance the free surface of `state` over `dt` and correct its velocities.
    pub fn step(&mut self, state: &mut ModelState<G>, dt: f64) -> Result<PcgResult> {
        let rhs = self.right_hand_side(&state.u, &state.v, &state.eta, dt);
        let result = self.solve(&rhs, dt, &mut state.eta)?;
        self.correct_velocities(&mut state.u, &mut state.v, &state.eta, dt);
        Ok(result)
    }
}

/// Forward-backward sub-cycling of the barotropic mode.
#[derive(Debug)]
pub struct ExplicitFreeSurfaceSolver<G> {
    geometry: ColumnGeometry<G>,
    config: ExplicitFreeSurface,
    /// largest stable substep
    max_substep: f64,
}

impl<G: Grid> ExplicitFreeSurfaceSolver<G> {
    pub fn new(grid: &Arc<G>, config: ExplicitFreeSurface) -> Result<Self> {
        FreeSurface::Explicit(config).validate()?;
        let wave_speed = (config.gravitational_acceleration * grid.depth()).sqrt();
        let max_substep = config.cfl * grid.min_horizontal_spacing() / wave_speed;
        Ok(Self {
            geometry: ColumnGeometry::new(grid),
            config,
            max_substep,
        })
    }

    /// Number of substeps used for a stage of length `dt`.
    pub fn substeps(&self, dt: f64) -> usize {
        self.config
            .substeps
            .unwrap_or_else(|| (dt / self.max_substep).ceil().max(1.0) as usize)
    }

    /// Sub-cycle the barotropic system from `before` to `state` over `dt`.
    ///
    /// The barotropic forcing is the change of transport by the explicit update. The depth
    /// mean velocity of `state` is replaced by the time averaged transport of the
    /// substeps, which is the transport that moved the free surface.
    pub fn step(&mut self, before: &ModelState<G>, state: &mut ModelState<G>, dt: f64) -> usize {
        let geo = &self.geometry;
        let n = geo.len();
        let g = self.config.gravitational_acceleration;
        let substeps = self.substeps(dt);
        let tau = dt / substeps as f64;

        let (u0, v0) = geo.transports(&before.u, &before.v);
        let (u_star, v_star) = geo.transports(&state.u, &state.v);
        let forcing_u: Vec<f64> = u_star.iter().zip(&u0).map(|(a, b)| (a - b) / dt).collect();
        let forcing_v: Vec<f64> = v_star.iter().zip(&v0).map(|(a, b)| (a - b) / dt).collect();

        let mut eta = geo.read(&before.eta);
        let (mut ut, mut vt) = (u0, v0);
        let mut u_mean = vec![0.0; n];
        let mut v_mean = vec![0.0; n];
        let (nx, ny) = (geo.nx, geo.ny);
        for _ in 0..substeps {
            for c in 0..n {
                let (i, j) = (c % nx, c / nx);
                if geo.ax[c] != 0.0 {
                    let west = j * nx + cyclic_shift(i, -1, nx);
                    ut[c] += tau * (forcing_u[c] - g * geo.cx[c] * (eta[c] - eta[west]));
                }
                if geo.ay[c] != 0.0 {
                    let south = cyclic_shift(j, -1, ny) * nx + i;
                    vt[c] += tau * (forcing_v[c] - g * geo.cy[c] * (eta[c] - eta[south]));
                }
            }
            let div = geo.divergence(&ut, &vt);
            for c in 0..n {
                eta[c] -= tau * div[c] / geo.area[c];
                u_mean[c] += ut[c] / substeps as f64;
                v_mean[c] += vt[c] / substeps as f64;
            }
        }
        debug!("explicit free surface: {substeps} substeps of {tau} s");

        geo.write(&eta, &mut state.eta);
        let nz = geo.grid.size()[2] as isize;
        for c in 0..n {
            let (i, j) = ((c % nx) as isize, (c / nx) as isize);
            if geo.ax[c] != 0.0 {
                let du = (u_mean[c] - u_star[c]) / geo.ax[c];
                for k in 0..nz {
                    state.u[[i, j, k]] += du;
                }
            }
            if geo.ay[c] != 0.0 {
                let dv = (v_mean[c] - v_star[c]) / geo.ay[c];
                for k in 0..nz {
                    state.v[[i, j, k]] += dv;
                }
            }
        }
        substeps
    }
}

/// Free surface solver selected at model construction.
#[derive(Debug)]
pub enum FreeSurfaceSolver<G> {
    Implicit(ImplicitFreeSurfaceSolver<G>),
    Explicit(ExplicitFreeSurfaceSolver<G>),
}

impl<G: Grid> FreeSurfaceSolver<G> {
    pub fn new(grid: &Arc<G>, config: FreeSurface, arch: Architecture) -> Result<Self> {
        Ok(match config {
            FreeSurface::Implicit(cfg) => {
                FreeSurfaceSolver::Implicit(ImplicitFreeSurfaceSolver::new(grid, cfg, arch)?)
            }
            FreeSurface::Explicit(cfg) => {
                FreeSurfaceSolver::Explicit(ExplicitFreeSurfaceSolver::new(grid, cfg)?)
            }
        })
    }

    /// Advance the free surface over a stage of length `dt`, `before` being the state at
    /// the beginning of the stage.
    pub fn step(&mut self, before: &ModelState<G>, state: &mut ModelState<G>, dt: f64) -> Result<()> {
        match self {
            FreeSurfaceSolver::Implicit(solver) => solver.step(state, dt).map(|_| ()),
            FreeSurfaceSolver::Explicit(solver) => {
                solver.step(before, state, dt);
                Ok(())
            }
        }
    }
}

/// Net volume flux out of every water column, `∇·U` integrated over the column area.
pub fn transport_divergence<G: Grid>(u: &Field<G>, v: &Field<G>) -> Field<G> {
    let geo = ColumnGeometry::new(u.grid());
    let (ut, vt) = geo.transports(u, v);
    let div = geo.divergence(&ut, &vt);
    let mut out = Field::new(Arc::clone(u.grid()), Location::SURFACE);
    geo.write(&div, &mut out);
    out
}
