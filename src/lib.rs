//! A finite-volume framework for hydrostatic ocean models with a free surface
//!
//! Fields live on a staggered Arakawa C-grid, either a uniform Cartesian box or a
//! latitude-longitude shell. Velocities and tracers are stepped explicitly with
//! Adams-Bashforth or Runge-Kutta schemes, the free surface implicitly with a
//! preconditioned conjugate gradient solver or by explicit sub-cycling.
//!
//! The usual entry points are [`RectilinearGrid`]/[`LatitudeLongitudeGrid`] to describe the
//! domain, [`HydrostaticFreeSurfaceModel::builder`] to assemble the physics and
//! [`Simulation`] to run it.

pub mod advection;
pub mod architecture;
pub mod array;
pub mod boundary;
pub mod closure;
pub mod coriolis;
pub mod diagnostics;
pub mod error;
pub mod field;
pub mod forcing;
pub mod free_surface;
pub mod grid;
pub mod model;
pub mod operators;
pub mod simulation;
pub mod solver;
pub mod state;
pub mod timestepping;

pub use architecture::Architecture;
pub use error::{Error, Result};
pub use field::Field;
pub use grid::{Grid, LatitudeLongitudeGrid, Location, RectilinearGrid, Topology};
pub use model::{HydrostaticFreeSurfaceModel, InitialCondition, ModelBuilder};
pub use simulation::Simulation;
