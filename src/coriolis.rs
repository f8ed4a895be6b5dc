//! Coriolis force on a rotating planet.

use crate::error::{Error, Result};
use crate::grid::{Axis, Grid, GridKind, Loc};
use crate::state::ModelState;

/// Angular velocity of the Earth in rad/s.
pub const EARTH_ROTATION_RATE: f64 = 7.292115e-5;

/// Representation of the Coriolis parameter `f`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Coriolis {
    #[default]
    None,
    /// Constant `f`.
    FPlane { f: f64 },
    /// `f = f0 + beta * y`. Rectilinear grids only.
    BetaPlane { f0: f64, beta: f64 },
    /// `f = 2 Ω sin φ`. Latitude-longitude grids only.
    HydrostaticSpherical { rotation_rate: f64 },
}

impl Coriolis {
    /// Spherical Coriolis with the rotation rate of the Earth.
    pub fn earth() -> Self {
        Coriolis::HydrostaticSpherical {
            rotation_rate: EARTH_ROTATION_RATE,
        }
    }

    pub fn validate(&self, kind: GridKind) -> Result<()> {
        match (self, kind) {
            (Coriolis::BetaPlane { .. }, GridKind::LatitudeLongitude) => Err(Error::configuration(
                "a beta plane is only defined on rectilinear grids",
            )),
            (Coriolis::HydrostaticSpherical { .. }, GridKind::Rectilinear) => Err(
                Error::configuration("spherical Coriolis requires a latitude-longitude grid"),
            ),
            _ => Ok(()),
        }
    }

    /// Coriolis parameter at meridional location `ly` of row `j`.
    pub fn parameter<G: Grid + ?Sized>(&self, grid: &G, ly: Loc, j: isize) -> f64 {
        match *self {
            Coriolis::None => 0.0,
            Coriolis::FPlane { f } => f,
            Coriolis::BetaPlane { f0, beta } => f0 + beta * grid.node(Axis::Y, ly, j),
            Coriolis::HydrostaticSpherical { rotation_rate } => grid
                .latitude(ly, j)
                .map_or(0.0, |phi| 2.0 * rotation_rate * phi.to_radians().sin()),
        }
    }

    /// `f v` at a `u` point, `v` averaged over the four surrounding points.
    pub fn u_tendency<G: Grid>(&self, s: &ModelState<G>, idx: [isize; 3]) -> f64 {
        if *self == Coriolis::None {
            return 0.0;
        }
        let [i, j, k] = idx;
        let v = &s.v;
        let v_bar =
            0.25 * (v[[i - 1, j, k]] + v[[i, j, k]] + v[[i - 1, j + 1, k]] + v[[i, j + 1, k]]);
        self.parameter(s.v.grid().as_ref(), Loc::Center, j) * v_bar
    }

    /// `-f u` at a `v` point, `u` averaged over the four surrounding points.
    pub fn v_tendency<G: Grid>(&self, s: &ModelState<G>, idx: [isize; 3]) -> f64 {
        if *self == Coriolis::None {
            return 0.0;
        }
        let [i, j, k] = idx;
        let u = &s.u;
        let u_bar =
            0.25 * (u[[i, j - 1, k]] + u[[i + 1, j - 1, k]] + u[[i, j, k]] + u[[i + 1, j, k]]);
        -self.parameter(s.u.grid().as_ref(), Loc::Face, j) * u_bar
    }
}
