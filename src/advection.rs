//! Advection of momentum and tracers.

use crate::error::{Error, Result};
use crate::field::Field;
use crate::grid::{Axis, Grid, GridKind, Loc, Location};
use crate::operators::{area, average_at, flux_divergence, kinetic_energy, shift, vorticity};
use crate::state::ModelState;

const ALL_AXES: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

/// Discretization of the momentum advection term.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MomentumAdvection {
    None,
    /// Second order centered flux form. Rectilinear grids only.
    CenteredSecondOrder,
    /// Vorticity and kinetic energy gradient form.
    #[default]
    VectorInvariant,
}

impl MomentumAdvection {
    pub fn validate(self, kind: GridKind) -> Result<()> {
        if self == MomentumAdvection::CenteredSecondOrder && kind != GridKind::Rectilinear {
            return Err(Error::configuration(
                "flux form momentum advection requires a rectilinear grid",
            ));
        }
        Ok(())
    }

    /// Tendency of `u` at a [`Location::U`] point.
    pub fn u_tendency<G: Grid>(self, s: &ModelState<G>, idx: [isize; 3]) -> f64 {
        match self {
            MomentumAdvection::None => 0.0,
            MomentumAdvection::CenteredSecondOrder => -flux_form(s, &s.u, Location::U, idx),
            MomentumAdvection::VectorInvariant => {
                let (u, v, w) = (&s.u, &s.v, &s.w);
                let grid = u.grid();
                let [i, j, k] = idx;
                let zeta = 0.5 * (vorticity(u, v, [i, j, k]) + vorticity(u, v, [i, j + 1, k]));
                let v_bar = 0.25
                    * (v[[i - 1, j, k]] + v[[i, j, k]] + v[[i - 1, j + 1, k]] + v[[i, j + 1, k]]);
                let ke_gradient = (kinetic_energy(u, v, idx) - kinetic_energy(u, v, [i - 1, j, k]))
                    / grid.dx(Loc::Center, j);
                zeta * v_bar - ke_gradient - vertical_advection(u, w, Axis::X, idx)
            }
        }
    }

    /// Tendency of `v` at a [`Location::V`] point.
    pub fn v_tendency<G: Grid>(self, s: &ModelState<G>, idx: [isize; 3]) -> f64 {
        match self {
            MomentumAdvection::None => 0.0,
            MomentumAdvection::CenteredSecondOrder => -flux_form(s, &s.v, Location::V, idx),
            MomentumAdvection::VectorInvariant => {
                let (u, v, w) = (&s.u, &s.v, &s.w);
                let grid = u.grid();
                let [i, j, k] = idx;
                let zeta = 0.5 * (vorticity(u, v, [i, j, k]) + vorticity(u, v, [i + 1, j, k]));
                let u_bar = 0.25
                    * (u[[i, j - 1, k]] + u[[i + 1, j - 1, k]] + u[[i, j, k]] + u[[i + 1, j, k]]);
                let ke_gradient = (kinetic_energy(u, v, idx) - kinetic_energy(u, v, [i, j - 1, k]))
                    / grid.dy(Loc::Face, j);
                -zeta * u_bar - ke_gradient - vertical_advection(v, w, Axis::Y, idx)
            }
        }
    }
}

/// `w ∂φ/∂z` at a horizontal velocity point, `axis` being the direction of `phi`.
fn vertical_advection<G: Grid>(phi: &Field<G>, w: &Field<G>, axis: Axis, idx: [isize; 3]) -> f64 {
    let grid = phi.grid();
    let at_face = |k: isize| {
        let p = [idx[0], idx[1], k];
        let w_bar = average_at(Loc::Face, axis, p, &|q| w[q]);
        w_bar * (phi[p] - phi[[idx[0], idx[1], k - 1]]) / grid.dz(Loc::Face, k)
    };
    0.5 * (at_face(idx[2]) + at_face(idx[2] + 1))
}

/// Divergence of the centered momentum flux of `phi` (either `u` or `v`) at `loc`.
fn flux_form<G: Grid>(s: &ModelState<G>, phi: &Field<G>, loc: Location, idx: [isize; 3]) -> f64 {
    let grid = phi.grid().as_ref();
    let velocity = |axis: Axis| match axis {
        Axis::X => &s.u,
        Axis::Y => &s.v,
        Axis::Z => &s.w,
    };
    flux_divergence(grid, loc, idx, &ALL_AXES, &|axis, p| {
        let face = loc.flipped(axis);
        let carrier = velocity(axis);
        // transporting velocity interpolated onto the face of the momentum cell
        let transport = interpolate_to(carrier, face, p);
        let value = average_at(face.along(axis), axis, p, &|q| phi[q]);
        area(grid, axis, face, p) * transport * value
    })
}

/// Interpolate a velocity component onto `target`. The locations of momentum fluxes differ
/// from the transporting velocity along a single axis.
fn interpolate_to<G: Grid>(f: &Field<G>, target: Location, idx: [isize; 3]) -> f64 {
    let from = f.location();
    match ALL_AXES
        .into_iter()
        .find(|&axis| from.along(axis) != target.along(axis))
    {
        Some(axis) => average_at(target.along(axis), axis, idx, &|p| f[p]),
        None => f[idx],
    }
}

/// Discretization of tracer advection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TracerAdvection {
    None,
    /// Second order centered fluxes.
    #[default]
    Centered,
    /// First order upwind fluxes.
    Upwind,
}

impl TracerAdvection {
    /// Tendency `-∇·(uc)` of tracer `c` at a [`Location::CENTER`] point.
    pub fn tendency<G: Grid>(self, s: &ModelState<G>, c: &Field<G>, idx: [isize; 3]) -> f64 {
        if self == TracerAdvection::None {
            return 0.0;
        }
        let grid = c.grid().as_ref();
        -flux_divergence(grid, Location::CENTER, idx, &ALL_AXES, &|axis, p| {
            let (vel, face) = match axis {
                Axis::X => (&s.u, Location::U),
                Axis::Y => (&s.v, Location::V),
                Axis::Z => (&s.w, Location::W),
            };
            let speed = vel[p];
            let (upstream, downstream) = (c[shift(p, axis, -1)], c[p]);
            let value = match self {
                TracerAdvection::Upwind if speed >= 0.0 => upstream,
                TracerAdvection::Upwind => downstream,
                _ => 0.5 * (upstream + downstream),
            };
            area(grid, axis, face, p) * speed * value
        })
    }
}
