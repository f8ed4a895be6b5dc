//! Location generic finite-volume operators.
//!
//! Differences and interpolations along an axis move a quantity between cell centers and
//! cell faces. They are written in terms of the location of the *result*: evaluated at a
//! center, the two neighbours are the faces `n` and `n + 1`; evaluated at a face, the
//! neighbours are the centers `n - 1` and `n`. Metrics are always taken at the same index
//! and location the operator is evaluated at.

use crate::field::Field;
use crate::grid::{Axis, Grid, Loc, Location};

/// Move `idx` by `by` points along `axis`.
#[inline]
pub fn shift(idx: [isize; 3], axis: Axis, by: isize) -> [isize; 3] {
    let mut out = idx;
    out[axis.index()] += by;
    out
}

/// Neighbours of the point `idx` at `at` along `axis`, lower first.
#[inline]
fn neighbours(at: Loc, axis: Axis, idx: [isize; 3]) -> Option<([isize; 3], [isize; 3])> {
    match at {
        Loc::Center => Some((idx, shift(idx, axis, 1))),
        Loc::Face => Some((shift(idx, axis, -1), idx)),
        Loc::Reduced => None,
    }
}

/// Difference of `phi` along `axis`, evaluated at a point located at `at`.
#[inline]
pub fn delta_at(at: Loc, axis: Axis, idx: [isize; 3], phi: &dyn Fn([isize; 3]) -> f64) -> f64 {
    neighbours(at, axis, idx).map_or(0.0, |(lo, hi)| phi(hi) - phi(lo))
}

/// Mean of `phi` along `axis`, evaluated at a point located at `at`.
#[inline]
pub fn average_at(at: Loc, axis: Axis, idx: [isize; 3], phi: &dyn Fn([isize; 3]) -> f64) -> f64 {
    neighbours(at, axis, idx).map_or_else(|| phi(idx), |(lo, hi)| 0.5 * (phi(hi) + phi(lo)))
}

/// Difference of a field along `axis`. The result lives at the flipped location.
pub fn diff<G: Grid>(f: &Field<G>, axis: Axis, idx: [isize; 3]) -> f64 {
    delta_at(f.location().along(axis).flip(), axis, idx, &|p| f[p])
}

/// Interpolation of a field along `axis` onto the flipped location.
pub fn interp<G: Grid>(f: &Field<G>, axis: Axis, idx: [isize; 3]) -> f64 {
    average_at(f.location().along(axis).flip(), axis, idx, &|p| f[p])
}

/// Grid spacing along `axis` at `loc`.
pub fn spacing<G: Grid + ?Sized>(grid: &G, axis: Axis, loc: Location, idx: [isize; 3]) -> f64 {
    match axis {
        Axis::X => grid.dx(loc.y, idx[1]),
        Axis::Y => grid.dy(loc.y, idx[1]),
        Axis::Z => grid.dz(loc.z, idx[2]),
    }
}

/// Area of the face normal to `axis` at `loc`.
pub fn area<G: Grid + ?Sized>(grid: &G, axis: Axis, loc: Location, idx: [isize; 3]) -> f64 {
    match axis {
        Axis::X => grid.area_x(loc.y, idx[1], loc.z, idx[2]),
        Axis::Y => grid.area_y(loc.y, idx[1], loc.z, idx[2]),
        Axis::Z => grid.area_z(loc.y, idx[1]),
    }
}

pub fn volume<G: Grid + ?Sized>(grid: &G, loc: Location, idx: [isize; 3]) -> f64 {
    grid.volume(loc.y, idx[1], loc.z, idx[2])
}

/// Derivative of a field along `axis`, located at the flipped location.
pub fn gradient<G: Grid>(f: &Field<G>, axis: Axis, idx: [isize; 3]) -> f64 {
    let at = f.location().flipped(axis);
    diff(f, axis, idx) / spacing(f.grid().as_ref(), axis, at, idx)
}

/// Divergence of area integrated fluxes, evaluated in the control volume at `loc`.
///
/// `flux(axis, p)` returns the flux through the face normal to `axis` at index `p`, i.e.
/// at location `loc.flipped(axis)`.
pub fn flux_divergence<G: Grid + ?Sized>(
    grid: &G,
    loc: Location,
    idx: [isize; 3],
    axes: &[Axis],
    flux: &dyn Fn(Axis, [isize; 3]) -> f64,
) -> f64 {
    let net: f64 = axes
        .iter()
        .map(|&axis| delta_at(loc.along(axis), axis, idx, &|p| flux(axis, p)))
        .sum();
    net / volume(grid, loc, idx)
}

/// Diffusive tendency `∇·(κ∇φ)` of a quantity located at `loc`, restricted to `axes`.
///
/// `kappa` is evaluated at the face locations the fluxes live on.
pub fn diffusive_flux_divergence<G: Grid + ?Sized>(
    grid: &G,
    loc: Location,
    idx: [isize; 3],
    axes: &[Axis],
    phi: &dyn Fn([isize; 3]) -> f64,
    kappa: &dyn Fn(Location, [isize; 3]) -> f64,
) -> f64 {
    flux_divergence(grid, loc, idx, axes, &|axis, p| {
        let face = loc.flipped(axis);
        let grad = delta_at(face.along(axis), axis, p, phi) / spacing(grid, axis, face, p);
        kappa(face, p) * area(grid, axis, face, p) * grad
    })
}

/// Vertical component of the relative vorticity at [`Location::CORNER`].
pub fn vorticity<G: Grid>(u: &Field<G>, v: &Field<G>, idx: [isize; 3]) -> f64 {
    let grid = u.grid();
    let [i, j, k] = idx;
    let circulation = (grid.dy(Loc::Face, j) * v[[i, j, k]]
        - grid.dy(Loc::Face, j) * v[[i - 1, j, k]])
        - (grid.dx(Loc::Center, j) * u[[i, j, k]] - grid.dx(Loc::Center, j - 1) * u[[i, j - 1, k]]);
    circulation / grid.area_z(Loc::Face, j)
}

/// Horizontal divergence of the velocity at [`Location::CENTER`].
pub fn horizontal_divergence<G: Grid>(u: &Field<G>, v: &Field<G>, idx: [isize; 3]) -> f64 {
    let grid = u.grid().as_ref();
    flux_divergence(grid, Location::CENTER, idx, &[Axis::X, Axis::Y], &|axis, p| match axis {
        Axis::X => area(grid, axis, Location::U, p) * u[p],
        _ => area(grid, axis, Location::V, p) * v[p],
    })
}

/// Kinetic energy per unit mass at [`Location::CENTER`].
pub fn kinetic_energy<G: Grid>(u: &Field<G>, v: &Field<G>, idx: [isize; 3]) -> f64 {
    let u2 = average_at(Loc::Center, Axis::X, idx, &|p| u[p] * u[p]);
    let v2 = average_at(Loc::Center, Axis::Y, idx, &|p| v[p] * v[p]);
    0.5 * (u2 + v2)
}
