//! Provides the [`Field`] type, a halo padded three dimensional array of values located
//! on a [`Grid`].

use std::ops::{Index, IndexMut};
use std::sync::Arc;

use crate::architecture::Architecture;
use crate::array::{shape, ArrND};
use crate::boundary::{Boundary, BoundaryCondition, FieldBoundaryConditions};
use crate::grid::{Axis, Grid, Loc, Location};

/// Values of a quantity at one [`Location`] of every grid box, including the halo.
///
/// Fields are indexed by interior relative signed indices `[i, j, k]`. The range `0..N`
/// addresses the interior, negative indices and indices `>= N` reach into the halo.
/// An axis with [`Loc::Reduced`] has a single point and no halo; any index along it
/// addresses that point.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use oceanfv::field::Field;
/// use oceanfv::grid::{Location, RectilinearGrid};
///
/// let grid = Arc::new(RectilinearGrid::builder([4, 4, 2]).length([1.0, 1.0, 1.0]).build().unwrap());
/// let mut t = Field::new(grid, Location::CENTER);
/// t.set(|x, _, z| x - z);
///
/// assert_eq!(t[[0, 0, 0]], 0.125 + 0.75);
/// assert_eq!(t[[-1, 0, 0]], 0.0);
/// ```
#[derive(Debug)]
pub struct Field<G> {
    grid: Arc<G>,
    location: Location,
    size: [usize; 3],
    halo: [usize; 3],
    /// storage is ordered `[z, y, x]` so that x runs fastest
    data: ArrND<3, f64>,
}

impl<G> Clone for Field<G> {
    fn clone(&self) -> Self {
        Self {
            grid: Arc::clone(&self.grid),
            location: self.location,
            size: self.size,
            halo: self.halo,
            data: self.data.clone(),
        }
    }
}

impl<G: Grid> Field<G> {
    /// Create a zero initialized field.
    pub fn new(grid: Arc<G>, location: Location) -> Self {
        let (gsize, ghalo) = (grid.size(), grid.halo());
        let mut size = [1; 3];
        let mut halo = [0; 3];
        for axis in Axis::ALL {
            let d = axis.index();
            if location.along(axis) != Loc::Reduced {
                size[d] = gsize[d];
                halo[d] = ghalo[d];
            }
        }
        let data = ArrND::full(
            0.0,
            shape([
                size[2] + 2 * halo[2],
                size[1] + 2 * halo[1],
                size[0] + 2 * halo[0],
            ]),
        );
        Self {
            grid,
            location,
            size,
            halo,
            data,
        }
    }

    /// A zero initialized field on the same grid and location.
    pub fn similar(&self) -> Self {
        Self::new(Arc::clone(&self.grid), self.location)
    }

    pub fn grid(&self) -> &Arc<G> {
        &self.grid
    }

    pub fn location(&self) -> Location {
        self.location
    }

    /// Number of interior points per axis `[x, y, z]`. Reduced axes count one point.
    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    /// Halo width per axis `[x, y, z]`. Reduced axes have none.
    pub fn halo(&self) -> [usize; 3] {
        self.halo
    }

    fn storage_index(&self, idx: [isize; 3]) -> [usize; 3] {
        let mut out = [0; 3];
        for d in 0..3 {
            if self.size[d] == 1 && self.halo[d] == 0 {
                continue;
            }
            let s = idx[d] + self.halo[d] as isize;
            debug_assert!(
                s >= 0 && (s as usize) < self.size[d] + 2 * self.halo[d],
                "index {idx:?} out of bounds for field of size {:?} with halo {:?}",
                self.size,
                self.halo
            );
            out[2 - d] = s as usize;
        }
        out
    }

    /// Iterator over all interior indices, x running fastest.
    pub fn interior_indices(&self) -> impl Iterator<Item = [isize; 3]> {
        shape([self.size[2], self.size[1], self.size[0]])
            .into_iter()
            .map(|[k, j, i]| [i as isize, j as isize, k as isize])
    }

    /// Set every value, halo included, to `value`.
    pub fn fill(&mut self, value: f64) {
        self.data.as_mut_slice().fill(value);
    }

    /// Set the interior from a function of the node coordinates `(x, y, z)`.
    pub fn set(&mut self, f: impl Fn(f64, f64, f64) -> f64) {
        let grid = Arc::clone(&self.grid);
        let location = self.location;
        for idx in self.interior_indices().collect::<Vec<_>>() {
            let [x, y, z] = grid.position(location, idx);
            self[idx] = f(x, y, z);
        }
    }

    /// Overwrite the interior with `f(index)`. Rows are distributed according to `arch`.
    pub fn compute_interior<F>(&mut self, arch: Architecture, f: F)
    where
        F: Fn([isize; 3]) -> f64 + Send + Sync,
    {
        self.update_interior(arch, |idx, _| f(idx));
    }

    /// Replace every interior value by `f(index, old_value)`.
    pub fn update_interior<F>(&mut self, arch: Architecture, f: F)
    where
        F: Fn([isize; 3], f64) -> f64 + Send + Sync,
    {
        let [nx, ny, nz] = self.size;
        let [hx, hy, hz] = self.halo;
        let tx = nx + 2 * hx;
        let ty = ny + 2 * hy;
        arch.for_each_row(self.data.as_mut_slice(), tx, |r, row| {
            let (kk, jj) = (r / ty, r % ty);
            if kk < hz || kk >= hz + nz || jj < hy || jj >= hy + ny {
                return;
            }
            let (j, k) = ((jj - hy) as isize, (kk - hz) as isize);
            for (i, value) in row[hx..hx + nx].iter_mut().enumerate() {
                *value = f([i as isize, j, k], *value);
            }
        });
    }

    /// Copy all values, halo included, from `other`.
    pub fn copy_from(&mut self, other: &Self) {
        debug_assert_eq!(self.location, other.location);
        self.data
            .as_mut_slice()
            .copy_from_slice(other.data.as_slice());
    }

    /// `self += a * other` over the whole storage.
    pub fn add_scaled(&mut self, a: f64, other: &Self) {
        debug_assert_eq!(self.location, other.location);
        self.data
            .as_mut_slice()
            .iter_mut()
            .zip(other.data.as_slice())
            .for_each(|(x, y)| *x += a * y);
    }

    /// Largest absolute interior value.
    pub fn max_abs(&self) -> f64 {
        self.interior_indices()
            .map(|idx| self[idx].abs())
            .fold(0.0, f64::max)
    }

    /// Index of the first non-finite interior value.
    pub fn first_non_finite(&self) -> Option<[isize; 3]> {
        self.interior_indices().find(|&idx| !self[idx].is_finite())
    }

    /// Raw storage including halos.
    pub fn as_slice(&self) -> &[f64] {
        self.data.as_slice()
    }

    /// Populate the halo according to `bcs`.
    ///
    /// Axes are filled in the order x, y, z, each over the full extent of the other two
    /// axes, so corners are consistent. Only halo points are written, which makes the
    /// operation idempotent.
    pub fn fill_halo(&mut self, bcs: &FieldBoundaryConditions) {
        let [nx, ny, nz] = self.size;
        let [hx, hy, hz] = self.halo;
        let t = [nx + 2 * hx, ny + 2 * hy, nz + 2 * hz];
        let strides = [1, t[0], t[0] * t[1]];

        for axis in Axis::ALL {
            let loc = self.location.along(axis);
            if loc == Loc::Reduced {
                continue;
            }
            let d = axis.index();
            let line = Line {
                stride: strides[d],
                halo: self.halo[d],
                len: self.size[d],
                face: loc == Loc::Face,
            };
            let lower = bcs.get(Boundary::on(axis, false));
            let upper = bcs.get(Boundary::on(axis, true));
            let span = |a: Axis| if a == axis { 1 } else { t[a.index()] };

            for kk in 0..span(Axis::Z) {
                for jj in 0..span(Axis::Y) {
                    let (lower_delta, upper_delta) = match axis {
                        Axis::X => {
                            let dx = self.grid.dx(self.location.y, jj as isize - hy as isize);
                            (dx, dx)
                        }
                        Axis::Y => (
                            self.grid.dy(Loc::Face, 0),
                            self.grid.dy(Loc::Face, ny as isize),
                        ),
                        Axis::Z => (
                            self.grid.dz(Loc::Face, 0),
                            self.grid.dz(Loc::Face, nz as isize),
                        ),
                    };
                    for ii in 0..span(Axis::X) {
                        let base = ii + t[0] * (jj + t[1] * kk);
                        let data = self.data.as_mut_slice();
                        // the lower mirror of a face field may reach the upper wall face
                        line.fill_upper(data, base, upper, upper_delta);
                        line.fill_lower(data, base, lower, lower_delta);
                    }
                }
            }
        }
    }
}

/// One line of storage along an axis.
struct Line {
    stride: usize,
    halo: usize,
    len: usize,
    face: bool,
}

impl Line {
    #[inline]
    fn at(&self, base: usize, s: isize) -> usize {
        base + (s + self.halo as isize) as usize * self.stride
    }

    fn fill_lower(&self, d: &mut [f64], base: usize, bc: BoundaryCondition, delta: f64) {
        let n = self.len as isize;
        for m in 1..=self.halo as isize {
            let ghost = self.at(base, -m);
            d[ghost] = match bc {
                BoundaryCondition::Periodic => d[self.at(base, n - m)],
                BoundaryCondition::NoFlux if self.face => -d[self.at(base, m)],
                BoundaryCondition::Open if n >= 2 => {
                    let (a, b) = (d[self.at(base, 0)], d[self.at(base, 1)]);
                    a + m as f64 * (a - b)
                }
                BoundaryCondition::Open => d[self.at(base, 0)],
                BoundaryCondition::Value(v) if !self.face => 2.0 * v - d[self.at(base, m - 1)],
                BoundaryCondition::Gradient(g) if !self.face => {
                    d[self.at(base, m - 1)] - g * (2 * m - 1) as f64 * delta
                }
                _ => {
                    if self.face {
                        -d[self.at(base, m)]
                    } else {
                        d[self.at(base, m - 1)]
                    }
                }
            };
        }
    }

    fn fill_upper(&self, d: &mut [f64], base: usize, bc: BoundaryCondition, delta: f64) {
        let n = self.len as isize;
        let h = self.halo as isize;
        let odd = self.face
            && !matches!(
                bc,
                BoundaryCondition::Periodic | BoundaryCondition::Open
            );
        if odd {
            // the wall face itself is stored as the first upper halo point
            let wall = self.at(base, n);
            d[wall] = 0.0;
            for m in 1..h {
                d[self.at(base, n + m)] = -d[self.at(base, n - m)];
            }
            return;
        }
        for m in 1..=h {
            let ghost = self.at(base, n - 1 + m);
            d[ghost] = match bc {
                BoundaryCondition::Periodic => d[self.at(base, m - 1)],
                BoundaryCondition::Open if n >= 2 => {
                    let (a, b) = (d[self.at(base, n - 1)], d[self.at(base, n - 2)]);
                    a + m as f64 * (a - b)
                }
                BoundaryCondition::Open => d[self.at(base, n - 1)],
                BoundaryCondition::Value(v) => 2.0 * v - d[self.at(base, n - m)],
                BoundaryCondition::Gradient(g) => {
                    d[self.at(base, n - m)] + g * (2 * m - 1) as f64 * delta
                }
                BoundaryCondition::NoFlux => d[self.at(base, n - m)],
            };
        }
    }
}

impl<G: Grid> Index<[isize; 3]> for Field<G> {
    type Output = f64;

    #[inline]
    fn index(&self, idx: [isize; 3]) -> &f64 {
        &self.data[self.storage_index(idx)]
    }
}

impl<G: Grid> IndexMut<[isize; 3]> for Field<G> {
    #[inline]
    fn index_mut(&mut self, idx: [isize; 3]) -> &mut f64 {
        let s = self.storage_index(idx);
        &mut self.data[s]
    }
}
