//! Basic traits and data structures to describe structured [Grids](`Grid`).
//!
//! Two grids are provided: [`RectilinearGrid`], a Cartesian grid with uniform spacing, and
//! [`LatitudeLongitudeGrid`], whose zonal spacing and cell areas vary with latitude.
//! Both are immutable once built and are shared between fields through [`Arc`](std::sync::Arc).

use std::fmt::Debug;
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Mean radius of the Earth in meters.
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Coordinate axis of a three dimensional grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Position of the axis in `[x, y, z]` ordered arrays.
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Location of a quantity within a grid box along one axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Loc {
    /// Cell center.
    Center,
    /// Cell face. Face `n` is the lower face of cell `n`.
    Face,
    /// The axis is collapsed to a single point without halo.
    Reduced,
}

impl Loc {
    /// Swap center and face. A reduced location stays reduced.
    pub fn flip(self) -> Loc {
        match self {
            Loc::Center => Loc::Face,
            Loc::Face => Loc::Center,
            Loc::Reduced => Loc::Reduced,
        }
    }
}

/// Location of a quantity within a grid box, one [`Loc`] per axis.
///
/// The prognostic variables live on an [Arakawa C-grid](https://en.wikipedia.org/wiki/Arakawa_grids#Arakawa_C-grid):
/// tracers at [`Location::CENTER`], velocity components on the faces normal to their direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    pub x: Loc,
    pub y: Loc,
    pub z: Loc,
}

impl Location {
    pub const fn new(x: Loc, y: Loc, z: Loc) -> Self {
        Self { x, y, z }
    }

    /// Tracer points.
    pub const CENTER: Location = Location::new(Loc::Center, Loc::Center, Loc::Center);
    /// Zonal velocity points.
    pub const U: Location = Location::new(Loc::Face, Loc::Center, Loc::Center);
    /// Meridional velocity points.
    pub const V: Location = Location::new(Loc::Center, Loc::Face, Loc::Center);
    /// Vertical velocity points.
    pub const W: Location = Location::new(Loc::Center, Loc::Center, Loc::Face);
    /// Vertical vorticity points.
    pub const CORNER: Location = Location::new(Loc::Face, Loc::Face, Loc::Center);
    /// Two dimensional fields at the sea surface, e.g. the free surface height.
    pub const SURFACE: Location = Location::new(Loc::Center, Loc::Center, Loc::Reduced);

    pub fn along(self, axis: Axis) -> Loc {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// The location reached by a difference or interpolation along `axis`.
    pub fn flipped(self, axis: Axis) -> Location {
        let mut out = self;
        match axis {
            Axis::X => out.x = self.x.flip(),
            Axis::Y => out.y = self.y.flip(),
            Axis::Z => out.z = self.z.flip(),
        }
        out
    }
}

/// Behavior of the domain edges along an axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Topology {
    Periodic,
    Bounded,
}

/// The family a grid belongs to. Some physics options are restricted to one family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GridKind {
    Rectilinear,
    LatitudeLongitude,
}

/// Trait defining the interface of structured grids.
///
/// Indices are interior relative: `0..N` addresses the interior, negative indices and
/// indices `>= N` address the halo. Metrics are functions of the location and of the
/// index at which they are evaluated. Where a metric depends on the meridional position
/// only, it takes the meridional location `ly` and row index `j`.
pub trait Grid: Debug + Send + Sync {
    fn kind(&self) -> GridKind;

    /// Number of interior cells along each axis.
    fn size(&self) -> [usize; 3];

    /// Halo width along each axis.
    fn halo(&self) -> [usize; 3];

    fn topology(&self) -> [Topology; 3];

    /// Coordinate of node `n` at location `loc` along `axis`.
    ///
    /// A reduced axis sits at the upper edge of the domain.
    fn node(&self, axis: Axis, loc: Loc, n: isize) -> f64;

    /// Zonal grid spacing.
    fn dx(&self, ly: Loc, j: isize) -> f64;

    /// Meridional grid spacing.
    fn dy(&self, ly: Loc, j: isize) -> f64;

    /// Vertical grid spacing.
    fn dz(&self, lz: Loc, k: isize) -> f64;

    /// Horizontal area of a grid box.
    fn area_z(&self, ly: Loc, j: isize) -> f64;

    /// Latitude in degrees of row `j`, for grids on the sphere.
    fn latitude(&self, _ly: Loc, _j: isize) -> Option<f64> {
        None
    }

    /// Total number of grid points including halos.
    fn total_size(&self) -> [usize; 3] {
        let (n, h) = (self.size(), self.halo());
        [n[0] + 2 * h[0], n[1] + 2 * h[1], n[2] + 2 * h[2]]
    }

    fn is_periodic(&self, axis: Axis) -> bool {
        self.topology()[axis.index()] == Topology::Periodic
    }

    /// Area of the face normal to x.
    fn area_x(&self, ly: Loc, j: isize, lz: Loc, k: isize) -> f64 {
        self.dy(ly, j) * self.dz(lz, k)
    }

    /// Area of the face normal to y.
    fn area_y(&self, ly: Loc, j: isize, lz: Loc, k: isize) -> f64 {
        self.dx(ly, j) * self.dz(lz, k)
    }

    fn volume(&self, ly: Loc, j: isize, lz: Loc, k: isize) -> f64 {
        self.area_z(ly, j) * self.dz(lz, k)
    }

    /// Interior node coordinates along `axis`. Faces have one more point than centers.
    fn nodes(&self, axis: Axis, loc: Loc) -> Vec<f64> {
        let n = self.size()[axis.index()] as isize;
        match loc {
            Loc::Center => (0..n).map(|i| self.node(axis, loc, i)).collect(),
            Loc::Face => (0..=n).map(|i| self.node(axis, loc, i)).collect(),
            Loc::Reduced => vec![self.node(axis, loc, 0)],
        }
    }

    /// Coordinates `[x, y, z]` of the point `idx` at `loc`.
    fn position(&self, loc: Location, idx: [isize; 3]) -> [f64; 3] {
        [
            self.node(Axis::X, loc.x, idx[0]),
            self.node(Axis::Y, loc.y, idx[1]),
            self.node(Axis::Z, loc.z, idx[2]),
        ]
    }

    /// Depth of the water column, i.e. the sum of all vertical spacings.
    fn depth(&self) -> f64 {
        (0..self.size()[2] as isize)
            .map(|k| self.dz(Loc::Center, k))
            .sum()
    }

    /// Smallest horizontal grid spacing of the interior.
    ///
    /// On the sphere this is set by the convergence of the meridians and bounds the
    /// stable time step of explicit gravity wave integration.
    fn min_horizontal_spacing(&self) -> f64 {
        (0..self.size()[1] as isize)
            .flat_map(|j| [self.dx(Loc::Center, j), self.dy(Loc::Center, j)])
            .fold(f64::INFINITY, f64::min)
    }
}

fn check_size_and_halo(size: [usize; 3], halo: [usize; 3], topology: [Topology; 3]) -> Result<()> {
    for axis in Axis::ALL {
        let d = axis.index();
        if size[d] == 0 {
            return Err(Error::validation(format!(
                "grid size must be positive along {axis:?}, got {:?}",
                size
            )));
        }
        if halo[d] == 0 {
            return Err(Error::validation(format!(
                "halo must be positive along {axis:?}, got {:?}",
                halo
            )));
        }
        // periodic wraps and wall mirrors both read `halo` interior points
        if halo[d] > size[d] {
            return Err(Error::validation(format!(
                "{:?} axis {axis:?} needs at least as many cells ({}) as halo points ({})",
                topology[d], size[d], halo[d]
            )));
        }
    }
    Ok(())
}

fn check_interval(name: &str, (lo, hi): (f64, f64)) -> Result<()> {
    if !(lo.is_finite() && hi.is_finite()) || hi <= lo {
        return Err(Error::validation(format!(
            "{name} must be a finite increasing interval, got ({lo}, {hi})"
        )));
    }
    Ok(())
}

#[inline]
fn uniform_node(start: f64, delta: f64, loc: Loc, n: isize, end: f64) -> f64 {
    match loc {
        Loc::Face => start + delta * n as f64,
        Loc::Center => start + delta * (n as f64 + 0.5),
        Loc::Reduced => end,
    }
}

/// Cartesian grid with uniform spacing along each axis.
#[derive(Clone, Debug, PartialEq)]
pub struct RectilinearGrid {
    size: [usize; 3],
    halo: [usize; 3],
    topology: [Topology; 3],
    origin: [f64; 3],
    length: [f64; 3],
    delta: [f64; 3],
}

impl RectilinearGrid {
    /// Start building a grid with `size` interior cells.
    pub fn builder(size: [usize; 3]) -> RectilinearGridBuilder {
        RectilinearGridBuilder::size(size)
    }

    /// Uniform spacing `[Δx, Δy, Δz]`.
    pub fn delta(&self) -> [f64; 3] {
        self.delta
    }

    /// Domain length `[Lx, Ly, Lz]`.
    pub fn length(&self) -> [f64; 3] {
        self.length
    }
}

impl Grid for RectilinearGrid {
    fn kind(&self) -> GridKind {
        GridKind::Rectilinear
    }

    fn size(&self) -> [usize; 3] {
        self.size
    }

    fn halo(&self) -> [usize; 3] {
        self.halo
    }

    fn topology(&self) -> [Topology; 3] {
        self.topology
    }

    fn node(&self, axis: Axis, loc: Loc, n: isize) -> f64 {
        let d = axis.index();
        uniform_node(
            self.origin[d],
            self.delta[d],
            loc,
            n,
            self.origin[d] + self.length[d],
        )
    }

    fn dx(&self, _ly: Loc, _j: isize) -> f64 {
        self.delta[0]
    }

    fn dy(&self, _ly: Loc, _j: isize) -> f64 {
        self.delta[1]
    }

    fn dz(&self, _lz: Loc, _k: isize) -> f64 {
        self.delta[2]
    }

    fn area_z(&self, _ly: Loc, _j: isize) -> f64 {
        self.delta[0] * self.delta[1]
    }
}

/// Builder for [`RectilinearGrid`].
///
/// The extent of the domain is given either by [`length`](Self::length), which places the
/// domain at `x ∈ (0, Lx)`, `y ∈ (0, Ly)`, `z ∈ (-Lz, 0)`, or by explicit bounds per axis.
/// Giving both is an error.
///
/// # Examples
/// ```
/// use oceanfv::grid::{Grid, RectilinearGrid, Topology};
///
/// let grid = RectilinearGrid::builder([128, 1, 1])
///     .x((0.0, 1.0e6))
///     .y((0.0, 1.0))
///     .z((-400.0, 0.0))
///     .topology([Topology::Bounded, Topology::Periodic, Topology::Bounded])
///     .build()
///     .unwrap();
///
/// assert_eq!(grid.total_size(), [130, 3, 3]);
/// assert_eq!(grid.dx(oceanfv::grid::Loc::Center, 0), 1.0e6 / 128.0);
/// ```
#[derive(Clone, Debug)]
pub struct RectilinearGridBuilder {
    size: [usize; 3],
    halo: [usize; 3],
    length: Option<[f64; 3]>,
    bounds: [Option<(f64, f64)>; 3],
    topology: [Topology; 3],
}

impl RectilinearGridBuilder {
    /// Set the number of interior cells. This is the first method in the build chain.
    pub fn size(size: [usize; 3]) -> Self {
        Self {
            size,
            halo: [1, 1, 1],
            length: None,
            bounds: [None; 3],
            topology: [Topology::Periodic, Topology::Periodic, Topology::Bounded],
        }
    }

    pub fn halo(self, halo: [usize; 3]) -> Self {
        Self { halo, ..self }
    }

    /// Domain length along each axis.
    pub fn length(self, length: [f64; 3]) -> Self {
        Self {
            length: Some(length),
            ..self
        }
    }

    pub fn x(mut self, bounds: (f64, f64)) -> Self {
        self.bounds[0] = Some(bounds);
        self
    }

    pub fn y(mut self, bounds: (f64, f64)) -> Self {
        self.bounds[1] = Some(bounds);
        self
    }

    pub fn z(mut self, bounds: (f64, f64)) -> Self {
        self.bounds[2] = Some(bounds);
        self
    }

    pub fn topology(self, topology: [Topology; 3]) -> Self {
        Self { topology, ..self }
    }

    pub fn build(self) -> Result<RectilinearGrid> {
        check_size_and_halo(self.size, self.halo, self.topology)?;

        let bounds: [(f64, f64); 3] = match self.length {
            Some(length) => {
                if self.bounds.iter().any(Option::is_some) {
                    return Err(Error::validation(
                        "domain length and explicit axis bounds are mutually exclusive",
                    ));
                }
                [(0.0, length[0]), (0.0, length[1]), (-length[2], 0.0)]
            }
            None => {
                let mut bounds = [(0.0, 0.0); 3];
                for axis in Axis::ALL {
                    bounds[axis.index()] = self.bounds[axis.index()].ok_or_else(|| {
                        Error::validation(format!("no extent given for axis {axis:?}"))
                    })?;
                }
                bounds
            }
        };
        for (axis, &interval) in Axis::ALL.iter().zip(bounds.iter()) {
            check_interval(&format!("extent along {axis:?}"), interval)?;
        }

        let origin = bounds.map(|(lo, _)| lo);
        let length = bounds.map(|(lo, hi)| hi - lo);
        let delta = [
            length[0] / self.size[0] as f64,
            length[1] / self.size[1] as f64,
            length[2] / self.size[2] as f64,
        ];

        Ok(RectilinearGrid {
            size: self.size,
            halo: self.halo,
            topology: self.topology,
            origin,
            length,
            delta,
        })
    }
}

/// Per-row metrics of a [`LatitudeLongitudeGrid`], covering interior and halo rows.
#[derive(Clone, Debug, PartialEq)]
struct RowMetrics {
    first: isize,
    dx_center: Vec<f64>,
    dx_face: Vec<f64>,
    area_center: Vec<f64>,
    area_face: Vec<f64>,
}

impl RowMetrics {
    fn lookup<'a>(&self, values: &'a [f64], j: isize) -> Option<&'a f64> {
        usize::try_from(j - self.first)
            .ok()
            .and_then(|n| values.get(n))
    }
}

/// Grid on a sphere spanned by longitude (x, degrees east), latitude (y, degrees north)
/// and depth (z, meters).
#[derive(Clone, Debug)]
pub struct LatitudeLongitudeGrid {
    size: [usize; 3],
    halo: [usize; 3],
    topology: [Topology; 3],
    longitude: (f64, f64),
    latitude: (f64, f64),
    z: (f64, f64),
    radius: f64,
    /// `[Δλ, Δφ]` in degrees and `Δz` in meters
    delta: [f64; 3],
    metrics: OnceLock<RowMetrics>,
}

impl LatitudeLongitudeGrid {
    /// Start building a grid with `size` interior cells.
    pub fn builder(size: [usize; 3]) -> LatitudeLongitudeGridBuilder {
        LatitudeLongitudeGridBuilder::size(size)
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    fn dlambda(&self) -> f64 {
        self.delta[0].to_radians()
    }

    fn phi(&self, ly: Loc, j: isize) -> f64 {
        let ly = if ly == Loc::Reduced { Loc::Center } else { ly };
        self.node(Axis::Y, ly, j).to_radians()
    }

    fn dx_exact(&self, ly: Loc, j: isize) -> f64 {
        self.radius * self.phi(ly, j).cos() * self.dlambda()
    }

    fn area_exact(&self, ly: Loc, j: isize) -> f64 {
        let (south, north) = match ly {
            Loc::Face => (self.phi(Loc::Center, j - 1), self.phi(Loc::Center, j)),
            _ => (self.phi(Loc::Face, j), self.phi(Loc::Face, j + 1)),
        };
        self.radius * self.radius * self.dlambda() * (north.sin() - south.sin())
    }

    fn metrics(&self) -> &RowMetrics {
        self.metrics.get_or_init(|| {
            let h = self.halo[1] as isize;
            let rows = -h..self.size[1] as isize + h;
            RowMetrics {
                first: -h,
                dx_center: rows.clone().map(|j| self.dx_exact(Loc::Center, j)).collect(),
                dx_face: rows.clone().map(|j| self.dx_exact(Loc::Face, j)).collect(),
                area_center: rows
                    .clone()
                    .map(|j| self.area_exact(Loc::Center, j))
                    .collect(),
                area_face: rows.map(|j| self.area_exact(Loc::Face, j)).collect(),
            }
        })
    }
}

impl Grid for LatitudeLongitudeGrid {
    fn kind(&self) -> GridKind {
        GridKind::LatitudeLongitude
    }

    fn size(&self) -> [usize; 3] {
        self.size
    }

    fn halo(&self) -> [usize; 3] {
        self.halo
    }

    fn topology(&self) -> [Topology; 3] {
        self.topology
    }

    fn node(&self, axis: Axis, loc: Loc, n: isize) -> f64 {
        let (lo, hi) = match axis {
            Axis::X => self.longitude,
            Axis::Y => self.latitude,
            Axis::Z => self.z,
        };
        uniform_node(lo, self.delta[axis.index()], loc, n, hi)
    }

    fn dx(&self, ly: Loc, j: isize) -> f64 {
        let m = self.metrics();
        let cached = match ly {
            Loc::Face => m.lookup(&m.dx_face, j),
            _ => m.lookup(&m.dx_center, j),
        };
        cached.copied().unwrap_or_else(|| self.dx_exact(ly, j))
    }

    fn dy(&self, _ly: Loc, _j: isize) -> f64 {
        self.radius * self.delta[1].to_radians()
    }

    fn dz(&self, _lz: Loc, _k: isize) -> f64 {
        self.delta[2]
    }

    fn area_z(&self, ly: Loc, j: isize) -> f64 {
        let m = self.metrics();
        let cached = match ly {
            Loc::Face => m.lookup(&m.area_face, j),
            _ => m.lookup(&m.area_center, j),
        };
        cached.copied().unwrap_or_else(|| self.area_exact(ly, j))
    }

    fn latitude(&self, ly: Loc, j: isize) -> Option<f64> {
        Some(self.phi(ly, j).to_degrees())
    }
}

/// Builder for [`LatitudeLongitudeGrid`].
///
/// # Examples
/// ```
/// use oceanfv::grid::{Grid, LatitudeLongitudeGrid, Loc};
///
/// let grid = LatitudeLongitudeGrid::builder([90, 90, 1])
///     .longitude((-30.0, 30.0))
///     .latitude((15.0, 75.0))
///     .z((-4000.0, 0.0))
///     .build()
///     .unwrap();
///
/// // meridians converge towards the pole
/// assert!(grid.dx(Loc::Center, 89) < grid.dx(Loc::Center, 0));
/// ```
#[derive(Clone, Debug)]
pub struct LatitudeLongitudeGridBuilder {
    size: [usize; 3],
    halo: [usize; 3],
    longitude: Option<(f64, f64)>,
    latitude: Option<(f64, f64)>,
    z: Option<(f64, f64)>,
    radius: f64,
    topology: [Topology; 3],
}

impl LatitudeLongitudeGridBuilder {
    /// Set the number of interior cells. This is the first method in the build chain.
    pub fn size(size: [usize; 3]) -> Self {
        Self {
            size,
            halo: [1, 1, 1],
            longitude: None,
            latitude: None,
            z: None,
            radius: EARTH_RADIUS,
            topology: [Topology::Bounded; 3],
        }
    }

    pub fn halo(self, halo: [usize; 3]) -> Self {
        Self { halo, ..self }
    }

    /// Longitude range in degrees east.
    pub fn longitude(self, bounds: (f64, f64)) -> Self {
        Self {
            longitude: Some(bounds),
            ..self
        }
    }

    /// Latitude range in degrees north.
    pub fn latitude(self, bounds: (f64, f64)) -> Self {
        Self {
            latitude: Some(bounds),
            ..self
        }
    }

    /// Vertical range in meters.
    pub fn z(self, bounds: (f64, f64)) -> Self {
        Self {
            z: Some(bounds),
            ..self
        }
    }

    pub fn radius(self, radius: f64) -> Self {
        Self { radius, ..self }
    }

    pub fn topology(self, topology: [Topology; 3]) -> Self {
        Self { topology, ..self }
    }

    pub fn build(self) -> Result<LatitudeLongitudeGrid> {
        check_size_and_halo(self.size, self.halo, self.topology)?;

        let longitude = self
            .longitude
            .ok_or_else(|| Error::validation("no longitude range given"))?;
        let latitude = self
            .latitude
            .ok_or_else(|| Error::validation("no latitude range given"))?;
        let z = self
            .z
            .ok_or_else(|| Error::validation("no vertical range given"))?;

        check_interval("longitude", longitude)?;
        check_interval("latitude", latitude)?;
        check_interval("z", z)?;

        if latitude.0 < -90.0 || latitude.1 > 90.0 {
            return Err(Error::validation(format!(
                "latitude must lie within [-90, 90], got {latitude:?}"
            )));
        }
        let span = longitude.1 - longitude.0;
        if span > 360.0 {
            return Err(Error::validation(format!(
                "longitude range spans more than 360 degrees: {longitude:?}"
            )));
        }
        if self.topology[0] == Topology::Periodic && (span - 360.0).abs() > 1e-10 {
            return Err(Error::validation(
                "a periodic longitude axis must span 360 degrees",
            ));
        }
        if self.topology[1] == Topology::Periodic {
            return Err(Error::validation("latitude cannot be periodic"));
        }
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(Error::validation(format!(
                "radius must be positive, got {}",
                self.radius
            )));
        }

        let delta = [
            span / self.size[0] as f64,
            (latitude.1 - latitude.0) / self.size[1] as f64,
            (z.1 - z.0) / self.size[2] as f64,
        ];

        Ok(LatitudeLongitudeGrid {
            size: self.size,
            halo: self.halo,
            topology: self.topology,
            longitude,
            latitude,
            z,
            radius: self.radius,
            delta,
            metrics: OnceLock::new(),
        })
    }
}
