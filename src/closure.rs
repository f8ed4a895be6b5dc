//! Turbulence closures: Laplacian and biharmonic diffusion of momentum and tracers.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::field::Field;
use crate::grid::{Axis, Grid, GridKind, Location};
use crate::operators::diffusive_flux_divergence;
use crate::state::ModelState;

/// Function of position `(x, y, z)`.
pub type SpatialFn = Arc<dyn Fn(f64, f64, f64) -> f64 + Send + Sync>;

/// Value of a viscosity or diffusivity.
#[derive(Clone)]
pub enum Diffusivity {
    Constant(f64),
    /// Arbitrary function of the position of the flux.
    Function(SpatialFn),
    /// Reference value scaled by the cosine of latitude. Latitude-longitude grids only.
    CosineLatitude(f64),
}

impl fmt::Debug for Diffusivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diffusivity::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Diffusivity::Function(_) => f.write_str("Function(..)"),
            Diffusivity::CosineLatitude(v) => f.debug_tuple("CosineLatitude").field(v).finish(),
        }
    }
}

impl Default for Diffusivity {
    fn default() -> Self {
        Diffusivity::Constant(0.0)
    }
}

impl From<f64> for Diffusivity {
    fn from(value: f64) -> Self {
        Diffusivity::Constant(value)
    }
}

impl Diffusivity {
    /// Wrap a function of position.
    pub fn function(f: impl Fn(f64, f64, f64) -> f64 + Send + Sync + 'static) -> Self {
        Diffusivity::Function(Arc::new(f))
    }

    pub fn at<G: Grid + ?Sized>(&self, grid: &G, loc: Location, idx: [isize; 3]) -> f64 {
        match self {
            Diffusivity::Constant(v) => *v,
            Diffusivity::Function(f) => {
                let [x, y, z] = grid.position(loc, idx);
                f(x, y, z)
            }
            Diffusivity::CosineLatitude(v) => grid
                .latitude(loc.y, idx[1])
                .map_or(*v, |phi| v * phi.to_radians().cos()),
        }
    }

    fn validate(&self, kind: GridKind) -> Result<()> {
        if matches!(self, Diffusivity::CosineLatitude(_)) && kind != GridKind::LatitudeLongitude {
            return Err(Error::configuration(
                "a cosine-latitude diffusivity requires a latitude-longitude grid",
            ));
        }
        Ok(())
    }
}

/// Parameterization of unresolved mixing.
///
/// The viscosity acts on the horizontal velocities, the diffusivity on all tracers.
#[derive(Clone, Debug)]
pub enum Closure {
    /// Isotropic Laplacian diffusion. Rectilinear grids only.
    ScalarDiffusivity {
        viscosity: Diffusivity,
        diffusivity: Diffusivity,
    },
    /// Laplacian diffusion along x and y.
    HorizontalScalarDiffusivity {
        viscosity: Diffusivity,
        diffusivity: Diffusivity,
    },
    /// Laplacian diffusion along z.
    VerticalScalarDiffusivity {
        viscosity: Diffusivity,
        diffusivity: Diffusivity,
    },
    /// Biharmonic diffusion along x and y. Needs a halo of at least two points.
    HorizontalScalarBiharmonicDiffusivity {
        viscosity: Diffusivity,
        diffusivity: Diffusivity,
    },
}

impl Closure {
    fn parts(&self) -> (&Diffusivity, &Diffusivity, &'static [Axis]) {
        match self {
            Closure::ScalarDiffusivity {
                viscosity,
                diffusivity,
            } => (viscosity, diffusivity, &[Axis::X, Axis::Y, Axis::Z]),
            Closure::HorizontalScalarDiffusivity {
                viscosity,
                diffusivity,
            }
            | Closure::HorizontalScalarBiharmonicDiffusivity {
                viscosity,
                diffusivity,
            } => (viscosity, diffusivity, &[Axis::X, Axis::Y]),
            Closure::VerticalScalarDiffusivity {
                viscosity,
                diffusivity,
            } => (viscosity, diffusivity, &[Axis::Z]),
        }
    }

    fn is_biharmonic(&self) -> bool {
        matches!(self, Closure::HorizontalScalarBiharmonicDiffusivity { .. })
    }

    /// Halo width the stencil reaches into.
    pub fn required_halo(&self) -> usize {
        if self.is_biharmonic() {
            2
        } else {
            1
        }
    }

    pub fn validate(&self, kind: GridKind, halo: [usize; 3]) -> Result<()> {
        if matches!(self, Closure::ScalarDiffusivity { .. }) && kind != GridKind::Rectilinear {
            return Err(Error::configuration(
                "an isotropic scalar diffusivity requires a rectilinear grid",
            ));
        }
        let (viscosity, diffusivity, axes) = self.parts();
        viscosity.validate(kind)?;
        diffusivity.validate(kind)?;
        for &axis in axes {
            if halo[axis.index()] < self.required_halo() {
                return Err(Error::configuration(format!(
                    "{self:?} needs a halo of {} along {axis:?}, the grid has {}",
                    self.required_halo(),
                    halo[axis.index()]
                )));
            }
        }
        Ok(())
    }

    fn tendency<G: Grid>(&self, kappa: &Diffusivity, phi: &Field<G>, idx: [isize; 3]) -> f64 {
        let grid = phi.grid().as_ref();
        let loc = phi.location();
        let (_, _, axes) = self.parts();
        let kappa = |face: Location, p: [isize; 3]| kappa.at(grid, face, p);
        if self.is_biharmonic() {
            let laplacian =
                |p: [isize; 3]| diffusive_flux_divergence(grid, loc, p, axes, &|q| phi[q], &|_, _| 1.0);
            -diffusive_flux_divergence(grid, loc, idx, axes, &laplacian, &kappa)
        } else {
            diffusive_flux_divergence(grid, loc, idx, axes, &|q| phi[q], &kappa)
        }
    }

    pub fn u_tendency<G: Grid>(&self, s: &ModelState<G>, idx: [isize; 3]) -> f64 {
        self.tendency(self.parts().0, &s.u, idx)
    }

    pub fn v_tendency<G: Grid>(&self, s: &ModelState<G>, idx: [isize; 3]) -> f64 {
        self.tendency(self.parts().0, &s.v, idx)
    }

    pub fn tracer_tendency<G: Grid>(&self, c: &Field<G>, idx: [isize; 3]) -> f64 {
        self.tendency(self.parts().1, c, idx)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use approx::assert_relative_eq;

    use super::{Closure, Diffusivity};
    use crate::boundary::FieldBoundaryConditions;
    use crate::error::Error;
    use crate::field::Field;
    use crate::grid::{
        Grid, GridKind, LatitudeLongitudeGrid, Loc, Location, RectilinearGrid, Topology,
    };

    fn periodic_grid(halo: usize) -> Arc<RectilinearGrid> {
        Arc::new(
            RectilinearGrid::builder([16, 4, 4])
                .halo([halo, halo, 1])
                .length([16.0, 4.0, 4.0])
                .topology([Topology::Periodic, Topology::Periodic, Topology::Bounded])
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn closures_are_checked_against_the_grid() {
        let iso = Closure::ScalarDiffusivity {
            viscosity: 1.0.into(),
            diffusivity: 1.0.into(),
        };
        assert!(iso.validate(GridKind::Rectilinear, [1, 1, 1]).is_ok());
        assert!(matches!(
            iso.validate(GridKind::LatitudeLongitude, [1, 1, 1]),
            Err(Error::Configuration(_))
        ));
        let bih = Closure::HorizontalScalarBiharmonicDiffusivity {
            viscosity: 1.0.into(),
            diffusivity: 1.0.into(),
        };
        assert!(matches!(
            bih.validate(GridKind::Rectilinear, [1, 1, 1]),
            Err(Error::Configuration(_))
        ));
        assert!(bih.validate(GridKind::Rectilinear, [2, 2, 1]).is_ok());
        let cos = Closure::HorizontalScalarDiffusivity {
            viscosity: Diffusivity::CosineLatitude(1e3),
            diffusivity: 0.0.into(),
        };
        assert!(cos.validate(GridKind::Rectilinear, [1, 1, 1]).is_err());
        assert!(cos.validate(GridKind::LatitudeLongitude, [1, 1, 1]).is_ok());
    }

    #[test]
    fn diffusivity_evaluation() {
        let g = periodic_grid(1);
        let f = Diffusivity::function(|x, _, z| x - z);
        assert_relative_eq!(f.at(g.as_ref(), Location::U, [2, 0, 0]), 2.0 + 3.5);
        let ll = LatitudeLongitudeGrid::builder([1, 3, 1])
            .longitude((0.0, 1.0))
            .latitude((0.0, 90.0))
            .z((-1.0, 0.0))
            .build()
            .unwrap();
        let cos = Diffusivity::CosineLatitude(10.0);
        assert_relative_eq!(cos.at(&ll, Location::V, [0, 2, 0]), 5.0, epsilon = 1e-12);
        assert_eq!(ll.latitude(Loc::Face, 2), Some(60.0));
    }

    #[test]
    fn laplacian_damps_a_sine_wave() {
        let g = periodic_grid(1);
        let k = 2.0 * std::f64::consts::PI / 16.0;
        let mut c = Field::new(g.clone(), Location::CENTER);
        c.set(|x, _, _| (k * x).sin());
        c.fill_halo(&FieldBoundaryConditions::from_topology(g.topology()));
        let closure = Closure::HorizontalScalarDiffusivity {
            viscosity: 0.0.into(),
            diffusivity: 2.0.into(),
        };
        // discrete eigenvalue of the second difference
        let lambda = -4.0 * (k / 2.0).sin().powi(2);
        for idx in c.interior_indices() {
            assert_relative_eq!(
                closure.tracer_tendency(&c, idx),
                2.0 * lambda * c[idx],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn biharmonic_damps_with_the_squared_eigenvalue() {
        let g = periodic_grid(2);
        let k = 2.0 * std::f64::consts::PI / 16.0;
        let mut c = Field::new(g.clone(), Location::CENTER);
        c.set(|x, _, _| (k * x).cos());
        c.fill_halo(&FieldBoundaryConditions::from_topology(g.topology()));
        let closure = Closure::HorizontalScalarBiharmonicDiffusivity {
            viscosity: 0.0.into(),
            diffusivity: 3.0.into(),
        };
        let lambda = -4.0 * (k / 2.0).sin().powi(2);
        for idx in c.interior_indices() {
            assert_relative_eq!(
                closure.tracer_tendency(&c, idx),
                -3.0 * lambda * lambda * c[idx],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn vertical_diffusion_respects_no_flux_walls() {
        let g = periodic_grid(1);
        let mut c = Field::new(g.clone(), Location::CENTER);
        c.set(|_, _, z| z);
        c.fill_halo(&FieldBoundaryConditions::from_topology(g.topology()));
        let closure = Closure::VerticalScalarDiffusivity {
            viscosity: 0.0.into(),
            diffusivity: 1.0.into(),
        };
        let total: f64 = c
            .interior_indices()
            .map(|idx| closure.tracer_tendency(&c, idx))
            .sum();
        assert_relative_eq!(total, 0.0, epsilon = 1e-12);
        assert!(closure.tracer_tendency(&c, [0, 0, 0]) > 0.0);
    }
}
