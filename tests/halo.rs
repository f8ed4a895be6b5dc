use std::sync::Arc;

use oceanfv::error::Error;
use oceanfv::boundary::{Boundary, BoundaryCondition, FieldBoundaryConditions};
use oceanfv::field::Field;
use oceanfv::grid::{Axis, Grid, LatitudeLongitudeGrid, Loc, Location, RectilinearGrid, Topology};

const LOCATIONS: [Location; 6] = [
    Location::CENTER,
    Location::U,
    Location::V,
    Location::W,
    Location::CORNER,
    Location::SURFACE,
];

const CONDITIONS: [BoundaryCondition; 4] = [
    BoundaryCondition::NoFlux,
    BoundaryCondition::Open,
    BoundaryCondition::Value(0.25),
    BoundaryCondition::Gradient(-1e-3),
];

/// Set `bc` on every non-periodic side where it is admissible for `location`.
fn conditions(topology: [Topology; 3], location: Location, bc: BoundaryCondition) -> FieldBoundaryConditions {
    let mut bcs = FieldBoundaryConditions::from_topology(topology);
    for boundary in Boundary::ALL {
        let axis = boundary.axis();
        if topology[axis.index()] == Topology::Periodic {
            continue;
        }
        let face_normal = location.along(axis) != Loc::Center;
        if face_normal && matches!(bc, BoundaryCondition::Value(_) | BoundaryCondition::Gradient(_)) {
            continue;
        }
        bcs.set(boundary, bc);
    }
    bcs.validate(topology, location, "f").unwrap();
    bcs
}

fn check_idempotent<G: Grid>(grid: &Arc<G>) {
    let topology = grid.topology();
    for location in LOCATIONS {
        for bc in CONDITIONS {
            let bcs = conditions(topology, location, bc);
            let mut f = Field::new(Arc::clone(grid), location);
            f.set(|x, y, z| 1.0 + 0.3 * x.sin() + 0.01 * y + z / 7.0);
            let interior: Vec<f64> = f.interior_indices().map(|idx| f[idx]).collect();

            f.fill_halo(&bcs);
            let once = f.clone();
            f.fill_halo(&bcs);
            assert_eq!(f.as_slice(), once.as_slice(), "{location:?} with {bc:?}");

            let after: Vec<f64> = f.interior_indices().map(|idx| f[idx]).collect();
            assert_eq!(interior, after, "interior changed for {location:?} with {bc:?}");
            assert!(f.as_slice().iter().all(|v| v.is_finite()));
        }
    }
}

#[test]
fn halo_fill_is_idempotent_on_rectilinear_grids() {
    let topologies = [
        [Topology::Bounded, Topology::Bounded, Topology::Bounded],
        [Topology::Periodic, Topology::Bounded, Topology::Bounded],
        [Topology::Bounded, Topology::Periodic, Topology::Bounded],
        [Topology::Periodic, Topology::Periodic, Topology::Bounded],
    ];
    for topology in topologies {
        for halo in [[1, 1, 1], [3, 2, 2]] {
            let grid = RectilinearGrid::builder([7, 5, 4])
                .x((-3.0, 4.0))
                .y((0.0, 10.0))
                .z((-20.0, 0.0))
                .halo(halo)
                .topology(topology)
                .build()
                .unwrap();
            check_idempotent(&Arc::new(grid));
        }
    }
}

#[test]
fn halo_fill_is_idempotent_on_latitude_longitude_grids() {
    let sector = LatitudeLongitudeGrid::builder([6, 8, 3])
        .longitude((-20.0, 20.0))
        .latitude((-40.0, 40.0))
        .z((-500.0, 0.0))
        .halo([2, 2, 1])
        .build()
        .unwrap();
    check_idempotent(&Arc::new(sector));

    let shell = LatitudeLongitudeGrid::builder([12, 6, 2])
        .longitude((0.0, 360.0))
        .latitude((-60.0, 60.0))
        .z((-500.0, 0.0))
        .topology([Topology::Periodic, Topology::Bounded, Topology::Bounded])
        .build()
        .unwrap();
    check_idempotent(&Arc::new(shell));
}

#[test]
fn halo_wider_than_the_interior_is_rejected() {
    let narrow = RectilinearGrid::builder([4, 1, 3])
        .x((0.0, 4.0))
        .y((0.0, 1.0))
        .z((-3.0, 0.0))
        .halo([2, 2, 1])
        .topology([Topology::Periodic, Topology::Bounded, Topology::Bounded])
        .build();
    assert!(matches!(narrow, Err(Error::Validation(_))));

    // a halo as wide as the interior mirrors every interior point exactly once
    let grid = RectilinearGrid::builder([4, 2, 3])
        .x((0.0, 4.0))
        .y((0.0, 2.0))
        .z((-3.0, 0.0))
        .halo([2, 2, 1])
        .topology([Topology::Periodic, Topology::Bounded, Topology::Bounded])
        .build()
        .unwrap();
    check_idempotent(&Arc::new(grid));
}

#[test]
fn wall_faces_vanish_after_a_fill() {
    let grid = Arc::new(
        RectilinearGrid::builder([5, 4, 3])
            .x((0.0, 5.0))
            .y((0.0, 4.0))
            .z((-3.0, 0.0))
            .halo([2, 2, 2])
            .topology([Topology::Bounded, Topology::Bounded, Topology::Bounded])
            .build()
            .unwrap(),
    );
    let bcs = FieldBoundaryConditions::from_topology(grid.topology());
    let [nx, ny, nz] = grid.size().map(|n| n as isize);

    let mut u = Field::new(Arc::clone(&grid), Location::U);
    u.fill(1.0);
    u.fill_halo(&bcs);
    let mut v = Field::new(Arc::clone(&grid), Location::V);
    v.fill(1.0);
    v.fill_halo(&bcs);
    let mut w = Field::new(Arc::clone(&grid), Location::W);
    w.fill(1.0);
    w.fill_halo(&bcs);

    for k in 0..nz {
        for j in 0..ny {
            assert_eq!(u[[nx, j, k]], 0.0);
            assert_eq!(u[[-1, j, k]], -u[[1, j, k]]);
        }
        for i in 0..nx {
            assert_eq!(v[[i, ny, k]], 0.0);
        }
    }
    for j in 0..ny {
        for i in 0..nx {
            assert_eq!(w[[i, j, nz]], 0.0);
        }
    }
    // the faces along the other axes keep their values
    assert_eq!(u[[2, ny - 1, nz - 1]], 1.0);
    assert_eq!(grid.nodes(Axis::X, Loc::Face).len(), nx as usize + 1);
}
