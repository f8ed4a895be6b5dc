//! Boundary conditions applied when filling the halo of a [`Field`](crate::field::Field).

use fixed_map::{Key, Map};

use crate::error::{Error, Result};
use crate::grid::{Axis, Loc, Location, Topology};

/// Rule to populate the halo at one side of the domain.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BoundaryCondition {
    /// Wrap around from the opposite interior edge.
    Periodic,
    /// Impermeable wall. Wall-normal velocities vanish at the wall, everything else has
    /// zero gradient across it.
    #[default]
    NoFlux,
    /// Linear extrapolation from the two nearest interior points.
    Open,
    /// Prescribed value at the wall.
    Value(f64),
    /// Prescribed gradient along the coordinate direction at the wall.
    Gradient(f64),
}

/// Sides of the domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Key)]
pub enum Boundary {
    West,
    East,
    South,
    North,
    Bottom,
    Top,
}

impl Boundary {
    pub const ALL: [Boundary; 6] = [
        Boundary::West,
        Boundary::East,
        Boundary::South,
        Boundary::North,
        Boundary::Bottom,
        Boundary::Top,
    ];

    /// The side of `axis` at the lower (`upper == false`) or upper end.
    pub fn on(axis: Axis, upper: bool) -> Self {
        match (axis, upper) {
            (Axis::X, false) => Boundary::West,
            (Axis::X, true) => Boundary::East,
            (Axis::Y, false) => Boundary::South,
            (Axis::Y, true) => Boundary::North,
            (Axis::Z, false) => Boundary::Bottom,
            (Axis::Z, true) => Boundary::Top,
        }
    }

    pub fn axis(self) -> Axis {
        match self {
            Boundary::West | Boundary::East => Axis::X,
            Boundary::South | Boundary::North => Axis::Y,
            Boundary::Bottom | Boundary::Top => Axis::Z,
        }
    }
}

/// Boundary conditions of one field, one per [`Boundary`].
///
/// # Examples
/// ```
/// use oceanfv::boundary::{Boundary, BoundaryCondition, FieldBoundaryConditions};
/// use oceanfv::grid::Topology;
///
/// let bcs = FieldBoundaryConditions::from_topology([Topology::Periodic, Topology::Bounded, Topology::Bounded])
///     .with(Boundary::Top, BoundaryCondition::Gradient(1e-3));
///
/// assert_eq!(bcs.get(Boundary::West), BoundaryCondition::Periodic);
/// assert_eq!(bcs.get(Boundary::North), BoundaryCondition::NoFlux);
/// assert_eq!(bcs.get(Boundary::Top), BoundaryCondition::Gradient(1e-3));
/// ```
#[derive(Clone, Debug)]
pub struct FieldBoundaryConditions {
    conditions: Map<Boundary, BoundaryCondition>,
}

impl FieldBoundaryConditions {
    /// Periodic sides on periodic axes, no-flux walls elsewhere.
    pub fn from_topology(topology: [Topology; 3]) -> Self {
        let mut conditions = Map::new();
        for boundary in Boundary::ALL {
            let bc = match topology[boundary.axis().index()] {
                Topology::Periodic => BoundaryCondition::Periodic,
                Topology::Bounded => BoundaryCondition::NoFlux,
            };
            conditions.insert(boundary, bc);
        }
        Self { conditions }
    }

    pub fn with(mut self, boundary: Boundary, bc: BoundaryCondition) -> Self {
        self.set(boundary, bc);
        self
    }

    pub fn set(&mut self, boundary: Boundary, bc: BoundaryCondition) {
        self.conditions.insert(boundary, bc);
    }

    pub fn get(&self, boundary: Boundary) -> BoundaryCondition {
        self.conditions.get(boundary).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Boundary, BoundaryCondition)> + '_ {
        self.conditions.iter().map(|(b, bc)| (b, *bc))
    }

    /// Check the conditions against the grid topology and the location of the field.
    ///
    /// Periodic sides must coincide with periodic axes. Value and gradient conditions are
    /// only defined for axes on which the field sits at cell centers.
    pub fn validate(&self, topology: [Topology; 3], location: Location, field: &str) -> Result<()> {
        for (boundary, bc) in self.iter() {
            let axis = boundary.axis();
            let loc = location.along(axis);
            if loc == Loc::Reduced {
                continue;
            }
            let periodic_axis = topology[axis.index()] == Topology::Periodic;
            let periodic_bc = bc == BoundaryCondition::Periodic;
            if periodic_axis != periodic_bc {
                return Err(Error::configuration(format!(
                    "boundary condition {bc:?} of `{field}` at {boundary:?} does not match the \
                     {:?} topology of axis {axis:?}",
                    topology[axis.index()]
                )));
            }
            if loc == Loc::Face
                && matches!(bc, BoundaryCondition::Value(_) | BoundaryCondition::Gradient(_))
            {
                return Err(Error::configuration(format!(
                    "boundary condition {bc:?} of `{field}` at {boundary:?} is not defined for \
                     fields on faces normal to {axis:?}"
                )));
            }
        }
        Ok(())
    }
}
