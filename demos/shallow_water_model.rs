//! Gravity waves in a closed basin
//!
//! A single layer of fluid in a rectangular basin enclosed by solid walls is released from
//! rest with a Gaussian bump of the free surface. The bump collapses into gravity waves
//! that are deflected by rotation. The free surface is stepped with sub-cycling, momentum
//! with the third order Adams-Bashforth scheme and without viscosity.

use std::sync::Arc;

use oceanfv::{
    coriolis::Coriolis,
    diagnostics::{FieldMaximum, Schedule},
    free_surface::{ExplicitFreeSurface, FreeSurface},
    grid::{Grid, Loc, RectilinearGrid, Topology},
    model::{HydrostaticFreeSurfaceModel, InitialCondition},
    simulation::{OutputWriter, Simulation, WriterError},
    state::ModelState,
    timestepping::TimeStepper,
};

/// Prints the free surface along the center line of the basin.
struct Transect;

impl OutputWriter<RectilinearGrid> for Transect {
    fn write(&mut self, state: &ModelState<RectilinearGrid>) -> Result<(), WriterError> {
        let eta = &state.eta;
        let [nx, ny, _] = eta.size();
        let j = ny as isize / 2;
        let line: String = (0..nx as isize)
            .step_by(4)
            .map(|i| match eta[[i, j, 0]] {
                v if v > 0.05 => '#',
                v if v > 0.01 => '+',
                v if v < -0.01 => '-',
                _ => '.',
            })
            .collect();
        println!("t = {:>8.0} s  {line}", state.clock.time);
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Shape of the domain
    let shape = [100, 100, 1];
    let length = 1.0e6;

    // Time step
    let dt = 600.0;

    // Number of time steps to integrate
    let nt = 750;

    let grid = RectilinearGrid::builder(shape)
        .x((0.0, length))
        .y((0.0, length))
        .z((-100.0, 0.0))
        .topology([Topology::Bounded, Topology::Bounded, Topology::Bounded])
        .build()?;
    let grid = Arc::new(grid);

    let mut model = HydrostaticFreeSurfaceModel::builder(Arc::clone(&grid))
        .coriolis(Coriolis::FPlane { f: 1e-4 })
        .free_surface(FreeSurface::Explicit(ExplicitFreeSurface::default()))
        .time_stepper(TimeStepper::AdamsBashforth3)
        .build()?;

    let center = 0.5 * length;
    let width = 0.1 * length;
    model.set_initial_conditions([(
        "eta",
        InitialCondition::function(move |x, y, _| {
            (-((x - center).powi(2) + (y - center).powi(2)) / width.powi(2)).exp()
        }),
    )])?;

    let volume = |state: &ModelState<RectilinearGrid>| -> f64 {
        state
            .eta
            .interior_indices()
            .map(|idx| state.eta[idx] * grid.area_z(Loc::Center, idx[1]))
            .sum()
    };
    let initial_volume = volume(model.state());

    let mut simulation = Simulation::new(model, dt)?.stop_iteration(nt);
    simulation.add_output_writer("transect", Transect, Schedule::IterationInterval(75))?;
    simulation.add_diagnostic("max_eta", FieldMaximum::new("eta"), Schedule::IterationInterval(75))?;

    let now = std::time::Instant::now();
    let summary = simulation.run()?;
    println!("Time: {} sec", now.elapsed().as_secs_f64());

    let model = simulation.model();
    for record in model.diagnostic_records("max_eta").unwrap_or_default() {
        let value = record.value.as_scalar().unwrap_or(f64::NAN);
        println!("max |η| at iteration {:>4}: {value:.4} m", record.iteration);
    }
    println!(
        "{} steps, change of volume {:.3e} m³",
        summary.steps,
        volume(model.state()) - initial_volume
    );
    Ok(())
}
