use std::sync::Arc;

use approx::assert_relative_eq;

use oceanfv::advection::MomentumAdvection;
use oceanfv::architecture::Architecture;
use oceanfv::boundary::{Boundary, BoundaryCondition, FieldBoundaryConditions};
use oceanfv::closure::Closure;
use oceanfv::coriolis::Coriolis;
use oceanfv::diagnostics::{Diagnostic, DiagnosticValue, HorizontalAverage, NaNChecker, Schedule};
use oceanfv::error::{Error, Result};
use oceanfv::field::Field;
use oceanfv::forcing::Forcing;
use oceanfv::free_surface::{ExplicitFreeSurface, FreeSurface, ImplicitFreeSurface};
use oceanfv::grid::{Axis, Grid, LatitudeLongitudeGrid, Loc, Location, RectilinearGrid, Topology};
use oceanfv::model::{HydrostaticFreeSurfaceModel, InitialCondition, Phase};
use oceanfv::solver::PcgConfig;
use oceanfv::state::ModelState;
use oceanfv::timestepping::TimeStepper;

fn basin() -> Arc<RectilinearGrid> {
    Arc::new(
        RectilinearGrid::builder([12, 10, 4])
            .x((0.0, 1.2e5))
            .y((0.0, 1.0e5))
            .z((-200.0, 0.0))
            .topology([Topology::Bounded, Topology::Bounded, Topology::Bounded])
            .build()
            .unwrap(),
    )
}

fn channel() -> Arc<RectilinearGrid> {
    Arc::new(
        RectilinearGrid::builder([8, 8, 16])
            .x((0.0, 8e3))
            .y((0.0, 8e3))
            .z((-160.0, 0.0))
            .topology([Topology::Periodic, Topology::Bounded, Topology::Bounded])
            .build()
            .unwrap(),
    )
}

fn sector() -> Arc<LatitudeLongitudeGrid> {
    Arc::new(
        LatitudeLongitudeGrid::builder([8, 8, 2])
            .longitude((0.0, 40.0))
            .latitude((10.0, 50.0))
            .z((-1000.0, 0.0))
            .build()
            .unwrap(),
    )
}

fn bump(x0: f64, y0: f64, width: f64) -> InitialCondition {
    InitialCondition::function(move |x, y, _| {
        (-((x - x0).powi(2) + (y - y0).powi(2)) / width.powi(2)).exp()
    })
}

fn surface_volume<G: Grid>(s: &ModelState<G>) -> f64 {
    let grid = s.eta.grid();
    s.eta
        .interior_indices()
        .map(|idx| s.eta[idx] * grid.area_z(Loc::Center, idx[1]))
        .sum()
}

#[test]
fn stratified_tracer_keeps_its_profile() {
    let grid = channel();
    let gradient = FieldBoundaryConditions::from_topology(grid.topology())
        .with(Boundary::Bottom, BoundaryCondition::Gradient(0.01))
        .with(Boundary::Top, BoundaryCondition::Gradient(0.01));
    let mut model = HydrostaticFreeSurfaceModel::builder(Arc::clone(&grid))
        .tracers(["T"])
        .closure(Closure::VerticalScalarDiffusivity {
            viscosity: 1e-3.into(),
            diffusivity: 1e-3.into(),
        })
        .boundary_conditions("T", gradient)
        .build()
        .unwrap();
    model
        .set_initial_conditions([("T", InitialCondition::function(|_, _, z| 20.0 + 0.01 * z))])
        .unwrap();
    model
        .add_diagnostic("T_avg", HorizontalAverage::new("T"), Schedule::IterationInterval(1))
        .unwrap();

    model.time_step(60.0).unwrap();

    let profile = model.latest_diagnostic("T_avg").unwrap().as_profile().unwrap().to_vec();
    let z = grid.nodes(Axis::Z, Loc::Center);
    assert_eq!(profile.len(), z.len());
    for (avg, z) in profile.iter().zip(z) {
        assert_relative_eq!(*avg, 20.0 + 0.01 * z, epsilon = 1e-10);
    }
    let records = model.diagnostic_records("T_avg").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].iteration, 1);
    assert_relative_eq!(records[0].time, 60.0);
}

#[test]
fn volume_is_conserved_by_every_scheme() {
    let free_surfaces = [
        FreeSurface::Implicit(ImplicitFreeSurface::default()),
        FreeSurface::Explicit(ExplicitFreeSurface::default()),
    ];
    let steppers = [
        TimeStepper::ForwardEuler,
        TimeStepper::AdamsBashforth2,
        TimeStepper::AdamsBashforth3,
        TimeStepper::RungeKutta3,
    ];
    for free_surface in free_surfaces {
        for stepper in steppers {
            let mut model = HydrostaticFreeSurfaceModel::builder(basin())
                .free_surface(free_surface)
                .time_stepper(stepper)
                .coriolis(Coriolis::FPlane { f: 1e-4 })
                .build()
                .unwrap();
            model
                .set_initial_conditions([("eta", bump(6e4, 5e4, 2e4))])
                .unwrap();
            let initial = surface_volume(model.state());
            for _ in 0..10 {
                model.time_step(120.0).unwrap();
            }
            let state = model.state();
            assert_relative_eq!(surface_volume(state), initial, max_relative = 1e-7);
            assert!(state.u.max_abs() > 0.0, "{free_surface:?} {stepper:?}");
            // walls stay closed
            for k in 0..4 {
                for j in 0..10 {
                    assert_eq!(state.u[[0, j, k]], 0.0);
                }
                for i in 0..12 {
                    assert_eq!(state.v[[i, 0, k]], 0.0);
                }
            }
            assert_eq!(model.clock().iteration, 10);
            assert_relative_eq!(model.clock().time, 1200.0, epsilon = 1e-9);
            assert_eq!(model.phase(), Phase::Stepping);
        }
    }
}

#[test]
fn model_runs_on_the_sphere() {
    let mut model = HydrostaticFreeSurfaceModel::builder(sector())
        .coriolis(Coriolis::earth())
        .closure(Closure::HorizontalScalarDiffusivity {
            viscosity: oceanfv::closure::Diffusivity::CosineLatitude(1e3),
            diffusivity: 1e2.into(),
        })
        .tracers(["T"])
        .build()
        .unwrap();
    model
        .set_initial_conditions([("eta", bump(20.0, 30.0, 8.0)), ("T", 10.0.into())])
        .unwrap();
    let initial = surface_volume(model.state());
    for _ in 0..5 {
        model.time_step(600.0).unwrap();
    }
    assert_relative_eq!(surface_volume(model.state()), initial, max_relative = 1e-7);
    assert!(model.state().u.max_abs() > 0.0);
    assert!(model.state().tracers["T"].first_non_finite().is_none());
}

#[test]
fn non_finite_values_stop_the_model_on_every_backend() {
    for arch in Architecture::available() {
        for free_surface in [
            FreeSurface::default(),
            FreeSurface::Explicit(ExplicitFreeSurface::default()),
        ] {
            let mut model = HydrostaticFreeSurfaceModel::builder(basin())
                .architecture(arch)
                .free_surface(free_surface)
                .build()
                .unwrap();
            if let Some(u) = model.field_mut("u") {
                u[[6, 5, 1]] = f64::NAN;
            }
            assert!(model.state().u.first_non_finite().is_some());
            match model.time_step(10.0) {
                Err(Error::NumericalInstability { iteration, time, .. }) => {
                    assert_eq!(iteration, 1);
                    assert_relative_eq!(time, 10.0);
                }
                other => panic!("expected an instability on {arch:?}, got {other:?}"),
            }
            assert_eq!(model.phase(), Phase::Stopped);
            assert_eq!(model.clock().iteration, 0);
            assert!(matches!(model.time_step(10.0), Err(Error::InvalidState(_))));
        }
    }
}

#[test]
fn non_finite_tracer_is_detected() {
    let mut model = HydrostaticFreeSurfaceModel::builder(channel())
        .tracers(["S"])
        .build()
        .unwrap();
    model.field_mut("S").unwrap()[[3, 3, 3]] = f64::INFINITY;
    assert!(matches!(
        model.time_step(10.0),
        Err(Error::NumericalInstability { ref field, .. }) if field == "S"
    ));
}

#[test]
fn failed_solve_leaves_the_state_untouched() {
    let config = ImplicitFreeSurface {
        solver: PcgConfig {
            rtol: 1e-15,
            max_iterations: Some(1),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut model = HydrostaticFreeSurfaceModel::builder(basin())
        .free_surface(FreeSurface::Implicit(config))
        .tracers(["T"])
        .build()
        .unwrap();
    model
        .set_initial_conditions([("eta", bump(3e4, 5e4, 2e4)), ("T", 1.0.into())])
        .unwrap();
    let before = model.state().clone();

    let err = model.time_step(300.0).unwrap_err();
    assert!(matches!(err, Error::Convergence { iterations: 1, .. }));
    assert!(!err.is_fatal());
    assert_eq!(model.phase(), Phase::Initialized);
    assert_eq!(*model.clock(), before.clock);
    assert_eq!(model.state().eta.as_slice(), before.eta.as_slice());
    assert_eq!(model.state().u.as_slice(), before.u.as_slice());
    // still steppable
    assert!(matches!(model.time_step(300.0), Err(Error::Convergence { .. })));
}

struct Veto;

impl<G: Grid> Diagnostic<G> for Veto {
    fn evaluate(&mut self, state: &ModelState<G>) -> Result<DiagnosticValue> {
        if state.clock.iteration >= 3 {
            return Err(Error::NumericalInstability {
                field: "vetoed".into(),
                iteration: state.clock.iteration,
                time: state.clock.time,
            });
        }
        Ok(DiagnosticValue::Scalar(state.clock.iteration as f64))
    }

    fn is_fatal(&self) -> bool {
        true
    }
}

#[test]
fn fatal_diagnostics_veto_the_step() {
    let mut model = HydrostaticFreeSurfaceModel::builder(channel()).build().unwrap();
    model
        .add_diagnostic("veto", Veto, Schedule::IterationInterval(1))
        .unwrap();
    model
        .add_diagnostic("nan", NaNChecker::new(["u", "v", "eta"]), Schedule::IterationInterval(1))
        .unwrap();
    model.time_step(1.0).unwrap();
    model.time_step(1.0).unwrap();
    assert!(matches!(
        model.time_step(1.0),
        Err(Error::NumericalInstability { ref field, iteration: 3, .. }) if field == "vetoed"
    ));
    assert_eq!(model.clock().iteration, 2);
    assert_eq!(model.phase(), Phase::Stopped);
    let records = model.diagnostic_records("veto").unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].value, DiagnosticValue::Scalar(2.0));
    assert!(model
        .add_diagnostic("veto", Veto, Schedule::default())
        .is_err());
}

#[test]
fn relaxation_forcing_nudges_a_tracer() {
    let rate = 1e-4;
    let mut model = HydrostaticFreeSurfaceModel::builder(channel())
        .tracers(["T"])
        .forcing("T", Forcing::relaxation(rate, |_, _, _, _| 5.0, |_, _, _| 1.0))
        .time_stepper(TimeStepper::ForwardEuler)
        .build()
        .unwrap();
    model.set_initial_conditions([("T", InitialCondition::from(1.0))]).unwrap();
    model.time_step(100.0).unwrap();
    let t = &model.state().tracers["T"];
    for idx in t.interior_indices() {
        assert_relative_eq!(t[idx], 1.0 + 100.0 * rate * 4.0, epsilon = 1e-12);
    }
}

#[test]
fn multistep_schemes_restart_when_the_step_changes() {
    let (rate, target) = (1e-3, 5.0);
    let mut model = HydrostaticFreeSurfaceModel::builder(channel())
        .tracers(["T"])
        .forcing("T", Forcing::relaxation(rate, move |_, _, _, _| target, |_, _, _| 1.0))
        .time_stepper(TimeStepper::AdamsBashforth2)
        .build()
        .unwrap();
    model.set_initial_conditions([("T", InitialCondition::from(1.0))]).unwrap();
    let g = |t: f64| rate * (target - t);

    let t0 = 1.0;
    let t1 = t0 + 10.0 * g(t0);
    let t2 = t1 + 10.0 * (1.5 * g(t1) - 0.5 * g(t0));
    // a shorter step falls back to forward Euler, then builds up its own history
    let t3 = t2 + 5.0 * g(t2);
    let t4 = t3 + 5.0 * (1.5 * g(t3) - 0.5 * g(t2));

    for (dt, expected) in [(10.0, t1), (10.0, t2), (5.0, t3), (5.0, t4)] {
        model.time_step(dt).unwrap();
        let t = &model.state().tracers["T"];
        assert_relative_eq!(t[[3, 3, 3]], expected, epsilon = 1e-12);
    }
}

#[test]
fn random_forcing_is_reproducible() {
    let build = || {
        let mut model = HydrostaticFreeSurfaceModel::builder(channel())
            .tracers(["T"])
            .forcing("T", Forcing::random(1e-3, 7))
            .build()
            .unwrap();
        for _ in 0..3 {
            model.time_step(10.0).unwrap();
        }
        model
    };
    let (a, b) = (build(), build());
    let (ta, tb) = (&a.state().tracers["T"], &b.state().tracers["T"]);
    assert!(ta.max_abs() > 0.0);
    assert_eq!(ta.as_slice(), tb.as_slice());
}

#[test]
fn discrete_forcing_sees_auxiliary_fields() {
    let grid = channel();
    let mut drag = Field::new(Arc::clone(&grid), Location::U);
    drag.fill(1e-3);
    let mut model = HydrostaticFreeSurfaceModel::builder(Arc::clone(&grid))
        .auxiliary_field("drag", drag)
        .forcing(
            "u",
            Forcing::<RectilinearGrid>::discrete(
                |ctx, p| p["wind"] - ctx.state.auxiliary["drag"][ctx.index] * ctx.field[ctx.index],
                [("wind".to_string(), 1e-5)].into_iter().collect(),
            ),
        )
        .momentum_advection(MomentumAdvection::None)
        .time_stepper(TimeStepper::ForwardEuler)
        .build()
        .unwrap();
    model.time_step(100.0).unwrap();
    // uniform forcing in a periodic channel leaves the free surface flat
    assert_relative_eq!(model.state().u[[2, 2, 2]], 1e-3, epsilon = 1e-12);
    assert!(model.state().eta.max_abs() < 1e-12);
}

#[test]
fn initial_conditions_are_only_accepted_before_stepping() {
    let mut model = HydrostaticFreeSurfaceModel::builder(channel())
        .tracers(["T"])
        .build()
        .unwrap();
    assert!(matches!(
        model.set_initial_conditions([("w", InitialCondition::from(1.0))]),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        model.set_initial_conditions([("S", InitialCondition::from(1.0))]),
        Err(Error::Validation(_))
    ));
    model
        .set_initial_conditions([("T", InitialCondition::from(2.0)), ("u", 0.1.into())])
        .unwrap();
    assert_eq!(model.field("T").unwrap()[[0, 0, 0]], 2.0);
    model.time_step(1.0).unwrap();
    assert!(matches!(
        model.set_initial_conditions([("T", InitialCondition::from(1.0))]),
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(model.time_step(-1.0), Err(Error::Validation(_))));
}

#[test]
fn incompatible_options_are_rejected() {
    let config_err = |r: Result<HydrostaticFreeSurfaceModel<LatitudeLongitudeGrid>>| {
        matches!(r, Err(Error::Configuration(_)))
    };
    assert!(config_err(
        HydrostaticFreeSurfaceModel::builder(sector())
            .momentum_advection(MomentumAdvection::CenteredSecondOrder)
            .build()
    ));
    assert!(config_err(
        HydrostaticFreeSurfaceModel::builder(sector())
            .coriolis(Coriolis::BetaPlane { f0: 1e-4, beta: 1e-11 })
            .build()
    ));
    assert!(config_err(
        HydrostaticFreeSurfaceModel::builder(sector())
            .closure(Closure::ScalarDiffusivity {
                viscosity: 1.0.into(),
                diffusivity: 1.0.into(),
            })
            .build()
    ));
    assert!(config_err(
        HydrostaticFreeSurfaceModel::builder(sector())
            .closure(Closure::HorizontalScalarBiharmonicDiffusivity {
                viscosity: 1e9.into(),
                diffusivity: 0.0.into(),
            })
            .build()
    ));
    assert!(matches!(
        HydrostaticFreeSurfaceModel::builder(channel())
            .coriolis(Coriolis::earth())
            .build(),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        HydrostaticFreeSurfaceModel::builder(channel())
            .boundary_conditions(
                "v",
                FieldBoundaryConditions::from_topology(channel().topology())
                    .with(Boundary::South, BoundaryCondition::Value(1.0)),
            )
            .build(),
        Err(Error::Configuration(_))
    ));
    if !Architecture::Threaded.is_available() {
        assert!(matches!(
            HydrostaticFreeSurfaceModel::builder(channel())
                .architecture(Architecture::Threaded)
                .build(),
            Err(Error::Configuration(_))
        ));
    }
}

#[test]
fn invalid_names_are_rejected() {
    let validation_err = |r: Result<HydrostaticFreeSurfaceModel<RectilinearGrid>>| {
        matches!(r, Err(Error::Validation(_)))
    };
    assert!(validation_err(
        HydrostaticFreeSurfaceModel::builder(channel())
            .tracers(["eta"])
            .build()
    ));
    assert!(validation_err(
        HydrostaticFreeSurfaceModel::builder(channel())
            .tracers(["T", "T"])
            .build()
    ));
    assert!(validation_err(
        HydrostaticFreeSurfaceModel::builder(channel())
            .tracers(["T"])
            .forcing("S", Forcing::random(1.0, 0))
            .build()
    ));
    assert!(validation_err(
        HydrostaticFreeSurfaceModel::builder(channel())
            .boundary_conditions("S", FieldBoundaryConditions::from_topology(channel().topology()))
            .build()
    ));
    let elsewhere = Field::new(channel(), Location::CENTER);
    assert!(validation_err(
        HydrostaticFreeSurfaceModel::builder(channel())
            .auxiliary_field("mask", elsewhere)
            .build()
    ));
    assert!(validation_err(
        HydrostaticFreeSurfaceModel::builder(channel())
            .free_surface(FreeSurface::Explicit(ExplicitFreeSurface {
                substeps: Some(0),
                ..Default::default()
            }))
            .build()
    ));
}
