//! Drives a model to a stop time or iteration and hands its state to output writers.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::diagnostics::{Diagnostic, Schedule, ScheduleTracker};
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::model::HydrostaticFreeSurfaceModel;
use crate::state::ModelState;

/// Error type returned by output writers.
pub type WriterError = Box<dyn StdError + Send + Sync>;

/// Sink for model states. The file format is up to the implementation.
pub trait OutputWriter<G>: Send {
    fn write(&mut self, state: &ModelState<G>) -> std::result::Result<(), WriterError>;

    /// Called once when a run ends.
    fn finalize(&mut self) -> std::result::Result<(), WriterError> {
        Ok(())
    }
}

/// Logs the progress of a run at `info` level.
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    started: Instant,
    last: Option<(Instant, usize)>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last: None,
        }
    }

    pub fn update<G: Grid>(&mut self, model: &HydrostaticFreeSurfaceModel<G>) {
        let now = Instant::now();
        let clock = model.clock();
        let rate = self.last.map(|(t, it)| {
            (clock.iteration - it) as f64 / now.duration_since(t).as_secs_f64().max(1e-9)
        });
        let state = model.state();
        info!(
            "iteration {:>8}, time {:.6e} s, dt {:?}, max|u| {:.3e}, max|v| {:.3e}, max|η| {:.3e}, wall {:.1?}{}",
            clock.iteration,
            clock.time,
            clock.last_dt,
            state.u.max_abs(),
            state.v.max_abs(),
            state.eta.max_abs(),
            now.duration_since(self.started),
            rate.map_or(String::new(), |r| format!(", {r:.1} it/s")),
        );
        self.last = Some((now, clock.iteration));
    }
}

/// Why a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    StopTime,
    StopIteration,
}

/// Outcome of [`Simulation::run`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunSummary {
    /// Steps taken during this run.
    pub steps: usize,
    pub iteration: usize,
    pub time: f64,
    pub wall_time: Duration,
    pub reason: StopReason,
}

struct RegisteredWriter<G> {
    writer: Box<dyn OutputWriter<G>>,
    tracker: ScheduleTracker,
    last_iteration: Option<usize>,
}

/// A model together with its time step, stop criteria and outputs.
pub struct Simulation<G> {
    model: HydrostaticFreeSurfaceModel<G>,
    dt: f64,
    stop_time: Option<f64>,
    stop_iteration: Option<usize>,
    align_time_step: bool,
    writers: BTreeMap<String, RegisteredWriter<G>>,
    progress: Option<(ProgressReporter, ScheduleTracker)>,
}

impl<G: Grid> Simulation<G> {
    pub fn new(model: HydrostaticFreeSurfaceModel<G>, dt: f64) -> Result<Self> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(Error::validation(format!("time step must be positive, got {dt}")));
        }
        Ok(Self {
            model,
            dt,
            stop_time: None,
            stop_iteration: None,
            align_time_step: true,
            writers: BTreeMap::new(),
            progress: None,
        })
    }

    /// Stop once the model time reaches `time`.
    pub fn stop_time(mut self, time: f64) -> Self {
        self.stop_time = Some(time);
        self
    }

    /// Stop once the model iteration reaches `iteration`.
    pub fn stop_iteration(mut self, iteration: usize) -> Self {
        self.stop_iteration = Some(iteration);
        self
    }

    /// Shorten the last step so the run ends exactly at the stop time. On by default.
    pub fn align_time_step(mut self, align: bool) -> Self {
        self.align_time_step = align;
        self
    }

    /// Report progress on `schedule`.
    pub fn progress(mut self, schedule: Schedule) -> Result<Self> {
        let tracker = ScheduleTracker::new(schedule, self.model.clock())?;
        self.progress = Some((ProgressReporter::new(), tracker));
        Ok(self)
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn set_dt(&mut self, dt: f64) -> Result<()> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(Error::validation(format!("time step must be positive, got {dt}")));
        }
        self.dt = dt;
        Ok(())
    }

    pub fn model(&self) -> &HydrostaticFreeSurfaceModel<G> {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut HydrostaticFreeSurfaceModel<G> {
        &mut self.model
    }

    pub fn into_model(self) -> HydrostaticFreeSurfaceModel<G> {
        self.model
    }

    pub fn add_output_writer(
        &mut self,
        name: impl Into<String>,
        writer: impl OutputWriter<G> + 'static,
        schedule: Schedule,
    ) -> Result<()> {
        let name = name.into();
        if self.writers.contains_key(&name) {
            return Err(Error::validation(format!("output writer `{name}` registered twice")));
        }
        let tracker = ScheduleTracker::new(schedule, self.model.clock())?;
        self.writers.insert(
            name,
            RegisteredWriter {
                writer: Box::new(writer),
                tracker,
                last_iteration: None,
            },
        );
        Ok(())
    }

    /// Register a diagnostic with the model.
    pub fn add_diagnostic(
        &mut self,
        name: impl Into<String>,
        diagnostic: impl Diagnostic<G> + 'static,
        schedule: Schedule,
    ) -> Result<()> {
        self.model.add_diagnostic(name, diagnostic, schedule)
    }

    fn write_outputs(&mut self) -> Result<()> {
        let clock = *self.model.clock();
        for (name, entry) in self.writers.iter_mut() {
            if entry.last_iteration == Some(clock.iteration) || !entry.tracker.is_due(&clock) {
                continue;
            }
            entry
                .writer
                .write(self.model.state())
                .map_err(|e| Error::Output {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            entry.tracker.fired(&clock);
            entry.last_iteration = Some(clock.iteration);
        }
        Ok(())
    }

    fn finalize_outputs(&mut self) -> Result<()> {
        for (name, entry) in self.writers.iter_mut() {
            entry.writer.finalize().map_err(|e| Error::Output {
                name: name.clone(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn stop_reason(&self) -> Option<StopReason> {
        let clock = self.model.clock();
        if self.stop_iteration.is_some_and(|n| clock.iteration >= n) {
            return Some(StopReason::StopIteration);
        }
        if self
            .stop_time
            .is_some_and(|t| clock.time >= t - 1e-9 * self.dt)
        {
            return Some(StopReason::StopTime);
        }
        None
    }

    /// Step the model until a stop criterion is met, then stop the model.
    ///
    /// Output writers whose schedule is due are called after every step, and once at the
    /// start of the run. Errors of the model or of a writer end the run.
    pub fn run(&mut self) -> Result<RunSummary> {
        if self.stop_time.is_none() && self.stop_iteration.is_none() {
            return Err(Error::validation(
                "a simulation needs a stop time or a stop iteration",
            ));
        }
        let started = Instant::now();
        let start_iteration = self.model.clock().iteration;
        info!(
            "starting simulation at iteration {}, time {} s, dt {} s",
            start_iteration,
            self.model.clock().time,
            self.dt
        );
        self.write_outputs()?;

        let reason = loop {
            if let Some(reason) = self.stop_reason() {
                break reason;
            }
            let mut dt = self.dt;
            if let (true, Some(stop)) = (self.align_time_step, self.stop_time) {
                let remaining = stop - self.model.clock().time;
                if remaining < dt {
                    warn!("shortening the time step from {dt} s to {remaining} s to reach the stop time");
                    dt = remaining;
                }
            }
            if let Err(err) = self.model.time_step(dt) {
                warn!("simulation aborted: {err}");
                self.finalize_outputs()?;
                return Err(err);
            }
            self.write_outputs()?;
            let clock = *self.model.clock();
            if let Some((reporter, tracker)) = self.progress.as_mut() {
                if tracker.is_due(&clock) {
                    reporter.update(&self.model);
                    tracker.fired(&clock);
                }
            }
        };
        self.model.stop();
        self.finalize_outputs()?;

        let clock = self.model.clock();
        let summary = RunSummary {
            steps: clock.iteration - start_iteration,
            iteration: clock.iteration,
            time: clock.time,
            wall_time: started.elapsed(),
            reason,
        };
        info!(
            "simulation stopped ({:?}) at iteration {}, time {} s after {:.2?}",
            summary.reason, summary.iteration, summary.time, summary.wall_time
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use approx::assert_relative_eq;

    use super::{OutputWriter, Simulation, StopReason, WriterError};
    use crate::diagnostics::{FieldMaximum, Schedule};
    use crate::error::Error;
    use crate::grid::{RectilinearGrid, Topology};
    use crate::model::{HydrostaticFreeSurfaceModel, Phase};
    use crate::state::ModelState;

    fn model() -> HydrostaticFreeSurfaceModel<RectilinearGrid> {
        let grid = RectilinearGrid::builder([8, 1, 2])
            .x((0.0, 8e4))
            .y((0.0, 1e4))
            .z((-50.0, 0.0))
            .topology([Topology::Bounded, Topology::Periodic, Topology::Bounded])
            .build()
            .unwrap();
        HydrostaticFreeSurfaceModel::builder(Arc::new(grid))
            .build()
            .unwrap()
    }

    #[derive(Clone, Default)]
    struct Recorder {
        times: Arc<Mutex<Vec<f64>>>,
        finalized: Arc<Mutex<bool>>,
    }

    impl OutputWriter<RectilinearGrid> for Recorder {
        fn write(&mut self, state: &ModelState<RectilinearGrid>) -> Result<(), WriterError> {
            self.times.lock().unwrap().push(state.clock.time);
            Ok(())
        }

        fn finalize(&mut self) -> Result<(), WriterError> {
            *self.finalized.lock().unwrap() = true;
            Ok(())
        }
    }

    struct Broken;

    impl OutputWriter<RectilinearGrid> for Broken {
        fn write(&mut self, _: &ModelState<RectilinearGrid>) -> Result<(), WriterError> {
            Err("disk full".into())
        }
    }

    #[test]
    fn stops_at_the_stop_iteration() {
        let mut sim = Simulation::new(model(), 10.0).unwrap().stop_iteration(5);
        let summary = sim.run().unwrap();
        assert_eq!(summary.steps, 5);
        assert_eq!(summary.reason, StopReason::StopIteration);
        assert_relative_eq!(summary.time, 50.0);
        assert_eq!(sim.model().phase(), Phase::Stopped);
        // nothing left to do
        assert_eq!(sim.run().unwrap().steps, 0);
    }

    #[test]
    fn last_step_is_aligned_with_the_stop_time() {
        let mut sim = Simulation::new(model(), 30.0).unwrap().stop_time(100.0);
        let summary = sim.run().unwrap();
        assert_eq!(summary.steps, 4);
        assert_eq!(summary.reason, StopReason::StopTime);
        assert_relative_eq!(summary.time, 100.0);
        assert_relative_eq!(sim.model().clock().last_dt.unwrap(), 10.0, epsilon = 1e-9);
        assert_eq!(sim.model().phase(), Phase::Stopped);
        assert!(matches!(
            sim.model_mut().time_step(30.0),
            Err(Error::InvalidState(_))
        ));

        let mut sim = Simulation::new(model(), 30.0)
            .unwrap()
            .stop_time(100.0)
            .align_time_step(false);
        assert_relative_eq!(sim.run().unwrap().time, 120.0);
    }

    #[test]
    fn writers_follow_their_schedule() {
        let recorder = Recorder::default();
        let mut sim = Simulation::new(model(), 10.0).unwrap().stop_iteration(6);
        sim.add_output_writer("rec", recorder.clone(), Schedule::TimeInterval(20.0))
            .unwrap();
        sim.add_diagnostic("umax", FieldMaximum::new("u"), Schedule::IterationInterval(3))
            .unwrap();
        sim.run().unwrap();
        assert_eq!(*recorder.times.lock().unwrap(), vec![20.0, 40.0, 60.0]);
        assert!(*recorder.finalized.lock().unwrap());
        let records = sim.model().diagnostic_records("umax").unwrap();
        assert_eq!(
            records.iter().map(|r| r.iteration).collect::<Vec<_>>(),
            vec![3, 6]
        );

        assert!(matches!(
            sim.add_output_writer("rec", recorder, Schedule::default()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn initial_state_is_written_for_iteration_schedules() {
        let recorder = Recorder::default();
        let mut sim = Simulation::new(model(), 10.0).unwrap().stop_iteration(2);
        sim.add_output_writer("rec", recorder.clone(), Schedule::IterationInterval(1))
            .unwrap();
        sim.run().unwrap();
        assert_eq!(*recorder.times.lock().unwrap(), vec![0.0, 10.0, 20.0]);
    }

    #[test]
    fn failing_writer_ends_the_run() {
        let mut sim = Simulation::new(model(), 10.0).unwrap().stop_iteration(3);
        sim.add_output_writer("broken", Broken, Schedule::IterationInterval(2))
            .unwrap();
        match sim.run() {
            Err(Error::Output { name, message }) => {
                assert_eq!(name, "broken");
                assert_eq!(message, "disk full");
            }
            other => panic!("expected an output error, got {other:?}"),
        }
    }

    #[test]
    fn a_stop_criterion_is_required() {
        let mut sim = Simulation::new(model(), 10.0).unwrap();
        assert!(matches!(sim.run(), Err(Error::Validation(_))));
        assert!(Simulation::new(model(), 0.0).is_err());
        assert!(Simulation::new(model(), f64::NAN).is_err());
    }
}
