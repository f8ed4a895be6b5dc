//! User supplied forcing terms added to the right-hand side of a prognostic equation.
//!
//! Every forcing is evaluated per interior point and receives its parameters explicitly.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::field::Field;
use crate::grid::{Grid, Location};
use crate::state::{Clock, ModelState};

/// Named parameters handed to forcing functions.
pub type Parameters = BTreeMap<String, f64>;

/// Forcing as a function of `(x, y, z, t, parameters)`.
pub type ContinuousFn = Arc<dyn Fn(f64, f64, f64, f64, &Parameters) -> f64 + Send + Sync>;

/// Forcing as a function of the discrete model state.
pub type DiscreteFn<G> = Arc<dyn Fn(&ForcingContext<'_, G>, &Parameters) -> f64 + Send + Sync>;

/// Function of `(x, y, z, t)`.
pub type TargetFn = Arc<dyn Fn(f64, f64, f64, f64) -> f64 + Send + Sync>;

/// Function of `(x, y, z)`.
pub type MaskFn = Arc<dyn Fn(f64, f64, f64) -> f64 + Send + Sync>;

/// Everything a discrete forcing function can look at.
pub struct ForcingContext<'a, G> {
    /// Interior index the forcing is evaluated at.
    pub index: [isize; 3],
    /// Location of the forced field.
    pub location: Location,
    /// Clock at the current stage.
    pub clock: &'a Clock,
    /// Velocities, free surface, tracers and auxiliary fields.
    pub state: &'a ModelState<G>,
    /// The field being forced.
    pub field: &'a Field<G>,
}

/// Forcing of one prognostic field.
pub enum Forcing<G> {
    Continuous {
        func: ContinuousFn,
        parameters: Parameters,
    },
    Discrete {
        func: DiscreteFn<G>,
        parameters: Parameters,
    },
    /// Newtonian relaxation `rate * mask * (target - φ)`.
    Relaxation {
        rate: f64,
        target: TargetFn,
        mask: MaskFn,
    },
    /// Uniformly distributed noise in `[-amplitude, amplitude]`, drawn anew every iteration
    /// from a generator seeded with `seed + iteration`.
    Random {
        amplitude: f64,
        seed: u64,
        noise: Option<Field<G>>,
    },
}

impl<G> Clone for Forcing<G> {
    fn clone(&self) -> Self {
        match self {
            Forcing::Continuous { func, parameters } => Forcing::Continuous {
                func: Arc::clone(func),
                parameters: parameters.clone(),
            },
            Forcing::Discrete { func, parameters } => Forcing::Discrete {
                func: Arc::clone(func),
                parameters: parameters.clone(),
            },
            Forcing::Relaxation { rate, target, mask } => Forcing::Relaxation {
                rate: *rate,
                target: Arc::clone(target),
                mask: Arc::clone(mask),
            },
            Forcing::Random {
                amplitude,
                seed,
                noise,
            } => Forcing::Random {
                amplitude: *amplitude,
                seed: *seed,
                noise: noise.clone(),
            },
        }
    }
}

impl<G> fmt::Debug for Forcing<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Forcing::Continuous { parameters, .. } => f
                .debug_struct("Continuous")
                .field("parameters", parameters)
                .finish_non_exhaustive(),
            Forcing::Discrete { parameters, .. } => f
                .debug_struct("Discrete")
                .field("parameters", parameters)
                .finish_non_exhaustive(),
            Forcing::Relaxation { rate, .. } => f
                .debug_struct("Relaxation")
                .field("rate", rate)
                .finish_non_exhaustive(),
            Forcing::Random {
                amplitude, seed, ..
            } => f
                .debug_struct("Random")
                .field("amplitude", amplitude)
                .field("seed", seed)
                .finish_non_exhaustive(),
        }
    }
}

impl<G: Grid> Forcing<G> {
    pub fn continuous(
        func: impl Fn(f64, f64, f64, f64, &Parameters) -> f64 + Send + Sync + 'static,
        parameters: Parameters,
    ) -> Self {
        Forcing::Continuous {
            func: Arc::new(func),
            parameters,
        }
    }

    pub fn discrete(
        func: impl Fn(&ForcingContext<'_, G>, &Parameters) -> f64 + Send + Sync + 'static,
        parameters: Parameters,
    ) -> Self {
        Forcing::Discrete {
            func: Arc::new(func),
            parameters,
        }
    }

    pub fn relaxation(
        rate: f64,
        target: impl Fn(f64, f64, f64, f64) -> f64 + Send + Sync + 'static,
        mask: impl Fn(f64, f64, f64) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Forcing::Relaxation {
            rate,
            target: Arc::new(target),
            mask: Arc::new(mask),
        }
    }

    pub fn random(amplitude: f64, seed: u64) -> Self {
        Forcing::Random {
            amplitude,
            seed,
            noise: None,
        }
    }

    /// Prepare for the step starting at `clock`. The forced field serves as template.
    pub fn refresh(&mut self, template: &Field<G>, clock: &Clock) {
        if let Forcing::Random {
            amplitude,
            seed,
            noise,
        } = self
        {
            let field = noise.get_or_insert_with(|| template.similar());
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(clock.iteration as u64));
            let a = *amplitude;
            for idx in field.interior_indices().collect::<Vec<_>>() {
                field[idx] = if a > 0.0 { rng.gen_range(-a..=a) } else { 0.0 };
            }
        }
    }

    pub fn evaluate(&self, ctx: &ForcingContext<'_, G>) -> f64 {
        let position = || ctx.field.grid().position(ctx.location, ctx.index);
        match self {
            Forcing::Continuous { func, parameters } => {
                let [x, y, z] = position();
                func(x, y, z, ctx.clock.time, parameters)
            }
            Forcing::Discrete { func, parameters } => func(ctx, parameters),
            Forcing::Relaxation { rate, target, mask } => {
                let [x, y, z] = position();
                rate * mask(x, y, z) * (target(x, y, z, ctx.clock.time) - ctx.field[ctx.index])
            }
            Forcing::Random { noise, .. } => noise.as_ref().map_or(0.0, |n| n[ctx.index]),
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use approx::assert_relative_eq;

    use super::{Forcing, ForcingContext, Parameters};
    use crate::grid::{Location, RectilinearGrid};
    use crate::state::{Clock, ModelState};

    fn state() -> ModelState<RectilinearGrid> {
        let grid = Arc::new(
            RectilinearGrid::builder([4, 4, 2])
                .length([4.0, 4.0, 2.0])
                .build()
                .unwrap(),
        );
        ModelState::new(&grid, ["T"], BTreeMap::new())
    }

    fn eval(f: &Forcing<RectilinearGrid>, s: &ModelState<RectilinearGrid>, clock: &Clock, idx: [isize; 3]) -> f64 {
        let ctx = ForcingContext {
            index: idx,
            location: Location::CENTER,
            clock,
            state: s,
            field: &s.tracers["T"],
        };
        f.evaluate(&ctx)
    }

    #[test]
    fn continuous_forcing_sees_position_time_and_parameters() {
        let s = state();
        let params: Parameters = [("a".to_string(), 3.0)].into_iter().collect();
        let f: Forcing<RectilinearGrid> = Forcing::continuous(|x, _, z, t, p| p["a"] * x + z + t, params);
        let clock = Clock {
            time: 10.0,
            ..Default::default()
        };
        assert_relative_eq!(eval(&f, &s, &clock, [1, 0, 0]), 3.0 * 1.5 - 1.5 + 10.0);
    }

    #[test]
    fn discrete_forcing_reads_other_fields() {
        let mut s = state();
        s.u.fill(2.0);
        let f: Forcing<RectilinearGrid> = Forcing::discrete(
            |ctx, p| -p["drag"] * ctx.state.u[ctx.index],
            [("drag".to_string(), 0.5)].into_iter().collect(),
        );
        assert_relative_eq!(eval(&f, &s, &Clock::default(), [2, 2, 1]), -1.0);
    }

    #[test]
    fn relaxation_pulls_towards_target() {
        let mut s = state();
        s.tracers.get_mut("T").unwrap().fill(1.0);
        let f: Forcing<RectilinearGrid> = Forcing::relaxation(0.1, |_, _, _, _| 3.0, |x, _, _| if x < 2.0 { 1.0 } else { 0.0 });
        assert_relative_eq!(eval(&f, &s, &Clock::default(), [0, 0, 0]), 0.2);
        assert_eq!(eval(&f, &s, &Clock::default(), [3, 0, 0]), 0.0);
    }

    #[test]
    fn random_forcing_is_reproducible_and_bounded() {
        let s = state();
        let template = &s.tracers["T"];
        let mut a: Forcing<RectilinearGrid> = Forcing::random(0.5, 42);
        let mut b: Forcing<RectilinearGrid> = Forcing::random(0.5, 42);
        let clock = Clock {
            iteration: 3,
            ..Default::default()
        };
        assert_eq!(eval(&a, &s, &clock, [0, 0, 0]), 0.0);
        a.refresh(template, &clock);
        b.refresh(template, &clock);
        let values: Vec<f64> = template
            .interior_indices()
            .map(|idx| eval(&a, &s, &clock, idx))
            .collect();
        assert!(values.iter().all(|v| v.abs() <= 0.5));
        assert!(values.iter().any(|v| *v != 0.0));
        for idx in template.interior_indices() {
            assert_eq!(eval(&a, &s, &clock, idx), eval(&b, &s, &clock, idx));
        }
        let next = Clock {
            iteration: 4,
            ..clock
        };
        b.refresh(template, &next);
        assert!(template
            .interior_indices()
            .any(|idx| eval(&a, &s, &clock, idx) != eval(&b, &s, &next, idx)));
    }
}
