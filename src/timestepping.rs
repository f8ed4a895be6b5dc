//! Explicit time integration schemes.
//!
//! A scheme is described by its [`Stage`]s. Every stage combines a number of tendencies,
//! oldest first, with fixed coefficients and advances the state by a fraction of the step.

use crate::architecture::Architecture;
use crate::field::Field;
use crate::grid::Grid;

const EF_FAC: [f64; 1] = [1.0];
const AB2_FAC: [f64; 2] = [-1f64 / 2f64, 3f64 / 2f64];
const AB3_FAC: [f64; 3] = [5f64 / 12f64, -16f64 / 12f64, 23f64 / 12f64];

// low storage third order Runge-Kutta (Wray 1986, in the form of Le & Moin 1991)
const RK3_FAC: [&[f64]; 3] = [
    &[8f64 / 15f64],
    &[-17f64 / 60f64, 5f64 / 12f64],
    &[-5f64 / 12f64, 3f64 / 4f64],
];
const RK3_FRACTION: [f64; 3] = [8f64 / 15f64, 2f64 / 15f64, 1f64 / 3f64];

/// Time stepping scheme.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeStepper {
    ForwardEuler,
    /// Falls back to forward Euler while fewer than two tendencies are known.
    #[default]
    AdamsBashforth2,
    /// Falls back to Adams-Bashforth 2 while fewer than three tendencies are known.
    AdamsBashforth3,
    RungeKutta3,
}

/// One stage of a scheme.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stage {
    /// Weights of the most recent tendencies, oldest first.
    pub coefficients: &'static [f64],
    /// Fraction of the time step covered by this stage.
    pub dt_fraction: f64,
}

impl TimeStepper {
    pub fn stage_count(self) -> usize {
        match self {
            TimeStepper::RungeKutta3 => 3,
            _ => 1,
        }
    }

    /// Number of tendencies the scheme needs to keep.
    pub fn history_capacity(self) -> usize {
        match self {
            TimeStepper::ForwardEuler => 1,
            TimeStepper::AdamsBashforth2 => 2,
            TimeStepper::AdamsBashforth3 => 3,
            TimeStepper::RungeKutta3 => 2,
        }
    }

    /// Whether tendencies are carried from one step to the next.
    pub fn is_multistep(self) -> bool {
        matches!(
            self,
            TimeStepper::AdamsBashforth2 | TimeStepper::AdamsBashforth3
        )
    }

    /// Stage `stage` given `available` stored tendencies (the newest included).
    pub fn stage(self, stage: usize, available: usize) -> Stage {
        let coefficients: &'static [f64] = match self {
            TimeStepper::ForwardEuler => &EF_FAC,
            TimeStepper::AdamsBashforth2 | TimeStepper::AdamsBashforth3 => {
                match (self, available) {
                    (TimeStepper::AdamsBashforth3, n) if n >= 3 => &AB3_FAC,
                    (_, n) if n >= 2 => &AB2_FAC,
                    _ => &EF_FAC,
                }
            }
            TimeStepper::RungeKutta3 => RK3_FAC[stage.min(2)],
        };
        let dt_fraction = match self {
            TimeStepper::RungeKutta3 => RK3_FRACTION[stage.min(2)],
            _ => 1.0,
        };
        Stage {
            coefficients,
            dt_fraction,
        }
    }
}

/// Advance the interior of `field` by `dt * Σ c_n past_n`, `past` ordered oldest first.
pub fn integrate<G: Grid>(
    arch: Architecture,
    coefficients: &[f64],
    past: &[&Field<G>],
    dt: f64,
    field: &mut Field<G>,
) {
    debug_assert_eq!(coefficients.len(), past.len());
    field.update_interior(arch, |idx, old| {
        old + dt
            * coefficients
                .iter()
                .zip(past)
                .map(|(c, g)| c * g[idx])
                .sum::<f64>()
    });
}
