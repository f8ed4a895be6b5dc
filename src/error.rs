//! Error taxonomy shared by all fallible operations of the crate.

use thiserror::Error;

/// Errors raised while constructing or stepping a model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Bad construction parameters. Nothing was constructed.
    #[error("validation error: {0}")]
    Validation(String),

    /// Physics options that cannot be combined with the grid or with each other.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The iterative solver ran out of iterations before reaching its tolerance.
    #[error(
        "solver did not converge after {iterations} iterations \
         (residual {residual:e}, tolerance {tolerance:e})"
    )]
    Convergence {
        iterations: usize,
        residual: f64,
        tolerance: f64,
    },

    /// A non-finite value was found in a model field.
    #[error("non-finite value in `{field}` at iteration {iteration} (time {time})")]
    NumericalInstability {
        field: String,
        iteration: usize,
        time: f64,
    },

    /// The operation is not allowed in the current model phase.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An attached output writer failed.
    #[error("output writer `{name}` failed: {message}")]
    Output { name: String, message: String },
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Returns `true` for errors that halt the model for good.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NumericalInstability { .. })
    }

    /// Stamp a numerical instability with the model iteration and time it occurred at.
    pub fn at_clock(self, at_iteration: usize, at_time: f64) -> Self {
        match self {
            Self::NumericalInstability { field, .. } => Self::NumericalInstability {
                field,
                iteration: at_iteration,
                time: at_time,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
