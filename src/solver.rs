//! Preconditioned conjugate gradient method for symmetric positive definite systems.
//!
//! The solver is matrix free: the system matrix is only accessed through
//! [`LinearOperator::apply`] and its diagonal, which is used for Jacobi preconditioning.

use log::debug;

use crate::architecture::Architecture;
use crate::error::{Error, Result};

/// Symmetric positive definite linear operator `y = A x`.
pub trait LinearOperator: Sync {
    /// Number of unknowns.
    fn len(&self) -> usize;

    fn apply(&self, x: &[f64], y: &mut [f64]);

    /// Diagonal elements of `A`.
    fn diagonal(&self) -> Vec<f64>;
}

/// Preconditioner type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Preconditioner {
    /// Identity.
    None,
    /// Inverse of the diagonal.
    #[default]
    Jacobi,
}

/// Settings of the [`PcgSolver`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PcgConfig {
    /// Tolerance relative to the norm of the right-hand side.
    pub rtol: f64,
    /// Absolute tolerance.
    pub atol: f64,
    /// Iteration budget. Defaults to the number of unknowns, but at least 1000.
    pub max_iterations: Option<usize>,
    pub preconditioner: Preconditioner,
}

impl Default for PcgConfig {
    fn default() -> Self {
        Self {
            rtol: 1e-10,
            atol: 0.0,
            max_iterations: None,
            preconditioner: Preconditioner::Jacobi,
        }
    }
}

impl PcgConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.rtol >= 0.0 && self.atol >= 0.0) || (self.rtol == 0.0 && self.atol == 0.0) {
            return Err(Error::validation(format!(
                "solver tolerances must be non-negative and not both zero, got rtol = {}, atol = {}",
                self.rtol, self.atol
            )));
        }
        if self.max_iterations == Some(0) {
            return Err(Error::validation("the solver needs at least one iteration"));
        }
        Ok(())
    }

    fn budget(&self, n: usize) -> usize {
        self.max_iterations.unwrap_or_else(|| n.max(1000))
    }
}

/// Outcome of a successful solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PcgResult {
    pub iterations: usize,
    /// Norm of the true residual `b - A x`.
    pub residual: f64,
    pub tolerance: f64,
}

/// Jacobi preconditioned conjugate gradient solver with reusable work space.
#[derive(Clone, Debug)]
pub struct PcgSolver {
    config: PcgConfig,
    arch: Architecture,
    r: Vec<f64>,
    z: Vec<f64>,
    p: Vec<f64>,
    ap: Vec<f64>,
}

impl PcgSolver {
    pub fn new(config: PcgConfig, arch: Architecture, n: usize) -> Self {
        Self {
            config,
            arch,
            r: vec![0.0; n],
            z: vec![0.0; n],
            p: vec![0.0; n],
            ap: vec![0.0; n],
        }
    }

    pub fn config(&self) -> &PcgConfig {
        &self.config
    }

    fn true_residual(&mut self, op: &impl LinearOperator, b: &[f64], x: &[f64]) -> f64 {
        op.apply(x, &mut self.ap);
        let ap = &self.ap;
        self.arch.update(&mut self.r, |n, _| b[n] - ap[n]);
        self.arch.dot(&self.r, &self.r).sqrt()
    }

    fn precondition(&mut self, inv_diag: &[f64]) -> f64 {
        let r = &self.r;
        self.arch.update(&mut self.z, |n, _| inv_diag[n] * r[n]);
        self.arch.dot(&self.r, &self.z)
    }

    /// Solve `A x = b`, starting from the initial guess in `x`.
    ///
    /// Convergence is declared when the norm of the true residual falls below
    /// `max(rtol * |b|, atol)`.
    pub fn solve(&mut self, op: &impl LinearOperator, b: &[f64], x: &mut [f64]) -> Result<PcgResult> {
        let n = op.len();
        debug_assert!(b.len() == n && x.len() == n && self.r.len() == n);

        let b_norm = self.arch.dot(b, b).sqrt();
        if !b_norm.is_finite() {
            return Err(Error::NumericalInstability {
                field: "free surface right-hand side".into(),
                iteration: 0,
                time: 0.0,
            });
        }
        let tolerance = (self.config.rtol * b_norm).max(self.config.atol);
        if b_norm == 0.0 {
            x.fill(0.0);
            return Ok(PcgResult {
                iterations: 0,
                residual: 0.0,
                tolerance,
            });
        }

        let inv_diag: Vec<f64> = match self.config.preconditioner {
            Preconditioner::Jacobi => op
                .diagonal()
                .into_iter()
                .map(|d| if d != 0.0 { 1.0 / d } else { 1.0 })
                .collect(),
            Preconditioner::None => vec![1.0; n],
        };

        let mut residual = self.true_residual(op, b, x);
        let mut rz = self.precondition(&inv_diag);
        self.p.copy_from_slice(&self.z);

        let budget = self.config.budget(n);
        let mut iterations = 0;
        while residual > tolerance {
            if iterations == budget {
                debug!("pcg: no convergence after {iterations} iterations, |r| = {residual:e}, tol = {tolerance:e}");
                return Err(Error::Convergence {
                    iterations,
                    residual,
                    tolerance,
                });
            }
            iterations += 1;

            op.apply(&self.p, &mut self.ap);
            let p_ap = self.arch.dot(&self.p, &self.ap);
            if !p_ap.is_finite() || p_ap <= 0.0 {
                if !p_ap.is_finite() {
                    return Err(Error::NumericalInstability {
                        field: "free surface residual".into(),
                        iteration: 0,
                        time: 0.0,
                    });
                }
                // direction exhausted in finite precision
                residual = self.true_residual(op, b, x);
                break;
            }
            let alpha = rz / p_ap;

            let p = &self.p;
            self.arch.update(x, |n, xn| xn + alpha * p[n]);
            let ap = &self.ap;
            self.arch.update(&mut self.r, |n, rn| rn - alpha * ap[n]);
            residual = self.arch.dot(&self.r, &self.r).sqrt();

            if !residual.is_finite() {
                return Err(Error::NumericalInstability {
                    field: "free surface residual".into(),
                    iteration: 0,
                    time: 0.0,
                });
            }

            if residual <= tolerance {
                // confirm with the true residual, restart from it if the recurrence drifted
                residual = self.true_residual(op, b, x);
                if residual <= tolerance {
                    break;
                }
                rz = self.precondition(&inv_diag);
                self.p.copy_from_slice(&self.z);
                continue;
            }

            let rz_new = self.precondition(&inv_diag);
            let beta = rz_new / rz;
            rz = rz_new;
            let z = &self.z;
            self.arch.update(&mut self.p, |n, pn| z[n] + beta * pn);
        }

        if residual > tolerance {
            return Err(Error::Convergence {
                iterations,
                residual,
                tolerance,
            });
        }
        debug!("pcg: converged after {iterations} iterations, |r| = {residual:e}, tol = {tolerance:e}");
        Ok(PcgResult {
            iterations,
            residual,
            tolerance,
        })
    }
}
