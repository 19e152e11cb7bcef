//! Backend Krylov solver handle.
//!
//! A [`KrylovSolver`] is bound to a method and preconditioner at
//! construction, to its operator(s) via [`KrylovSolver::set_operator`] /
//! [`KrylovSolver::set_operators`], and solves repeatedly against that
//! binding. Options may be updated between solves without invalidating the
//! bound operator.
//!
//! Methods: CG for SPD systems, BiCGStab for general systems, and a dense
//! LU fallback for small problems. Preconditioning is Jacobi (diagonal
//! scaling) built from the distinct preconditioning matrix when one is
//! bound, otherwise from the system matrix itself.

use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};

use crate::error::SolveError;

static NEXT_SOLVER_ID: AtomicU64 = AtomicU64::new(1);

/// Krylov method selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KrylovMethod {
    /// Backend default (conjugate gradient).
    Default,
    /// Conjugate Gradient (SPD systems).
    Cg,
    /// Biconjugate Gradient Stabilized (general systems).
    BiCgStab,
    /// Dense LU factorization (direct, small systems).
    Lu,
}

impl Default for KrylovMethod {
    fn default() -> Self {
        KrylovMethod::Default
    }
}

impl KrylovMethod {
    /// String identifier for this method.
    pub fn name(&self) -> &'static str {
        match self {
            KrylovMethod::Default => "default",
            KrylovMethod::Cg => "cg",
            KrylovMethod::BiCgStab => "bicgstab",
            KrylovMethod::Lu => "lu",
        }
    }

    /// Parse a method name. Unknown names are configuration errors.
    pub fn parse(name: &str) -> Result<Self, SolveError> {
        match name {
            "default" => Ok(KrylovMethod::Default),
            "cg" => Ok(KrylovMethod::Cg),
            "bicgstab" => Ok(KrylovMethod::BiCgStab),
            "lu" => Ok(KrylovMethod::Lu),
            other => Err(SolveError::Config(format!(
                "unknown Krylov method '{other}'"
            ))),
        }
    }

    fn resolve(self) -> KrylovMethod {
        match self {
            KrylovMethod::Default => KrylovMethod::Cg,
            other => other,
        }
    }
}

/// Preconditioner selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Preconditioner {
    /// Backend default (no preconditioning).
    Default,
    /// No preconditioning.
    None,
    /// Jacobi (diagonal scaling).
    Jacobi,
}

impl Default for Preconditioner {
    fn default() -> Self {
        Preconditioner::Default
    }
}

impl Preconditioner {
    /// String identifier for this preconditioner.
    pub fn name(&self) -> &'static str {
        match self {
            Preconditioner::Default => "default",
            Preconditioner::None => "none",
            Preconditioner::Jacobi => "jacobi",
        }
    }

    /// Parse a preconditioner name. Unknown names are configuration errors.
    pub fn parse(name: &str) -> Result<Self, SolveError> {
        match name {
            "default" => Ok(Preconditioner::Default),
            "none" => Ok(Preconditioner::None),
            "jacobi" => Ok(Preconditioner::Jacobi),
            other => Err(SolveError::Config(format!(
                "unknown preconditioner '{other}'"
            ))),
        }
    }
}

/// Convergence controls for the iterative methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KrylovOptions {
    /// Relative tolerance on the residual norm against `||b||`.
    pub relative_tolerance: f64,
    /// Absolute tolerance on the residual norm.
    pub absolute_tolerance: f64,
    /// Iteration cap; exceeding it is a non-convergence failure.
    pub max_iterations: usize,
    /// Warm-start from the contents of `x` instead of a zero guess.
    pub nonzero_initial_guess: bool,
}

impl Default for KrylovOptions {
    fn default() -> Self {
        Self {
            relative_tolerance: 1e-10,
            absolute_tolerance: 1e-50,
            max_iterations: 1000,
            nonzero_initial_guess: false,
        }
    }
}

/// Convergence and diagnostic info from one solve.
#[derive(Debug, Clone)]
pub struct SolveInfo {
    /// Number of iterations (1 for the direct method).
    pub iterations: usize,
    /// Final residual norm, if the method tracks one.
    pub residual_norm: Option<f64>,
    /// Human-readable solver name (e.g. "cg+jacobi").
    pub solver_name: String,
}

/// A solver handle bound to a method, preconditioner, operator(s), and
/// options.
#[derive(Debug, Clone)]
pub struct KrylovSolver {
    id: u64,
    method: KrylovMethod,
    preconditioner: Preconditioner,
    operator: Option<CsrMatrix<f64>>,
    pc_operator: Option<CsrMatrix<f64>>,
    options: KrylovOptions,
}

impl KrylovSolver {
    /// Construct a handle for `method` and `preconditioner` with default
    /// options and no operator bound yet.
    pub fn new(method: KrylovMethod, preconditioner: Preconditioner) -> Self {
        Self {
            id: NEXT_SOLVER_ID.fetch_add(1, Ordering::Relaxed),
            method,
            preconditioner,
            operator: None,
            pc_operator: None,
            options: KrylovOptions::default(),
        }
    }

    /// Construct from string names; unknown names fail immediately.
    pub fn from_names(method: &str, preconditioner: &str) -> Result<Self, SolveError> {
        Ok(Self::new(
            KrylovMethod::parse(method)?,
            Preconditioner::parse(preconditioner)?,
        ))
    }

    /// Monotone per-process construction id. Each constructed handle gets
    /// a distinct id, which lets callers verify caching behavior.
    pub fn construction_id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> KrylovMethod {
        self.method
    }

    pub fn preconditioner(&self) -> Preconditioner {
        self.preconditioner
    }

    /// Bind the system matrix, replacing any previous binding.
    pub fn set_operator(&mut self, a: CsrMatrix<f64>) {
        self.operator = Some(a);
        self.pc_operator = None;
    }

    /// Bind the system matrix and a distinct preconditioning matrix.
    pub fn set_operators(&mut self, a: CsrMatrix<f64>, p: CsrMatrix<f64>) {
        self.operator = Some(a);
        self.pc_operator = Some(p);
    }

    /// Update convergence controls. Idempotent with respect to the bound
    /// operator: repeated calls never force a rebind.
    pub fn set_options(&mut self, options: &KrylovOptions) {
        self.options = options.clone();
    }

    pub fn options(&self) -> &KrylovOptions {
        &self.options
    }

    /// Solve `A x = b` into `x`.
    ///
    /// With `nonzero_initial_guess` set, iteration starts from the current
    /// contents of `x`; otherwise `x` is zeroed first. Non-convergence and
    /// breakdowns are returned as errors, never retried.
    pub fn solve(&self, x: &mut DVector<f64>, b: &DVector<f64>) -> Result<SolveInfo, SolveError> {
        let a = self.operator.as_ref().ok_or(SolveError::NoOperator)?;
        if a.nrows() != b.len() {
            return Err(SolveError::DimensionMismatch {
                expected: a.nrows(),
                found: b.len(),
            });
        }
        if a.ncols() != x.len() {
            return Err(SolveError::DimensionMismatch {
                expected: a.ncols(),
                found: x.len(),
            });
        }

        if !self.options.nonzero_initial_guess {
            x.fill(0.0);
        }

        match self.method.resolve() {
            KrylovMethod::Cg => self.solve_cg(a, x, b),
            KrylovMethod::BiCgStab => self.solve_bicgstab(a, x, b),
            KrylovMethod::Lu => self.solve_lu(a, x, b),
            KrylovMethod::Default => unreachable!("resolved above"),
        }
    }

    fn tolerance(&self, b_norm: f64) -> f64 {
        (self.options.relative_tolerance * b_norm).max(self.options.absolute_tolerance)
    }

    /// Inverse diagonal of the preconditioning matrix (or the operator when
    /// no distinct one is bound), if Jacobi preconditioning is selected.
    fn jacobi_inverse(&self, a: &CsrMatrix<f64>) -> Result<Option<DVector<f64>>, SolveError> {
        match self.preconditioner {
            Preconditioner::Default | Preconditioner::None => Ok(None),
            Preconditioner::Jacobi => {
                let m = self.pc_operator.as_ref().unwrap_or(a);
                let n = m.nrows();
                let mut diag = DVector::zeros(n);
                for (i, j, v) in m.triplet_iter() {
                    if i == j {
                        diag[i] += v;
                    }
                }
                for i in 0..n {
                    if diag[i] == 0.0 {
                        return Err(SolveError::Singular(format!(
                            "zero diagonal at dof {i} in Jacobi preconditioner"
                        )));
                    }
                    diag[i] = 1.0 / diag[i];
                }
                Ok(Some(diag))
            }
        }
    }

    fn solver_name(&self, base: &str) -> String {
        match self.preconditioner {
            Preconditioner::Jacobi => format!("{base}+jacobi"),
            _ => base.to_string(),
        }
    }

    fn solve_cg(
        &self,
        a: &CsrMatrix<f64>,
        x: &mut DVector<f64>,
        b: &DVector<f64>,
    ) -> Result<SolveInfo, SolveError> {
        let tol = self.tolerance(b.norm());
        let m_inv = self.jacobi_inverse(a)?;
        let apply_m = |r: &DVector<f64>| match &m_inv {
            Some(d) => r.component_mul(d),
            None => r.clone(),
        };

        let mut r = b - spmv(a, x);
        let mut res = r.norm();
        if res <= tol {
            return Ok(SolveInfo {
                iterations: 0,
                residual_norm: Some(res),
                solver_name: self.solver_name("cg"),
            });
        }

        let mut z = apply_m(&r);
        let mut p = z.clone();
        let mut rz = r.dot(&z);

        for it in 1..=self.options.max_iterations {
            let ap = spmv(a, &p);
            let pap = p.dot(&ap);
            if pap.abs() < f64::MIN_POSITIVE {
                return Err(SolveError::Singular(
                    "conjugate-gradient breakdown (p' A p = 0)".to_string(),
                ));
            }
            let alpha = rz / pap;
            x.axpy(alpha, &p, 1.0);
            r.axpy(-alpha, &ap, 1.0);
            res = r.norm();
            if res <= tol {
                return Ok(SolveInfo {
                    iterations: it,
                    residual_norm: Some(res),
                    solver_name: self.solver_name("cg"),
                });
            }
            z = apply_m(&r);
            let rz_next = r.dot(&z);
            let beta = rz_next / rz;
            rz = rz_next;
            p = &z + beta * &p;
        }

        Err(SolveError::NonConvergence {
            iterations: self.options.max_iterations,
            residual: res,
        })
    }

    fn solve_bicgstab(
        &self,
        a: &CsrMatrix<f64>,
        x: &mut DVector<f64>,
        b: &DVector<f64>,
    ) -> Result<SolveInfo, SolveError> {
        let tol = self.tolerance(b.norm());
        let m_inv = self.jacobi_inverse(a)?;
        let apply_m = |r: &DVector<f64>| match &m_inv {
            Some(d) => r.component_mul(d),
            None => r.clone(),
        };

        let mut r = b - spmv(a, x);
        let mut res = r.norm();
        if res <= tol {
            return Ok(SolveInfo {
                iterations: 0,
                residual_norm: Some(res),
                solver_name: self.solver_name("bicgstab"),
            });
        }

        let r_hat = r.clone();
        let n = b.len();
        let mut rho = 1.0;
        let mut alpha = 1.0;
        let mut omega = 1.0;
        let mut v = DVector::zeros(n);
        let mut p = DVector::zeros(n);

        for it in 1..=self.options.max_iterations {
            let rho_next = r_hat.dot(&r);
            if rho_next.abs() < f64::MIN_POSITIVE {
                return Err(SolveError::Singular(
                    "BiCGStab breakdown (rho = 0)".to_string(),
                ));
            }
            let beta = (rho_next / rho) * (alpha / omega);
            p = &r + beta * (&p - omega * &v);
            let p_hat = apply_m(&p);
            v = spmv(a, &p_hat);
            let denom = r_hat.dot(&v);
            if denom.abs() < f64::MIN_POSITIVE {
                return Err(SolveError::Singular(
                    "BiCGStab breakdown (r_hat' v = 0)".to_string(),
                ));
            }
            alpha = rho_next / denom;
            let s = &r - alpha * &v;
            if s.norm() <= tol {
                x.axpy(alpha, &p_hat, 1.0);
                return Ok(SolveInfo {
                    iterations: it,
                    residual_norm: Some(s.norm()),
                    solver_name: self.solver_name("bicgstab"),
                });
            }
            let s_hat = apply_m(&s);
            let t = spmv(a, &s_hat);
            let tt = t.dot(&t);
            if tt.abs() < f64::MIN_POSITIVE {
                return Err(SolveError::Singular(
                    "BiCGStab breakdown (t' t = 0)".to_string(),
                ));
            }
            omega = t.dot(&s) / tt;
            x.axpy(alpha, &p_hat, 1.0);
            x.axpy(omega, &s_hat, 1.0);
            r = &s - omega * &t;
            res = r.norm();
            if res <= tol {
                return Ok(SolveInfo {
                    iterations: it,
                    residual_norm: Some(res),
                    solver_name: self.solver_name("bicgstab"),
                });
            }
            rho = rho_next;
        }

        Err(SolveError::NonConvergence {
            iterations: self.options.max_iterations,
            residual: res,
        })
    }

    fn solve_lu(
        &self,
        a: &CsrMatrix<f64>,
        x: &mut DVector<f64>,
        b: &DVector<f64>,
    ) -> Result<SolveInfo, SolveError> {
        // Densify; direct factorization is the small-system fallback.
        let mut dense = DMatrix::zeros(a.nrows(), a.ncols());
        for (i, j, v) in a.triplet_iter() {
            dense[(i, j)] += v;
        }
        let solution = dense
            .lu()
            .solve(b)
            .ok_or_else(|| SolveError::Singular("LU factorization failed".to_string()))?;
        x.copy_from(&solution);
        Ok(SolveInfo {
            iterations: 1,
            residual_norm: None,
            solver_name: "lu".to_string(),
        })
    }
}

/// Sparse matrix-vector product.
fn spmv(a: &CsrMatrix<f64>, x: &DVector<f64>) -> DVector<f64> {
    let mut y = DVector::zeros(a.nrows());
    for (i, j, v) in a.triplet_iter() {
        y[i] += v * x[j];
    }
    y
}
