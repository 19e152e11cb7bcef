//! Linear-algebra collaborator for the adjoint-instrumented solver.
//!
//! This crate provides the concrete pieces the instrumentation layer solves
//! against: affine bilinear/linear forms over tracked coefficients, vector
//! unknowns ([`Function`]) with tape variables attached, Dirichlet boundary
//! conditions with homogenization, the two assembly strategies, and the
//! backend Krylov solver handle (CG / BiCGStab with Jacobi preconditioning,
//! dense LU fallback).
//!
//! Sparse operators use nalgebra-sparse: COO triplets during assembly and
//! boundary-condition application, CSR for solving.

pub mod assemble;
pub mod bc;
pub mod error;
pub mod form;
pub mod function;
pub mod krylov;

pub use assemble::{
    assemble_matrix, assemble_operator, assemble_rhs, assemble_system, assemble_vector,
    AssemblyStrategy,
};
pub use bc::DirichletBC;
pub use error::SolveError;
pub use form::{BilinearForm, Coefficient, LinearForm};
pub use function::{Function, FunctionSpace};
pub use krylov::{KrylovMethod, KrylovOptions, KrylovSolver, Preconditioner, SolveInfo};
