//! Adjoint-aware instrumentation of Krylov linear solves.
//!
//! This crate records each forward linear solve onto a computational tape
//! so that simulation outputs can be differentiated in reverse mode with
//! respect to simulation inputs. A [`KrylovSolver`] façade intercepts
//! `solve` calls: when the supplied [`fea_tape::Tape`] is recording, the
//! solve is captured as a [`KrylovSolveBlock`] carrying its operand forms,
//! boundary conditions, and a [`SolverOptions`] snapshot. The tape replays
//! forward solves in recorded order and walks them in reverse, each node
//! solving its transposed (adjoint) system through lazily built, cached
//! solver handles ([`SolveHelper`]).
//!
//! ```no_run
//! use fea_adjoint::KrylovSolver;
//! use fea_la::{BilinearForm, Function, FunctionSpace, LinearForm};
//! use fea_tape::{Tape, Value};
//! use nalgebra::DVector;
//! # fn forms() -> (BilinearForm, LinearForm) { unimplemented!() }
//!
//! let mut tape = Tape::new();
//! let (a, l) = forms();
//! let u = Function::new(FunctionSpace::new(a.nrows()));
//! let mut solver = KrylovSolver::new("cg", "jacobi")?.with_operator(a);
//! solver.solve(&mut tape, &u, &l)?;
//!
//! // Seed dJ/du and pull the gradient back through the solve.
//! u.block_variable()
//!     .add_adj_value(Value::Vector(DVector::from_element(u.space().dim(), 1.0)))?;
//! tape.backpropagate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod block;
pub mod helper;
pub mod options;
pub mod solver;

pub use block::{KrylovSolveBlock, KrylovSolveRecord};
pub use helper::SolveHelper;
pub use options::SolverOptions;
pub use solver::KrylovSolver;
