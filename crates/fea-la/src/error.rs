//! Error type shared by assembly and solving.

use thiserror::Error;

/// Errors from solver configuration, assembly, or the numeric solve.
///
/// Numeric failures are terminal at this layer: no retry or fallback is
/// attempted, the caller's gradient computation aborts on them.
#[derive(Debug, Clone, Error)]
pub enum SolveError {
    /// Invalid method/preconditioner name or invalid option values.
    #[error("solver configuration error: {0}")]
    Config(String),

    /// A solve was requested before any operator was bound.
    #[error("no operator configured")]
    NoOperator,

    /// The iterative solve did not reach the requested tolerance.
    #[error("solver did not converge after {iterations} iterations (residual {residual:.3e})")]
    NonConvergence { iterations: usize, residual: f64 },

    /// Breakdown or singular operator during factorization/iteration.
    #[error("singular system: {0}")]
    Singular(String),

    /// Operand shapes do not agree.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}
