//! Computational tape for reverse-mode differentiation of solver runs.
//!
//! Forward operations register themselves as blocks on a [`Tape`]; the tape
//! replays them in recorded order and walks them in reverse to accumulate
//! adjoint values on the variables they read and wrote. The tape itself
//! knows nothing about linear algebra beyond the [`Value`] snapshots it
//! stores; the numeric work lives in the blocks.

pub mod block;
pub mod tape;
pub mod variable;

pub use block::{Block, Dependency, DependencyKind};
pub use tape::Tape;
pub use variable::{BlockVariable, Value};

use thiserror::Error;

/// Errors raised while replaying or back-propagating a tape.
#[derive(Debug, Error)]
pub enum TapeError {
    /// A block's forward replay or adjoint step failed.
    #[error("block evaluation failed: {0}")]
    Block(String),
    /// A variable was read before any value was saved on it.
    #[error("variable {0} has no saved value")]
    MissingValue(usize),
    /// Adjoint accumulation mixed incompatible value shapes.
    #[error("adjoint value shape mismatch: {0}")]
    ShapeMismatch(String),
}
