//! The block interface recorded operations implement.

use crate::variable::BlockVariable;
use crate::TapeError;

/// How a block depends on a variable.
///
/// Ordinary inputs are `Coefficient` edges. A saved warm-start value is a
/// distinct `InitialGuess` edge: it influences the iterative path but not
/// the converged solution, and some gradient drivers want to skip it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Coefficient,
    InitialGuess,
}

/// One input edge of a block.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub kind: DependencyKind,
    pub variable: BlockVariable,
}

impl Dependency {
    pub fn coefficient(variable: BlockVariable) -> Self {
        Self {
            kind: DependencyKind::Coefficient,
            variable,
        }
    }

    pub fn initial_guess(variable: BlockVariable) -> Self {
        Self {
            kind: DependencyKind::InitialGuess,
            variable,
        }
    }
}

/// A recorded operation on the tape.
///
/// `recompute` must reproduce the forward result from the dependencies'
/// saved values; `adjoint` consumes the accumulated adjoint of the outputs
/// and distributes contributions back onto the dependencies.
pub trait Block {
    /// Input edges, in registration order.
    fn dependencies(&self) -> Vec<Dependency>;

    /// Output variables written by the forward operation.
    fn outputs(&self) -> Vec<BlockVariable>;

    /// Replay the forward operation and refresh the output snapshots.
    fn recompute(&self) -> Result<(), TapeError>;

    /// Reverse step: propagate output adjoints to dependency adjoints.
    fn adjoint(&self) -> Result<(), TapeError>;
}
